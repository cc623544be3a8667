//! Session repository: the access protocol over a shared remote store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::accessor::{AccessorHandle, AccessorTable};
use crate::clock::{Clock, SystemClock};
use crate::config::RepositoryConfig;
use crate::error::{Error, Result};
use crate::key::StoreKey;
use crate::principal::{PRINCIPAL_NAME_INDEX_NAME, PrincipalResolver};
use crate::session::{PRINCIPAL_INDEX_FIELD, Session};
use crate::store::{CreateOutcome, ReadOptions, ReadOutcome, RemoteStore, UpdateOutcome};

/// Creates, reads, saves and deletes sessions held in a [`RemoteStore`].
///
/// With locking enabled a read takes the entry's exclusive lock and parks
/// the handle in the [`AccessorTable`]; the next save of that session writes
/// through the same handle and releases the lock. Tasks of one process that
/// race for the same id converge on a single handle through the table.
///
/// Store faults never reach the caller: reads degrade to `None` and writes to
/// no-ops, with the fault logged. The only error a caller sees is
/// [`Error::Interrupted`], raised when the shutdown token is cancelled while
/// the repository is waiting to retry.
#[derive(Clone)]
pub struct SessionRepository {
    store: Arc<dyn RemoteStore>,
    config: RepositoryConfig,
    read_options: ReadOptions,
    accessors: AccessorTable,
    clock: Arc<dyn Clock>,
    resolver: PrincipalResolver,
    shutdown: CancellationToken,
}

impl SessionRepository {
    /// Open a repository over a store namespace.
    ///
    /// Attaches the configured remote replica store, if any; failing to do so
    /// fails construction.
    pub async fn open(store: Arc<dyn RemoteStore>, config: RepositoryConfig) -> Result<Self> {
        if let Some(remote) = &config.remote_store_name {
            store.attach_remote_store(remote).await?;
            debug!(cache = %config.cache_name, remote_store = %remote, "Attached remote store");
        }

        debug!(
            cache = %config.cache_name,
            locking = config.use_locking,
            "Session repository opened"
        );

        Ok(Self {
            read_options: config.read_options(),
            store,
            config,
            accessors: AccessorTable::new(),
            clock: Arc::new(SystemClock),
            resolver: PrincipalResolver::default(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Share an accessor table with other repositories of the same process.
    pub fn with_accessor_table(mut self, accessors: AccessorTable) -> Self {
        self.accessors = accessors;
        self
    }

    /// Read time from `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Resolve principal names with a custom resolver.
    pub fn with_principal_resolver(mut self, resolver: PrincipalResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Cancelling `token` interrupts any retry wait in progress.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// The table of handles currently holding (or awaiting) locks.
    pub fn accessors(&self) -> &AccessorTable {
        &self.accessors
    }

    /// Create a new, unsaved session with the configured timeout.
    pub fn create_session(&self) -> Session {
        Session::new(self.clock.now(), self.config.max_inactive_interval)
    }

    /// Find a live session by id.
    ///
    /// Returns `Ok(None)` for an empty id, a missing or expired entry, and any
    /// store fault. An expired entry is deleted on the way.
    pub async fn find_by_id(&self, id: &str) -> Result<Option<Session>> {
        if id.is_empty() {
            return Ok(None);
        }

        let mut handle = self
            .registered(id)
            .unwrap_or_else(|| Arc::new(AccessorHandle::new(id)));
        let mut pending_reads = 0u32;

        let payload = loop {
            let outcome = match handle.read(self.store.as_ref(), &self.read_options).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(session_id = %id, error = %e, "Session read failed");
                    return Ok(None);
                }
            };

            match outcome {
                ReadOutcome::Found { payload, .. } => break payload,
                ReadOutcome::NotFound => {
                    // Only locked reads are registered.
                    if self.config.use_locking {
                        self.accessors.remove_if_same(id, &handle);
                    }
                    trace!(session_id = %id, "Session not found");
                    return Ok(None);
                }
                ReadOutcome::Locked => {
                    if !self.config.use_locking {
                        error!(session_id = %id, "Store reported a lock while locking is disabled");
                        return Ok(None);
                    }
                    match self.accessors.get(id) {
                        Some(winner) if !Arc::ptr_eq(&winner, &handle) => {
                            debug!(session_id = %id, "Adopting accessor registered by another task");
                            handle = winner;
                        }
                        _ => {
                            trace!(session_id = %id, "Session locked elsewhere, waiting");
                            self.pause(id, self.config.lock_retry_interval).await?;
                        }
                    }
                }
                ReadOutcome::Pending => {
                    pending_reads += 1;
                    if pending_reads >= self.config.remote_read_pending_retries {
                        error!(
                            session_id = %id,
                            attempts = pending_reads,
                            "Remote read still pending, giving up"
                        );
                        return Ok(None);
                    }
                    trace!(session_id = %id, attempt = pending_reads, "Remote read pending");
                    self.pause(id, self.config.remote_read_pending_interval)
                        .await?;
                }
            }
        };

        // From here on the entry may be locked by `handle`: every early
        // return has to give the lock back or hand it to the table.
        let mut session = match payload.into_session() {
            Ok(session) => session,
            Err(e) => {
                error!(session_id = %id, error = %e, "Failed to decode session");
                self.abandon(&handle).await;
                return Ok(None);
            }
        };

        let now = self.clock.now();
        if session.is_expired(now) {
            debug!(session_id = %id, "Session expired, deleting");
            if self.config.use_locking {
                self.accessors.remove_if_same(id, &handle);
            }
            self.delete_with(&handle).await;
            return Ok(None);
        }

        session.touch(now);
        if self.config.use_locking {
            self.accessors.insert(id, handle);
        }
        Ok(Some(session))
    }

    /// Write a session back to the store.
    ///
    /// New sessions and sessions whose id was rotated are created; others are
    /// updated through the handle their read left in the accessor table,
    /// which releases the lock.
    pub async fn save(&self, session: &mut Session) -> Result<()> {
        let principal = self.resolver.resolve(session);
        session.set_principal_index_value(principal);

        if session.is_new() || !session.superseded_ids().is_empty() {
            self.save_new(session).await
        } else {
            self.save_existing(session).await
        }
    }

    /// Delete a session. Deleting a missing session is a no-op.
    pub async fn delete_by_id(&self, id: &str) {
        if id.is_empty() {
            return;
        }
        self.delete(id).await;
    }

    /// Sessions whose principal name equals `index_value`, keyed by id.
    ///
    /// Only [`PRINCIPAL_NAME_INDEX_NAME`] is a known index; any other name, or
    /// an empty value, yields an empty map. Entries that fail to load are
    /// left out.
    pub async fn find_by_index(
        &self,
        index_name: &str,
        index_value: &str,
    ) -> HashMap<String, Session> {
        let mut found = HashMap::new();
        if index_name != PRINCIPAL_NAME_INDEX_NAME || index_value.is_empty() {
            return found;
        }

        let keys = match self
            .store
            .query_keys(PRINCIPAL_INDEX_FIELD, index_value)
            .await
        {
            Ok(keys) => keys,
            Err(e) => {
                error!(principal = %index_value, error = %e, "Index query failed");
                return found;
            }
        };

        let now = self.clock.now();
        for key in keys {
            match self.store.get(&key).await {
                Ok(Some(session))
                    if !session.is_expired(now)
                        && session.principal_index_value() == Some(index_value) =>
                {
                    found.insert(key.id().to_string(), session);
                }
                Ok(_) => trace!(session_id = %key, "Indexed session is gone or stale"),
                Err(e) => error!(session_id = %key, error = %e, "Failed to load indexed session"),
            }
        }

        debug!(principal = %index_value, count = found.len(), "Index query complete");
        found
    }

    fn registered(&self, id: &str) -> Option<Arc<AccessorHandle>> {
        if self.config.use_locking {
            self.accessors.get(id)
        } else {
            None
        }
    }

    async fn save_new(&self, session: &mut Session) -> Result<()> {
        let superseded = session.take_superseded_ids();
        session.mark_not_new();

        let key = StoreKey::for_session(session.id());
        let policy = self.config.create_policy(session.max_inactive_interval());

        let result = match self.store.create(&key, session, &policy).await {
            Ok(CreateOutcome::Created) => {
                debug!(session_id = %key, "Session created");
                Ok(())
            }
            Ok(CreateOutcome::AlreadyExists) => {
                warn!(session_id = %key, "Session already exists, updating instead");
                self.save_existing(session).await
            }
            Err(e) => {
                error!(session_id = %key, error = %e, "Failed to create session");
                Ok(())
            }
        };

        for old_id in &superseded {
            self.delete(old_id).await;
        }

        result
    }

    async fn save_existing(&self, session: &Session) -> Result<()> {
        let id = session.id();

        loop {
            let registered = self.registered(id);
            let from_table = registered.is_some();
            let handle = registered.unwrap_or_else(|| Arc::new(AccessorHandle::new(id)));

            match handle.update_and_unlock(self.store.as_ref(), session).await {
                Ok(UpdateOutcome::Updated) => {
                    if from_table {
                        self.accessors.remove_if_same(id, &handle);
                    }
                    trace!(session_id = %id, "Session updated");
                    return Ok(());
                }
                Ok(UpdateOutcome::Locked) => {
                    warn!(session_id = %id, "Session locked by another holder, retrying update");
                    if from_table {
                        self.accessors.remove_if_same(id, &handle);
                    }
                    self.pause(id, self.config.lock_retry_interval).await?;
                }
                Err(e) => {
                    error!(session_id = %id, error = %e, "Failed to save session");
                    if from_table {
                        self.abandon(&handle).await;
                    }
                    return Ok(());
                }
            }
        }
    }

    async fn delete(&self, id: &str) {
        let handle = self
            .config
            .use_locking
            .then(|| self.accessors.remove(id))
            .flatten()
            .unwrap_or_else(|| Arc::new(AccessorHandle::new(id)));
        self.delete_with(&handle).await;
    }

    /// Delete through an unregistered handle. A failed delete still gives
    /// up whatever lock the handle holds.
    async fn delete_with(&self, handle: &AccessorHandle) {
        let id = handle.id();
        match handle.delete(self.store.as_ref()).await {
            Ok(()) => trace!(session_id = %id, "Session deleted"),
            Err(e) => {
                error!(session_id = %id, error = %e, "Failed to delete session");
                if let Err(e) = handle.release_lock(self.store.as_ref()).await {
                    warn!(session_id = %id, error = %e, "Failed to release session lock");
                }
            }
        }
    }

    /// Give up a handle after a failure: release its lock and unregister it.
    async fn abandon(&self, handle: &Arc<AccessorHandle>) {
        if !self.config.use_locking {
            return;
        }
        if let Err(e) = handle.release_lock(self.store.as_ref()).await {
            warn!(session_id = %handle.id(), error = %e, "Failed to release session lock");
        }
        self.accessors.remove_if_same(handle.id(), handle);
    }

    async fn pause(&self, id: &str, interval: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(Error::Interrupted(id.to_string())),
            _ = tokio::time::sleep(interval) => Ok(()),
        }
    }
}
