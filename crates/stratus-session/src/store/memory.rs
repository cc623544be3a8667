//! In-process reference implementation of the remote store protocol.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{
    CreateOutcome, CreatePolicy, LockTicket, ReadOptions, ReadOutcome, ReadPayload, RemoteStore,
    UpdateOutcome,
};
use crate::clock::{Clock, SystemClock, deadline};
use crate::error::{StoreError, StoreResult};
use crate::key::StoreKey;
use crate::session::{PRINCIPAL_INDEX_FIELD, Session};

/// Locks older than this are considered abandoned and may be taken over.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(90);

/// Store operations that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    AttachRemoteStore,
    Create,
    Read,
    Update,
    ReleaseLock,
    Delete,
    Get,
    Query,
}

/// Named namespaces sharing one clock, standing in for a cache cluster.
pub struct MemoryCluster {
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
    namespaces: DashMap<String, Arc<MemoryStore>>,
}

impl MemoryCluster {
    /// Create a cluster that reads wall-clock time.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a cluster reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            namespaces: DashMap::new(),
        }
    }

    /// Set the lock timeout of the namespaces this cluster opens.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Open (or create) a namespace. Every caller asking for the same name
    /// shares the same entries.
    pub fn namespace(&self, name: &str) -> Arc<MemoryStore> {
        self.namespaces
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(namespace = %name, "Opening namespace");
                Arc::new(
                    MemoryStore::with_clock(name, Arc::clone(&self.clock))
                        .with_lock_timeout(self.lock_timeout),
                )
            })
            .clone()
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

struct HeldLock {
    ticket: LockTicket,
    acquired_at: DateTime<Utc>,
}

struct StoredEntry {
    id: String,
    bytes: Vec<u8>,
    /// Deserialized copy handed out when the client cache is on.
    cached: Option<Session>,
    principal: Option<String>,
    ttl: Duration,
    touched_at: DateTime<Utc>,
    lock: Option<HeldLock>,
    notify_replica: bool,
}

impl StoredEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= deadline(self.touched_at, self.ttl)
    }

    fn store(&mut self, session: &Session) -> StoreResult<()> {
        self.bytes = serde_json::to_vec(session)?;
        self.cached = Some(session.clone());
        self.principal = session
            .indexed_value(PRINCIPAL_INDEX_FIELD)
            .map(str::to_string);
        Ok(())
    }
}

/// One namespace of session entries held in process memory.
///
/// Implements the full [`RemoteStore`] protocol: exclusive locks with
/// re-entrant tickets and a takeover timeout, sliding TTLs, the
/// `principal_name` index, replica attachment and notification counting.
/// Replica pulls, faults and corrupt payloads can be simulated for tests.
pub struct MemoryStore {
    name: String,
    clock: Arc<dyn Clock>,
    entries: DashMap<[u8; 32], StoredEntry>,
    next_ticket: AtomicU64,
    lock_timeout: Duration,
    client_cache: AtomicBool,
    remote_stores: Mutex<Vec<String>>,
    replica_notifications: AtomicU64,
    pending_pulls: DashMap<[u8; 32], u32>,
    faults: Mutex<HashMap<StoreOp, u32>>,
}

impl MemoryStore {
    /// Create a standalone namespace that reads wall-clock time.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, Arc::new(SystemClock))
    }

    /// Create a standalone namespace reading time from `clock`.
    pub fn with_clock(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            clock,
            entries: DashMap::new(),
            next_ticket: AtomicU64::new(1),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            client_cache: AtomicBool::new(true),
            remote_stores: Mutex::new(Vec::new()),
            replica_notifications: AtomicU64::new(0),
            pending_pulls: DashMap::new(),
            faults: Mutex::new(HashMap::new()),
        }
    }

    /// Set how long a lock may be held before others can take it over.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Turn the client-side object cache on or off. When off, every read
    /// returns serialized bytes.
    pub fn set_client_cache(&self, enabled: bool) {
        self.client_cache.store(enabled, Ordering::SeqCst);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a live entry exists for the session id.
    pub fn contains(&self, id: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .get(StoreKey::for_session(id).digest())
            .is_some_and(|e| !e.is_expired(now))
    }

    /// Whether the entry for the session id is currently locked.
    pub fn is_locked(&self, id: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .get(StoreKey::for_session(id).digest())
            .is_some_and(|e| !e.is_expired(now) && self.lock_is_live(e.lock.as_ref(), now))
    }

    /// Remote stores attached to this namespace.
    pub fn remote_stores(&self) -> Vec<String> {
        self.remote_stores.lock().clone()
    }

    /// Updates that were forwarded to the remote replica.
    pub fn replica_notifications(&self) -> u64 {
        self.replica_notifications.load(Ordering::SeqCst)
    }

    /// Make the next `reads` remote-pulling reads of `id` report
    /// [`ReadOutcome::Pending`].
    pub fn simulate_replica_pull(&self, id: &str, reads: u32) {
        self.pending_pulls
            .insert(*StoreKey::for_session(id).digest(), reads);
    }

    /// Make the next `times` calls of `op` fail with [`StoreError::Unavailable`].
    pub fn inject_fault(&self, op: StoreOp, times: u32) {
        self.faults.lock().insert(op, times);
    }

    /// Replace the stored payload of `id` with bytes that do not decode.
    pub fn corrupt(&self, id: &str) {
        if let Some(mut entry) = self.entries.get_mut(StoreKey::for_session(id).digest()) {
            entry.bytes = b"\x00not a session".to_vec();
            entry.cached = None;
        }
    }

    fn check_fault(&self, op: StoreOp) -> StoreResult<()> {
        let mut faults = self.faults.lock();
        match faults.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Unavailable(format!(
                    "injected {op:?} fault in namespace '{}'",
                    self.name
                )))
            }
            _ => Ok(()),
        }
    }

    fn issue_ticket(&self) -> LockTicket {
        LockTicket(self.next_ticket.fetch_add(1, Ordering::SeqCst))
    }

    fn lock_is_live(&self, lock: Option<&HeldLock>, now: DateTime<Utc>) -> bool {
        lock.is_some_and(|l| now < deadline(l.acquired_at, self.lock_timeout))
    }

    fn held_by_other(
        &self,
        lock: Option<&HeldLock>,
        ticket: Option<LockTicket>,
        now: DateTime<Utc>,
    ) -> bool {
        self.lock_is_live(lock, now) && lock.map(|l| l.ticket) != ticket
    }

    fn evict_if_expired(&self, digest: &[u8; 32], now: DateTime<Utc>) {
        if let Some((_, entry)) = self.entries.remove_if(digest, |_, e| e.is_expired(now)) {
            debug!(namespace = %self.name, session_id = %entry.id, "Entry expired");
        }
    }

    fn take_pending_pull(&self, digest: &[u8; 32]) -> bool {
        let Some(mut remaining) = self.pending_pulls.get_mut(digest) else {
            return false;
        };
        if *remaining == 0 {
            return false;
        }
        *remaining -= 1;
        true
    }

    fn create_sync(
        &self,
        key: &StoreKey,
        session: &Session,
        policy: &CreatePolicy,
    ) -> StoreResult<CreateOutcome> {
        self.check_fault(StoreOp::Create)?;
        let now = self.clock.now();
        self.evict_if_expired(key.digest(), now);

        let mut stored = StoredEntry {
            id: key.id().to_string(),
            bytes: Vec::new(),
            cached: None,
            principal: None,
            ttl: policy.ttl,
            touched_at: now,
            lock: None,
            notify_replica: policy.notify_replica_on_update,
        };
        stored.store(session)?;

        match self.entries.entry(*key.digest()) {
            Entry::Occupied(_) => Ok(CreateOutcome::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(stored);
                trace!(namespace = %self.name, session_id = %key, "Entry created");
                Ok(CreateOutcome::Created)
            }
        }
    }

    fn read_sync(
        &self,
        key: &StoreKey,
        options: &ReadOptions,
        ticket: Option<LockTicket>,
    ) -> StoreResult<ReadOutcome> {
        self.check_fault(StoreOp::Read)?;
        if options.read_remote && self.take_pending_pull(key.digest()) {
            return Ok(ReadOutcome::Pending);
        }

        let now = self.clock.now();
        self.evict_if_expired(key.digest(), now);

        let Some(mut entry) = self.entries.get_mut(key.digest()) else {
            return if options.object_may_not_exist {
                Ok(ReadOutcome::NotFound)
            } else {
                Err(StoreError::NotFound(key.id().to_string()))
            };
        };

        let granted = if options.lock {
            if self.held_by_other(entry.lock.as_ref(), ticket, now) {
                return Ok(ReadOutcome::Locked);
            }
            let ticket = match (&entry.lock, ticket) {
                (Some(held), Some(presented))
                    if held.ticket == presented && self.lock_is_live(Some(held), now) =>
                {
                    presented
                }
                _ => self.issue_ticket(),
            };
            entry.lock = Some(HeldLock {
                ticket,
                acquired_at: now,
            });
            Some(ticket)
        } else {
            None
        };
        entry.touched_at = now;

        let use_cache = options.return_cached_if_valid && self.client_cache.load(Ordering::SeqCst);
        let payload = match (&entry.cached, use_cache) {
            (Some(session), true) => ReadPayload::Cached(session.clone()),
            _ => ReadPayload::Bytes(entry.bytes.clone()),
        };

        Ok(ReadOutcome::Found {
            payload,
            ticket: granted,
        })
    }

    fn update_sync(
        &self,
        key: &StoreKey,
        ticket: Option<LockTicket>,
        session: &Session,
    ) -> StoreResult<UpdateOutcome> {
        self.check_fault(StoreOp::Update)?;
        let now = self.clock.now();
        self.evict_if_expired(key.digest(), now);

        let Some(mut entry) = self.entries.get_mut(key.digest()) else {
            return Err(StoreError::NotFound(key.id().to_string()));
        };
        if self.held_by_other(entry.lock.as_ref(), ticket, now) {
            return Ok(UpdateOutcome::Locked);
        }

        entry.store(session)?;
        entry.touched_at = now;
        entry.lock = None;
        if entry.notify_replica {
            self.replica_notifications.fetch_add(1, Ordering::SeqCst);
        }
        Ok(UpdateOutcome::Updated)
    }

    fn release_sync(&self, key: &StoreKey, ticket: LockTicket) -> StoreResult<()> {
        self.check_fault(StoreOp::ReleaseLock)?;
        if let Some(mut entry) = self.entries.get_mut(key.digest())
            && entry.lock.as_ref().is_some_and(|l| l.ticket == ticket)
        {
            entry.lock = None;
        }
        Ok(())
    }

    fn get_sync(&self, key: &StoreKey) -> StoreResult<Option<Session>> {
        self.check_fault(StoreOp::Get)?;
        let now = self.clock.now();
        self.evict_if_expired(key.digest(), now);

        let Some(entry) = self.entries.get(key.digest()) else {
            return Ok(None);
        };
        match &entry.cached {
            Some(session) => Ok(Some(session.clone())),
            None => Ok(Some(serde_json::from_slice(&entry.bytes)?)),
        }
    }

    fn query_sync(&self, field: &str, value: &str) -> StoreResult<Vec<StoreKey>> {
        self.check_fault(StoreOp::Query)?;
        if field != PRINCIPAL_INDEX_FIELD {
            return Err(StoreError::UnknownIndex(field.to_string()));
        }
        let now = self.clock.now();
        Ok(self
            .entries
            .iter()
            .filter(|e| !e.is_expired(now) && e.principal.as_deref() == Some(value))
            .map(|e| StoreKey::for_session(&e.id))
            .collect())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn attach_remote_store(&self, name: &str) -> StoreResult<()> {
        self.check_fault(StoreOp::AttachRemoteStore)
            .map_err(|_| StoreError::RemoteStore(name.to_string()))?;
        let mut stores = self.remote_stores.lock();
        if !stores.iter().any(|s| s == name) {
            stores.push(name.to_string());
        }
        Ok(())
    }

    async fn create(
        &self,
        key: &StoreKey,
        session: &Session,
        policy: &CreatePolicy,
    ) -> StoreResult<CreateOutcome> {
        self.create_sync(key, session, policy)
    }

    async fn read(
        &self,
        key: &StoreKey,
        options: &ReadOptions,
        ticket: Option<LockTicket>,
    ) -> StoreResult<ReadOutcome> {
        self.read_sync(key, options, ticket)
    }

    async fn update_and_unlock(
        &self,
        key: &StoreKey,
        ticket: Option<LockTicket>,
        session: &Session,
    ) -> StoreResult<UpdateOutcome> {
        self.update_sync(key, ticket, session)
    }

    async fn release_lock(&self, key: &StoreKey, ticket: LockTicket) -> StoreResult<()> {
        self.release_sync(key, ticket)
    }

    async fn delete(&self, key: &StoreKey) -> StoreResult<()> {
        self.check_fault(StoreOp::Delete)?;
        if self.entries.remove(key.digest()).is_some() {
            trace!(namespace = %self.name, session_id = %key, "Entry deleted");
        }
        Ok(())
    }

    async fn get(&self, key: &StoreKey) -> StoreResult<Option<Session>> {
        self.get_sync(key)
    }

    async fn query_keys(&self, field: &str, value: &str) -> StoreResult<Vec<StoreKey>> {
        self.query_sync(field, value)
    }
}
