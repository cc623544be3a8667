//! Local accessor handles and the per-process table that coordinates them.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::StoreResult;
use crate::key::StoreKey;
use crate::session::Session;
use crate::store::{LockTicket, ReadOptions, ReadOutcome, RemoteStore, UpdateOutcome};

/// This process's handle on one remote entry, carrying its lock ticket.
///
/// The ticket is set by a locking read and cleared once the lock is given
/// back, either through an update or an explicit release.
#[derive(Debug)]
pub struct AccessorHandle {
    key: StoreKey,
    ticket: Mutex<Option<LockTicket>>,
}

impl AccessorHandle {
    /// Create an unlocked handle for a session id.
    pub fn new(id: &str) -> Self {
        Self {
            key: StoreKey::for_session(id),
            ticket: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &StoreKey {
        &self.key
    }

    /// The session id this handle addresses.
    pub fn id(&self) -> &str {
        self.key.id()
    }

    /// The lock ticket currently held, if any.
    pub fn ticket(&self) -> Option<LockTicket> {
        *self.ticket.lock()
    }

    /// Read through this handle, recording any lock the store grants.
    pub async fn read(
        &self,
        store: &dyn RemoteStore,
        options: &ReadOptions,
    ) -> StoreResult<ReadOutcome> {
        let outcome = store.read(&self.key, options, self.ticket()).await?;
        if let ReadOutcome::Found {
            ticket: Some(ticket),
            ..
        } = &outcome
        {
            *self.ticket.lock() = Some(*ticket);
        }
        Ok(outcome)
    }

    /// Write the session and give the lock back.
    pub async fn update_and_unlock(
        &self,
        store: &dyn RemoteStore,
        session: &Session,
    ) -> StoreResult<UpdateOutcome> {
        let outcome = store
            .update_and_unlock(&self.key, self.ticket(), session)
            .await?;
        if outcome == UpdateOutcome::Updated {
            self.ticket.lock().take();
        }
        Ok(outcome)
    }

    /// Release the lock, if this handle holds one.
    pub async fn release_lock(&self, store: &dyn RemoteStore) -> StoreResult<()> {
        let ticket = self.ticket.lock().take();
        match ticket {
            Some(ticket) => store.release_lock(&self.key, ticket).await,
            None => Ok(()),
        }
    }

    /// Remove the remote entry. Any lock goes with it.
    pub async fn delete(&self, store: &dyn RemoteStore) -> StoreResult<()> {
        store.delete(&self.key).await?;
        self.ticket.lock().take();
        Ok(())
    }
}

/// Concurrent map from session id to the handle holding its lock ticket.
///
/// One table belongs to one process (or one group of repositories that should
/// behave as one process). Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct AccessorTable {
    handles: Arc<DashMap<String, Arc<AccessorHandle>>>,
}

impl AccessorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The handle registered for `id`.
    pub fn get(&self, id: &str) -> Option<Arc<AccessorHandle>> {
        self.handles.get(id).map(|h| Arc::clone(h.value()))
    }

    /// Register `handle` for `id`, replacing any previous one.
    pub fn insert(&self, id: &str, handle: Arc<AccessorHandle>) {
        self.handles.insert(id.to_string(), handle);
    }

    /// Remove and return the handle for `id`.
    pub fn remove(&self, id: &str) -> Option<Arc<AccessorHandle>> {
        self.handles.remove(id).map(|(_, h)| h)
    }

    /// Remove the entry for `id` only if it is still `handle`.
    pub fn remove_if_same(&self, id: &str, handle: &Arc<AccessorHandle>) -> bool {
        self.handles
            .remove_if(id, |_, registered| Arc::ptr_eq(registered, handle))
            .is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.handles.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_remove_if_same_ignores_replaced_handle() {
        let table = AccessorTable::new();
        let old = Arc::new(AccessorHandle::new("s-1"));
        let new = Arc::new(AccessorHandle::new("s-1"));
        table.insert("s-1", Arc::clone(&old));
        table.insert("s-1", Arc::clone(&new));

        assert!(!table.remove_if_same("s-1", &old));
        assert!(table.contains("s-1"));
        assert!(table.remove_if_same("s-1", &new));
        assert!(table.is_empty());
    }

    #[test]
    fn test_clones_share_entries() {
        let table = AccessorTable::new();
        let other = table.clone();
        table.insert("s-1", Arc::new(AccessorHandle::new("s-1")));
        assert!(other.contains("s-1"));
        assert!(other.remove("s-1").is_some());
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_handle_tracks_ticket() {
        let store = MemoryStore::new("test");
        let session = Session::new(chrono::Utc::now(), std::time::Duration::from_secs(60));
        let handle = AccessorHandle::new(session.id());
        let policy = crate::store::CreatePolicy {
            ttl: std::time::Duration::from_secs(60),
            notify_replica_on_update: false,
        };
        store.create(handle.key(), &session, &policy).await.unwrap();

        let options = ReadOptions {
            object_may_not_exist: true,
            return_cached_if_valid: true,
            read_remote: false,
            lock: true,
        };
        handle.read(&store, &options).await.unwrap();
        assert!(handle.ticket().is_some());
        assert!(store.is_locked(session.id()));

        assert_eq!(
            handle.update_and_unlock(&store, &session).await.unwrap(),
            UpdateOutcome::Updated
        );
        assert!(handle.ticket().is_none());
        assert!(!store.is_locked(session.id()));

        handle.read(&store, &options).await.unwrap();
        handle.release_lock(&store).await.unwrap();
        assert!(handle.ticket().is_none());
        assert!(!store.is_locked(session.id()));
    }
}
