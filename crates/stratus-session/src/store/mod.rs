//! The boundary between the repository and the remote cache tier.
//!
//! The repository never talks to a cache client directly; it drives a
//! [`RemoteStore`], which exposes the keyed create / locked read /
//! update-and-unlock / delete protocol plus an equality query on indexed
//! fields. Contention and replica pulls are reported as outcome variants so
//! the repository can drive its retry loops explicitly; only genuine faults
//! are `Err`.
//!
//! # Architecture
//!
//! ```text
//! RemoteStore (trait)        - session entry protocol
//!     └── MemoryStore        - in-process reference store (one namespace)
//! MemoryCluster              - hands out named MemoryStore namespaces
//! ```

mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::key::StoreKey;
use crate::session::Session;

pub use memory::{DEFAULT_LOCK_TIMEOUT, MemoryCluster, MemoryStore, StoreOp};

/// Proof that the holder owns the exclusive lock on one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockTicket(pub u64);

/// Flags for a session read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadOptions {
    /// Report a missing entry as [`ReadOutcome::NotFound`] rather than a fault.
    pub object_may_not_exist: bool,
    /// Return the client-side cached object when it is still valid.
    pub return_cached_if_valid: bool,
    /// Pull the entry in from an attached remote replica if needed.
    pub read_remote: bool,
    /// Take the exclusive lock as part of the read.
    pub lock: bool,
}

/// Policy attached to an entry when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatePolicy {
    /// Sliding inactivity timeout enforced by the store.
    pub ttl: Duration,
    /// Notify the remote replica every time the entry is updated.
    pub notify_replica_on_update: bool,
}

/// Entry content returned by a successful read.
#[derive(Debug, Clone)]
pub enum ReadPayload {
    /// A still-valid deserialized copy from the client cache.
    Cached(Session),
    /// The serialized entry.
    Bytes(Vec<u8>),
}

impl ReadPayload {
    /// Turn the payload into a session, deserializing if needed.
    pub fn into_session(self) -> StoreResult<Session> {
        match self {
            Self::Cached(session) => Ok(session),
            Self::Bytes(bytes) => Ok(serde_json::from_slice(&bytes)?),
        }
    }
}

/// Result of [`RemoteStore::read`].
#[derive(Debug, Clone)]
pub enum ReadOutcome {
    /// The entry was read; `ticket` is set when the read took the lock.
    Found {
        payload: ReadPayload,
        ticket: Option<LockTicket>,
    },
    /// No entry under the key.
    NotFound,
    /// Another ticket holds the lock.
    Locked,
    /// The entry is being pulled in from a remote replica; retry later.
    Pending,
}

/// Result of [`RemoteStore::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Result of [`RemoteStore::update_and_unlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The entry was replaced and its lock released.
    Updated,
    /// Another ticket holds the lock; nothing was written.
    Locked,
}

/// A namespace in the remote cache tier.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Attach a remote replica store to this namespace.
    async fn attach_remote_store(&self, name: &str) -> StoreResult<()>;

    /// Create an entry; reports [`CreateOutcome::AlreadyExists`] if the key is live.
    async fn create(
        &self,
        key: &StoreKey,
        session: &Session,
        policy: &CreatePolicy,
    ) -> StoreResult<CreateOutcome>;

    /// Read an entry, optionally locking it.
    ///
    /// `ticket` is the lock the caller already holds on this key, if any;
    /// presenting it re-acquires the lock instead of reporting contention.
    async fn read(
        &self,
        key: &StoreKey,
        options: &ReadOptions,
        ticket: Option<LockTicket>,
    ) -> StoreResult<ReadOutcome>;

    /// Replace an entry and release its lock.
    ///
    /// Allowed when the entry is unlocked or locked by `ticket`.
    async fn update_and_unlock(
        &self,
        key: &StoreKey,
        ticket: Option<LockTicket>,
        session: &Session,
    ) -> StoreResult<UpdateOutcome>;

    /// Release a lock without writing.
    async fn release_lock(&self, key: &StoreKey, ticket: LockTicket) -> StoreResult<()>;

    /// Remove an entry. Removing a missing entry is not an error.
    async fn delete(&self, key: &StoreKey) -> StoreResult<()>;

    /// Plain unlocked read used to materialize query results.
    async fn get(&self, key: &StoreKey) -> StoreResult<Option<Session>>;

    /// Keys of all live entries whose index `field` equals `value`.
    async fn query_keys(&self, field: &str, value: &str) -> StoreResult<Vec<StoreKey>>;
}
