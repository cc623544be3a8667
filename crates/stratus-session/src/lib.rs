//! Lock-coordinated HTTP session repository over a shared remote cache tier.
//!
//! Sessions live in a [`RemoteStore`] namespace keyed by the SHA-256 digest of
//! their id. A read takes the entry's exclusive lock so that concurrent
//! requests for the same session (from this process or another) are
//! serialized; the matching save writes the session back and releases it.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stratus_session::{MemoryCluster, RepositoryConfig, SessionRepository};
//!
//! let cluster = MemoryCluster::new();
//! let config = RepositoryConfig::new().with_cache_name("web");
//! let repo = SessionRepository::open(cluster.namespace(&config.cache_name), config).await?;
//!
//! let mut session = repo.create_session();
//! session.set_attribute("cart", 3);
//! repo.save(&mut session).await?;
//!
//! let mut again = repo.find_by_id(session.id()).await?.expect("live session");
//! repo.save(&mut again).await?;
//! ```

mod accessor;
mod clock;
mod config;
mod error;
mod key;
mod principal;
mod repository;
mod session;
pub mod store;

pub use accessor::{AccessorHandle, AccessorTable};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    DEFAULT_CACHE_NAME, DEFAULT_LOCK_RETRY_INTERVAL, DEFAULT_MAX_INACTIVE_INTERVAL,
    DEFAULT_REMOTE_READ_PENDING_INTERVAL, DEFAULT_REMOTE_READ_PENDING_RETRIES, DEFAULT_USE_LOCKING,
    RepositoryConfig,
};
pub use error::{Error, Result, StoreError, StoreResult};
pub use key::StoreKey;
pub use principal::{
    DEFAULT_PRINCIPAL_POINTER, PRINCIPAL_NAME_INDEX_NAME, PrincipalResolver,
    SECURITY_CONTEXT_ATTRIBUTE,
};
pub use repository::SessionRepository;
pub use session::{PRINCIPAL_INDEX_FIELD, Session};
pub use store::{MemoryCluster, MemoryStore, RemoteStore, StoreOp};
