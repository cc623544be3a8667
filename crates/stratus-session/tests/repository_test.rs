//! Integration tests for SessionRepository over the in-memory cluster.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use stratus_session::{
    AccessorTable, ManualClock, MemoryCluster, MemoryStore, PRINCIPAL_NAME_INDEX_NAME,
    RepositoryConfig, SECURITY_CONTEXT_ATTRIBUTE, SessionRepository, StoreOp,
};
use tokio_util::sync::CancellationToken;

struct Harness {
    clock: ManualClock,
    cluster: MemoryCluster,
}

impl Harness {
    fn new() -> Self {
        let clock = ManualClock::default();
        let cluster = MemoryCluster::with_clock(Arc::new(clock.clone()));
        Self { clock, cluster }
    }

    fn store(&self) -> Arc<MemoryStore> {
        self.cluster.namespace("sessions")
    }

    /// A repository instance with its own accessor table, as a separate
    /// process would have.
    async fn instance(&self, config: RepositoryConfig) -> SessionRepository {
        SessionRepository::open(self.store(), config)
            .await
            .expect("open repository")
            .with_clock(Arc::new(self.clock.clone()))
    }
}

#[tokio::test]
async fn test_unknown_id_reads_absent() {
    let h = Harness::new();
    let repo = h.instance(RepositoryConfig::new()).await;

    assert!(repo.find_by_id("never-written").await.unwrap().is_none());
    assert!(repo.find_by_id("").await.unwrap().is_none());
    repo.delete_by_id("").await;
    repo.delete_by_id("never-written").await;
}

#[tokio::test]
async fn test_cart_scenario_expires_after_timeout() {
    let h = Harness::new();
    let config = RepositoryConfig::new().with_max_inactive_interval(Duration::from_secs(5 * 60));
    let repo = h.instance(config).await;

    let mut session = repo.create_session();
    session.set_attribute("cart", 3);
    assert!(session.is_new());
    repo.save(&mut session).await.unwrap();

    let mut found = repo.find_by_id(session.id()).await.unwrap().unwrap();
    assert_eq!(found.attribute_as::<i32>("cart"), Some(3));
    assert_eq!(found.attributes(), session.attributes());
    assert!(!found.is_new());
    repo.save(&mut found).await.unwrap();

    h.clock.advance(Duration::from_secs(6 * 60));
    assert!(repo.find_by_id(session.id()).await.unwrap().is_none());
    assert!(repo.find_by_id(session.id()).await.unwrap().is_none());
    assert!(!h.store().contains(session.id()));
}

#[tokio::test]
async fn test_rotated_ids_are_cleaned_up() {
    let h = Harness::new();
    let repo = h.instance(RepositoryConfig::new()).await;

    let mut session = repo.create_session();
    session.set_attribute("step", 1);
    repo.save(&mut session).await.unwrap();
    let first = session.id().to_string();

    let second = session.change_id().to_string();
    let third = session.change_id().to_string();
    session.set_attribute("step", 2);
    repo.save(&mut session).await.unwrap();

    assert_ne!(first, third);
    assert!(repo.find_by_id(&first).await.unwrap().is_none());
    assert!(repo.find_by_id(&second).await.unwrap().is_none());
    let found = repo.find_by_id(&third).await.unwrap().unwrap();
    assert_eq!(found.attribute_as::<i32>("step"), Some(2));
    assert_eq!(h.store().len(), 1);
}

#[tokio::test]
async fn test_find_by_principal_index() {
    let h = Harness::new();
    let repo = h.instance(RepositoryConfig::new()).await;

    let mut alice = repo.create_session();
    alice.set_attribute(PRINCIPAL_NAME_INDEX_NAME, "alice");
    repo.save(&mut alice).await.unwrap();

    let mut alice_too = repo.create_session();
    alice_too.set_attribute(
        SECURITY_CONTEXT_ATTRIBUTE,
        json!({"authentication": {"name": "alice"}}),
    );
    repo.save(&mut alice_too).await.unwrap();

    let mut bob = repo.create_session();
    bob.set_attribute(PRINCIPAL_NAME_INDEX_NAME, "bob");
    repo.save(&mut bob).await.unwrap();

    let mut anonymous = repo.create_session();
    repo.save(&mut anonymous).await.unwrap();

    let found = repo.find_by_index(PRINCIPAL_NAME_INDEX_NAME, "alice").await;
    assert_eq!(found.len(), 2);
    assert!(found.contains_key(alice.id()));
    assert!(found.contains_key(alice_too.id()));

    assert!(repo.find_by_index("colour", "alice").await.is_empty());
    assert!(repo.find_by_index(PRINCIPAL_NAME_INDEX_NAME, "").await.is_empty());
}

#[tokio::test]
async fn test_find_by_index_follows_principal_changes() {
    let h = Harness::new();
    let repo = h.instance(RepositoryConfig::new()).await;

    let mut session = repo.create_session();
    session.set_attribute(PRINCIPAL_NAME_INDEX_NAME, "alice");
    repo.save(&mut session).await.unwrap();

    let mut found = repo.find_by_id(session.id()).await.unwrap().unwrap();
    found.remove_attribute(PRINCIPAL_NAME_INDEX_NAME);
    repo.save(&mut found).await.unwrap();

    assert!(repo.find_by_index(PRINCIPAL_NAME_INDEX_NAME, "alice").await.is_empty());
}

#[tokio::test]
async fn test_find_by_index_skips_expired_sessions() {
    let h = Harness::new();
    let repo = h.instance(RepositoryConfig::new()).await;

    let mut session = repo.create_session();
    session.set_attribute(PRINCIPAL_NAME_INDEX_NAME, "alice");
    repo.save(&mut session).await.unwrap();

    h.clock.advance(Duration::from_secs(31 * 60));
    assert!(repo.find_by_index(PRINCIPAL_NAME_INDEX_NAME, "alice").await.is_empty());
}

#[tokio::test]
async fn test_find_by_index_survives_faults() {
    let h = Harness::new();
    let repo = h.instance(RepositoryConfig::new()).await;

    let mut session = repo.create_session();
    session.set_attribute(PRINCIPAL_NAME_INDEX_NAME, "alice");
    repo.save(&mut session).await.unwrap();

    h.store().inject_fault(StoreOp::Query, 1);
    assert!(repo.find_by_index(PRINCIPAL_NAME_INDEX_NAME, "alice").await.is_empty());

    h.store().inject_fault(StoreOp::Get, 1);
    assert!(repo.find_by_index(PRINCIPAL_NAME_INDEX_NAME, "alice").await.is_empty());

    assert_eq!(repo.find_by_index(PRINCIPAL_NAME_INDEX_NAME, "alice").await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_converge_on_one_accessor() {
    let h = Harness::new();
    let config = RepositoryConfig::new().with_lock_retry_interval(Duration::from_millis(1));
    let repo = h.instance(config).await;
    let store = h.store();

    for _ in 0..20 {
        let mut session = repo.create_session();
        session.set_attribute("cart", 1);
        repo.save(&mut session).await.unwrap();
        let id = session.id().to_string();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let repo = repo.clone();
            let id = id.clone();
            tasks.spawn(async move {
                tokio::time::timeout(Duration::from_secs(5), repo.find_by_id(&id)).await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            let found = joined
                .unwrap()
                .expect("concurrent reader stuck behind its own process")
                .unwrap();
            assert!(found.is_some());
        }

        let handle = repo.accessors().get(&id).unwrap();
        assert!(handle.ticket().is_some());
        assert!(store.is_locked(&id));

        repo.save(&mut session).await.unwrap();
        assert!(!store.is_locked(&id));
    }
    assert!(repo.accessors().is_empty());

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let repo = repo.clone();
        tasks.spawn(async move { repo.find_by_id("fresh").await });
    }
    while let Some(joined) = tasks.join_next().await {
        assert!(joined.unwrap().unwrap().is_none());
    }
    assert!(repo.accessors().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_waiting_reader_adopts_handle_registered_meanwhile() {
    let h = Harness::new();
    let config = RepositoryConfig::new().with_lock_retry_interval(Duration::from_millis(2));
    let owner = h.instance(config.clone()).await;
    let waiter = h.instance(config).await;

    let mut session = owner.create_session();
    owner.save(&mut session).await.unwrap();
    let id = session.id().to_string();
    assert!(owner.find_by_id(&id).await.unwrap().is_some());

    let reader = {
        let waiter = waiter.clone();
        let id = id.clone();
        tokio::spawn(async move { waiter.find_by_id(&id).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!reader.is_finished());

    let held = owner.accessors().get(&id).unwrap();
    waiter.accessors().insert(&id, Arc::clone(&held));

    let found = tokio::time::timeout(Duration::from_secs(1), reader)
        .await
        .expect("waiting reader did not pick up the registered handle")
        .unwrap()
        .unwrap();
    assert!(found.is_some());
    assert!(Arc::ptr_eq(&held, &waiter.accessors().get(&id).unwrap()));
}

#[tokio::test]
async fn test_shared_table_adopts_existing_lock() {
    let h = Harness::new();
    let first = h.instance(RepositoryConfig::new()).await;
    let second = h
        .instance(RepositoryConfig::new())
        .await
        .with_accessor_table(first.accessors().clone());

    let mut session = first.create_session();
    first.save(&mut session).await.unwrap();

    assert!(first.find_by_id(session.id()).await.unwrap().is_some());
    let found = tokio::time::timeout(Duration::from_secs(1), second.find_by_id(session.id()))
        .await
        .expect("read should not block on a lock held by the same table");
    assert!(found.unwrap().is_some());
}

#[tokio::test]
async fn test_lock_blocks_other_instance_until_save() {
    let h = Harness::new();
    let config = RepositoryConfig::new().with_lock_retry_interval(Duration::from_millis(5));
    let owner = h.instance(config.clone()).await;
    let other = h.instance(config).await;

    let mut session = owner.create_session();
    session.set_attribute("cart", 1);
    owner.save(&mut session).await.unwrap();

    let mut held = owner.find_by_id(session.id()).await.unwrap().unwrap();
    assert!(h.store().is_locked(session.id()));

    let id = session.id().to_string();
    let waiter = tokio::spawn(async move { other.find_by_id(&id).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    held.set_attribute("cart", 2);
    owner.save(&mut held).await.unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waiter should finish once the lock is released")
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(seen.attribute_as::<i32>("cart"), Some(2));
}

#[tokio::test]
async fn test_shutdown_interrupts_lock_wait() {
    let h = Harness::new();
    let owner = h.instance(RepositoryConfig::new()).await;
    let token = CancellationToken::new();
    let other = h
        .instance(RepositoryConfig::new())
        .await
        .with_shutdown(token.clone());

    let mut session = owner.create_session();
    owner.save(&mut session).await.unwrap();
    owner.find_by_id(session.id()).await.unwrap();

    let id = session.id().to_string();
    let waiter = tokio::spawn(async move { other.find_by_id(&id).await });
    tokio::time::sleep(Duration::from_millis(30)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(stratus_session::Error::Interrupted(_))));
}

#[tokio::test]
async fn test_locking_disabled_is_last_write_wins() {
    let h = Harness::new();
    let config = RepositoryConfig::new().with_locking(false);
    let a = h.instance(config.clone()).await;
    let b = h.instance(config).await;

    let mut session = a.create_session();
    a.save(&mut session).await.unwrap();

    let mut from_a = a.find_by_id(session.id()).await.unwrap().unwrap();
    let mut from_b = b.find_by_id(session.id()).await.unwrap().unwrap();
    assert!(!h.store().is_locked(session.id()));

    from_a.set_attribute("writer", "a");
    from_b.set_attribute("writer", "b");
    a.save(&mut from_a).await.unwrap();
    b.save(&mut from_b).await.unwrap();

    let last = a.find_by_id(session.id()).await.unwrap().unwrap();
    assert_eq!(last.attribute_as::<String>("writer").as_deref(), Some("b"));
    assert!(a.accessors().is_empty());
    assert!(b.accessors().is_empty());
}

#[tokio::test]
async fn test_remote_store_configuration() {
    let h = Harness::new();
    let config = RepositoryConfig::new()
        .with_remote_store("dc-west")
        .with_remote_read_pending(Duration::from_millis(1), 50);
    let repo = h.instance(config).await;
    assert_eq!(h.store().remote_stores(), vec!["dc-west".to_string()]);

    let mut session = repo.create_session();
    repo.save(&mut session).await.unwrap();

    h.store().simulate_replica_pull(session.id(), 5);
    let mut found = repo.find_by_id(session.id()).await.unwrap().unwrap();
    repo.save(&mut found).await.unwrap();
    assert_eq!(h.store().replica_notifications(), 1);
}

#[tokio::test]
async fn test_store_faults_degrade_quietly() {
    let h = Harness::new();
    let repo = h.instance(RepositoryConfig::new()).await;
    let store = h.store();

    let mut session = repo.create_session();
    store.inject_fault(StoreOp::Create, 1);
    repo.save(&mut session).await.unwrap();
    assert!(!store.contains(session.id()));

    let mut session = repo.create_session();
    repo.save(&mut session).await.unwrap();

    store.inject_fault(StoreOp::Read, 1);
    assert!(repo.find_by_id(session.id()).await.unwrap().is_none());

    store.inject_fault(StoreOp::Delete, 1);
    repo.delete_by_id(session.id()).await;
    assert!(store.contains(session.id()));

    repo.delete_by_id(session.id()).await;
    assert!(!store.contains(session.id()));
}

#[tokio::test]
async fn test_corrupt_entry_releases_lock_for_others() {
    let h = Harness::new();
    let repo = h.instance(RepositoryConfig::new()).await;
    let other = h.instance(RepositoryConfig::new()).await;

    let mut session = repo.create_session();
    repo.save(&mut session).await.unwrap();
    h.store().set_client_cache(false);
    h.store().corrupt(session.id());

    assert!(repo.find_by_id(session.id()).await.unwrap().is_none());
    assert!(!h.store().is_locked(session.id()));

    let result = tokio::time::timeout(Duration::from_secs(1), other.find_by_id(session.id()))
        .await
        .expect("corrupt entry must not stay locked");
    assert!(result.unwrap().is_none());
}

#[tokio::test]
async fn test_table_can_be_injected_up_front() {
    let h = Harness::new();
    let table = AccessorTable::new();
    let repo = h
        .instance(RepositoryConfig::new())
        .await
        .with_accessor_table(table.clone());

    let mut session = repo.create_session();
    repo.save(&mut session).await.unwrap();
    repo.find_by_id(session.id()).await.unwrap();
    assert!(table.contains(session.id()));

    repo.delete_by_id(session.id()).await;
    assert!(table.is_empty());
}
