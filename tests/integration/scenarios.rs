//! End-to-end scenarios driving [`Manager`] directly against the in-memory
//! registry, covering the seven concrete scenarios.

use ignis_ha::core::manager::state::HaStatus;
use ignis_ha::core::manager::worker::{LoopAction, Manager, TICK_PERIOD};
use ignis_ha::core::registry::memory::MemoryRegistryStore;
use ignis_ha::core::registry::{NodeStatus, RegistryStore};
use std::sync::Arc;
use tokio::sync::mpsc;

fn new_manager(
    table: &MemoryRegistryStore,
    name: &str,
    session_id: &str,
    address: &str,
    port: u16,
) -> (Manager, mpsc::Receiver<ignis_ha::core::ipc::ManagerFrame>) {
    let (tx, rx) = mpsc::channel(32);
    let store: Arc<dyn RegistryStore> = Arc::new(table.handle());
    let manager = Manager::new(store, name.to_string(), session_id.to_string(), address.to_string(), port, tx);
    (manager, rx)
}

#[tokio::test]
async fn cold_standalone_start() {
    let table = MemoryRegistryStore::new();
    let (mut manager, mut rx) = new_manager(&table, "", "sess-a", "127.0.0.1", 10051);

    let action = manager.tick().await;
    assert_eq!(action, LoopAction::Continue);
    assert_eq!(manager.info.ha_status, HaStatus::Active);

    let nodes = table.snapshot_nodes().await;
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].name, "");
    assert_eq!(nodes[0].status, NodeStatus::Active);
    assert_eq!(nodes[0].lastaccess, table.db_time());

    let frame = rx.try_recv().expect("expected StatusUpdate");
    match frame {
        ignis_ha::core::ipc::ManagerFrame::StatusUpdate { status, failover_delay, .. } => {
            assert_eq!(status, NodeStatus::Active);
            assert_eq!(failover_delay, 60);
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn cluster_bring_up_two_nodes() {
    let table = MemoryRegistryStore::new();
    let (mut a, _rx_a) = new_manager(&table, "a", "sess-a", "10.0.0.1", 10051);
    let (mut b, _rx_b) = new_manager(&table, "b", "sess-b", "10.0.0.2", 10051);

    a.tick().await;
    assert_eq!(a.info.ha_status, HaStatus::Active);

    b.tick().await;
    assert_eq!(b.info.ha_status, HaStatus::Standby);

    let nodes = table.snapshot_nodes().await;
    assert_eq!(nodes.len(), 2);
    let a_row = nodes.iter().find(|n| n.name == "a").unwrap();
    let b_row = nodes.iter().find(|n| n.name == "b").unwrap();
    assert_eq!(a_row.status, NodeStatus::Active);
    assert_eq!(b_row.status, NodeStatus::Standby);
}

#[tokio::test]
async fn failover_after_active_peer_stalls() {
    let table = MemoryRegistryStore::new();
    let (mut a, _rx_a) = new_manager(&table, "a", "sess-a", "10.0.0.1", 10051);
    let (mut b, _rx_b) = new_manager(&table, "b", "sess-b", "10.0.0.2", 10051);

    a.tick().await;
    b.tick().await;
    b.set_failover_delay(10).await.unwrap();
    a.info.failover_delay = 10;

    // A stops ticking (simulated connectivity loss); B keeps ticking and
    // advancing the clock by one tick period (5s) each time.
    // threshold = failover_delay/P + 1 = 10/5 + 1 = 3
    for _ in 0..4 {
        table.advance_clock(5);
        b.tick().await;
    }

    assert_eq!(b.info.ha_status, HaStatus::Active);
    let nodes = table.snapshot_nodes().await;
    let a_row = nodes.iter().find(|n| n.name == "a").unwrap();
    assert_eq!(a_row.status, NodeStatus::Unavailable);
}

#[tokio::test]
async fn duplicate_name_rejected() {
    let table = MemoryRegistryStore::new();
    let (mut a, _rx_a) = new_manager(&table, "a", "sess-a", "10.0.0.1", 10051);
    a.tick().await;
    assert_eq!(a.info.ha_status, HaStatus::Active);

    let (mut a2, _rx_a2) = new_manager(&table, "a", "sess-a2", "10.0.0.3", 10051);
    let action = a2.tick().await;
    assert_eq!(action, LoopAction::Exit);
    assert_eq!(a2.info.ha_status, HaStatus::Error);
    assert!(a2.info.error.as_ref().unwrap().contains("duplicate"));

    // No extra row was created for the rejected registration attempt.
    let nodes = table.snapshot_nodes().await;
    assert_eq!(nodes.len(), 1);
}

#[tokio::test]
async fn operator_removes_a_stopped_node() {
    let table = MemoryRegistryStore::new();
    let (mut a, _rx_a) = new_manager(&table, "a", "sess-a", "10.0.0.1", 10051);
    a.tick().await;

    let (mut b, _rx_b) = new_manager(&table, "b", "sess-b", "10.0.0.2", 10051);
    b.tick().await;
    b.finalize_stop().await.unwrap();

    let nodes = table.snapshot_nodes().await;
    let index_of_b = nodes.iter().position(|n| n.name == "b").unwrap() as u32 + 1;

    a.remove_node(index_of_b).await.unwrap();
    let nodes = table.snapshot_nodes().await;
    assert!(nodes.iter().all(|n| n.name != "b"));

    let audit = table.committed_audit_log();
    assert!(audit.iter().any(|e| e.action == ignis_ha::core::registry::AuditAction::Delete));
}

#[tokio::test]
async fn operator_cannot_remove_active_node() {
    let table = MemoryRegistryStore::new();
    let (mut a, _rx_a) = new_manager(&table, "a", "sess-a", "10.0.0.1", 10051);
    a.tick().await;

    let err = a.remove_node(1).await.unwrap_err();
    assert!(err.to_string().contains("node is active"));

    let nodes = table.snapshot_nodes().await;
    assert_eq!(nodes.len(), 1);
}

#[tokio::test]
async fn failover_delay_change_takes_effect() {
    let table = MemoryRegistryStore::new();
    let (mut a, _rx_a) = new_manager(&table, "a", "sess-a", "10.0.0.1", 10051);
    let (mut b, _rx_b) = new_manager(&table, "b", "sess-b", "10.0.0.2", 10051);
    a.tick().await;
    b.tick().await;

    a.set_failover_delay(30).await.unwrap();
    assert_eq!(a.info.failover_delay, 30);

    // B's row (lastaccess = 0) is 25s stale: still live under a 30s delay.
    table.advance_clock(25);
    a.tick().await;
    let nodes = table.snapshot_nodes().await;
    let b_row = nodes.iter().find(|n| n.name == "b").unwrap();
    assert_eq!(b_row.status, NodeStatus::Standby);

    // Six seconds later B is 31s stale: the active node marks it unavailable.
    table.advance_clock(6);
    a.tick().await;
    let nodes = table.snapshot_nodes().await;
    let b_row = nodes.iter().find(|n| n.name == "b").unwrap();
    assert_eq!(b_row.status, NodeStatus::Unavailable);
}

#[tokio::test]
async fn restarted_standby_delays_before_its_first_liveness_tick() {
    let table = MemoryRegistryStore::new();
    let (mut a, _rx_a) = new_manager(&table, "a", "sess-a", "10.0.0.1", 10051);
    let (mut b, _rx_b) = new_manager(&table, "b", "sess-b", "10.0.0.2", 10051);

    a.tick().await;
    b.tick().await;
    assert_eq!(b.info.ha_status, HaStatus::Standby);

    // `b` restarts cleanly and re-registers against its existing row under a
    // fresh session id, the way a just-demoted/just-restarted process does.
    let (mut b2, _rx_b2) = new_manager(&table, "b", "sess-b-restarted", "10.0.0.2", 10051);
    b2.tick().await;
    assert_eq!(b2.info.ha_status, HaStatus::Standby);

    // The tick right after registering as standby is doubled, so a node
    // that just restarted doesn't immediately race to judge the active
    // peer's liveness off a cold `offline_ticks_active` counter.
    assert_eq!(b2.next_tick_delay(), TICK_PERIOD * 2);

    // A single missed heartbeat from `a` within that doubled window must not
    // be enough to promote `b2`: offline_ticks_active only reaches 0 (first
    // observation), far under the threshold of failover_delay/P + 1 = 13.
    table.advance_clock(5);
    b2.tick().await;
    assert_eq!(b2.info.ha_status, HaStatus::Standby);
    let nodes = table.snapshot_nodes().await;
    let a_row = nodes.iter().find(|n| n.name == "a").unwrap();
    assert_eq!(a_row.status, NodeStatus::Active);
}
