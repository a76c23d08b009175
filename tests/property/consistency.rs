//! Property tests for the registry/lease invariants `ignis-ha` guarantees,
//! driven the same way the rest of this codebase drives async property
//! tests: a sync `proptest!` body that opens its own Tokio runtime and
//! blocks on it.

use ignis_ha::core::manager::worker::Manager;
use ignis_ha::core::registry::memory::MemoryRegistryStore;
use ignis_ha::core::registry::{AuditAction, NodeStatus, NodeUpdate, RegistryStore, RegistryTransaction};
use proptest::prelude::*;
use std::sync::Arc;
use tokio::sync::mpsc;

fn spawn_manager(table: &MemoryRegistryStore, name: &str, session_id: &str) -> Manager {
    let (tx, _rx) = mpsc::channel(32);
    let store: Arc<dyn RegistryStore> = Arc::new(table.handle());
    Manager::new(store, name.to_string(), session_id.to_string(), "10.0.0.1".to_string(), 10051, tx)
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 50, max_shrink_iters: 500, ..Default::default() })]

    /// P1: at any commit boundary, at most one row is `active`, no matter
    /// which order the simulated nodes happen to tick in.
    #[test]
    fn p1_single_active_under_arbitrary_tick_order(
        node_count in 2usize..=5,
        tick_order in prop::collection::vec(0usize..5, 10..40),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let table = MemoryRegistryStore::new();
            let mut managers: Vec<Manager> = (0..node_count)
                .map(|i| spawn_manager(&table, &format!("node-{i}"), &format!("sess-{i}")))
                .collect();

            for raw_index in tick_order {
                let idx = raw_index % node_count;
                managers[idx].tick().await;
                table.advance_clock(1);

                let nodes = table.snapshot_nodes().await;
                let active_count = nodes.iter().filter(|n| n.status == NodeStatus::Active).count();
                assert!(active_count <= 1, "more than one active row: {nodes:?}");
            }
        });
    }
}

/// P4: a node whose `session_id` no longer matches its row deterministically
/// errors out on its next tick.
#[tokio::test]
async fn p4_session_takeover_forces_error() {
    let table = MemoryRegistryStore::new();
    let mut manager = spawn_manager(&table, "a", "sess-a");
    manager.tick().await;

    // Simulate another process taking over the same row.
    let node_id = manager.info.node_id.clone().unwrap();
    let mut txn = table.begin().await.unwrap();
    txn.update_node(
        &node_id,
        NodeUpdate { session_id: Some("sess-hijack".to_string()), ..Default::default() },
    )
    .await
    .unwrap();
    txn.commit().await.unwrap();

    let action = manager.tick().await;
    assert_eq!(action, ignis_ha::core::manager::worker::LoopAction::Exit);
    assert!(manager.info.error.as_ref().unwrap().contains("ownership"));
}

/// P6: a committed mutation produces exactly one audit entry; a rolled-back
/// one produces zero.
#[tokio::test]
async fn p6_audit_atomicity() {
    let table = MemoryRegistryStore::new();
    assert_eq!(table.committed_audit_log().len(), 0);

    let mut txn = table.begin().await.unwrap();
    txn.insert_node("nnnnnnnnnnnnnnnnnnnnnnnnn", "a", 0).await.unwrap();
    txn.audit(ignis_ha::core::registry::AuditEntry::node_added("nnnnnnnnnnnnnnnnnnnnnnnnn"));
    txn.commit().await.unwrap();
    assert_eq!(table.committed_audit_log().len(), 1);
    assert_eq!(table.committed_audit_log()[0].action, AuditAction::Add);

    let mut txn = table.begin().await.unwrap();
    txn.insert_node("mmmmmmmmmmmmmmmmmmmmmmmmm", "b", 0).await.unwrap();
    txn.audit(ignis_ha::core::registry::AuditEntry::node_added("mmmmmmmmmmmmmmmmmmmmmmmmm"));
    txn.rollback().await;
    assert_eq!(table.committed_audit_log().len(), 1, "rollback must not add an audit entry");
}

/// P7: `GetNodes`' JSON round-trips the row contents at the read's snapshot.
#[tokio::test]
async fn p7_get_nodes_round_trip() {
    let table = MemoryRegistryStore::new();
    let mut manager = spawn_manager(&table, "", "sess-a");
    manager.tick().await;

    let json = manager.get_nodes_json().await.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    let entries = parsed.as_array().unwrap();
    assert_eq!(entries.len(), 1);

    let nodes = table.snapshot_nodes().await;
    let node = &nodes[0];
    let entry = &entries[0];
    assert_eq!(entry["nodeid"], serde_json::json!(node.node_id));
    assert_eq!(entry["name"], serde_json::json!(node.name));
    assert_eq!(entry["status"], serde_json::json!(node.status as i32));
    assert_eq!(entry["lastaccess"], serde_json::json!(node.lastaccess));
    let db_time = entry["db_timestamp"].as_i64().unwrap();
    assert_eq!(entry["lastaccess_age"], serde_json::json!(db_time - node.lastaccess));
}
