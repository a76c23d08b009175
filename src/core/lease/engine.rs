// src/core/lease/engine.rs

//! Pure admission and liveness rules. Every function here takes an
//! explicit snapshot of the node table plus the database clock and returns a
//! decision; none of them touch the registry, a clock, or a socket.

use crate::core::registry::{Node, NodeStatus};
use thiserror::Error;

/// A fatal admission failure.
/// These always short-circuit the current tick — the caller wraps this in
/// `HaError::Fatal`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("cannot change mode to standalone while HA node \"{name}\" is {status}")]
    StandaloneSurvivor { name: String, status: NodeStatus },

    #[error("found {status} duplicate \"{name}\" node")]
    Duplicate { name: String, status: NodeStatus },
}

/// Whether this node should start `active` or `standby`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Active,
    Standby,
}

/// Standalone admission (`this.name == ""`): succeeds iff no row with a
/// non-empty name is live. A standalone node is always the sole role holder,
/// so admission never returns a `Role` — only pass/fail.
pub fn admit_standalone(nodes: &[Node], db_time: i64, failover_delay: i64) -> Result<(), AdmissionError> {
    for n in nodes {
        if !n.name.is_empty() && n.is_live(db_time, failover_delay) {
            return Err(AdmissionError::StandaloneSurvivor {
                name: n.name.clone(),
                status: n.status,
            });
        }
    }
    Ok(())
}

/// Cluster admission (`this.name != ""`) for a node not yet present in
/// `nodes` (the registration path) or present under `self_node_id`. Returns
/// the role the caller should start in.
pub fn admit_cluster(
    nodes: &[Node],
    self_node_id: Option<&str>,
    self_name: &str,
    db_time: i64,
    failover_delay: i64,
) -> Result<Role, AdmissionError> {
    for n in nodes {
        if Some(n.node_id.as_str()) == self_node_id {
            continue;
        }
        if n.name.is_empty() && n.is_live(db_time, failover_delay) {
            return Err(AdmissionError::StandaloneSurvivor {
                name: String::new(),
                status: n.status,
            });
        }
        if n.name == self_name && n.is_live(db_time, failover_delay) {
            return Err(AdmissionError::Duplicate {
                name: n.name.clone(),
                status: n.status,
            });
        }
    }
    let any_live_peer = nodes
        .iter()
        .any(|n| Some(n.node_id.as_str()) != self_node_id && n.is_live(db_time, failover_delay));
    Ok(if any_live_peer { Role::Standby } else { Role::Active })
}

/// The result of a standby's active-peer failure check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivePeerOutcome {
    /// No change: the active peer is advancing normally, or was just observed
    /// for the first time.
    Healthy { offline_ticks_active: u32 },
    /// This node should self-promote to `active`. `demote_node_id` is set
    /// when a stalled active peer must be marked `unavailable` in the same
    /// transaction as the promotion.
    Promote { demote_node_id: Option<String> },
}

/// Run by a standby node each tick: active-peer failure detection.
///
/// `prev_lastaccess_active` and `prev_offline_ticks` are the `Info` fields
/// carried over from the previous tick; `tick_period` is `P` in seconds.
pub fn check_active_peer(
    nodes: &[Node],
    prev_lastaccess_active: Option<i64>,
    prev_offline_ticks: u32,
    failover_delay: i64,
    tick_period: i64,
) -> ActivePeerOutcome {
    let active = nodes.iter().find(|n| n.status == NodeStatus::Active);
    let Some(active) = active else {
        return ActivePeerOutcome::Promote { demote_node_id: None };
    };

    let offline_ticks_active = match prev_lastaccess_active {
        Some(prev) if prev == active.lastaccess => prev_offline_ticks + 1,
        _ => 0,
    };

    let threshold = (failover_delay / tick_period.max(1)) as u32 + 1;
    if offline_ticks_active > threshold {
        ActivePeerOutcome::Promote {
            demote_node_id: Some(active.node_id.clone()),
        }
    } else {
        ActivePeerOutcome::Healthy { offline_ticks_active }
    }
}

/// Run by the active node each tick: standby liveness enforcement. Every
/// `standby` row whose lease has expired is marked `unavailable`. Returns
/// the `node_id`s that should be updated this tick.
pub fn mark_stale_standbys(nodes: &[Node], db_time: i64, failover_delay: i64) -> Vec<String> {
    nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Standby && db_time >= n.lastaccess + failover_delay)
        .map(|n| n.node_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, name: &str, status: NodeStatus, lastaccess: i64) -> Node {
        Node {
            node_id: id.to_string(),
            name: name.to_string(),
            status,
            lastaccess,
            address: String::new(),
            port: 0,
            session_id: String::new(),
        }
    }

    #[test]
    fn standalone_admission_rejects_live_cluster_survivor() {
        let nodes = vec![node("n1", "a", NodeStatus::Active, 100)];
        let err = admit_standalone(&nodes, 110, 60).unwrap_err();
        assert!(matches!(err, AdmissionError::StandaloneSurvivor { .. }));
    }

    #[test]
    fn standalone_admission_ignores_expired_survivor() {
        let nodes = vec![node("n1", "a", NodeStatus::Active, 0)];
        assert!(admit_standalone(&nodes, 1000, 60).is_ok());
    }

    #[test]
    fn cluster_admission_first_node_becomes_active() {
        let nodes = vec![];
        let role = admit_cluster(&nodes, None, "a", 0, 60).unwrap();
        assert_eq!(role, Role::Active);
    }

    #[test]
    fn cluster_admission_second_node_becomes_standby() {
        let nodes = vec![node("n1", "a", NodeStatus::Active, 100)];
        let role = admit_cluster(&nodes, None, "b", 110, 60).unwrap();
        assert_eq!(role, Role::Standby);
    }

    #[test]
    fn cluster_admission_rejects_standalone_survivor() {
        let nodes = vec![node("n1", "", NodeStatus::Active, 100)];
        let err = admit_cluster(&nodes, None, "a", 110, 60).unwrap_err();
        assert!(matches!(err, AdmissionError::StandaloneSurvivor { .. }));
    }

    #[test]
    fn cluster_admission_rejects_duplicate_name() {
        let nodes = vec![node("n1", "a", NodeStatus::Standby, 100)];
        let err = admit_cluster(&nodes, None, "a", 110, 60).unwrap_err();
        assert!(matches!(err, AdmissionError::Duplicate { .. }));
    }

    #[test]
    fn cluster_admission_becomes_standby_behind_live_non_active_peer() {
        // The active row has gone stale (lastaccess=0, db_time=1000) but a
        // live standby of a different name is still present and has not yet
        // promoted itself. A newly-registering node must still defer to it.
        let nodes = vec![
            node("n1", "a", NodeStatus::Active, 0),
            node("n2", "b", NodeStatus::Standby, 990),
        ];
        let role = admit_cluster(&nodes, None, "c", 1000, 60).unwrap();
        assert_eq!(role, Role::Standby);
    }

    #[test]
    fn cluster_admission_ignores_self_row() {
        let nodes = vec![node("n1", "a", NodeStatus::Active, 100)];
        let role = admit_cluster(&nodes, Some("n1"), "a", 110, 60).unwrap();
        assert_eq!(role, Role::Active);
    }

    #[test]
    fn active_peer_promotes_when_absent() {
        let nodes = vec![node("n1", "b", NodeStatus::Standby, 100)];
        let outcome = check_active_peer(&nodes, None, 0, 10, 5);
        assert_eq!(outcome, ActivePeerOutcome::Promote { demote_node_id: None });
    }

    #[test]
    fn active_peer_resets_counter_on_progress() {
        let nodes = vec![node("n1", "a", NodeStatus::Active, 200)];
        let outcome = check_active_peer(&nodes, Some(100), 2, 10, 5);
        assert_eq!(
            outcome,
            ActivePeerOutcome::Healthy { offline_ticks_active: 0 }
        );
    }

    #[test]
    fn active_peer_increments_when_stalled() {
        let nodes = vec![node("n1", "a", NodeStatus::Active, 100)];
        let outcome = check_active_peer(&nodes, Some(100), 1, 10, 5);
        assert_eq!(
            outcome,
            ActivePeerOutcome::Healthy { offline_ticks_active: 2 }
        );
    }

    #[test]
    fn active_peer_promotes_past_threshold() {
        // failover_delay=10, tick_period=5 -> threshold = 10/5 + 1 = 3
        let nodes = vec![node("n1", "a", NodeStatus::Active, 100)];
        let outcome = check_active_peer(&nodes, Some(100), 3, 10, 5);
        assert_eq!(
            outcome,
            ActivePeerOutcome::Promote {
                demote_node_id: Some("n1".to_string())
            }
        );
    }

    #[test]
    fn stale_standbys_marked_unavailable() {
        let nodes = vec![
            node("n1", "a", NodeStatus::Active, 100),
            node("n2", "b", NodeStatus::Standby, 10),
            node("n3", "c", NodeStatus::Standby, 90),
        ];
        let stale = mark_stale_standbys(&nodes, 100, 60);
        assert_eq!(stale, vec!["n2".to_string()]);
    }
}
