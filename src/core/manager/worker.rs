// src/core/manager/worker.rs

//! The HA Manager Loop: owns the tick, interleaves registry
//! transactions with IPC message reception, and services administrative
//! requests inline between ticks.

use super::state::{DbStatus, HaStatus, Info};
use crate::core::errors::HaError;
use crate::core::ipc::ManagerFrame;
use crate::core::lease::{self, AdmissionError, ActivePeerOutcome, Role};
use crate::core::registry::{AuditEntry, NodeStatus, NodeUpdate, RegistryStore, generate_id};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

/// Control loop period, `P`.
pub const TICK_PERIOD: Duration = Duration::from_secs(5);
/// Accelerated tick period used while the database is unreachable.
const OFFLINE_TICK_PERIOD: Duration = Duration::from_secs(1);

/// What the loop should do after the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    /// `Pause` was received: stop ticking, keep refreshing `lastaccess`.
    Paused,
    /// `Stop` was received or a fatal error occurred: exit after cleanup.
    Exit,
}

pub struct Manager {
    pub store: Arc<dyn RegistryStore>,
    pub info: Info,
    pub address: String,
    pub port: u16,
    pub outbound: mpsc::Sender<ManagerFrame>,
    tick_period: Duration,
    paused: bool,
    first_tick: bool,
}

impl Manager {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        name: String,
        session_id: String,
        address: String,
        port: u16,
        outbound: mpsc::Sender<ManagerFrame>,
    ) -> Self {
        Self::with_tick_period(store, name, session_id, address, port, outbound, TICK_PERIOD)
    }

    /// As [`Manager::new`], but with an explicit tick period instead of the
    /// default `P` — the knob `HaManagerConfig::tick_period` feeds, and tests
    /// use to exercise multi-tick behavior without a five-second sleep.
    pub fn with_tick_period(
        store: Arc<dyn RegistryStore>,
        name: String,
        session_id: String,
        address: String,
        port: u16,
        outbound: mpsc::Sender<ManagerFrame>,
        tick_period: Duration,
    ) -> Self {
        Self {
            store,
            info: Info::new(name, session_id),
            address,
            port,
            outbound,
            tick_period,
            paused: false,
            first_tick: true,
        }
    }

    pub fn tick_period(&self) -> Duration {
        self.tick_period
    }

    /// The interval to wait before the next tick, accounting for offline
    /// acceleration and the doubled first standby tick.
    pub fn next_tick_delay(&self) -> Duration {
        if self.info.db_status != DbStatus::Ok {
            return OFFLINE_TICK_PERIOD;
        }
        if self.first_tick && self.info.ha_status == HaStatus::Standby {
            return self.tick_period * 2;
        }
        self.tick_period
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Runs one full tick: registration or liveness check, own-row refresh,
    /// commit, and the resulting notifications. Returns what the loop should
    /// do next.
    pub async fn tick(&mut self) -> LoopAction {
        if self.info.error.is_some() {
            return LoopAction::Exit;
        }

        let was_registering = self.info.node_id.is_none();
        let result = if was_registering {
            self.register().await
        } else {
            self.run_liveness_tick().await
        };

        // `first_tick` gates the delay *before* this node's first liveness
        // check, not its registration tick — clearing it here too would make
        // the doubled standby interval in `next_tick_delay` unreachable,
        // since registration is what sets `ha_status` to `Standby` in the
        // first place.
        if !was_registering {
            self.first_tick = false;
        }

        match result {
            Ok(changed) => {
                self.info.db_status = DbStatus::Ok;
                if changed {
                    self.send_status_update().await;
                }
                self.send_heartbeat().await;
                LoopAction::Continue
            }
            Err(HaError::Offline(reason)) => {
                warn!("registry offline, retrying next tick: {reason}");
                self.info.db_status = DbStatus::Down;
                LoopAction::Continue
            }
            Err(e) => {
                self.info.db_status = DbStatus::Fail;
                self.info.set_error(e.to_string());
                self.send_status_update().await;
                LoopAction::Exit
            }
        }
    }

    /// The slow loop run while paused: refreshes `lastaccess` only.
    pub async fn refresh_lastaccess(&mut self) -> Result<(), HaError> {
        let Some(node_id) = self.info.node_id.clone() else {
            return Ok(());
        };
        let mut txn = self.store.begin().await?;
        let db_time = txn.read_db_time().await?;
        txn.update_node(
            &node_id,
            NodeUpdate {
                lastaccess: Some(db_time),
                ..Default::default()
            },
        )
        .await?;
        txn.commit().await
    }

    /// Final transaction on `Stop`: marks the row `stopped` only if it
    /// was `active`/`standby`.
    pub async fn finalize_stop(&mut self) -> Result<(), HaError> {
        let Some(node_id) = self.info.node_id.clone() else {
            return Ok(());
        };
        if !matches!(self.info.ha_status, HaStatus::Active | HaStatus::Standby) {
            return Ok(());
        }
        let mut txn = self.store.begin().await?;
        txn.update_node(
            &node_id,
            NodeUpdate {
                status: Some(NodeStatus::Stopped),
                ..Default::default()
            },
        )
        .await?;
        txn.audit(AuditEntry::node_updated(&node_id, json!({"status": "stopped"})));
        txn.commit().await?;
        self.info.ha_status = HaStatus::Stopped;
        Ok(())
    }

    /// First registration: the `unknown → {active, standby}` transition.
    async fn register(&mut self) -> Result<bool, HaError> {
        let node_id = {
            let mut txn = self.store.begin().await?;
            let nodes = txn.read_nodes(true).await?;
            let db_time = txn.read_db_time().await?;
            let config = txn.read_config().await?;

            if let Some(existing) = nodes.iter().find(|n| n.name == self.info.name) {
                let id = existing.node_id.clone();
                txn.commit().await?;
                self.info.failover_delay = config.failover_delay;
                self.info.auditlog_enabled = config.auditlog_enabled;
                id
            } else {
                if self.info.is_cluster_member() {
                    lease::admit_cluster(&nodes, None, &self.info.name, db_time, config.failover_delay)
                        .map_err(admission_to_fatal)?;
                } else {
                    lease::admit_standalone(&nodes, db_time, config.failover_delay)
                        .map_err(admission_to_fatal)?;
                }
                let id = generate_id()?;
                txn.insert_node(&id, &self.info.name, db_time).await?;
                txn.audit(AuditEntry::node_added(&id));
                txn.commit().await?;
                self.info.failover_delay = config.failover_delay;
                self.info.auditlog_enabled = config.auditlog_enabled;
                id
            }
        };
        self.info.node_id = Some(node_id);

        let mut txn = self.store.begin().await?;
        let nodes = txn.read_nodes(true).await?;
        let db_time = txn.read_db_time().await?;
        let config = txn.read_config().await?;
        let node_id = self.info.node_id.clone().unwrap();

        let role = if self.info.is_cluster_member() {
            lease::admit_cluster(&nodes, Some(&node_id), &self.info.name, db_time, config.failover_delay)
                .map_err(admission_to_fatal)?
        } else {
            lease::admit_standalone(&nodes, db_time, config.failover_delay).map_err(admission_to_fatal)?;
            Role::Active
        };
        let new_status = match role {
            Role::Active => NodeStatus::Active,
            Role::Standby => NodeStatus::Standby,
        };

        let existing = nodes.iter().find(|n| n.node_id == node_id);
        let mut changes = serde_json::Map::new();
        if existing.map(|n| n.status) != Some(new_status) {
            changes.insert("status".into(), json!(new_status.to_string()));
        }
        changes.insert("lastaccess".into(), json!(db_time));
        changes.insert("address".into(), json!(self.address));
        changes.insert("port".into(), json!(self.port));
        changes.insert("session_id".into(), json!(self.info.session_id));

        txn.update_node(
            &node_id,
            NodeUpdate {
                status: Some(new_status),
                lastaccess: Some(db_time),
                address: Some(self.address.clone()),
                port: Some(self.port),
                session_id: Some(self.info.session_id.clone()),
            },
        )
        .await?;
        txn.audit(AuditEntry::node_updated(&node_id, serde_json::Value::Object(changes)));
        txn.commit().await?;

        self.info.failover_delay = config.failover_delay;
        self.info.auditlog_enabled = config.auditlog_enabled;
        self.info.ha_status = new_status.into();
        info!(node_id = %node_id, status = %new_status, "registered with HA registry");
        Ok(true)
    }

    /// The per-tick liveness check once `node_id` is assigned.
    async fn run_liveness_tick(&mut self) -> Result<bool, HaError> {
        let node_id = self.info.node_id.clone().expect("liveness tick requires a node_id");
        let mut txn = self.store.begin().await?;
        let nodes = txn.read_nodes(true).await?;
        let db_time = txn.read_db_time().await?;
        let config = txn.read_config().await?;
        self.info.failover_delay = config.failover_delay;
        self.info.auditlog_enabled = config.auditlog_enabled;

        let own = nodes
            .iter()
            .find(|n| n.node_id == node_id)
            .ok_or_else(|| HaError::Fatal("HA registry record has been removed".to_string()))?;
        if own.session_id != self.info.session_id {
            return Err(HaError::Fatal(
                "HA registry record has changed ownership".to_string(),
            ));
        }

        let mut to_mark_unavailable: Option<String> = None;
        let mut new_status = own.status;

        match own.status {
            NodeStatus::Standby => {
                match lease::check_active_peer(
                    &nodes,
                    self.info.lastaccess_active,
                    self.info.offline_ticks_active,
                    config.failover_delay,
                    self.tick_period.as_secs() as i64,
                ) {
                    ActivePeerOutcome::Healthy { offline_ticks_active } => {
                        self.info.offline_ticks_active = offline_ticks_active;
                        if let Some(active) = nodes.iter().find(|n| n.status == NodeStatus::Active) {
                            self.info.lastaccess_active = Some(active.lastaccess);
                        }
                    }
                    ActivePeerOutcome::Promote { demote_node_id } => {
                        new_status = NodeStatus::Active;
                        to_mark_unavailable = demote_node_id;
                        self.info.offline_ticks_active = 0;
                        self.info.lastaccess_active = None;
                    }
                }
            }
            NodeStatus::Active => {
                for stale_id in lease::mark_stale_standbys(&nodes, db_time, config.failover_delay) {
                    txn.update_node(
                        &stale_id,
                        NodeUpdate {
                            status: Some(NodeStatus::Unavailable),
                            ..Default::default()
                        },
                    )
                    .await?;
                    txn.audit(AuditEntry::node_updated(&stale_id, json!({"status": "unavailable"})));
                }
            }
            _ => {}
        }

        if let Some(demote_id) = &to_mark_unavailable {
            txn.update_node(
                demote_id,
                NodeUpdate {
                    status: Some(NodeStatus::Unavailable),
                    ..Default::default()
                },
            )
            .await?;
            txn.audit(AuditEntry::node_updated(demote_id, json!({"status": "unavailable"})));
        }

        let status_changed = new_status != own.status;
        txn.update_node(
            &node_id,
            NodeUpdate {
                status: if status_changed { Some(new_status) } else { None },
                lastaccess: Some(db_time),
                address: Some(self.address.clone()),
                port: Some(self.port),
                ..Default::default()
            },
        )
        .await?;
        if status_changed {
            txn.audit(AuditEntry::node_updated(&node_id, json!({"status": new_status.to_string()})));
        }
        txn.commit().await?;

        self.info.ha_status = new_status.into();
        Ok(status_changed)
    }

    /// Builds the JSON payload returned in reply to a `GetNodes` request.
    pub async fn get_nodes_json(&self) -> Result<String, HaError> {
        let mut txn = self.store.begin().await?;
        let nodes = txn.read_nodes(false).await?;
        let db_time = txn.read_db_time().await?;
        txn.rollback().await;

        let array: Vec<_> = nodes
            .iter()
            .map(|n| {
                json!({
                    "nodeid": n.node_id,
                    "name": n.name,
                    "status": n.status as i32,
                    "lastaccess": n.lastaccess,
                    "address": format!("{}:{}", n.address, n.port),
                    "db_timestamp": db_time,
                    "lastaccess_age": db_time - n.lastaccess,
                })
            })
            .collect();
        Ok(serde_json::to_string(&array)?)
    }

    /// `RemoveNode(index)` (1-based, node_id order).
    pub async fn remove_node(&self, index: u32) -> Result<(), HaError> {
        let mut txn = self.store.begin().await?;
        let nodes = txn.read_nodes(true).await?;
        let idx = index
            .checked_sub(1)
            .ok_or_else(|| HaError::Fatal("node index out of range".to_string()))? as usize;
        let Some(node) = nodes.get(idx) else {
            txn.rollback().await;
            return Err(HaError::Fatal("node index out of range".to_string()));
        };
        match node.status {
            NodeStatus::Active => {
                txn.rollback().await;
                return Err(HaError::Fatal("node is active".to_string()));
            }
            NodeStatus::Standby => {
                txn.rollback().await;
                return Err(HaError::Fatal("node is standby".to_string()));
            }
            _ => {}
        }
        let node_id = node.node_id.clone();
        txn.delete_node(&node_id).await?;
        txn.audit(AuditEntry::node_deleted(&node_id));
        txn.commit().await?;
        warn!(node_id = %node_id, "node removed by administrative request");
        Ok(())
    }

    /// `SetFailoverDelay(secs)`.
    pub async fn set_failover_delay(&mut self, seconds: i64) -> Result<(), HaError> {
        let mut txn = self.store.begin().await?;
        txn.read_config().await?;
        txn.update_failover_delay(seconds).await?;
        txn.audit(AuditEntry::settings_updated(json!({"failover_delay": seconds})));
        txn.commit().await?;
        self.info.failover_delay = seconds;
        self.send_status_update().await;
        Ok(())
    }

    pub async fn send_status_update(&self) {
        let failover_delay = self.info.failover_delay as i32;
        let status = match self.info.ha_status {
            HaStatus::Unknown => NodeStatus::Stopped,
            HaStatus::Error => NodeStatus::Unavailable,
            HaStatus::Stopped => NodeStatus::Stopped,
            HaStatus::Standby => NodeStatus::Standby,
            HaStatus::Active => NodeStatus::Active,
            HaStatus::Unavailable => NodeStatus::Unavailable,
        };
        let frame = ManagerFrame::StatusUpdate {
            status,
            failover_delay,
            error: self.info.error.clone().unwrap_or_default(),
        };
        let _ = self.outbound.send(frame).await;
    }

    async fn send_heartbeat(&self) {
        if self.info.db_status == DbStatus::Ok {
            let _ = self.outbound.send(ManagerFrame::Heartbeat).await;
        }
    }
}

fn admission_to_fatal(e: AdmissionError) -> HaError {
    HaError::Fatal(e.to_string())
}

/// Deadline-based helper so the loop's `select!` always wakes at the next
/// tick boundary even while waiting on IPC frames ("between ticks").
pub fn tick_deadline(delay: Duration) -> Instant {
    Instant::now() + delay
}
