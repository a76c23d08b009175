// src/core/manager/state.rs

//! In-memory manager state (`Info`) plus the small set of values carried
//! between ticks.

use crate::core::registry::NodeStatus;

/// Database connectivity, tracked separately from `ha_status` so the tick
/// loop can distinguish "this node's role changed" from "the registry is
/// unreachable".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbStatus {
    Ok,
    Down,
    Fail,
}

/// The manager's reported role. A superset of [`NodeStatus`]: the
/// registry row only ever holds `stopped`/`standby`/`unavailable`/`active`,
/// but the manager itself also passes through `unknown` (before its first
/// registration) and `error` (a terminal, sticky condition that is never
/// written back to the row it last held).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaStatus {
    Unknown,
    Stopped,
    Standby,
    Active,
    Unavailable,
    Error,
}

impl From<NodeStatus> for HaStatus {
    fn from(s: NodeStatus) -> Self {
        match s {
            NodeStatus::Stopped => HaStatus::Stopped,
            NodeStatus::Standby => HaStatus::Standby,
            NodeStatus::Active => HaStatus::Active,
            NodeStatus::Unavailable => HaStatus::Unavailable,
        }
    }
}

impl HaStatus {
    /// The wire encoding for `StatusUpdate` frames; `Unknown` and `Error`
    /// reuse negative sentinels since they never appear as a row `status`.
    pub fn wire_value(self) -> i32 {
        match self {
            HaStatus::Standby => 0,
            HaStatus::Stopped => 1,
            HaStatus::Unavailable => 2,
            HaStatus::Active => 3,
            HaStatus::Unknown => -1,
            HaStatus::Error => -2,
        }
    }
}

/// The manager's own view of its role and the cluster, carried across ticks.
/// Nothing here is durable; it is reconstructed from the registry on the
/// first tick after a restart via [`Info::new`] plus registration.
#[derive(Debug, Clone)]
pub struct Info {
    pub node_id: Option<String>,
    pub session_id: String,
    pub name: String,
    pub ha_status: HaStatus,
    pub db_status: DbStatus,
    pub failover_delay: i64,
    pub auditlog_enabled: bool,
    /// Last seen `lastaccess` of the current active peer; `None` until
    /// observed at least once.
    pub lastaccess_active: Option<i64>,
    /// Consecutive ticks `lastaccess_active` has failed to advance.
    pub offline_ticks_active: u32,
    /// Sticky terminal error: once set, never overwritten.
    pub error: Option<String>,
}

impl Info {
    pub fn new(name: String, session_id: String) -> Self {
        Self {
            node_id: None,
            session_id,
            name,
            ha_status: HaStatus::Unknown,
            db_status: DbStatus::Down,
            failover_delay: 60,
            auditlog_enabled: true,
            lastaccess_active: None,
            offline_ticks_active: 0,
            error: None,
        }
    }

    pub fn is_cluster_member(&self) -> bool {
        !self.name.is_empty()
    }

    /// Sets the sticky error if one isn't already set: the error field is
    /// sticky, so subsequent errors do not overwrite it.
    pub fn set_error(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
        self.ha_status = HaStatus::Error;
    }
}
