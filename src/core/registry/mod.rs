// src/core/registry/mod.rs

//! The Registry Store: a thin, transactional wrapper around the shared database
//! table that backs the HA cluster's node registry.
//!
//! Storage is modeled behind the [`RegistryStore`] / [`RegistryTransaction`] traits so
//! the tick loop and the Node Lease Engine never see a concrete SQL driver. Two
//! implementations are provided: [`sql::SqlRegistryStore`], a real Postgres-backed
//! store, and [`memory::MemoryRegistryStore`], an in-memory store used by the
//! integration and property test suites (and, in principle, by a standalone build
//! that has no database configured).

pub mod audit;
pub mod memory;
pub mod sql;

use crate::core::errors::HaError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use audit::{AuditAction, AuditEntity, AuditEntry};

/// The length, in characters, of a generated `node_id` or `session_id`.
pub const ID_LEN: usize = 25;

/// The perceived status of a node row. The numeric values match the
/// registry's on-disk encoding so `as i32` round-trips through the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum NodeStatus {
    Standby = 0,
    Stopped = 1,
    Unavailable = 2,
    Active = 3,
}

impl NodeStatus {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::Standby),
            1 => Some(Self::Stopped),
            2 => Some(Self::Unavailable),
            3 => Some(Self::Active),
            _ => None,
        }
    }

    /// `live(n)` only ever holds for these two statuses.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Active | Self::Standby)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Standby => "standby",
            Self::Stopped => "stopped",
            Self::Unavailable => "unavailable",
            Self::Active => "active",
        };
        f.write_str(s)
    }
}

/// One row of the `ha_node` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub name: String,
    pub status: NodeStatus,
    pub lastaccess: i64,
    pub address: String,
    pub port: u16,
    pub session_id: String,
}

impl Node {
    /// The liveness predicate: `live(n) ≡ n.status ∈ {active, standby} ∧
    /// n.lastaccess + failover_delay > db_time`.
    pub fn is_live(&self, db_time: i64, failover_delay: i64) -> bool {
        self.status.is_live() && self.lastaccess + failover_delay > db_time
    }
}

/// A sparse update to a node row; any field left `None` is left unchanged
/// (`update_node(id, fields…)`).
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    pub status: Option<NodeStatus>,
    pub lastaccess: Option<i64>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub session_id: Option<String>,
}

impl NodeUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.lastaccess.is_none()
            && self.address.is_none()
            && self.port.is_none()
            && self.session_id.is_none()
    }
}

/// The registry's global settings row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalSettings {
    pub failover_delay: i64,
    pub auditlog_enabled: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            failover_delay: 60,
            auditlog_enabled: true,
        }
    }
}

/// A single transaction against the registry, opened by [`RegistryStore::begin`].
///
/// All mutating methods stage their effect; nothing is durable until [`commit`] is
/// called. Dropping a transaction without committing it is equivalent to
/// [`rollback`] — in particular, any staged audit entries are discarded.
///
/// [`commit`]: RegistryTransaction::commit
/// [`rollback`]: RegistryTransaction::rollback
#[async_trait]
pub trait RegistryTransaction: Send {
    /// Reads the full node table, ordered by `node_id`. With `lock = true` this
    /// takes a table-wide row lock (`SELECT … FOR UPDATE`) held until commit.
    async fn read_nodes(&mut self, lock: bool) -> Result<Vec<Node>, HaError>;

    /// Reads the database's own clock, in seconds. All liveness math is expressed
    /// in terms of this value so that clock skew between nodes is irrelevant.
    async fn read_db_time(&mut self) -> Result<i64, HaError>;

    /// Reads the global settings row.
    async fn read_config(&mut self) -> Result<GlobalSettings, HaError>;

    /// Inserts a new node row in status `stopped` with `lastaccess = db_time`.
    async fn insert_node(&mut self, node_id: &str, name: &str, lastaccess: i64)
    -> Result<(), HaError>;

    /// Applies a sparse update to an existing row.
    async fn update_node(&mut self, node_id: &str, fields: NodeUpdate) -> Result<(), HaError>;

    /// Deletes a node row outright. Callers are responsible for enforcing that the
    /// row is not `active`/`standby` before calling this.
    async fn delete_node(&mut self, node_id: &str) -> Result<(), HaError>;

    /// Atomically updates the global `failover_delay`: the read and the update
    /// happen under the same locked transaction, so a concurrent reader never
    /// observes a torn read-then-write.
    async fn update_failover_delay(&mut self, value: i64) -> Result<(), HaError>;

    /// Stages an audit entry. Staged entries are flushed atomically with
    /// [`commit`](RegistryTransaction::commit) and discarded on rollback or if
    /// `auditlog_enabled` is false.
    fn audit(&mut self, entry: AuditEntry);

    /// Commits the transaction, including any staged audit entries.
    async fn commit(self: Box<Self>) -> Result<(), HaError>;

    /// Discards the transaction and any staged audit entries.
    async fn rollback(self: Box<Self>);
}

/// The entry point for opening registry transactions. See the module docs for the
/// two implementations.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Begins a new transaction. Implementations reconnect lazily here: if the
    /// underlying connection was lost, this is where the next reconnect attempt
    /// happens. On sustained outage this returns `Err(HaError::Offline(_))`.
    async fn begin(&self) -> Result<Box<dyn RegistryTransaction>, HaError>;
}

/// Generates a 25-character collision-resistant hex-ish identifier, used for both
/// `node_id` and `session_id`: `getrandom::fill` + `hex::encode`, truncated to the
/// registry's fixed column width.
pub fn generate_id() -> Result<String, HaError> {
    let mut bytes = [0u8; 16];
    getrandom::fill(&mut bytes).map_err(|e| HaError::Fatal(format!("failed to generate id: {e}")))?;
    let mut id = hex::encode(bytes);
    id.truncate(ID_LEN);
    while id.len() < ID_LEN {
        id.push('0');
    }
    Ok(id)
}
