// src/core/registry/memory.rs

//! An in-memory [`RegistryStore`] used by the integration and property test
//! suites. Cloning a [`MemoryRegistryStore`] yields a cheap handle onto the same
//! shared table, which is how the property tests in `tests/property/` model `N`
//! simulated nodes sharing one registry.

use super::audit::AuditBuffer;
use super::{AuditEntry, GlobalSettings, Node, NodeUpdate, RegistryStore, RegistryTransaction};
use crate::core::errors::HaError;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone)]
struct Inner {
    nodes: Vec<Node>,
    settings: GlobalSettings,
}

struct Shared {
    inner: Arc<Mutex<Inner>>,
    online: AtomicBool,
    clock: AtomicI64,
    audit_log: parking_lot::Mutex<Vec<AuditEntry>>,
}

/// A handle onto a shared in-memory registry table.
#[derive(Clone)]
pub struct MemoryRegistryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryRegistryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Arc::new(Mutex::new(Inner {
                    nodes: Vec::new(),
                    settings: GlobalSettings::default(),
                })),
                online: AtomicBool::new(true),
                clock: AtomicI64::new(0),
                audit_log: parking_lot::Mutex::new(Vec::new()),
            }),
        }
    }

    /// A second handle onto the same shared table, simulating another process
    /// sharing the database.
    pub fn handle(&self) -> Self {
        self.clone()
    }

    /// Simulates a connectivity drop/restore for this registry. Any open
    /// transaction is unaffected; `begin` on the next tick starts failing (or
    /// succeeding again).
    pub fn set_online(&self, online: bool) {
        self.shared.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.shared.online.load(Ordering::SeqCst)
    }

    /// Advances the simulated database clock and returns the new value.
    pub fn advance_clock(&self, secs: i64) -> i64 {
        self.shared.clock.fetch_add(secs, Ordering::SeqCst) + secs
    }

    pub fn db_time(&self) -> i64 {
        self.shared.clock.load(Ordering::SeqCst)
    }

    /// A snapshot of every audit entry that has been committed so far.
    pub fn committed_audit_log(&self) -> Vec<AuditEntry> {
        self.shared.audit_log.lock().clone()
    }

    /// A direct snapshot of the node table, bypassing the transaction API
    /// entirely — handy for test assertions.
    pub async fn snapshot_nodes(&self) -> Vec<Node> {
        self.shared.inner.lock().await.nodes.clone()
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn begin(&self) -> Result<Box<dyn RegistryTransaction>, HaError> {
        if !self.is_online() {
            return Err(HaError::Offline("in-memory registry is offline".into()));
        }
        Ok(Box::new(MemoryTransaction {
            shared: self.shared.clone(),
            guard: None,
            staged: None,
            buffer: AuditBuffer::default(),
        }))
    }
}

/// A transaction that stages every mutation in a private working copy, taken
/// under the table lock at the moment the lock is first acquired. The copy is
/// only written back to the shared table on [`commit`](Self::commit); dropping
/// the transaction (explicit `rollback` or simply going out of scope) discards
/// both the working copy and any staged audit entries, matching the
/// `begin`/`commit`/`rollback` lifecycle `RegistryTransaction` promises.
struct MemoryTransaction {
    shared: Arc<Shared>,
    guard: Option<OwnedMutexGuard<Inner>>,
    staged: Option<Inner>,
    buffer: AuditBuffer,
}

impl MemoryTransaction {
    fn check_online(&self) -> Result<(), HaError> {
        if !self.shared.online.load(Ordering::SeqCst) {
            return Err(HaError::Offline("in-memory registry is offline".into()));
        }
        Ok(())
    }

    /// Acquires the table-wide lock if it isn't already held by this
    /// transaction, and takes a working copy to mutate. Mutating operations
    /// always need this; `read_nodes(false)` deliberately avoids it, since
    /// non-mutating reads use snapshot reads without locks.
    async fn ensure_locked(&mut self) -> Result<&mut Inner, HaError> {
        self.check_online()?;
        if self.guard.is_none() {
            let guard = self.shared.inner.clone().lock_owned().await;
            self.staged = Some(guard.clone());
            self.guard = Some(guard);
        }
        Ok(self.staged.as_mut().unwrap())
    }

    fn find_mut<'a>(nodes: &'a mut [Node], node_id: &str) -> Option<&'a mut Node> {
        nodes.iter_mut().find(|n| n.node_id == node_id)
    }
}

#[async_trait]
impl RegistryTransaction for MemoryTransaction {
    async fn read_nodes(&mut self, lock: bool) -> Result<Vec<Node>, HaError> {
        self.check_online()?;
        if lock {
            let inner = self.ensure_locked().await?;
            Ok(inner.nodes.clone())
        } else {
            Ok(self.shared.inner.lock().await.nodes.clone())
        }
    }

    async fn read_db_time(&mut self) -> Result<i64, HaError> {
        self.check_online()?;
        Ok(self.shared.clock.load(Ordering::SeqCst))
    }

    async fn read_config(&mut self) -> Result<GlobalSettings, HaError> {
        self.check_online()?;
        if let Some(staged) = &self.staged {
            Ok(staged.settings)
        } else {
            Ok(self.shared.inner.lock().await.settings)
        }
    }

    async fn insert_node(
        &mut self,
        node_id: &str,
        name: &str,
        lastaccess: i64,
    ) -> Result<(), HaError> {
        let inner = self.ensure_locked().await?;
        if inner.nodes.iter().any(|n| n.node_id == node_id) {
            return Err(HaError::Fatal(format!(
                "node id '{node_id}' already exists"
            )));
        }
        inner.nodes.push(Node {
            node_id: node_id.to_string(),
            name: name.to_string(),
            status: super::NodeStatus::Stopped,
            lastaccess,
            address: String::new(),
            port: 0,
            session_id: String::new(),
        });
        Ok(())
    }

    async fn update_node(&mut self, node_id: &str, fields: NodeUpdate) -> Result<(), HaError> {
        if fields.is_empty() {
            return Ok(());
        }
        let inner = self.ensure_locked().await?;
        let node = Self::find_mut(&mut inner.nodes, node_id)
            .ok_or_else(|| HaError::Fatal(format!("node id '{node_id}' not found")))?;
        if let Some(status) = fields.status {
            node.status = status;
        }
        if let Some(lastaccess) = fields.lastaccess {
            node.lastaccess = lastaccess;
        }
        if let Some(address) = fields.address {
            node.address = address;
        }
        if let Some(port) = fields.port {
            node.port = port;
        }
        if let Some(session_id) = fields.session_id {
            node.session_id = session_id;
        }
        Ok(())
    }

    async fn delete_node(&mut self, node_id: &str) -> Result<(), HaError> {
        let inner = self.ensure_locked().await?;
        let before = inner.nodes.len();
        inner.nodes.retain(|n| n.node_id != node_id);
        if inner.nodes.len() == before {
            return Err(HaError::Fatal(format!("node id '{node_id}' not found")));
        }
        Ok(())
    }

    async fn update_failover_delay(&mut self, value: i64) -> Result<(), HaError> {
        let inner = self.ensure_locked().await?;
        inner.settings.failover_delay = value;
        Ok(())
    }

    fn audit(&mut self, entry: AuditEntry) {
        self.buffer.push(entry);
    }

    async fn commit(mut self: Box<Self>) -> Result<(), HaError> {
        self.check_online()?;
        let Some(mut guard) = self.guard.take() else {
            // A read-only transaction that never mutated anything: nothing to
            // write back, nothing to audit.
            return Ok(());
        };
        let staged = self.staged.take().expect("guard implies staged copy");
        let auditlog_enabled = staged.settings.auditlog_enabled;
        *guard = staged;
        drop(guard); // releases the table lock, making the commit visible.

        let entries = self.buffer.drain();
        if auditlog_enabled && !entries.is_empty() {
            self.shared.audit_log.lock().extend(entries);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) {
        // Dropping `self` discards `self.staged` (the working copy) and
        // `self.buffer` (staged audit entries) without ever touching the
        // shared table; `self.guard`, if held, is released unmodified.
    }
}
