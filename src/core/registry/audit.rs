// src/core/registry/audit.rs

//! The Audit Emitter: structured change entries that ride along with a
//! registry transaction and are only ever durable if the transaction they
//! describe is.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Add,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditEntity {
    Node,
    Settings,
}

/// One staged audit record. `field_changes` is a JSON object of `field -> new
/// value`; for `Delete` it is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub entity: AuditEntity,
    pub entity_id: String,
    pub field_changes: Value,
}

impl AuditEntry {
    pub fn node_added(node_id: &str) -> Self {
        Self {
            action: AuditAction::Add,
            entity: AuditEntity::Node,
            entity_id: node_id.to_string(),
            field_changes: Value::Object(Default::default()),
        }
    }

    pub fn node_updated(node_id: &str, field_changes: Value) -> Self {
        Self {
            action: AuditAction::Update,
            entity: AuditEntity::Node,
            entity_id: node_id.to_string(),
            field_changes,
        }
    }

    pub fn node_deleted(node_id: &str) -> Self {
        Self {
            action: AuditAction::Delete,
            entity: AuditEntity::Node,
            entity_id: node_id.to_string(),
            field_changes: Value::Object(Default::default()),
        }
    }

    pub fn settings_updated(field_changes: Value) -> Self {
        Self {
            action: AuditAction::Update,
            entity: AuditEntity::Settings,
            entity_id: "global".to_string(),
            field_changes,
        }
    }
}

/// Accumulates staged entries for one in-flight transaction and decides, at
/// flush time, whether they are actually written anywhere. Shared by both
/// [`super::sql::SqlRegistryStore`] and [`super::memory::MemoryRegistryStore`] so the
/// "transactional with the change it describes" rule is enforced in one place.
#[derive(Debug, Default)]
pub struct AuditBuffer {
    entries: Vec<AuditEntry>,
}

impl AuditBuffer {
    pub fn push(&mut self, entry: AuditEntry) {
        self.entries.push(entry);
    }

    pub fn drain(&mut self) -> Vec<AuditEntry> {
        std::mem::take(&mut self.entries)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
