// src/core/registry/sql.rs

//! A Postgres-backed [`RegistryStore`], built on `sqlx` (schema:
//! `ha_node`/`config`). Every [`RegistryTransaction`] here is a real SQL
//! transaction; mutating methods issue statements immediately but nothing is
//! visible to other connections until [`commit`](RegistryTransaction::commit),
//! which is exactly the isolation the in-memory store's staged-copy design
//! mimics for tests.

use super::audit::AuditBuffer;
use super::{AuditEntry, GlobalSettings, Node, NodeStatus, NodeUpdate, RegistryStore, RegistryTransaction};
use crate::core::errors::HaError;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};

/// Opens connections against a single `config` row, identified by `configid`
/// (the registry may in principle host config rows for multiple clusters; a
/// given HA manager instance only ever looks at its own).
pub struct SqlRegistryStore {
    pool: PgPool,
    configid: i64,
}

impl SqlRegistryStore {
    pub async fn connect(database_url: &str, configid: i64) -> Result<Self, HaError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool, configid })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RegistryStore for SqlRegistryStore {
    async fn begin(&self) -> Result<Box<dyn RegistryTransaction>, HaError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqlTransaction {
            tx: Some(tx),
            configid: self.configid,
            buffer: AuditBuffer::default(),
        }))
    }
}

struct SqlTransaction {
    tx: Option<Transaction<'static, Postgres>>,
    configid: i64,
    buffer: AuditBuffer,
}

impl SqlTransaction {
    fn tx(&mut self) -> &mut Transaction<'static, Postgres> {
        self.tx.as_mut().expect("transaction used after commit/rollback")
    }
}

#[async_trait]
impl RegistryTransaction for SqlTransaction {
    async fn read_nodes(&mut self, lock: bool) -> Result<Vec<Node>, HaError> {
        let query = if lock {
            "SELECT ha_nodeid, name, status, lastaccess, address, port, ha_sessionid \
             FROM ha_node ORDER BY ha_nodeid FOR UPDATE"
        } else {
            "SELECT ha_nodeid, name, status, lastaccess, address, port, ha_sessionid \
             FROM ha_node ORDER BY ha_nodeid"
        };
        let rows = sqlx::query(query).fetch_all(&mut **self.tx()).await?;
        rows.into_iter()
            .map(|row| {
                let status: i32 = row.try_get("status")?;
                Ok(Node {
                    node_id: row.try_get("ha_nodeid")?,
                    name: row.try_get("name")?,
                    status: NodeStatus::from_i32(status)
                        .ok_or_else(|| HaError::Fatal(format!("unknown node status {status}")))?,
                    lastaccess: row.try_get("lastaccess")?,
                    address: row.try_get("address")?,
                    port: row.try_get::<i32, _>("port")? as u16,
                    session_id: row.try_get("ha_sessionid")?,
                })
            })
            .collect()
    }

    async fn read_db_time(&mut self) -> Result<i64, HaError> {
        let row = sqlx::query("SELECT extract(epoch FROM now())::bigint AS now")
            .fetch_one(&mut **self.tx())
            .await?;
        Ok(row.try_get("now")?)
    }

    async fn read_config(&mut self) -> Result<GlobalSettings, HaError> {
        let row = sqlx::query(
            "SELECT ha_failover_delay, auditlog_enabled FROM config WHERE configid = $1 FOR UPDATE",
        )
        .bind(self.configid)
        .fetch_one(&mut **self.tx())
        .await?;
        let failover_delay: String = row.try_get("ha_failover_delay")?;
        let auditlog_enabled: i32 = row.try_get("auditlog_enabled")?;
        Ok(GlobalSettings {
            failover_delay: failover_delay
                .parse()
                .map_err(|_| HaError::Fatal(format!("malformed ha_failover_delay '{failover_delay}'")))?,
            auditlog_enabled: auditlog_enabled != 0,
        })
    }

    async fn insert_node(
        &mut self,
        node_id: &str,
        name: &str,
        lastaccess: i64,
    ) -> Result<(), HaError> {
        sqlx::query(
            "INSERT INTO ha_node (ha_nodeid, name, status, lastaccess, address, port, ha_sessionid) \
             VALUES ($1, $2, $3, $4, '', 0, '')",
        )
        .bind(node_id)
        .bind(name)
        .bind(NodeStatus::Stopped as i32)
        .bind(lastaccess)
        .execute(&mut **self.tx())
        .await?;
        Ok(())
    }

    async fn update_node(&mut self, node_id: &str, fields: NodeUpdate) -> Result<(), HaError> {
        if fields.is_empty() {
            return Ok(());
        }
        if let Some(status) = fields.status {
            sqlx::query("UPDATE ha_node SET status = $1 WHERE ha_nodeid = $2")
                .bind(status as i32)
                .bind(node_id)
                .execute(&mut **self.tx())
                .await?;
        }
        if let Some(lastaccess) = fields.lastaccess {
            sqlx::query("UPDATE ha_node SET lastaccess = $1 WHERE ha_nodeid = $2")
                .bind(lastaccess)
                .bind(node_id)
                .execute(&mut **self.tx())
                .await?;
        }
        if let Some(address) = fields.address {
            sqlx::query("UPDATE ha_node SET address = $1 WHERE ha_nodeid = $2")
                .bind(address)
                .bind(node_id)
                .execute(&mut **self.tx())
                .await?;
        }
        if let Some(port) = fields.port {
            sqlx::query("UPDATE ha_node SET port = $1 WHERE ha_nodeid = $2")
                .bind(port as i32)
                .bind(node_id)
                .execute(&mut **self.tx())
                .await?;
        }
        if let Some(session_id) = fields.session_id {
            sqlx::query("UPDATE ha_node SET ha_sessionid = $1 WHERE ha_nodeid = $2")
                .bind(session_id)
                .bind(node_id)
                .execute(&mut **self.tx())
                .await?;
        }
        Ok(())
    }

    async fn delete_node(&mut self, node_id: &str) -> Result<(), HaError> {
        let result = sqlx::query("DELETE FROM ha_node WHERE ha_nodeid = $1")
            .bind(node_id)
            .execute(&mut **self.tx())
            .await?;
        if result.rows_affected() == 0 {
            return Err(HaError::Fatal(format!("node id '{node_id}' not found")));
        }
        Ok(())
    }

    async fn update_failover_delay(&mut self, value: i64) -> Result<(), HaError> {
        // Caller is expected to have taken the row lock via `read_config` under the
        // same transaction first; the UPDATE here rides that same row lock so the
        // read-then-write pair is atomic.
        sqlx::query("UPDATE config SET ha_failover_delay = $1 WHERE configid = $2")
            .bind(value.to_string())
            .bind(self.configid)
            .execute(&mut **self.tx())
            .await?;
        Ok(())
    }

    fn audit(&mut self, entry: AuditEntry) {
        self.buffer.push(entry);
    }

    async fn commit(mut self: Box<Self>) -> Result<(), HaError> {
        let entries = self.buffer.drain();
        if !entries.is_empty() {
            let auditlog_enabled = {
                let row = sqlx::query("SELECT auditlog_enabled FROM config WHERE configid = $1")
                    .bind(self.configid)
                    .fetch_one(&mut **self.tx())
                    .await?;
                row.try_get::<i32, _>("auditlog_enabled")? != 0
            };
            if auditlog_enabled {
                for entry in entries {
                    sqlx::query(
                        "INSERT INTO ha_audit (action, entity, entity_id, field_changes, logged_at) \
                         VALUES ($1, $2, $3, $4, now())",
                    )
                    .bind(serde_json::to_string(&entry.action)?)
                    .bind(serde_json::to_string(&entry.entity)?)
                    .bind(&entry.entity_id)
                    .bind(&entry.field_changes)
                    .execute(&mut **self.tx())
                    .await?;
                }
            }
        }
        let tx = self.tx.take().expect("transaction used after commit/rollback");
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.rollback().await;
        }
    }
}
