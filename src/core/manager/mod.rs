// src/core/manager/mod.rs

//! The HA Manager process: loads configuration, opens the registry, and runs
//! the tick loop alongside the Parent Notification Channel listener. Loads
//! config, generates a run/session id via `getrandom`, spawns the
//! long-running tasks into a `JoinSet`, and treats any of them exiting as a
//! reason to shut the whole process down.

pub mod listener;
pub mod state;
pub mod worker;

use crate::config::HaManagerConfig;
use crate::core::errors::HaError;
use crate::core::ipc::{ManagerFrame, ParentFrame};
use crate::core::logging::LogLevelHandle;
use crate::core::registry::{generate_id, memory::MemoryRegistryStore, sql::SqlRegistryStore, RegistryStore};
use listener::{InboundMessage, run_listener};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{error, info};
use worker::{LoopAction, Manager};

/// Builds the registry store a configuration selects: Postgres if
/// `database_url` is set, otherwise an in-memory store for local runs
/// (SPEC_FULL A.3).
async fn open_store(config: &HaManagerConfig) -> Result<Arc<dyn RegistryStore>, HaError> {
    match &config.database_url {
        Some(url) => {
            let store = SqlRegistryStore::connect(url, config.configid).await?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryRegistryStore::new())),
    }
}

/// Runs the HA manager until a fatal condition or `Stop` ends it.
pub async fn run(config_path: &str, log_handle: Option<Arc<LogLevelHandle>>) -> Result<(), HaError> {
    let config = HaManagerConfig::from_file(config_path).await?;
    info!(
        node_name = %config.node_name,
        address = %config.node_address,
        "HA manager starting"
    );

    let mut session_bytes = [0u8; 16];
    getrandom::fill(&mut session_bytes)
        .map_err(|e| HaError::Fatal(format!("failed to generate session id: {e}")))?;
    let mut session_id = hex::encode(session_bytes);
    session_id.truncate(crate::core::registry::ID_LEN);

    let store = open_store(&config).await?;
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(64);
    let (outbound_tx, outbound_rx) = mpsc::channel::<ManagerFrame>(64);

    let mut manager = Manager::with_tick_period(
        store,
        config.node_name.clone(),
        session_id,
        config.node_address.clone(),
        config.node_port,
        outbound_tx,
        config.tick_period,
    );

    let mut tasks: JoinSet<Result<(), HaError>> = JoinSet::new();
    let socket_path = config.ipc_socket_path.clone();
    tasks.spawn(async move { run_listener(&socket_path, inbound_tx, outbound_rx).await });

    loop {
        if manager.is_paused() {
            tokio::select! {
                _ = sleep(manager.tick_period()) => {
                    let _ = manager.refresh_lastaccess().await;
                }
                Some(msg) = inbound_rx.recv() => {
                    if matches!(msg.frame, ParentFrame::Stop) {
                        let _ = manager.finalize_stop().await;
                        return Ok(());
                    }
                }
                Some(res) = tasks.join_next() => {
                    return terminate(res);
                }
            }
            continue;
        }

        let tick_delay = manager.next_tick_delay();
        tokio::select! {
            _ = sleep(tick_delay) => {
                match manager.tick().await {
                    LoopAction::Continue => {}
                    LoopAction::Paused => manager.pause(),
                    LoopAction::Exit => {
                        let _ = manager.finalize_stop().await;
                        return Ok(());
                    }
                }
            }
            Some(msg) = inbound_rx.recv() => {
                handle_inbound(&mut manager, msg, log_handle.as_deref()).await;
            }
            Some(res) = tasks.join_next() => {
                return terminate(res);
            }
        }
    }
}

async fn handle_inbound(manager: &mut Manager, msg: InboundMessage, log_handle: Option<&LogLevelHandle>) {
    let InboundMessage { frame, reply } = msg;
    match frame {
        ParentFrame::Register => {
            manager.send_status_update().await;
        }
        ParentFrame::RequestStatus => {
            manager.send_status_update().await;
        }
        ParentFrame::Pause => {
            manager.pause();
        }
        ParentFrame::Stop => {
            let _ = manager.finalize_stop().await;
        }
        ParentFrame::GetNodes => {
            let result = manager.get_nodes_json().await;
            if let Some(reply) = reply {
                let frame = match result {
                    Ok(json) => ManagerFrame::GetNodesReply(Ok(json)),
                    Err(e) => ManagerFrame::GetNodesReply(Err(e.to_string())),
                };
                let _ = reply.send(frame);
            }
        }
        ParentFrame::RemoveNode { index } => {
            let result = manager.remove_node(index).await;
            if let Some(reply) = reply {
                let msg = match result {
                    Ok(()) => String::new(),
                    Err(e) => e.to_string(),
                };
                let _ = reply.send(ManagerFrame::OpReply(msg));
            }
        }
        ParentFrame::SetFailoverDelay { seconds } => {
            let result = manager.set_failover_delay(seconds as i64).await;
            if let Some(reply) = reply {
                let msg = match result {
                    Ok(()) => String::new(),
                    Err(e) => e.to_string(),
                };
                let _ = reply.send(ManagerFrame::OpReply(msg));
            }
        }
        ParentFrame::LogLevelUp => {
            if let Some(handle) = log_handle {
                handle.up();
            }
        }
        ParentFrame::LogLevelDown => {
            if let Some(handle) = log_handle {
                handle.down();
            }
        }
    }
}

fn terminate(res: Result<Result<(), HaError>, tokio::task::JoinError>) -> Result<(), HaError> {
    match res {
        Ok(Ok(())) => Err(HaError::Fatal("HA manager IPC listener exited unexpectedly".to_string())),
        Ok(Err(e)) => {
            error!("HA manager IPC listener failed: {e}");
            Err(e)
        }
        Err(e) => {
            error!("HA manager IPC listener task panicked: {e}");
            Err(HaError::Fatal(e.to_string()))
        }
    }
}

/// Re-exported so callers only need `node_id::generate_id` once, for tests
/// that want to seed a registry with a pre-existing node.
pub fn new_node_id() -> Result<String, HaError> {
    generate_id()
}
