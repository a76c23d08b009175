// src/client/mod.rs

//! The Parent-side Client Facade: the API the embedding server uses to
//! drive the HA manager process and receive its status. Heartbeat
//! monitoring and the standby auto-demotion safety net live here, not in
//! the manager, since they exist to catch a manager that has wedged inside
//! its own database driver.

use crate::core::errors::HaError;
use crate::core::ipc::{ManagerFrame, ParentFrame, ParentSideCodec};
use crate::core::registry::NodeStatus;
use futures::{SinkExt, StreamExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::net::UnixStream;
use tokio::process::Child;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::warn;

/// The manager's reported role, as observed by the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedStatus {
    Unknown,
    Stopped,
    Standby,
    Active,
    Unavailable,
    Error,
}

impl From<NodeStatus> for ReportedStatus {
    fn from(s: NodeStatus) -> Self {
        match s {
            NodeStatus::Stopped => ReportedStatus::Stopped,
            NodeStatus::Standby => ReportedStatus::Standby,
            NodeStatus::Active => ReportedStatus::Active,
            NodeStatus::Unavailable => ReportedStatus::Unavailable,
        }
    }
}

/// The long-lived handle the parent holds onto the manager. `Start` performs
/// the initial connection and handshake; every other operation is a method
/// on this value.
pub struct HaClient {
    socket_path: PathBuf,
    notifications: Framed<UnixStream, ParentSideCodec>,
    child: Option<Child>,
    is_cluster_member: bool,
    failover_delay: i64,
    tick_period: Duration,
    last_heartbeat: Instant,
    believed_status: ReportedStatus,
}

impl HaClient {
    /// Connects to an already-running manager and sends `Register`.
    /// Starting the manager process itself is the embedding server's
    /// responsibility; this facade only owns the IPC side once a socket path
    /// is known.
    pub async fn start(
        socket_path: impl AsRef<Path>,
        is_cluster_member: bool,
        initial_status: ReportedStatus,
        child: Option<Child>,
    ) -> Result<Self, HaError> {
        let socket_path = socket_path.as_ref().to_path_buf();
        let stream = UnixStream::connect(&socket_path).await?;
        let mut notifications = Framed::new(stream, ParentSideCodec);
        notifications.send(ParentFrame::Register).await?;

        Ok(Self {
            socket_path,
            notifications,
            child,
            is_cluster_member,
            failover_delay: 60,
            tick_period: crate::core::manager::worker::TICK_PERIOD,
            last_heartbeat: Instant::now(),
            believed_status: initial_status,
        })
    }

    pub async fn pause(&mut self) -> Result<(), HaError> {
        self.notifications.send(ParentFrame::Pause).await
    }

    pub async fn stop(&mut self) -> Result<(), HaError> {
        self.notifications.send(ParentFrame::Stop).await
    }

    /// Sends SIGKILL-equivalent to the manager process, waits for it to exit,
    /// then closes the IPC socket.
    pub async fn kill(&mut self) -> Result<(), HaError> {
        if let Some(child) = self.child.as_mut() {
            child.start_kill()?;
            let _ = child.wait().await;
        }
        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }

    pub async fn request_status(&mut self) -> Result<(), HaError> {
        self.notifications.send(ParentFrame::RequestStatus).await
    }

    /// Drains all pending frames within `timeout_duration`, tracks
    /// `last_heartbeat`, and returns the most recent status — forcing it to
    /// `standby` if the manager looks wedged.
    pub async fn receive_status(
        &mut self,
        timeout_duration: Duration,
    ) -> (ReportedStatus, Option<String>) {
        let deadline = Instant::now() + timeout_duration;
        let mut last_error = None;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, self.notifications.next()).await {
                Ok(Some(Ok(ManagerFrame::Heartbeat))) => {
                    self.last_heartbeat = Instant::now();
                }
                Ok(Some(Ok(ManagerFrame::StatusUpdate { status, failover_delay, error }))) => {
                    self.last_heartbeat = Instant::now();
                    self.failover_delay = failover_delay as i64;
                    let new_status = status.into();
                    if new_status != self.believed_status {
                        self.believed_status = new_status;
                    }
                    last_error = if error.is_empty() { None } else { Some(error) };
                }
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => {
                    warn!("error decoding HA manager notification: {e}");
                    break;
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }

        (self.apply_heartbeat_safety_net(), last_error)
    }

    /// The client-side safety net: if the parent believes it's
    /// `active`, this is a cluster member, and no heartbeat/status frame has
    /// arrived for `failover_delay - P` seconds, force `standby` regardless
    /// of what the manager last reported.
    fn apply_heartbeat_safety_net(&self) -> ReportedStatus {
        if self.believed_status != ReportedStatus::Active || !self.is_cluster_member {
            return self.believed_status;
        }
        let grace = Duration::from_secs(self.failover_delay.max(0) as u64)
            .saturating_sub(self.tick_period);
        if self.last_heartbeat.elapsed() >= grace {
            ReportedStatus::Standby
        } else {
            self.believed_status
        }
    }

    /// `GetNodes`/`RemoveNode`/`SetFailoverDelay` each open their own
    /// ephemeral connection so they never interleave with the notification
    /// stream.
    async fn ephemeral_request(&self, frame: ParentFrame) -> Result<ManagerFrame, HaError> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let mut conn = Framed::new(stream, ParentSideCodec);
        conn.send(frame).await?;
        conn.next()
            .await
            .ok_or_else(|| HaError::Protocol("HA manager closed connection without replying".to_string()))?
    }

    pub async fn get_nodes(&self) -> Result<String, HaError> {
        match self.ephemeral_request(ParentFrame::GetNodes).await? {
            ManagerFrame::GetNodesReply(Ok(json)) => Ok(json),
            ManagerFrame::GetNodesReply(Err(msg)) => Err(HaError::Fatal(msg)),
            _ => Err(HaError::Protocol("unexpected reply to GetNodes".to_string())),
        }
    }

    pub async fn remove_node(&self, index: u32) -> Result<(), HaError> {
        match self.ephemeral_request(ParentFrame::RemoveNode { index }).await? {
            ManagerFrame::OpReply(msg) if msg.is_empty() => Ok(()),
            ManagerFrame::OpReply(msg) => Err(HaError::Fatal(msg)),
            _ => Err(HaError::Protocol("unexpected reply to RemoveNode".to_string())),
        }
    }

    pub async fn set_failover_delay(&mut self, seconds: u32) -> Result<(), HaError> {
        match self
            .ephemeral_request(ParentFrame::SetFailoverDelay { seconds })
            .await?
        {
            ManagerFrame::OpReply(msg) if msg.is_empty() => {
                self.failover_delay = seconds as i64;
                Ok(())
            }
            ManagerFrame::OpReply(msg) => Err(HaError::Fatal(msg)),
            _ => Err(HaError::Protocol("unexpected reply to SetFailoverDelay".to_string())),
        }
    }

    pub async fn change_log_level(&mut self, up: bool) -> Result<(), HaError> {
        let frame = if up { ParentFrame::LogLevelUp } else { ParentFrame::LogLevelDown };
        self.notifications.send(frame).await
    }
}
