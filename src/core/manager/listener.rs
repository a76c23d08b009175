// src/core/manager/listener.rs

//! The manager side of the Parent Notification Channel: accepts the
//! parent's connections over a Unix-domain socket and bridges each one onto
//! the two channels the tick loop already speaks — inbound [`ParentFrame`]s
//! with a reply slot, and outbound [`ManagerFrame`]s it forwards verbatim.
//!
//! The parent opens one persistent connection for notifications (`Register`,
//! followed by `Heartbeat`/`StatusUpdate` pushes for the life of the
//! process) plus a fresh ephemeral connection per `GetNodes`/`RemoveNode`/
//! `SetFailoverDelay` call. Every accepted connection is handled in its own
//! task so an ephemeral request completes without waiting on the persistent
//! one to disconnect. `outbound_rx` has a single logical reader at a time:
//! it is shared behind a lock, and whichever connection task is alive races
//! to drain it — in practice the long-lived notification connection, since
//! ephemeral connections finish and drop out of the race almost immediately.

use crate::core::errors::HaError;
use crate::core::ipc::{FrameCodec, ManagerFrame, ParentFrame};
use futures::{SinkExt, StreamExt};
use std::path::Path;
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::codec::Framed;
use tracing::{info, warn};

/// One inbound admin/IPC message paired with the slot its reply (if any)
/// should be sent to. `Register`/`Pause`/`Stop`/`LogLevel*` carry no reply.
pub struct InboundMessage {
    pub frame: ParentFrame,
    pub reply: Option<oneshot::Sender<ManagerFrame>>,
}

/// Runs the accept loop forever. A send failure to the parent is fatal to the
/// manager, since the parent cannot recover without its notifications, so
/// callers should treat this task exiting as a reason to shut down.
pub async fn run_listener(
    socket_path: &Path,
    inbound_tx: mpsc::Sender<InboundMessage>,
    outbound_rx: mpsc::Receiver<ManagerFrame>,
) -> Result<(), HaError> {
    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path)?;
    info!(path = %socket_path.display(), "HA manager IPC listener bound");

    let outbound_rx = Arc::new(Mutex::new(outbound_rx));

    loop {
        let (socket, _addr) = listener.accept().await?;
        info!("parent connected to HA manager IPC socket");
        let inbound_tx = inbound_tx.clone();
        let outbound_rx = outbound_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, &inbound_tx, outbound_rx).await {
                warn!("HA manager IPC connection ended: {e}");
            }
        });
    }
}

async fn handle_connection(
    socket: UnixStream,
    inbound_tx: &mpsc::Sender<InboundMessage>,
    outbound_rx: Arc<Mutex<mpsc::Receiver<ManagerFrame>>>,
) -> Result<(), HaError> {
    let mut framed = Framed::new(socket, FrameCodec);

    loop {
        tokio::select! {
            frame = framed.next() => {
                let Some(frame) = frame else {
                    return Ok(());
                };
                let frame = frame?;
                let needs_reply = matches!(
                    frame,
                    ParentFrame::GetNodes | ParentFrame::RemoveNode { .. } | ParentFrame::SetFailoverDelay { .. }
                );
                if needs_reply {
                    let (tx, rx) = oneshot::channel();
                    if inbound_tx
                        .send(InboundMessage { frame, reply: Some(tx) })
                        .await
                        .is_err()
                    {
                        return Ok(());
                    }
                    if let Ok(reply) = rx.await {
                        framed.send(reply).await?;
                    }
                    // A request/reply connection closes once served; it
                    // never contends for outbound notifications.
                    return Ok(());
                } else if inbound_tx
                    .send(InboundMessage { frame, reply: None })
                    .await
                    .is_err()
                {
                    return Ok(());
                }
            }
            outbound = async { outbound_rx.lock().await.recv().await } => {
                let Some(outbound) = outbound else {
                    return Ok(());
                };
                // A failed send to the parent is fatal; propagate it so
                // the caller can terminate the manager process.
                framed.send(outbound).await?;
            }
        }
    }
}
