// src/core/ipc/frame.rs

//! The frame catalogue, split by direction so the codec can decode each
//! side against the narrower enum it actually expects.

use crate::core::registry::NodeStatus;

/// Frames sent parent → manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentFrame {
    Register,
    RequestStatus,
    Pause,
    Stop,
    GetNodes,
    RemoveNode { index: u32 },
    SetFailoverDelay { seconds: u32 },
    LogLevelUp,
    LogLevelDown,
}

/// Frames sent manager → parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerFrame {
    StatusUpdate {
        status: NodeStatus,
        failover_delay: i32,
        error: String,
    },
    Heartbeat,
    /// Reply to `GetNodes`: `Ok(json)` or `Err(message)`.
    GetNodesReply(Result<String, String>),
    /// Reply to `RemoveNode`/`SetFailoverDelay`: empty string on success.
    OpReply(String),
}

impl ParentFrame {
    /// The one-byte wire discriminant, matching the declaration order above.
    pub(crate) fn tag(&self) -> u8 {
        match self {
            ParentFrame::Register => 0,
            ParentFrame::RequestStatus => 1,
            ParentFrame::Pause => 2,
            ParentFrame::Stop => 3,
            ParentFrame::GetNodes => 4,
            ParentFrame::RemoveNode { .. } => 5,
            ParentFrame::SetFailoverDelay { .. } => 6,
            ParentFrame::LogLevelUp => 7,
            ParentFrame::LogLevelDown => 8,
        }
    }
}

impl ManagerFrame {
    pub(crate) fn tag(&self) -> u8 {
        match self {
            ManagerFrame::StatusUpdate { .. } => 100,
            ManagerFrame::Heartbeat => 101,
            ManagerFrame::GetNodesReply(_) => 102,
            ManagerFrame::OpReply(_) => 103,
        }
    }
}
