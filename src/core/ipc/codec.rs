// src/core/ipc/codec.rs

//! Wire format: `[tag:u8][len:u32 BE][payload; len bytes]`. `tag` identifies
//! the frame per [`ParentFrame::tag`]/[`ManagerFrame::tag`]; `len` covers only
//! the payload. Buffer what's available, bail out with `Ok(None)` until a
//! full frame has arrived, never block inside `decode`.

use super::frame::{ManagerFrame, ParentFrame};
use crate::core::errors::HaError;
use crate::core::registry::NodeStatus;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const HEADER_LEN: usize = 5;
/// A generous ceiling so a corrupt or malicious length prefix can't make the
/// codec try to buffer gigabytes before producing an error.
const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

fn read_header(src: &BytesMut) -> Option<(u8, u32)> {
    if src.len() < HEADER_LEN {
        return None;
    }
    let tag = src[0];
    let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]);
    Some((tag, len))
}

/// Used by the manager's IPC listener: decodes frames sent by the parent,
/// encodes frames sent to it.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = ParentFrame;
    type Error = HaError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((tag, len)) = read_header(src) else {
            return Ok(None);
        };
        if len > MAX_PAYLOAD_LEN {
            return Err(HaError::Protocol(format!("frame payload too large: {len} bytes")));
        }
        if src.len() < HEADER_LEN + len as usize {
            src.reserve(HEADER_LEN + len as usize - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let mut payload = src.split_to(len as usize);

        let frame = match tag {
            0 => ParentFrame::Register,
            1 => ParentFrame::RequestStatus,
            2 => ParentFrame::Pause,
            3 => ParentFrame::Stop,
            4 => ParentFrame::GetNodes,
            5 => {
                require_len(&payload, 4)?;
                ParentFrame::RemoveNode { index: payload.get_u32() }
            }
            6 => {
                require_len(&payload, 4)?;
                ParentFrame::SetFailoverDelay { seconds: payload.get_u32() }
            }
            7 => ParentFrame::LogLevelUp,
            8 => ParentFrame::LogLevelDown,
            other => return Err(HaError::Protocol(format!("unknown parent frame tag {other}"))),
        };
        Ok(Some(frame))
    }
}

impl Encoder<ManagerFrame> for FrameCodec {
    type Error = HaError;

    fn encode(&mut self, item: ManagerFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let tag = item.tag();
        let mut payload = BytesMut::new();
        match item {
            ManagerFrame::StatusUpdate { status, failover_delay, error } => {
                payload.put_i32(status as i32);
                payload.put_i32(failover_delay);
                put_string(&mut payload, &error);
            }
            ManagerFrame::Heartbeat => {}
            ManagerFrame::GetNodesReply(Ok(json)) => {
                payload.put_u8(1);
                put_string(&mut payload, &json);
            }
            ManagerFrame::GetNodesReply(Err(msg)) => {
                payload.put_u8(0);
                put_string(&mut payload, &msg);
            }
            ManagerFrame::OpReply(msg) => {
                put_string(&mut payload, &msg);
            }
        }
        write_header(dst, tag, payload.len());
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

/// Used by the parent-side facade: encodes frames sent to the manager,
/// decodes frames received from it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParentSideCodec;

impl Decoder for ParentSideCodec {
    type Item = ManagerFrame;
    type Error = HaError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((tag, len)) = read_header(src) else {
            return Ok(None);
        };
        if len > MAX_PAYLOAD_LEN {
            return Err(HaError::Protocol(format!("frame payload too large: {len} bytes")));
        }
        if src.len() < HEADER_LEN + len as usize {
            src.reserve(HEADER_LEN + len as usize - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let mut payload = src.split_to(len as usize);

        let frame = match tag {
            100 => {
                require_len(&payload, 8)?;
                let status = payload.get_i32();
                let failover_delay = payload.get_i32();
                let error = get_string(&mut payload)?;
                let status = NodeStatus::from_i32(status)
                    .ok_or_else(|| HaError::Protocol(format!("unknown node status {status}")))?;
                ManagerFrame::StatusUpdate { status, failover_delay, error }
            }
            101 => ManagerFrame::Heartbeat,
            102 => {
                require_len(&payload, 1)?;
                let ok = payload.get_u8() != 0;
                let body = get_string(&mut payload)?;
                ManagerFrame::GetNodesReply(if ok { Ok(body) } else { Err(body) })
            }
            103 => ManagerFrame::OpReply(get_string(&mut payload)?),
            other => return Err(HaError::Protocol(format!("unknown manager frame tag {other}"))),
        };
        Ok(Some(frame))
    }
}

impl Encoder<ParentFrame> for ParentSideCodec {
    type Error = HaError;

    fn encode(&mut self, item: ParentFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let tag = item.tag();
        let mut payload = BytesMut::new();
        match item {
            ParentFrame::RemoveNode { index } => payload.put_u32(index),
            ParentFrame::SetFailoverDelay { seconds } => payload.put_u32(seconds),
            ParentFrame::Register
            | ParentFrame::RequestStatus
            | ParentFrame::Pause
            | ParentFrame::Stop
            | ParentFrame::GetNodes
            | ParentFrame::LogLevelUp
            | ParentFrame::LogLevelDown => {}
        }
        write_header(dst, tag, payload.len());
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

fn write_header(dst: &mut BytesMut, tag: u8, payload_len: usize) {
    dst.reserve(HEADER_LEN + payload_len);
    dst.put_u8(tag);
    dst.put_u32(payload_len as u32);
}

fn put_string(dst: &mut BytesMut, s: &str) {
    dst.put_u32(s.len() as u32);
    dst.extend_from_slice(s.as_bytes());
}

fn get_string(src: &mut BytesMut) -> Result<String, HaError> {
    require_len(src, 4)?;
    let len = src.get_u32() as usize;
    require_len(src, len)?;
    let bytes = src.split_to(len);
    String::from_utf8(bytes.to_vec()).map_err(|e| HaError::Protocol(e.to_string()))
}

fn require_len(src: &BytesMut, n: usize) -> Result<(), HaError> {
    if src.len() < n {
        return Err(HaError::Protocol("truncated frame payload".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_status_update() {
        let mut manager_side = FrameCodec;
        let mut parent_side = ParentSideCodec;
        let mut buf = BytesMut::new();

        let frame = ManagerFrame::StatusUpdate {
            status: NodeStatus::Active,
            failover_delay: 60,
            error: String::new(),
        };
        manager_side.encode(frame.clone(), &mut buf).unwrap();
        let decoded = parent_side.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn round_trips_remove_node() {
        let mut parent_side = ParentSideCodec;
        let mut manager_side = FrameCodec;
        let mut buf = BytesMut::new();

        let frame = ParentFrame::RemoveNode { index: 7 };
        parent_side.encode(frame.clone(), &mut buf).unwrap();
        let decoded = manager_side.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn decode_returns_none_on_partial_frame() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[5, 0, 0, 0]); // header truncated
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn rejects_unknown_tag() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[255, 0, 0, 0, 0]);
        assert!(codec.decode(&mut buf).is_err());
    }
}
