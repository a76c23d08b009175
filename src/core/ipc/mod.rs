// src/core/ipc/mod.rs

//! The Parent Notification Channel: a length-prefixed, ordered, reliable
//! frame protocol carried over a Unix-domain stream, built as a
//! `Decoder`/`Encoder` pair over `tokio_util::codec::Framed` with a small
//! fixed frame catalogue instead of a general-purpose value language, since
//! the manager and its parent only ever exchange the handful of messages
//! enumerated here.

pub mod codec;
pub mod frame;

pub use codec::{FrameCodec, ParentSideCodec};
pub use frame::{ManagerFrame, ParentFrame};
