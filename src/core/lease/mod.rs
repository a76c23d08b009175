// src/core/lease/mod.rs

//! The Node Lease Engine: stateless decision logic over a snapshot of
//! the node table and the database clock. Nothing in this module performs
//! I/O; every function is a pure transform of its arguments, which is what
//! makes it exhaustively unit-testable and safe to drive from the property
//! tests without a real registry behind it.

pub mod engine;

pub use engine::{
    AdmissionError, ActivePeerOutcome, Role, admit_cluster, admit_standalone, check_active_peer,
    mark_stale_standbys,
};
