// src/core/logging.rs

//! Structured logging setup plus the reload handle backing the
//! `LogLevelUp`/`LogLevelDown` IPC frames (SPEC_FULL A.5). Grounded on
//! the reload-layer pattern used for the server's own dynamic log level:
//! build an `EnvFilter` behind `tracing_subscriber::reload::Layer`, keep the
//! handle, and swap the filter in place later without restarting the
//! process.

use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

/// The fixed ladder `LogLevelUp`/`LogLevelDown` nudge through, from quietest
/// to loudest.
const LADDER: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

/// Wraps the reload handle with the ladder position, so `LogLevelUp`/`Down`
/// can move by one step without parsing the current filter string back out.
pub struct LogLevelHandle {
    handle: ReloadHandle,
    position: std::sync::atomic::AtomicUsize,
}

impl LogLevelHandle {
    /// Initializes the global subscriber and returns a handle for runtime
    /// adjustment. Call this once, at process start.
    pub fn init(initial_level: &str) -> Self {
        let position = LADDER.iter().position(|&l| l == initial_level).unwrap_or(2);
        let (filter, handle) = reload::Layer::new(EnvFilter::new(initial_level));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
            .init();
        Self {
            handle,
            position: std::sync::atomic::AtomicUsize::new(position),
        }
    }

    pub fn up(&self) {
        self.shift(1);
    }

    pub fn down(&self) {
        self.shift(-1);
    }

    fn shift(&self, delta: isize) {
        use std::sync::atomic::Ordering;
        let current = self.position.load(Ordering::SeqCst) as isize;
        let next = (current + delta).clamp(0, LADDER.len() as isize - 1) as usize;
        self.position.store(next, Ordering::SeqCst);
        let level = LADDER[next];
        if let Err(e) = self.handle.reload(EnvFilter::new(level)) {
            tracing::warn!("failed to reload log level to '{level}': {e}");
        } else {
            tracing::info!("log level changed to '{level}'");
        }
    }
}
