// src/engine/mod.rs

//! The readiness-driven I/O engine.
//!
//! - [`multiplexer`] drives every pipe of a pipeline from one thread.
//! - [`channel`] holds per-pipe state keyed by a stable token.
//! - [`abort`] is the cancellation flag checked once per loop iteration.

pub mod abort;
pub(crate) mod channel;
pub mod multiplexer;

use std::fmt;

pub use abort::AbortSignal;
pub use multiplexer::{CHUNK_SIZE, Multiplexer};

/// Lifecycle of one run: `Idle -> Draining -> Closing -> Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxState {
    /// Stages configured, nothing spawned yet.
    Idle,
    /// Children running; pipes are being drained and forwarded.
    Draining,
    /// Every pipe is closed (or the run was aborted); reaping children.
    Closing,
    /// The result record was assembled.
    Done,
}

impl fmt::Display for MuxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MuxState::Idle => "idle",
            MuxState::Draining => "draining",
            MuxState::Closing => "closing",
            MuxState::Done => "done",
        };
        f.write_str(s)
    }
}
