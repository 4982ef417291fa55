// src/engine/channel.rs

//! Per-pipe state tracked by the multiplexer.
//!
//! Channels are keyed by the `mio::Token` assigned at registration; removing
//! one never changes the identity of another.

use std::os::fd::RawFd;

use mio::unix::pipe::{Receiver, Sender};

/// Where bytes drained from a read channel go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadSink {
    /// Accumulated under the channel alias for the result record.
    Collect,
    /// Forwarded into link buffer `n`.
    Link(usize),
}

/// A pipe the child writes and the multiplexer reads.
#[derive(Debug)]
pub(crate) struct ReadChannel {
    pub stage: usize,
    pub fd: RawFd,
    pub alias: String,
    pub receiver: Receiver,
    pub sink: ReadSink,
    /// Edge-triggered readiness: set by an event, cleared on `WouldBlock`.
    pub ready: bool,
    pub bytes: u64,
}

/// A pipe the multiplexer writes and the child reads, fed by one link
/// buffer.
#[derive(Debug)]
pub(crate) struct WriteChannel {
    pub stage: usize,
    pub fd: RawFd,
    pub alias: String,
    pub sender: Sender,
    pub link: usize,
    pub ready: bool,
    pub bytes: u64,
}
