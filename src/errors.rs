// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Only configuration, spawn and readiness failures ever reach the caller.
//! `ChannelError`, `CallbackError` and `PriorityError` are built so they can
//! be logged with a consistent message, then dropped: the run continues.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcmuxError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Spawn error: `{program}': unable to open process: {source}")]
    SpawnError {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Readiness wait failed: {0}")]
    ReadinessError(#[source] std::io::Error),

    #[error("Channel error on `{alias}' of `{program}': {source}")]
    ChannelError {
        program: String,
        alias: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Callback error in {event} hook: {message}")]
    CallbackError { event: String, message: String },

    #[error("Priority error: {0}")]
    PriorityError(String),

    #[error("cannot overwrite environment var `{0}'")]
    EnvConflict(String),

    #[error("Unknown descriptor: {0}")]
    UnknownDescriptor(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProcmuxError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        ProcmuxError::ConfigError(msg.into())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ProcmuxError>;
