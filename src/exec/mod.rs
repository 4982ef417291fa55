// src/exec/mod.rs

//! Execution surface on top of the engine.
//!
//! - [`backend`] provides the `Launcher` capability interface with a direct
//!   and a shell-escaping implementation.
//! - [`task_runner`] runs a pipeline from async code with cancellation.

pub mod backend;
pub mod task_runner;

pub use backend::{DirectLauncher, Launcher, ShellEscapedLauncher};
pub use task_runner::run_pipeline;
