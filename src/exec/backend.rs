// src/exec/backend.rs

//! Launcher capability interface.
//!
//! Wrappers around the core (privilege switching, isolation, batch queues)
//! only ever talk to it through a [`Launcher`]: `configure` turns a template
//! and its arguments into a literal command, `launch` runs it. Each variant
//! composes the core launch contract instead of reaching into the
//! multiplexer.
//!
//! - [`DirectLauncher`] substitutes values verbatim.
//! - [`ShellEscapedLauncher`] shell-quotes every substituted string first.

use tracing::debug;

use crate::command::{Arg, BuiltCommand, CommandBuilder, Escaping};
use crate::errors::Result;
use crate::pipeline::Launch;
use crate::process::{Environment, Process};

pub trait Launcher: Send + Sync {
    /// Resolve `template` and `args` into a literal command.
    fn configure(&self, template: &str, args: Vec<Arg>) -> Result<BuiltCommand>;

    /// Turn a configured command into a process and launch it, honoring the
    /// `run` option.
    fn launch(&self, built: BuiltCommand) -> Result<Launch>;

    /// `run(template, ...args)`.
    fn run(&self, template: &str, args: Vec<Arg>) -> Result<Launch> {
        let built = self.configure(template, args)?;
        self.launch(built)
    }
}

/// The core launch contract with shared per-launcher defaults.
#[derive(Debug, Clone, Default)]
pub struct DirectLauncher {
    builder: CommandBuilder,
    env: Environment,
    priority: Option<i32>,
}

impl DirectLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_env(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    pub fn with_priority(mut self, delta: i32) -> Self {
        self.priority = Some(delta);
        self
    }

    pub fn escaping(&self) -> Escaping {
        self.builder.escaping_mode()
    }

    /// Build the process without launching it.
    pub fn process(&self, built: BuiltCommand) -> Result<Process> {
        let mut process = Process::from_built(built)?;
        process.set_env(self.env.clone());
        if let Some(delta) = self.priority {
            process.set_priority(delta)?;
        }
        Ok(process)
    }
}

impl Launcher for DirectLauncher {
    fn configure(&self, template: &str, args: Vec<Arg>) -> Result<BuiltCommand> {
        self.builder.build(template, args)
    }

    fn launch(&self, built: BuiltCommand) -> Result<Launch> {
        debug!(command = %built.command, "launching");
        self.process(built)?.launch()
    }
}

/// Escapes every string argument for `/bin/sh` before substitution, then
/// delegates to a [`DirectLauncher`].
#[derive(Debug, Clone)]
pub struct ShellEscapedLauncher {
    inner: DirectLauncher,
}

impl ShellEscapedLauncher {
    pub fn new(inner: DirectLauncher) -> Self {
        Self {
            inner: DirectLauncher {
                builder: inner.builder.with_escaping(Escaping::Shell),
                ..inner
            },
        }
    }
}

impl Default for ShellEscapedLauncher {
    fn default() -> Self {
        Self::new(DirectLauncher::new())
    }
}

impl Launcher for ShellEscapedLauncher {
    fn configure(&self, template: &str, args: Vec<Arg>) -> Result<BuiltCommand> {
        self.inner.configure(template, args)
    }

    fn launch(&self, built: BuiltCommand) -> Result<Launch> {
        self.inner.launch(built)
    }
}
