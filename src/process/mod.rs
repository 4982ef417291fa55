// src/process/mod.rs

//! A configured, not-yet-spawned external program.
//!
//! - [`handle`] owns the OS-level spawn and exit-code retrieval.
//! - [`env`] is the environment block handed to the child.
//! - [`options`] is the options map of the launch contract.
//!
//! A [`Process`] is configured (descriptors, environment, callbacks), then
//! handed to a [`Pipeline`] (on its own or chained with others) which spawns
//! and drains it.

pub mod env;
pub mod handle;
pub mod options;

use std::os::fd::RawFd;
use std::path::PathBuf;

use tracing::warn;

use crate::command::{Arg, BuildWarning, BuiltCommand, CommandBuilder, program_name};
use crate::descriptor::{
    DescriptorKind, DescriptorOptions, DescriptorRef, DescriptorTable, STDIN,
};
use crate::errors::Result;
use crate::exit::ExitRule;
use crate::hooks::{EventHooks, HookContext, HookId};
use crate::pipeline::{Launch, Pipeline};
use crate::result::ResultRecord;
use crate::types::{Direction, EventClass};

pub use env::{DEFAULT_PATH, Environment};
pub use handle::{PRIORITY_RANGE, ParentEnd, ParentPipe, ProcessHandle, SpawnSpec};
pub use options::{MIN_POLL_TIMEOUT, ProcessOptions};

/// Identity of a process as seen by hooks and log lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// The literal command line.
    pub command: String,
    /// Basename of the first word of `command`.
    pub program: String,
    /// Set once the process was spawned.
    pub pid: Option<u32>,
    /// Position in the owning pipeline, in data-flow order.
    pub stage: usize,
}

#[derive(Debug)]
pub struct Process {
    pub(crate) info: ProcessInfo,
    arguments: Vec<Arg>,
    env: Environment,
    priority: Option<i32>,
    exit_rule: Option<ExitRule>,
    options: ProcessOptions,
    descriptors: DescriptorTable,
    pub(crate) hooks: EventHooks,
    input: Option<Vec<u8>>,
    warnings: Vec<BuildWarning>,
}

impl Process {
    /// Build the command from `template` and `args` without escaping.
    pub fn new(template: &str, args: Vec<Arg>) -> Result<Self> {
        Self::with_builder(&CommandBuilder::new(), template, args)
    }

    pub fn with_builder(builder: &CommandBuilder, template: &str, args: Vec<Arg>) -> Result<Self> {
        Self::from_built(builder.build(template, args)?)
    }

    /// Use `command` as the literal command line, with no templating.
    pub fn literal(command: impl Into<String>) -> Self {
        Self::blank(command.into())
    }

    /// Adopt the output of a [`CommandBuilder`]: its exit rule and options map
    /// become this process' configuration.
    pub fn from_built(built: BuiltCommand) -> Result<Self> {
        let mut process = Self::blank(built.command);
        process.arguments = built.arguments;
        process.exit_rule = built.exit_rule;
        process.warnings = built.warnings;
        if let Some(map) = built.options {
            process.options.apply_map(&map)?;
        }
        Ok(process)
    }

    fn blank(command: String) -> Self {
        let program = program_name(&command);
        Self {
            info: ProcessInfo {
                command,
                program,
                pid: None,
                stage: 0,
            },
            arguments: Vec::new(),
            env: Environment::default(),
            priority: None,
            exit_rule: None,
            options: ProcessOptions::default(),
            descriptors: DescriptorTable::standard(),
            hooks: EventHooks::new(),
            input: None,
            warnings: Vec::new(),
        }
    }

    pub fn info(&self) -> &ProcessInfo {
        &self.info
    }

    pub fn command(&self) -> &str {
        &self.info.command
    }

    pub fn program(&self) -> &str {
        &self.info.program
    }

    pub fn arguments(&self) -> &[Arg] {
        &self.arguments
    }

    /// Warnings collected while the command was built.
    pub fn warnings(&self) -> &[BuildWarning] {
        &self.warnings
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    pub fn set_env(&mut self, env: Environment) -> &mut Self {
        self.env = env;
        self
    }

    pub fn priority(&self) -> Option<i32> {
        self.priority
    }

    /// Scheduling priority delta applied to the child, in -20..=19.
    pub fn set_priority(&mut self, delta: i32) -> Result<&mut Self> {
        handle::validate_priority(delta)?;
        self.priority = Some(delta);
        Ok(self)
    }

    pub fn exit_rule(&self) -> Option<&ExitRule> {
        self.exit_rule.as_ref()
    }

    pub fn set_exit_rule(&mut self, rule: ExitRule) -> &mut Self {
        self.exit_rule = Some(rule);
        self
    }

    pub fn options(&self) -> &ProcessOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut ProcessOptions {
        &mut self.options
    }

    pub fn descriptors(&self) -> &DescriptorTable {
        &self.descriptors
    }

    pub(crate) fn descriptors_mut(&mut self) -> &mut DescriptorTable {
        &mut self.descriptors
    }

    /// Register (or replace) a channel of the child.
    pub fn define_descriptor(
        &mut self,
        fd: RawFd,
        kind: DescriptorKind,
        direction: Direction,
        alias: Option<&str>,
        options: DescriptorOptions,
    ) -> &mut Self {
        self.descriptors.define(fd, kind, direction, alias, options);
        self
    }

    /// Shorthand for an extra pipe the child writes to, collected under
    /// `alias`.
    pub fn capture(&mut self, fd: RawFd, alias: &str) -> &mut Self {
        self.define_descriptor(
            fd,
            DescriptorKind::Pipe,
            Direction::Write,
            Some(alias),
            DescriptorOptions::default(),
        )
    }

    /// Connect descriptor `fd` to a file.
    pub fn redirect(&mut self, fd: RawFd, path: impl Into<PathBuf>, direction: Direction) -> &mut Self {
        self.define_descriptor(
            fd,
            DescriptorKind::File(path.into()),
            direction,
            None,
            DescriptorOptions::default(),
        )
    }

    pub fn set_descriptor_close<'a>(&mut self, r: impl Into<DescriptorRef<'a>>, close: bool) -> Result<&mut Self> {
        self.descriptors.set_close(r, close)?;
        Ok(self)
    }

    /// Bytes written to the child's stdin. Stdin becomes an open pipe and is
    /// closed once everything was written.
    pub fn set_input(&mut self, data: impl Into<Vec<u8>>) -> &mut Self {
        self.input = Some(data.into());
        if let Err(e) = self.descriptors.set_close(STDIN, false) {
            warn!(program = %self.info.program, error = %e, "stdin not defined, input ignored");
        }
        self
    }

    pub fn input(&self) -> Option<&[u8]> {
        self.input.as_deref()
    }

    pub(crate) fn take_input(&mut self) -> Option<Vec<u8>> {
        self.input.take()
    }

    /// `addCallback(function, eventClass, ...boundArgs)`.
    pub fn add_callback<F>(&mut self, function: F, class: EventClass, bound: Vec<String>) -> HookId
    where
        F: FnMut(&HookContext<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        self.hooks.register(class, function, bound)
    }

    pub fn remove_callback(&mut self, id: HookId) -> bool {
        self.hooks.remove(id)
    }

    pub fn hooks(&self) -> &EventHooks {
        &self.hooks
    }

    /// Push the `fd` entries of the options map onto the descriptor table.
    /// Descriptors owned by a pipeline link keep their link semantics.
    pub(crate) fn apply_descriptor_overrides(&mut self) -> Result<()> {
        let overrides: Vec<_> = self
            .options
            .fd
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        for (descriptor, opts) in overrides {
            let fd = self.descriptors.resolve(descriptor.as_str())?;
            if self.descriptors.options(fd).linked {
                warn!(
                    program = %self.info.program,
                    descriptor = %descriptor,
                    "descriptor is owned by a pipeline link; override ignored"
                );
                continue;
            }
            self.descriptors.set_close(fd, opts.close)?;
        }
        Ok(())
    }

    /// Spawn, drain and close this process on its own. Unlike
    /// [`launch`](Self::launch) this ignores `run: false`.
    pub fn run(self) -> Result<ResultRecord> {
        Pipeline::single(self).run()
    }

    /// Honor the `run` option: spawn now, or hand back a deferred launch.
    pub fn launch(self) -> Result<Launch> {
        Pipeline::single(self).launch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::descriptor::STDOUT;

    #[test]
    fn options_map_from_arguments_is_applied() {
        let process = Process::new(
            "/bin/echo %s",
            args!["x", Arg::map([("run", false), ("mute_stdout", true)])],
        )
        .unwrap();
        assert_eq!(process.command(), "/bin/echo x");
        assert_eq!(process.program(), "echo");
        assert!(!process.options().run);
        assert!(process.options().mute_stdout);
    }

    #[test]
    fn priority_is_validated() {
        let mut process = Process::literal("true");
        assert!(process.set_priority(19).is_ok());
        assert!(process.set_priority(-21).is_err());
        assert_eq!(process.priority(), Some(19));
    }

    #[test]
    fn input_opens_stdin() {
        let mut process = Process::literal("cat");
        assert!(process.descriptors().options("stdin").close);
        process.set_input("abc");
        assert!(!process.descriptors().options("stdin").close);
        assert_eq!(process.input(), Some(&b"abc"[..]));
    }

    #[test]
    fn descriptor_overrides_skip_linked_channels() {
        let mut process = Process::literal("cat");
        process.descriptors_mut().mark_linked(STDOUT);
        process
            .options_mut()
            .fd
            .insert("stdout".into(), DescriptorOptions { close: true, linked: false });
        process
            .options_mut()
            .fd
            .insert("stderr".into(), DescriptorOptions { close: true, linked: false });
        process.apply_descriptor_overrides().unwrap();
        assert!(!process.descriptors().options("stdout").close);
        assert!(process.descriptors().options("stderr").close);
    }

    #[test]
    fn unknown_override_is_an_error() {
        let mut process = Process::literal("cat");
        process
            .options_mut()
            .fd
            .insert("status".into(), DescriptorOptions::default());
        assert!(process.apply_descriptor_overrides().is_err());
    }
}
