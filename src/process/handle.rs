// src/process/handle.rs

//! OS-level process handle.
//!
//! `ProcessHandle::spawn` runs a literal command through `/bin/sh -c` with a
//! cleared environment and one channel per descriptor-table entry. The
//! parent's ends of every pipe are handed back as non-blocking `mio` pipes for
//! the multiplexer; close-on-creation pipes are dropped before `spawn`
//! returns.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus, Stdio};

use mio::unix::pipe::{self, Receiver, Sender};
use tracing::{debug, warn};

use crate::descriptor::{Descriptor, DescriptorKind, DescriptorTable, STDERR, STDIN, STDOUT};
use crate::errors::{ProcmuxError, Result};
use crate::types::Direction;

use super::env::Environment;

/// Valid scheduling priority deltas.
pub const PRIORITY_RANGE: std::ops::RangeInclusive<i32> = -20..=19;

/// Everything needed to start one child.
#[derive(Debug, Clone, Copy)]
pub struct SpawnSpec<'a> {
    pub command: &'a str,
    pub program: &'a str,
    pub env: &'a Environment,
    pub descriptors: &'a DescriptorTable,
    pub priority: Option<i32>,
}

/// The parent's side of one pipe.
#[derive(Debug)]
pub enum ParentEnd {
    /// The child writes, the parent reads.
    Read(Receiver),
    /// The child reads, the parent writes.
    Write(Sender),
}

#[derive(Debug)]
pub struct ParentPipe {
    pub fd: RawFd,
    pub alias: String,
    pub end: ParentEnd,
}

/// A running (or reaped) child process.
///
/// `close` is idempotent: the exit code is cached after the first call and
/// the OS handle is released exactly once. Dropping a handle that was never
/// closed kills and reaps the child.
#[derive(Debug)]
pub struct ProcessHandle {
    program: String,
    pid: u32,
    child: Option<Child>,
    exit_code: Option<i32>,
}

impl ProcessHandle {
    pub fn spawn(spec: SpawnSpec<'_>) -> Result<(Self, Vec<ParentPipe>)> {
        if let Some(delta) = spec.priority {
            validate_priority(delta)?;
        }

        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(spec.command)
            .env_clear()
            .envs(spec.env.iter());

        // Standard channels go through std's own plumbing.
        let stdin = standard_stdio(spec.descriptors.get(STDIN), STDIN)?;
        let stdout = standard_stdio(spec.descriptors.get(STDOUT), STDOUT)?;
        let stderr = standard_stdio(spec.descriptors.get(STDERR), STDERR)?;
        cmd.stdin(stdin).stdout(stdout).stderr(stderr);

        // Extra channels are dup2'ed into place after fork.
        let extras = ExtraDescriptors::open(spec.descriptors)?;
        let moves = extras.moves();
        let priority = spec.priority;
        // SAFETY: the closure only calls async-signal-safe libc functions
        // (`dup2`, `nice`) and does not allocate.
        unsafe {
            cmd.pre_exec(move || {
                for &(source, target) in &moves {
                    if libc::dup2(source, target) == -1 {
                        return Err(io::Error::last_os_error());
                    }
                }
                if let Some(delta) = priority {
                    // Checked from the parent after spawn.
                    libc::nice(delta);
                }
                Ok(())
            });
        }

        let mut child = cmd.spawn().map_err(|source| ProcmuxError::SpawnError {
            program: spec.program.to_string(),
            source,
        })?;
        let pid = child.id();
        debug!(program = %spec.program, pid, command = %spec.command, "spawned process");

        if let Some(delta) = priority {
            check_priority(spec.program, pid, delta);
        }

        let mut pipes = Vec::new();
        let taken = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let handle = Self {
            program: spec.program.to_string(),
            pid,
            child: Some(child),
            exit_code: None,
        };

        if let (Some(stdin), Some(d)) = (taken.0, spec.descriptors.get(STDIN)) {
            keep_or_close(&mut pipes, d, || Ok(ParentEnd::Write(nonblocking_sender(Sender::from(stdin))?)))?;
        }
        if let (Some(stdout), Some(d)) = (taken.1, spec.descriptors.get(STDOUT)) {
            keep_or_close(&mut pipes, d, || Ok(ParentEnd::Read(nonblocking_receiver(Receiver::from(stdout))?)))?;
        }
        if let (Some(stderr), Some(d)) = (taken.2, spec.descriptors.get(STDERR)) {
            keep_or_close(&mut pipes, d, || Ok(ParentEnd::Read(nonblocking_receiver(Receiver::from(stderr))?)))?;
        }
        // Child ends are dropped here, so the parent holds only its own side.
        pipes.extend(extras.into_parent_pipes());

        Ok((handle, pipes))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Non-blocking liveness check. A child found to have exited is reaped
    /// and its exit code cached for [`close`](Self::close).
    pub fn is_running(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.exit_code = Some(exit_code(status));
                self.child = None;
                false
            }
            Err(e) => {
                warn!(program = %self.program, pid = self.pid, error = %e, "failed to query process status");
                false
            }
        }
    }

    /// Wait for the child and return its exit code. Signal termination is
    /// reported as the negated signal number.
    pub fn close(&mut self) -> i32 {
        if let Some(mut child) = self.child.take() {
            let code = match child.wait() {
                Ok(status) => exit_code(status),
                Err(e) => {
                    warn!(program = %self.program, pid = self.pid, error = %e, "failed to wait for process");
                    -1
                }
            };
            debug!(program = %self.program, pid = self.pid, exit_code = code, "process closed");
            self.exit_code = Some(code);
        }
        self.exit_code.unwrap_or(-1)
    }

    /// Forced termination: SIGKILL, then reap.
    pub fn kill(&mut self) -> i32 {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.kill() {
                // Already exited; `close` still reaps it.
                debug!(program = %self.program, pid = self.pid, error = %e, "kill failed");
            }
        }
        self.close()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn is_closed(&self) -> bool {
        self.child.is_none()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.child.is_some() {
            warn!(program = %self.program, pid = self.pid, "process handle dropped while open; killing");
            self.kill();
        }
    }
}

pub(crate) fn validate_priority(delta: i32) -> Result<()> {
    if PRIORITY_RANGE.contains(&delta) {
        Ok(())
    } else {
        Err(ProcmuxError::config(format!(
            "priority {delta} out of range (expected -20..=19)"
        )))
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signo| -signo))
        .unwrap_or(-1)
}

fn check_priority(program: &str, pid: u32, delta: i32) {
    // SAFETY: plain syscalls without pointer arguments.
    let (ours, theirs) = unsafe {
        (
            libc::getpriority(libc::PRIO_PROCESS, 0),
            libc::getpriority(libc::PRIO_PROCESS, pid as libc::id_t),
        )
    };
    let expected = (ours + delta).clamp(*PRIORITY_RANGE.start(), *PRIORITY_RANGE.end());
    // -1 is also the error return; a child that already exited cannot be
    // checked, so only a definite mismatch is reported.
    if theirs != expected && theirs != -1 {
        let err = ProcmuxError::PriorityError(format!(
            "requested delta {delta}, child runs at {theirs} (expected {expected})"
        ));
        warn!(program = %program, pid, error = %err, "priority not applied");
    }
}

fn standard_stdio(descriptor: Option<&Descriptor>, fd: RawFd) -> Result<Stdio> {
    let Some(d) = descriptor else {
        return Ok(Stdio::null());
    };
    let child_reads = fd == STDIN;
    if child_reads == d.direction.child_writes() {
        return Err(ProcmuxError::config(format!(
            "descriptor {fd} (`{}') has the wrong direction {:?}",
            d.alias, d.direction
        )));
    }
    match &d.kind {
        DescriptorKind::Pipe => Ok(Stdio::piped()),
        DescriptorKind::File(_) => Ok(Stdio::from(open_file(d)?)),
    }
}

fn open_file(d: &Descriptor) -> Result<File> {
    let DescriptorKind::File(path) = &d.kind else {
        return Err(ProcmuxError::config(format!("descriptor `{}' is not a file", d.alias)));
    };
    let mut opts = OpenOptions::new();
    match d.direction {
        Direction::Read => opts.read(true),
        Direction::Write => opts.write(true).create(true).truncate(true),
        Direction::Append => opts.append(true).create(true),
    };
    opts.open(path).map_err(|e| {
        ProcmuxError::config(format!(
            "cannot open `{}' for descriptor `{}': {e}",
            path.display(),
            d.alias
        ))
    })
}

fn keep_or_close(
    pipes: &mut Vec<ParentPipe>,
    d: &Descriptor,
    end: impl FnOnce() -> Result<ParentEnd>,
) -> Result<()> {
    if d.options.close {
        debug!(fd = d.fd, alias = %d.alias, "closing descriptor on creation");
        return Ok(());
    }
    pipes.push(ParentPipe {
        fd: d.fd,
        alias: d.alias.clone(),
        end: end()?,
    });
    Ok(())
}

fn nonblocking_sender(sender: Sender) -> Result<Sender> {
    sender.set_nonblocking(true)?;
    Ok(sender)
}

fn nonblocking_receiver(receiver: Receiver) -> Result<Receiver> {
    receiver.set_nonblocking(true)?;
    Ok(receiver)
}

/// Child-side descriptors 3 and up, moved above every target number so the
/// `dup2` sequence in the child can never clobber a source.
struct ExtraDescriptors {
    entries: Vec<ExtraEntry>,
}

struct ExtraEntry {
    target: RawFd,
    alias: String,
    child_end: OwnedFd,
    parent_end: Option<ParentEnd>,
}

impl ExtraDescriptors {
    fn open(table: &DescriptorTable) -> Result<Self> {
        let floor = table.iter().map(|d| d.fd).max().unwrap_or(STDERR).max(STDERR) + 1;
        let mut entries = Vec::new();

        for d in table.iter().filter(|d| d.fd > STDERR) {
            let (child_end, parent_end) = match &d.kind {
                DescriptorKind::File(_) => (OwnedFd::from(open_file(d)?), None),
                DescriptorKind::Pipe => {
                    let (sender, receiver) = pipe::new()?;
                    if d.direction.child_writes() {
                        receiver.set_nonblocking(true)?;
                        (blocking_fd(sender.into_raw_fd())?, Some(ParentEnd::Read(receiver)))
                    } else {
                        sender.set_nonblocking(true)?;
                        (blocking_fd(receiver.into_raw_fd())?, Some(ParentEnd::Write(sender)))
                    }
                }
            };
            let parent_end = if d.options.close { None } else { parent_end };
            entries.push(ExtraEntry {
                target: d.fd,
                alias: d.alias.clone(),
                child_end: dup_above(child_end, floor)?,
                parent_end,
            });
        }
        Ok(Self { entries })
    }

    fn moves(&self) -> Vec<(RawFd, RawFd)> {
        self.entries
            .iter()
            .map(|e| (e.child_end.as_raw_fd(), e.target))
            .collect()
    }

    fn into_parent_pipes(self) -> impl Iterator<Item = ParentPipe> {
        self.entries.into_iter().filter_map(|e| {
            e.parent_end.map(|end| ParentPipe {
                fd: e.target,
                alias: e.alias,
                end,
            })
        })
    }
}

fn blocking_fd(raw: RawFd) -> Result<OwnedFd> {
    // SAFETY: `raw` was just released by a mio pipe and is owned by nobody else.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    let file = File::from(fd);
    // SAFETY: F_GETFL/F_SETFL on a valid descriptor.
    unsafe {
        let flags = libc::fcntl(file.as_raw_fd(), libc::F_GETFL);
        if flags == -1 || libc::fcntl(file.as_raw_fd(), libc::F_SETFL, flags & !libc::O_NONBLOCK) == -1 {
            return Err(io::Error::last_os_error().into());
        }
    }
    Ok(OwnedFd::from(file))
}

fn dup_above(fd: OwnedFd, floor: RawFd) -> Result<OwnedFd> {
    // SAFETY: duplicating a valid descriptor; the result is owned below.
    let raw = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_DUPFD_CLOEXEC, floor) };
    if raw == -1 {
        return Err(io::Error::last_os_error().into());
    }
    // SAFETY: `raw` is a fresh descriptor returned by fcntl.
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}
