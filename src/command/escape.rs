// src/command/escape.rs

//! Shell quoting and command decomposition, both backed by `shlex`.

use crate::errors::{ProcmuxError, Result};

/// Quote `value` for safe inclusion in a `/bin/sh` command line.
pub fn quote(value: &str) -> Result<String> {
    shlex::try_quote(value)
        .map(|quoted| quoted.into_owned())
        .map_err(|e| ProcmuxError::config(format!("cannot escape argument {value:?}: {e}")))
}

/// A literal command split into program and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decomposed {
    pub program: String,
    pub args: Vec<String>,
}

/// Break a full command line into its program and arguments, honoring shell
/// quoting and backslash escapes.
///
/// Returns `None` for an empty command or unbalanced quotes.
pub fn decompose(cmd: &str) -> Option<Decomposed> {
    let mut words = shlex::split(cmd.trim())?.into_iter();
    let program = words.next()?;
    Some(Decomposed {
        program,
        args: words.collect(),
    })
}

/// Basename of the first word of `cmd`, used to name a process in logs.
pub fn program_name(cmd: &str) -> String {
    let first = cmd.split_whitespace().next().unwrap_or("");
    first.rsplit('/').next().unwrap_or(first).to_string()
}
