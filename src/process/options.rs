// src/process/options.rs

//! Per-run options: the options map of the launch contract.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::command::Arg;
use crate::descriptor::DescriptorOptions;
use crate::errors::{ProcmuxError, Result};

/// Shortest readiness wait the multiplexer will use. A zero timeout would
/// turn the loop into a busy spin.
pub const MIN_POLL_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessOptions {
    /// Spawn immediately (`true`) or hand back a deferred launch.
    #[serde(default = "default_run")]
    pub run: bool,

    /// Keep stderr out of the logs and out of the channel fields.
    #[serde(default)]
    pub mute_stderr: bool,

    /// Drop stdout from the result (`output` becomes `None`).
    #[serde(default)]
    pub mute_stdout: bool,

    /// Readiness wait timeout, whole seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Readiness wait timeout, additional microseconds.
    #[serde(default)]
    pub timeout_micros: u64,

    /// Binary channel mode. Bytes are never translated on Unix, so this only
    /// exists for callers that set it explicitly.
    #[serde(default)]
    pub binary: bool,

    /// Descriptor option overrides keyed by alias or number.
    #[serde(default)]
    pub fd: BTreeMap<String, DescriptorOptions>,

    /// Surface every pipeline stage's result, not only the last one.
    #[serde(default)]
    pub all_stages: bool,

    /// Keys of an options map that no built-in option claimed.
    #[serde(skip)]
    pub extra: BTreeMap<String, Arg>,
}

fn default_run() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    5
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            run: default_run(),
            mute_stderr: false,
            mute_stdout: false,
            timeout_secs: default_timeout_secs(),
            timeout_micros: 0,
            binary: false,
            fd: BTreeMap::new(),
            all_stages: false,
            extra: BTreeMap::new(),
        }
    }
}

impl ProcessOptions {
    /// Readiness wait used by the multiplexer, never below
    /// [`MIN_POLL_TIMEOUT`].
    pub fn poll_timeout(&self) -> Duration {
        let timeout =
            Duration::from_secs(self.timeout_secs) + Duration::from_micros(self.timeout_micros);
        timeout.max(MIN_POLL_TIMEOUT)
    }

    /// Merge a loosely-typed options map over these options.
    ///
    /// Both the snake_case names and their camelCase spellings are accepted,
    /// as are `tv_sec`/`tv_usec`. Unrecognised keys are kept in `extra`.
    pub fn apply_map(&mut self, map: &BTreeMap<String, Arg>) -> Result<()> {
        for (key, value) in map {
            match key.as_str() {
                "run" => self.run = expect_bool(key, value)?,
                "mute_stderr" | "muteStderr" => self.mute_stderr = expect_bool(key, value)?,
                "mute_stdout" | "muteStdout" => self.mute_stdout = expect_bool(key, value)?,
                "timeout_secs" | "timeoutSeconds" | "tv_sec" => {
                    self.timeout_secs = expect_unsigned(key, value)?
                }
                "timeout_micros" | "timeoutMicros" | "tv_usec" => {
                    self.timeout_micros = expect_unsigned(key, value)?
                }
                "binary" | "binaryMode" => self.binary = expect_bool(key, value)?,
                "all_stages" | "allStages" => self.all_stages = expect_bool(key, value)?,
                "fd" => self.apply_fd_map(value)?,
                other => {
                    debug!(option = %other, "keeping unrecognised process option");
                    self.extra.insert(other.to_string(), value.clone());
                }
            }
        }
        Ok(())
    }

    fn apply_fd_map(&mut self, value: &Arg) -> Result<()> {
        let map = value
            .as_map()
            .ok_or_else(|| ProcmuxError::config("option `fd' must be a map keyed by descriptor"))?;
        for (descriptor, opts) in map {
            let opts = opts.as_map().ok_or_else(|| {
                ProcmuxError::config(format!("options for descriptor `{descriptor}' must be a map"))
            })?;
            let entry = self.fd.entry(descriptor.clone()).or_default();
            for (name, v) in opts {
                match name.as_str() {
                    "close" => entry.close = expect_bool(name, v)?,
                    other => {
                        return Err(ProcmuxError::config(format!(
                            "unknown option `{other}' for descriptor `{descriptor}'"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn expect_bool(key: &str, value: &Arg) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| ProcmuxError::config(format!("option `{key}' expects a boolean, got `{value}'")))
}

fn expect_unsigned(key: &str, value: &Arg) -> Result<u64> {
    value
        .as_int()
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| {
            ProcmuxError::config(format!(
                "option `{key}' expects a non-negative integer, got `{value}'"
            ))
        })
}
