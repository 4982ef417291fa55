// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::command::Arg;
use crate::descriptor::DescriptorOptions;
use crate::exit::ExitRule;
use crate::process::{Environment, ProcessOptions};

/// Pipeline file as read from TOML, before validation.
///
/// ```toml
/// [options]
/// timeout_secs = 5
///
/// [env]
/// LANG = "C"
///
/// [[stage]]
/// cmd = "/bin/echo %s"
/// args = ["hello"]
///
/// [[stage]]
/// cmd = "/usr/bin/tr a-z A-Z"
/// exits = [0]
/// ```
///
/// Stages are listed in data-flow order; each one's stdout feeds the next
/// one's stdin.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    /// Options shared by every stage. The last stage's copy governs the run.
    #[serde(default)]
    pub options: ProcessOptions,

    /// Variables added to every stage's environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Start from the caller's environment instead of the minimal default.
    #[serde(default)]
    pub inherit_env: bool,

    #[serde(default, rename = "stage")]
    pub stages: Vec<RawStage>,
}

/// One `[[stage]]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStage {
    /// Command template (`%s` or `%(name)` placeholders).
    pub cmd: String,

    /// Format values and, optionally, trailing exit codes or an options table.
    #[serde(default)]
    pub args: Vec<toml::Value>,

    #[serde(default)]
    pub exits: Option<Vec<i32>>,

    /// Regex matched against the decimal exit code.
    #[serde(default)]
    pub exit_pattern: Option<String>,

    #[serde(default)]
    pub priority: Option<i32>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Per-descriptor overrides, keyed by alias or number.
    #[serde(default)]
    pub fd: BTreeMap<String, DescriptorOptions>,

    /// Bytes written to the first stage's stdin.
    #[serde(default)]
    pub input: Option<String>,

    /// Shell-quote substituted values.
    #[serde(default)]
    pub escape: bool,
}

/// A validated pipeline file.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub options: ProcessOptions,
    pub env: Environment,
    pub stages: Vec<StageConfig>,
}

/// A validated stage.
#[derive(Debug, Clone)]
pub struct StageConfig {
    pub cmd: String,
    pub args: Vec<Arg>,
    pub exit_rule: Option<ExitRule>,
    pub priority: Option<i32>,
    pub env: BTreeMap<String, String>,
    pub fd: BTreeMap<String, DescriptorOptions>,
    pub input: Option<String>,
    pub escape: bool,
}

/// Convert a TOML value into a launch argument. Floats and datetimes are
/// passed as their string form.
pub fn arg_from_toml(value: toml::Value) -> Arg {
    match value {
        toml::Value::String(s) => Arg::Str(s),
        toml::Value::Integer(n) => Arg::Int(n),
        toml::Value::Boolean(b) => Arg::Bool(b),
        toml::Value::Float(f) => Arg::Str(f.to_string()),
        toml::Value::Datetime(d) => Arg::Str(d.to_string()),
        toml::Value::Array(items) => Arg::List(items.into_iter().map(arg_from_toml).collect()),
        toml::Value::Table(table) => Arg::Map(
            table
                .into_iter()
                .map(|(k, v)| (k, arg_from_toml(v)))
                .collect(),
        ),
    }
}
