// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `procmux`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "procmux",
    version,
    about = "Run a command or a pipeline of commands and collect a normalized result.",
    long_about = None
)]
pub struct CliArgs {
    /// Command template, e.g. "/bin/echo %s".
    #[arg(value_name = "TEMPLATE", required_unless_present = "config")]
    pub template: Option<String>,

    /// Values substituted into TEMPLATE.
    #[arg(value_name = "ARGS", allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Load the pipeline from a TOML file instead of TEMPLATE.
    #[arg(long, value_name = "PATH", conflicts_with = "template")]
    pub config: Option<PathBuf>,

    /// Append a downstream stage fed by the previous stage's stdout.
    /// May be given several times.
    #[arg(long = "pipe", value_name = "TEMPLATE")]
    pub pipes: Vec<String>,

    /// Exit codes counted as success for the last stage (default: 0).
    #[arg(
        long,
        value_name = "CODES",
        value_delimiter = ',',
        allow_negative_numbers = true,
        conflicts_with = "exit_pattern"
    )]
    pub exits: Vec<i32>,

    /// Regex matched against the last stage's decimal exit code.
    #[arg(long, value_name = "REGEX")]
    pub exit_pattern: Option<String>,

    /// Drop stdout from the result.
    #[arg(long)]
    pub mute_stdout: bool,

    /// Keep stderr out of the logs and the channel fields.
    #[arg(long)]
    pub mute_stderr: bool,

    /// Readiness wait timeout in seconds (fractions allowed).
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<f64>,

    /// Scheduling priority delta for every stage (-20..=19).
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    pub priority: Option<i32>,

    /// Extra environment variable for every stage. May be repeated.
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,

    /// Start from the caller's environment instead of a minimal one.
    #[arg(long)]
    pub inherit_env: bool,

    /// Bytes written to the first stage's stdin.
    #[arg(long, value_name = "TEXT")]
    pub input: Option<String>,

    /// Shell-quote every substituted value.
    #[arg(long)]
    pub escape: bool,

    /// Report every stage, not only the last one.
    #[arg(long)]
    pub all_stages: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PROCMUX_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Build and print the pipeline, but don't execute anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=' in `{s}'"))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in `{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
