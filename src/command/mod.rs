// src/command/mod.rs

//! Command building: template substitution plus classification of the
//! trailing launch arguments.
//!
//! - [`template`] parses and renders `%s` / `%(name)` templates.
//! - [`args`] defines the loosely-typed [`Arg`] values of the launch contract.
//! - [`escape`] holds the `shlex`-backed quoting and decomposition helpers.

pub mod args;
pub mod escape;
pub mod template;

use std::collections::BTreeMap;
use std::fmt;

use tracing::warn;

use crate::errors::Result;
use crate::exit::{ExitRule, is_delimited};

pub use args::Arg;
pub use escape::{Decomposed, decompose, program_name, quote};
pub use template::{Style, Template, Values};

/// How substituted values are treated before they are spliced into the
/// command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Escaping {
    /// Values are inserted verbatim.
    #[default]
    None,
    /// String values are shell-quoted, recursively through lists and maps.
    Shell,
}

/// Non-fatal problems found while building a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildWarning {
    /// Positional slot `n` (1-based) had no argument.
    MissingArgument(usize),
    /// `%(name)` had no entry in the supplied map.
    UnknownName(String),
    /// This many trailing arguments were neither format values, an exit
    /// specification nor an options map.
    IgnoredArguments(usize),
    /// An entry of a trailing exit-code list that is not an integer.
    InvalidExitCode(String),
}

impl fmt::Display for BuildWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildWarning::MissingArgument(n) => write!(f, "no argument supplied for placeholder {n}"),
            BuildWarning::UnknownName(name) => write!(f, "unknown format var `{name}'"),
            BuildWarning::IgnoredArguments(n) => write!(f, "{n} additional arguments ignored"),
            BuildWarning::InvalidExitCode(code) => write!(f, "invalid exit code `{code}' ignored"),
        }
    }
}

/// Output of [`CommandBuilder::build`].
#[derive(Debug, Clone)]
pub struct BuiltCommand {
    /// The literal command line.
    pub command: String,
    /// The values that were substituted, in the form they were supplied.
    pub arguments: Vec<Arg>,
    /// Exit-code specification found among the trailing arguments.
    pub exit_rule: Option<ExitRule>,
    /// Options map found among the trailing arguments.
    pub options: Option<BTreeMap<String, Arg>>,
    /// Arguments that were left over and ignored.
    pub residual: Vec<Arg>,
    pub warnings: Vec<BuildWarning>,
}

/// Resolves a template and its argument list into a literal command.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandBuilder {
    escaping: Escaping,
}

impl CommandBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder that shell-quotes every substituted string.
    pub fn escaping() -> Self {
        Self {
            escaping: Escaping::Shell,
        }
    }

    pub fn with_escaping(mut self, escaping: Escaping) -> Self {
        self.escaping = escaping;
        self
    }

    pub fn escaping_mode(&self) -> Escaping {
        self.escaping
    }

    pub fn build(&self, template: &str, args: Vec<Arg>) -> Result<BuiltCommand> {
        let parsed = Template::parse(template)?;
        let mut warnings = Vec::new();
        let mut rest = args;

        let (command, arguments) = match parsed.style() {
            Style::Named => {
                let map = match rest.first() {
                    Some(Arg::Map(_)) => match rest.remove(0) {
                        Arg::Map(map) => Some(map),
                        _ => None,
                    },
                    _ => None,
                };
                let command =
                    parsed.render(Values::Named(map.as_ref()), self.escaping, &mut warnings)?;
                let arguments = map.map(Arg::Map).into_iter().collect();
                (command, arguments)
            }
            Style::Positional => {
                let wanted = parsed.slot_count();
                // A single list argument supplies every format value at once.
                let values: Vec<Arg> = match rest.first() {
                    Some(Arg::List(_)) => match rest.remove(0) {
                        Arg::List(items) => items,
                        other => vec![other],
                    },
                    _ => {
                        let take = wanted.min(rest.len());
                        rest.drain(..take).collect()
                    }
                };
                let command =
                    parsed.render(Values::Positional(&values), self.escaping, &mut warnings)?;
                (command, values)
            }
            Style::Plain => {
                let command = parsed.render(Values::Positional(&[]), self.escaping, &mut warnings)?;
                (command, Vec::new())
            }
        };

        let (exit_rule, options) = classify_trailing(&mut rest, &mut warnings)?;

        if !rest.is_empty() {
            warn!(template, count = rest.len(), "additional arguments ignored");
            warnings.push(BuildWarning::IgnoredArguments(rest.len()));
        }

        Ok(BuiltCommand {
            command,
            arguments,
            exit_rule,
            options,
            residual: rest,
            warnings,
        })
    }
}

/// Pop up to two trailing arguments that are an exit-code specification
/// and/or an options map. Scanning stops at the first value that is neither.
fn classify_trailing(
    rest: &mut Vec<Arg>,
    warnings: &mut Vec<BuildWarning>,
) -> Result<(Option<ExitRule>, Option<BTreeMap<String, Arg>>)> {
    let mut exit_rule = None;
    let mut options: Option<BTreeMap<String, Arg>> = None;

    for _ in 0..2 {
        let Some(last) = rest.pop() else { break };
        match last {
            Arg::List(codes) => exit_rule = Some(exit_codes(&codes, warnings)),
            Arg::Str(ref spec) if is_delimited(spec) => {
                exit_rule = ExitRule::from_delimited(spec).transpose()?;
            }
            Arg::Map(map) => {
                // The earlier map is merged over a later one.
                let mut merged = options.take().unwrap_or_default();
                merged.extend(map);
                options = Some(merged);
            }
            other => {
                rest.push(other);
                break;
            }
        }
    }

    Ok((exit_rule, options))
}

/// Any trailing list is the exit-code set. Entries that are not integers are
/// dropped with a warning; an empty result falls back to `{0}`.
fn exit_codes(codes: &[Arg], warnings: &mut Vec<BuildWarning>) -> ExitRule {
    let mut parsed = Vec::with_capacity(codes.len());
    for code in codes {
        match code.as_int().and_then(|n| i32::try_from(n).ok()) {
            Some(n) => parsed.push(n),
            None => {
                warn!(code = %code, "ignoring invalid exit code");
                warnings.push(BuildWarning::InvalidExitCode(code.to_string()));
            }
        }
    }
    ExitRule::codes(parsed)
}
