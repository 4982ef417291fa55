// src/command/template.rs

//! Command templates.
//!
//! Two placeholder styles are understood, and a template may use only one:
//!
//! - positional: `%s` / `%d` consumed left to right, or `%2$s` to pick an
//!   argument by (1-based) number;
//! - named: `%(name)` resolved against a single key/value map. A conversion
//!   letter directly after the closing parenthesis (`%(name)s`) is accepted
//!   and consumed.
//!
//! `%%` is a literal percent sign in both styles.

use std::collections::BTreeMap;

use tracing::warn;

use crate::command::escape::quote;
use crate::command::{Arg, BuildWarning, Escaping};
use crate::errors::{ProcmuxError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conversion {
    Str,
    Int,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Slot {
        index: Option<usize>,
        conv: Conversion,
    },
    Named {
        name: String,
        conv: Conversion,
    },
}

/// Which placeholder style a template uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    /// No placeholders at all.
    Plain,
    Positional,
    Named,
}

/// A parsed command template.
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
    style: Style,
}

/// Values to substitute into a template.
#[derive(Debug, Clone, Copy)]
pub enum Values<'a> {
    Positional(&'a [Arg]),
    Named(Option<&'a BTreeMap<String, Arg>>),
}

impl Template {
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }

            let Some((_, next)) = chars.next() else {
                return Err(ProcmuxError::config(format!(
                    "template `{source}' ends with a lone `%'"
                )));
            };

            let segment = match next {
                '%' => {
                    literal.push('%');
                    continue;
                }
                '(' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == ')' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed || name.is_empty() {
                        return Err(ProcmuxError::config(format!(
                            "malformed format var name at offset {pos} in `{source}'"
                        )));
                    }
                    let conv = match chars.peek() {
                        Some((_, 's')) => {
                            chars.next();
                            Conversion::Str
                        }
                        Some((_, 'd')) => {
                            chars.next();
                            Conversion::Int
                        }
                        _ => Conversion::Str,
                    };
                    Segment::Named { name, conv }
                }
                'd' => Segment::Slot {
                    index: None,
                    conv: Conversion::Int,
                },
                's' => Segment::Slot {
                    index: None,
                    conv: Conversion::Str,
                },
                d if d.is_ascii_digit() => {
                    let mut digits = String::from(d);
                    while let Some((_, c)) = chars.peek().copied() {
                        if !c.is_ascii_digit() {
                            break;
                        }
                        digits.push(c);
                        chars.next();
                    }
                    let conv = match (chars.next(), chars.next()) {
                        (Some((_, '$')), Some((_, 's'))) => Conversion::Str,
                        (Some((_, '$')), Some((_, 'd'))) => Conversion::Int,
                        _ => {
                            return Err(ProcmuxError::config(format!(
                                "malformed numbered placeholder at offset {pos} in `{source}' (expected `%N$s')"
                            )));
                        }
                    };
                    let index: usize = digits.parse().map_err(|_| {
                        ProcmuxError::config(format!("argument number `{digits}' is out of range"))
                    })?;
                    if index == 0 {
                        return Err(ProcmuxError::config(
                            "argument numbers start at 1 (`%0$s' is invalid)",
                        ));
                    }
                    Segment::Slot {
                        index: Some(index),
                        conv,
                    }
                }
                other => {
                    return Err(ProcmuxError::config(format!(
                        "unsupported conversion `%{other}' at offset {pos} in `{source}'"
                    )));
                }
            };

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(segment);
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        let has_named = segments.iter().any(|s| matches!(s, Segment::Named { .. }));
        let has_slots = segments.iter().any(|s| matches!(s, Segment::Slot { .. }));
        let style = match (has_named, has_slots) {
            (true, true) => {
                return Err(ProcmuxError::config(format!(
                    "template `{source}' mixes named `%(name)' and positional placeholders"
                )));
            }
            (true, false) => Style::Named,
            (false, true) => Style::Positional,
            (false, false) => Style::Plain,
        };

        Ok(Self {
            source: source.to_string(),
            segments,
            style,
        })
    }

    pub fn style(&self) -> Style {
        self.style
    }

    /// Number of positional arguments the template consumes: the count of
    /// unnumbered slots or the highest explicit argument number, whichever is
    /// larger.
    pub fn slot_count(&self) -> usize {
        let mut unnumbered = 0;
        let mut highest = 0;
        for seg in &self.segments {
            if let Segment::Slot { index, .. } = seg {
                match index {
                    Some(n) => highest = highest.max(*n),
                    None => unnumbered += 1,
                }
            }
        }
        unnumbered.max(highest)
    }

    /// Substitute `values` into the template.
    ///
    /// Missing values never fail the build: they render as an empty string
    /// and are reported as warnings.
    pub fn render(
        &self,
        values: Values<'_>,
        escaping: Escaping,
        warnings: &mut Vec<BuildWarning>,
    ) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());
        let mut next_slot = 0usize;

        for seg in &self.segments {
            match seg {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot { index, conv } => {
                    let slot = match index {
                        Some(n) => *n,
                        None => {
                            next_slot += 1;
                            next_slot
                        }
                    };
                    let value = match values {
                        Values::Positional(args) => args.get(slot - 1),
                        Values::Named(_) => None,
                    };
                    match value {
                        Some(value) => out.push_str(&render_value(value, *conv, escaping)?),
                        None => {
                            warn!(template = %self.source, slot, "missing argument for placeholder");
                            warnings.push(BuildWarning::MissingArgument(slot));
                        }
                    }
                }
                Segment::Named { name, conv } => {
                    let value = match values {
                        Values::Named(Some(map)) => map.get(name),
                        _ => None,
                    };
                    match value {
                        Some(value) => out.push_str(&render_value(value, *conv, escaping)?),
                        None => {
                            warn!(template = %self.source, name = %name, "unknown format var");
                            warnings.push(BuildWarning::UnknownName(name.clone()));
                        }
                    }
                }
            }
        }

        Ok(out)
    }
}

fn render_value(value: &Arg, conv: Conversion, escaping: Escaping) -> Result<String> {
    if conv == Conversion::Int {
        return Ok(value.as_int().unwrap_or(0).to_string());
    }
    match (value, escaping) {
        (_, Escaping::None) => Ok(value.to_string()),
        (Arg::Str(s), Escaping::Shell) => quote(s),
        (Arg::List(items), Escaping::Shell) => {
            let parts = items
                .iter()
                .map(|item| render_value(item, conv, escaping))
                .collect::<Result<Vec<_>>>()?;
            Ok(parts.join(" "))
        }
        (Arg::Map(map), Escaping::Shell) => {
            let parts = map
                .values()
                .map(|item| render_value(item, conv, escaping))
                .collect::<Result<Vec<_>>>()?;
            Ok(parts.join(" "))
        }
        (Arg::Int(_) | Arg::Bool(_), Escaping::Shell) => Ok(value.to_string()),
    }
}
