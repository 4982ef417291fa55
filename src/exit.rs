// src/exit.rs

//! Exit-status evaluation.
//!
//! A rule is either an explicit set of acceptable codes or a regular
//! expression matched against the decimal form of the code. Signal-terminated
//! children report negative codes (`-9` for SIGKILL), so patterns can target
//! them as well.

use std::collections::BTreeSet;
use std::fmt;

use regex::Regex;

use crate::errors::{ProcmuxError, Result};

#[derive(Clone)]
pub enum ExitRule {
    Codes(BTreeSet<i32>),
    Pattern(Regex),
}

impl Default for ExitRule {
    fn default() -> Self {
        ExitRule::Codes(BTreeSet::from([0]))
    }
}

impl fmt::Debug for ExitRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitRule::Codes(codes) => f.debug_tuple("Codes").field(codes).finish(),
            ExitRule::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
        }
    }
}

impl ExitRule {
    /// Accept exactly the given codes. An empty set falls back to `{0}`.
    pub fn codes(codes: impl IntoIterator<Item = i32>) -> Self {
        let codes: BTreeSet<i32> = codes.into_iter().collect();
        if codes.is_empty() {
            return ExitRule::default();
        }
        ExitRule::Codes(codes)
    }

    /// Accept codes whose decimal form matches `pattern`. An empty pattern
    /// falls back to the default rule.
    pub fn pattern(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Ok(ExitRule::default());
        }
        let re = Regex::new(pattern).map_err(|e| {
            ProcmuxError::config(format!("invalid exit pattern `{pattern}': {e}"))
        })?;
        Ok(ExitRule::Pattern(re))
    }

    /// Parse a delimited pattern such as `/^[01]$/` or `#^-?9$#`.
    ///
    /// Returns `None` if `spec` is not bounded by the same character at both
    /// ends.
    pub fn from_delimited(spec: &str) -> Option<Result<Self>> {
        let inner = strip_delimiters(spec)?;
        Some(Self::pattern(inner))
    }

    pub fn is_success(&self, code: i32) -> bool {
        match self {
            ExitRule::Codes(codes) => codes.contains(&code),
            ExitRule::Pattern(re) => re.is_match(&code.to_string()),
        }
    }
}

/// True if `spec` looks like a delimited pattern (same first and last char).
pub(crate) fn is_delimited(spec: &str) -> bool {
    strip_delimiters(spec).is_some()
}

fn strip_delimiters(spec: &str) -> Option<&str> {
    let mut chars = spec.chars();
    let first = chars.next()?;
    let last = chars.next_back()?;
    if first != last || first.is_alphanumeric() || first.is_whitespace() {
        return None;
    }
    Some(&spec[first.len_utf8()..spec.len() - last.len_utf8()])
}

/// Free-function form of [`ExitRule::is_success`]; `None` means the default
/// rule (only `0` succeeds).
pub fn is_success(code: i32, rule: Option<&ExitRule>) -> bool {
    match rule {
        Some(rule) => rule.is_success(code),
        None => code == 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rule_accepts_only_zero() {
        let rule = ExitRule::default();
        assert!(rule.is_success(0));
        assert!(!rule.is_success(1));
        assert!(!rule.is_success(-1));
        assert!(is_success(0, None));
        assert!(!is_success(1, None));
    }

    #[test]
    fn explicit_code_set() {
        let rule = ExitRule::codes([2, 3, 4]);
        assert!(rule.is_success(3));
        assert!(!rule.is_success(0));
    }

    #[test]
    fn empty_rules_never_mean_always_success() {
        assert!(!ExitRule::codes(Vec::new()).is_success(1));
        assert!(!ExitRule::pattern("").unwrap().is_success(1));
        assert!(ExitRule::pattern("").unwrap().is_success(0));
    }

    #[test]
    fn delimited_pattern_supports_negative_codes() {
        let rule = ExitRule::from_delimited("/^-?9$/").unwrap().unwrap();
        assert!(rule.is_success(-9));
        assert!(rule.is_success(9));
        assert!(!rule.is_success(19));
    }

    #[test]
    fn undelimited_strings_are_not_patterns() {
        assert!(ExitRule::from_delimited("hello").is_none());
        assert!(ExitRule::from_delimited("/").is_none());
        assert!(is_delimited("'a b'"));
        assert!(!is_delimited("abca"));
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let err = ExitRule::pattern("(").unwrap_err();
        assert!(matches!(err, ProcmuxError::ConfigError(_)));
    }
}
