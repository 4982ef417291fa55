// src/result.rs

//! The normalized outcome of a run.

use std::borrow::Cow;
use std::collections::BTreeMap;

/// Produced once, when a pipeline reaches `Done`.
///
/// `channels` holds the captured bytes of every collected descriptor, keyed
/// by alias, minus muted ones. Linked and close-on-creation channels never
/// appear in it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultRecord {
    pub command: String,
    /// Captured stdout, `None` when muted or not collected.
    pub output: Option<Vec<u8>>,
    /// Captured stderr, `None` when not collected.
    pub error: Option<Vec<u8>>,
    /// Raw exit code; signal termination is the negated signal number.
    pub errno: i32,
    /// Same value as `errno`.
    pub return_code: i32,
    pub success: bool,
    /// The run was cut short by an abort request.
    pub aborted: bool,
    pub channels: BTreeMap<String, Vec<u8>>,
    /// Every stage's record in data-flow order, when `all_stages` was asked
    /// for. Empty otherwise.
    pub stages: Vec<ResultRecord>,
}

impl ResultRecord {
    pub fn output_str(&self) -> Cow<'_, str> {
        lossy(self.output.as_deref())
    }

    pub fn error_str(&self) -> Cow<'_, str> {
        lossy(self.error.as_deref())
    }

    pub fn channel(&self, alias: &str) -> Option<&[u8]> {
        self.channels.get(alias).map(Vec::as_slice)
    }

    pub fn channel_str(&self, alias: &str) -> Option<Cow<'_, str>> {
        self.channel(alias).map(String::from_utf8_lossy)
    }
}

fn lossy(bytes: Option<&[u8]>) -> Cow<'_, str> {
    bytes.map(String::from_utf8_lossy).unwrap_or(Cow::Borrowed(""))
}
