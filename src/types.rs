use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// I/O direction of a descriptor, seen from the child process.
///
/// - `Read`: the child reads from it (stdin-like); the parent writes.
/// - `Write`: the child writes to it (stdout-like); the parent reads.
/// - `Append`: like `Write`, but files are opened in append mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Read,
    Write,
    Append,
}

impl Direction {
    /// True if the child produces data on this descriptor.
    pub fn child_writes(self) -> bool {
        matches!(self, Direction::Write | Direction::Append)
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // fopen-style modes are accepted too; the binary flag is meaningless here.
        match s.trim().to_lowercase().trim_end_matches('b') {
            "r" | "read" => Ok(Direction::Read),
            "w" | "write" => Ok(Direction::Write),
            "a" | "append" => Ok(Direction::Append),
            other => Err(format!(
                "invalid descriptor mode: {other} (expected \"r\", \"w\" or \"a\")"
            )),
        }
    }
}

/// Points in a run where callbacks may be attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventClass {
    /// Fired once per process, right after it was spawned.
    Launch,
    /// Fired every time bytes were drained from one of the process' pipes.
    Read,
    /// Fired once per process with its exit code.
    Close,
}

impl EventClass {
    pub const ALL: [EventClass; 3] = [EventClass::Launch, EventClass::Read, EventClass::Close];

    pub fn as_str(self) -> &'static str {
        match self {
            EventClass::Launch => "launch",
            EventClass::Read => "read",
            EventClass::Close => "close",
        }
    }
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "launch" | "exec" => Ok(EventClass::Launch),
            "read" => Ok(EventClass::Read),
            "close" => Ok(EventClass::Close),
            other => Err(format!("{other}: invalid callback context")),
        }
    }
}
