// src/command/args.rs

//! Dynamically-typed launch arguments.
//!
//! The launch contract accepts a loose argument list: format values, an
//! optional exit-code specification and an optional options map, in that
//! order. `Arg` is the value type of that list.

use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<Arg>),
    Map(BTreeMap<String, Arg>),
}

impl Arg {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Arg::Bool(b) => Some(*b),
            Arg::Int(n) => Some(*n != 0),
            Arg::Str(s) => match s.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" | "" => Some(false),
                _ => None,
            },
            Arg::List(_) | Arg::Map(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Arg::Int(n) => Some(*n),
            Arg::Bool(b) => Some(i64::from(*b)),
            Arg::Str(s) => s.trim().parse().ok(),
            Arg::List(_) | Arg::Map(_) => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Arg>> {
        match self {
            Arg::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Build a map argument from `(key, value)` pairs.
    pub fn map<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Arg>,
    {
        Arg::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Str(s) => f.write_str(s),
            Arg::Int(n) => write!(f, "{n}"),
            Arg::Bool(b) => f.write_str(if *b { "1" } else { "" }),
            Arg::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Arg::Map(map) => {
                for (i, value) in map.values().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{value}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Str(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Str(s)
    }
}

impl From<&String> for Arg {
    fn from(s: &String) -> Self {
        Arg::Str(s.clone())
    }
}

impl From<i64> for Arg {
    fn from(n: i64) -> Self {
        Arg::Int(n)
    }
}

impl From<i32> for Arg {
    fn from(n: i32) -> Self {
        Arg::Int(i64::from(n))
    }
}

impl From<u32> for Arg {
    fn from(n: u32) -> Self {
        Arg::Int(i64::from(n))
    }
}

impl From<bool> for Arg {
    fn from(b: bool) -> Self {
        Arg::Bool(b)
    }
}

impl<T: Into<Arg>> From<Vec<T>> for Arg {
    fn from(items: Vec<T>) -> Self {
        Arg::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Arg>> for Arg {
    fn from(map: BTreeMap<String, Arg>) -> Self {
        Arg::Map(map)
    }
}

/// Build a `Vec<Arg>` from heterogeneous values.
///
/// ```
/// use procmux::args;
/// let a = args!["hello", 3, vec![0, 1]];
/// assert_eq!(a.len(), 3);
/// ```
#[macro_export]
macro_rules! args {
    () => { ::std::vec::Vec::<$crate::command::Arg>::new() };
    ($($value:expr),+ $(,)?) => {
        vec![$($crate::command::Arg::from($value)),+]
    };
}
