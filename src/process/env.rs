// src/process/env.rs

//! Environment block handed to spawned processes.
//!
//! Children never inherit the caller's environment implicitly: they get a
//! minimal block holding only `PATH`, unless [`Environment::inherit`] is used.

use std::collections::BTreeMap;

use crate::errors::{ProcmuxError, Result};

pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/sbin:/bin:/usr/sbin:/usr/bin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            vars: BTreeMap::from([("PATH".to_string(), DEFAULT_PATH.to_string())]),
        }
    }
}

impl Environment {
    /// An empty environment.
    pub fn empty() -> Self {
        Self {
            vars: BTreeMap::new(),
        }
    }

    /// Start from the calling process' environment.
    pub fn inherit() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Add a variable; fails if it is already set.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<&mut Self> {
        let name = name.into();
        if self.vars.contains_key(&name) {
            return Err(ProcmuxError::EnvConflict(name));
        }
        self.vars.insert(name, value.into());
        Ok(self)
    }

    /// Set a variable, overwriting any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Merge many variables, overwriting existing ones.
    pub fn set_many<K, V>(&mut self, vars: impl IntoIterator<Item = (K, V)>) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.vars
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set several variables to the same value.
    pub fn set_all<K: Into<String>>(
        &mut self,
        names: impl IntoIterator<Item = K>,
        value: &str,
    ) -> &mut Self {
        for name in names {
            self.vars.insert(name.into(), value.to_string());
        }
        self
    }

    pub fn unset(&mut self, name: &str) -> &mut Self {
        self.vars.remove(name);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_holds_only_path() {
        let env = Environment::default();
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("PATH"), Some(DEFAULT_PATH));
    }

    #[test]
    fn add_rejects_existing_key_but_set_overwrites() {
        let mut env = Environment::default();
        env.add("LANG", "C").unwrap();
        let err = env.add("LANG", "en_US.UTF-8").unwrap_err();
        assert!(matches!(err, ProcmuxError::EnvConflict(ref k) if k == "LANG"));
        assert_eq!(env.get("LANG"), Some("C"));

        env.set("LANG", "en_US.UTF-8");
        assert_eq!(env.get("LANG"), Some("en_US.UTF-8"));
    }

    #[test]
    fn bulk_operations() {
        let mut env = Environment::empty();
        env.set_many([("A", "1"), ("B", "2")]);
        env.set_all(["C", "D"], "x");
        env.unset("A");
        let keys: Vec<_> = env.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["B", "C", "D"]);
    }
}
