// src/descriptor.rs

//! Per-process descriptor bookkeeping.
//!
//! Every channel handed to a child has a numeric descriptor and an alias
//! (`0`/`stdin`, `1`/`stdout`, ...). The table keeps both lookups in sync:
//! an alias resolves to exactly one descriptor and every descriptor reports
//! exactly one alias. Re-using an alias moves it to the new descriptor with a
//! warning; the descriptor that lost it falls back to its numeric alias.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::os::fd::RawFd;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::warn;

use crate::errors::{ProcmuxError, Result};
use crate::types::Direction;

pub const STDIN: RawFd = 0;
pub const STDOUT: RawFd = 1;
pub const STDERR: RawFd = 2;

/// What backs a descriptor in the child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorKind {
    /// A pipe whose other end is driven by the multiplexer.
    Pipe,
    /// A file opened according to the descriptor's direction.
    File(PathBuf),
}

/// Per-descriptor options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct DescriptorOptions {
    /// Open the pipe and immediately close the parent's end; the child sees a
    /// defined but unusable channel.
    #[serde(default)]
    pub close: bool,
    /// The channel is owned by a pipeline link and is never closed or
    /// surfaced on its own.
    #[serde(skip)]
    pub linked: bool,
}

/// A reference to a descriptor by number or by alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorRef<'a> {
    Fd(RawFd),
    Alias(&'a str),
}

impl fmt::Display for DescriptorRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorRef::Fd(fd) => write!(f, "{fd}"),
            DescriptorRef::Alias(alias) => f.write_str(alias),
        }
    }
}

impl From<RawFd> for DescriptorRef<'_> {
    fn from(fd: RawFd) -> Self {
        DescriptorRef::Fd(fd)
    }
}

impl<'a> From<&'a str> for DescriptorRef<'a> {
    fn from(alias: &'a str) -> Self {
        DescriptorRef::Alias(alias)
    }
}

impl<'a> From<&'a String> for DescriptorRef<'a> {
    fn from(alias: &'a String) -> Self {
        DescriptorRef::Alias(alias.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub fd: RawFd,
    pub alias: String,
    pub kind: DescriptorKind,
    pub direction: Direction,
    pub options: DescriptorOptions,
}

impl Descriptor {
    /// True if the multiplexer reads this channel and its bytes belong in the
    /// caller-visible result.
    pub fn is_collected(&self) -> bool {
        self.kind == DescriptorKind::Pipe
            && self.direction.child_writes()
            && !self.options.close
            && !self.options.linked
    }
}

#[derive(Debug, Clone, Default)]
pub struct DescriptorTable {
    descriptors: BTreeMap<RawFd, Descriptor>,
    aliases: HashMap<String, RawFd>,
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The conventional three channels. Stdin is closed on creation until a
    /// pipeline link or input buffer claims it.
    pub fn standard() -> Self {
        let mut table = Self::new();
        table.define(
            STDIN,
            DescriptorKind::Pipe,
            Direction::Read,
            Some("stdin"),
            DescriptorOptions {
                close: true,
                ..Default::default()
            },
        );
        table.define(
            STDOUT,
            DescriptorKind::Pipe,
            Direction::Write,
            Some("stdout"),
            DescriptorOptions::default(),
        );
        table.define(
            STDERR,
            DescriptorKind::Pipe,
            Direction::Write,
            Some("stderr"),
            DescriptorOptions::default(),
        );
        table
    }

    /// Register (or replace) descriptor `fd`. The alias defaults to the
    /// descriptor number.
    pub fn define(
        &mut self,
        fd: RawFd,
        kind: DescriptorKind,
        direction: Direction,
        alias: Option<&str>,
        options: DescriptorOptions,
    ) -> &mut Self {
        let alias = alias
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| fd.to_string());

        // Forget the alias this descriptor had before.
        if let Some(previous) = self.descriptors.get(&fd) {
            if self.aliases.get(&previous.alias) == Some(&fd) {
                self.aliases.remove(&previous.alias);
            }
        }

        if let Some(&owner) = self.aliases.get(&alias) {
            if owner != fd {
                warn!(
                    alias = %alias,
                    previous_fd = owner,
                    fd,
                    "overwriting alias, previous descriptor loses it"
                );
                if let Some(orphan) = self.descriptors.get_mut(&owner) {
                    orphan.alias = owner.to_string();
                    self.aliases.insert(orphan.alias.clone(), owner);
                }
            }
        }

        self.aliases.insert(alias.clone(), fd);
        self.descriptors.insert(
            fd,
            Descriptor {
                fd,
                alias,
                kind,
                direction,
                options,
            },
        );
        self
    }

    /// Resolve an alias or number to a registered descriptor number.
    pub fn resolve<'a>(&self, r: impl Into<DescriptorRef<'a>>) -> Result<RawFd> {
        let r = r.into();
        let found = match r {
            DescriptorRef::Fd(fd) => self.descriptors.contains_key(&fd).then_some(fd),
            DescriptorRef::Alias(alias) => self.aliases.get(alias).copied().or_else(|| {
                alias
                    .parse::<RawFd>()
                    .ok()
                    .filter(|fd| self.descriptors.contains_key(fd))
            }),
        };
        found.ok_or_else(|| ProcmuxError::UnknownDescriptor(r.to_string()))
    }

    pub fn get<'a>(&self, r: impl Into<DescriptorRef<'a>>) -> Option<&Descriptor> {
        let fd = self.resolve(r).ok()?;
        self.descriptors.get(&fd)
    }

    pub fn alias_of(&self, fd: RawFd) -> Option<&str> {
        self.descriptors.get(&fd).map(|d| d.alias.as_str())
    }

    /// Options of a descriptor; unknown descriptors report the defaults.
    pub fn options<'a>(&self, r: impl Into<DescriptorRef<'a>>) -> DescriptorOptions {
        self.get(r).map(|d| d.options).unwrap_or_default()
    }

    pub fn set_options<'a>(
        &mut self,
        r: impl Into<DescriptorRef<'a>>,
        options: DescriptorOptions,
    ) -> Result<()> {
        let fd = self.resolve(r)?;
        if let Some(d) = self.descriptors.get_mut(&fd) {
            d.options = options;
        }
        Ok(())
    }

    pub fn set_close<'a>(&mut self, r: impl Into<DescriptorRef<'a>>, close: bool) -> Result<()> {
        let fd = self.resolve(r)?;
        if let Some(d) = self.descriptors.get_mut(&fd) {
            d.options.close = close;
        }
        Ok(())
    }

    /// Hand a descriptor's lifecycle to a pipeline link.
    pub(crate) fn mark_linked(&mut self, fd: RawFd) {
        if let Some(d) = self.descriptors.get_mut(&fd) {
            d.options.linked = true;
            d.options.close = false;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_resolves_both_ways() {
        let table = DescriptorTable::standard();
        assert_eq!(table.resolve("stdout").unwrap(), STDOUT);
        assert_eq!(table.resolve(STDERR).unwrap(), STDERR);
        assert_eq!(table.resolve("2").unwrap(), STDERR);
        assert_eq!(table.alias_of(STDIN), Some("stdin"));
        assert!(table.options("stdin").close);
        assert!(!table.options("stdout").close);
    }

    #[test]
    fn unknown_descriptor_is_an_error() {
        let table = DescriptorTable::standard();
        assert!(matches!(
            table.resolve("status"),
            Err(ProcmuxError::UnknownDescriptor(_))
        ));
        assert!(table.resolve(7).is_err());
        assert_eq!(table.options("status"), DescriptorOptions::default());
    }

    #[test]
    fn alias_defaults_to_descriptor_number() {
        let mut table = DescriptorTable::new();
        table.define(3, DescriptorKind::Pipe, Direction::Write, None, Default::default());
        assert_eq!(table.alias_of(3), Some("3"));
        assert_eq!(table.resolve("3").unwrap(), 3);
    }

    #[test]
    fn reused_alias_moves_with_last_write_winning() {
        let mut table = DescriptorTable::standard();
        table.define(
            3,
            DescriptorKind::Pipe,
            Direction::Write,
            Some("stdout"),
            Default::default(),
        );
        assert_eq!(table.resolve("stdout").unwrap(), 3);
        // fd 1 keeps a usable alias, so both lookups still agree.
        assert_eq!(table.alias_of(STDOUT), Some("1"));
        assert_eq!(table.resolve("1").unwrap(), STDOUT);
        for d in table.iter() {
            assert_eq!(table.resolve(d.alias.as_str()).unwrap(), d.fd);
        }
    }

    #[test]
    fn redefining_descriptor_drops_its_old_alias() {
        let mut table = DescriptorTable::standard();
        table.define(
            STDERR,
            DescriptorKind::Pipe,
            Direction::Write,
            Some("errors"),
            Default::default(),
        );
        assert!(table.resolve("stderr").is_err());
        assert_eq!(table.resolve("errors").unwrap(), STDERR);
    }

    #[test]
    fn collected_channels_exclude_closed_and_linked() {
        let mut table = DescriptorTable::standard();
        table.set_close("stderr", true).unwrap();
        table.mark_linked(STDOUT);
        let collected: Vec<_> = table.iter().filter(|d| d.is_collected()).collect();
        assert!(collected.is_empty());
    }
}
