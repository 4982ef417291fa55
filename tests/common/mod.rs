#![allow(dead_code)]

pub use procmux_test_utils::builders;
pub use procmux_test_utils::recorder;
pub use procmux_test_utils::{init_tracing, with_timeout};

use procmux::{Arg, Process};

/// Build a process from a template, panicking on template errors.
pub fn process(template: &str, args: Vec<Arg>) -> Process {
    Process::new(template, args).expect("template should build")
}

/// A literal shell script; every process already runs under `/bin/sh -c`.
pub fn sh(script: &str) -> Process {
    Process::literal(script)
}
