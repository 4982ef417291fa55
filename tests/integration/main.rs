#[path = "../common/mod.rs"]
mod common;

mod config_files;
mod error_handling;
mod launchers;
