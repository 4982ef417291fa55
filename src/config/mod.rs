// src/config/mod.rs

//! Pipeline files.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a pipeline file from disk and turn it into a [`Pipeline`](crate::pipeline::Pipeline) (`loader.rs`).
//! - Validate stages, exit rules and options (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{ConfigFile, RawConfigFile, RawStage, StageConfig};
