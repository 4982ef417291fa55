// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::command::{CommandBuilder, Escaping};
use crate::config::model::{ConfigFile, RawConfigFile, StageConfig};
use crate::errors::Result;
use crate::pipeline::Pipeline;
use crate::process::Process;

/// Load a pipeline file and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization. Use [`load_and_validate`] for the
/// semantic checks.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a pipeline file from path and validate it.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    debug!(
        path = %path.as_ref().display(),
        stages = config.stages.len(),
        "loaded pipeline file"
    );
    Ok(config)
}

/// `Procmux.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Procmux.toml")
}

impl ConfigFile {
    /// Build every stage and chain them in file order.
    pub fn to_pipeline(&self) -> Result<Pipeline> {
        let processes = self
            .stages
            .iter()
            .map(|stage| self.build_stage(stage))
            .collect::<Result<Vec<_>>>()?;
        Pipeline::chain(processes)
    }

    fn build_stage(&self, stage: &StageConfig) -> Result<Process> {
        let escaping = if stage.escape {
            Escaping::Shell
        } else {
            Escaping::None
        };
        let mut built = CommandBuilder::new()
            .with_escaping(escaping)
            .build(&stage.cmd, stage.args.clone())?;
        // File-level options first, then whatever the arguments carried.
        let inline = built.options.take();
        let mut process = Process::from_built(built)?;
        *process.options_mut() = self.options.clone();
        if let Some(map) = inline {
            process.options_mut().apply_map(&map)?;
        }
        process
            .options_mut()
            .fd
            .extend(stage.fd.iter().map(|(k, v)| (k.clone(), *v)));

        let mut env = self.env.clone();
        env.set_many(stage.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        process.set_env(env);

        if let Some(rule) = &stage.exit_rule {
            process.set_exit_rule(rule.clone());
        }
        if let Some(delta) = stage.priority {
            process.set_priority(delta)?;
        }
        if let Some(input) = &stage.input {
            process.set_input(input.as_bytes());
        }
        Ok(process)
    }
}
