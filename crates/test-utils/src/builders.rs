#![allow(dead_code)]

use std::collections::BTreeMap;

use procmux::config::{ConfigFile, RawConfigFile, RawStage};
use procmux::process::ProcessOptions;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                options: ProcessOptions::default(),
                env: BTreeMap::new(),
                inherit_env: false,
                stages: Vec::new(),
            },
        }
    }

    pub fn with_stage(mut self, stage: RawStage) -> Self {
        self.config.stages.push(stage);
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.config.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_timeout(mut self, secs: u64, micros: u64) -> Self {
        self.config.options.timeout_secs = secs;
        self.config.options.timeout_micros = micros;
        self
    }

    pub fn all_stages(mut self, val: bool) -> Self {
        self.config.options.all_stages = val;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `RawStage`.
pub struct StageBuilder {
    stage: RawStage,
}

impl StageBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            stage: RawStage {
                cmd: cmd.to_string(),
                args: vec![],
                exits: None,
                exit_pattern: None,
                priority: None,
                env: BTreeMap::new(),
                fd: BTreeMap::new(),
                input: None,
                escape: false,
            },
        }
    }

    pub fn arg(mut self, value: impl Into<toml::Value>) -> Self {
        self.stage.args.push(value.into());
        self
    }

    pub fn exits(mut self, codes: &[i32]) -> Self {
        self.stage.exits = Some(codes.to_vec());
        self
    }

    pub fn exit_pattern(mut self, pattern: &str) -> Self {
        self.stage.exit_pattern = Some(pattern.to_string());
        self
    }

    pub fn priority(mut self, delta: i32) -> Self {
        self.stage.priority = Some(delta);
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.stage.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn input(mut self, data: &str) -> Self {
        self.stage.input = Some(data.to_string());
        self
    }

    pub fn escape(mut self, val: bool) -> Self {
        self.stage.escape = val;
        self
    }

    pub fn build(self) -> RawStage {
        self.stage
    }
}
