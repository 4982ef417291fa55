// src/config/validate.rs

use crate::command::Template;
use crate::config::model::{ConfigFile, RawConfigFile, RawStage, StageConfig, arg_from_toml};
use crate::errors::{ProcmuxError, Result};
use crate::exit::ExitRule;
use crate::process::{Environment, PRIORITY_RANGE};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = ProcmuxError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_stages(&raw)?;
        validate_options(&raw)?;

        let mut env = if raw.inherit_env {
            Environment::inherit()
        } else {
            Environment::default()
        };
        env.set_many(raw.env);

        let stages = raw
            .stages
            .into_iter()
            .enumerate()
            .map(|(n, stage)| validate_stage(n, stage))
            .collect::<Result<Vec<_>>>()?;

        if stages.iter().skip(1).any(|s| s.input.is_some()) {
            return Err(ProcmuxError::config(
                "only the first stage may have `input`; later stages read the previous stage",
            ));
        }

        Ok(ConfigFile {
            options: raw.options,
            env,
            stages,
        })
    }
}

fn ensure_has_stages(cfg: &RawConfigFile) -> Result<()> {
    if cfg.stages.is_empty() {
        return Err(ProcmuxError::config(
            "config must contain at least one [[stage]] section",
        ));
    }
    Ok(())
}

fn validate_options(cfg: &RawConfigFile) -> Result<()> {
    if cfg.options.timeout_secs == 0 && cfg.options.timeout_micros == 0 {
        return Err(ProcmuxError::config(
            "[options] timeout_secs and timeout_micros cannot both be 0",
        ));
    }
    Ok(())
}

fn validate_stage(n: usize, raw: RawStage) -> Result<StageConfig> {
    if raw.cmd.trim().is_empty() {
        return Err(ProcmuxError::config(format!("stage {n} has an empty `cmd`")));
    }
    Template::parse(&raw.cmd)
        .map_err(|e| ProcmuxError::config(format!("stage {n}: {e}")))?;

    if let Some(delta) = raw.priority {
        if !PRIORITY_RANGE.contains(&delta) {
            return Err(ProcmuxError::config(format!(
                "stage {n}: priority {delta} out of range (expected -20..=19)"
            )));
        }
    }

    let exit_rule = match (raw.exits, raw.exit_pattern) {
        (Some(_), Some(_)) => {
            return Err(ProcmuxError::config(format!(
                "stage {n}: `exits` and `exit_pattern` are mutually exclusive"
            )));
        }
        (Some(codes), None) => Some(ExitRule::codes(codes)),
        (None, Some(pattern)) => Some(ExitRule::pattern(&pattern)?),
        (None, None) => None,
    };

    Ok(StageConfig {
        cmd: raw.cmd,
        args: raw.args.into_iter().map(arg_from_toml).collect(),
        exit_rule,
        priority: raw.priority,
        env: raw.env,
        fd: raw.fd,
        input: raw.input,
        escape: raw.escape,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Result<ConfigFile> {
        let raw: RawConfigFile = toml::from_str(src)?;
        ConfigFile::try_from(raw)
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let cfg = parse(
            r#"
[[stage]]
cmd = "/bin/echo %s"
args = ["hi"]
"#,
        )
        .unwrap();
        assert_eq!(cfg.stages.len(), 1);
        assert!(cfg.options.run);
        assert_eq!(cfg.env.get("PATH"), Some(crate::process::DEFAULT_PATH));
        assert!(cfg.stages[0].exit_rule.is_none());
    }

    #[test]
    fn empty_file_is_rejected() {
        let err = parse("").unwrap_err();
        assert!(err.to_string().contains("at least one [[stage]]"));
    }

    #[test]
    fn exits_and_pattern_are_exclusive() {
        let err = parse(
            r#"
[[stage]]
cmd = "true"
exits = [0, 1]
exit_pattern = "^0$"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn bad_priority_and_template_are_rejected() {
        assert!(parse("[[stage]]\ncmd = \"true\"\npriority = 30\n").is_err());
        assert!(parse("[[stage]]\ncmd = \"echo %s %(x)\"\n").is_err());
        assert!(parse("[[stage]]\ncmd = \"  \"\n").is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = parse("[options]\ntimeout_secs = 0\n[[stage]]\ncmd = \"true\"\n").unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn input_only_on_first_stage() {
        let err = parse(
            r#"
[[stage]]
cmd = "cat"
[[stage]]
cmd = "cat"
input = "x"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("input"));
    }
}
