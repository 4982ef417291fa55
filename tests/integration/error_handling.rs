use std::io::Write;

use tempfile::NamedTempFile;

use procmux::config::{ConfigFile, load_and_validate};
use procmux::errors::ProcmuxError;

use crate::common::builders::{ConfigFileBuilder, StageBuilder};

fn load(contents: &str) -> Result<ConfigFile, ProcmuxError> {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    load_and_validate(file.path())
}

fn expect_config_error(result: Result<ConfigFile, ProcmuxError>, needle: &str) {
    match result {
        Err(ProcmuxError::ConfigError(msg)) => {
            assert!(msg.contains(needle), "message `{msg}' lacks `{needle}'");
        }
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn empty_file_needs_a_stage() {
    expect_config_error(load(""), "at least one [[stage]]");
}

#[test]
fn unknown_keys_are_toml_errors() {
    let result = load(
        r#"
[[stage]]
cmd = "echo"
retries = 3
"#,
    );
    assert!(matches!(result, Err(ProcmuxError::TomlError(_))));
}

#[test]
fn missing_file_is_an_io_error() {
    let result = load_and_validate("/nonexistent/Procmux.toml");
    assert!(matches!(result, Err(ProcmuxError::IoError(_))));
}

#[test]
fn exits_and_exit_pattern_are_exclusive() {
    let raw = ConfigFileBuilder::new()
        .with_stage(StageBuilder::new("true").exits(&[0]).exit_pattern("0").build())
        .raw();
    expect_config_error(ConfigFile::try_from(raw), "mutually exclusive");
}

#[test]
fn priority_outside_range_is_rejected() {
    let raw = ConfigFileBuilder::new()
        .with_stage(StageBuilder::new("true").priority(25).build())
        .raw();
    expect_config_error(ConfigFile::try_from(raw), "priority 25");
}

#[test]
fn zero_timeout_is_rejected() {
    let raw = ConfigFileBuilder::new()
        .with_timeout(0, 0)
        .with_stage(StageBuilder::new("true").build())
        .raw();
    expect_config_error(ConfigFile::try_from(raw), "cannot both be 0");
}

#[test]
fn input_on_a_later_stage_is_rejected() {
    let raw = ConfigFileBuilder::new()
        .with_stage(StageBuilder::new("echo a").build())
        .with_stage(StageBuilder::new("cat").input("x").build())
        .raw();
    expect_config_error(ConfigFile::try_from(raw), "only the first stage");
}

#[test]
fn malformed_template_is_rejected() {
    let raw = ConfigFileBuilder::new()
        .with_stage(StageBuilder::new("echo %(unterminated").build())
        .raw();
    expect_config_error(ConfigFile::try_from(raw), "stage 0");
}

#[test]
fn unknown_descriptor_override_fails_the_run() {
    let result = load(
        r#"
[[stage]]
cmd = "echo hi"

[stage.fd.nosuch]
close = true
"#,
    )
    .unwrap()
    .to_pipeline()
    .unwrap()
    .run();
    assert!(result.is_err(), "unexpected: {result:?}");
}
