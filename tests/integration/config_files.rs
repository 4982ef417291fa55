use std::io::Write;

use tempfile::NamedTempFile;

use procmux::config::load_and_validate;

use crate::common::builders::{ConfigFileBuilder, StageBuilder};
use crate::common::init_tracing;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn file_stages_run_as_a_pipeline() {
    init_tracing();
    let file = write_config(
        r#"
[options]
timeout_secs = 2

[env]
GREETING = "hi"

[[stage]]
cmd = "/bin/echo %s $GREETING"
args = ["there"]

[[stage]]
cmd = "tr a-z A-Z"
exits = [0]
"#,
    );

    let config = load_and_validate(file.path()).unwrap();
    assert_eq!(config.stages.len(), 2);

    let pipeline = config.to_pipeline().unwrap();
    assert_eq!(pipeline.links().len(), 1);
    let record = pipeline.run().unwrap();
    assert_eq!(record.output_str(), "THERE HI\n");
    assert!(record.success);
}

#[test]
fn inline_options_map_overrides_file_options() {
    init_tracing();
    let file = write_config(
        r#"
[options]
mute_stdout = true

[[stage]]
cmd = "/bin/echo %s"
args = ["shown", { mute_stdout = false }]
"#,
    );

    let record = load_and_validate(file.path())
        .unwrap()
        .to_pipeline()
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(record.output_str(), "shown\n");
}

#[test]
fn stage_exit_pattern_and_input() {
    init_tracing();
    let config = ConfigFileBuilder::new()
        .with_stage(
            StageBuilder::new("sh -c 'cat; exit 7'")
                .input("from file")
                .exit_pattern("^7$")
                .build(),
        )
        .build();

    let record = config.to_pipeline().unwrap().run().unwrap();
    assert_eq!(record.output_str(), "from file");
    assert_eq!(record.return_code, 7);
    assert!(record.success);
}

#[test]
fn named_template_arguments_from_a_table() {
    init_tracing();
    let mut table = toml::map::Map::new();
    table.insert("who".into(), toml::Value::String("world".into()));
    let config = ConfigFileBuilder::new()
        .with_stage(
            StageBuilder::new("/bin/echo hello %(who)s")
                .arg(toml::Value::Table(table))
                .build(),
        )
        .build();

    let record = config.to_pipeline().unwrap().run().unwrap();
    assert_eq!(record.output_str(), "hello world\n");
}

#[test]
fn escaped_stage_quotes_its_values() {
    init_tracing();
    let config = ConfigFileBuilder::new()
        .with_stage(
            StageBuilder::new("/bin/echo %s")
                .arg("two  spaces; echo injected")
                .escape(true)
                .build(),
        )
        .build();

    let record = config.to_pipeline().unwrap().run().unwrap();
    assert_eq!(record.output_str(), "two  spaces; echo injected\n");
}

#[test]
fn stage_env_overrides_file_env() {
    init_tracing();
    let config = ConfigFileBuilder::new()
        .with_env("WHO", "file")
        .with_stage(StageBuilder::new("echo $WHO").env("WHO", "stage").build())
        .build();

    let record = config.to_pipeline().unwrap().run().unwrap();
    assert_eq!(record.output_str(), "stage\n");
}
