// src/lib.rs

pub mod cli;
pub mod command;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod exit;
pub mod hooks;
pub mod logging;
pub mod pipeline;
pub mod process;
pub mod result;
pub mod types;

use std::io::Write;

use anyhow::{Context, Result, anyhow};
use tokio::sync::oneshot;
use tracing::{debug, info};

pub use crate::command::{Arg, CommandBuilder, Escaping};
pub use crate::descriptor::{DescriptorKind, DescriptorOptions, DescriptorTable};
pub use crate::engine::AbortSignal;
pub use crate::errors::ProcmuxError;
pub use crate::exit::ExitRule;
pub use crate::hooks::{HookContext, HookEvent, HookId};
pub use crate::pipeline::{Deferred, Launch, Pipeline, StageId};
pub use crate::process::{Environment, Process, ProcessOptions};
pub use crate::result::ResultRecord;
pub use crate::types::{Direction, EventClass};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::exec::run_pipeline;

/// High-level entry point used by `main.rs`. Returns the process exit status
/// for the binary.
///
/// This wires together:
/// - pipeline construction (template + `--pipe` stages, or a TOML file)
/// - command-line overrides
/// - the async runner with Ctrl-C cancellation
/// - relaying the captured output
pub async fn run(args: CliArgs) -> Result<i32> {
    let pipeline = build_pipeline(&args)?;

    if args.dry_run {
        print_dry_run(&pipeline);
        return Ok(0);
    }

    // Ctrl-C → forced termination, partial result.
    let (cancel_tx, cancel_rx) = oneshot::channel();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("failed to listen for Ctrl+C: {e}");
            return;
        }
        let _ = cancel_tx.send(());
    });

    let record = run_pipeline(pipeline, cancel_rx).await?;
    relay(&record, args.mute_stderr)?;

    let status = exit_status(&record);
    info!(
        return_code = record.return_code,
        success = record.success,
        aborted = record.aborted,
        status,
        "pipeline finished"
    );
    Ok(status)
}

fn build_pipeline(args: &CliArgs) -> Result<Pipeline> {
    let builder = if args.escape {
        CommandBuilder::escaping()
    } else {
        CommandBuilder::new()
    };

    let mut pipeline = match (&args.config, &args.template) {
        (Some(path), _) => load_and_validate(path)
            .with_context(|| format!("loading pipeline file {}", path.display()))?
            .to_pipeline()?,
        (None, Some(template)) => {
            let values = args.args.iter().map(Arg::from).collect();
            Pipeline::single(Process::with_builder(&builder, template, values)?)
        }
        (None, None) => return Err(anyhow!("either TEMPLATE or --config is required")),
    };
    for template in &args.pipes {
        pipeline = pipeline.pipe(Process::with_builder(&builder, template, Vec::new())?)?;
    }

    let order = pipeline.order()?;
    let sink = pipeline.sink();
    for (pos, &index) in order.iter().enumerate() {
        let id = StageId::new(index);
        let Some(stage) = pipeline.stage_mut(id) else {
            continue;
        };
        apply_overrides(args, stage)?;
        if pos == 0 {
            if let Some(input) = &args.input {
                stage.set_input(input.as_bytes());
            }
        }
        if Some(id) == sink {
            if !args.exits.is_empty() {
                stage.set_exit_rule(ExitRule::codes(args.exits.iter().copied()));
            }
            if let Some(pattern) = &args.exit_pattern {
                stage.set_exit_rule(ExitRule::pattern(pattern)?);
            }
        }
    }
    Ok(pipeline)
}

fn apply_overrides(args: &CliArgs, stage: &mut Process) -> Result<()> {
    if args.inherit_env {
        let mut env = Environment::inherit();
        env.set_many(stage.env().iter());
        stage.set_env(env);
    }
    stage
        .env_mut()
        .set_many(args.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    if let Some(delta) = args.priority {
        stage.set_priority(delta)?;
    }

    let options = stage.options_mut();
    options.mute_stdout |= args.mute_stdout;
    options.mute_stderr |= args.mute_stderr;
    options.all_stages |= args.all_stages;
    if let Some(secs) = args.timeout {
        if !secs.is_finite() || secs < 0.0 {
            return Err(anyhow!("--timeout must be a non-negative number of seconds"));
        }
        options.timeout_secs = secs.trunc() as u64;
        options.timeout_micros = (secs.fract() * 1_000_000.0).round() as u64;
    }
    Ok(())
}

/// Map a record onto a shell-style exit status.
pub fn exit_status(record: &ResultRecord) -> i32 {
    if record.aborted {
        return 130;
    }
    match record.return_code {
        code if code < 0 => 128 + (-code).min(127),
        code => code.min(255),
    }
}

fn relay(record: &ResultRecord, mute_stderr: bool) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    let mut stderr = std::io::stderr().lock();

    if record.stages.is_empty() {
        write_record(&mut stdout, &mut stderr, record, mute_stderr)?;
    } else {
        for (n, stage) in record.stages.iter().enumerate() {
            writeln!(
                stderr,
                "== stage {n}: {} (exit {}, {})",
                stage.command,
                stage.return_code,
                if stage.success { "ok" } else { "failed" }
            )?;
            write_record(&mut stdout, &mut stderr, stage, mute_stderr)?;
        }
    }
    stdout.flush()?;
    Ok(())
}

fn write_record(
    stdout: &mut impl Write,
    stderr: &mut impl Write,
    record: &ResultRecord,
    mute_stderr: bool,
) -> Result<()> {
    if let Some(output) = &record.output {
        stdout.write_all(output)?;
    }
    if !mute_stderr {
        if let Some(error) = &record.error {
            stderr.write_all(error)?;
        }
    }
    Ok(())
}

/// Simple dry-run output: print stages, links and options.
fn print_dry_run(pipeline: &Pipeline) {
    println!("procmux dry-run");
    if let Some(options) = pipeline.options() {
        println!("  options.run = {}", options.run);
        println!("  options.poll_timeout = {:?}", options.poll_timeout());
        println!("  options.all_stages = {}", options.all_stages);
    }
    println!();

    println!("stages ({}):", pipeline.len());
    for (n, stage) in pipeline.stages().iter().enumerate() {
        println!("  - {n}: {}", stage.command());
        if let Some(rule) = stage.exit_rule() {
            println!("      exits: {rule:?}");
        }
        if let Some(delta) = stage.priority() {
            println!("      priority: {delta}");
        }
        for warning in stage.warnings() {
            println!("      warning: {warning}");
        }
    }
    for link in pipeline.links() {
        println!(
            "  {} fd {} -> {} fd {}",
            link.upstream, link.upstream_fd, link.downstream, link.downstream_fd
        );
    }

    debug!("dry-run complete (no execution)");
}
