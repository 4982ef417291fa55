mod common;
use crate::common::recorder::{HookRecorder, Recorded};
use crate::common::{init_tracing, process, sh};

use std::sync::{Arc, Mutex};

use procmux::{Arg, EventClass, ExitRule, Launch, Process, args};

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[test]
fn echo_collects_stdout_and_succeeds() -> TestResult {
    init_tracing();
    let record = process("/bin/echo %s", args!["hello"]).run()?;

    assert_eq!(record.command, "/bin/echo hello");
    assert_eq!(record.output.as_deref(), Some(&b"hello\n"[..]));
    assert_eq!(record.error.as_deref(), Some(&b""[..]));
    assert_eq!(record.return_code, 0);
    assert_eq!(record.errno, 0);
    assert!(record.success);
    assert!(!record.aborted);
    assert_eq!(record.channel_str("stdout").as_deref(), Some("hello\n"));
    Ok(())
}

#[test]
fn non_zero_exit_is_reported_as_failure() -> TestResult {
    init_tracing();
    let record = Process::literal("/bin/sh -c 'echo oops >&2; exit 1'").run()?;

    assert_eq!(record.return_code, 1);
    assert!(!record.success);
    assert_eq!(record.error_str(), "oops\n");
    Ok(())
}

#[test]
fn exit_code_set_from_trailing_list() -> TestResult {
    init_tracing();
    let record = process("/bin/sh -c 'exit 3'", vec![Arg::from(vec![2, 3, 4])]).run()?;
    assert_eq!(record.return_code, 3);
    assert!(record.success);

    let record = process("/bin/sh -c 'exit 5'", vec![Arg::from(vec![2, 3, 4])]).run()?;
    assert!(!record.success);
    Ok(())
}

#[test]
fn exit_pattern_matches_decimal_code() -> TestResult {
    init_tracing();
    let mut p = sh("exit 12");
    p.set_exit_rule(ExitRule::pattern("^1[0-9]$")?);
    let record = p.run()?;
    assert_eq!(record.return_code, 12);
    assert!(record.success);
    Ok(())
}

#[test]
fn signal_termination_gives_negative_code() -> TestResult {
    init_tracing();
    let record = Process::literal("kill -9 $$").run()?;
    assert_eq!(record.return_code, -9);
    assert!(!record.success);
    Ok(())
}

#[test]
fn closed_stdin_gives_immediate_eof() -> TestResult {
    init_tracing();
    let record = process("/bin/cat", args![]).run()?;

    // stdin is closed on creation, so cat sees EOF immediately.
    assert_eq!(record.return_code, 0);
    assert!(!record.channels.contains_key("stdin"));
    assert!(record.channels.contains_key("stdout"));
    assert!(record.channels.contains_key("stderr"));
    Ok(())
}

#[test]
fn input_bytes_reach_stdin() -> TestResult {
    init_tracing();
    let mut p = process("/bin/cat", args![]);
    p.set_input(&b"fed through stdin"[..]);
    let record = p.run()?;
    assert_eq!(record.output_str(), "fed through stdin");
    Ok(())
}

#[test]
fn extra_descriptor_is_collected_under_its_alias() -> TestResult {
    init_tracing();
    let mut p = sh("echo side >&3; echo main");
    p.capture(3, "side");
    let record = p.run()?;

    assert_eq!(record.output_str(), "main\n");
    assert_eq!(record.channel_str("side").as_deref(), Some("side\n"));
    Ok(())
}

#[test]
fn stderr_closed_through_options_map_is_not_collected() -> TestResult {
    init_tracing();
    let fd_options = Arg::map([("fd", Arg::map([("stderr", Arg::map([("close", true)]))]))]);
    let record = process("/bin/echo out", vec![fd_options]).run()?;

    assert_eq!(record.output_str(), "out\n");
    assert!(record.error.is_none());
    assert_eq!(record.channels.keys().collect::<Vec<_>>(), ["stdout"]);
    assert!(record.success);
    Ok(())
}

#[test]
fn closed_extra_descriptor_is_not_collected() -> TestResult {
    init_tracing();
    let mut p = sh("echo main");
    p.capture(3, "side");
    p.set_descriptor_close("side", true)?;
    let record = p.run()?;

    assert_eq!(record.output_str(), "main\n");
    assert!(!record.channels.contains_key("side"));
    assert!(record.channels.contains_key("stderr"));
    assert!(record.success);
    Ok(())
}

#[test]
fn read_callbacks_fire_in_registration_order() -> TestResult {
    init_tracing();
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut p = process("/bin/echo %s", args!["ordered"]);
    for name in ["first", "second"] {
        let order = Arc::clone(&order);
        p.add_callback(
            move |ctx| {
                order.lock().unwrap().push(format!("{name}:{}", ctx.bound[0]));
                Ok(())
            },
            EventClass::Read,
            vec![name.to_uppercase()],
        );
    }
    p.run()?;

    let order = order.lock().unwrap();
    assert!(order.len() >= 2);
    assert_eq!(order[0], "first:FIRST");
    assert_eq!(order[1], "second:SECOND");
    Ok(())
}

#[test]
fn lifecycle_events_are_recorded() -> TestResult {
    init_tracing();
    let recorder = HookRecorder::new();
    let mut p = process("/bin/echo %s", args!["events"]);
    recorder.attach_all(&mut p);
    p.run()?;

    let events = recorder.events();
    assert_eq!(
        events.first(),
        Some(&Recorded::Launch {
            program: "echo".into(),
            command: "/bin/echo events".into(),
        })
    );
    assert_eq!(
        events.last(),
        Some(&Recorded::Close {
            program: "echo".into(),
            exit_code: 0,
        })
    );
    assert_eq!(recorder.bytes_read("echo", "stdout"), b"events\n");
    Ok(())
}

#[test]
fn failing_callback_does_not_abort_the_run() -> TestResult {
    init_tracing();
    let mut p = process("/bin/echo %s", args!["still here"]);
    p.add_callback(|_| anyhow::bail!("hook failure"), EventClass::Read, vec![]);
    p.add_callback(|_| panic!("hook panic"), EventClass::Close, vec![]);
    let record = p.run()?;
    assert!(record.success);
    assert_eq!(record.output_str(), "still here\n");
    Ok(())
}

#[test]
fn removed_callback_is_not_invoked() -> TestResult {
    init_tracing();
    let hits = Arc::new(Mutex::new(0));
    let mut p = process("/bin/echo %s", args!["x"]);
    let counter = Arc::clone(&hits);
    let id = p.add_callback(
        move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        },
        EventClass::Launch,
        vec![],
    );
    assert!(p.remove_callback(id));
    p.run()?;
    assert_eq!(*hits.lock().unwrap(), 0);
    Ok(())
}

#[test]
fn mute_stdout_drops_output() -> TestResult {
    init_tracing();
    let mut p = process("/bin/echo %s", args!["hidden"]);
    p.options_mut().mute_stdout = true;
    let record = p.run()?;
    assert!(record.output.is_none());
    assert!(!record.channels.contains_key("stdout"));
    Ok(())
}

#[test]
fn mute_stderr_keeps_error_field_only() -> TestResult {
    init_tracing();
    let mut p = sh("echo quiet >&2; exit 1");
    p.options_mut().mute_stderr = true;
    let record = p.run()?;
    assert_eq!(record.error_str(), "quiet\n");
    assert!(!record.channels.contains_key("stderr"));
    Ok(())
}

#[test]
fn environment_is_minimal_by_default() -> TestResult {
    init_tracing();
    let mut p = sh("echo \"$PROCMUX_TEST_VAR:$HOME\"");
    p.env_mut().set("PROCMUX_TEST_VAR", "visible");
    let record = p.run()?;
    assert_eq!(record.output_str(), "visible:\n");
    Ok(())
}

#[test]
fn options_map_can_defer_the_launch() -> TestResult {
    init_tracing();
    let p = process(
        "/bin/echo %s",
        vec![Arg::from("later"), Arg::map([("run", false)])],
    );
    assert!(!p.options().run);

    match p.launch()? {
        Launch::Deferred(deferred) => {
            assert_eq!(deferred.pipeline().len(), 1);
            let record = deferred.force_run()?;
            assert_eq!(record.output_str(), "later\n");
        }
        Launch::Completed(_) => panic!("expected a deferred launch"),
    }
    Ok(())
}

#[test]
fn file_redirect_writes_stdout_to_disk() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("out.txt");
    let mut p = process("/bin/echo %s", args!["to file"]);
    p.redirect(1, path.clone(), procmux::Direction::Write);
    let record = p.run()?;

    assert!(record.output.is_none());
    assert_eq!(std::fs::read_to_string(&path)?, "to file\n");
    Ok(())
}

#[test]
fn unopenable_redirect_is_a_config_error() {
    init_tracing();
    let mut p = Process::literal("/bin/cat");
    p.redirect(0, "/nonexistent/dir/input", procmux::Direction::Read);
    let err = p.run().unwrap_err();
    match err {
        procmux::ProcmuxError::ConfigError(msg) => assert!(msg.contains("/nonexistent/dir/input")),
        other => panic!("Expected ConfigError, got: {other:?}"),
    }
}
