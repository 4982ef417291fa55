use std::sync::Arc;

use procmux::exec::{DirectLauncher, Launcher, ShellEscapedLauncher};
use procmux::{Arg, Environment, Launch, args};

use crate::common::init_tracing;

fn completed(launch: Launch) -> procmux::ResultRecord {
    match launch {
        Launch::Completed(record) => record,
        Launch::Deferred(_) => panic!("expected the launch to run"),
    }
}

#[test]
fn direct_launcher_applies_shared_environment() {
    init_tracing();
    let mut env = Environment::default();
    env.set("ROLE", "direct");
    let launcher = DirectLauncher::new().with_env(env);

    let record = completed(launcher.run("echo %s $ROLE", args!["run by"]).unwrap());
    assert_eq!(record.output_str(), "run by direct\n");
}

#[test]
fn escaped_launcher_neutralises_metacharacters() {
    init_tracing();
    let launcher: Arc<dyn Launcher> = Arc::new(ShellEscapedLauncher::default());

    let record = completed(launcher.run("/bin/echo %s", args!["$(echo nope) `x`"]).unwrap());
    assert_eq!(record.output_str(), "$(echo nope) `x`\n");
}

#[test]
fn launcher_honors_deferred_options() {
    init_tracing();
    let launcher = DirectLauncher::new();
    let built = launcher
        .configure("/bin/echo %s", vec![Arg::from("wait"), Arg::map([("run", false)])])
        .unwrap();

    match launcher.launch(built).unwrap() {
        Launch::Deferred(deferred) => {
            assert_eq!(deferred.force_run().unwrap().output_str(), "wait\n");
        }
        Launch::Completed(_) => panic!("expected a deferred launch"),
    }
}

#[test]
fn launcher_rejects_an_out_of_range_priority() {
    let launcher = DirectLauncher::new().with_priority(99);
    let built = launcher.configure("true", args![]).unwrap();
    assert!(launcher.launch(built).is_err());
}
