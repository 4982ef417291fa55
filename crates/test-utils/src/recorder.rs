#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use procmux::hooks::{HookContext, HookEvent};
use procmux::{EventClass, HookId, Process};

/// One observed hook invocation, owned so it can outlive the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Launch { program: String, command: String },
    Read { program: String, alias: String, data: Vec<u8> },
    Close { program: String, exit_code: i32 },
}

impl Recorded {
    fn from_ctx(ctx: &HookContext<'_>) -> Self {
        let program = ctx.process.program.clone();
        match ctx.event {
            HookEvent::Launch { command } => Recorded::Launch {
                program,
                command: command.to_string(),
            },
            HookEvent::Read { alias, data, .. } => Recorded::Read {
                program,
                alias: alias.to_string(),
                data: data.to_vec(),
            },
            HookEvent::Close { exit_code } => Recorded::Close { program, exit_code },
        }
    }
}

/// Collects hook invocations from one or more processes, in firing order.
#[derive(Debug, Clone, Default)]
pub struct HookRecorder {
    events: Arc<Mutex<Vec<Recorded>>>,
}

impl HookRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a recording hook for `class` on `process`.
    pub fn attach(&self, process: &mut Process, class: EventClass) -> HookId {
        let events = Arc::clone(&self.events);
        process.add_callback(
            move |ctx| {
                events.lock().unwrap().push(Recorded::from_ctx(ctx));
                Ok(())
            },
            class,
            vec![],
        )
    }

    /// Register for launch, read and close.
    pub fn attach_all(&self, process: &mut Process) {
        for class in [EventClass::Launch, EventClass::Read, EventClass::Close] {
            self.attach(process, class);
        }
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    /// Concatenation of every chunk read from `alias` of `program`.
    pub fn bytes_read(&self, program: &str, alias: &str) -> Vec<u8> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Recorded::Read {
                    program: p,
                    alias: a,
                    data,
                } if p == program && a == alias => Some(data.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    pub fn exit_code(&self, program: &str) -> Option<i32> {
        self.events.lock().unwrap().iter().find_map(|e| match e {
            Recorded::Close {
                program: p,
                exit_code,
            } if p == program => Some(*exit_code),
            _ => None,
        })
    }
}
