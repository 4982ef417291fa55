// src/hooks.rs

//! Callback lists keyed by event class.
//!
//! Hooks run synchronously on the multiplexer's thread, in registration
//! order. A hook that returns an error or panics is logged and skipped; it
//! never aborts the run. Keep hooks short: a slow hook stalls every pipe of
//! the pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{error, warn};

use crate::errors::ProcmuxError;
use crate::process::ProcessInfo;
use crate::types::EventClass;

/// Payload of a fired event.
#[derive(Debug, Clone, Copy)]
pub enum HookEvent<'a> {
    /// The process was spawned with this literal command.
    Launch { command: &'a str },
    /// Bytes drained from one channel. `count == data.len()`.
    Read {
        alias: &'a str,
        data: &'a [u8],
        count: usize,
    },
    /// The process was closed with this exit code.
    Close { exit_code: i32 },
}

impl HookEvent<'_> {
    pub fn class(&self) -> EventClass {
        match self {
            HookEvent::Launch { .. } => EventClass::Launch,
            HookEvent::Read { .. } => EventClass::Read,
            HookEvent::Close { .. } => EventClass::Close,
        }
    }
}

/// Everything a hook receives: the event, the owning process and the
/// arguments bound at registration time.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub event: HookEvent<'a>,
    pub process: &'a ProcessInfo,
    pub bound: &'a [String],
}

pub type HookFn = Box<dyn FnMut(&HookContext<'_>) -> anyhow::Result<()> + Send>;

/// Handle returned by [`EventHooks::register`], used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HookId(u64);

struct Registration {
    id: HookId,
    function: HookFn,
    bound: Vec<String>,
}

#[derive(Default)]
pub struct EventHooks {
    lists: BTreeMap<EventClass, Vec<Registration>>,
    next_id: u64,
}

impl fmt::Debug for EventHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: BTreeMap<_, _> = self.lists.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("EventHooks").field("registered", &counts).finish()
    }
}

impl EventHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, class: EventClass, function: F, bound: Vec<String>) -> HookId
    where
        F: FnMut(&HookContext<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        let id = HookId(self.next_id);
        self.next_id += 1;
        self.lists.entry(class).or_default().push(Registration {
            id,
            function: Box::new(function),
            bound,
        });
        id
    }

    /// Remove a hook. Returns `false` if it was not registered.
    pub fn remove(&mut self, id: HookId) -> bool {
        for list in self.lists.values_mut() {
            if let Some(pos) = list.iter().position(|r| r.id == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn count(&self, class: EventClass) -> usize {
        self.lists.get(&class).map_or(0, Vec::len)
    }

    /// Invoke every hook of the event's class in registration order.
    ///
    /// Returns the number of hooks that failed.
    pub fn fire(&mut self, event: HookEvent<'_>, process: &ProcessInfo) -> usize {
        let class = event.class();
        let Some(list) = self.lists.get_mut(&class) else {
            return 0;
        };

        let mut failures = 0;
        for reg in list.iter_mut() {
            let ctx = HookContext {
                event,
                process,
                bound: &reg.bound,
            };
            let outcome = catch_unwind(AssertUnwindSafe(|| (reg.function)(&ctx)));
            let (message, panicked) = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => (format!("{e:#}"), false),
                Err(panic) => (panic_message(panic.as_ref()), true),
            };
            failures += 1;
            let failure = ProcmuxError::CallbackError {
                event: class.to_string(),
                message,
            };
            if panicked {
                error!(program = %process.program, error = %failure, "hook panicked");
            } else {
                warn!(program = %process.program, error = %failure, "hook failed");
            }
        }
        failures
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic: <non-string payload>".to_string()
    }
}
