// src/engine/multiplexer.rs

//! Single-threaded readiness loop over every pipe of a pipeline.
//!
//! One `mio::Poll` watches the read ends of child-written pipes and the write
//! ends of child-read pipes across all stages. Registration is
//! edge-triggered, so each channel keeps a `ready` flag that is set by an
//! event and cleared only once an operation reports `WouldBlock`. After every
//! wait the loop pumps all ready channels until none makes progress:
//!
//! - a read channel drains everything available into its stage's collected
//!   bytes or into a link buffer, firing the stage's `read` hooks;
//! - a write channel flushes its link buffer into the child and is closed once
//!   the upstream side reached end-of-stream and nothing is pending.
//!
//! A full link buffer stops its upstream reader until the downstream writer
//! made room. A failing pipe is closed and the run continues; only a failing
//! readiness wait aborts the run.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, error, info, trace, warn};

use crate::descriptor::{Descriptor, STDERR, STDIN, STDOUT};
use crate::errors::{ProcmuxError, Result};
use crate::exit;
use crate::hooks::HookEvent;
use crate::pipeline::{LinkBuffer, LinkSpec, Pipeline, StageId};
use crate::process::{ParentEnd, ParentPipe, Process, ProcessHandle, ProcessOptions, SpawnSpec};
use crate::result::ResultRecord;

use super::abort::AbortSignal;
use super::channel::{ReadChannel, ReadSink, WriteChannel};
use super::MuxState;

/// Bytes requested from a pipe per read call.
pub const CHUNK_SIZE: usize = 4096 * 16;

const WAKE_TOKEN: Token = Token(usize::MAX);

/// Upper bound on the wait between two exit checks while reaping.
const REAP_INTERVAL: Duration = Duration::from_millis(20);

struct StageRun {
    process: Process,
    handle: Option<ProcessHandle>,
    collected: BTreeMap<String, Vec<u8>>,
}

pub struct Multiplexer {
    state: MuxState,
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
    abort: AbortSignal,
    timeout: Duration,
    all_stages: bool,
    stages: Vec<StageRun>,
    link_specs: Vec<LinkSpec>,
    links: Vec<LinkBuffer>,
    readers: BTreeMap<Token, ReadChannel>,
    writers: BTreeMap<Token, WriteChannel>,
    next_token: usize,
    scratch: Vec<u8>,
}

impl Multiplexer {
    /// Validate the pipeline and prepare an idle run. Nothing is spawned yet.
    pub fn new(pipeline: Pipeline, abort: AbortSignal) -> Result<Self> {
        let order = pipeline.order()?;
        let (timeout, all_stages) = pipeline
            .options()
            .map(|o| (o.poll_timeout(), o.all_stages))
            .unwrap_or_else(|| (ProcessOptions::default().poll_timeout(), false));

        let (processes, specs) = pipeline.into_parts();
        // Stage positions are re-numbered in data-flow order.
        let mut position = vec![0; processes.len()];
        for (pos, &index) in order.iter().enumerate() {
            position[index] = pos;
        }
        let mut slots: Vec<Option<Process>> = processes.into_iter().map(Some).collect();
        let mut stages = Vec::with_capacity(slots.len());
        for (pos, &index) in order.iter().enumerate() {
            let Some(mut process) = slots[index].take() else {
                return Err(ProcmuxError::config("pipeline stage listed twice"));
            };
            process.info.stage = pos;
            process.apply_descriptor_overrides()?;
            stages.push(StageRun {
                process,
                handle: None,
                collected: BTreeMap::new(),
            });
        }
        let link_specs: Vec<LinkSpec> = specs
            .into_iter()
            .map(|l| LinkSpec {
                upstream: StageId::new(position[l.upstream.index()]),
                downstream: StageId::new(position[l.downstream.index()]),
                ..l
            })
            .collect();

        let poll = Poll::new().map_err(ProcmuxError::ReadinessError)?;
        let waker = Arc::new(
            Waker::new(poll.registry(), WAKE_TOKEN).map_err(ProcmuxError::ReadinessError)?,
        );
        let links = link_specs.iter().map(|_| LinkBuffer::default()).collect();

        Ok(Self {
            state: MuxState::Idle,
            poll,
            events: Events::with_capacity(64),
            waker,
            abort,
            timeout,
            all_stages,
            stages,
            link_specs,
            links,
            readers: BTreeMap::new(),
            writers: BTreeMap::new(),
            next_token: 0,
            scratch: vec![0; CHUNK_SIZE],
        })
    }

    pub fn state(&self) -> MuxState {
        self.state
    }

    /// Spawn every stage, drain all pipes, close every process and assemble
    /// the record of the sink stage.
    pub fn run(mut self) -> Result<ResultRecord> {
        self.abort.attach(&self.waker);
        let outcome = self.start().and_then(|()| self.drain());

        let result = match outcome {
            Ok(aborted) => Ok(self.finish(aborted)),
            Err(e) => {
                error!(error = %e, "run failed; killing every stage");
                self.kill_all();
                Err(e)
            }
        };
        self.abort.detach(&self.waker);
        result
    }

    /// Idle -> Draining: spawn in data-flow order and register every pipe.
    fn start(&mut self) -> Result<()> {
        if self.abort.is_aborted() {
            info!("abort requested before start; nothing spawned");
            return Ok(());
        }

        for pos in 0..self.stages.len() {
            let stage = &mut self.stages[pos];
            let process = &stage.process;
            let (handle, pipes) = ProcessHandle::spawn(SpawnSpec {
                command: process.command(),
                program: process.program(),
                env: process.env(),
                descriptors: process.descriptors(),
                priority: process.priority(),
            })?;
            info!(
                program = %process.program(),
                pid = handle.pid(),
                stage = pos,
                "process launched"
            );
            stage.process.info.pid = Some(handle.pid());
            stage.handle = Some(handle);
            let Process { info, hooks, .. } = &mut stage.process;
            hooks.fire(
                HookEvent::Launch {
                    command: &info.command,
                },
                info,
            );

            for pipe in pipes {
                self.attach_pipe(pos, pipe)?;
            }
            if let Some(input) = self.stages[pos].process.take_input() {
                warn!(
                    program = %self.stages[pos].process.program(),
                    bytes = input.len(),
                    "stdin is not an open pipe; input discarded"
                );
            }
        }

        self.mark_links_ready();
        self.state = MuxState::Draining;
        debug!(
            readers = self.readers.len(),
            writers = self.writers.len(),
            links = self.links.len(),
            "draining"
        );
        Ok(())
    }

    fn attach_pipe(&mut self, stage: usize, pipe: ParentPipe) -> Result<()> {
        let ParentPipe { fd, alias, end } = pipe;
        match end {
            ParentEnd::Read(mut receiver) => {
                let link = self
                    .link_specs
                    .iter()
                    .position(|l| l.upstream.index() == stage && l.upstream_fd == fd);
                let collected = self.stages[stage]
                    .process
                    .descriptors()
                    .get(fd)
                    .is_some_and(Descriptor::is_collected);
                let sink = match link {
                    Some(n) => ReadSink::Link(n),
                    None if collected => {
                        self.stages[stage].collected.insert(alias.clone(), Vec::new());
                        ReadSink::Collect
                    }
                    None => {
                        debug!(stage, fd, alias = %alias, "pipe is neither linked nor collected; closing");
                        return Ok(());
                    }
                };
                let token = self.token();
                self.poll
                    .registry()
                    .register(&mut receiver, token, Interest::READABLE)
                    .map_err(ProcmuxError::ReadinessError)?;
                trace!(stage, fd, alias = %alias, ?token, "registered read channel");
                self.readers.insert(
                    token,
                    ReadChannel {
                        stage,
                        fd,
                        alias,
                        receiver,
                        sink,
                        ready: true,
                        bytes: 0,
                    },
                );
            }
            ParentEnd::Write(mut sender) => {
                let linked = self
                    .link_specs
                    .iter()
                    .position(|l| l.downstream.index() == stage && l.downstream_fd == fd);
                let link = match linked {
                    Some(n) => n,
                    None if fd == STDIN => match self.stages[stage].process.take_input() {
                        Some(input) => self.input_buffer(input),
                        None => {
                            debug!(stage, fd, "nothing to write; closing stdin");
                            return Ok(());
                        }
                    },
                    None => {
                        debug!(stage, fd, alias = %alias, "nothing to write; closing");
                        return Ok(());
                    }
                };
                let token = self.token();
                self.poll
                    .registry()
                    .register(&mut sender, token, Interest::WRITABLE)
                    .map_err(ProcmuxError::ReadinessError)?;
                trace!(stage, fd, alias = %alias, ?token, "registered write channel");
                self.writers.insert(
                    token,
                    WriteChannel {
                        stage,
                        fd,
                        alias,
                        sender,
                        link,
                        ready: true,
                        bytes: 0,
                    },
                );
            }
        }
        Ok(())
    }

    /// Static input rides on the same path as a link whose upstream already
    /// reached end-of-stream.
    fn input_buffer(&mut self, input: Vec<u8>) -> usize {
        let mut buffer = LinkBuffer::with_capacity(input.len().max(1));
        buffer.push(&input);
        buffer.close_upstream();
        self.links.push(buffer);
        self.links.len() - 1
    }

    fn mark_links_ready(&mut self) {
        for (n, link) in self.links.iter_mut().enumerate() {
            let upstream = n >= self.link_specs.len()
                || self
                    .readers
                    .values()
                    .any(|r| r.sink == ReadSink::Link(n));
            let downstream = self.writers.values().any(|w| w.link == n);
            if !upstream {
                link.close_upstream();
            }
            if !downstream {
                link.close_downstream();
            }
            link.set_ready(upstream && downstream);
        }
    }

    fn token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// Draining -> Closing. Returns `true` if the run was aborted.
    fn drain(&mut self) -> Result<bool> {
        if self.state != MuxState::Draining {
            return Ok(self.abort.is_aborted());
        }
        loop {
            if self.abort.is_aborted() {
                warn!("abort requested; forcing termination");
                self.state = MuxState::Closing;
                return Ok(true);
            }

            self.pump();
            if self.readers.is_empty() && self.writers.is_empty() {
                break;
            }

            match self.poll.poll(&mut self.events, Some(self.timeout)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ProcmuxError::ReadinessError(e)),
            }
            if self.events.is_empty() {
                trace!(timeout = ?self.timeout, "readiness wait timed out");
                continue;
            }

            for event in self.events.iter() {
                let token = event.token();
                if token == WAKE_TOKEN {
                    continue;
                }
                if let Some(r) = self.readers.get_mut(&token) {
                    if event.is_readable() || event.is_read_closed() || event.is_error() {
                        r.ready = true;
                    }
                } else if let Some(w) = self.writers.get_mut(&token) {
                    if event.is_writable() || event.is_write_closed() || event.is_error() {
                        w.ready = true;
                    }
                }
            }
        }

        self.state = MuxState::Closing;
        debug!("every pipe closed");
        Ok(false)
    }

    /// Service ready channels until a full pass makes no progress.
    fn pump(&mut self) {
        loop {
            let mut progress = false;
            let tokens: Vec<Token> = self.readers.keys().copied().collect();
            for token in tokens {
                progress |= self.drain_reader(token);
            }
            let tokens: Vec<Token> = self.writers.keys().copied().collect();
            for token in tokens {
                progress |= self.flush_writer(token);
            }
            if !progress {
                break;
            }
        }
    }

    fn drain_reader(&mut self, token: Token) -> bool {
        let mut progress = false;
        loop {
            let Some(ch) = self.readers.get_mut(&token) else {
                return progress;
            };
            if !ch.ready {
                return progress;
            }
            let room = match ch.sink {
                ReadSink::Link(n) if !self.links[n].downstream_closed() => {
                    self.links[n].free().min(self.scratch.len())
                }
                _ => self.scratch.len(),
            };
            if room == 0 {
                // Backpressure: resume once the downstream writer made room.
                return progress;
            }

            match ch.receiver.read(&mut self.scratch[..room]) {
                Ok(0) => {
                    self.close_reader(token);
                    return true;
                }
                Ok(count) => {
                    progress = true;
                    ch.bytes += count as u64;
                    let data = &self.scratch[..count];
                    let stage = &mut self.stages[ch.stage];
                    match ch.sink {
                        ReadSink::Collect => stage
                            .collected
                            .entry(ch.alias.clone())
                            .or_default()
                            .extend_from_slice(data),
                        ReadSink::Link(n) => {
                            self.links[n].push(data);
                        }
                    }
                    trace!(program = %stage.process.info.program, alias = %ch.alias, bytes = count, "read");
                    let Process { info, hooks, .. } = &mut stage.process;
                    hooks.fire(
                        HookEvent::Read {
                            alias: &ch.alias,
                            data,
                            count,
                        },
                        info,
                    );
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    ch.ready = false;
                    return progress;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => {
                    let err = ProcmuxError::ChannelError {
                        program: self.stages[ch.stage].process.info.program.clone(),
                        alias: ch.alias.clone(),
                        source,
                    };
                    warn!(error = %err, "read failed; treating channel as closed");
                    self.close_reader(token);
                    return true;
                }
            }
        }
    }

    fn flush_writer(&mut self, token: Token) -> bool {
        let Some(ch) = self.writers.get_mut(&token) else {
            return false;
        };
        let n = ch.link;
        let link = &mut self.links[n];
        let mut progress = false;

        while ch.ready && !link.is_empty() {
            match ch.sender.write(link.pending()) {
                Ok(0) => ch.ready = false,
                Ok(n) => {
                    link.consume(n);
                    ch.bytes += n as u64;
                    progress = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => ch.ready = false,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => {
                    let broken = source.kind() == io::ErrorKind::BrokenPipe;
                    let err = ProcmuxError::ChannelError {
                        program: self.stages[ch.stage].process.info.program.clone(),
                        alias: ch.alias.clone(),
                        source,
                    };
                    if broken {
                        debug!(error = %err, "reader went away; discarding the rest");
                    } else {
                        warn!(error = %err, "write failed; treating channel as closed");
                    }
                    link.close_downstream();
                    self.close_writer(token);
                    self.release_producer(n);
                    return true;
                }
            }
        }

        if link.is_drained() {
            self.close_writer(token);
            return true;
        }
        progress
    }

    fn close_reader(&mut self, token: Token) {
        let Some(mut ch) = self.readers.remove(&token) else {
            return;
        };
        if let Err(e) = self.poll.registry().deregister(&mut ch.receiver) {
            debug!(alias = %ch.alias, error = %e, "deregister failed");
        }
        if let ReadSink::Link(n) = ch.sink {
            self.links[n].close_upstream();
        }
        debug!(stage = ch.stage, fd = ch.fd, alias = %ch.alias, bytes = ch.bytes, "read channel closed");
    }

    fn close_writer(&mut self, token: Token) {
        let Some(mut ch) = self.writers.remove(&token) else {
            return;
        };
        if let Err(e) = self.poll.registry().deregister(&mut ch.sender) {
            debug!(alias = %ch.alias, error = %e, "deregister failed");
        }
        debug!(stage = ch.stage, fd = ch.fd, alias = %ch.alias, bytes = ch.bytes, "write channel closed");
        // Dropping the sender delivers end-of-stream to the child.
    }

    /// The consumer of link `n` went away. Stop reading its producer so the
    /// producer sees a broken pipe, as it would in a shell pipeline.
    fn release_producer(&mut self, n: usize) {
        let tokens: Vec<Token> = self
            .readers
            .iter()
            .filter(|(_, r)| r.sink == ReadSink::Link(n))
            .map(|(token, _)| *token)
            .collect();
        for token in tokens {
            debug!(link = n, "downstream closed; releasing producer");
            self.close_reader(token);
        }
    }

    fn close_all_channels(&mut self) {
        let readers: Vec<Token> = self.readers.keys().copied().collect();
        for token in readers {
            self.close_reader(token);
        }
        let writers: Vec<Token> = self.writers.keys().copied().collect();
        for token in writers {
            self.close_writer(token);
        }
    }

    fn kill_all(&mut self) {
        self.close_all_channels();
        for stage in &mut self.stages {
            if let Some(handle) = stage.handle.as_mut() {
                handle.kill();
            }
        }
    }

    /// Wait for every spawned stage to exit while watching the abort signal.
    /// A child may close its pipes and keep running, so reaping polls with
    /// `try_wait` instead of blocking. Returns `true` if the run was aborted
    /// meanwhile.
    fn await_exit(&mut self) -> bool {
        let interval = self.timeout.min(REAP_INTERVAL);
        loop {
            if self.abort.is_aborted() {
                warn!("abort requested while reaping; forcing termination");
                return true;
            }
            let mut running = false;
            for handle in self.stages.iter_mut().filter_map(|s| s.handle.as_mut()) {
                running |= handle.is_running();
            }
            if !running {
                return false;
            }
            // Only the waker is registered now, so this is an abortable sleep.
            match self.poll.poll(&mut self.events, Some(interval)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(error = %e, "readiness wait failed while reaping; waiting without abort checks");
                    return false;
                }
            }
        }
    }

    /// Closing -> Done.
    fn finish(&mut self, aborted: bool) -> ResultRecord {
        self.state = MuxState::Closing;
        self.close_all_channels();
        let aborted = aborted || self.await_exit();

        let mut records = Vec::with_capacity(self.stages.len());
        for stage in &mut self.stages {
            let code = match stage.handle.as_mut() {
                Some(handle) if aborted => handle.kill(),
                Some(handle) => handle.close(),
                None => -1,
            };
            let Process { info, hooks, .. } = &mut stage.process;
            hooks.fire(HookEvent::Close { exit_code: code }, info);
            records.push(stage_record(stage, code, aborted));
        }

        for (n, link) in self.links.iter().enumerate().take(self.link_specs.len()) {
            debug!(
                link = n,
                bytes_in = link.bytes_in(),
                bytes_out = link.bytes_out(),
                dropped = link.bytes_dropped(),
                "link closed"
            );
        }

        self.state = MuxState::Done;
        let mut sink = records.pop().unwrap_or_default();
        if self.all_stages {
            records.push(sink.clone());
            sink.stages = records;
        }
        sink
    }
}

fn stage_record(stage: &mut StageRun, code: i32, aborted: bool) -> ResultRecord {
    let process = &stage.process;
    let options = process.options();
    let success = !aborted && exit::is_success(code, process.exit_rule());
    let stdout_alias = process.descriptors().alias_of(STDOUT).map(str::to_string);
    let stderr_alias = process.descriptors().alias_of(STDERR).map(str::to_string);

    let mut channels = mem::take(&mut stage.collected);
    let output = match &stdout_alias {
        Some(alias) if !options.mute_stdout => channels.get(alias).cloned(),
        _ => None,
    };
    let error = stderr_alias.as_ref().and_then(|alias| channels.get(alias).cloned());
    if options.mute_stdout {
        if let Some(alias) = &stdout_alias {
            channels.remove(alias);
        }
    }
    if options.mute_stderr {
        if let Some(alias) = &stderr_alias {
            channels.remove(alias);
        }
    }

    if let Some(text) = error.as_deref().filter(|e| !e.is_empty()) {
        let text = String::from_utf8_lossy(text);
        let text = text.trim_end();
        if !success && !options.mute_stderr {
            error!(program = %process.info.program, exit_code = code, stderr = %text, "process failed");
        } else if success {
            debug!(program = %process.info.program, stderr = %text, "stderr output");
        }
    }
    info!(
        program = %process.info.program,
        exit_code = code,
        success,
        aborted,
        "process finished"
    );

    ResultRecord {
        command: process.info.command.clone(),
        output,
        error,
        errno: code,
        return_code: code,
        success,
        aborted,
        channels,
        stages: Vec::new(),
    }
}
