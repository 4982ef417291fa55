// src/pipeline/mod.rs

//! Linear chains of processes.
//!
//! A [`Pipeline`] owns its stages. [`Pipeline::link`] connects the output of
//! one stage to the input of another; the resulting topology must be a single
//! simple chain. Running a pipeline hands it to the multiplexer, which spawns
//! every stage in data-flow order.

pub mod link;

use std::fmt;
use std::os::fd::RawFd;

use tracing::debug;

use crate::descriptor::{DescriptorKind, DescriptorRef, STDIN, STDOUT};
use crate::engine::{AbortSignal, Multiplexer};
use crate::errors::{ProcmuxError, Result};
use crate::process::{Process, ProcessOptions};
use crate::result::ResultRecord;

pub use link::{LINK_CAPACITY, LinkBuffer};

/// Index of a stage inside its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StageId(usize);

impl StageId {
    pub(crate) fn new(index: usize) -> Self {
        StageId(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {}", self.0)
    }
}

/// One upstream-to-downstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSpec {
    pub upstream: StageId,
    pub upstream_fd: RawFd,
    pub downstream: StageId,
    pub downstream_fd: RawFd,
}

#[derive(Debug, Default)]
pub struct Pipeline {
    stages: Vec<Process>,
    links: Vec<LinkSpec>,
}

/// Result of [`Pipeline::launch`].
#[derive(Debug)]
pub enum Launch {
    Completed(ResultRecord),
    /// `run: false` was requested; nothing was spawned yet.
    Deferred(Deferred),
}

impl Launch {
    /// The record of a completed launch, running a deferred one first.
    pub fn into_record(self) -> Result<ResultRecord> {
        match self {
            Launch::Completed(record) => Ok(record),
            Launch::Deferred(deferred) => deferred.force_run(),
        }
    }
}

/// A pipeline whose start was deferred.
#[derive(Debug)]
pub struct Deferred {
    pipeline: Pipeline,
}

impl Deferred {
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Spawn, drain and close now.
    pub fn force_run(self) -> Result<ResultRecord> {
        self.pipeline.run()
    }

    pub fn force_run_with(self, abort: &AbortSignal) -> Result<ResultRecord> {
        self.pipeline.run_with_abort(abort)
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(process: Process) -> Self {
        let mut pipeline = Self::new();
        pipeline.add(process);
        pipeline
    }

    /// Add every process and link each one to the next.
    pub fn chain(processes: impl IntoIterator<Item = Process>) -> Result<Self> {
        let mut pipeline = Self::new();
        let mut previous = None;
        for process in processes {
            let id = pipeline.add(process);
            if let Some(up) = previous {
                pipeline.link(up, id)?;
            }
            previous = Some(id);
        }
        Ok(pipeline)
    }

    /// Append `process` downstream of the current sink.
    pub fn pipe(mut self, process: Process) -> Result<Self> {
        let sink = self.sink();
        let id = self.add(process);
        if let Some(up) = sink {
            self.link(up, id)?;
        }
        Ok(self)
    }

    pub fn add(&mut self, mut process: Process) -> StageId {
        let id = StageId(self.stages.len());
        process.info.stage = id.0;
        self.stages.push(process);
        id
    }

    /// Connect `upstream`'s stdout to `downstream`'s stdin.
    pub fn link(&mut self, upstream: StageId, downstream: StageId) -> Result<()> {
        self.link_descriptors(upstream, STDOUT, downstream, STDIN)
    }

    /// Connect an arbitrary child-written pipe of `upstream` to a
    /// child-read pipe of `downstream`.
    pub fn link_descriptors<'a, 'b>(
        &mut self,
        upstream: StageId,
        upstream_fd: impl Into<DescriptorRef<'a>>,
        downstream: StageId,
        downstream_fd: impl Into<DescriptorRef<'b>>,
    ) -> Result<()> {
        if upstream == downstream {
            return Err(ProcmuxError::config(format!("cannot link {upstream} to itself")));
        }
        let up = self.stage(upstream)?;
        let down = self.stage(downstream)?;

        if self.links.iter().any(|l| l.upstream == upstream) {
            return Err(ProcmuxError::config(format!(
                "{upstream} already has a downstream peer"
            )));
        }
        if self.links.iter().any(|l| l.downstream == downstream) {
            return Err(ProcmuxError::config(format!(
                "{downstream} already has an upstream peer"
            )));
        }
        if self.reaches(downstream, upstream) {
            return Err(ProcmuxError::config(format!(
                "linking {upstream} to {downstream} would create a cycle"
            )));
        }

        let up_fd = up.descriptors().resolve(upstream_fd)?;
        let down_fd = down.descriptors().resolve(downstream_fd)?;
        check_endpoint(up, up_fd, true)?;
        check_endpoint(down, down_fd, false)?;
        if down_fd == STDIN && down.input().is_some() {
            return Err(ProcmuxError::config(format!(
                "{downstream} already has static input on stdin"
            )));
        }

        self.stages[upstream.0].descriptors_mut().mark_linked(up_fd);
        self.stages[downstream.0].descriptors_mut().mark_linked(down_fd);
        self.links.push(LinkSpec {
            upstream,
            upstream_fd: up_fd,
            downstream,
            downstream_fd: down_fd,
        });
        debug!(%upstream, %downstream, up_fd, down_fd, "linked pipeline stages");
        Ok(())
    }

    fn stage(&self, id: StageId) -> Result<&Process> {
        self.stages
            .get(id.0)
            .ok_or_else(|| ProcmuxError::config(format!("{id} does not exist")))
    }

    /// True if following downstream links from `from` arrives at `to`.
    fn reaches(&self, from: StageId, to: StageId) -> bool {
        let mut current = from;
        // At most one downstream per stage, so this walk is a simple path.
        for _ in 0..=self.links.len() {
            if current == to {
                return true;
            }
            match self.links.iter().find(|l| l.upstream == current) {
                Some(l) => current = l.downstream,
                None => return false,
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> &[Process] {
        &self.stages
    }

    pub fn stage_mut(&mut self, id: StageId) -> Option<&mut Process> {
        self.stages.get_mut(id.0)
    }

    pub fn links(&self) -> &[LinkSpec] {
        &self.links
    }

    /// The stage with no downstream peer: the last one in data-flow order.
    pub fn sink(&self) -> Option<StageId> {
        (0..self.stages.len())
            .map(StageId)
            .find(|id| !self.links.iter().any(|l| l.upstream == *id))
    }

    /// Options that govern the run as a whole: those of the sink.
    pub fn options(&self) -> Option<&ProcessOptions> {
        self.sink().map(|id| self.stages[id.0].options())
    }

    /// Stage indices in data-flow order. Fails unless the links join every
    /// stage into one chain.
    pub(crate) fn order(&self) -> Result<Vec<usize>> {
        if self.stages.is_empty() {
            return Err(ProcmuxError::config("pipeline has no stages"));
        }
        let head = (0..self.stages.len())
            .find(|i| !self.links.iter().any(|l| l.downstream.0 == *i))
            .ok_or_else(|| ProcmuxError::config("pipeline has no head stage"))?;

        let mut order = vec![head];
        let mut current = head;
        while let Some(l) = self.links.iter().find(|l| l.upstream.0 == current) {
            current = l.downstream.0;
            order.push(current);
        }
        if order.len() != self.stages.len() {
            return Err(ProcmuxError::config(format!(
                "pipeline stages are not connected into a single chain ({} of {} reachable)",
                order.len(),
                self.stages.len()
            )));
        }
        Ok(order)
    }

    pub(crate) fn into_parts(self) -> (Vec<Process>, Vec<LinkSpec>) {
        (self.stages, self.links)
    }

    /// Honor the sink's `run` option.
    pub fn launch(self) -> Result<Launch> {
        let run = self.options().map(|o| o.run).unwrap_or(true);
        if run {
            self.run().map(Launch::Completed)
        } else {
            debug!(stages = self.len(), "launch deferred");
            Ok(Launch::Deferred(Deferred { pipeline: self }))
        }
    }

    /// Spawn, drain and close every stage.
    pub fn run(self) -> Result<ResultRecord> {
        self.run_with_abort(&AbortSignal::new())
    }

    /// Like [`run`](Self::run), checking `abort` once per loop iteration.
    pub fn run_with_abort(self, abort: &AbortSignal) -> Result<ResultRecord> {
        Multiplexer::new(self, abort.clone())?.run()
    }
}

fn check_endpoint(process: &Process, fd: RawFd, upstream: bool) -> Result<()> {
    let Some(d) = process.descriptors().get(fd) else {
        return Err(ProcmuxError::UnknownDescriptor(fd.to_string()));
    };
    if d.kind != DescriptorKind::Pipe {
        return Err(ProcmuxError::config(format!(
            "descriptor `{}' of `{}' is not a pipe",
            d.alias,
            process.program()
        )));
    }
    if d.direction.child_writes() != upstream {
        return Err(ProcmuxError::config(format!(
            "descriptor `{}' of `{}' has the wrong direction for a link",
            d.alias,
            process.program()
        )));
    }
    if d.options.linked {
        return Err(ProcmuxError::config(format!(
            "descriptor `{}' of `{}' is already linked",
            d.alias,
            process.program()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(cmd: &str) -> Process {
        Process::literal(cmd)
    }

    #[test]
    fn chain_marks_endpoints_as_linked() {
        let pipeline = Pipeline::chain([stage("echo a"), stage("cat")]).unwrap();
        assert_eq!(pipeline.links().len(), 1);
        let up = &pipeline.stages()[0];
        let down = &pipeline.stages()[1];
        assert!(up.descriptors().options("stdout").linked);
        let stdin = down.descriptors().options("stdin");
        assert!(stdin.linked);
        assert!(!stdin.close);
        assert_eq!(pipeline.sink(), Some(StageId(1)));
        assert_eq!(pipeline.order().unwrap(), vec![0, 1]);
    }

    #[test]
    fn rejects_self_links_and_fan_out() {
        let mut pipeline = Pipeline::new();
        let a = pipeline.add(stage("a"));
        let b = pipeline.add(stage("b"));
        let c = pipeline.add(stage("c"));
        assert!(pipeline.link(a, a).is_err());
        pipeline.link(a, b).unwrap();
        assert!(pipeline.link(a, c).is_err());
        assert!(pipeline.link(c, b).is_err());
    }

    #[test]
    fn rejects_cycles() {
        let mut pipeline = Pipeline::new();
        let a = pipeline.add(stage("a"));
        let b = pipeline.add(stage("b"));
        pipeline.link(a, b).unwrap();
        let err = pipeline.link(b, a).unwrap_err();
        assert!(err.to_string().contains("already has") || err.to_string().contains("cycle"));
    }

    #[test]
    fn order_follows_links_not_insertion() {
        let mut pipeline = Pipeline::new();
        let sink = pipeline.add(stage("sort"));
        let head = pipeline.add(stage("ls"));
        pipeline.link(head, sink).unwrap();
        assert_eq!(pipeline.order().unwrap(), vec![1, 0]);
        assert_eq!(pipeline.sink(), Some(sink));
    }

    #[test]
    fn disconnected_stages_cannot_run() {
        let mut pipeline = Pipeline::new();
        pipeline.add(stage("a"));
        pipeline.add(stage("b"));
        assert!(pipeline.order().is_err());
    }
}
