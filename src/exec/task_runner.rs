// src/exec/task_runner.rs

//! Async runner for one pipeline.

use anyhow::anyhow;
use tokio::sync::oneshot;
use tokio::task::JoinError;
use tracing::{debug, info};

use crate::engine::AbortSignal;
use crate::errors::{ProcmuxError, Result};
use crate::pipeline::Pipeline;
use crate::result::ResultRecord;

/// Run `pipeline` on the blocking thread pool.
///
/// The multiplexer stays single-threaded; this only moves it off the async
/// executor. If the cancel channel fires, the run is aborted: every stage is
/// killed and the partial record (with `aborted` set) is still returned. A
/// cancel sender dropped without sending lets the run finish normally.
pub async fn run_pipeline(
    pipeline: Pipeline,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<ResultRecord> {
    let abort = AbortSignal::new();
    let worker_abort = abort.clone();
    let stages = pipeline.len();
    info!(stages, "starting pipeline");

    let mut job = tokio::task::spawn_blocking(move || pipeline.run_with_abort(&worker_abort));

    tokio::select! {
        joined = &mut job => return joined_result(joined),

        cancel = &mut cancel_rx => {
            match cancel {
                Ok(()) => {
                    info!(stages, "cancellation requested; aborting pipeline");
                    abort.abort();
                }
                Err(e) => {
                    debug!(error = %e, "cancel channel closed without explicit cancellation");
                }
            }
        }
    }

    joined_result(job.await)
}

fn joined_result(
    joined: std::result::Result<Result<ResultRecord>, JoinError>,
) -> Result<ResultRecord> {
    joined.map_err(|e| ProcmuxError::Other(anyhow!("pipeline worker failed: {e}")))?
}
