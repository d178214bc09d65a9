//! Runs a scenario across transports
//!
//! In parallel mode every transport gets its own tokio task. The first real
//! failure cancels the others, and the coordinator still waits for them so
//! their processes are cleaned up before it returns.

use std::collections::HashMap;
use std::future::Future;

use tokio::task::JoinSet;

use crate::cancel::{CancelHandle, CancelSignal};
use crate::common::config::RunConfig;
use crate::common::Error;
use crate::report::RunFailure;
use crate::transport::TransportMode;

/// Result of one transport run
pub type RunResult = Result<(), RunFailure>;

/// Parallel or sequential execution over the enabled transports
#[derive(Debug, Clone, Copy)]
pub struct Coordinator {
    parallel: bool,
    remote: bool,
}

impl Coordinator {
    pub fn new(parallel: bool, remote: bool) -> Self {
        Self { parallel, remote }
    }

    pub fn from_config(run: &RunConfig) -> Self {
        Self::new(run.parallel, run.remote)
    }

    /// Transports that will run, in sequential order
    pub fn modes(&self) -> Vec<TransportMode> {
        if self.remote {
            TransportMode::ALL.to_vec()
        } else {
            vec![TransportMode::Local]
        }
    }

    /// Run `worker` once per transport and report the first failure
    pub async fn run<W, Fut>(&self, worker: W) -> RunResult
    where
        W: Fn(TransportMode, CancelSignal) -> Fut,
        Fut: Future<Output = RunResult> + Send + 'static,
    {
        if self.parallel && self.modes().len() > 1 {
            self.run_parallel(worker).await
        } else {
            self.run_sequential(worker).await
        }
    }

    async fn run_sequential<W, Fut>(&self, worker: W) -> RunResult
    where
        W: Fn(TransportMode, CancelSignal) -> Fut,
        Fut: Future<Output = RunResult>,
    {
        for mode in self.modes() {
            tracing::debug!(mode = %mode, "Running transport");
            worker(mode, CancelSignal::never()).await?;
        }
        Ok(())
    }

    async fn run_parallel<W, Fut>(&self, worker: W) -> RunResult
    where
        W: Fn(TransportMode, CancelSignal) -> Fut,
        Fut: Future<Output = RunResult> + Send + 'static,
    {
        let cancel = CancelHandle::new();
        let mut workers = JoinSet::new();
        let mut modes = HashMap::new();

        for mode in self.modes() {
            let handle = workers.spawn(worker(mode, cancel.signal()));
            modes.insert(handle.id(), mode);
        }

        let mut first: Option<RunFailure> = None;
        while let Some(joined) = workers.join_next_with_id().await {
            let failure = match joined {
                Ok((_, Ok(()))) => continue,
                Ok((_, Err(failure))) if failure.is_cancelled() => continue,
                Ok((_, Err(failure))) => failure,
                Err(e) => {
                    let mode = modes
                        .get(&e.id())
                        .copied()
                        .unwrap_or(TransportMode::Local);
                    let message = if e.is_panic() {
                        panic_message(e.into_panic())
                    } else {
                        e.to_string()
                    };
                    RunFailure::without_session(
                        Error::WorkerPanicked {
                            mode: mode.to_string(),
                            message,
                        },
                        mode,
                    )
                }
            };

            if first.is_none() {
                tracing::debug!(mode = %failure.mode, "Transport failed, cancelling the others");
                cancel.cancel();
                first = Some(failure);
            } else {
                tracing::debug!(mode = %failure.mode, "Ignoring later failure");
            }
        }

        match first {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
