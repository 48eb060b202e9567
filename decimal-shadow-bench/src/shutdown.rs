//! Cooperative cancellation and the drain that follows it.

use std::{future::Future, sync::Arc};

use anyhow::{Result, anyhow};
use tokio::{select, sync::watch, task::JoinSet};
use tracing::{debug, error, info, warn};

use crate::worker::WorkerSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Draining,
    Stopped,
}

/// Write-once cancellation signal shared by the coordinator and every
/// worker. Cloning yields another handle to the same signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    phase: Arc<watch::Sender<Phase>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (phase, _) = watch::channel(Phase::Running);
        Self {
            phase: Arc::new(phase),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Moves Running to Draining. Returns `true` only for the call that
    /// made the transition.
    pub fn trigger(&self) -> bool {
        self.phase.send_if_modified(|phase| {
            if *phase == Phase::Running {
                *phase = Phase::Draining;
                true
            } else {
                false
            }
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.phase() != Phase::Running
    }

    pub async fn cancelled(&self) {
        let mut phase = self.phase.subscribe();
        // The sender lives in self, so the channel cannot close here.
        let _ = phase.wait_for(|phase| *phase != Phase::Running).await;
    }

    fn finish(&self) {
        self.phase.send_replace(Phase::Stopped);
    }
}

/// Installs SIGINT, SIGTERM and SIGQUIT handlers right away and returns a
/// future that resolves on the first of them.
#[cfg(unix)]
pub fn termination_signal() -> impl Future<Output = ()> {
    use tokio::signal::unix::{SignalKind, signal};

    let handlers = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::quit()),
    );
    async move {
        let (mut interrupt, mut terminate, mut quit) = match handlers {
            (Ok(interrupt), Ok(terminate), Ok(quit)) => (interrupt, terminate, quit),
            _ => {
                warn!("failed to install unix signal handlers, falling back to ctrl-c");
                ctrl_c().await;
                return;
            }
        };

        let name = select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
            _ = quit.recv() => "SIGQUIT",
        };
        info!(signal = name, "termination signal received");
    }
}

#[cfg(not(unix))]
pub fn termination_signal() -> impl Future<Output = ()> {
    ctrl_c()
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = ?err, "failed to install ctrl-c handler");
    }
}

/// Waits for every worker to return.
///
/// `signal` completing, or any worker failing, asserts `shutdown`; the
/// remaining workers then finish their current batch and return. The first
/// worker error is handed back once all of them are gone.
pub async fn drain<F>(
    mut workers: JoinSet<Result<WorkerSummary>>,
    shutdown: &Shutdown,
    signal: F,
) -> Result<Vec<WorkerSummary>>
where
    F: Future<Output = ()>,
{
    tokio::pin!(signal);
    let mut summaries = Vec::with_capacity(workers.len());
    let mut failure = None;

    loop {
        select! {
            _ = &mut signal, if !shutdown.is_cancelled() => {
                if shutdown.trigger() {
                    info!(workers = workers.len(), "draining workers");
                }
            }
            joined = workers.join_next() => {
                let outcome = match joined {
                    None => break,
                    Some(Ok(outcome)) => outcome,
                    Some(Err(err)) => Err(anyhow!(err).context("worker task panicked")),
                };
                match outcome {
                    Ok(summary) => summaries.push(summary),
                    Err(err) if failure.is_none() => {
                        error!(error = ?err, "worker failed, cancelling the run");
                        shutdown.trigger();
                        failure = Some(err);
                    }
                    Err(err) => debug!(error = ?err, "worker failed while draining"),
                }
            }
        }
    }

    shutdown.finish();
    info!(completed = summaries.len(), "all workers stopped");

    match failure {
        Some(err) => Err(err),
        None => {
            summaries.sort_by_key(|summary| summary.index);
            Ok(summaries)
        }
    }
}
