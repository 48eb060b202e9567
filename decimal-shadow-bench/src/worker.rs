use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use anyhow::{Context, Result};
use rand::{SeedableRng, rngs::StdRng};
use tracing::{debug, info};

use crate::{
    catalog::{Amounts, Operation},
    harness::RunContext,
    store::Session,
};

/// Count of remote commands that completed successfully, across all workers.
#[derive(Debug, Default)]
pub struct RunCounters {
    completed: AtomicU64,
}

impl RunCounters {
    pub fn record(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSummary {
    pub index: usize,
    pub operation: Operation,
    pub completed: u64,
}

/// Issues one operation in a loop until the run is cancelled.
pub struct Worker {
    index: usize,
    operation: Operation,
    seed: u64,
    context: Arc<RunContext>,
}

impl Worker {
    pub fn new(index: usize, operation: Operation, seed: u64, context: Arc<RunContext>) -> Self {
        Self {
            index,
            operation,
            seed,
            context,
        }
    }

    /// Runs batches of `iterations` commands, checking for cancellation only
    /// between batches. The first failed command ends the worker with an
    /// error; the session is released on every exit path.
    pub async fn run(self) -> Result<WorkerSummary> {
        let Worker {
            index,
            operation,
            seed,
            context,
        } = self;

        let mut session = context
            .pool
            .session()
            .await
            .with_context(|| format!("worker {index} ({operation}) could not open a session"))?;
        let amounts = Amounts::new(&context.decimal)?;
        let mut rng = StdRng::seed_from_u64(seed);
        info!(index, op = operation.name(), "worker started");

        let mut completed = 0u64;
        while !context.shutdown.is_cancelled() {
            for _ in 0..context.iterations {
                execute(operation, &mut session, &context, &amounts, &mut rng)
                    .await
                    .with_context(|| {
                        format!("worker {index} ({operation}) failed after {completed} commands")
                    })?;
                completed += 1;
            }
        }

        debug!(index, op = operation.name(), completed, "worker drained");
        Ok(WorkerSummary {
            index,
            operation,
            completed,
        })
    }
}

async fn execute(
    operation: Operation,
    session: &mut Session,
    context: &RunContext,
    amounts: &Amounts,
    rng: &mut StdRng,
) -> Result<()> {
    let invocation = operation.plan(amounts, &context.decimal, rng)?;
    session
        .command(invocation.command.name, &invocation.command.args)
        .await?;

    if let Some(update) = &invocation.update {
        context.shadow.apply(update);
    }
    context.counters.record();
    Ok(())
}
