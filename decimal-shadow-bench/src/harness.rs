//! Top-level run: probe, optional clear, spawn, drain, report.

use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::task::JoinSet;
use tracing::info;

use crate::{
    catalog::{KEY_PATTERN, Operation},
    config::HarnessConfig,
    decimal::{Decimal, DecimalContext},
    report::Report,
    shadow::{Location, Register, ShadowState},
    shutdown::{Shutdown, drain, termination_signal},
    store::{Session, StoreError, StorePool},
    worker::{RunCounters, Worker, WorkerSummary},
};

/// State shared by every worker of one run.
#[derive(Debug)]
pub struct RunContext {
    pub decimal: DecimalContext,
    pub shadow: ShadowState,
    pub counters: RunCounters,
    pub shutdown: Shutdown,
    pub pool: StorePool,
    pub iterations: usize,
}

#[derive(Debug)]
pub struct Outcome {
    pub report: Report,
    pub workers: Vec<WorkerSummary>,
}

pub struct Harness {
    config: HarnessConfig,
    context: Arc<RunContext>,
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        let decimal = DecimalContext::decimal128();

        let context = RunContext {
            decimal,
            shadow: ShadowState::new(decimal),
            counters: RunCounters::default(),
            shutdown: Shutdown::new(),
            pool: StorePool::new(config.server.clone(), config.pool_size),
            iterations: config.iterations,
        };

        Ok(Self {
            config,
            context: Arc::new(context),
        })
    }

    /// Handle to this run's cancellation signal.
    pub fn shutdown(&self) -> Shutdown {
        self.context.shutdown.clone()
    }

    /// Runs until SIGINT, SIGTERM or SIGQUIT. The handlers are in place
    /// before any worker starts.
    pub async fn run_until_terminated(self) -> Result<Outcome> {
        let signal = termination_signal();
        self.run_until(signal).await
    }

    /// Runs until `signal` resolves (or a worker fails), then drains the
    /// workers and reports.
    pub async fn run_until<F>(self, signal: F) -> Result<Outcome>
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        let Harness { config, context } = self;

        {
            let mut session = context
                .pool
                .session()
                .await
                .with_context(|| format!("store at {} is unreachable", context.pool.addr()))?;
            session.ping().await.context("liveness probe failed")?;

            if config.clear {
                // The store gets the parsed baseline text, so both sides
                // start from the same rounded value.
                let baseline = config.baseline_value(&context.decimal)?;
                let seeded = baseline.as_ref().map(Decimal::to_string);
                clear_tracked_keys(&mut session, seeded.as_deref())
                    .await
                    .context("clear step failed")?;
                context
                    .shadow
                    .reset(&baseline.unwrap_or_else(|| context.decimal.zero()));
            }
        }

        let workers = spawn_workers(&config, &context);
        let summaries = drain(workers, &context.shutdown, signal).await?;

        let report = report(&config, &context, started.elapsed()).await?;
        report.log();

        Ok(Outcome {
            report,
            workers: summaries,
        })
    }
}

fn spawn_workers(config: &HarnessConfig, context: &Arc<RunContext>) -> JoinSet<Result<WorkerSummary>> {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut workers = JoinSet::new();
    for index in 0..config.clients {
        let operation = Operation::sample(&config.operations, &mut rng);
        info!(index, op = operation.name(), "assigned operation");
        let worker = Worker::new(index, operation, rng.gen(), Arc::clone(context));
        workers.spawn(worker.run());
    }
    workers
}

async fn report(config: &HarnessConfig, context: &RunContext, elapsed: Duration) -> Result<Report> {
    let mut session = context
        .pool
        .session()
        .await
        .context("could not open a session for the report")?;
    let report = Report::collect(
        &mut session,
        &context.shadow,
        &context.decimal,
        config.verify,
        context.counters.completed(),
        elapsed,
    )
    .await
    .context("failed to read final store state")?;
    Ok(report)
}

/// Deletes every `bn:*` key. With a baseline, every tracked key and field is
/// then written back with that value. Running it twice leaves the same
/// state as running it once.
pub async fn clear_tracked_keys(
    session: &mut Session,
    baseline: Option<&str>,
) -> Result<usize, StoreError> {
    let keys = session.keys(KEY_PATTERN).await?;
    for key in &keys {
        info!(%key, "del key");
        session.del(key).await?;
    }

    if let Some(baseline) = baseline {
        for register in Register::ALL {
            match register.location() {
                Location::Key(key) => session.set(key, baseline).await?,
                Location::Field { group, field } => session.hset(group, field, baseline).await?,
            }
        }
        info!(baseline, "tracked keys seeded");
    }

    Ok(keys.len())
}
