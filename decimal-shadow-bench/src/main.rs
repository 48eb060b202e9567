use anyhow::Result;
use clap::Parser;
use tracing::info;

use decimal_shadow_bench::{cli::Cli, config::HarnessConfig, harness::Harness};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = HarnessConfig::from_cli(Cli::parse())?;
    info!(
        server = %config.server,
        clients = config.clients,
        iterations = config.iterations,
        "starting harness"
    );

    let harness = Harness::new(config)?;
    harness.run_until_terminated().await?;

    Ok(())
}
