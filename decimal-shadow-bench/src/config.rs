use anyhow::{Context, Result, ensure};

use crate::{
    catalog::Operation,
    cli::Cli,
    decimal::{Decimal, DecimalContext},
};

/// Validated settings for one harness run.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub server: String,
    pub clients: usize,
    pub pool_size: usize,
    pub iterations: usize,
    pub clear: bool,
    pub baseline: Option<String>,
    pub verify: bool,
    pub seed: Option<u64>,
    /// Operations workers are sampled from; empty means the whole catalog.
    pub operations: Vec<Operation>,
}

impl HarnessConfig {
    /// Defaults matching the command line: one worker, batches of 100.
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            clients: 1,
            pool_size: 0,
            iterations: 100,
            clear: false,
            baseline: None,
            verify: true,
            seed: None,
            operations: Vec::new(),
        }
    }

    pub fn from_cli(cli: Cli) -> Result<Self> {
        let config = Self {
            server: cli.server,
            clients: cli.clients,
            pool_size: cli.pool_size,
            iterations: cli.iterations,
            clear: cli.clear,
            baseline: cli.baseline,
            verify: !cli.no_verify,
            seed: cli.seed,
            operations: cli.operations,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.clients > 0, "at least one client is required");
        ensure!(self.iterations > 0, "iterations per batch must be positive");
        ensure!(
            self.pool_size == 0 || self.pool_size >= self.clients,
            "pool size {} cannot hold a session for each of the {} clients",
            self.pool_size,
            self.clients
        );
        ensure!(
            self.baseline.is_none() || self.clear,
            "a baseline only applies together with the clear step"
        );
        self.baseline_value(&DecimalContext::decimal128())?;
        Ok(())
    }

    /// The parsed baseline, or `None` when registers start at zero.
    pub fn baseline_value(&self, ctx: &DecimalContext) -> Result<Option<Decimal>> {
        let Some(text) = &self.baseline else {
            return Ok(None);
        };
        let value = ctx
            .parse(text)
            .with_context(|| format!("invalid baseline '{text}'"))?;
        ensure!(!value.is_nan(), "baseline must be a finite decimal");
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    fn parse(args: &[&str]) -> Result<HarnessConfig> {
        let mut argv = vec!["decimal-shadow-bench"];
        argv.extend_from_slice(args);
        HarnessConfig::from_cli(Cli::try_parse_from(argv)?)
    }

    #[test]
    fn defaults_verify_against_the_local_store() {
        let config = parse(&[]).expect("defaults are valid");
        assert_eq!(config.server, "127.0.0.1:7379");
        assert_eq!(config.clients, 1);
        assert_eq!(config.iterations, 100);
        assert!(config.verify);
        assert!(!config.clear);
    }

    #[test]
    fn rejects_zero_clients_and_zero_batches() {
        assert!(parse(&["-n", "0"]).is_err());
        assert!(parse(&["-i", "0"]).is_err());
    }

    #[test]
    fn pool_must_fit_every_worker() {
        assert!(parse(&["-n", "4", "-p", "2"]).is_err());
        assert!(parse(&["-n", "4", "-p", "4"]).is_ok());
        assert!(parse(&["-n", "4", "-p", "0"]).is_ok());
    }

    #[test]
    fn baseline_must_be_a_finite_decimal() {
        assert!(parse(&["-c", "--baseline", "abc"]).is_err());
        assert!(parse(&["-c", "--baseline", "NaN"]).is_err());

        let config = parse(&["-c", "--baseline", "0.000000000000000000000000000000001"])
            .expect("epsilon baseline");
        let ctx = DecimalContext::decimal128();
        assert_eq!(
            config.baseline_value(&ctx).unwrap(),
            Some(ctx.parse("1E-33").unwrap())
        );
    }

    #[test]
    fn no_verify_turns_off_the_comparison() {
        assert!(!parse(&["--no-verify"]).unwrap().verify);
    }
}
