use clap::Parser;

use crate::catalog::Operation;

/// Drive concurrent bn.* commands against a decimal store and check the
/// results against a locally computed shadow.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Delete every bn:* key before starting the workers.
    #[arg(short = 'c', long)]
    pub clear: bool,

    /// Number of concurrent workers.
    #[arg(short = 'n', long, default_value_t = 1)]
    pub clients: usize,

    /// Maximum number of open store sessions; 0 means one per worker.
    #[arg(short = 'p', long, default_value_t = 0)]
    pub pool_size: usize,

    /// Address of the decimal store.
    #[arg(short = 's', long, default_value = "127.0.0.1:7379")]
    pub server: String,

    /// Commands each worker issues between cancellation checks.
    #[arg(short = 'i', long, default_value_t = 100)]
    pub iterations: usize,

    /// With --clear, seed every tracked key and shadow register to this value.
    #[arg(long, value_name = "DECIMAL", requires = "clear")]
    pub baseline: Option<String>,

    /// Only measure throughput; skip the store/shadow comparison.
    #[arg(long)]
    pub no_verify: bool,

    /// Seed for operation assignment and random magnitudes.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Restrict workers to these operations (repeatable, e.g. --op incr --op hrandom).
    #[arg(long = "op", value_name = "OP")]
    pub operations: Vec<Operation>,
}
