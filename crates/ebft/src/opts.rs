use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::filter::LevelFilter;

/// Run a whole EBFT validator set in one process
#[derive(Parser, Debug)]
#[command(version, about)]
pub(crate) struct Opts {
    /// Number of validators
    #[arg(long, env = "EBFT_VALIDATORS", default_value = "4")]
    pub validators: usize,

    /// Stop once every online validator committed a block at this height
    #[arg(long, env = "EBFT_TARGET_HEIGHT")]
    pub target_height: Option<u64>,

    /// JSON file with consensus settings (`EbftConfig`)
    #[arg(long, env = "EBFT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the tick interval from the config
    #[arg(long, env = "EBFT_TICK_MS")]
    pub tick_ms: Option<u64>,

    /// Override the revolt timeout from the config
    #[arg(long, env = "EBFT_REVOLT_TIMEOUT_MS")]
    pub revolt_timeout_ms: Option<u64>,

    /// Submit a transaction every that many milliseconds, `0` to disable
    #[arg(long, env = "EBFT_TX_INTERVAL_MS", default_value = "200")]
    pub tx_interval_ms: u64,

    /// Validators to keep offline, eg. to watch the others revolt
    #[arg(long = "offline")]
    pub offline: Vec<u8>,

    #[arg(long, env = "EBFT_LOG_LEVEL", default_value = "info")]
    pub log_level: LevelFilter,
}
