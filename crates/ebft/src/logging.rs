use std::io;

use ebft_util_error::{Whatever, WhateverResult};
use snafu::FromString as _;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Log to stderr; `RUST_LOG` takes precedence over `default_level`
pub fn init_logging(default_level: LevelFilter) -> WhateverResult<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|err| {
            Whatever::without_source(format!("Failed to initialize logging: {err}"))
        })?;

    Ok(())
}
