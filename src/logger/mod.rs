// SPDX-License-Identifier: GPL-3.0-only

use anyhow::{Context, Result};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn default_filter() -> EnvFilter {
    if cfg!(debug_assertions) {
        EnvFilter::new("warn,cosmic_output_management=debug")
    } else {
        EnvFilter::new("warn")
    }
}

/// Installs the global subscriber, forwarding `log` records and panics to
/// it. `RUST_LOG` overrides the default filter.
pub fn init_logger() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());
    let fmt_layer = fmt::layer().with_writer(std::io::stderr).compact();

    #[cfg(feature = "systemd")]
    let journald = match tracing_journald::layer() {
        Ok(layer) => Some(layer),
        Err(err) => {
            eprintln!("Failed to connect to journald: {err}");
            None
        }
    };
    #[cfg(not(feature = "systemd"))]
    let journald: Option<tracing_subscriber::layer::Identity> = None;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(journald)
        .try_init()
        .context("Failed to install the tracing subscriber")?;
    log_panics::init();

    info!("Version: {}", std::env!("CARGO_PKG_VERSION"));
    if cfg!(debug_assertions) {
        debug!(
            "Debug build ({})",
            std::option_env!("GIT_HASH").unwrap_or("Unknown")
        );
    }
    Ok(())
}
