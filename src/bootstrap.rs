//! Bootstrap utilities for digsinet processes.
//!
//! Shared initialization for the CLI entrypoint and every spawned
//! controller process.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the DIGSINET_LOG environment variable.
///
/// When DIGSINET_LOG is not set, the level defaults to "debug" or "info"
/// depending on the `--debug` flag. Spawned controllers inherit the parent's
/// DIGSINET_LOG, so one flag governs the whole process tree.
pub fn init_tracing(debug: bool) {
    let default_directive = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
