//! Ambient stack: tracing setup shared by both binaries.

use tracing_subscriber::EnvFilter;

/// Initializes a `tracing-subscriber` formatter reading `RUST_LOG` (falling
/// back to a verbosity-derived default), following the same
/// `EnvFilter`-based approach as the agent fleet control plane this crate
/// is modeled on.
pub fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
