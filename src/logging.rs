use std::io;

use tracing_subscriber::{EnvFilter, fmt};

/// Install the global subscriber. Output goes to stderr because stdout
/// carries the response in CGI mode. `RUST_LOG` overrides `default_level`.
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}
