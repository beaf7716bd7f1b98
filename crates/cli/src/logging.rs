use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Stderr subscriber so stdout only carries command output.
///
/// `RUST_LOG` wins over the configured filter.
pub fn init(log_filter: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .init();
}
