//! Logging setup
//!
//! All modules log through `tracing` macros; this installs the subscriber.

use tracing_subscriber::EnvFilter;

/// Initialize tracing output on stderr
///
/// Call early in main() before any logging occurs.
/// `RUST_LOG` takes precedence; otherwise `verbose` selects debug over info.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbose)));

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_file(false)
                .compact(),
        )
        .with(filter)
        .try_init();
}

fn default_level(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}
