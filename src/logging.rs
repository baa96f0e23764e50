//! Log output for the CLI
//!
//! Logs go to stderr so stdout stays reserved for command output (tables,
//! JSON, deletion lines).

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is not set
const DEFAULT_FILTER: &str = "warn,ktrace=info";

/// Filter used with `--verbose`
const VERBOSE_FILTER: &str = "info,ktrace=debug";

/// Initialize the tracing subscriber
///
/// `RUST_LOG` always wins; otherwise `verbose` picks between the two
/// built-in filters.
pub fn init_logging(verbose: bool) {
    let fallback = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .with_file(false)
        .with_line_number(false);

    // try_init: a second call (tests) must not panic
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
