//! Tracing setup for the `cukepub` binary.
//!
//! Logs go to stderr so stdout stays free for the publish summary. Filtering
//! comes from `CUKEPUB_LOG`, then `RUST_LOG`, then the requested level for
//! cukepub targets with dependencies held at `warn`.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable with filter directives for cukepub only.
pub const LOG_ENV: &str = "CUKEPUB_LOG";

/// Default directives when no environment filter is set.
pub fn default_directives(level: Level) -> String {
    format!("warn,cukepub_core={level},cukepub={level}").to_lowercase()
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Initialise the global subscriber. Only the first call in a process wins.
///
/// JSON output carries the enclosing `cukepub.publish` span (build id and
/// project) on every line.
pub fn init_tracing(json: bool, level: Level) {
    let filter = env_filter(level);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}
