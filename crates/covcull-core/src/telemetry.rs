//! Log subscriber setup for the `covcull` binary.
//!
//! stdout is reserved for the run report (text or `--report-json`), so every
//! log line goes to stderr. Without `RUST_LOG`, only covcull's own crates log
//! at the requested level; dependencies such as the HTTP stack stay at `warn`
//! so `-v` does not bury stage events under connection traces.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events follow the requested verbosity.
const OWN_TARGETS: &[&str] = &["covcull", "covcull_core", "covcull_gen"];

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: Level) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(OWN_TARGETS.iter().map(|t| format!("{t}={level}")));
    directives.join(",")
}

/// Install the global subscriber; `json` selects newline-delimited JSON.
///
/// Later calls are ignored, since a process has one global subscriber.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(layer.json()).try_init().ok();
    } else {
        registry.with(layer).try_init().ok();
    }
}
