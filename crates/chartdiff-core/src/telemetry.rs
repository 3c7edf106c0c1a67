//! Subscriber setup for chartdiff binaries.
//!
//! Without `RUST_LOG`, the chartdiff crates log at the requested level and
//! dependencies only at `warn`. Closing `chartdiff.publish` and
//! `chartdiff.render` spans (see [`crate::obs`]) are logged with their busy
//! and idle time, which gives one timing line per publish and per variant.
//! Output goes to stderr; stdout is left to command results.

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const CRATES: &[&str] = &["chartdiff", "chartdiff_core", "chartdiff_exec", "chartdiff_state"];

/// `warn,chartdiff=<level>,chartdiff_core=<level>,...`
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    std::iter::once("warn".to_string())
        .chain(CRATES.iter().map(|krate| format!("{krate}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber; later calls are no-ops.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let layer = fmt::layer()
        .with_target(false)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr);

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry.with(layer.json().with_current_span(true)).try_init()
    } else {
        registry.with(layer).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
