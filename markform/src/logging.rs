//! Diagnostics for the `markform` binary.
//!
//! The engine reports its work through `tracing` events.
//! This module only decides where they go: stderr, filtered by `RUST_LOG`,
//! so stdout stays clean for `--json` output and piped documents.
//!
//! Nothing logged here is durable. The lasting account of a fill is the
//! `<doc>.fill.json` sidecar written by `io::fill_record`, and it is written
//! the same way whatever the filter says.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Level used when `RUST_LOG` is unset or unparsable.
const DEFAULT_FILTER: &str = "warn";

/// Install the stderr subscriber. Call once, first thing in `main`.
///
/// `RUST_LOG=markform=debug` traces every patch batch and fill turn;
/// `RUST_LOG=markform::fill=debug` narrows that to the harness.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
