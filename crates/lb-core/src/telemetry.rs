// Originally derived from https://github.com/istio/ztunnel (Apache 2.0 licensed)

use std::env;
use std::time::Instant;

use once_cell::sync::Lazy;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry};

pub static APPLICATION_START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

/// setup_logging installs the global tracing subscriber. Logs are written
/// through a non-blocking writer; the returned guard must be held for the
/// lifetime of the process so buffered lines are flushed on exit.
///
/// The filter comes from RUST_LOG (default `info`); LOG_FORMAT=json switches
/// to newline-delimited JSON output.
pub fn setup_logging() -> WorkerGuard {
	Lazy::force(&APPLICATION_START_TIME);
	let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let use_json = env::var("LOG_FORMAT").unwrap_or_else(|_| "plain".to_string()) == "json";
	if use_json {
		Registry::default()
			.with(filter)
			.with(
				tracing_subscriber::fmt::layer()
					.with_writer(writer)
					.json()
					.flatten_event(true),
			)
			.init();
	} else {
		Registry::default()
			.with(filter)
			.with(tracing_subscriber::fmt::layer().with_writer(writer))
			.init();
	}
	guard
}

/// testing_logger is a best-effort subscriber install for unit tests; repeat
/// calls are no-ops.
pub fn testing_logger() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::new("debug"))
		.with_test_writer()
		.try_init();
}
