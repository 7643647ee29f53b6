//! Structured logging bootstrap.
//!
//! Builds a `tracing` subscriber that writes bunyan-formatted JSON to a given
//! sink, filtered by `RUST_LOG`/`LOG_LEVEL`-style env directives, and routes
//! the legacy `log` facade through it so dependencies using `log::*` still
//! show up.

use std::io::Write as _;

use tracing::Subscriber;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Builds (but does not install) a subscriber named `name`, filtering via
/// `env_filter` (a default directive used when `RUST_LOG` is unset) and
/// writing bunyan JSON lines to `sink`.
pub fn get_subscriber<Sink>(
	name: String,
	env_filter: String,
	sink: Sink,
) -> impl Subscriber + Send + Sync
where
	Sink: for<'a> tracing_subscriber::fmt::MakeWriter<'a> + Send + Sync + 'static,
{
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));
	let formatting_layer = BunyanFormattingLayer::new(name, sink);
	Registry::default()
		.with(env_filter)
		.with(JsonStorageLayer)
		.with(formatting_layer)
}

/// Installs `subscriber` as the global default and redirects the `log` crate
/// facade through `tracing`. Must be called exactly once, as early in `main`
/// as possible.
pub fn init_subscriber(subscriber: impl Subscriber + Send + Sync) {
	tracing_log::LogTracer::init().expect("failed to set logger");
	tracing::subscriber::set_global_default(subscriber).expect("failed to set subscriber");
}

/// A [`tracing_subscriber::fmt::MakeWriter`] that writes nowhere, for tests
/// that don't want log noise but still want the formatting layer to run.
pub struct NoOpWriter;

impl std::io::Write for NoOpWriter {
	fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
		Ok(buf.len())
	}
	fn flush(&mut self) -> std::io::Result<()> {
		Ok(())
	}
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for NoOpWriter {
	type Writer = NoOpWriter;
	fn make_writer(&'a self) -> Self::Writer {
		NoOpWriter
	}
}

/// Initializes a subscriber for test binaries, honoring `TEST_LOG=1` to
/// print to stdout instead of discarding output.
pub fn init_test_subscriber() {
	static INIT: std::sync::Once = std::sync::Once::new();
	INIT.call_once(|| {
		if std::env::var("TEST_LOG").is_ok() {
			let subscriber = get_subscriber("test".into(), "info".into(), std::io::stdout);
			init_subscriber(subscriber);
		} else {
			let subscriber = get_subscriber("test".into(), "info".into(), || NoOpWriter);
			init_subscriber(subscriber);
		}
	});
}

/// Flushes stdout/stderr; useful before process exit in the CLI binary so
/// the last bunyan line isn't lost to buffering.
pub fn flush_logs() {
	let _ = std::io::stdout().flush();
	let _ = std::io::stderr().flush();
}
