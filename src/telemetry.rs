use anyhow::{Context, Result};
use tracing::subscriber::set_global_default;
use tracing::Subscriber;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

pub const SERVICE_NAME: &str = "allotment";

/// Request and store logs at info; sqlx statement logging only when it warns.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// `RUST_LOG` when it is set and parses, `default` otherwise.
pub fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Bunyan JSON lines, one per event and span boundary, written to `sink`.
pub fn get_subscriber<Sink>(name: &str, filter: EnvFilter, sink: Sink) -> impl Subscriber + Sync + Send
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let formatting_layer = BunyanFormattingLayer::new(name.to_string(), sink);

    Registry::default()
        .with(filter)
        .with(JsonStorageLayer)
        .with(formatting_layer)
}

/// Installs `subscriber` process-wide and routes `log` records from sqlx
/// and hyper through it. Fails if called twice.
pub fn init_subscriber(subscriber: impl Subscriber + Sync + Send) -> Result<()> {
    LogTracer::init().context("Failed to set logger")?;
    set_global_default(subscriber).context("Failed to set subscriber")?;

    Ok(())
}
