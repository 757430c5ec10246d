use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::config::UploaderConfig;

pub fn get_env_filter() -> tracing_subscriber::EnvFilter {
    // RUST_LOG used to control logging level.
    tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::default()
            .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
    })
}

pub fn get_log_layer<S>(structured_logging: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    S: tracing::Subscriber,
{
    if structured_logging {
        return Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false),
        );
    }

    Box::new(tracing_subscriber::fmt::layer().compact())
}

pub fn setup_tracing(config: &UploaderConfig) {
    init(config.structured_logging);
}

/// Installs the global subscriber. Safe to call more than once; later calls
/// only log that a subscriber is already set.
pub fn init(structured_logging: bool) {
    let log_layer = get_log_layer(structured_logging);
    let subscriber =
        tracing_subscriber::Registry::default().with(log_layer.with_filter(get_env_filter()));

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        error!("logger was already initiated, continuing: {:?}", e);
    }
}
