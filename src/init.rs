use crate::apm::ApmAgent;
use crate::backend::sink_from_env;
use crate::config::{ConfigError, WriterConfig};
use crate::layer::ElasticLayer;
use crate::sink::LogSink;
use crate::writer::{ElasticWriter, Writer};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Configuration of the global logging setup.
///
/// **Fields**
/// - `writer`: batching, store and level settings of the [`ElasticWriter`].
/// - `enable_stdout`: if `true`, a `tracing_subscriber::fmt::Layer` is added
///   next to [`ElasticLayer`] so events are also printed to the console.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub writer: WriterConfig,
    pub enable_stdout: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            writer: WriterConfig::default(),
            enable_stdout: true,
        }
    }
}

/// Initialize the global `tracing` subscriber with an [`ElasticWriter`]
/// built from `sink`, an optional APM agent and `config`.
///
/// **Effects**
///
/// Installs a [`Registry`] combined with [`ElasticLayer`] as the global
/// default subscriber, so all `tracing` events in the process reach the
/// writer. Must be called inside a Tokio runtime.
///
/// The returned writer can be used to flush before the process exits.
pub fn init_tracing_with_config(
    sink: Arc<dyn LogSink>,
    apm: Option<Arc<dyn ApmAgent>>,
    config: LayerConfig,
) -> Result<Arc<ElasticWriter>, ConfigError> {
    let mut builder = ElasticWriter::builder().sink(sink).config(config.writer);
    if let Some(apm) = apm {
        builder = builder.apm(apm);
    }
    let writer = Arc::new(builder.build()?);
    let layer = ElasticLayer::new(writer.clone() as Arc<dyn Writer>);

    // The two subscriber shapes have different types, hence two branches.
    let installed = if config.enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)
    };
    installed.map_err(|_| ConfigError::SubscriberAlreadySet)?;

    Ok(writer)
}

/// Initialize tracing with default settings.
///
/// Equivalent to calling [`init_tracing_with_config`] without an APM agent
/// and with [`LayerConfig::default`].
pub fn init_tracing(sink: Arc<dyn LogSink>) -> Result<Arc<ElasticWriter>, ConfigError> {
    init_tracing_with_config(sink, None, LayerConfig::default())
}

/// Initialize tracing entirely from `ELASTIC_LOG_*` variables.
///
/// An index named in the DSN path takes precedence over
/// `ELASTIC_LOG_INDEX`.
pub fn init_tracing_from_env(
    apm: Option<Arc<dyn ApmAgent>>,
) -> Result<Arc<ElasticWriter>, ConfigError> {
    let mut writer = WriterConfig::from_env();
    let (sink_config, sink) = sink_from_env(writer.timeout)?;
    if let Some(index) = sink_config.index {
        writer.index = index;
    }

    init_tracing_with_config(
        sink,
        apm,
        LayerConfig {
            writer,
            enable_stdout: true,
        },
    )
}
