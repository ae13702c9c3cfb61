//! Subscriber assembly

use crate::{
    config::{LogFormat, TelemetryConfig},
    Error, Result,
};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Installs the global `tracing` subscriber.
pub struct TelemetrySystem;

/// Keeps the background log writer alive. Dropping it flushes pending lines.
#[must_use = "dropping the guard stops file logging"]
pub struct TelemetryGuard {
    _file_guard: Option<WorkerGuard>,
}

impl TelemetrySystem {
    /// Initialize logging with the given configuration.
    ///
    /// Fails if a global subscriber is already installed.
    pub fn init(config: &TelemetryConfig) -> Result<TelemetryGuard> {
        config.validate()?;

        let mut layers: Vec<BoxedLayer> = Vec::new();
        if let Some(console) = Self::build_console_layer(config) {
            layers.push(console);
        }
        let file_guard = match Self::build_file_layer(config) {
            Some((layer, guard)) => {
                layers.push(layer);
                Some(guard)
            }
            None => None,
        };

        Registry::default()
            .with(layers)
            .with(Self::build_env_filter(config)?)
            .try_init()
            .map_err(|e| Error::System {
                message: format!("Failed to initialize tracing subscriber: {}", e),
            })?;

        tracing::debug!(
            telemetry.event = "system_initialized",
            telemetry.version = env!("CARGO_PKG_VERSION"),
            format = ?config.logging.format,
            file_logging = file_guard.is_some(),
            "Telemetry initialized"
        );

        Ok(TelemetryGuard {
            _file_guard: file_guard,
        })
    }

    /// Configured level with noisy HTTP crates pinned to `warn`. `RUST_LOG` wins when set.
    pub(crate) fn build_env_filter(config: &TelemetryConfig) -> Result<EnvFilter> {
        if !config.enabled {
            return Ok(EnvFilter::new("off"));
        }

        if let Ok(env_filter) = std::env::var("RUST_LOG") {
            if !env_filter.trim().is_empty() {
                return Ok(EnvFilter::new(env_filter));
            }
        }

        let level: Level = config.logging.level.into();
        let mut filter = EnvFilter::new(level.to_string());
        for directive in ["hyper=warn", "reqwest=warn", "h2=warn"] {
            filter = filter.add_directive(directive.parse().map_err(|e| Error::Config {
                message: format!("Invalid filter directive '{}': {}", directive, e),
            })?);
        }

        Ok(filter)
    }

    fn build_console_layer(config: &TelemetryConfig) -> Option<BoxedLayer> {
        if !config.enabled || !config.logging.console_enabled {
            return None;
        }

        let logging = &config.logging;
        let layer = match logging.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_span_list(false)
                .with_target(true)
                .with_file(logging.include_location)
                .with_line_number(logging.include_location)
                .with_thread_ids(logging.include_thread_info)
                .with_thread_names(logging.include_thread_info)
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(logging.include_location)
                .with_line_number(logging.include_location)
                .with_thread_ids(logging.include_thread_info)
                .with_thread_names(logging.include_thread_info)
                .boxed(),
            LogFormat::Compact => fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_file(logging.include_location)
                .with_line_number(logging.include_location)
                .with_thread_ids(logging.include_thread_info)
                .with_thread_names(logging.include_thread_info)
                .boxed(),
        };

        Some(layer)
    }

    /// Daily rolling file, written by a background worker.
    fn build_file_layer(config: &TelemetryConfig) -> Option<(BoxedLayer, WorkerGuard)> {
        if !config.enabled || !config.logging.file_enabled {
            return None;
        }

        let logging = &config.logging;
        let appender =
            tracing_appender::rolling::daily(&logging.log_dir, &logging.log_file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);

        let layer = match logging.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_current_span(true)
                .with_span_list(false)
                .with_target(true)
                .with_file(logging.include_location)
                .with_line_number(logging.include_location)
                .with_thread_ids(logging.include_thread_info)
                .with_thread_names(logging.include_thread_info)
                .boxed(),
            LogFormat::Pretty | LogFormat::Compact => fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_file(logging.include_location)
                .with_line_number(logging.include_location)
                .with_thread_ids(logging.include_thread_info)
                .with_thread_names(logging.include_thread_info)
                .boxed(),
        };

        Some((layer, guard))
    }
}
