//! Structured telemetry initialisation for embedders.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use tessera_config::{LogFormat, LoggingConfig};

static INSTALLED: OnceCell<LoggingConfig> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Clone, Copy)]
pub struct TelemetryHandle {
    config: &'static LoggingConfig,
}

impl TelemetryHandle {
    /// Settings the global subscriber was installed with.
    #[must_use]
    pub fn config(&self) -> &'static LoggingConfig {
        self.config
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global tracing subscriber on first use.
///
/// Later calls leave the global state alone, whatever configuration they
/// pass, and return a handle describing the subscriber already installed.
///
/// # Examples
///
/// ```rust
/// use tessera_config::LoggingConfig;
/// use tessera_lsp::telemetry;
///
/// # fn main() -> Result<(), tessera_lsp::telemetry::TelemetryError> {
/// let logging = LoggingConfig::default();
/// let _handle = telemetry::initialise(&logging)?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for an invalid filter expression and
/// [`TelemetryError::Subscriber`] when another global subscriber is already
/// installed.
pub fn initialise(config: &LoggingConfig) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED
        .get_or_try_init(|| install_subscriber(config).map(|()| config.clone()))
        .map(|config| TelemetryHandle { config })
}

fn install_subscriber(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(&config.filter)?;

    let builder = |filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .with_thread_names(true)
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.format {
        LogFormat::Json => Box::new(builder(filter).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(filter).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

fn build_filter(filter: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(filter).map_err(|error| TelemetryError::Filter(error.to_string()))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("info")]
    #[case("tessera_lsp::rpc=trace,warn")]
    fn accepts_directive_filters(#[case] filter: &str) {
        assert!(build_filter(filter).is_ok());
    }

    #[rstest]
    fn later_initialisations_keep_the_first_subscriber() {
        let first = LoggingConfig {
            filter: String::from("tessera_lsp=debug"),
            format: LogFormat::Compact,
        };
        let installed = initialise(&first).expect("first initialisation installs");

        let ignored = LoggingConfig {
            filter: String::from("tessera_lsp=notalevel"),
            format: LogFormat::Json,
        };
        let again = initialise(&ignored).expect("later initialisations are no-ops");

        assert_eq!(installed.config(), &first);
        assert_eq!(again.config(), &first);
    }

    #[rstest]
    fn rejects_malformed_filters() {
        assert!(matches!(
            build_filter("tessera_lsp=notalevel"),
            Err(TelemetryError::Filter(_))
        ));
    }
}
