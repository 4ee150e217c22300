//! # Structured Logging Module
//!
//! Console logging for applications embedding the publisher.
//!
//! - Filter comes from `RUST_LOG`, falling back to a level derived from
//!   `PUBLISHER_ENV` (`production` logs at `info`, everything else at `debug`)
//! - `PUBLISHER_LOG_FORMAT=json` switches the console layer to JSON records
//! - ANSI colors only when stdout is a terminal
//!
//! Initialization is idempotent and never panics when the host application has
//! already installed a global subscriber.

use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Console output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Plain,
    Json,
}

/// Resolved logging settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub environment: String,
    pub filter: String,
    pub format: LogFormat,
}

impl LogSettings {
    /// Read settings from the process environment
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self::resolve(
            var("PUBLISHER_ENV"),
            var("RUST_LOG"),
            var("PUBLISHER_LOG_FORMAT"),
        )
    }

    fn resolve(
        environment: Option<String>,
        rust_log: Option<String>,
        format: Option<String>,
    ) -> Self {
        let environment = environment.unwrap_or_else(|| "development".to_string());
        let filter = rust_log.unwrap_or_else(|| default_level(&environment).to_string());
        let format = match format {
            Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Plain,
        };
        Self {
            environment,
            filter,
            format,
        }
    }
}

fn default_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Install the global subscriber once, using [`LogSettings::from_env`]
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let settings = LogSettings::from_env();
        let filter = EnvFilter::try_new(&settings.filter)
            .unwrap_or_else(|_| EnvFilter::new(default_level(&settings.environment)));

        let console_layer = match settings.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_filter(filter)
                .boxed(),
            LogFormat::Plain => fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_ansi(std::io::stdout().is_terminal())
                .with_filter(filter)
                .boxed(),
        };

        match tracing_subscriber::registry().with(console_layer).try_init() {
            Ok(()) => tracing::info!(
                environment = %settings.environment,
                filter = %settings.filter,
                format = ?settings.format,
                "Structured logging initialized"
            ),
            Err(_) => tracing::debug!("Global tracing subscriber already installed"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_environment() {
        let dev = LogSettings::resolve(None, None, None);
        assert_eq!(dev.environment, "development");
        assert_eq!(dev.filter, "debug");
        assert_eq!(dev.format, LogFormat::Plain);

        let prod = LogSettings::resolve(Some("production".into()), None, None);
        assert_eq!(prod.filter, "info");
    }

    #[test]
    fn test_rust_log_and_format_override() {
        let settings = LogSettings::resolve(
            Some("production".into()),
            Some("confirmed_publisher=trace".into()),
            Some("JSON".into()),
        );
        assert_eq!(settings.filter, "confirmed_publisher=trace");
        assert_eq!(settings.format, LogFormat::Json);
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
    }
}
