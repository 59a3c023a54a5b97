//! Tracing subscriber setup for applications embedding the client
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the application. [`setup_logging`] is a convenience for agent
//! consoles and demos that do not bring their own.
//!
//! Two levels are configurable: a base level for everything in the process and
//! an optional, usually more verbose, level for this crate's session traffic
//! (roster changes, note fan-out, transfer transitions). `RUST_LOG` directives
//! still apply on top of both.
//!
//! ```rust,no_run
//! use tracing::Level;
//! use warmline_client_core::logging::{setup_logging, LogFormat, LoggingConfig};
//!
//! setup_logging(
//!     LoggingConfig::new(Level::WARN)
//!         .with_session_level(Level::DEBUG)
//!         .with_format(LogFormat::Compact),
//! )?;
//! # Ok::<(), warmline_client_core::ClientError>(())
//! ```

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{ClientError, ClientResult};

/// Target prefix of every event this crate emits
pub const SESSION_LOG_TARGET: &str = "warmline_client_core";

/// Environment variable overriding [`LoggingConfig::level`]
pub const ENV_LOG_LEVEL: &str = "WARMLINE_LOG_LEVEL";

/// Environment variable overriding [`LoggingConfig::session_level`]
pub const ENV_SESSION_LOG_LEVEL: &str = "WARMLINE_SESSION_LOG_LEVEL";

/// Environment variable overriding [`LoggingConfig::format`]
pub const ENV_LOG_FORMAT: &str = "WARMLINE_LOG_FORMAT";

/// Output format of the installed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-field human readable lines
    #[default]
    Full,
    /// Single-line human readable output
    Compact,
    /// One JSON object per event, on stdout
    Json,
}

impl FromStr for LogFormat {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" | "pretty" => Ok(LogFormat::Full),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(ClientError::configuration(format!("Invalid log format: {}", other))),
        }
    }
}

/// Configuration for [`setup_logging`]
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Base level for every target
    pub level: Level,
    /// Level for [`SESSION_LOG_TARGET`] when it should differ from `level`
    pub session_level: Option<Level>,
    pub format: LogFormat,
    /// Include source file and line
    pub file_info: bool,
    /// Log span enter/exit
    pub log_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

impl LoggingConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            session_level: None,
            format: LogFormat::Full,
            file_info: false,
            log_spans: false,
        }
    }

    /// Defaults overlaid with [`ENV_LOG_LEVEL`], [`ENV_SESSION_LOG_LEVEL`] and
    /// [`ENV_LOG_FORMAT`]
    pub fn from_env() -> ClientResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ClientResult<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_LOG_LEVEL) {
            config.level = parse_log_level(&raw)?;
        }
        if let Some(raw) = lookup(ENV_SESSION_LOG_LEVEL) {
            config.session_level = Some(parse_log_level(&raw)?);
        }
        if let Some(raw) = lookup(ENV_LOG_FORMAT) {
            config.format = raw.parse()?;
        }
        Ok(config)
    }

    pub fn with_session_level(mut self, level: Level) -> Self {
        self.session_level = Some(level);
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file_info(mut self, enabled: bool) -> Self {
        self.file_info = enabled;
        self
    }

    pub fn with_spans(mut self, enabled: bool) -> Self {
        self.log_spans = enabled;
        self
    }

    /// Filter directives this configuration adds on top of `RUST_LOG`
    pub fn directives(&self) -> Vec<String> {
        let mut directives = vec![self.level.as_str().to_ascii_lowercase()];
        if let Some(session_level) = self.session_level {
            directives.push(format!(
                "{}={}",
                SESSION_LOG_TARGET,
                session_level.as_str().to_ascii_lowercase()
            ));
        }
        directives
    }
}

/// Install a global `tracing` subscriber
///
/// Fails with [`ClientError::Configuration`] if a global subscriber is already
/// installed.
pub fn setup_logging(config: LoggingConfig) -> ClientResult<()> {
    let mut filter = EnvFilter::from_default_env();
    for directive in config.directives() {
        let directive: Directive = directive
            .parse()
            .map_err(|e| ClientError::configuration(format!("Invalid log directive {:?}: {}", directive, e)))?;
        filter = filter.add_directive(directive);
    }

    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = match config.format {
        LogFormat::Full => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.with_writer(std::io::stdout).json().try_init(),
    };
    installed.map_err(|e| ClientError::configuration(format!("failed to install logging: {}", e)))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        format = ?config.format,
        session_level = ?config.session_level,
        "logging initialized"
    );
    Ok(())
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> ClientResult<Level> {
    Level::from_str(level.trim()).map_err(|_| ClientError::configuration(format!("Invalid log level: {}", level)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| vars.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string())
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level(" WARN ").unwrap(), Level::WARN);
        assert!(matches!(parse_log_level("loud"), Err(ClientError::Configuration { .. })));
    }

    #[test]
    fn test_directives() {
        assert_eq!(LoggingConfig::default().directives(), vec!["info"]);
        assert_eq!(
            LoggingConfig::new(Level::WARN).with_session_level(Level::TRACE).directives(),
            vec!["warn", "warmline_client_core=trace"]
        );
        for directive in LoggingConfig::new(Level::ERROR).with_session_level(Level::DEBUG).directives() {
            assert!(directive.parse::<Directive>().is_ok(), "{} should parse", directive);
        }
    }

    #[test]
    fn test_env_overlay() {
        let config = LoggingConfig::from_lookup(lookup(&[
            (ENV_LOG_LEVEL, "warn"),
            (ENV_SESSION_LOG_LEVEL, "debug"),
            (ENV_LOG_FORMAT, "JSON"),
        ]))
        .unwrap();
        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.session_level, Some(Level::DEBUG));
        assert_eq!(config.format, LogFormat::Json);

        let config = LoggingConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.session_level, None);
        assert_eq!(config.format, LogFormat::Full);
    }

    #[test]
    fn test_bad_env_values() {
        let err = LoggingConfig::from_lookup(lookup(&[(ENV_LOG_FORMAT, "xml")])).unwrap_err();
        assert_eq!(err, ClientError::configuration("Invalid log format: xml"));
        assert!(LoggingConfig::from_lookup(lookup(&[(ENV_SESSION_LOG_LEVEL, "chatty")])).is_err());
    }
}
