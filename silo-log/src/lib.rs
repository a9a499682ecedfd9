//! Silo Logging
//!
//! Process-level logging bootstrap for the silo data plane. Library crates emit
//! structured events through [`tracing`]; binaries call [`init`] once at startup
//! to install a subscriber configured from the environment.
//!
//! # Usage
//!
//! ```rust,no_run
//! fn main() -> Result<(), silo_log::LogError> {
//!     silo_log::init()?;
//!     tracing::info!(routing_code = "FR34JJO390G", "tenant resolved");
//!     Ok(())
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `SILO_DEBUG=1` - Enable debug logging
//! - `SILO_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `SILO_LOG_FORMAT=json|pretty|compact` - Set output format (default `json`)
//! - `SILO_LOG_COLOR=1|0` - Enable/disable ANSI colors
//! - `RUST_LOG` - Full `EnvFilter` directive; wins over `SILO_LOG_LEVEL` when set

use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum LogError {
    /// The filter directive could not be parsed.
    #[error("Invalid log filter: {0}")]
    Filter(String),

    /// Another global subscriber is already installed.
    #[error("Failed to install subscriber: {0}")]
    Init(String),
}

// ============================================================================
// Log Levels
// ============================================================================

/// Minimum level emitted by the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Trace level (most verbose)
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warning level
    Warn,
    /// Error level (least verbose)
    Error,
    /// Off (no logging)
    Off,
}

impl Level {
    /// Directive understood by [`EnvFilter`].
    pub fn as_directive(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }
}

impl FromStr for Level {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(Level::Trace),
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            "off" | "none" => Ok(Level::Off),
            other => Err(LogError::Filter(format!("unknown level '{}'", other))),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_directive())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-line human readable output
    Pretty,
    /// Compact single-line output
    Compact,
    /// One JSON object per event
    Json,
}

impl FromStr for Format {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Ok(Format::Pretty),
            "compact" => Ok(Format::Compact),
            "json" => Ok(Format::Json),
            other => Err(LogError::Filter(format!("unknown format '{}'", other))),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Whether debug mode is enabled
    pub debug: bool,
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether ANSI colors are enabled
    pub color: bool,
    /// Whether to include the event target (module path)
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            color: false,
            target: true,
        }
    }
}

impl LogConfig {
    /// Create config from `SILO_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create config from an arbitrary variable lookup.
    ///
    /// Unknown or malformed values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| lookup(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        let debug = flag("SILO_DEBUG").unwrap_or(false);

        let level = lookup("SILO_LOG_LEVEL")
            .and_then(|s| s.parse().ok())
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup("SILO_LOG_FORMAT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(Format::Json);

        let color = flag("SILO_LOG_COLOR").unwrap_or_else(|| {
            format != Format::Json && lookup("NO_COLOR").is_none() && lookup("TERM").is_some()
        });

        let target = flag("SILO_LOG_TARGET").unwrap_or(true);

        Self {
            debug,
            level,
            format,
            color,
            target,
        }
    }

    /// Set the minimum level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the output format.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Build the filter for this config. `RUST_LOG` takes precedence when set.
    pub fn filter(&self) -> Result<EnvFilter, LogError> {
        if env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
            return EnvFilter::try_from_default_env().map_err(|e| LogError::Filter(e.to_string()));
        }
        EnvFilter::try_new(self.level.as_directive()).map_err(|e| LogError::Filter(e.to_string()))
    }
}

// ============================================================================
// Public API
// ============================================================================

static INSTALLED: OnceLock<LogConfig> = OnceLock::new();

/// Install the global subscriber using [`LogConfig::from_env`].
///
/// Calling `init` again after a successful install is a no-op.
pub fn init() -> Result<(), LogError> {
    init_with(LogConfig::from_env())
}

/// Install the global subscriber with an explicit config.
pub fn init_with(config: LogConfig) -> Result<(), LogError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    let filter = config.filter()?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        Format::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(config.target)
                    .with_current_span(false),
            )
            .try_init(),
        Format::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(config.target)
                    .with_ansi(config.color),
            )
            .try_init(),
        Format::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(config.target)
                    .with_ansi(config.color),
            )
            .try_init(),
    };

    result.map_err(|e| LogError::Init(e.to_string()))?;
    let _ = INSTALLED.set(config);
    Ok(())
}

/// The config the global subscriber was installed with, if any.
pub fn installed() -> Option<&'static LogConfig> {
    INSTALLED.get()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Off);
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!("debug".parse::<Level>().unwrap(), Level::Debug);
        assert_eq!("DEBUG".parse::<Level>().unwrap(), Level::Debug);
        assert_eq!("warning".parse::<Level>().unwrap(), Level::Warn);
        assert!("invalid".parse::<Level>().is_err());
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("pretty".parse::<Format>().unwrap(), Format::Pretty);
        assert_eq!("compact".parse::<Format>().unwrap(), Format::Compact);
        assert_eq!("json".parse::<Format>().unwrap(), Format::Json);
        assert!("xml".parse::<Format>().is_err());
    }

    #[test]
    fn test_defaults_without_env() {
        let config = LogConfig::from_lookup(lookup(&[]));
        assert_eq!(config, LogConfig::default());
    }

    #[test]
    fn test_debug_flag_lowers_level() {
        let config = LogConfig::from_lookup(lookup(&[("SILO_DEBUG", "true")]));
        assert!(config.debug);
        assert_eq!(config.level, Level::Debug);
    }

    #[test]
    fn test_explicit_level_wins_over_debug() {
        let config = LogConfig::from_lookup(lookup(&[
            ("SILO_DEBUG", "1"),
            ("SILO_LOG_LEVEL", "warn"),
        ]));
        assert_eq!(config.level, Level::Warn);
    }

    #[test]
    fn test_pretty_format_uses_terminal_colors() {
        let config = LogConfig::from_lookup(lookup(&[
            ("SILO_LOG_FORMAT", "pretty"),
            ("TERM", "xterm-256color"),
        ]));
        assert_eq!(config.format, Format::Pretty);
        assert!(config.color);

        let config = LogConfig::from_lookup(lookup(&[
            ("SILO_LOG_FORMAT", "pretty"),
            ("TERM", "xterm-256color"),
            ("NO_COLOR", "1"),
        ]));
        assert!(!config.color);
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let config = LogConfig::from_lookup(lookup(&[
            ("SILO_LOG_LEVEL", "loud"),
            ("SILO_LOG_FORMAT", "yaml"),
        ]));
        assert_eq!(config.level, Level::Info);
        assert_eq!(config.format, Format::Json);
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LogConfig::default().with_level(Level::Off);
        init_with(config.clone()).unwrap();
        init_with(config).unwrap();
        assert!(installed().is_some());
    }
}
