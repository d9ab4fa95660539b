//! Logging setup for the spool CLI.
//!
//! - stdout is reserved for command output (blob names, JSON reports, payloads)
//! - stderr receives all log output, human-readable or JSONL
//!
//! Level resolution: `--log-level`, then `SPOOL_LOG`, then `RUST_LOG`, then info.
//! `SPOOL_LOG` and `RUST_LOG` may carry full `EnvFilter` directives.

use std::io::IsTerminal;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter.
pub const ENV_LOG: &str = "SPOOL_LOG";

/// Environment variable holding the log format.
pub const ENV_LOG_FORMAT: &str = "SPOOL_LOG_FORMAT";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable console format (default).
    #[default]
    Human,
    /// Machine-parseable JSON lines.
    Jsonl,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" | "console" | "pretty" => Ok(LogFormat::Human),
            "jsonl" | "json" => Ok(LogFormat::Jsonl),
            _ => Err(format!("unknown log format: {}", s)),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Human => write!(f, "human"),
            LogFormat::Jsonl => write!(f, "jsonl"),
        }
    }
}

/// Log level filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    /// Completely silent.
    Off,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "off" | "none" | "quiet" => Ok(LogLevel::Off),
            _ => Err(format!("unknown log level: {}", s)),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Off => write!(f, "off"),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub format: LogFormat,

    /// Level set on the command line. Overrides any environment filter.
    pub level: Option<LogLevel>,
}

impl LogConfig {
    /// Build from CLI flags, falling back to `SPOOL_LOG_FORMAT` for the format.
    pub fn from_env(cli_level: Option<LogLevel>, cli_format: Option<LogFormat>) -> Self {
        let format = cli_format
            .or_else(|| {
                std::env::var(ENV_LOG_FORMAT)
                    .ok()
                    .and_then(|val| val.parse().ok())
            })
            .unwrap_or_default();
        LogConfig {
            format,
            level: cli_level,
        }
    }

    /// Filter directives for this config.
    pub fn filter(&self) -> EnvFilter {
        if let Some(level) = self.level {
            return EnvFilter::new(default_directives(level));
        }
        for var in [ENV_LOG, "RUST_LOG"] {
            if let Ok(directives) = std::env::var(var) {
                if let Ok(filter) = EnvFilter::try_new(&directives) {
                    return filter;
                }
            }
        }
        EnvFilter::new(default_directives(LogLevel::Info))
    }
}

fn default_directives(level: LogLevel) -> String {
    format!("spool={level},spool_storage={level}")
}

/// Initialize the logging subsystem.
///
/// Must be called once at startup before any logging occurs.
pub fn init_logging(config: &LogConfig) {
    let filter = config.filter();

    match config.format {
        LogFormat::Human => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(std::io::stderr().is_terminal());
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .init();
        }
        LogFormat::Jsonl => {
            let json_layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .flatten_event(true);
            tracing_subscriber::registry()
                .with(filter)
                .with(json_layer)
                .init();
        }
    }
}
