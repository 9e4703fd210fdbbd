//! Tracing configuration and initialization, shared by every binary.

use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

/// Why the subscriber could not be installed.
pub type TrcError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Environment variable that overrides the chosen level with a full filter directive.
pub const LOG_ENV: &str = "TARDISFS_LOG";

/// Verbosity accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[value(rename_all = "UPPER")]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Errors and warnings.
    Warning,
    /// Normal operation.
    #[default]
    Info,
    /// Everything, including per-request spans.
    Debug,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrcMode {
    /// Attached to a terminal: colors, compact lines.
    Foreground,
    /// Writing to a log file: no colors, timestamps, span lifecycle.
    Daemon,
}

/// Logging setup, built up before [`Trc::init`].
pub struct Trc {
    mode: TrcMode,
    env_filter: EnvFilter,
    verbose_spans: bool,
}

impl Default for Trc {
    fn default() -> Self {
        Self::with_level(LogLevel::default())
    }
}

impl Trc {
    /// Log at `level`, unless [`LOG_ENV`] or `RUST_LOG` says otherwise.
    #[must_use]
    pub fn with_level(level: LogLevel) -> Self {
        let env_filter = EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new(level.directive()));
        Self {
            mode: TrcMode::Foreground,
            env_filter,
            verbose_spans: level == LogLevel::Debug,
        }
    }

    /// Format for a log file rather than a terminal.
    #[must_use]
    pub fn daemon(mut self) -> Self {
        self.mode = TrcMode::Daemon;
        self
    }

    /// Install the global subscriber. Output goes to stderr.
    pub fn init(self) -> Result<(), TrcError> {
        let span_events = if self.verbose_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let builder = tracing_subscriber::fmt()
            .with_env_filter(self.env_filter)
            .with_span_events(span_events)
            .with_writer(std::io::stderr);

        match self.mode {
            TrcMode::Foreground => builder.with_target(false).compact().try_init(),
            TrcMode::Daemon => builder.with_ansi(false).try_init(),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::ValueEnum as _;

    use super::*;

    #[test]
    fn levels_parse_in_upper_case() {
        assert_eq!(LogLevel::from_str("DEBUG", false).unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("WARNING", false).unwrap(), LogLevel::Warning);
        assert!(LogLevel::from_str("TRACE", true).is_err());
    }
}
