//! Logging setup for the onegate runtime.
//!
//! A thin layer over `tracing-subscriber`: level, format, destination and
//! per-target directives come from [`LoggingConfig`]. `RUST_LOG`, when set,
//! replaces the configured base level.
//!
//! ```rust,ignore
//! use onegate_runtime::config::load_config;
//! use onegate_runtime::logging;
//!
//! let config = load_config()?;
//! logging::init_from_config(&config.logging);
//! ```
//!
//! ```rust,ignore
//! use onegate_runtime::logging::{LoggingBuilder, SpanEvents};
//!
//! LoggingBuilder::new()
//!     .directive("onegate_transport=trace")
//!     .span_events(SpanEvents::LIFECYCLE)
//!     .init();
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogFormat, LogOutput, LogRotation, LoggingConfig, SpanEventConfig};

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanEvents {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

impl SpanEvents {
    pub const NONE: Self = Self {
        new: false,
        enter: false,
        exit: false,
        close: false,
    };

    /// Span creation and close.
    pub const LIFECYCLE: Self = Self {
        new: true,
        enter: false,
        exit: false,
        close: true,
    };

    pub const FULL: Self = Self {
        new: true,
        enter: true,
        exit: true,
        close: true,
    };

    fn to_fmt_span(self) -> fmt::format::FmtSpan {
        let mut span = fmt::format::FmtSpan::NONE;
        if self.new {
            span |= fmt::format::FmtSpan::NEW;
        }
        if self.enter {
            span |= fmt::format::FmtSpan::ENTER;
        }
        if self.exit {
            span |= fmt::format::FmtSpan::EXIT;
        }
        if self.close {
            span |= fmt::format::FmtSpan::CLOSE;
        }
        span
    }
}

impl From<&SpanEventConfig> for SpanEvents {
    fn from(config: &SpanEventConfig) -> Self {
        Self {
            new: config.new,
            enter: config.enter,
            exit: config.exit,
            close: config.close,
        }
    }
}

/// Initializes logging from a [`LoggingConfig`].
///
/// Does nothing if a global subscriber is already installed.
pub fn init_from_config(config: &LoggingConfig) {
    let _ = LoggingBuilder::from_config(config).try_init();
}

/// A builder for configuring logging.
#[derive(Default)]
pub struct LoggingBuilder {
    directives: Vec<String>,
    level: Option<tracing::Level>,
    span_events: SpanEvents,
    format: LogFormat,
    output: LogOutput,
    with_target: bool,
    with_thread_ids: bool,
    with_file: bool,
    with_line_number: bool,
    file_path: Option<PathBuf>,
    rotation: LogRotation,
    max_files: usize,
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self {
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            with_target: true,
            max_files: 5,
            ..Default::default()
        }
    }

    /// Create a LoggingBuilder from a LoggingConfig.
    pub fn from_config(config: &LoggingConfig) -> Self {
        let mut builder = Self::new();

        builder.level = Some(config.level.to_tracing_level());
        builder.format = config.format;
        builder.output = config.output;
        builder.span_events = SpanEvents::from(&config.span_events);

        builder.with_thread_ids = config.thread_ids;
        builder.with_file = config.file_location;
        builder.with_line_number = config.file_location;

        builder.file_path.clone_from(&config.file_path);
        builder.rotation = config.rotation;
        builder.max_files = config.max_files as usize;

        for (target, level) in &config.filters {
            builder.directives.push(format!("{target}={level}"));
        }

        builder
    }

    /// Set the global log level.
    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.level = Some(level);
        self
    }

    /// Add a filter directive such as `onegate_runtime=debug`.
    pub fn directive(mut self, directive: &str) -> Self {
        self.directives.push(directive.to_string());
        self
    }

    pub fn span_events(mut self, events: SpanEvents) -> Self {
        self.span_events = events;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.with_thread_ids = enabled;
        self
    }

    pub fn with_file(mut self, enabled: bool) -> Self {
        self.with_file = enabled;
        self
    }

    pub fn with_line_number(mut self, enabled: bool) -> Self {
        self.with_line_number = enabled;
        self
    }

    /// Log file for [`LogOutput::File`].
    pub fn file_path(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Rotated files to keep; `0` keeps all.
    pub fn max_files(mut self, count: usize) -> Self {
        self.max_files = count;
        self
    }

    fn directive_list(&self) -> &[String] {
        &self.directives
    }

    fn build_filter(&self) -> EnvFilter {
        let base_level = self.level.unwrap_or(tracing::Level::INFO);
        let base_filter = base_level.to_string().to_lowercase();

        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&base_filter));

        for directive in self.directive_list() {
            match directive.parse() {
                Ok(d) => filter = filter.add_directive(d),
                Err(e) => eprintln!("Ignoring invalid log directive '{directive}': {e}"),
            }
        }

        filter
    }

    fn file_appender(&self, path: &Path) -> Option<RollingFileAppender> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .unwrap_or_else(|| OsStr::new("onegate.log"))
            .to_string_lossy()
            .into_owned();
        let rotation = match self.rotation {
            LogRotation::Never => Rotation::NEVER,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
        };

        let mut builder = RollingFileAppender::builder()
            .rotation(rotation)
            .filename_prefix(name);
        if self.max_files > 0 {
            builder = builder.max_log_files(self.max_files);
        }
        match builder.build(dir) {
            Ok(appender) => Some(appender),
            Err(e) => {
                eprintln!("Cannot open log file {}: {e}", path.display());
                None
            }
        }
    }

    /// Initialize the logging system, ignoring a subscriber already set.
    pub fn init(self) {
        let _ = self.try_init();
    }

    /// Try to initialize the logging system, returning an error on failure.
    pub fn try_init(self) -> Result<(), TryInitError> {
        let filter = self.build_filter();
        let span_events = self.span_events.to_fmt_span();

        macro_rules! configure_layer {
            ($layer:expr) => {
                $layer
                    .with_span_events(span_events)
                    .with_target(self.with_target)
                    .with_thread_ids(self.with_thread_ids)
                    .with_file(self.with_file)
                    .with_line_number(self.with_line_number)
            };
        }

        macro_rules! init_with_writer {
            ($writer:expr) => {
                match &self.format {
                    #[cfg(feature = "json-log")]
                    LogFormat::Json => {
                        let layer = fmt::layer()
                            .json()
                            .with_span_events(span_events)
                            .with_writer($writer);
                        tracing_subscriber::registry()
                            .with(layer)
                            .with(filter)
                            .try_init()
                    }
                    LogFormat::Compact => {
                        let layer = configure_layer!(fmt::layer().compact().with_writer($writer));
                        tracing_subscriber::registry()
                            .with(layer)
                            .with(filter)
                            .try_init()
                    }
                    #[cfg(not(feature = "json-log"))]
                    LogFormat::Full | LogFormat::Json => {
                        let layer = configure_layer!(fmt::layer().with_writer($writer));
                        tracing_subscriber::registry()
                            .with(layer)
                            .with(filter)
                            .try_init()
                    }
                    #[cfg(feature = "json-log")]
                    LogFormat::Full => {
                        let layer = configure_layer!(fmt::layer().with_writer($writer));
                        tracing_subscriber::registry()
                            .with(layer)
                            .with(filter)
                            .try_init()
                    }
                    LogFormat::Pretty => {
                        let layer = configure_layer!(fmt::layer().pretty().with_writer($writer));
                        tracing_subscriber::registry()
                            .with(layer)
                            .with(filter)
                            .try_init()
                    }
                }
            };
        }

        match &self.output {
            LogOutput::Stdout => init_with_writer!(std::io::stdout),
            LogOutput::Stderr => init_with_writer!(std::io::stderr),
            LogOutput::File => {
                match self.file_path.as_deref().and_then(|p| self.file_appender(p)) {
                    Some(appender) => init_with_writer!(appender),
                    None => {
                        let result = init_with_writer!(std::io::stdout);
                        warn!("File output unavailable, logging to stdout");
                        result
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_from_config_collects_directives() {
        let mut config = LoggingConfig {
            level: LogLevel::Warn,
            file_location: true,
            ..LoggingConfig::default()
        };
        config
            .filters
            .insert("onegate_transport".into(), LogLevel::Trace);

        let builder = LoggingBuilder::from_config(&config);
        assert_eq!(builder.directive_list(), ["onegate_transport=trace"]);
        assert_eq!(builder.level, Some(tracing::Level::WARN));
        assert!(builder.with_file && builder.with_line_number);
        assert_eq!(builder.max_files, 5);
    }

    #[test]
    fn test_span_events_flags() {
        let span = SpanEvents::LIFECYCLE.to_fmt_span();
        assert_eq!(
            span,
            fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE
        );
        assert_eq!(SpanEvents::NONE.to_fmt_span(), fmt::format::FmtSpan::NONE);
    }
}
