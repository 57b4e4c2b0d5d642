//! Tracing subscriber setup for binaries
//!
//! The library only emits events and spans; applications decide where they
//! go. [`TracingConfig::init`] installs a registry with an `EnvFilter` and one
//! formatting layer per destination.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Output format of the formatting layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Colored, human-readable
    Console,
    /// Plain text for CI logs
    Compact,
    /// One JSON object per event, including the span stack
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Where events are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TracingOutput {
    /// stderr
    Console,
    #[cfg(feature = "tracing-files")]
    File(std::path::PathBuf),
    #[cfg(feature = "tracing-files")]
    Both(std::path::PathBuf),
}

/// Keeps background log writers alive; drop it only at shutdown
#[derive(Debug, Default)]
#[must_use = "dropping the guard stops file logging"]
pub struct TracingGuard {
    #[cfg(feature = "tracing-files")]
    _file: Option<tracing_appender::non_blocking::WorkerGuard>,
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// 0 = info, 1 = debug, 2+ = trace
    pub verbosity: u8,
    pub format: TracingFormat,
    pub output: TracingOutput,
    /// Overrides `verbosity` when set
    pub env_filter: Option<String>,
    /// Logged once at startup for correlating a run's events
    pub session_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            output: TracingOutput::Console,
            env_filter: None,
            session_id: None,
        }
    }
}

impl TracingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    fn filter(&self) -> anyhow::Result<EnvFilter> {
        let directives = self
            .env_filter
            .as_deref()
            .unwrap_or_else(|| self.verbosity_to_filter());
        Ok(EnvFilter::try_new(directives)?)
    }

    fn console_layer(format: TracingFormat) -> BoxedLayer {
        use tracing_subscriber::fmt;

        match format {
            TracingFormat::Console => fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .with_target(false)
                .compact()
                .boxed(),
            TracingFormat::Compact => fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(false)
                .compact()
                .boxed(),
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => fmt::layer()
                .with_writer(std::io::stderr)
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .boxed(),
        }
    }

    #[cfg(feature = "tracing-files")]
    fn file_layer(format: TracingFormat, path: &std::path::Path) -> (BoxedLayer, tracing_appender::non_blocking::WorkerGuard) {
        use tracing_subscriber::fmt;

        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("convertall-bgremove.log"));
        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));

        let layer = match format {
            TracingFormat::Console | TracingFormat::Compact => {
                fmt::layer().with_ansi(false).with_writer(writer).compact().boxed()
            },
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(true)
                .with_span_list(true)
                .boxed(),
        };
        (layer, guard)
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directives
    /// - A global subscriber is already installed
    pub fn init(self) -> anyhow::Result<TracingGuard> {
        let filter = self.filter()?;
        #[allow(unused_mut)]
        let mut guard = TracingGuard::default();

        let layers: Vec<BoxedLayer> = match &self.output {
            TracingOutput::Console => vec![Self::console_layer(self.format)],
            #[cfg(feature = "tracing-files")]
            TracingOutput::File(path) => {
                let (layer, file_guard) = Self::file_layer(self.format, path);
                guard._file = Some(file_guard);
                vec![layer]
            },
            #[cfg(feature = "tracing-files")]
            TracingOutput::Both(path) => {
                let (layer, file_guard) = Self::file_layer(self.format, path);
                guard._file = Some(file_guard);
                vec![Self::console_layer(self.format), layer]
            },
        };

        tracing_subscriber::registry()
            .with(layers)
            .with(filter)
            .try_init()?;

        if let Some(session_id) = &self.session_id {
            tracing::info!(session_id = %session_id, "Background removal session started");
        }
        Ok(guard)
    }
}

/// Console tracing with a fresh session id
///
/// # Errors
/// - See [`TracingConfig::init`]
pub fn init_cli_tracing(verbosity: u8, format: TracingFormat) -> anyhow::Result<TracingGuard> {
    TracingConfig::new()
        .with_verbosity(verbosity)
        .with_format(format)
        .with_session_id(uuid::Uuid::new_v4().to_string())
        .init()
}

/// Span helpers shared by the binary
pub mod spans {
    use tracing::{Level, Span};

    pub fn session(session_id: &str, model_name: &str, backend: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "session",
            session_id = %session_id,
            model_name = %model_name,
            backend = %backend
        )
    }

    pub fn model_loading(model_name: &str, backend: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "model_loading",
            model_name = %model_name,
            backend = %backend
        )
    }

    pub fn download(model_name: &str, destination: &std::path::Path) -> Span {
        tracing::span!(
            Level::INFO,
            "download",
            model_name = %model_name,
            destination = %destination.display()
        )
    }
}
