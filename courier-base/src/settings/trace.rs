use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// A configuration for a tracing subscriber
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct TracingConfig {
    /// The logging style. json | pretty | compact | default
    #[serde(default)]
    pub style: Style,
    /// The logging level. Defaults to info
    #[serde(default)]
    pub level: Level,
}

impl TracingConfig {
    /// Install a global tracing subscriber matching this config.
    ///
    /// `RUST_LOG` overrides the configured level when set.
    pub fn start_tracing(&self) -> color_eyre::Result<()> {
        let filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::from(self.level).into())
            .from_env_lossy();

        let builder = tracing_subscriber::fmt().with_env_filter(filter);

        match self.style {
            Style::Json => builder.json().try_init(),
            Style::Pretty => builder.pretty().try_init(),
            Style::Compact => builder.compact().try_init(),
            Style::Default => builder.try_init(),
        }
        .map_err(|e| color_eyre::eyre::eyre!(e))?;

        Ok(())
    }
}

/// Basic tracing configuration
#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Style {
    /// Pretty print
    Pretty,
    /// JSON
    Json,
    /// Compact
    Compact,
    /// Default style
    #[default]
    #[serde(other)]
    Default,
}

/// Logging level
#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Level {
    /// Off
    Off,
    /// Error
    Error,
    /// Warn
    Warn,
    /// Debug
    Debug,
    /// Trace
    Trace,
    /// Info
    #[default]
    #[serde(other)]
    Info,
}

impl From<Level> for LevelFilter {
    fn from(level: Level) -> LevelFilter {
        match level {
            Level::Off => LevelFilter::OFF,
            Level::Error => LevelFilter::ERROR,
            Level::Warn => LevelFilter::WARN,
            Level::Debug => LevelFilter::DEBUG,
            Level::Trace => LevelFilter::TRACE,
            Level::Info => LevelFilter::INFO,
        }
    }
}
