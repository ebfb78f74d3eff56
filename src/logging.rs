//! Log output setup
//!
//! The output stream is chosen explicitly by the caller instead of being
//! redirected process-wide.

use crate::Result;
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Stream that receives log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    #[default]
    Stderr,
    Stdout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (trace, debug, info, warn, error); `RUST_LOG` wins
    pub level: String,
    pub stream: LogStream,
    /// Colour the output
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            stream: LogStream::default(),
            ansi: true,
        }
    }
}

/// Install the global `tracing` subscriber
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(config.ansi);

    match config.stream {
        LogStream::Stderr => builder.with_writer(std::io::stderr).try_init(),
        LogStream::Stdout => builder.with_writer(std::io::stdout).try_init(),
    }
    .map_err(|e| anyhow!("failed to initialise logging: {}", e))
}
