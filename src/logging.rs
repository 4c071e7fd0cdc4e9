//! Logging setup for somacast
//!
//! Standard output carries the wire protocol, so every log line goes to
//! standard error. Output is either human-readable or structured JSON, and
//! the `RUST_LOG` environment variable overrides the configured level.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing_subscriber::{
    filter::EnvFilter, fmt::time::UtcTime, layer::SubscriberExt, Layer, Registry,
};

/// Log configuration for different environments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level filter
    pub level: String,
    /// Enable structured JSON output
    pub json: bool,
    /// Enable ANSI colors in output
    pub colors: bool,
    /// Include file and line numbers
    pub include_location: bool,
    /// Include thread names
    pub include_thread: bool,
    /// Per-target level overrides
    pub targets: HashMap<String, String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            colors: false,
            include_location: false,
            include_thread: false,
            targets: HashMap::new(),
        }
    }
}

impl LogConfig {
    /// Override the base level along with every `somacast` target directive.
    ///
    /// Preset target entries for other crates are left alone.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        let level = level.into();
        for (target, target_level) in self.targets.iter_mut() {
            if target == "somacast" || target.starts_with("somacast::") {
                *target_level = level.clone();
            }
        }
        self.level = level;
        self
    }

    /// Filter built from this configuration, or from `RUST_LOG` when set
    pub fn env_filter(&self) -> Result<EnvFilter, Box<dyn std::error::Error>> {
        if let Ok(directives) = std::env::var(EnvFilter::DEFAULT_ENV) {
            if !directives.trim().is_empty() {
                return Ok(EnvFilter::try_new(directives)?);
            }
        }

        let mut filter = EnvFilter::try_new(&self.level)?;
        for (target, level) in &self.targets {
            filter = filter.add_directive(format!("{}={}", target, level).parse()?);
        }
        Ok(filter)
    }
}

/// Install the global subscriber; fails if one is already installed
pub fn init_logging(config: &LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = config.env_filter()?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_level(true)
        .with_thread_names(config.include_thread)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    let subscriber = Registry::default().with(env_filter).with(if config.json {
        fmt_layer.json().boxed()
    } else {
        fmt_layer.with_ansi(config.colors).boxed()
    });

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Production logging configuration
pub fn production_config() -> LogConfig {
    LogConfig {
        level: "info".to_string(),
        json: true,
        colors: false,
        include_location: false,
        include_thread: false,
        targets: [
            ("somacast".to_string(), "info".to_string()),
            ("somacast::gossip".to_string(), "warn".to_string()),
        ]
        .into_iter()
        .collect(),
    }
}

/// Development logging configuration
pub fn development_config() -> LogConfig {
    LogConfig {
        level: "debug".to_string(),
        json: false,
        colors: true,
        include_location: true,
        include_thread: true,
        targets: [
            ("somacast".to_string(), "debug".to_string()),
            ("tokio".to_string(), "info".to_string()),
        ]
        .into_iter()
        .collect(),
    }
}
