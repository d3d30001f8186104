//! Tracing subscriber setup
//!
//! Level and format come from [`OrchestratorConfig`] (`LOCAL_INFERENCE_LOG_LEVEL`,
//! `LOCAL_INFERENCE_LOG_JSON`), optionally overridden by the command line.
//! `RUST_LOG` directives still apply on top. Everything is written to stderr so
//! stdout only carries answers and reports.

use crate::config::OrchestratorConfig;
use std::env;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crates under `genai` that are only interesting when debugging HTTP
const QUIET_DEPENDENCIES: [&str; 4] = ["h2=warn", "hyper=warn", "reqwest=warn", "genai=warn"];

/// Resolved logging settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    pub level: Level,
    pub json: bool,
}

impl LogSettings {
    /// Settings from the configuration; an unknown level falls back to INFO
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            level: parse_level(&config.log_level).unwrap_or(Level::INFO),
            json: config.log_json,
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }
}

/// Parses `trace`, `debug`, `info`, `warn` or `error`, in any case
pub fn parse_level(level: &str) -> Option<Level> {
    match level.trim().to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

fn build_filter(level: Level) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("local_inference={}", level).parse() {
        filter = filter.add_directive(directive);
    }
    if env::var("RUST_LOG").is_err() {
        for noisy in QUIET_DEPENDENCIES {
            if let Ok(directive) = noisy.parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    filter
}

/// Installs the global subscriber; later calls keep the first one
pub fn init_logging(settings: LogSettings) {
    let registry = tracing_subscriber::registry().with(build_filter(settings.level));
    let result = if settings.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("Logging already initialized");
    }
}
