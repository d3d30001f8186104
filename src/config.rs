//! Configuration for the local inference orchestrator
//!
//! Settings load from environment variables with defaults, can be adjusted
//! programmatically with the `with_*` setters, and are checked with
//! [`OrchestratorConfig::validate`].
//!
//! # Environment Variables
//!
//! - `LOCAL_INFERENCE_MODEL`: Primary model id - default: "llama3.2:1b"
//! - `LOCAL_INFERENCE_FALLBACK_MODEL`: Lighter model tried last - default: "qwen3:0.6b" (empty disables)
//! - `LOCAL_INFERENCE_USE_WORKER`: Try the background worker first (true|false) - default: "true"
//! - `LOCAL_INFERENCE_SYSTEM_PROMPT`: Initial system prompt - default: "You are a helpful assistant."
//! - `LOCAL_INFERENCE_PROVIDER`: Engine backend (ollama|openai|anthropic|gemini|groq|xai) - default: "ollama"
//! - `LOCAL_INFERENCE_REQUEST_TIMEOUT`: Per-completion timeout in seconds - default: "120"
//! - `LOCAL_INFERENCE_API_BASE_URL`: Custom endpoint for the backend - default: unset
//! - `LOCAL_INFERENCE_LOG_LEVEL`: Logging level - default: "info"
//! - `LOCAL_INFERENCE_LOG_JSON`: JSON log output (true|false) - default: "false"
//!
//! Backend credentials (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `OLLAMA_HOST`, ...)
//! are read by the `genai` client itself.
//!
//! # Example
//!
//! ```no_run
//! use local_inference::OrchestratorConfig;
//!
//! let config = OrchestratorConfig::default()
//!     .with_model("llama3.2:3b")
//!     .with_worker(false);
//! config.validate().expect("Invalid configuration");
//! ```

use crate::loader::LoadPlan;
use genai::adapter::AdapterKind;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

const DEFAULT_MODEL: &str = "llama3.2:1b";
const DEFAULT_FALLBACK_MODEL: &str = "qwen3:0.6b";
const DEFAULT_USE_WORKER: bool = true;
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid provider name
    #[error("Invalid provider: {0}. Valid options: ollama, openai, anthropic, gemini, groq, xai")]
    InvalidProvider(String),

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// Failed to parse configuration value
    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },
}

/// Maps a provider name to the `genai` adapter serving it
pub fn parse_provider(name: &str) -> Result<AdapterKind, ConfigError> {
    match name.trim().to_lowercase().as_str() {
        "ollama" => Ok(AdapterKind::Ollama),
        "openai" => Ok(AdapterKind::OpenAI),
        "anthropic" | "claude" => Ok(AdapterKind::Anthropic),
        "gemini" => Ok(AdapterKind::Gemini),
        "groq" => Ok(AdapterKind::Groq),
        "xai" | "grok" => Ok(AdapterKind::Xai),
        other => Err(ConfigError::InvalidProvider(other.to_string())),
    }
}

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Model loaded by the first two strategies
    pub model: String,

    /// Lighter model loaded by the last strategy
    pub fallback_model: Option<String>,

    /// Whether the background worker strategy is attempted
    pub use_worker: bool,

    /// System prompt in effect until changed
    pub system_prompt: String,

    /// Backend serving the models
    pub provider: AdapterKind,

    /// Per-completion timeout of the backend, in seconds
    pub request_timeout_secs: u64,

    /// Custom backend endpoint
    pub api_base_url: Option<String>,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Emit logs as JSON
    pub log_json: bool,
}

impl Default for OrchestratorConfig {
    /// Loads from `LOCAL_INFERENCE_*` environment variables with defaults
    ///
    /// Values that fail to parse are logged and replaced by their default;
    /// use [`OrchestratorConfig::from_env`] to reject them instead.
    fn default() -> Self {
        let mut errors = Vec::new();
        let config = Self::read_env(&mut errors);
        for error in errors {
            warn!("{}, using the default", error);
        }
        config
    }
}

impl OrchestratorConfig {
    /// Loads from `LOCAL_INFERENCE_*` environment variables
    ///
    /// Fails with [`ConfigError::ParseError`] on the first variable whose value
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut errors = Vec::new();
        let config = Self::read_env(&mut errors);
        match errors.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(config),
        }
    }

    fn read_env(errors: &mut Vec<ConfigError>) -> Self {
        let provider = env_value(errors, "LOCAL_INFERENCE_PROVIDER", |s| {
            parse_provider(s).map_err(|e| e.to_string())
        })
        .unwrap_or(AdapterKind::Ollama);

        let model = env::var("LOCAL_INFERENCE_MODEL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        // Set-but-empty disables the fallback stage
        let fallback_model = match env::var("LOCAL_INFERENCE_FALLBACK_MODEL") {
            Ok(value) if value.trim().is_empty() => None,
            Ok(value) => Some(value.trim().to_string()),
            Err(_) => Some(DEFAULT_FALLBACK_MODEL.to_string()),
        };

        let use_worker =
            env_value(errors, "LOCAL_INFERENCE_USE_WORKER", parse_bool).unwrap_or(DEFAULT_USE_WORKER);

        let system_prompt = env::var("LOCAL_INFERENCE_SYSTEM_PROMPT")
            .unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.to_string());

        let request_timeout_secs = env_value(errors, "LOCAL_INFERENCE_REQUEST_TIMEOUT", |s| {
            s.trim().parse::<u64>().map_err(|e| e.to_string())
        })
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

        let api_base_url = env::var("LOCAL_INFERENCE_API_BASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let log_level = env::var("LOCAL_INFERENCE_LOG_LEVEL")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        let log_json = env_value(errors, "LOCAL_INFERENCE_LOG_JSON", parse_bool).unwrap_or(false);

        Self {
            model,
            fallback_model,
            use_worker,
            system_prompt,
            provider,
            request_timeout_secs,
            api_base_url,
            log_level,
            log_json,
        }
    }
}

/// Reads and parses one variable; unset yields `None`, a bad value is recorded
fn env_value<T>(
    errors: &mut Vec<ConfigError>,
    name: &str,
    parse: impl FnOnce(&str) -> Result<T, String>,
) -> Option<T> {
    let raw = env::var(name).ok()?;
    match parse(&raw) {
        Ok(value) => Some(value),
        Err(error) => {
            errors.push(ConfigError::ParseError {
                field: name.to_string(),
                error,
            });
            None
        }
    }
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected true or false, got '{}'", other)),
    }
}

impl OrchestratorConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_fallback_model(mut self, fallback_model: Option<String>) -> Self {
        self.fallback_model = fallback_model;
        self
    }

    pub fn with_worker(mut self, use_worker: bool) -> Self {
        self.use_worker = use_worker;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_provider(mut self, provider: AdapterKind) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn with_api_base_url(mut self, url: Option<String>) -> Self {
        self.api_base_url = url;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Fallback model actually used; one equal to the primary is dropped
    pub fn effective_fallback(&self) -> Option<&str> {
        self.fallback_model
            .as_deref()
            .filter(|fallback| !fallback.is_empty() && *fallback != self.model)
    }

    /// Loading plan for these settings
    pub fn load_plan(&self) -> LoadPlan {
        LoadPlan::new(self.model.clone())
            .with_fallback(self.effective_fallback().map(str::to_string))
            .with_worker(self.use_worker)
    }

    /// Validates the configuration
    ///
    /// Checks that:
    /// - The primary model id is not empty
    /// - The request timeout is between 1 second and 10 minutes
    /// - Log level is valid
    ///
    /// A fallback model equal to the primary is only warned about.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Primary model id must not be empty".to_string(),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Request timeout must be at least 1 second".to_string(),
            ));
        }
        if self.request_timeout_secs > 600 {
            return Err(ConfigError::ValidationFailed(
                "Request timeout cannot exceed 10 minutes".to_string(),
            ));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        if self.fallback_model.as_deref() == Some(self.model.as_str()) {
            warn!(
                model = %self.model,
                "Fallback model equals the primary model; fallback stage disabled"
            );
        }

        Ok(())
    }
}

impl fmt::Display for OrchestratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Local Inference Configuration:")?;
        writeln!(f, "  Provider: {}", self.provider.as_str())?;
        writeln!(f, "  Model: {}", self.model)?;
        writeln!(
            f,
            "  Fallback Model: {}",
            self.effective_fallback().unwrap_or("none")
        )?;
        writeln!(f, "  Use Worker: {}", self.use_worker)?;
        if let Some(ref url) = self.api_base_url {
            writeln!(f, "  API Base URL: {}", url)?;
        }
        writeln!(f, "  Request Timeout: {}s", self.request_timeout_secs)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    /// Helper to temporarily set environment variables for testing
    struct EnvGuard {
        key: String,
        old_value: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let old_value = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                old_value,
            }
        }

        fn unset(key: &str) -> Self {
            let old_value = env::var(key).ok();
            env::remove_var(key);
            Self {
                key: key.to_string(),
                old_value,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.old_value {
                Some(v) => env::set_var(&self.key, v),
                None => env::remove_var(&self.key),
            }
        }
    }

    fn clean_env() -> Vec<EnvGuard> {
        [
            "LOCAL_INFERENCE_MODEL",
            "LOCAL_INFERENCE_FALLBACK_MODEL",
            "LOCAL_INFERENCE_USE_WORKER",
            "LOCAL_INFERENCE_SYSTEM_PROMPT",
            "LOCAL_INFERENCE_PROVIDER",
            "LOCAL_INFERENCE_REQUEST_TIMEOUT",
            "LOCAL_INFERENCE_API_BASE_URL",
            "LOCAL_INFERENCE_LOG_LEVEL",
            "LOCAL_INFERENCE_LOG_JSON",
        ]
        .iter()
        .map(|key| EnvGuard::unset(key))
        .collect()
    }

    #[test]
    #[serial]
    fn test_default_configuration() {
        let _guards = clean_env();

        let config = OrchestratorConfig::default();

        assert_eq!(config.provider, AdapterKind::Ollama);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.fallback_model.as_deref(), Some(DEFAULT_FALLBACK_MODEL));
        assert!(config.use_worker);
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        assert!(config.api_base_url.is_none());
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert!(!config.log_json);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_environment_variable_parsing() {
        let mut guards = clean_env();
        guards.extend([
            EnvGuard::set("LOCAL_INFERENCE_PROVIDER", "anthropic"),
            EnvGuard::set("LOCAL_INFERENCE_MODEL", "claude-3-haiku"),
            EnvGuard::set("LOCAL_INFERENCE_FALLBACK_MODEL", ""),
            EnvGuard::set("LOCAL_INFERENCE_USE_WORKER", "false"),
            EnvGuard::set("LOCAL_INFERENCE_REQUEST_TIMEOUT", "60"),
            EnvGuard::set("LOCAL_INFERENCE_LOG_LEVEL", "DEBUG"),
            EnvGuard::set("LOCAL_INFERENCE_LOG_JSON", "1"),
        ]);

        let config = OrchestratorConfig::default();

        assert_eq!(config.provider, AdapterKind::Anthropic);
        assert_eq!(config.model, "claude-3-haiku");
        assert!(config.fallback_model.is_none());
        assert!(!config.use_worker);
        assert_eq!(config.request_timeout_secs, 60);
        assert_eq!(config.log_level, "debug");
        assert!(config.log_json);
    }

    #[test]
    #[serial]
    fn test_unknown_provider_defaults_to_ollama() {
        let mut guards = clean_env();
        guards.push(EnvGuard::set("LOCAL_INFERENCE_PROVIDER", "mystery"));

        assert_eq!(OrchestratorConfig::default().provider, AdapterKind::Ollama);
    }

    #[test]
    #[serial]
    fn test_from_env_reports_unparsable_values() {
        let mut guards = clean_env();
        guards.push(EnvGuard::set("LOCAL_INFERENCE_REQUEST_TIMEOUT", "soon"));

        match OrchestratorConfig::from_env() {
            Err(ConfigError::ParseError { field, error }) => {
                assert_eq!(field, "LOCAL_INFERENCE_REQUEST_TIMEOUT");
                assert!(!error.is_empty());
            }
            other => panic!("Expected ParseError, got {:?}", other),
        }
        assert_eq!(
            OrchestratorConfig::default().request_timeout_secs,
            DEFAULT_REQUEST_TIMEOUT_SECS
        );
    }

    #[test]
    #[serial]
    fn test_from_env_reports_unknown_provider_and_bad_flag() {
        let mut guards = clean_env();
        guards.push(EnvGuard::set("LOCAL_INFERENCE_PROVIDER", "mystery"));

        let err = OrchestratorConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("LOCAL_INFERENCE_PROVIDER"));
        assert!(err.to_string().contains("mystery"));

        drop(guards);
        let mut guards = clean_env();
        guards.push(EnvGuard::set("LOCAL_INFERENCE_USE_WORKER", "maybe"));
        assert!(matches!(
            OrchestratorConfig::from_env(),
            Err(ConfigError::ParseError { ref field, .. }) if field == "LOCAL_INFERENCE_USE_WORKER"
        ));
        assert!(OrchestratorConfig::default().use_worker);
    }

    #[test]
    #[serial]
    fn test_from_env_accepts_valid_environment() {
        let mut guards = clean_env();
        guards.push(EnvGuard::set("LOCAL_INFERENCE_REQUEST_TIMEOUT", "30"));

        let config = OrchestratorConfig::from_env().unwrap();
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_parse_provider() {
        assert_eq!(parse_provider("OpenAI").unwrap(), AdapterKind::OpenAI);
        assert_eq!(parse_provider("claude").unwrap(), AdapterKind::Anthropic);
        assert_eq!(parse_provider("grok").unwrap(), AdapterKind::Xai);
        assert!(matches!(
            parse_provider("nope"),
            Err(ConfigError::InvalidProvider(_))
        ));
    }

    #[test]
    #[serial]
    fn test_validation_rejects_bad_values() {
        let _guards = clean_env();

        assert!(OrchestratorConfig::default().with_model("").validate().is_err());
        assert!(OrchestratorConfig::default()
            .with_request_timeout(0)
            .validate()
            .is_err());
        assert!(OrchestratorConfig::default()
            .with_request_timeout(601)
            .validate()
            .is_err());

        let mut config = OrchestratorConfig::default();
        config.log_level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_fallback_equal_to_primary_is_dropped() {
        let _guards = clean_env();

        let config = OrchestratorConfig::default()
            .with_model("tiny")
            .with_fallback_model(Some("tiny".to_string()));

        assert!(config.validate().is_ok());
        assert!(config.effective_fallback().is_none());
        assert!(config.load_plan().fallback_model().is_none());
    }

    #[test]
    #[serial]
    fn test_load_plan_follows_settings() {
        let _guards = clean_env();

        let plan = OrchestratorConfig::default().with_worker(false).load_plan();
        assert!(!plan.allows_worker());
        assert_eq!(plan.primary_model(), DEFAULT_MODEL);
        assert_eq!(plan.fallback_model(), Some(DEFAULT_FALLBACK_MODEL));
    }

    #[test]
    #[serial]
    fn test_config_display() {
        let _guards = clean_env();

        let display = format!("{}", OrchestratorConfig::default());
        assert!(display.contains("Local Inference Configuration:"));
        assert!(display.contains("Model: llama3.2:1b"));
    }
}
