//! Error taxonomy for the inference orchestrator
//!
//! Two layers of errors exist: [`EngineError`] is what an engine provider or a
//! loaded engine reports, and [`InferenceError`] is what callers of the
//! coordinator and the executor observe.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors reported by an engine provider or a loaded engine
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The provider could not bring up the requested model
    #[error("Failed to load model {model_id}: {message}")]
    Load { model_id: String, message: String },

    /// A completion call failed
    #[error("Completion failed: {message}")]
    Completion { message: String },

    /// The background worker could not be started or went away
    #[error("Worker unavailable: {message}")]
    WorkerUnavailable { message: String },
}

impl EngineError {
    pub fn load(model_id: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Load {
            model_id: model_id.into(),
            message: message.into(),
        }
    }

    pub fn completion(message: impl Into<String>) -> Self {
        EngineError::Completion {
            message: message.into(),
        }
    }
}

/// Errors observed by callers of the orchestrator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InferenceError {
    /// The device does not meet the minimum requirements for local inference
    #[error("Local inference is not supported on this device")]
    Unsupported,

    /// Every configured load strategy failed
    #[error("Engine failed to load after {attempts} attempt(s)")]
    LoadFailed { attempts: usize },

    /// A request was submitted while no engine session is ready
    #[error("LLM not ready")]
    NotReady,

    /// The request was aborted by its caller or by `cancel_all`
    #[error("Aborted")]
    Cancelled,

    /// The engine failed while producing a completion
    #[error("Generation failed: {message}")]
    Generation { message: String, device_lost: bool },
}

impl InferenceError {
    /// Builds a generation error, flagging device-loss signatures
    pub fn generation(message: impl Into<String>) -> Self {
        let message = message.into();
        let device_lost = is_device_lost_message(&message);
        InferenceError::Generation {
            message,
            device_lost,
        }
    }

    /// True for the aborted marker, never for genuine engine failures
    pub fn is_cancelled(&self) -> bool {
        matches!(self, InferenceError::Cancelled)
    }

    pub fn is_device_lost(&self) -> bool {
        matches!(
            self,
            InferenceError::Generation {
                device_lost: true,
                ..
            }
        )
    }

    /// True for states that will never recover within this session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InferenceError::Unsupported | InferenceError::LoadFailed { .. }
        )
    }
}

impl From<EngineError> for InferenceError {
    fn from(err: EngineError) -> Self {
        InferenceError::generation(err.to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for InferenceError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        InferenceError::Cancelled
    }
}

fn device_lost_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)device[_ ]lost|device[_ ]hung|dxgi_error_device_hung")
            .expect("device-lost pattern is a valid regex")
    })
}

/// Checks an error message for GPU device loss or hang signatures
pub fn is_device_lost_message(message: &str) -> bool {
    device_lost_pattern().is_match(message)
}
