//! local-inference - shared on-device LLM engine orchestration
//!
//! This library decides whether a device can host a local language model,
//! loads exactly one engine for the whole process through an ordered chain of
//! fallback strategies, and serializes every prompt against that engine with
//! streaming, per-request cancellation and failure isolation.
//!
//! # Core Concepts
//!
//! - **Capability probe**: A pure check of memory, CPU cores and accelerator
//!   presence that yields a verdict plus every unmet requirement
//! - **Engine loader**: Tries background worker, main thread, then a lighter
//!   fallback model, reporting progress and stopping at the first success
//! - **Coordinator**: Process-wide single-flight owner of the engine session;
//!   concurrent callers share one load and every later caller sees its outcome
//! - **Request queue**: Strict FIFO, one request at a time, with streaming
//!   chunks and cancellation of queued or in-flight work
//!
//! # Example Usage
//!
//! ```no_run
//! use local_inference::{
//!     Coordinator, GenAIProvider, HardwareDetector, OrchestratorConfig, SubmitOptions,
//! };
//! use std::sync::Arc;
//!
//! async fn ask() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OrchestratorConfig::default();
//!     let provider = GenAIProvider::new(config.provider, config.request_timeout());
//!     let coordinator = Coordinator::new(config, Arc::new(provider), HardwareDetector::detect());
//!
//!     coordinator.ensure(Some("You are terse.".to_string())).await?;
//!
//!     let answer = coordinator
//!         .submit("What is Rust?", SubmitOptions::streaming().with_on_chunk(|c| print!("{}", c)))
//!         .await?;
//!     println!("\n{} characters", answer.len());
//!     Ok(())
//! }
//! ```
//!
//! # Project Structure
//!
//! - [`capability`]: Device hints and the capability probe
//! - [`engine`]: Engine provider/handle traits and their backends
//! - [`loader`]: Fallback load chain
//! - [`coordinator`]: Single-flight session owner and public entry point
//! - [`executor`]: FIFO cancellable request queue
//! - [`persona`]: System prompt builder and greeter question
//! - [`progress`]: Load progress events and subscribers

pub mod capability;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod executor;
pub mod loader;
pub mod persona;
pub mod progress;
pub mod util;

// Re-export key types for convenient access
pub use capability::{probe, CapabilityReport, DeviceHints, HardwareDetector, RequirementFailure};
pub use config::{ConfigError, OrchestratorConfig};
pub use coordinator::{Coordinator, EngineSession, Status};
pub use engine::{
    ChatMessage, EngineHandle, EngineProvider, ExecutionMode, GenAIProvider, GenerateOptions,
};
pub use error::{EngineError, InferenceError};
pub use executor::{RequestInput, ResponseHandle, SubmitOptions};
pub use loader::{EngineLoader, LoadPlan, LoadStage, LoadedEngine};
pub use persona::{build_persona_prompt, greeter_question, PersonaProfile};
pub use progress::{ProgressEvent, ProgressHandler, ProgressHub, Subscription};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
