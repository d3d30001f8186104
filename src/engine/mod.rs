//! Inference engine abstraction layer
//!
//! The orchestrator never talks to a model runtime directly. It asks an
//! [`EngineProvider`] for an [`EngineHandle`] given a model id and an
//! [`ExecutionMode`], then sends chat completion requests to that handle.

mod genai;
pub mod mock;
mod provider;
mod types;
mod worker;

pub use genai::{GenAIEngine, GenAIProvider};
pub use mock::{LoadCall, ScriptedEngine, ScriptedProvider, ScriptedReply};
pub use provider::{EngineHandle, EngineProvider};
pub use types::{
    ChatMessage, ChunkStream, Completion, CompletionRequest, ExecutionMode, GenerateOptions,
    MessageRole,
};
pub use worker::WorkerEngine;
