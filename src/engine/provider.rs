use super::types::{Completion, CompletionRequest, ExecutionMode};
use crate::error::EngineError;
use crate::progress::ProgressReporter;
use async_trait::async_trait;
use std::sync::Arc;

/// A loaded inference engine exposing a chat-style completion call
///
/// Engines are not assumed to be safe for concurrent invocation; the executor
/// never calls `complete` twice at the same time on one engine.
#[async_trait]
pub trait EngineHandle: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, EngineError>;

    fn name(&self) -> &str;
}

/// Brings up engines for a model id in a given execution mode
#[async_trait]
pub trait EngineProvider: Send + Sync {
    async fn create_engine(
        &self,
        model_id: &str,
        mode: ExecutionMode,
        progress: ProgressReporter,
    ) -> Result<Arc<dyn EngineHandle>, EngineError>;

    fn name(&self) -> &str;
}
