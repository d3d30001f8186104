//! Inference requests and the caller-side response handle

use crate::engine::{ChatMessage, GenerateOptions};
use crate::error::InferenceError;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Callback receiving each streamed chunk, synchronously and in order
pub type ChunkCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// What the caller asks the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestInput {
    /// A single user prompt
    Prompt(String),
    /// An explicit message list, sent after the current system prompt
    Conversation(Vec<ChatMessage>),
}

impl RequestInput {
    /// Builds the messages sent to the engine
    ///
    /// The system prompt always comes first. An empty conversation degrades to
    /// an empty user prompt so the engine still sees a two-message exchange.
    pub fn into_messages(self, system_prompt: &str) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(system_prompt)];
        match self {
            RequestInput::Prompt(prompt) => messages.push(ChatMessage::user(prompt)),
            RequestInput::Conversation(conversation) if conversation.is_empty() => {
                messages.push(ChatMessage::user(""))
            }
            RequestInput::Conversation(conversation) => messages.extend(conversation),
        }
        messages
    }
}

impl From<String> for RequestInput {
    fn from(prompt: String) -> Self {
        RequestInput::Prompt(prompt)
    }
}

impl From<&str> for RequestInput {
    fn from(prompt: &str) -> Self {
        RequestInput::Prompt(prompt.to_string())
    }
}

impl From<Vec<ChatMessage>> for RequestInput {
    fn from(messages: Vec<ChatMessage>) -> Self {
        RequestInput::Conversation(messages)
    }
}

/// Per-submission settings
#[derive(Clone, Default)]
pub struct SubmitOptions {
    pub stream: bool,
    pub on_chunk: Option<ChunkCallback>,
    pub generate: GenerateOptions,
}

impl SubmitOptions {
    pub fn streaming() -> Self {
        Self {
            stream: true,
            ..Self::default()
        }
    }

    pub fn with_on_chunk<F>(mut self, on_chunk: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_chunk = Some(Arc::new(on_chunk));
        self
    }

    pub fn with_generate(mut self, generate: GenerateOptions) -> Self {
        self.generate = generate;
        self
    }
}

impl fmt::Debug for SubmitOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitOptions")
            .field("stream", &self.stream)
            .field("on_chunk", &self.on_chunk.is_some())
            .field("generate", &self.generate)
            .finish()
    }
}

/// A queued unit of work; settled exactly once through `reply`
pub(crate) struct InferenceRequest {
    pub id: Uuid,
    pub input: RequestInput,
    pub options: SubmitOptions,
    pub cancel: CancellationToken,
    pub reply: oneshot::Sender<Result<String, InferenceError>>,
}

/// Caller side of a submitted request
///
/// Awaiting the handle yields the full response text. [`ResponseHandle::cancel`]
/// settles it as [`InferenceError::Cancelled`] right away; the executor skips
/// the request if it is still queued, or stops consuming its stream at the
/// next chunk. Dropping the handle does not cancel the request.
pub struct ResponseHandle {
    id: Uuid,
    cancel: CancellationToken,
    response: BoxFuture<'static, Result<String, InferenceError>>,
}

impl ResponseHandle {
    pub(crate) fn new(
        id: Uuid,
        cancel: CancellationToken,
        rx: oneshot::Receiver<Result<String, InferenceError>>,
    ) -> Self {
        let token = cancel.clone();
        let response = async move {
            tokio::select! {
                biased;
                result = rx => result.unwrap_or(Err(InferenceError::Cancelled)),
                _ = token.cancelled() => Err(InferenceError::Cancelled),
            }
        }
        .boxed();
        Self {
            id,
            cancel,
            response,
        }
    }

    /// A handle that is already settled with `error`; nothing was enqueued
    pub fn rejected(error: InferenceError) -> Self {
        Self {
            id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
            response: futures_util::future::ready(Err(error)).boxed(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this request, usable while the handle is being awaited
    pub fn canceller(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Future for ResponseHandle {
    type Output = Result<String, InferenceError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.response.as_mut().poll(cx)
    }
}

impl fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHandle")
            .field("id", &self.id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
