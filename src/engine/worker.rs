//! Background-worker execution context for engines
//!
//! A [`WorkerEngine`] hosts an engine on a dedicated OS thread running its own
//! single-threaded runtime. The orchestrator talks to it only through
//! messages, so model loading and generation never occupy the orchestrating
//! runtime. The request/response contract is the same [`EngineHandle`] used by
//! main-thread engines.

use super::provider::EngineHandle;
use super::types::{Completion, CompletionRequest};
use crate::error::EngineError;
use async_trait::async_trait;
use futures_util::{FutureExt, StreamExt};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

type ChunkReceiver = mpsc::UnboundedReceiver<Result<String, EngineError>>;

enum WorkerReply {
    Text(String),
    Stream(ChunkReceiver),
}

struct WorkerMessage {
    request: CompletionRequest,
    reply: oneshot::Sender<Result<WorkerReply, EngineError>>,
}

/// Engine proxy whose real engine lives on a background worker thread
pub struct WorkerEngine {
    name: String,
    sender: mpsc::UnboundedSender<WorkerMessage>,
}

impl WorkerEngine {
    /// Starts a worker thread and builds the engine inside it
    ///
    /// `factory` runs on the worker's runtime. The call returns once the
    /// engine is constructed, or with the factory's error. Dropping the
    /// returned handle shuts the worker down.
    pub async fn spawn<F, Fut>(name: impl Into<String>, factory: F) -> Result<Self, EngineError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Arc<dyn EngineHandle>, EngineError>> + 'static,
    {
        let name = name.into();
        let (sender, mut receiver) = mpsc::unbounded_channel::<WorkerMessage>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), EngineError>>();
        let thread_name = format!("inference-worker-{}", name);

        std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(EngineError::WorkerUnavailable {
                            message: format!("failed to build worker runtime: {}", e),
                        }));
                        return;
                    }
                };

                runtime.block_on(async move {
                    let engine = match factory().await {
                        Ok(engine) => {
                            let _ = ready_tx.send(Ok(()));
                            engine
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };

                    while let Some(message) = receiver.recv().await {
                        serve(engine.as_ref(), message).await;
                    }
                    debug!(worker = %thread_name, "Worker channel closed, shutting down");
                });
            })
            .map_err(|e| EngineError::WorkerUnavailable {
                message: format!("failed to spawn worker thread: {}", e),
            })?;

        ready_rx.await.map_err(|_| EngineError::WorkerUnavailable {
            message: "worker exited during startup".to_string(),
        })??;

        debug!(worker = %name, "Worker engine started");
        Ok(Self { name, sender })
    }
}

async fn serve(engine: &dyn EngineHandle, message: WorkerMessage) {
    let WorkerMessage { request, reply } = message;

    let outcome = match AssertUnwindSafe(engine.complete(request))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(engine = engine.name(), "Engine panicked inside worker");
            Err(EngineError::completion("engine panicked inside worker"))
        }
    };

    match outcome {
        Ok(Completion::Text(text)) => {
            let _ = reply.send(Ok(WorkerReply::Text(text)));
        }
        Ok(Completion::Stream(mut stream)) => {
            let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
            if reply.send(Ok(WorkerReply::Stream(chunk_rx))).is_err() {
                return;
            }
            while let Some(chunk) = stream.next().await {
                if chunk_tx.send(chunk).is_err() {
                    debug!("Stream consumer went away, dropping remaining chunks");
                    break;
                }
            }
        }
        Err(e) => {
            let _ = reply.send(Err(e));
        }
    }
}

#[async_trait]
impl EngineHandle for WorkerEngine {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(WorkerMessage {
                request,
                reply: reply_tx,
            })
            .map_err(|_| EngineError::WorkerUnavailable {
                message: "worker has shut down".to_string(),
            })?;

        let reply = reply_rx.await.map_err(|_| EngineError::WorkerUnavailable {
            message: "worker dropped the request".to_string(),
        })??;

        Ok(match reply {
            WorkerReply::Text(text) => Completion::Text(text),
            WorkerReply::Stream(chunks) => {
                Completion::Stream(UnboundedReceiverStream::new(chunks).boxed())
            }
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for WorkerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerEngine")
            .field("name", &self.name)
            .field("alive", &!self.sender.is_closed())
            .finish()
    }
}
