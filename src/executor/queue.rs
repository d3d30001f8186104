//! Serialized request executor
//!
//! One spawned task owns the engine handle and drains a FIFO channel, so at
//! most one completion runs at a time and requests execute in submission
//! order. Callers submit concurrently and await their own [`ResponseHandle`].

use super::request::{InferenceRequest, RequestInput, ResponseHandle, SubmitOptions};
use crate::engine::{Completion, CompletionRequest, EngineHandle};
use crate::error::InferenceError;
use futures_util::{FutureExt, StreamExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
struct QueueState {
    pending: AtomicUsize,
    busy: AtomicBool,
}

/// Handle to the executor task
///
/// Dropping the last handle closes the channel; requests already queued still
/// run, then the task exits.
pub struct RequestQueue {
    tx: mpsc::UnboundedSender<InferenceRequest>,
    root: Mutex<CancellationToken>,
    state: Arc<QueueState>,
}

impl RequestQueue {
    /// Spawns the executor task on the current tokio runtime
    ///
    /// The system prompt is read from `system_prompt` when each request starts
    /// executing, not when it is submitted.
    pub fn spawn(engine: Arc<dyn EngineHandle>, system_prompt: watch::Receiver<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(QueueState::default());
        tokio::spawn(run(engine, rx, system_prompt, state.clone()));
        Self {
            tx,
            root: Mutex::new(CancellationToken::new()),
            state,
        }
    }

    /// Enqueues a request and returns its handle
    ///
    /// The request is queued before this returns, so submission order is call
    /// order regardless of when the handles are awaited.
    pub fn submit(&self, input: impl Into<RequestInput>, options: SubmitOptions) -> ResponseHandle {
        let id = Uuid::new_v4();
        let cancel = self
            .root
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token();
        let (reply, rx) = tokio::sync::oneshot::channel();

        let request = InferenceRequest {
            id,
            input: input.into(),
            options,
            cancel: cancel.clone(),
            reply,
        };

        self.state.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(request).is_err() {
            self.state.pending.fetch_sub(1, Ordering::SeqCst);
            warn!(request_id = %id, "Executor is gone, rejecting request");
            return ResponseHandle::rejected(InferenceError::NotReady);
        }

        debug!(request_id = %id, "Request queued");
        ResponseHandle::new(id, cancel, rx)
    }

    /// Cancels every queued and executing request
    ///
    /// Requests submitted afterwards are unaffected.
    pub fn cancel_all(&self) {
        let previous = std::mem::replace(
            &mut *self.root.lock().unwrap_or_else(PoisonError::into_inner),
            CancellationToken::new(),
        );
        previous.cancel();
        info!(pending = self.pending(), "Cancelled all requests");
    }

    /// True while a request is executing
    pub fn is_busy(&self) -> bool {
        self.state.busy.load(Ordering::SeqCst)
    }

    /// Requests waiting to be dequeued
    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("busy", &self.is_busy())
            .field("pending", &self.pending())
            .finish()
    }
}

async fn run(
    engine: Arc<dyn EngineHandle>,
    mut rx: mpsc::UnboundedReceiver<InferenceRequest>,
    system_prompt: watch::Receiver<String>,
    state: Arc<QueueState>,
) {
    while let Some(request) = rx.recv().await {
        state.pending.fetch_sub(1, Ordering::SeqCst);
        let InferenceRequest {
            id,
            input,
            options,
            cancel,
            reply,
        } = request;

        if cancel.is_cancelled() {
            debug!(request_id = %id, "Skipping cancelled request");
            let _ = reply.send(Err(InferenceError::Cancelled));
            continue;
        }

        state.busy.store(true, Ordering::SeqCst);
        let prompt = system_prompt.borrow().clone();
        debug!(request_id = %id, stream = options.stream, "Executing request");

        let outcome = AssertUnwindSafe(execute(engine.as_ref(), input, options, &cancel, &prompt))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(InferenceError::generation(panic_message(panic))));

        if let Err(ref err) = outcome {
            log_failure(id, err);
        }
        state.busy.store(false, Ordering::SeqCst);
        let _ = reply.send(outcome);

        tokio::task::yield_now().await;
    }
    debug!("Request channel closed, executor stopping");
}

async fn execute(
    engine: &dyn EngineHandle,
    input: RequestInput,
    options: SubmitOptions,
    cancel: &CancellationToken,
    system_prompt: &str,
) -> Result<String, InferenceError> {
    let SubmitOptions {
        stream,
        on_chunk,
        generate,
    } = options;
    let request = CompletionRequest::new(input.into_messages(system_prompt))
        .streaming(stream)
        .with_options(generate);

    match engine.complete(request).await? {
        Completion::Text(text) => {
            if cancel.is_cancelled() {
                return Err(InferenceError::Cancelled);
            }
            if stream && !text.is_empty() {
                if let Some(ref on_chunk) = on_chunk {
                    on_chunk(&text);
                }
            }
            Ok(text)
        }
        Completion::Stream(mut chunks) => {
            let mut reply = String::new();
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(InferenceError::Cancelled),
                    next = chunks.next() => next,
                };
                match next {
                    Some(Ok(chunk)) if chunk.is_empty() => continue,
                    Some(Ok(chunk)) => {
                        reply.push_str(&chunk);
                        if let Some(ref on_chunk) = on_chunk {
                            on_chunk(&chunk);
                        }
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                }
            }
            Ok(reply)
        }
    }
}

fn log_failure(id: Uuid, err: &InferenceError) {
    if err.is_cancelled() {
        debug!(request_id = %id, "Request aborted");
    } else if err.is_device_lost() {
        warn!(request_id = %id, error = %err, "Device lost detected");
    } else {
        error!(request_id = %id, error = %err, "Request failed");
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("engine panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("engine panicked: {}", message)
    } else {
        "engine panicked".to_string()
    }
}
