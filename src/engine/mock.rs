//! Scripted engine provider for tests and offline demos
//!
//! [`ScriptedProvider`] decides per (model, mode) whether a load succeeds and
//! records every load call. All successful loads hand out the same
//! [`ScriptedEngine`], which replays queued replies and records every
//! completion request it receives.

use super::provider::{EngineHandle, EngineProvider};
use super::types::{Completion, CompletionRequest, ExecutionMode, MessageRole};
use crate::error::EngineError;
use crate::progress::ProgressReporter;
use async_trait::async_trait;
use futures_util::{future, stream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// One scripted reply of a [`ScriptedEngine`]
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Chunks(Vec<String>),
    Fail(String),
    Panic(String),
}

impl ScriptedReply {
    pub fn text(content: impl Into<String>) -> Self {
        ScriptedReply::Text(content.into())
    }

    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScriptedReply::Chunks(chunks.into_iter().map(Into::into).collect())
    }

    pub fn fail(message: impl Into<String>) -> Self {
        ScriptedReply::Fail(message.into())
    }
}

/// Start/end markers and in-flight counts, shared with streamed replies
#[derive(Default)]
struct Activity {
    events: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

/// Engine that replays scripted replies in order
///
/// A completion counts as in progress until its reply is fully consumed:
/// for streamed replies that is when the stream is exhausted or dropped.
pub struct ScriptedEngine {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<CompletionRequest>>,
    activity: Arc<Activity>,
    gated: AtomicBool,
    gate: Semaphore,
    chunk_delay: Mutex<Option<Duration>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            activity: Arc::new(Activity::default()),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
            chunk_delay: Mutex::new(None),
        }
    }

    pub fn add_reply(&self, reply: ScriptedReply) {
        lock(&self.replies).push_back(reply);
    }

    pub fn add_replies(&self, replies: impl IntoIterator<Item = ScriptedReply>) {
        lock(&self.replies).extend(replies);
    }

    pub fn remaining_replies(&self) -> usize {
        lock(&self.replies).len()
    }

    /// Makes every completion wait for a [`ScriptedEngine::release`] permit
    pub fn hold(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    /// Lets `n` held completions proceed
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Delays every streamed chunk, leaving room to cancel mid-stream
    pub fn set_chunk_delay(&self, delay: Duration) {
        *lock(&self.chunk_delay) = Some(delay);
    }

    /// Every completion request received so far, in call order
    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// `start:<prompt>` / `end:<prompt>` markers in call order
    pub fn events(&self) -> Vec<String> {
        lock(&self.activity.events).clone()
    }

    /// Highest number of completions that were ever in progress at once
    pub fn max_concurrency(&self) -> usize {
        self.activity.max_active.load(Ordering::SeqCst)
    }

    /// Waits until at least `n` requests have reached the engine
    pub async fn wait_for_requests(&self, n: usize) {
        while self.request_count() < n {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn label(request: &CompletionRequest) -> String {
    request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::User)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

/// One completion in progress; records `end:` when dropped
struct InFlight {
    activity: Arc<Activity>,
    name: String,
}

impl InFlight {
    fn start(activity: &Arc<Activity>, name: String) -> Self {
        let now_active = activity.active.fetch_add(1, Ordering::SeqCst) + 1;
        activity.max_active.fetch_max(now_active, Ordering::SeqCst);
        lock(&activity.events).push(format!("start:{}", name));
        Self {
            activity: activity.clone(),
            name,
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        lock(&self.activity.events).push(format!("end:{}", self.name));
        self.activity.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl EngineHandle for ScriptedEngine {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, EngineError> {
        let in_flight = InFlight::start(&self.activity, label(&request));
        lock(&self.requests).push(request);

        if self.gated.load(Ordering::SeqCst) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }

        let reply = lock(&self.replies).pop_front();

        match reply {
            Some(ScriptedReply::Text(text)) => Ok(Completion::Text(text)),
            Some(ScriptedReply::Chunks(chunks)) => {
                let delay = *lock(&self.chunk_delay);
                let chunks = stream::iter(chunks).then(move |chunk| async move {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    Ok(chunk)
                });
                // Trailing stage owns the in-flight marker until the stream ends or is dropped
                let finish = stream::once(async move {
                    drop(in_flight);
                    None
                })
                .filter_map(future::ready);
                Ok(Completion::Stream(chunks.chain(finish).boxed()))
            }
            Some(ScriptedReply::Fail(message)) => Err(EngineError::completion(message)),
            Some(ScriptedReply::Panic(message)) => panic!("{}", message),
            None => Err(EngineError::completion(
                "ScriptedEngine: No more replies in queue",
            )),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

impl std::fmt::Debug for ScriptedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedEngine")
            .field("remaining_replies", &self.remaining_replies())
            .field("requests", &self.request_count())
            .finish()
    }
}

/// A recorded `create_engine` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadCall {
    pub model_id: String,
    pub mode: ExecutionMode,
}

impl LoadCall {
    pub fn new(model_id: impl Into<String>, mode: ExecutionMode) -> Self {
        Self {
            model_id: model_id.into(),
            mode,
        }
    }
}

/// Provider whose load outcomes are scripted per (model, mode)
///
/// Loads succeed unless a failure was registered for that combination.
pub struct ScriptedProvider {
    engine: Arc<ScriptedEngine>,
    failures: Mutex<HashMap<(String, ExecutionMode), String>>,
    fail_everything: AtomicBool,
    calls: Mutex<Vec<LoadCall>>,
    progress_steps: Vec<f64>,
    load_delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            engine: Arc::new(ScriptedEngine::new()),
            failures: Mutex::new(HashMap::new()),
            fail_everything: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            progress_steps: vec![0.0, 0.5, 1.0],
            load_delay: None,
        }
    }

    /// Makes loading `model_id` in `mode` fail with `message`
    pub fn fail(self, model_id: impl Into<String>, mode: ExecutionMode, message: &str) -> Self {
        lock(&self.failures).insert((model_id.into(), mode), message.to_string());
        self
    }

    pub fn fail_all(self) -> Self {
        self.fail_everything.store(true, Ordering::SeqCst);
        self
    }

    /// Sleeps this long inside every load, leaving room for concurrent callers
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    pub fn with_progress_steps(mut self, steps: Vec<f64>) -> Self {
        self.progress_steps = steps;
        self
    }

    pub fn engine(&self) -> Arc<ScriptedEngine> {
        self.engine.clone()
    }

    pub fn calls(&self) -> Vec<LoadCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineProvider for ScriptedProvider {
    async fn create_engine(
        &self,
        model_id: &str,
        mode: ExecutionMode,
        progress: ProgressReporter,
    ) -> Result<Arc<dyn EngineHandle>, EngineError> {
        lock(&self.calls).push(LoadCall::new(model_id, mode));

        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        for step in &self.progress_steps {
            progress.report(*step, Some(model_id));
        }

        if self.fail_everything.load(Ordering::SeqCst) {
            return Err(EngineError::load(model_id, "scripted failure"));
        }
        if let Some(message) = lock(&self.failures).get(&(model_id.to_string(), mode)) {
            return Err(EngineError::load(model_id, message.clone()));
        }

        Ok(self.engine.clone())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

impl std::fmt::Debug for ScriptedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedProvider")
            .field("calls", &self.call_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ChatMessage;
    use crate::loader::LoadStage;

    fn ask(prompt: &str) -> CompletionRequest {
        CompletionRequest::new(vec![ChatMessage::system("sys"), ChatMessage::user(prompt)])
    }

    #[tokio::test]
    async fn test_replies_in_order() {
        let engine = ScriptedEngine::new();
        engine.add_replies(vec![ScriptedReply::text("First"), ScriptedReply::text("Second")]);
        assert_eq!(engine.remaining_replies(), 2);

        let first = engine.complete(ask("a")).await.unwrap();
        assert!(matches!(first, Completion::Text(ref t) if t == "First"));
        let second = engine.complete(ask("b")).await.unwrap();
        assert!(matches!(second, Completion::Text(ref t) if t == "Second"));

        assert_eq!(engine.events(), vec!["start:a", "end:a", "start:b", "end:b"]);
    }

    #[tokio::test]
    async fn test_empty_queue_is_an_error() {
        let engine = ScriptedEngine::new();
        assert!(engine.complete(ask("a")).await.is_err());
    }

    #[tokio::test]
    async fn test_chunks_stream() {
        let engine = ScriptedEngine::new();
        engine.add_reply(ScriptedReply::chunks(["Hel", "lo"]));

        let chunks: Vec<String> = match engine.complete(ask("a").streaming(true)).await.unwrap() {
            Completion::Stream(s) => s.map(|c| c.unwrap()).collect().await,
            Completion::Text(_) => panic!("expected a stream"),
        };
        assert_eq!(chunks, vec!["Hel", "lo"]);
        assert_eq!(engine.events(), vec!["start:a", "end:a"]);
    }

    #[tokio::test]
    async fn test_stream_stays_in_flight_until_consumed() {
        let engine = ScriptedEngine::new();
        engine.add_reply(ScriptedReply::chunks(["one", "two"]));

        let Completion::Stream(mut chunks) = engine.complete(ask("a").streaming(true)).await.unwrap()
        else {
            panic!("expected a stream");
        };
        assert_eq!(engine.events(), vec!["start:a"]);

        assert_eq!(chunks.next().await.unwrap().unwrap(), "one");
        assert_eq!(engine.events(), vec!["start:a"]);
        assert_eq!(chunks.next().await.unwrap().unwrap(), "two");
        assert!(chunks.next().await.is_none());
        assert_eq!(engine.events(), vec!["start:a", "end:a"]);
    }

    #[tokio::test]
    async fn test_dropped_stream_ends_the_completion() {
        let engine = ScriptedEngine::new();
        engine.add_reply(ScriptedReply::chunks(["one", "two"]));

        let completion = engine.complete(ask("a").streaming(true)).await.unwrap();
        drop(completion);

        assert_eq!(engine.events(), vec!["start:a", "end:a"]);
    }

    #[tokio::test]
    async fn test_provider_records_calls_and_failures() {
        let provider = ScriptedProvider::new().fail("big", ExecutionMode::Worker, "oom");

        let failed = provider
            .create_engine(
                "big",
                ExecutionMode::Worker,
                ProgressReporter::detached(LoadStage::PrimaryWorker),
            )
            .await;
        assert!(failed.is_err());

        let loaded = provider
            .create_engine(
                "big",
                ExecutionMode::MainThread,
                ProgressReporter::detached(LoadStage::PrimaryMainThread),
            )
            .await;
        assert!(loaded.is_ok());

        assert_eq!(
            provider.calls(),
            vec![
                LoadCall::new("big", ExecutionMode::Worker),
                LoadCall::new("big", ExecutionMode::MainThread),
            ]
        );
    }
}
