//! Shared engine session coordination
//!
//! A [`Coordinator`] owns at most one engine session for its lifetime. Any
//! number of callers may share it (it is cheap to clone): the first
//! [`Coordinator::ensure`] spawns a task running the capability probe and the
//! loading chain, concurrent callers attach to that same task, and later
//! callers observe its outcome without loading again. The task runs to
//! completion even when every caller stops waiting for it.
//!
//! ```text
//! idle -> loading -> ready | error | unsupported
//! ```
//!
//! `ready`, `error` and `unsupported` are absorbing.

use crate::capability::{probe, CapabilityReport, DeviceHints};
use crate::config::OrchestratorConfig;
use crate::engine::{ChatMessage, EngineProvider, ExecutionMode};
use crate::error::InferenceError;
use crate::executor::{RequestInput, RequestQueue, ResponseHandle, SubmitOptions};
use crate::loader::{EngineLoader, LoadPlan, LoadStage};
use crate::progress::{ProgressHandler, ProgressHub, Subscription};
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Lifecycle of the shared session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Idle,
    Loading,
    Ready,
    #[serde(rename = "error")]
    Failed,
    Unsupported,
}

impl Status {
    /// Whether no further transition can happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Ready | Status::Failed | Status::Unsupported)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Idle => write!(f, "idle"),
            Status::Loading => write!(f, "loading"),
            Status::Ready => write!(f, "ready"),
            Status::Failed => write!(f, "error"),
            Status::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// The single loaded engine and its executor
#[derive(Debug)]
pub struct EngineSession {
    pub model_id: String,
    pub mode: ExecutionMode,
    pub stage: LoadStage,
    queue: RequestQueue,
}

impl EngineSession {
    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }
}

#[derive(Debug)]
enum SessionOutcome {
    Ready(EngineSession),
    Unsupported,
    Failed { attempts: usize },
}

impl SessionOutcome {
    fn status(&self) -> Status {
        match self {
            SessionOutcome::Ready(_) => Status::Ready,
            SessionOutcome::Unsupported => Status::Unsupported,
            SessionOutcome::Failed { .. } => Status::Failed,
        }
    }
}

/// Completion signal of the spawned load task
type LoadTask = Shared<BoxFuture<'static, ()>>;

struct Inner {
    config: OrchestratorConfig,
    provider: Arc<dyn EngineProvider>,
    hints: DeviceHints,
    status: watch::Sender<Status>,
    system_prompt: watch::Sender<String>,
    progress: Arc<ProgressHub>,
    load_task: Mutex<Option<LoadTask>>,
    session: OnceLock<SessionOutcome>,
}

/// Shared handle to the single engine session
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Creates a coordinator; nothing is probed or loaded until [`Coordinator::ensure`]
    pub fn new(
        config: OrchestratorConfig,
        provider: Arc<dyn EngineProvider>,
        hints: DeviceHints,
    ) -> Self {
        let (status, _) = watch::channel(Status::Idle);
        let (system_prompt, _) = watch::channel(config.system_prompt.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                provider,
                hints,
                status,
                system_prompt,
                progress: ProgressHub::new(),
                load_task: Mutex::new(None),
                session: OnceLock::new(),
            }),
        }
    }

    /// Brings the shared session up, loading it at most once
    ///
    /// The load runs on its own task: dropping this future (for instance on a
    /// timeout) stops waiting but never interrupts a strategy in progress.
    ///
    /// Returns `Ok(())` once the session is ready, and also when the device is
    /// unsupported (check [`Coordinator::status`]). Returns
    /// [`InferenceError::LoadFailed`] when every load strategy failed, on this
    /// and every later call.
    ///
    /// `system_prompt` replaces the current prompt. The caller that triggers
    /// the load has it applied before the first request can run; callers that
    /// attach to a load in progress have theirs applied once it finishes.
    /// On an already-ready session the override is ignored.
    pub async fn ensure(&self, system_prompt: Option<String>) -> Result<(), InferenceError> {
        if let Some(outcome) = self.inner.session.get() {
            return outcome_result(outcome);
        }

        let (task, triggered) = self.load_task(system_prompt.clone());
        task.await;

        let Some(outcome) = self.inner.session.get() else {
            return Err(InferenceError::LoadFailed { attempts: 0 });
        };
        if !triggered {
            if let (Some(prompt), SessionOutcome::Ready(_)) = (system_prompt, outcome) {
                debug!("Applying system prompt override from attached caller");
                self.set_system_prompt(prompt);
            }
        }
        outcome_result(outcome)
    }

    /// Returns the load task, spawning it on first use
    fn load_task(&self, system_prompt: Option<String>) -> (LoadTask, bool) {
        let mut slot = self
            .inner
            .load_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = slot.as_ref() {
            return (task.clone(), false);
        }

        let coordinator = self.clone();
        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(coordinator.load_session(system_prompt))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    error!("Engine loading panicked");
                    SessionOutcome::Failed { attempts: 0 }
                });
            // Status follows the stored outcome so a `ready` observer can submit at once
            let status = outcome.status();
            if coordinator.inner.session.set(outcome).is_err() {
                warn!("Engine session was already settled");
            }
            coordinator.inner.status.send_replace(status);
        });
        let task = handle.map(|_| ()).boxed().shared();
        *slot = Some(task.clone());
        (task, true)
    }

    async fn load_session(&self, system_prompt: Option<String>) -> SessionOutcome {
        let inner = &self.inner;

        let report = probe(&inner.hints);
        if !report.supported {
            let reasons: Vec<String> = report.reasons.iter().map(ToString::to_string).collect();
            warn!(reasons = ?reasons, "Local inference unsupported on this device");
            return SessionOutcome::Unsupported;
        }

        if let Some(prompt) = system_prompt {
            inner.system_prompt.send_replace(prompt);
        }
        inner.status.send_replace(Status::Loading);

        let mut loader =
            EngineLoader::new(self.load_plan(), inner.provider.clone(), inner.progress.clone());
        match loader.load().await {
            Ok(loaded) => {
                let queue = RequestQueue::spawn(loaded.engine, inner.system_prompt.subscribe());
                info!(model = %loaded.model_id, mode = %loaded.mode, "Engine session ready");
                let session = EngineSession {
                    model_id: loaded.model_id,
                    mode: loaded.mode,
                    stage: loaded.stage,
                    queue,
                };
                SessionOutcome::Ready(session)
            }
            Err(InferenceError::LoadFailed { attempts }) => SessionOutcome::Failed { attempts },
            Err(e) => {
                warn!(error = %e, "Engine loading failed");
                SessionOutcome::Failed {
                    attempts: loader.attempted().len(),
                }
            }
        }
    }

    fn load_plan(&self) -> LoadPlan {
        let inner = &self.inner;
        let plan = inner.config.load_plan();
        match inner.hints.accelerator_limits {
            Some(limits) if plan.allows_worker() && !limits.sufficient() => {
                warn!(
                    max_storage_buffer_binding_size = limits.max_storage_buffer_binding_size,
                    max_compute_workgroup_storage_size = limits.max_compute_workgroup_storage_size,
                    "Accelerator limits too low for the worker, skipping it"
                );
                inner.progress.set_status_message(
                    "Accelerator limits too low for background loading; loading on the main thread",
                );
                plan.with_worker(false)
            }
            _ => plan,
        }
    }

    /// The loaded session, once the coordinator is ready
    pub fn session(&self) -> Option<&EngineSession> {
        match self.inner.session.get() {
            Some(SessionOutcome::Ready(session)) => Some(session),
            _ => None,
        }
    }

    /// Submits a prompt; fails with [`InferenceError::NotReady`] unless ready
    ///
    /// The request is queued before this returns.
    pub fn submit(
        &self,
        prompt: impl Into<String>,
        options: SubmitOptions,
    ) -> impl Future<Output = Result<String, InferenceError>> + Send + 'static {
        self.submit_cancelable(prompt, options)
    }

    /// Like [`Coordinator::submit`], returning a handle that can cancel the request
    pub fn submit_cancelable(
        &self,
        prompt: impl Into<String>,
        options: SubmitOptions,
    ) -> ResponseHandle {
        self.enqueue(RequestInput::Prompt(prompt.into()), options)
    }

    /// Submits an explicit message list, sent after the current system prompt
    pub fn submit_conversation(
        &self,
        messages: Vec<ChatMessage>,
        options: SubmitOptions,
    ) -> ResponseHandle {
        self.enqueue(RequestInput::Conversation(messages), options)
    }

    fn enqueue(&self, input: RequestInput, options: SubmitOptions) -> ResponseHandle {
        match self.session() {
            Some(session) => session.queue.submit(input, options),
            None => {
                debug!(status = %self.status(), "Rejecting request, engine not ready");
                ResponseHandle::rejected(InferenceError::NotReady)
            }
        }
    }

    /// Replaces the system prompt for requests that start executing from now on
    pub fn set_system_prompt(&self, prompt: impl Into<String>) {
        self.inner.system_prompt.send_replace(prompt.into());
    }

    pub fn system_prompt(&self) -> String {
        self.inner.system_prompt.borrow().clone()
    }

    /// Attaches a progress handler; it sees events emitted from now on
    pub fn on_progress(&self, handler: Arc<dyn ProgressHandler>) -> Subscription {
        self.inner.progress.subscribe(handler)
    }

    pub fn status(&self) -> Status {
        *self.inner.status.borrow()
    }

    /// Receiver that observes every status transition
    pub fn watch_status(&self) -> watch::Receiver<Status> {
        self.inner.status.subscribe()
    }

    /// Latest human-readable loading status line
    pub fn status_message(&self) -> Option<String> {
        self.inner.progress.status_message()
    }

    pub fn capability_report(&self) -> CapabilityReport {
        probe(&self.inner.hints)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Model actually serving requests; the fallback model after a fallback load
    pub fn model_id(&self) -> Option<String> {
        self.session().map(|session| session.model_id.clone())
    }

    pub fn execution_mode(&self) -> Option<ExecutionMode> {
        self.session().map(|session| session.mode)
    }

    pub fn is_busy(&self) -> bool {
        self.session().map_or(false, |session| session.queue.is_busy())
    }

    pub fn pending(&self) -> usize {
        self.session().map_or(0, |session| session.queue.pending())
    }

    /// Cancels every queued and executing request
    pub fn cancel_all(&self) {
        if let Some(session) = self.session() {
            session.queue.cancel_all();
        }
    }
}

fn outcome_result(outcome: &SessionOutcome) -> Result<(), InferenceError> {
    match outcome {
        SessionOutcome::Ready(_) | SessionOutcome::Unsupported => Ok(()),
        SessionOutcome::Failed { attempts } => Err(InferenceError::LoadFailed {
            attempts: *attempts,
        }),
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("status", &self.status())
            .field("model_id", &self.model_id())
            .field("provider", &self.inner.provider.name())
            .finish()
    }
}
