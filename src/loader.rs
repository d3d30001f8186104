//! Engine loading with a strategy fallback chain
//!
//! Strategies are tried in a fixed order, each at most once per loader:
//!
//! 1. primary model on a background worker (when workers are allowed)
//! 2. primary model on the calling runtime
//! 3. fallback model on the calling runtime (when one is configured)
//!
//! Individual stage failures are logged and reported as progress events;
//! only exhaustion of every stage surfaces to the caller.

use crate::engine::{EngineHandle, EngineProvider, ExecutionMode};
use crate::error::InferenceError;
use crate::progress::{ProgressEvent, ProgressHub};
use futures_util::FutureExt;
use serde::Serialize;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One way of bringing up the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStage {
    PrimaryWorker,
    PrimaryMainThread,
    FallbackModel,
}

impl LoadStage {
    pub fn mode(&self) -> ExecutionMode {
        match self {
            LoadStage::PrimaryWorker => ExecutionMode::Worker,
            LoadStage::PrimaryMainThread | LoadStage::FallbackModel => ExecutionMode::MainThread,
        }
    }
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStage::PrimaryWorker => write!(f, "primary-worker"),
            LoadStage::PrimaryMainThread => write!(f, "primary-main-thread"),
            LoadStage::FallbackModel => write!(f, "fallback-model"),
        }
    }
}

/// Which models to load and whether the worker strategy is allowed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadPlan {
    primary_model: String,
    fallback_model: Option<String>,
    allow_worker: bool,
}

impl LoadPlan {
    pub fn new(primary_model: impl Into<String>) -> Self {
        Self {
            primary_model: primary_model.into(),
            fallback_model: None,
            allow_worker: true,
        }
    }

    /// Sets the lighter model of the last stage; one equal to the primary is ignored
    pub fn with_fallback(mut self, fallback_model: Option<String>) -> Self {
        self.fallback_model = fallback_model.filter(|m| !m.is_empty() && *m != self.primary_model);
        self
    }

    pub fn with_worker(mut self, allow_worker: bool) -> Self {
        self.allow_worker = allow_worker;
        self
    }

    pub fn primary_model(&self) -> &str {
        &self.primary_model
    }

    pub fn fallback_model(&self) -> Option<&str> {
        self.fallback_model.as_deref()
    }

    pub fn allows_worker(&self) -> bool {
        self.allow_worker
    }

    /// Stages in the order they will be attempted, with the model each loads
    pub fn stages(&self) -> Vec<(LoadStage, String)> {
        let mut stages = Vec::with_capacity(3);
        if self.allow_worker {
            stages.push((LoadStage::PrimaryWorker, self.primary_model.clone()));
        }
        stages.push((LoadStage::PrimaryMainThread, self.primary_model.clone()));
        if let Some(ref fallback) = self.fallback_model {
            stages.push((LoadStage::FallbackModel, fallback.clone()));
        }
        stages
    }
}

/// A successfully loaded engine
#[derive(Clone)]
pub struct LoadedEngine {
    pub engine: Arc<dyn EngineHandle>,
    pub model_id: String,
    pub mode: ExecutionMode,
    pub stage: LoadStage,
}

impl fmt::Debug for LoadedEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedEngine")
            .field("engine", &self.engine.name())
            .field("model_id", &self.model_id)
            .field("mode", &self.mode)
            .field("stage", &self.stage)
            .finish()
    }
}

/// Where the loader is in its lifecycle
#[derive(Debug, Clone)]
pub enum LoaderState {
    Idle,
    Loading(LoadStage),
    Ready(LoadedEngine),
    Failed { attempts: usize },
}

/// Brings up exactly one engine, trying progressively cheaper strategies
pub struct EngineLoader {
    plan: LoadPlan,
    provider: Arc<dyn EngineProvider>,
    progress: Arc<ProgressHub>,
    state: LoaderState,
    attempted: Vec<LoadStage>,
}

impl EngineLoader {
    pub fn new(plan: LoadPlan, provider: Arc<dyn EngineProvider>, progress: Arc<ProgressHub>) -> Self {
        Self {
            plan,
            provider,
            progress,
            state: LoaderState::Idle,
            attempted: Vec::new(),
        }
    }

    pub fn state(&self) -> &LoaderState {
        &self.state
    }

    /// Stages attempted so far, in order
    pub fn attempted(&self) -> &[LoadStage] {
        &self.attempted
    }

    /// Runs the fallback chain
    ///
    /// After success, further calls return the same engine without touching
    /// the provider. After every stage has failed, further calls fail
    /// immediately. A stage interrupted by dropping this future counts as
    /// attempted and is not retried.
    pub async fn load(&mut self) -> Result<LoadedEngine, InferenceError> {
        match &self.state {
            LoaderState::Ready(loaded) => return Ok(loaded.clone()),
            LoaderState::Failed { attempts } => {
                return Err(InferenceError::LoadFailed {
                    attempts: *attempts,
                })
            }
            LoaderState::Idle | LoaderState::Loading(_) => {}
        }

        let start = Instant::now();
        for (stage, model_id) in self.plan.stages() {
            if self.attempted.contains(&stage) {
                continue;
            }
            self.attempted.push(stage);
            self.state = LoaderState::Loading(stage);

            debug!(stage = %stage, model = %model_id, "Attempting engine load");
            self.progress.emit(ProgressEvent::StageStarted {
                stage,
                model_id: model_id.clone(),
            });

            let attempt = self
                .provider
                .create_engine(&model_id, stage.mode(), self.progress.reporter(stage));
            let error = match AssertUnwindSafe(attempt).catch_unwind().await {
                Ok(Ok(engine)) => {
                    let loaded = LoadedEngine {
                        engine,
                        model_id: model_id.clone(),
                        mode: stage.mode(),
                        stage,
                    };
                    let elapsed = start.elapsed();
                    info!(
                        model = %model_id,
                        mode = %loaded.mode,
                        stage = %stage,
                        duration_ms = elapsed.as_millis(),
                        "Engine loaded"
                    );
                    self.progress.emit(ProgressEvent::Ready {
                        model_id,
                        mode: loaded.mode,
                        elapsed,
                    });
                    self.state = LoaderState::Ready(loaded.clone());
                    return Ok(loaded);
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => "provider panicked".to_string(),
            };

            warn!(stage = %stage, model = %model_id, error = %error, "Engine load stage failed");
            self.progress.emit(ProgressEvent::StageFailed {
                stage,
                model_id,
                error,
            });
        }

        let attempts = self.attempted.len();
        warn!(
            attempts,
            model = self.plan.primary_model(),
            fallback = self.plan.fallback_model().unwrap_or("none"),
            "All engine load strategies failed"
        );
        self.progress.emit(ProgressEvent::Failed { attempts });
        self.state = LoaderState::Failed { attempts };
        Err(InferenceError::LoadFailed { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{LoadCall, ScriptedProvider};
    use std::sync::Mutex;

    fn loader(plan: LoadPlan, provider: Arc<ScriptedProvider>) -> EngineLoader {
        EngineLoader::new(plan, provider, ProgressHub::new())
    }

    fn full_plan() -> LoadPlan {
        LoadPlan::new("big").with_fallback(Some("small".to_string()))
    }

    #[test]
    fn test_plan_stages() {
        assert_eq!(
            full_plan().stages(),
            vec![
                (LoadStage::PrimaryWorker, "big".to_string()),
                (LoadStage::PrimaryMainThread, "big".to_string()),
                (LoadStage::FallbackModel, "small".to_string()),
            ]
        );

        let no_worker = LoadPlan::new("big").with_worker(false);
        assert_eq!(
            no_worker.stages(),
            vec![(LoadStage::PrimaryMainThread, "big".to_string())]
        );

        let same = LoadPlan::new("big").with_fallback(Some("big".to_string()));
        assert!(same.fallback_model().is_none());
    }

    #[tokio::test]
    async fn test_worker_success_stops_chain() {
        let provider = Arc::new(ScriptedProvider::new());
        let mut loader = loader(full_plan(), provider.clone());

        let loaded = loader.load().await.unwrap();
        assert_eq!(loaded.stage, LoadStage::PrimaryWorker);
        assert_eq!(loaded.mode, ExecutionMode::Worker);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_main_thread_success_skips_fallback() {
        let provider = Arc::new(ScriptedProvider::new().fail(
            "big",
            ExecutionMode::Worker,
            "worker unsupported",
        ));
        let mut loader = loader(full_plan(), provider.clone());

        let loaded = loader.load().await.unwrap();
        assert_eq!(loaded.stage, LoadStage::PrimaryMainThread);
        assert_eq!(loaded.model_id, "big");
        assert_eq!(
            provider.calls(),
            vec![
                LoadCall::new("big", ExecutionMode::Worker),
                LoadCall::new("big", ExecutionMode::MainThread),
            ]
        );
    }

    #[tokio::test]
    async fn test_fallback_model_becomes_active() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .fail("big", ExecutionMode::Worker, "no worker")
                .fail("big", ExecutionMode::MainThread, "out of memory"),
        );
        let mut loader = loader(full_plan(), provider.clone());

        let loaded = loader.load().await.unwrap();
        assert_eq!(loaded.stage, LoadStage::FallbackModel);
        assert_eq!(loaded.model_id, "small");
        assert_eq!(loader.attempted().len(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_terminal() {
        let provider = Arc::new(ScriptedProvider::new().fail_all());
        let mut loader = loader(full_plan(), provider.clone());

        let err = loader.load().await.unwrap_err();
        assert_eq!(err, InferenceError::LoadFailed { attempts: 3 });
        assert!(matches!(loader.state(), LoaderState::Failed { attempts: 3 }));

        let again = loader.load().await.unwrap_err();
        assert_eq!(again, InferenceError::LoadFailed { attempts: 3 });
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_repeated_load_after_success_is_noop() {
        let provider = Arc::new(ScriptedProvider::new());
        let mut loader = loader(full_plan(), provider.clone());

        loader.load().await.unwrap();
        let again = loader.load().await.unwrap();
        assert_eq!(again.stage, LoadStage::PrimaryWorker);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_stage_events_are_emitted() {
        let provider = Arc::new(ScriptedProvider::new().fail(
            "big",
            ExecutionMode::Worker,
            "no worker",
        ));
        let hub = ProgressHub::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _s = hub.subscribe(Arc::new(move |e: &ProgressEvent| {
            sink.lock().unwrap().push(e.clone())
        }));

        let mut loader = EngineLoader::new(full_plan(), provider, hub);
        loader.load().await.unwrap();

        let events = events.lock().unwrap();
        assert!(matches!(
            events.first(),
            Some(ProgressEvent::StageStarted {
                stage: LoadStage::PrimaryWorker,
                ..
            })
        ));
        assert!(events.iter().any(|e| matches!(
            e,
            ProgressEvent::StageFailed {
                stage: LoadStage::PrimaryWorker,
                ..
            }
        )));
        assert!(matches!(events.last(), Some(ProgressEvent::Ready { .. })));
    }
}
