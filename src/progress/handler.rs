//! Progress handler trait and events

use crate::engine::ExecutionMode;
use crate::loader::LoadStage;
use std::fmt;
use std::time::Duration;

/// Events emitted while the engine is being brought up
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A load strategy is about to be attempted
    StageStarted { stage: LoadStage, model_id: String },

    /// Download/compile progress reported by the provider for the current stage
    Progress {
        stage: LoadStage,
        fraction: f64,
        text: Option<String>,
    },

    /// A load strategy failed; the loader moves on to the next one
    StageFailed {
        stage: LoadStage,
        model_id: String,
        error: String,
    },

    /// An engine is loaded and ready
    Ready {
        model_id: String,
        mode: ExecutionMode,
        elapsed: Duration,
    },

    /// Every configured strategy failed
    Failed { attempts: usize },
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::StageStarted { stage, model_id } => {
                write!(f, "Loading {} ({})", model_id, stage)
            }
            ProgressEvent::Progress { fraction, text, .. } => {
                let percent = (fraction * 100.0).round() as u32;
                match text {
                    Some(text) => write!(f, "Init progress: {}% - {}", percent, text),
                    None => write!(f, "Init progress: {}%", percent),
                }
            }
            ProgressEvent::StageFailed { stage, error, .. } => {
                write!(f, "{} failed: {}", stage, error)
            }
            ProgressEvent::Ready { model_id, mode, .. } => {
                write!(f, "{} ready ({})", model_id, mode)
            }
            ProgressEvent::Failed { attempts } => {
                write!(f, "Engine failed to load after {} attempt(s)", attempts)
            }
        }
    }
}

/// Receives progress events, in the order they are emitted
pub trait ProgressHandler: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressHandler for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_closure_handler() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let handler = move |_: &ProgressEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
        };

        handler.on_progress(&ProgressEvent::Failed { attempts: 3 });
        NoOpHandler.on_progress(&ProgressEvent::Failed { attempts: 3 });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_progress_display() {
        let event = ProgressEvent::Progress {
            stage: LoadStage::PrimaryWorker,
            fraction: 0.423,
            text: Some("Fetching param cache".to_string()),
        };
        assert_eq!(event.to_string(), "Init progress: 42% - Fetching param cache");

        let bare = ProgressEvent::Progress {
            stage: LoadStage::PrimaryWorker,
            fraction: 1.0,
            text: None,
        };
        assert_eq!(bare.to_string(), "Init progress: 100%");
    }
}
