//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::StageStarted { stage, model_id } => {
                info!(stage = %stage, model = %model_id, "Starting load stage");
            }
            ProgressEvent::Progress {
                stage,
                fraction,
                text,
            } => {
                debug!(
                    stage = %stage,
                    percent = (fraction * 100.0).round() as u32,
                    text = text.as_deref().unwrap_or(""),
                    "Load progress"
                );
            }
            ProgressEvent::StageFailed {
                stage,
                model_id,
                error,
            } => {
                warn!(stage = %stage, model = %model_id, error = %error, "Load stage failed");
            }
            ProgressEvent::Ready {
                model_id,
                mode,
                elapsed,
            } => {
                info!(
                    model = %model_id,
                    mode = %mode,
                    duration_ms = elapsed.as_millis(),
                    "Engine ready"
                );
            }
            ProgressEvent::Failed { attempts } => {
                warn!(attempts, "Engine failed to load");
            }
        }
    }
}
