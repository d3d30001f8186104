//! Fan-out of progress events to independent subscribers

use super::handler::{ProgressEvent, ProgressHandler};
use crate::loader::LoadStage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

/// Delivers every progress event to every current subscriber, in emission order
///
/// Subscribers may attach or detach at any time; a subscriber only sees the
/// events emitted while it is attached. The hub also remembers a one-line
/// status message derived from the latest progress event.
#[derive(Default)]
pub struct ProgressHub {
    subscribers: RwLock<Vec<(u64, Arc<dyn ProgressHandler>)>>,
    next_id: AtomicU64,
    status_message: RwLock<Option<String>>,
}

impl ProgressHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attaches a handler; keep the returned [`Subscription`] to detach it later
    pub fn subscribe(self: &Arc<Self>, handler: Arc<dyn ProgressHandler>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, handler));
        Subscription {
            id,
            hub: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, id: u64) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Sends an event to all subscribers
    ///
    /// Handlers are invoked outside the subscriber lock, so a handler may
    /// subscribe or unsubscribe without deadlocking.
    pub fn emit(&self, event: ProgressEvent) {
        if matches!(event, ProgressEvent::Progress { .. }) {
            self.set_status_message(event.to_string());
        }

        let snapshot: Vec<Arc<dyn ProgressHandler>> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in snapshot {
            handler.on_progress(&event);
        }
    }

    pub fn set_status_message(&self, message: impl Into<String>) {
        *self
            .status_message
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(message.into());
    }

    pub fn status_message(&self) -> Option<String> {
        self.status_message
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Creates the reporter handed to an engine provider for one load stage
    pub fn reporter(self: &Arc<Self>, stage: LoadStage) -> ProgressReporter {
        ProgressReporter {
            hub: self.clone(),
            stage,
        }
    }
}

impl std::fmt::Debug for ProgressHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressHub")
            .field("subscribers", &self.subscriber_count())
            .field("status_message", &self.status_message())
            .finish()
    }
}

/// Handle for a progress subscription
///
/// Dropping it keeps the handler attached; call [`Subscription::unsubscribe`]
/// to detach.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    hub: Weak<ProgressHub>,
}

impl Subscription {
    /// Detaches the handler. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.hub.upgrade() {
            Some(hub) => hub.unsubscribe(self.id),
            None => false,
        }
    }
}

/// Progress sink given to an engine provider during one load attempt
///
/// Fractions are clamped to `[0, 1]`. Progress is only monotonic within a
/// single attempt; a later stage starts again from its own beginning.
#[derive(Clone)]
pub struct ProgressReporter {
    hub: Arc<ProgressHub>,
    stage: LoadStage,
}

impl ProgressReporter {
    pub fn report(&self, fraction: f64, text: Option<&str>) {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.hub.emit(ProgressEvent::Progress {
            stage: self.stage,
            fraction,
            text: text.map(str::to_string),
        });
    }

    pub fn stage(&self) -> LoadStage {
        self.stage
    }

    /// A reporter that goes nowhere, for driving providers outside the loader
    pub fn detached(stage: LoadStage) -> Self {
        Self {
            hub: ProgressHub::new(),
            stage,
        }
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("stage", &self.stage)
            .finish()
    }
}
