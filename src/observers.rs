use std::sync::{Arc, Mutex};

use log::info;
use serde::Serialize;

/// Which record changed status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordKind {
    Reservation,
    Rental,
}

/// A committed status change, e.g. a reservation going `active` → `expired`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionEvent {
    pub kind: RecordKind,
    pub record_id: String,
    pub book_id: String,
    pub user_id: String,
    /// `None` when the record was just created.
    pub from: Option<String>,
    pub to: String,
}

/// Notified after a workflow step has committed.
pub trait TransitionObserver: Send + Sync {
    fn on_transition(&self, event: &TransitionEvent);
}

impl<T: TransitionObserver + ?Sized> TransitionObserver for Arc<T> {
    fn on_transition(&self, event: &TransitionEvent) {
        (**self).on_transition(event);
    }
}

/// Logs every transition through the `log` facade.
#[derive(Debug)]
pub struct TransitionLogger;

impl TransitionObserver for TransitionLogger {
    fn on_transition(&self, event: &TransitionEvent) {
        info!(
            "{:?} {} for book {} (user {}): {} --> {}",
            event.kind,
            event.record_id,
            event.book_id,
            event.user_id,
            event.from.as_deref().unwrap_or("new"),
            event.to
        );
    }
}

/// Keeps every event in memory. Handy for front-ends that poll for changes.
#[derive(Debug, Default)]
pub struct TransitionRecorder {
    events: Mutex<Vec<TransitionEvent>>,
}

impl TransitionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns and clears the recorded events.
    pub fn drain(&self) -> Vec<TransitionEvent> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl TransitionObserver for TransitionRecorder {
    fn on_transition(&self, event: &TransitionEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}
