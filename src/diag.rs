//! Diagnostics hook for internal scheduler errors.
//!
//! The scheduler never logs directly and never escalates internal errors to
//! the caller's control flow mid-tick. Instead it emits [`DiagEvent`]s to a
//! host-supplied [`DiagnosticsHook`]. The production default is [`NoopDiag`];
//! tests and debug panels use [`CollectingDiag`].
//!
//! Hook implementations must not panic and must not call back into the
//! scheduler's `tick`.

use std::sync::Mutex;

use crate::id_alloc::TaskId;

/// Internal error surfaced through the diagnostics hook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiagEvent {
    /// The id allocator scanned the whole id space without a free value.
    IdSpaceExhausted,
    /// A user callback panicked; the tick continued with the next task.
    CallbackFailed {
        id: TaskId,
        /// Panic payload rendered as text (`&str`/`String` payloads only;
        /// anything else is reported as opaque).
        message: String,
    },
}

/// Receiver for [`DiagEvent`]s. Must never panic or abort the tick.
pub trait DiagnosticsHook: Send + Sync {
    fn on_event(&self, event: DiagEvent);
}

/// Discards all events (production default).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDiag;

impl DiagnosticsHook for NoopDiag {
    #[inline(always)]
    fn on_event(&self, _event: DiagEvent) {}
}

/// Captures events in order for later inspection.
#[derive(Debug, Default)]
pub struct CollectingDiag {
    events: Mutex<Vec<DiagEvent>>,
}

impl CollectingDiag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events observed so far.
    pub fn events(&self) -> Vec<DiagEvent> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Drain and return captured events.
    pub fn take(&self) -> Vec<DiagEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(|p| p.into_inner()))
    }
}

impl DiagnosticsHook for CollectingDiag {
    fn on_event(&self, event: DiagEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_diag_preserves_order() {
        let d = CollectingDiag::new();
        d.on_event(DiagEvent::IdSpaceExhausted);
        d.on_event(DiagEvent::IdSpaceExhausted);
        assert_eq!(d.events().len(), 2);
        assert_eq!(d.take().len(), 2);
        assert!(d.events().is_empty());
    }
}
