//! Callback dispatch with panic isolation.
//!
//! Callbacks run synchronously on the driver context, optionally routed
//! through a host-supplied [`Dispatcher`] (for example to marshal execution
//! onto a specific context). A panicking callback is caught at this boundary,
//! reported as [`DiagEvent::CallbackFailed`], and never stops the remaining
//! tasks in the tick from firing.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::diag::{DiagEvent, DiagnosticsHook};
use crate::id_alloc::TaskId;

/// Stored callback signature.
pub type TaskFn = Arc<dyn Fn(TaskId) + Send + Sync + 'static>;

/// Indirection seam for callback execution.
///
/// The default [`InlineDispatch`] invokes the callback directly. Hosts that
/// need callbacks marshalled through another subsystem implement this trait;
/// the scheduler still treats the dispatch as synchronous and isolates panics
/// around the whole call.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, id: TaskId, action: &TaskFn);
}

/// Invokes callbacks directly on the driver context (production default).
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatch;

impl Dispatcher for InlineDispatch {
    #[inline]
    fn dispatch(&self, id: TaskId, action: &TaskFn) {
        action(id);
    }
}

/// Run one callback through the dispatcher, converting a panic into a
/// [`DiagEvent::CallbackFailed`] report.
pub(crate) fn fire_isolated(
    dispatcher: &dyn Dispatcher,
    diag: &dyn DiagnosticsHook,
    id: TaskId,
    action: &TaskFn,
) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| dispatcher.dispatch(id, action)));
    if let Err(payload) = result {
        diag.on_event(DiagEvent::CallbackFailed {
            id,
            message: panic_message(payload.as_ref()),
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::CollectingDiag;
    use crate::id_alloc::IdAllocator;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn some_id() -> TaskId {
        IdAllocator::new(8).allocate().unwrap()
    }

    #[test]
    fn inline_dispatch_invokes_with_id() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let id = some_id();
        let action: TaskFn = Arc::new(move |got| {
            assert_eq!(got, id);
            h.fetch_add(1, Ordering::SeqCst);
        });

        let diag = CollectingDiag::new();
        fire_isolated(&InlineDispatch, &diag, id, &action);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(diag.events().is_empty());
    }

    #[test]
    fn panicking_callback_is_reported_not_propagated() {
        let id = some_id();
        let action: TaskFn = Arc::new(|_| panic!("boom"));
        let diag = CollectingDiag::new();

        fire_isolated(&InlineDispatch, &diag, id, &action);

        let events = diag.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            DiagEvent::CallbackFailed { id: got, message } => {
                assert_eq!(*got, id);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn custom_dispatcher_sees_every_call() {
        struct Counting(AtomicUsize);
        impl Dispatcher for Counting {
            fn dispatch(&self, id: TaskId, action: &TaskFn) {
                self.0.fetch_add(1, Ordering::SeqCst);
                action(id);
            }
        }

        let d = Counting(AtomicUsize::new(0));
        let diag = CollectingDiag::new();
        let action: TaskFn = Arc::new(|_| {});
        let id = some_id();
        fire_isolated(&d, &diag, id, &action);
        fire_isolated(&d, &diag, id, &action);
        assert_eq!(d.0.load(Ordering::SeqCst), 2);
    }
}
