//! Deferred task scheduler with tick-driven execution for real-time hosts.
//!
//! ## Scope
//! This crate drives timed and frame-counted callbacks: producers on any
//! thread schedule, cancel, and reschedule tasks; a single driver context
//! advances both domains one logical step at a time via [`Scheduler::tick`].
//!
//! ## Key invariants
//! - For every live task id, the id → slot index map and the dense record
//!   vector agree: `records[slots[id]].id == id`, restored transactionally by
//!   every swap-compaction.
//! - Pending add/delete buffers are the only producer-shared mutable state;
//!   each is drained exactly once per tick, adds before deletes.
//! - Ids are never reused while a record (pending, live, or mid-removal
//!   within the current tick) still holds them.
//! - A panicking callback is isolated at the dispatch boundary and reported
//!   through the diagnostics hook; the tick keeps evaluating remaining tasks.
//!
//! ## Tick flow
//! `drain_pending -> evaluate -> reconcile_deletes -> reclaim ids`, run
//! identically for the time-domain store (wall-clock milliseconds) and the
//! frame-domain store (tick counts). Repeating tasks re-arm by their nominal
//! period (`due += period`), so cadence does not drift when ticks lag.
//!
//! ## Notable entry points
//! - [`Scheduler`] / [`SchedulerConfig`]: construction and the producer API.
//! - [`TimeSource`] / [`ManualClock`]: pluggable time for deterministic tests.
//! - [`Dispatcher`]: host indirection for callback execution.
//! - [`DiagnosticsHook`] / [`CollectingDiag`]: internal error reporting.
//!
//! ## Design trade-offs
//! Callbacks run synchronously on the driver context: a slow callback delays
//! every later evaluation in that tick and the next tick. No callback
//! timeouts are enforced; a hung callback stalls the scheduler. This keeps
//! dispatch allocation-free and ordering obvious at the cost of isolation.

mod id_alloc;
mod scheduler;
mod store;

pub mod clock;
pub mod diag;
pub mod dispatch;

pub use clock::{ManualClock, SystemClock, TimeSource};
pub use diag::{CollectingDiag, DiagEvent, DiagnosticsHook, NoopDiag};
pub use dispatch::{Dispatcher, InlineDispatch, TaskFn};
pub use id_alloc::{IdExhausted, TaskId};
pub use scheduler::{Domain, Error, Scheduler, SchedulerConfig, TimeUnit};
pub use store::Repeat;
