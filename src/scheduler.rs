//! Tick driver and public scheduler surface.
//!
//! A [`Scheduler`] owns two [`TaskStore`]s, time-domain (epoch milliseconds)
//! and frame-domain (tick counts), and advances both together in [`tick`].
//! Producers on any thread call `schedule*`/`cancel`/`reschedule*`; exactly
//! one driver context runs `tick`, either the host's per-frame update or the
//! optional internal interval thread.
//!
//! # Tick sequence
//!
//! ```text
//!   tick()
//!     │  try-acquire single-flight gate ──► busy? skip (returns false)
//!     │  frame counter += 1
//!     ├─ time store:  drain ─► evaluate(now_millis) ─► reconcile ─► reclaim
//!     └─ frame store: drain ─► evaluate(frame)      ─► reconcile ─► reclaim
//! ```
//!
//! Both domains always advance together; there is no way to advance only
//! one. A host that runs the interval driver *and* calls `tick` per rendered
//! frame double-advances frame counts relative to wall time; see
//! [`Scheduler::tick`].
//!
//! [`tick`]: Scheduler::tick

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::clock::{SystemClock, TimeSource};
use crate::diag::{DiagEvent, DiagnosticsHook, NoopDiag};
use crate::dispatch::{Dispatcher, InlineDispatch, TaskFn};
use crate::id_alloc::{IdAllocator, TaskId};
use crate::store::{lock, Repeat, TaskStore};

/// Producer-visible scheduling failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// Every id in the id space is attributed; no task was created.
    IdSpaceExhausted,
    /// Reschedule target is not pending or live in the addressed domain.
    UnknownTaskId,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IdSpaceExhausted => f.write_str("task id space exhausted"),
            Error::UnknownTaskId => f.write_str("unknown task id"),
        }
    }
}

impl std::error::Error for Error {}

/// Which store a task lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Domain {
    /// Due at an absolute wall-clock-derived instant.
    Time,
    /// Due after a count of `tick` invocations.
    Frames,
}

/// Period unit for time-domain scheduling, normalized to milliseconds at the
/// call site.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Convert `amount` of this unit to milliseconds, saturating on overflow.
    #[inline]
    pub fn to_millis(self, amount: u64) -> u64 {
        let factor = match self {
            TimeUnit::Milliseconds => 1,
            TimeUnit::Seconds => 1_000,
            TimeUnit::Minutes => 60_000,
            TimeUnit::Hours => 3_600_000,
            TimeUnit::Days => 86_400_000,
        };
        amount.saturating_mul(factor)
    }
}

/// Construction-time wiring for a [`Scheduler`].
///
/// Everything pluggable is injected here rather than through post-hoc
/// setters, so a running scheduler's collaborators never change under it.
#[derive(Clone)]
pub struct SchedulerConfig {
    /// Monotone elapsed-time provider for the time domain.
    pub time_source: Arc<dyn TimeSource>,

    /// Callback execution indirection. Default invokes inline on the driver.
    pub dispatcher: Arc<dyn Dispatcher>,

    /// Receiver for internal error events. Default discards them.
    pub diagnostics: Arc<dyn DiagnosticsHook>,

    /// Size of the task id space (`1..=id_space`).
    ///
    /// The full range is practically inexhaustible; small values make
    /// exhaustion reachable for tests and constrained hosts.
    pub id_space: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            time_source: Arc::new(SystemClock),
            dispatcher: Arc::new(InlineDispatch),
            diagnostics: Arc::new(NoopDiag),
            id_space: u32::MAX,
        }
    }
}

impl SchedulerConfig {
    /// Validate configuration. Panics on invalid values.
    pub fn validate(&self) {
        assert!(self.id_space > 0, "id_space must be > 0");
    }
}

struct DriverThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct Inner {
    clock: Arc<dyn TimeSource>,
    dispatcher: Arc<dyn Dispatcher>,
    diag: Arc<dyn DiagnosticsHook>,

    ids: Mutex<IdAllocator>,
    time: TaskStore,
    frames: TaskStore,

    /// Tick counter; also the frame-domain "now".
    frame_now: AtomicU64,

    /// Single-flight gate: `tick` try-locks (skip on contention), `reset`
    /// blocks until any in-flight tick finishes.
    tick_gate: Mutex<()>,

    driver: Mutex<Option<DriverThread>>,
}

impl Inner {
    fn tick(&self) -> bool {
        let _gate = match self.tick_gate.try_lock() {
            Ok(g) => g,
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };

        let frame = self.frame_now.fetch_add(1, Ordering::Relaxed) + 1;
        let now = self.clock.now_millis();

        self.time
            .tick(&self.ids, now, &*self.dispatcher, &*self.diag);
        self.frames
            .tick(&self.ids, frame, &*self.dispatcher, &*self.diag);
        true
    }
}

/// Cloneable handle to one scheduler instance.
///
/// All clones share the same stores, allocator, and driver thread. The
/// handle is explicitly constructed and passed around; there is no ambient
/// singleton.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Scheduler with the default wiring: system clock, inline dispatch,
    /// no-op diagnostics, full 32-bit id space.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Scheduler with explicit wiring.
    ///
    /// # Panics
    ///
    /// Panics if `config.validate()` rejects the configuration.
    pub fn with_config(config: SchedulerConfig) -> Self {
        config.validate();
        Self {
            inner: Arc::new(Inner {
                clock: config.time_source,
                dispatcher: config.dispatcher,
                diag: config.diagnostics,
                ids: Mutex::new(IdAllocator::new(config.id_space)),
                time: TaskStore::new(),
                frames: TaskStore::new(),
                frame_now: AtomicU64::new(0),
                tick_gate: Mutex::new(()),
                driver: Mutex::new(None),
            }),
        }
    }

    /// Schedule a time-domain task due every `period` of `unit`.
    ///
    /// The first due instant is `now + period`, computed here at schedule
    /// time; re-arms advance by the nominal period so the cadence does not
    /// drift when ticks lag.
    pub fn schedule(
        &self,
        action: impl Fn(TaskId) + Send + Sync + 'static,
        period: u64,
        unit: TimeUnit,
        repeat: Repeat,
    ) -> Result<TaskId, Error> {
        let now = self.inner.clock.now_millis();
        let period = unit.to_millis(period);
        self.schedule_in(&self.inner.time, now, period, repeat, Arc::new(action))
    }

    /// Schedule a frame-domain task due every `frames` ticks.
    pub fn schedule_frames(
        &self,
        action: impl Fn(TaskId) + Send + Sync + 'static,
        frames: u64,
        repeat: Repeat,
    ) -> Result<TaskId, Error> {
        let now = self.inner.frame_now.load(Ordering::Relaxed);
        self.schedule_in(&self.inner.frames, now, frames, repeat, Arc::new(action))
    }

    fn schedule_in(
        &self,
        store: &TaskStore,
        now: u64,
        period: u64,
        repeat: Repeat,
        action: TaskFn,
    ) -> Result<TaskId, Error> {
        store.schedule(&self.inner.ids, now, period, repeat, action).map_err(|_| {
            self.inner.diag.on_event(DiagEvent::IdSpaceExhausted);
            Error::IdSpaceExhausted
        })
    }

    /// Stage cancellation of `id` in whichever domain holds it.
    ///
    /// Idempotent; cancelling an unknown or already-retired id is a no-op.
    /// The cancel is bound to the task holding `id` at this moment, so it
    /// cannot affect a later task that recycles the id. Best-effort relative
    /// to an in-progress tick: the task's next firing is prevented, a firing
    /// already in flight is not.
    pub fn cancel(&self, id: TaskId) {
        self.inner.time.cancel(id);
        self.inner.frames.cancel(id);
    }

    /// Replace a time-domain task in place, keeping its id.
    ///
    /// Live records are overwritten with same-tick visibility; records still
    /// in the add buffer are overwritten there. Unknown ids fail with
    /// [`Error::UnknownTaskId`]; callers are expected to `schedule` instead.
    pub fn reschedule(
        &self,
        id: TaskId,
        action: impl Fn(TaskId) + Send + Sync + 'static,
        period: u64,
        unit: TimeUnit,
        repeat: Repeat,
    ) -> Result<(), Error> {
        let now = self.inner.clock.now_millis();
        let period = unit.to_millis(period);
        if self
            .inner
            .time
            .reschedule(id, now, period, repeat, Arc::new(action))
        {
            Ok(())
        } else {
            Err(Error::UnknownTaskId)
        }
    }

    /// Replace a frame-domain task in place, keeping its id.
    pub fn reschedule_frames(
        &self,
        id: TaskId,
        action: impl Fn(TaskId) + Send + Sync + 'static,
        frames: u64,
        repeat: Repeat,
    ) -> Result<(), Error> {
        let now = self.inner.frame_now.load(Ordering::Relaxed);
        if self
            .inner
            .frames
            .reschedule(id, now, frames, repeat, Arc::new(action))
        {
            Ok(())
        } else {
            Err(Error::UnknownTaskId)
        }
    }

    /// Advance both domains by one logical step.
    ///
    /// Returns `false` without doing anything when another tick is in
    /// flight (the single-flight gate); ticks are skipped, never queued.
    /// Callbacks run inline here and must not call `tick` themselves.
    ///
    /// The frame-domain "now" is the number of `tick` calls so far, not a
    /// render-loop frame count: a host that both runs the interval driver
    /// and ticks per rendered frame advances frames twice as fast relative
    /// to wall time.
    pub fn tick(&self) -> bool {
        self.inner.tick()
    }

    /// Clear all tasks, buffers, and ids in both domains and zero the frame
    /// counter. Waits for an in-flight tick to finish first.
    ///
    /// Must not be called from within a callback.
    pub fn reset(&self) {
        let _gate = lock(&self.inner.tick_gate);
        self.inner.time.reset(&self.inner.ids);
        self.inner.frames.reset(&self.inner.ids);
        self.inner.frame_now.store(0, Ordering::Relaxed);
    }

    /// Spawn the internal interval driver calling [`Scheduler::tick`] every
    /// `period`. No-op if a driver is already running.
    ///
    /// The driver shares the single-flight gate with host-driven ticks, so
    /// the two never run concurrently.
    pub fn start_interval_driver(&self, period: Duration) -> io::Result<()> {
        let mut slot = lock(&self.inner.driver);
        if slot.is_some() {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("tasktick-driver".into())
            .spawn(move || {
                while !stop_flag.load(Ordering::Acquire) {
                    inner.tick();
                    thread::park_timeout(period);
                }
            })?;

        *slot = Some(DriverThread { stop, handle });
        Ok(())
    }

    /// Stop and join the interval driver, if running.
    ///
    /// Must not be called from within a callback (the driver thread would
    /// join itself).
    pub fn stop_interval_driver(&self) {
        let driver = lock(&self.inner.driver).take();
        if let Some(d) = driver {
            d.stop.store(true, Ordering::Release);
            d.handle.thread().unpark();
            let _ = d.handle.join();
        }
    }

    /// Number of live records in `domain` (excludes pending adds).
    pub fn live_len(&self, domain: Domain) -> usize {
        match domain {
            Domain::Time => self.inner.time.live_len(),
            Domain::Frames => self.inner.frames.live_len(),
        }
    }

    /// Ticks processed since construction or the last [`Scheduler::reset`].
    pub fn frame_count(&self) -> u64 {
        self.inner.frame_now.load(Ordering::Relaxed)
    }

    /// Whether `id` is pending or live in either domain.
    pub fn contains(&self, id: TaskId) -> bool {
        self.inner.time.contains(id) || self.inner.frames.contains(id)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Last handle gone: the driver thread (if any) still holds an Arc,
        // so this only runs after it exited or was stopped. Taking the slot
        // here keeps a stopped-but-unjoined handle from leaking.
        if let Some(d) = lock(&self.driver).take() {
            d.stop.store(true, Ordering::Release);
            d.handle.thread().unpark();
        }
    }
}
