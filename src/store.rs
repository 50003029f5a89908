//! Live task storage with staged mutation and swap-compaction.
//!
//! One `TaskStore` serves either domain: the time-domain store measures `now`
//! in epoch milliseconds, the frame-domain store in tick counts. Both reduce
//! to the same `u64` due/period arithmetic, so the type is instantiated twice
//! rather than made generic.
//!
//! # Structure
//!
//! ```text
//!   producers (any thread)                 driver context (tick)
//!   ----------------------                 ---------------------
//!   schedule ──► pending_add ─┐            drain_pending
//!   cancel   ──► pending_del ─┤──────────► evaluate
//!   reschedule ─► live slot   │            reconcile_deletes
//!              (in place)     │            release retired ids
//!                             ▼
//!            +-------------- live ---------------+
//!            | records: [R0, R1, R2, R3]  dense  |
//!            | slots:   {id -> index}            |
//!            +-----------------------------------+
//! ```
//!
//! # Invariants
//!
//! - For every live id: `records[slots[id]].id == id`, restored within the
//!   same lock scope by every swap-compaction.
//! - Pending buffers are append-only between drains and drained exactly once
//!   per tick, adds before deletes, so a task scheduled and cancelled inside
//!   one tick window is still removed.
//! - A staged delete is bound to its target's allocation epoch. A stale entry
//!   can never remove a later task that reuses the same id.
//! - No lock is held across a callback invocation.
//! - Retired ids are released to the allocator only after `reconcile_deletes`
//!   finishes, never mid-tick.
//!
//! # Edge cases
//!
//! - A record re-armed to a `due` still `<= now` fires again on the *next*
//!   tick, not in the same pass (the live vector is walked once per tick).
//! - `Repeat::Times(0)` is normalized to fire-once semantics.

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use ahash::AHashMap;

use crate::diag::DiagnosticsHook;
use crate::dispatch::{fire_isolated, Dispatcher, TaskFn};
use crate::id_alloc::{IdAllocator, IdExhausted, TaskId};

/// Lock with poison recovery: a panicking callback must not wedge the
/// scheduler, which keeps running under partial failure.
#[inline]
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// How many times a task fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Repeat {
    /// Fire once, then retire.
    Once,
    /// Fire on every due period until cancelled.
    Forever,
    /// Fire `n` times, decrementing after each fire. `Times(1)` behaves like
    /// [`Repeat::Once`].
    Times(u32),
}

impl Repeat {
    /// Finite repeat count. Returns `None` for `n == 0`.
    pub fn times(n: u32) -> Option<Self> {
        (n > 0).then_some(Repeat::Times(n))
    }
}

/// One live or pending task.
pub(crate) struct TaskRecord {
    pub id: TaskId,
    /// Which incarnation of `id` this record is; distinguishes a reused id
    /// from the task a stale delete entry was aimed at.
    pub epoch: u64,
    pub period: u64,
    pub due: u64,
    pub remaining: Repeat,
    pub action: TaskFn,
}

/// Driver-owned dense storage plus the id → slot index.
#[derive(Default)]
struct Live {
    records: Vec<TaskRecord>,
    slots: AHashMap<TaskId, usize>,
}

impl Live {
    /// O(1) removal: move the last record into `slot`, truncate, and repair
    /// the index map for both ids inside the same lock scope. A partial
    /// update here is the bug class later `cancel`/`reschedule` lookups
    /// would trip over.
    fn compact_remove(&mut self, slot: usize) -> TaskRecord {
        let removed = self.records.swap_remove(slot);
        let prev = self.slots.remove(&removed.id);
        debug_assert_eq!(prev, Some(slot), "index map out of sync with records");

        if let Some(moved) = self.records.get(slot) {
            self.slots.insert(moved.id, slot);
        }
        removed
    }
}

/// Task storage for one domain (time or frame).
///
/// Producers touch only the pending buffers (and, for live reschedules, the
/// live mutex for the duration of one slot overwrite). The driver context is
/// the only caller of [`TaskStore::tick`].
pub(crate) struct TaskStore {
    pending_add: Mutex<Vec<TaskRecord>>,
    pending_del: Mutex<Vec<(TaskId, u64)>>,
    live: Mutex<Live>,
    epochs: AtomicU64,
}

impl TaskStore {
    pub fn new() -> Self {
        Self {
            pending_add: Mutex::new(Vec::new()),
            pending_del: Mutex::new(Vec::new()),
            live: Mutex::new(Live::default()),
            epochs: AtomicU64::new(0),
        }
    }

    /// Allocate an id and stage a new record in the add buffer.
    ///
    /// The record becomes live at the next tick's drain and is first eligible
    /// to fire on the evaluation pass after that. `due` is computed here,
    /// at schedule time: `now + period`.
    pub fn schedule(
        &self,
        ids: &Mutex<IdAllocator>,
        now: u64,
        period: u64,
        remaining: Repeat,
        action: TaskFn,
    ) -> Result<TaskId, IdExhausted> {
        let id = lock(ids).allocate()?;
        lock(&self.pending_add).push(TaskRecord {
            id,
            epoch: self.epochs.fetch_add(1, Ordering::Relaxed),
            period,
            due: now.saturating_add(period),
            remaining,
            action,
        });
        Ok(id)
    }

    /// Stage a deferred delete for the task currently holding `id`.
    ///
    /// The staged entry is bound to that task's allocation epoch, so a
    /// cancel can never outlive its target: once the record retires and the
    /// id is recycled, the entry matches nothing. An id unknown to this
    /// store is a no-op.
    pub fn cancel(&self, id: TaskId) {
        let epoch = {
            let live = lock(&self.live);
            live.slots.get(&id).map(|&slot| live.records[slot].epoch)
        };
        let epoch = epoch.or_else(|| {
            lock(&self.pending_add)
                .iter()
                .find(|r| r.id == id)
                .map(|r| r.epoch)
        });
        if let Some(epoch) = epoch {
            lock(&self.pending_del).push((id, epoch));
        }
    }

    /// In-place replacement. Live records are overwritten directly (visible
    /// within the current tick); records still in the add buffer are
    /// overwritten there. Returns `false` if the id is unknown to this store.
    pub fn reschedule(
        &self,
        id: TaskId,
        now: u64,
        period: u64,
        remaining: Repeat,
        action: TaskFn,
    ) -> bool {
        let due = now.saturating_add(period);
        {
            let mut live = lock(&self.live);
            if let Some(&slot) = live.slots.get(&id) {
                // Same incarnation keeps its epoch: a cancel already staged
                // against this task still applies after the overwrite.
                let epoch = live.records[slot].epoch;
                live.records[slot] = TaskRecord {
                    id,
                    epoch,
                    period,
                    due,
                    remaining,
                    action,
                };
                return true;
            }
        }

        let mut pending = lock(&self.pending_add);
        if let Some(rec) = pending.iter_mut().find(|r| r.id == id) {
            *rec = TaskRecord {
                id,
                epoch: rec.epoch,
                period,
                due,
                remaining,
                action,
            };
            return true;
        }
        false
    }

    /// One tick for this store: drain adds, evaluate due records, reconcile
    /// deletes, then release retired ids. Must only be called from the
    /// driver context.
    pub fn tick(
        &self,
        ids: &Mutex<IdAllocator>,
        now: u64,
        dispatcher: &dyn Dispatcher,
        diag: &dyn DiagnosticsHook,
    ) {
        let mut retired = Vec::new();
        self.drain_pending();
        self.evaluate(now, dispatcher, diag, &mut retired);
        self.reconcile_deletes(&mut retired);

        // Reclaim step: ids removed anywhere in this tick become reusable
        // only now, so a deletion in flight cannot race a fresh allocation
        // of the same id.
        if !retired.is_empty() {
            let mut ids = lock(ids);
            for id in retired {
                ids.release(id);
            }
        }
    }

    /// Move staged adds into the live store. Records appended by producers
    /// after this point stay buffered until the next tick, so the evaluation
    /// pass never sees the live vector grow under it.
    fn drain_pending(&self) {
        let adds = mem::take(&mut *lock(&self.pending_add));
        if adds.is_empty() {
            return;
        }
        let mut live = lock(&self.live);
        for rec in adds {
            let slot = live.records.len();
            live.slots.insert(rec.id, slot);
            live.records.push(rec);
        }
    }

    /// Walk the live vector once, firing every record with `due <= now`.
    ///
    /// The live lock is released around each callback; post-fire bookkeeping
    /// (re-arm or compaction) re-locks and re-resolves the slot through the
    /// index map. Removal does not advance the cursor because the record
    /// swapped in from the tail has not been evaluated yet.
    ///
    /// A record already staged for deletion is skipped rather than fired:
    /// a cancel must prevent the task's next firing even when it lands
    /// between drain and evaluation. Reconcile removes the record afterward.
    fn evaluate(
        &self,
        now: u64,
        dispatcher: &dyn Dispatcher,
        diag: &dyn DiagnosticsHook,
        retired: &mut Vec<TaskId>,
    ) {
        let mut i = 0usize;
        loop {
            let due_task = {
                let live = lock(&self.live);
                match live.records.get(i) {
                    None => break,
                    Some(rec) if rec.due > now => None,
                    Some(rec) => Some((rec.id, rec.epoch, TaskFn::clone(&rec.action))),
                }
            };

            let Some((id, epoch, action)) = due_task else {
                i += 1;
                continue;
            };

            if lock(&self.pending_del)
                .iter()
                .any(|&(did, de)| did == id && de == epoch)
            {
                i += 1;
                continue;
            }

            fire_isolated(dispatcher, diag, id, &action);

            let mut live = lock(&self.live);
            let Some(&slot) = live.slots.get(&id) else {
                i += 1;
                continue;
            };
            debug_assert_eq!(slot, i, "fired record moved during its own callback");

            let rec = &mut live.records[slot];
            let remove = match rec.remaining {
                Repeat::Once | Repeat::Times(0) | Repeat::Times(1) => true,
                Repeat::Times(n) => {
                    rec.remaining = Repeat::Times(n - 1);
                    // Advance by the nominal period, not `now + period`:
                    // cadence must not drift when ticks lag.
                    rec.due = rec.due.saturating_add(rec.period);
                    false
                }
                Repeat::Forever => {
                    rec.due = rec.due.saturating_add(rec.period);
                    false
                }
            };

            if remove {
                live.compact_remove(slot);
                retired.push(id);
            } else {
                i += 1;
            }
        }
    }

    /// Drain the delete buffer: live ids are compaction-removed, ids still
    /// sitting in the add buffer are removed there. Entries whose epoch no
    /// longer matches (target already retired) are ignored.
    fn reconcile_deletes(&self, retired: &mut Vec<TaskId>) {
        let dels = mem::take(&mut *lock(&self.pending_del));
        if dels.is_empty() {
            return;
        }

        let mut not_live = Vec::new();
        {
            let mut live = lock(&self.live);
            for (id, epoch) in dels {
                match live.slots.get(&id).copied() {
                    Some(slot) if live.records[slot].epoch == epoch => {
                        live.compact_remove(slot);
                        retired.push(id);
                    }
                    _ => not_live.push((id, epoch)),
                }
            }
        }

        if not_live.is_empty() {
            return;
        }
        let mut pending = lock(&self.pending_add);
        for (id, epoch) in not_live {
            if let Some(pos) = pending
                .iter()
                .position(|r| r.id == id && r.epoch == epoch)
            {
                pending.swap_remove(pos);
                retired.push(id);
            }
        }
    }

    /// Clear live records and both buffers, releasing every id this store
    /// holds back to the allocator.
    pub fn reset(&self, ids: &Mutex<IdAllocator>) {
        let adds = mem::take(&mut *lock(&self.pending_add));
        lock(&self.pending_del).clear();

        let mut live = lock(&self.live);
        let mut alloc = lock(ids);
        for rec in live.records.drain(..) {
            alloc.release(rec.id);
        }
        live.slots.clear();
        drop(live);

        for rec in adds {
            alloc.release(rec.id);
        }
    }

    /// Number of live (drained, not yet retired) records.
    pub fn live_len(&self) -> usize {
        lock(&self.live).records.len()
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        lock(&self.pending_add).len()
    }

    /// Whether `id` is currently known to this store (pending or live).
    pub fn contains(&self, id: TaskId) -> bool {
        if lock(&self.live).slots.contains_key(&id) {
            return true;
        }
        lock(&self.pending_add).iter().any(|r| r.id == id)
    }
}

#[cfg(test)]
impl TaskStore {
    /// Structural checker: records and index map must be a bijection.
    pub(crate) fn debug_validate(&self) {
        let live = lock(&self.live);
        assert_eq!(live.records.len(), live.slots.len());
        for (i, rec) in live.records.iter().enumerate() {
            assert_eq!(
                live.slots.get(&rec.id),
                Some(&i),
                "slot map does not point back at record {i}"
            );
        }
    }
}


// Property-based tests live in the sibling module; they need the
// `sched-proptest` feature because shrinking long op sequences is slow.
#[cfg(all(test, feature = "sched-proptest"))]
#[path = "store_tests.rs"]
mod store_tests;
