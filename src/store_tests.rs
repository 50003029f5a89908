//! Property-based tests for the task store.
//!
//! This module provides:
//! - A reference implementation ([`Model`]) for differential testing
//! - Property-based tests using proptest (feature-gated: `sched-proptest`)
//!
//! # Running Tests
//!
//! ```sh
//! cargo test --features sched-proptest
//! ```
//!
//! The model keeps tasks in a `BTreeMap` keyed by id and applies the same
//! staged add/delete semantics as the store, without compaction. Any
//! divergence in fired ids or surviving task sets indicates a compaction or
//! index-map bug.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use proptest::prelude::*;

use crate::diag::NoopDiag;
use crate::dispatch::InlineDispatch;
use crate::id_alloc::{IdAllocator, TaskId};
use crate::store::{lock, Repeat, TaskStore};

// ============================================================================
// Reference Model
// ============================================================================

#[derive(Clone, Debug)]
struct MTask {
    period: u64,
    due: u64,
    remaining: Repeat,
    tag: usize,
}

/// Mirrors `TaskStore` semantics with naive data structures.
#[derive(Default)]
struct Model {
    pending_add: Vec<(TaskId, MTask)>,
    pending_del: Vec<TaskId>,
    live: BTreeMap<TaskId, MTask>,
}

impl Model {
    fn schedule(&mut self, id: TaskId, now: u64, period: u64, remaining: Repeat, tag: usize) {
        self.pending_add.push((
            id,
            MTask {
                period,
                due: now.saturating_add(period),
                remaining,
                tag,
            },
        ));
    }

    // Mirrors the store: a cancel only takes effect when the id is still
    // pending or live at cancel time.
    fn cancel(&mut self, id: TaskId) {
        let known = self.live.contains_key(&id)
            || self.pending_add.iter().any(|(pid, _)| *pid == id);
        if known {
            self.pending_del.push(id);
        }
    }

    /// Returns the tags fired this tick, in ascending id order (the store
    /// fires in slot order; cross-check is done on sorted sets).
    fn tick(&mut self, now: u64) -> Vec<usize> {
        for (id, t) in self.pending_add.drain(..) {
            self.live.insert(id, t);
        }

        let mut fired = Vec::new();
        let mut remove = Vec::new();
        for (id, t) in self.live.iter_mut() {
            if t.due > now || self.pending_del.contains(id) {
                continue;
            }
            fired.push(t.tag);
            match t.remaining {
                Repeat::Once | Repeat::Times(0) | Repeat::Times(1) => remove.push(*id),
                Repeat::Times(n) => {
                    t.remaining = Repeat::Times(n - 1);
                    t.due = t.due.saturating_add(t.period);
                }
                Repeat::Forever => {
                    t.due = t.due.saturating_add(t.period);
                }
            }
        }
        for id in remove {
            self.live.remove(&id);
        }

        for id in std::mem::take(&mut self.pending_del) {
            self.live.remove(&id);
            self.pending_add.retain(|(pid, _)| *pid != id);
        }
        fired
    }

    fn live_len(&self) -> usize {
        self.live.len()
    }
}

// ============================================================================
// Property Tests
// ============================================================================

#[derive(Clone, Debug)]
enum Op {
    Schedule { period: u64, repeat_sel: u8 },
    CancelNth(usize),
    Tick { advance: u64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u64..30, any::<u8>()).prop_map(|(period, repeat_sel)| Op::Schedule {
            period,
            repeat_sel
        }),
        (0usize..64).prop_map(Op::CancelNth),
        (0u64..40).prop_map(|advance| Op::Tick { advance }),
    ]
}

fn repeat_from(sel: u8) -> Repeat {
    match sel % 4 {
        0 => Repeat::Once,
        1 => Repeat::Forever,
        _ => Repeat::Times(u32::from(sel % 5) + 1),
    }
}

fn run_ops(ops: Vec<Op>) {
    let store = TaskStore::new();
    let ids = Mutex::new(IdAllocator::new(u32::MAX));
    let mut model = Model::default();

    // Tags fired by real callbacks, collected across the whole run.
    let fired: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let next_tag = AtomicUsize::new(0);

    let mut now = 0u64;
    let mut known_ids: Vec<TaskId> = Vec::new();

    for op in ops {
        match op {
            Op::Schedule { period, repeat_sel } => {
                let tag = next_tag.fetch_add(1, Ordering::Relaxed);
                let log = Arc::clone(&fired);
                let repeat = repeat_from(repeat_sel);
                let id = store
                    .schedule(
                        &ids,
                        now,
                        period,
                        repeat,
                        Arc::new(move |_| lock(&log).push(tag)),
                    )
                    .expect("id space is effectively unbounded here");
                model.schedule(id, now, period, repeat, tag);
                known_ids.push(id);
            }
            Op::CancelNth(n) => {
                if let Some(&id) = known_ids.get(n % known_ids.len().max(1)) {
                    store.cancel(id);
                    model.cancel(id);
                }
            }
            Op::Tick { advance } => {
                now += advance;
                let before = lock(&fired).len();
                store.tick(&ids, now, &InlineDispatch, &NoopDiag);
                store.debug_validate();

                let mut got: Vec<usize> = lock(&fired).split_off(before);
                let mut want = model.tick(now);
                got.sort_unstable();
                want.sort_unstable();
                assert_eq!(got, want, "fired set diverged at now={now}");
                assert_eq!(store.live_len(), model.live_len());
            }
        }
    }

    // Drain everything that is still scheduled; the store and model must
    // agree on the survivors all the way down.
    for _ in 0..16 {
        now += 100;
        let before = lock(&fired).len();
        store.tick(&ids, now, &InlineDispatch, &NoopDiag);
        store.debug_validate();
        let mut got: Vec<usize> = lock(&fired).split_off(before);
        let mut want = model.tick(now);
        got.sort_unstable();
        want.sort_unstable();
        assert_eq!(got, want);
        assert_eq!(store.live_len(), model.live_len());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn store_matches_model(ops in proptest::collection::vec(op_strategy(), 0..200)) {
        run_ops(ops);
    }
}
