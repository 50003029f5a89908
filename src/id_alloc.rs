//! Task identifier allocation with wrap-around recycling.
//!
//! # Model
//!
//! Identifiers are handed out from a monotonic counter over the id space
//! `1..=space`, wrapping back to 1 on overflow. An id stays *attributed* from
//! the moment it is allocated until the store releases it at the end of the
//! tick that removed its record. Allocation skips attributed values, so an id
//! is never handed out twice while a record (pending, live, or mid-removal)
//! still holds it.
//!
//! # Id lifecycle
//!
//! ```text
//!   allocate()          drain          fire-out / cancel      release()
//!      |                  |                   |                  |
//!      v                  v                   v                  v
//!  +---------+       +--------+         +----------+       (reusable after
//!  | Pending | ----> |  Live  | ------> | Retired  | ----->  counter wraps)
//!  +---------+       +--------+         +----------+
//!       \______________________________________^
//!               (cancelled before first drain)
//! ```
//!
//! # Invariants
//!
//! - `next` is always in `1..=space`; 0 is never a valid id.
//! - `attributed.len() <= space as usize`.
//! - An allocation scans at most `space` candidates before reporting
//!   exhaustion, so `allocate` terminates even with a full id space.

use std::fmt;
use std::num::NonZeroU32;

use ahash::AHashSet;

/// Opaque handle for a scheduled task.
///
/// Ids are never 0 and are not reused while the task they name is pending,
/// live, or still being removed within the current tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(NonZeroU32);

impl TaskId {
    /// Raw integer value, for logging and host-side bookkeeping.
    #[inline]
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// The id space is fully attributed; no new task can be created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdExhausted;

impl fmt::Display for IdExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("task id space exhausted")
    }
}

impl std::error::Error for IdExhausted {}

/// Wrap-around id allocator with an attribution set.
///
/// The retry bound for collision scans equals the configured id-space size:
/// a full scan proves true exhaustion rather than guessing at it. Hosts that
/// want a cheap-to-hit bound (tests, constrained embeddings) configure a small
/// `space`.
#[derive(Debug)]
pub struct IdAllocator {
    next: u32,
    space: u32,
    attributed: AHashSet<TaskId>,
}

impl IdAllocator {
    /// Create an allocator over the id space `1..=space`.
    ///
    /// # Panics
    ///
    /// Panics if `space == 0`.
    pub fn new(space: u32) -> Self {
        assert!(space > 0, "id space must be non-empty");
        Self {
            next: 1,
            space,
            attributed: AHashSet::new(),
        }
    }

    /// Mint a fresh id, skipping values still attributed to earlier tasks.
    ///
    /// Scans at most `space` candidates; a full scan without a free value
    /// reports [`IdExhausted`] and leaves the allocator unchanged apart from
    /// the counter position.
    pub fn allocate(&mut self) -> Result<TaskId, IdExhausted> {
        for _ in 0..self.space {
            let raw = self.next;
            self.next = if raw >= self.space { 1 } else { raw + 1 };

            let Some(nz) = NonZeroU32::new(raw) else {
                continue;
            };
            let id = TaskId(nz);
            if self.attributed.insert(id) {
                return Ok(id);
            }
        }
        Err(IdExhausted)
    }

    /// Return `id` to the pool. Idempotent.
    #[inline]
    pub fn release(&mut self, id: TaskId) {
        self.attributed.remove(&id);
    }

    /// Number of currently attributed ids.
    #[inline]
    pub fn attributed_len(&self) -> usize {
        self.attributed.len()
    }

    #[cfg(test)]
    pub(crate) fn is_attributed(&self, id: TaskId) -> bool {
        self.attributed.contains(&id)
    }
}
