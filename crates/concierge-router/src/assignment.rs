//! Staff assignment policy.
//!
//! [`select`] is a pure function over a candidate pool. [`AssignmentPolicy`] wraps it
//! with the process-wide pieces: the configured strategy, the per-staff capacity
//! limit and the round-robin cursor, which lives behind [`CursorStore`] so it can be
//! shared between instances.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use concierge_core::{StaffId, StaffStatus};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How a staff member is picked for a new consultation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Uniform choice.
    Random,
    /// Rotate through candidates in id order.
    RoundRobin,
    /// Fewest active consultations, ties to the lowest id.
    #[default]
    LeastBusy,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Random => "random",
            Self::RoundRobin => "round_robin",
            Self::LeastBusy => "least_busy",
        })
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "random" => Ok(Self::Random),
            "round_robin" => Ok(Self::RoundRobin),
            "least_busy" => Ok(Self::LeastBusy),
            other => Err(format!("unknown assignment strategy: {other}")),
        }
    }
}

/// A staff member considered for assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// The staff member.
    pub staff_id: StaffId,
    /// Current availability.
    pub status: StaffStatus,
    /// Consultations currently active with this staff member.
    pub active: u32,
}

/// Advance a round-robin cursor over a pool of `len` candidates.
///
/// Returns the index to use now and the cursor to store for the next call. A cursor
/// left past the end by a shrinking pool is clamped to the last candidate.
#[must_use]
pub const fn round_robin_step(cursor: usize, len: usize) -> (usize, usize) {
    if len == 0 {
        return (0, 0);
    }
    let index = if cursor >= len { len - 1 } else { cursor };
    (index, (index + 1) % len)
}

/// Select a staff member from `pool`.
///
/// Only `online` candidates are eligible; `busy` and `offline` ones are ignored. The
/// `cursor` is only consulted by [`Strategy::RoundRobin`] and is clamped to the
/// eligible pool. Returns `None` when nobody is eligible.
#[must_use]
pub fn select<R: Rng + ?Sized>(
    strategy: Strategy,
    pool: &[Candidate],
    cursor: usize,
    rng: &mut R,
) -> Option<StaffId> {
    let mut eligible: Vec<&Candidate> = pool.iter().filter(|c| c.status.is_assignable()).collect();
    if eligible.is_empty() {
        return None;
    }
    eligible.sort_by_key(|c| c.staff_id);

    match strategy {
        Strategy::Random => eligible.choose(rng).map(|c| c.staff_id),
        Strategy::RoundRobin => {
            let (index, _) = round_robin_step(cursor, eligible.len());
            Some(eligible[index].staff_id)
        }
        Strategy::LeastBusy => eligible
            .iter()
            .min_by_key(|c| (c.active, c.staff_id))
            .map(|c| c.staff_id),
    }
}

/// Storage for the round-robin cursor.
#[async_trait]
pub trait CursorStore: Send + Sync + 'static {
    /// Atomically take the index to use for a pool of `len` and advance the cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store is unavailable.
    async fn advance(&self, len: usize) -> Result<usize>;
}

/// Single-process cursor.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursor: Mutex<usize>,
}

impl MemoryCursorStore {
    /// Create a cursor at position zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn advance(&self, len: usize) -> Result<usize> {
        let mut cursor = self.cursor.lock();
        let (index, next) = round_robin_step(*cursor, len);
        *cursor = next;
        Ok(index)
    }
}

/// Strategy, capacity limit and cursor for automatic assignment.
pub struct AssignmentPolicy<C: CursorStore = MemoryCursorStore> {
    strategy: Strategy,
    max_concurrent: u32,
    cursor: Arc<C>,
}

impl AssignmentPolicy<MemoryCursorStore> {
    /// A policy with an in-memory cursor.
    #[must_use]
    pub fn in_memory(strategy: Strategy, max_concurrent: u32) -> Self {
        Self::new(strategy, max_concurrent, Arc::new(MemoryCursorStore::new()))
    }
}

impl<C: CursorStore> AssignmentPolicy<C> {
    /// Create a policy.
    #[must_use]
    pub fn new(strategy: Strategy, max_concurrent: u32, cursor: Arc<C>) -> Self {
        Self {
            strategy,
            max_concurrent,
            cursor,
        }
    }

    /// The configured strategy.
    #[must_use]
    pub const fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Pick a staff member from `pool`, skipping anyone at capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the cursor store is unavailable.
    pub async fn choose(&self, pool: &[Candidate]) -> Result<Option<StaffId>> {
        let eligible: Vec<Candidate> = pool
            .iter()
            .filter(|c| c.status.is_assignable() && c.active < self.max_concurrent)
            .copied()
            .collect();
        if eligible.is_empty() {
            return Ok(None);
        }

        let cursor = match self.strategy {
            Strategy::RoundRobin => self.cursor.advance(eligible.len()).await?,
            Strategy::Random | Strategy::LeastBusy => 0,
        };

        let choice = select(self.strategy, &eligible, cursor, &mut rand::thread_rng());
        tracing::debug!(
            strategy = %self.strategy,
            candidates = eligible.len(),
            chosen = ?choice,
            "Assignment decision"
        );
        Ok(choice)
    }
}
