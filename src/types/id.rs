//! Identifier types for runtime entities.
//!
//! These types provide type-safe identifiers for the entities a capability
//! context names: regions and tasks. Each is an index/generation pair; the
//! generation disambiguates reuse of an index.

use core::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

static EPHEMERAL_REGION_COUNTER: AtomicU32 = AtomicU32::new(1);
static EPHEMERAL_TASK_COUNTER: AtomicU32 = AtomicU32::new(1);

/// A unique identifier for a region in the owning runtime.
///
/// Regions form a tree structure and own all work spawned within them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId {
    index: u32,
    generation: u32,
}

impl RegionId {
    /// Creates a region ID from an index/generation pair.
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Creates a new ephemeral region ID for contexts created outside a
    /// runtime scheduler.
    #[must_use]
    pub fn new_ephemeral() -> Self {
        let index = EPHEMERAL_REGION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self::new(index, 1)
    }
}

impl fmt::Debug for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegionId({}:{})", self.index, self.generation)
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.index)
    }
}

/// A unique identifier for a task in the owning runtime.
///
/// Tasks are units of concurrent execution owned by regions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    index: u32,
    generation: u32,
}

impl TaskId {
    /// Creates a task ID from an index/generation pair.
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Creates a new ephemeral task ID for contexts created outside a
    /// runtime scheduler.
    #[must_use]
    pub fn new_ephemeral() -> Self {
        let index = EPHEMERAL_TASK_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self::new(index, 1)
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({}:{})", self.index, self.generation)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.index)
    }
}
