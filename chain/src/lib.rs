//! Ordering primitives for dataflow plan construction.
//!
//! Everything in this crate works on plain numeric ids: the planner above
//! allocates one id per applied step and one id per resource version, and
//! this crate keeps the precedence relation between them consistent while
//! the search stages, commits and rolls back its moves.

/// Unique planning-time id.
///
/// Identifies either an applied plan step or one version of a resource.
/// Ids are allocated contiguously by [`ReachMap::allocate`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u32);

impl Id {
    /// Wrap a raw index.
    pub fn new(index: u32) -> Self {
        Id(index)
    }

    /// Raw index of the id.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

pub mod reach;
pub mod target;
pub mod usage;
pub mod walk;

pub use crate::reach::ReachMap;
pub use crate::target::TargetTracker;
pub use crate::usage::UsageGuard;
pub use crate::walk::{DepTable, Waves};
