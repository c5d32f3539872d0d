//! Applied-step bookkeeping and the priority partial order.

use std::fmt;
use std::hash::Hash;

use fnv::{FnvHashMap, FnvHashSet};
use log::trace;

use crate::{Id, ReachMap};

/// Guards the plan prefix against reusing an applied step and keeps applied
/// steps consistent with their priorities.
///
/// `K` is an opaque step key, typically a `(node, mode)` pair. Pushing a
/// step allocates a fresh id and stages precedence edges against every
/// previously pushed step of strictly lower or strictly greater priority;
/// equal priorities stay mutually unordered. A push that would contradict
/// already-staged constraints is undone completely and reported as a
/// failure.
#[derive(Clone, Debug)]
pub struct UsageGuard<K> {
    applied: FnvHashSet<K>,
    steps: Vec<StepRecord<K>>,
    prio_ids: Vec<Id>,
    prio_vals: Vec<i64>,
}

#[derive(Clone, Debug)]
struct StepRecord<K> {
    key: K,
    sort_idx: usize,
    id: Id,
}

impl<K> UsageGuard<K>
where
    K: Copy + Eq + Hash + fmt::Debug,
{
    /// Create an empty guard.
    pub fn new() -> Self {
        UsageGuard {
            applied: FnvHashSet::default(),
            steps: Vec::new(),
            prio_ids: Vec::new(),
            prio_vals: Vec::new(),
        }
    }

    /// Whether the step key has not been applied in the current prefix.
    pub fn is_eligible(&self, key: K) -> bool {
        !self.applied.contains(&key)
    }

    /// Apply a step, allocating its id and ordering it against the other
    /// applied steps. Returns `None` when the priority order cannot be
    /// satisfied; the guard and the map are left unchanged in that case.
    pub fn push(&mut self, reach: &mut ReachMap, key: K, priority: i64) -> Option<Id> {
        reach.assert_staging_clear();
        let step_id = Id::new(reach.allocate(1).start);
        let sort_idx = self.prio_vals.partition_point(|&v| v < priority);
        let mut clash = false;
        // Steps below `sort_idx` have strictly lower priorities and must
        // run before this one.
        for &other in &self.prio_ids[..sort_idx] {
            if !reach.stage(other, step_id) {
                clash = true;
                break;
            }
        }
        if !clash {
            // Skip the equal-priority run; those stay unordered.
            let gt_idx =
                sort_idx + self.prio_vals[sort_idx..].partition_point(|&v| v <= priority);
            for &other in &self.prio_ids[gt_idx..] {
                if !reach.stage(step_id, other) {
                    clash = true;
                    break;
                }
            }
        }
        if clash {
            trace!("step {:?} clashes with the applied priority order", key);
            reach.reset();
            reach.drop_last(step_id);
            return None;
        }
        self.applied.insert(key);
        reach.commit();
        self.prio_vals.insert(sort_idx, priority);
        self.prio_ids.insert(sort_idx, step_id);
        self.steps.push(StepRecord {
            key,
            sort_idx,
            id: step_id,
        });
        Some(step_id)
    }

    /// Undo the last successful [`push`](UsageGuard::push).
    pub fn rollback(&mut self, reach: &mut ReachMap) {
        let last = self.steps.pop().expect("rollback without an applied step");
        self.applied.remove(&last.key);
        self.prio_vals.remove(last.sort_idx);
        self.prio_ids.remove(last.sort_idx);
        reach.rollback();
        reach.drop_last(last.id);
    }

    /// Mapping from step id to step key for the current prefix.
    pub fn export(&self) -> FnvHashMap<Id, K> {
        self.steps.iter().map(|step| (step.id, step.key)).collect()
    }
}

impl<K> Default for UsageGuard<K>
where
    K: Copy + Eq + Hash + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}
