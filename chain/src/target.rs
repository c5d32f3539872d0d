//! Pending/resolved resource tracking and version id allocation.

use std::fmt;
use std::hash::Hash;

use fnv::{FnvHashMap, FnvHashSet};
use log::trace;
use smallvec::SmallVec;

use crate::{Id, ReachMap};

/// Tracks which resource names still need a provider and which already have
/// one, allocating one id per version of every name.
///
/// The version list of a name reads from the consumer side: the first entry
/// is the version end users bind, the last entry is the version the next
/// provider upstream (origin or override) has to fill. An override inserts
/// itself between the two, so chains of overrides resolve back-to-front
/// while consumers keep pointing at the final version.
///
/// `N` is the resource name type; it only needs cheap clones and hashing.
#[derive(Clone, Debug)]
pub struct TargetTracker<N> {
    pending: Vec<N>,
    done: FnvHashSet<N>,
    versions: FnvHashMap<N, SmallVec<[Id; 2]>>,
    names: FnvHashMap<Id, N>,
    undo_log: Vec<StepDelta<N>>,
}

#[derive(Clone, Debug)]
struct StepDelta<N> {
    del_done: SmallVec<[N; 2]>,
    del_pending: SmallVec<[N; 2]>,
    add_pending: SmallVec<[N; 2]>,
    ids: SmallVec<[Id; 4]>,
}

impl<N> Default for StepDelta<N> {
    fn default() -> Self {
        StepDelta {
            del_done: SmallVec::new(),
            del_pending: SmallVec::new(),
            add_pending: SmallVec::new(),
            ids: SmallVec::new(),
        }
    }
}

impl<N> TargetTracker<N>
where
    N: Clone + Eq + Hash + fmt::Debug,
{
    /// Create a tracker with the given unresolved target names.
    ///
    /// Ids for the targets are allocated up front: the override handling in
    /// [`push_step`](TargetTracker::push_step) assumes that every pending
    /// name already owns the version its consumers bind.
    pub fn new(reach: &mut ReachMap, targets: impl IntoIterator<Item = N>) -> Self {
        let mut tracker = TargetTracker {
            pending: Vec::new(),
            done: FnvHashSet::default(),
            versions: FnvHashMap::default(),
            names: FnvHashMap::default(),
            undo_log: Vec::new(),
        };
        for target in targets {
            if !tracker.pending.contains(&target) {
                tracker.pending.push(target);
            }
        }
        let initial: Vec<N> = tracker.pending.clone();
        let mut discard = SmallVec::new();
        tracker.allocate(reach, &initial, &mut discard);
        tracker
    }

    /// Mapping from version id to resource name.
    pub fn export(&self) -> FnvHashMap<Id, N> {
        self.names.clone()
    }

    /// Every name seen so far, in allocation order.
    pub fn resources(&self) -> Vec<N> {
        let mut by_id: Vec<(Id, &N)> = self.names.iter().map(|(&id, name)| (id, name)).collect();
        by_id.sort_by_key(|&(id, _)| id);
        let mut seen: FnvHashSet<&N> = FnvHashSet::default();
        by_id
            .into_iter()
            .filter(|&(_, name)| seen.insert(name))
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Some pending name, or `None` when everything is resolved. The
    /// selection is the most recently inserted name, which keeps the search
    /// depth-first and deterministic.
    pub fn next_target(&self) -> Option<&N> {
        self.pending.last()
    }

    /// Whether every requested or required name has a provider.
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    fn pending_contains(&self, name: &N) -> bool {
        self.pending.iter().any(|p| p == name)
    }

    fn pending_remove(&mut self, name: &N) {
        let pos = self
            .pending
            .iter()
            .position(|p| p == name)
            .expect("name missing from the pending set");
        self.pending.remove(pos);
    }

    /// Apply one provider step to the tracked state.
    ///
    /// `require`, `provide` and `overrides` are the disjoint parts of the
    /// step's contract (an overridden name is listed only in `overrides`).
    /// All precedence constraints are staged on `reach` and committed
    /// together; on any failure the tracker and the map are restored and
    /// `false` is returned.
    pub fn push_step(
        &mut self,
        reach: &mut ReachMap,
        require: &[N],
        provide: &[N],
        overrides: &[N],
        step_id: Id,
    ) -> bool {
        reach.assert_staging_clear();
        // A second independent provider for an already-resolved name is
        // ambiguous. A name that is both done and pending is the one
        // exception: an override chain still waiting for its origin.
        if provide
            .iter()
            .any(|name| self.done.contains(name) && !self.pending_contains(name))
        {
            trace!("step {:?} offers a second provider, refusing", step_id);
            return false;
        }
        // Consumers bind the first version in the list. Overriding a name
        // that is done and no longer pending would leave them attached to a
        // version the override chain no longer produces.
        if overrides
            .iter()
            .any(|name| self.done.contains(name) && !self.pending_contains(name))
        {
            trace!("step {:?} overrides a settled name, refusing", step_id);
            return false;
        }
        let mut delta = StepDelta::default();
        let mut clash = false;

        let unseen_provides: SmallVec<[N; 4]> = provide
            .iter()
            .filter(|name| !self.versions.contains_key(*name))
            .cloned()
            .collect();
        self.allocate(reach, &unseen_provides, &mut delta.ids);
        for name in provide {
            // Walking backwards from the targets means this step provides
            // the earliest version of the name: later entries in the list
            // belong to overriders stacked on top of it.
            let downstream = *self.versions[name].last().unwrap();
            if !reach.stage(step_id, downstream) {
                clash = true;
                break;
            }
            if self.done.insert(name.clone()) {
                delta.del_done.push(name.clone());
            }
            if self.pending_contains(name) {
                self.pending_remove(name);
                delta.add_pending.push(name.clone());
            }
        }

        if !clash && !require.is_empty() {
            let unseen_requires: SmallVec<[N; 4]> = require
                .iter()
                .filter(|name| !self.versions.contains_key(*name))
                .cloned()
                .collect();
            self.allocate(reach, &unseen_requires, &mut delta.ids);
            for name in require {
                // Requirements bind the latest version, the first list
                // entry, so every producer of that version must precede
                // this step.
                let upstream = *self.versions[name].first().unwrap();
                if !reach.stage(upstream, step_id) {
                    clash = true;
                    break;
                }
            }
            if !clash {
                for name in unseen_requires {
                    self.pending.push(name.clone());
                    delta.del_pending.push(name);
                }
            }
        }

        if !clash && !overrides.is_empty() {
            // One new version per overridden name: the input this step
            // consumes, to be filled by the next provider upstream.
            self.allocate(reach, overrides, &mut delta.ids);
            // A name nobody asked for yet also needs the output version
            // that consumers will bind.
            let fresh: SmallVec<[N; 2]> = overrides
                .iter()
                .filter(|name| !self.pending_contains(name))
                .cloned()
                .collect();
            self.allocate(reach, &fresh, &mut delta.ids);
            for name in overrides {
                let versions = &self.versions[name];
                let output_id = versions[versions.len() - 2];
                let input_id = versions[versions.len() - 1];
                if !reach.stage(input_id, step_id) {
                    clash = true;
                    break;
                }
                if !reach.stage(step_id, output_id) {
                    clash = true;
                    break;
                }
                // The name ends up in both sets: an output version exists
                // now, and an input version is awaited.
                if self.done.insert(name.clone()) {
                    delta.del_done.push(name.clone());
                }
                if !self.pending_contains(name) {
                    self.pending.push(name.clone());
                    delta.del_pending.push(name.clone());
                }
            }
        }

        if clash {
            self.revert_sets(&delta);
            reach.reset();
            self.deallocate(reach, &delta.ids);
            false
        } else {
            reach.commit();
            self.undo_log.push(delta);
            true
        }
    }

    /// Undo the last successful [`push_step`](TargetTracker::push_step).
    pub fn rollback(&mut self, reach: &mut ReachMap) {
        let delta = self.undo_log.pop().expect("rollback without a pushed step");
        self.revert_sets(&delta);
        reach.rollback();
        self.deallocate(reach, &delta.ids);
    }

    fn revert_sets(&mut self, delta: &StepDelta<N>) {
        for name in &delta.del_pending {
            self.pending_remove(name);
        }
        for name in &delta.del_done {
            self.done.remove(name);
        }
        for name in &delta.add_pending {
            self.pending.push(name.clone());
        }
    }

    fn allocate(&mut self, reach: &mut ReachMap, names: &[N], out: &mut SmallVec<[Id; 4]>) {
        for (name, raw) in names.iter().zip(reach.allocate(names.len())) {
            let id = Id::new(raw);
            self.names.insert(id, name.clone());
            self.versions.entry(name.clone()).or_default().push(id);
            out.push(id);
        }
    }

    fn deallocate(&mut self, reach: &mut ReachMap, ids: &[Id]) {
        for &id in ids.iter().rev() {
            reach.drop_last(id);
            let name = self.names.remove(&id).expect("deallocating an unknown id");
            let versions = self.versions.get_mut(&name).unwrap();
            let removed = versions.pop();
            assert_eq!(removed, Some(id), "id release order violated");
            if versions.is_empty() {
                self.versions.remove(&name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(reach: &mut ReachMap, targets: &[&'static str]) -> TargetTracker<&'static str> {
        TargetTracker::new(reach, targets.iter().copied())
    }

    fn push(
        track: &mut TargetTracker<&'static str>,
        reach: &mut ReachMap,
        require: &[&'static str],
        provide: &[&'static str],
        overrides: &[&'static str],
    ) -> (bool, Id) {
        let step_id = Id::new(reach.allocate(1).start);
        let ok = track.push_step(reach, require, provide, overrides, step_id);
        if !ok {
            reach.drop_last(step_id);
        }
        (ok, step_id)
    }

    #[test]
    fn provider_resolves_pending_target() {
        let mut reach = ReachMap::new();
        let mut track = tracker(&mut reach, &["x"]);
        assert_eq!(track.next_target(), Some(&"x"));
        let (ok, _) = push(&mut track, &mut reach, &[], &["x"], &[]);
        assert!(ok);
        assert!(track.is_complete());
    }

    #[test]
    fn requirements_become_new_targets() {
        let mut reach = ReachMap::new();
        let mut track = tracker(&mut reach, &["y"]);
        let (ok, _) = push(&mut track, &mut reach, &["x"], &["y"], &[]);
        assert!(ok);
        assert!(!track.is_complete());
        assert_eq!(track.next_target(), Some(&"x"));
    }

    #[test]
    fn second_provider_is_rejected() {
        let mut reach = ReachMap::new();
        let mut track = tracker(&mut reach, &["x"]);
        let (ok, _) = push(&mut track, &mut reach, &[], &["x"], &[]);
        assert!(ok);
        let (ok, _) = push(&mut track, &mut reach, &[], &["x"], &[]);
        assert!(!ok);
    }

    #[test]
    fn override_of_settled_name_is_rejected() {
        let mut reach = ReachMap::new();
        let mut track = tracker(&mut reach, &["x"]);
        let (ok, _) = push(&mut track, &mut reach, &[], &["x"], &[]);
        assert!(ok);
        let (ok, _) = push(&mut track, &mut reach, &[], &[], &["x"]);
        assert!(!ok);
    }

    #[test]
    fn override_keeps_name_pending_for_its_origin() {
        let mut reach = ReachMap::new();
        let mut track = tracker(&mut reach, &["x"]);
        let (ok, override_step) = push(&mut track, &mut reach, &[], &[], &["x"]);
        assert!(ok);
        // The output version exists, the input version is still awaited.
        assert!(!track.is_complete());
        assert_eq!(track.next_target(), Some(&"x"));
        // Providing the origin settles the chain and orders it before the
        // override step.
        let (ok, origin_step) = push(&mut track, &mut reach, &[], &["x"], &[]);
        assert!(ok);
        assert!(track.is_complete());
        assert!(reach.reaches(origin_step, override_step));
    }

    #[test]
    fn consumer_binds_final_version_of_override_chain() {
        let mut reach = ReachMap::new();
        let mut track = tracker(&mut reach, &["out"]);
        let (ok, user_step) = push(&mut track, &mut reach, &["x"], &["out"], &[]);
        assert!(ok);
        let (ok, override_step) = push(&mut track, &mut reach, &[], &[], &["x"]);
        assert!(ok);
        let (ok, origin_step) = push(&mut track, &mut reach, &[], &["x"], &[]);
        assert!(ok);
        assert!(track.is_complete());
        assert!(reach.reaches(origin_step, override_step));
        assert!(reach.reaches(override_step, user_step));
    }

    #[test]
    fn rollback_restores_tracked_state() {
        let mut reach = ReachMap::new();
        let mut track = tracker(&mut reach, &["y"]);
        let pending_before = track.pending.clone();
        let done_before = track.done.clone();
        let versions_before = track.versions.clone();
        let names_before = track.names.clone();
        let len_before = reach.len();
        let (ok, step_id) = push(&mut track, &mut reach, &["x"], &["y"], &[]);
        assert!(ok);
        track.rollback(&mut reach);
        reach.drop_last(step_id);
        assert_eq!(track.pending, pending_before);
        assert_eq!(track.done, done_before);
        assert_eq!(track.versions, versions_before);
        assert_eq!(track.names, names_before);
        assert_eq!(reach.len(), len_before);
    }

    #[test]
    fn failed_push_leaves_no_trace() {
        let mut reach = ReachMap::new();
        let mut track = tracker(&mut reach, &["x"]);
        let version_x = *track.versions["x"].first().unwrap();
        let step_id = Id::new(reach.allocate(1).start);
        // A committed edge placing the step before the version it wants to
        // consume: requiring "x" must now close a cycle and fail.
        assert!(reach.stage(step_id, version_x));
        reach.commit();
        let pending_before = track.pending.clone();
        let versions_before = track.versions.clone();
        let names_before = track.names.clone();
        let len_before = reach.len();
        let ok = track.push_step(&mut reach, &["x"], &["y"], &[], step_id);
        assert!(!ok);
        reach.assert_staging_clear();
        assert_eq!(track.pending, pending_before);
        assert!(track.done.is_empty());
        assert_eq!(track.versions, versions_before);
        assert_eq!(track.names, names_before);
        assert_eq!(reach.len(), len_before);
    }
}
