//! Depth-first search for viable provider configurations.

use fnv::FnvHashMap;
use log::trace;
use smallvec::SmallVec;

use crate::chain::{Id, ReachMap, TargetTracker, UsageGuard};
use crate::node::{Contract, ModeId, Node, NodeCaps, NodeId};
use crate::resource::ResourceName;

/// One viable configuration found by the search.
#[derive(Clone, Debug)]
pub(crate) struct PlanSnapshot {
    /// Applied steps by id.
    pub providers: FnvHashMap<Id, (NodeId, ModeId)>,
    /// Resource versions by id.
    pub resources: FnvHashMap<Id, ResourceName>,
    /// Committed precedence edges, in commit order.
    pub constraints: Vec<(Id, Id)>,
}

/// Index of every static provider option per resource name, plus the nodes
/// able to mint modes dynamically. Rebuilt per construct call since nodes
/// may have been registered in between.
struct ProviderLookup {
    static_index: FnvHashMap<ResourceName, SmallVec<[(NodeId, ModeId); 2]>>,
    dynamic_nodes: Vec<NodeId>,
}

impl ProviderLookup {
    fn build(nodes: &[Box<dyn Node>]) -> Self {
        let mut static_index: FnvHashMap<ResourceName, SmallVec<[(NodeId, ModeId); 2]>> =
            FnvHashMap::default();
        let mut dynamic_nodes = Vec::new();
        for (index, node) in nodes.iter().enumerate() {
            let node_id = NodeId(index as u32);
            let caps = node.capabilities();
            if caps.contains(NodeCaps::DYNAMIC) {
                dynamic_nodes.push(node_id);
            }
            if caps.contains(NodeCaps::STATIC) {
                for (mode, contract) in node.static_contracts().iter().enumerate() {
                    let option = (node_id, ModeId(mode as u32));
                    for name in &contract.provides {
                        static_index.entry(name.clone()).or_default().push(option);
                    }
                }
            }
        }
        ProviderLookup {
            static_index,
            dynamic_nodes,
        }
    }

    fn options(
        &self,
        nodes: &mut [Box<dyn Node>],
        target: &ResourceName,
        present: &[ResourceName],
    ) -> Vec<(NodeId, ModeId)> {
        let mut options: Vec<(NodeId, ModeId)> = self
            .static_index
            .get(target)
            .map(|found| found.to_vec())
            .unwrap_or_default();
        for &node_id in &self.dynamic_nodes {
            let minted = nodes[node_id.index()].dynamic_contracts(target, present);
            options.extend(minted.into_iter().map(|mode| (node_id, mode)));
        }
        options
    }
}

/// Options left to try at one level of the search.
#[derive(Debug)]
struct Frame {
    options: Vec<(NodeId, ModeId)>,
    cursor: usize,
}

/// The disjoint parts of a contract: plain requirements, plain provisions
/// and overridden names (present on both sides).
fn split_contract(
    contract: &Contract,
) -> (
    SmallVec<[ResourceName; 4]>,
    SmallVec<[ResourceName; 4]>,
    SmallVec<[ResourceName; 4]>,
) {
    let mut overrides: SmallVec<[ResourceName; 4]> = SmallVec::new();
    for name in &contract.requires {
        if contract.provides.contains(name) && !overrides.contains(name) {
            overrides.push(name.clone());
        }
    }
    let mut require: SmallVec<[ResourceName; 4]> = SmallVec::new();
    for name in &contract.requires {
        if !overrides.contains(name) && !require.contains(name) {
            require.push(name.clone());
        }
    }
    let mut provide: SmallVec<[ResourceName; 4]> = SmallVec::new();
    for name in &contract.provides {
        if !overrides.contains(name) && !provide.contains(name) {
            provide.push(name.clone());
        }
    }
    (require, provide, overrides)
}

/// Enumerate every viable configuration for the targets.
///
/// The search applies one provider option at a time, keeping the
/// reachability map, the usage guard and the target tracker consistent, and
/// rolls all three back to explore the remaining options. Complete
/// configurations are snapshotted and the search keeps going, so the caller
/// sees every plan and can detect ambiguity.
pub(crate) fn find_build_steps(
    nodes: &mut [Box<dyn Node>],
    priorities: &[i64],
    targets: &[ResourceName],
) -> Vec<PlanSnapshot> {
    let lookup = ProviderLookup::build(nodes);
    let mut reach = ReachMap::new();
    let mut track: TargetTracker<ResourceName> =
        TargetTracker::new(&mut reach, targets.iter().cloned());
    let mut usage: UsageGuard<(NodeId, ModeId)> = UsageGuard::new();
    let mut snapshots = Vec::new();

    if track.is_complete() {
        snapshots.push(snapshot(&usage, &track, &reach));
        return snapshots;
    }

    let mut frames: Vec<Frame> = Vec::new();
    let mut resume: Option<Frame> = None;
    loop {
        let mut frame = match resume.take() {
            Some(frame) => frame,
            None => {
                // Moving forward: pick a pending resource and look up who
                // could provide it. Already applied options are filtered
                // here once; the guard state is identical whenever this
                // frame is resumed.
                let target = track.next_target().cloned().unwrap();
                let present = track.resources();
                let mut options = lookup.options(nodes, &target, &present);
                options.retain(|&option| usage.is_eligible(option));
                trace!("resolving {:?}: {} option(s)", target, options.len());
                Frame { options, cursor: 0 }
            }
        };
        let mut advanced = false;
        while frame.cursor < frame.options.len() {
            let (node_id, mode) = frame.options[frame.cursor];
            frame.cursor += 1;
            let step_id = match usage.push(&mut reach, (node_id, mode), priorities[node_id.index()])
            {
                Some(id) => id,
                None => continue,
            };
            let (require, provide, overrides) =
                split_contract(nodes[node_id.index()].get_contract(mode));
            if !track.push_step(&mut reach, &require, &provide, &overrides, step_id) {
                usage.rollback(&mut reach);
                continue;
            }
            if track.is_complete() {
                trace!("configuration complete, snapshotting");
                snapshots.push(snapshot(&usage, &track, &reach));
                // Pretend the option failed and keep searching: every
                // viable configuration has to be enumerated.
                track.rollback(&mut reach);
                usage.rollback(&mut reach);
                continue;
            }
            frames.push(frame);
            advanced = true;
            break;
        }
        if advanced {
            continue;
        }
        // Dead end: no option at this level worked. Undo the step that got
        // us here and go on with the options of the level above.
        match frames.pop() {
            Some(previous) => {
                track.rollback(&mut reach);
                usage.rollback(&mut reach);
                resume = Some(previous);
            }
            None => break,
        }
    }
    snapshots
}

fn snapshot(
    usage: &UsageGuard<(NodeId, ModeId)>,
    track: &TargetTracker<ResourceName>,
    reach: &ReachMap,
) -> PlanSnapshot {
    PlanSnapshot {
        providers: usage.export(),
        resources: track.export(),
        constraints: reach.committed_edges().collect(),
    }
}
