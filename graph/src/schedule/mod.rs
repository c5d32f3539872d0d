//! Scheduling a found configuration into an executable plan.

mod plan;

pub use self::plan::{Plan, PlanTemplate};

use std::cell::RefCell;
use std::rc::Rc;

use fnv::FnvHashMap;
use log::trace;
use smallvec::SmallVec;

use crate::builder::PlanSnapshot;
use crate::chain::{DepTable, Id};
use crate::error::SetupError;
use crate::node::{ModeId, Node, NodeId, Worker};
use crate::resource::{ResourceName, TypeDesc};
use crate::schedule::plan::Op;

/// Register file allocator: a monotone top plus a LIFO free list, so index
/// reuse is deterministic.
#[derive(Debug, Default)]
struct RegisterAllocator {
    top: u32,
    free: Vec<u32>,
}

impl RegisterAllocator {
    fn alloc(&mut self) -> u32 {
        self.free.pop().unwrap_or_else(|| {
            let index = self.top;
            self.top += 1;
            index
        })
    }

    fn release(&mut self, index: u32) {
        self.free.push(index);
    }

    fn peak(&self) -> usize {
        self.top as usize
    }
}

/// A provider whose inputs are mapped but whose output registers become
/// known one wave later.
#[derive(Debug)]
struct PendingInvoke {
    node: NodeId,
    mode: ModeId,
    inputs: SmallVec<[u32; 4]>,
    outputs: SmallVec<[Id; 2]>,
}

/// Turn one configuration into a plan template.
///
/// The constraint set is walked in topological waves; providers are invoked
/// in wave order, registers are allocated when a resource version comes
/// alive and released right after its last consumer ran. `setup` is called
/// in emission order so every node sees the negotiated types of its inputs;
/// a type mismatch abandons the whole configuration.
pub(crate) fn emit(
    nodes: &mut [Box<dyn Node>],
    snapshot: &PlanSnapshot,
    targets: &[ResourceName],
) -> Result<PlanTemplate, SetupError> {
    let size = snapshot
        .providers
        .keys()
        .chain(snapshot.resources.keys())
        .map(|id| id.index() + 1)
        .max()
        .unwrap_or(0);
    let table = DepTable::new(size, snapshot.constraints.iter().copied());

    let mut registers = RegisterAllocator::default();
    let mut register_of: FnvHashMap<Id, Option<u32>> = FnvHashMap::default();
    let mut types: Vec<Option<TypeDesc>> = Vec::new();
    let mut workers: Vec<Rc<RefCell<Worker>>> = Vec::new();
    let mut ops: Vec<Op> = Vec::new();
    let mut delayed_invokes: Vec<PendingInvoke> = Vec::new();
    let mut delayed_drops: Vec<Id> = Vec::new();

    let mut waves: Vec<(Vec<Id>, Vec<Id>)> = table
        .waves()
        .map(|(ready, unused)| (ready.into_vec(), unused.into_vec()))
        .collect();
    // One empty trailing wave flushes the delayed invocations and drops.
    waves.push((Vec::new(), Vec::new()));

    for (ready, unused) in waves {
        let mut wave_resources: Vec<Id> = Vec::new();
        let mut wave_providers: Vec<Id> = Vec::new();
        for id in ready {
            if snapshot.providers.contains_key(&id) {
                wave_providers.push(id);
            } else {
                wave_resources.push(id);
            }
        }

        // Map the inputs of this wave's providers now; their outputs come
        // alive in the next wave, one dependency hop away.
        let mut pending: Vec<PendingInvoke> = Vec::new();
        for &step in &wave_providers {
            let (node_id, mode) = snapshot.providers[&step];
            let contract = nodes[node_id.index()].get_contract(mode).clone();
            let feeding: FnvHashMap<&ResourceName, Id> = table
                .predecessors(step)
                .filter_map(|id| snapshot.resources.get(&id).map(|name| (name, id)))
                .collect();
            let inputs: SmallVec<[u32; 4]> = contract
                .requires
                .iter()
                // Inputs are alive until their last consumer ran, so the
                // register is always present here.
                .map(|name| register_of[&feeding[name]].unwrap())
                .collect();
            let fed: FnvHashMap<&ResourceName, Id> = table
                .successors(step)
                .filter_map(|id| snapshot.resources.get(&id).map(|name| (name, id)))
                .collect();
            let outputs: SmallVec<[Id; 2]> = contract
                .provides
                .iter()
                .map(|name| fed[name])
                .collect();
            pending.push(PendingInvoke {
                node: node_id,
                mode,
                inputs,
                outputs,
            });
        }

        // Versions leaving the live set; requested targets stay allocated
        // to the end.
        let mut leaving: Vec<Id> = unused
            .into_iter()
            .filter(|id| {
                snapshot
                    .resources
                    .get(id)
                    .map_or(false, |name| !targets.contains(name))
            })
            .collect();

        // A version born and abandoned in the same wave has no consumers;
        // its provider gets a masked-out output instead of a register.
        let mut placeholders: Vec<Id> = Vec::new();
        for &id in &wave_resources {
            if let Some(position) = leaving.iter().position(|&gone| gone == id) {
                leaving.remove(position);
                register_of.insert(id, None);
                placeholders.push(id);
            } else {
                let index = registers.alloc();
                if types.len() <= index as usize {
                    types.resize(index as usize + 1, None);
                }
                register_of.insert(id, Some(index));
            }
        }

        // The previous wave's providers now know their output registers:
        // negotiate types and emit the invocations.
        for invoke in delayed_invokes.drain(..) {
            let output_regs: SmallVec<[Option<u32>; 2]> = invoke
                .outputs
                .iter()
                .map(|id| register_of[id])
                .collect();
            let mask: SmallVec<[bool; 2]> = output_regs.iter().map(Option::is_some).collect();
            let input_types: Vec<TypeDesc> = invoke
                .inputs
                .iter()
                .map(|&index| {
                    types[index as usize]
                        .clone()
                        .expect("input register written without a type")
                })
                .collect();
            let setup = nodes[invoke.node.index()].setup(invoke.mode, &input_types, &mask)?;
            for (slot, ty) in output_regs.iter().zip(setup.output_types) {
                if let Some(index) = slot {
                    types[*index as usize] = Some(ty);
                }
            }
            trace!(
                "invoke node {:?} mode {:?}: registers {:?} -> {:?}",
                invoke.node,
                invoke.mode,
                invoke.inputs,
                output_regs,
            );
            let worker_index = workers.len();
            workers.push(Rc::new(RefCell::new(setup.worker)));
            ops.push(Op::Invoke {
                worker: worker_index,
                inputs: invoke.inputs,
                outputs: output_regs,
            });
        }

        // Placeholder versions have no users by definition; forget them.
        for id in placeholders {
            register_of.remove(&id);
        }
        // Inputs of the invocations emitted above are dead now.
        for id in delayed_drops.drain(..) {
            let index = register_of
                .remove(&id)
                .expect("released version was never allocated")
                .expect("released version had no register");
            registers.release(index);
            ops.push(Op::Release(index));
        }

        delayed_invokes = pending;
        delayed_drops = leaving;
    }

    // Everything still allocated is a requested target (or a surviving
    // version of one). Of several versions of one name the id-minimal entry
    // wins: that is the version consumers bind.
    let mut final_registers: FnvHashMap<&ResourceName, (Id, u32)> = FnvHashMap::default();
    for (&id, &slot) in &register_of {
        let name = &snapshot.resources[&id];
        let index = slot.expect("surviving version without a register");
        let entry = final_registers.entry(name).or_insert((id, index));
        if id < entry.0 {
            *entry = (id, index);
        }
    }
    let target_registers: SmallVec<[u32; 4]> = targets
        .iter()
        .map(|name| final_registers[name].1)
        .collect();
    let result_types: Vec<TypeDesc> = target_registers
        .iter()
        .map(|&index| {
            types[index as usize]
                .clone()
                .expect("target register written without a type")
        })
        .collect();

    Ok(PlanTemplate::new(
        ops,
        workers,
        registers.peak(),
        target_registers,
        result_types,
    ))
}

#[cfg(test)]
mod tests {
    use super::RegisterAllocator;

    #[test]
    fn registers_are_reused_lifo() {
        let mut registers = RegisterAllocator::default();
        assert_eq!(registers.alloc(), 0);
        assert_eq!(registers.alloc(), 1);
        assert_eq!(registers.alloc(), 2);
        registers.release(1);
        registers.release(0);
        assert_eq!(registers.alloc(), 0);
        assert_eq!(registers.alloc(), 1);
        assert_eq!(registers.alloc(), 3);
        assert_eq!(registers.peak(), 4);
    }
}
