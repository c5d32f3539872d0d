//! Plan templates and the instruction interpreter.

use std::cell::RefCell;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::error::ExecError;
use crate::node::Worker;
use crate::resource::{TypeDesc, Value};

/// One instruction of an assembled plan.
#[derive(Clone, Debug)]
pub(crate) enum Op {
    /// Invoke a worker, reading the input registers in contract order and
    /// storing the outputs. A `None` output slot discards that value.
    Invoke {
        worker: usize,
        inputs: SmallVec<[u32; 4]>,
        outputs: SmallVec<[Option<u32>; 2]>,
    },
    /// Clear a register whose last consumer has run.
    Release(u32),
}

#[derive(derivative::Derivative)]
#[derivative(Debug)]
struct TemplateInner {
    ops: Vec<Op>,
    #[derivative(Debug = "ignore")]
    workers: Vec<Rc<RefCell<Worker>>>,
    rooms: usize,
    targets: SmallVec<[u32; 4]>,
}

/// Immutable description of a configured computation.
///
/// Any number of [`Plan`]s can be assembled from one template. The workers
/// inside are shared between those plans, so two plans from one template
/// must not run concurrently; assemble one template per execution context
/// instead.
#[derive(Clone, Debug)]
pub struct PlanTemplate {
    inner: Rc<TemplateInner>,
    result_types: Vec<TypeDesc>,
}

impl PlanTemplate {
    pub(crate) fn new(
        ops: Vec<Op>,
        workers: Vec<Rc<RefCell<Worker>>>,
        rooms: usize,
        targets: SmallVec<[u32; 4]>,
        result_types: Vec<TypeDesc>,
    ) -> Self {
        PlanTemplate {
            inner: Rc::new(TemplateInner {
                ops,
                workers,
                rooms,
                targets,
            }),
            result_types,
        }
    }

    /// Assemble a callable plan with a fresh register file.
    pub fn assemble(&self) -> Plan {
        Plan {
            inner: self.inner.clone(),
            registers: (0..self.inner.rooms).map(|_| None).collect(),
        }
    }

    /// Negotiated type descriptors of the requested targets, in request
    /// order.
    pub fn result_types(&self) -> &[TypeDesc] {
        &self.result_types
    }

    /// Number of worker invocations in the plan.
    pub fn step_count(&self) -> usize {
        self.inner
            .ops
            .iter()
            .filter(|op| matches!(op, Op::Invoke { .. }))
            .count()
    }

    /// Size of the register file a plan assembled from this template uses.
    pub fn register_count(&self) -> usize {
        self.inner.rooms
    }

    /// Final register index per requested target.
    pub fn target_registers(&self) -> &[u32] {
        &self.inner.targets
    }
}

/// A callable computation producing the requested target values.
///
/// The register file is exclusively owned by the plan instance; running the
/// plan fills it, gathers the targets and clears it again.
#[derive(derivative::Derivative)]
#[derivative(Debug)]
pub struct Plan {
    inner: Rc<TemplateInner>,
    #[derivative(Debug = "ignore")]
    registers: Vec<Option<Value>>,
}

impl Plan {
    /// Execute the plan, yielding one value per requested target, in
    /// request order.
    ///
    /// The first worker failure aborts the run; registers computed so far
    /// are released either way.
    pub fn run(&mut self) -> Result<Vec<Value>, ExecError> {
        let result = self.run_ops();
        if result.is_err() {
            self.clear();
        }
        result
    }

    fn run_ops(&mut self) -> Result<Vec<Value>, ExecError> {
        for op in &self.inner.ops {
            match op {
                Op::Invoke {
                    worker,
                    inputs,
                    outputs,
                } => {
                    let arguments: SmallVec<[Value; 4]> = inputs
                        .iter()
                        .map(|&index| {
                            self.registers[index as usize]
                                .clone()
                                .expect("register read before write")
                        })
                        .collect();
                    let mut worker = self.inner.workers[*worker].borrow_mut();
                    let produced = (&mut **worker)(&arguments).map_err(ExecError::Worker)?;
                    if produced.len() != outputs.len() {
                        return Err(ExecError::OutputArity {
                            expected: outputs.len(),
                            found: produced.len(),
                        });
                    }
                    for (index, (slot, value)) in outputs.iter().zip(produced).enumerate() {
                        match (slot, value) {
                            (Some(register), Some(value)) => {
                                self.registers[*register as usize] = Some(value);
                            }
                            (Some(_), None) => {
                                return Err(ExecError::MissingOutput { index });
                            }
                            (None, _) => {}
                        }
                    }
                }
                Op::Release(register) => {
                    self.registers[*register as usize] = None;
                }
            }
        }
        let gathered: Vec<Value> = self
            .inner
            .targets
            .iter()
            .map(|&index| {
                self.registers[index as usize]
                    .clone()
                    .expect("target register left unwritten")
            })
            .collect();
        self.clear();
        Ok(gathered)
    }

    fn clear(&mut self) {
        for register in &mut self.registers {
            *register = None;
        }
    }
}
