//! Node contract surface: the building block of a data flow.

mod fixed;
mod inject;

pub use self::fixed::{Configure, FixedNode};
pub use self::inject::{Binding, Injector};

use std::fmt;

use smallvec::SmallVec;

use crate::error::{SetupError, WorkerError};
use crate::resource::{ResourceName, TypeDesc, Value};

bitflags::bitflags! {
    /// Contract listing interfaces implemented by a node.
    ///
    /// A node must advertise at least one of these; registration refuses an
    /// empty set.
    pub struct NodeCaps: u8 {
        /// `static_contracts` enumerates all modes up front.
        const STATIC = 0x1;
        /// `dynamic_contracts` mints modes when a target is queried.
        const DYNAMIC = 0x2;
    }
}

/// Handle of a registered node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Index of the node in registration order.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Discrete, node-specific variant of a contract.
///
/// Static modes are the indices into `static_contracts`; dynamic modes are
/// whatever ids the node minted for them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModeId(pub u32);

impl ModeId {
    /// The mode id as an index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Declared (requires, provides) pair for one mode.
///
/// A name listed on both sides denotes an override: the node consumes one
/// version of the resource and produces the next. A name may appear at most
/// once in `provides`.
#[derive(Clone, Debug, Default)]
pub struct Contract {
    /// Resources consumed, in worker input order.
    pub requires: Vec<ResourceName>,
    /// Resources produced, in worker output order.
    pub provides: Vec<ResourceName>,
}

impl Contract {
    /// Build a contract from anything name-like.
    pub fn new<R, P>(requires: R, provides: P) -> Self
    where
        R: IntoIterator,
        R::Item: Into<ResourceName>,
        P: IntoIterator,
        P::Item: Into<ResourceName>,
    {
        Contract {
            requires: requires.into_iter().map(Into::into).collect(),
            provides: provides.into_iter().map(Into::into).collect(),
        }
    }
}

/// Outputs of one worker call: one entry per contract output, in order.
/// `None` is permitted only for outputs whose mask bit was false at
/// [`Node::setup`] time.
pub type WorkerOutputs = SmallVec<[Option<Value>; 2]>;

/// Boxed worker callable. Inputs arrive in contract order.
pub type Worker = Box<dyn FnMut(&[Value]) -> Result<WorkerOutputs, WorkerError>>;

/// Product of a successful [`Node::setup`] call.
#[derive(derivative::Derivative)]
#[derivative(Debug)]
pub struct NodeSetup {
    /// The callable that computes this mode's outputs.
    #[derivative(Debug = "ignore")]
    pub worker: Worker,
    /// Type descriptors of the outputs, in contract order.
    pub output_types: Vec<TypeDesc>,
}

impl NodeSetup {
    /// Box a worker together with its output types.
    pub fn new<W>(worker: W, output_types: Vec<TypeDesc>) -> Self
    where
        W: FnMut(&[Value]) -> Result<WorkerOutputs, WorkerError> + 'static,
    {
        NodeSetup {
            worker: Box::new(worker),
            output_types,
        }
    }
}

/// A processing node registered with the flow builder.
///
/// The planner only ever talks to nodes through this trait: contracts
/// describe what a node consumes and provides per mode, and `setup` turns a
/// chosen mode into a worker once the input types are known.
pub trait Node: fmt::Debug {
    /// Which contract listing interfaces this node implements.
    fn capabilities(&self) -> NodeCaps;

    /// Contracts enumerated up front; the index in the returned slice is
    /// the mode id.
    fn static_contracts(&self) -> &[Contract] {
        &[]
    }

    /// Mint modes able to provide `target`, given the resource names known
    /// to the planner so far. Minted ids must stay resolvable through
    /// [`get_contract`](Node::get_contract) for the rest of the planning
    /// session.
    fn dynamic_contracts(
        &mut self,
        _target: &ResourceName,
        _present: &[ResourceName],
    ) -> SmallVec<[ModeId; 2]> {
        SmallVec::new()
    }

    /// The contract of a mode.
    fn get_contract(&self, mode: ModeId) -> &Contract;

    /// Configure one mode for execution.
    ///
    /// `input_types` are the negotiated descriptors of the required
    /// resources, in contract order. `output_mask` tells which outputs are
    /// actually consumed downstream; a node may return a placeholder for a
    /// masked-out slot.
    fn setup(
        &mut self,
        mode: ModeId,
        input_types: &[TypeDesc],
        output_mask: &[bool],
    ) -> Result<NodeSetup, SetupError>;
}
