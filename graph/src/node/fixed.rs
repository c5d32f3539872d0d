//! Node with an immutable, enumerated contract list.

use crate::error::SetupError;
use crate::node::{Contract, ModeId, Node, NodeCaps, NodeSetup};
use crate::resource::TypeDesc;

/// Configuration half of a [`FixedNode`]: supplies workers for modes whose
/// contracts are fixed up front.
///
/// Implemented for closures, so simple nodes can be written inline:
///
/// ```ignore
/// let node = FixedNode::new(
///     vec![Contract::new(["x"], ["y"])],
///     |_mode: ModeId, _types: &[TypeDesc], _mask: &[bool]| {
///         Ok(NodeSetup::new(worker, vec![TypeDesc::of::<f32>()]))
///     },
/// );
/// ```
pub trait Configure {
    /// See [`Node::setup`].
    fn setup(
        &mut self,
        mode: ModeId,
        input_types: &[TypeDesc],
        output_mask: &[bool],
    ) -> Result<NodeSetup, SetupError>;
}

impl<F> Configure for F
where
    F: FnMut(ModeId, &[TypeDesc], &[bool]) -> Result<NodeSetup, SetupError>,
{
    fn setup(
        &mut self,
        mode: ModeId,
        input_types: &[TypeDesc],
        output_mask: &[bool],
    ) -> Result<NodeSetup, SetupError> {
        self(mode, input_types, output_mask)
    }
}

/// Node wrapping an immutable contract list around a [`Configure`]
/// implementation. Mode ids are indices into the list.
#[derive(derivative::Derivative)]
#[derivative(Debug)]
pub struct FixedNode<S> {
    contracts: Vec<Contract>,
    #[derivative(Debug = "ignore")]
    configure: S,
}

impl<S> FixedNode<S> {
    /// Wrap `configure` with the given contracts.
    pub fn new(contracts: Vec<Contract>, configure: S) -> Self {
        FixedNode {
            contracts,
            configure,
        }
    }
}

impl<S: Configure> Node for FixedNode<S> {
    fn capabilities(&self) -> NodeCaps {
        NodeCaps::STATIC
    }

    fn static_contracts(&self) -> &[Contract] {
        &self.contracts
    }

    fn get_contract(&self, mode: ModeId) -> &Contract {
        &self.contracts[mode.index()]
    }

    fn setup(
        &mut self,
        mode: ModeId,
        input_types: &[TypeDesc],
        output_mask: &[bool],
    ) -> Result<NodeSetup, SetupError> {
        if mode.index() >= self.contracts.len() {
            return Err(SetupError::UnknownMode(mode));
        }
        self.configure.setup(mode, input_types, output_mask)
    }
}
