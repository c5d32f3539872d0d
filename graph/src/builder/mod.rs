//! Flow builder: node registration and plan construction.

mod search;

pub(crate) use self::search::PlanSnapshot;

use log::{debug, trace};

use crate::error::{ConstructError, RegisterError};
use crate::node::{Node, NodeId};
use crate::resource::ResourceName;
use crate::schedule;
use crate::schedule::PlanTemplate;

/// Builds data flows from registered nodes.
///
/// Nodes are registered once and may be consulted by any number of
/// [`construct`](FlowBuilder::construct) calls. Priorities establish a
/// partial order between applied nodes: of two nodes that both end up in a
/// plan, the one with the lower priority runs first. The default priority
/// is the registration order.
#[derive(Debug, Default)]
pub struct FlowBuilder {
    nodes: Vec<Box<dyn Node>>,
    priorities: Vec<i64>,
    next_priority: i64,
}

impl FlowBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node with the default priority.
    pub fn register(&mut self, node: impl Node + 'static) -> Result<NodeId, RegisterError> {
        let priority = self.next_priority;
        self.register_boxed(Box::new(node), priority)
    }

    /// Register a node with an explicit priority.
    pub fn register_with_priority(
        &mut self,
        node: impl Node + 'static,
        priority: i64,
    ) -> Result<NodeId, RegisterError> {
        self.register_boxed(Box::new(node), priority)
    }

    fn register_boxed(
        &mut self,
        node: Box<dyn Node>,
        priority: i64,
    ) -> Result<NodeId, RegisterError> {
        if node.capabilities().is_empty() {
            return Err(RegisterError::NoContracts(format!("{:?}", node)));
        }
        self.nodes.push(node);
        self.priorities.push(priority);
        // Later default priorities must sort after explicit ones seen so far.
        self.next_priority = self.next_priority.max(priority + 1);
        Ok(NodeId(self.nodes.len() as u32 - 1))
    }

    /// Construct every viable plan producing the given targets, in the
    /// order the search finds them.
    ///
    /// A configuration whose type negotiation fails is dropped; an empty
    /// result means no viable plan exists (including the case of a cycle
    /// among candidate providers).
    pub fn construct(&mut self, targets: &[ResourceName]) -> Vec<PlanTemplate> {
        trace!("planning for targets {:?}", targets);
        let snapshots = search::find_build_steps(&mut self.nodes, &self.priorities, targets);
        debug!("search found {} viable configuration(s)", snapshots.len());
        let mut templates = Vec::new();
        for snapshot in &snapshots {
            match schedule::emit(&mut self.nodes, snapshot, targets) {
                Ok(template) => templates.push(template),
                Err(err) => debug!("dropping configuration: {}", err),
            }
        }
        templates
    }

    /// Construct the single viable plan for the given targets.
    ///
    /// This is the orchestration entry point: zero viable plans is
    /// [`ConstructError::NoViablePlan`], more than one is
    /// [`ConstructError::Ambiguous`].
    pub fn construct_unique(
        &mut self,
        targets: &[ResourceName],
    ) -> Result<PlanTemplate, ConstructError> {
        let mut templates = self.construct(targets);
        match templates.len() {
            0 => Err(ConstructError::NoViablePlan),
            1 => Ok(templates.pop().unwrap()),
            count => Err(ConstructError::Ambiguous { count }),
        }
    }
}
