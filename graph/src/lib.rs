//! Resource-oriented dataflow planning engine.
//!
//! Nodes declare contracts: which resources they consume and which they
//! provide. Given a set of registered nodes and a list of target resource
//! names, [`FlowBuilder`] plans a correct execution order, negotiates
//! runtime types between the nodes, allocates a minimal register file and
//! emits [`PlanTemplate`]s from which callable [`Plan`]s are assembled.

pub use rill_chain as chain;

mod builder;
mod error;
mod resource;
mod schedule;

pub mod node;

pub use crate::builder::FlowBuilder;
pub use crate::error::{
    ConstructError, ExecError, RegisterError, SetupError, WorkerError,
};
pub use crate::node::{
    Binding, Configure, Contract, FixedNode, Injector, ModeId, Node, NodeCaps, NodeId, NodeSetup,
    Worker, WorkerOutputs,
};
pub use crate::resource::{ResourceName, TypeDesc, TypeToken, Value};
pub use crate::schedule::{Plan, PlanTemplate};
