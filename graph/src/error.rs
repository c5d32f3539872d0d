//! Error types of the planning engine.

use thiserror::Error;

use crate::node::ModeId;

/// Failure reported by a worker during plan execution.
pub type WorkerError = Box<dyn std::error::Error + 'static>;

/// Error raised when a node cannot be registered.
#[derive(Clone, Debug, Error)]
pub enum RegisterError {
    /// The node implements neither the static nor the dynamic contract
    /// listing interface.
    #[error("node {0} has no contract listing interface")]
    NoContracts(String),
}

/// Error raised when a single viable plan was requested.
#[derive(Clone, Copy, Debug, Error)]
pub enum ConstructError {
    /// No viable plan exists for the requested targets.
    #[error("unable to construct the requested data flow")]
    NoViablePlan,

    /// More than one viable plan exists; the caller has to disambiguate.
    #[error("ambiguous configuration: {count} viable plans")]
    Ambiguous {
        /// Number of viable plans found.
        count: usize,
    },
}

/// Type negotiation failure reported by [`Node::setup`].
///
/// [`Node::setup`]: crate::node::Node::setup
#[derive(Clone, Debug, Error)]
pub enum SetupError {
    /// An input arrived with a type the node cannot consume.
    #[error("type mismatch at input {input}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Index of the offending input, in contract order.
        input: usize,
        /// Human-readable description of the acceptable type.
        expected: String,
        /// Description of the type that actually arrived.
        found: String,
    },

    /// The node does not know the requested mode.
    #[error("unknown mode {0:?}")]
    UnknownMode(ModeId),
}

/// Failure while executing an assembled plan.
#[derive(Debug, Error)]
pub enum ExecError {
    /// A worker failed; the error is propagated unchanged. Registers
    /// computed so far are released before this is returned.
    #[error("{0}")]
    Worker(WorkerError),

    /// A worker returned the wrong number of outputs.
    #[error("worker produced {found} outputs where {expected} were wired")]
    OutputArity {
        /// Outputs wired by the plan.
        expected: usize,
        /// Outputs actually produced.
        found: usize,
    },

    /// A worker returned a placeholder for an output that has consumers.
    #[error("worker returned no value for live output {index}")]
    MissingOutput {
        /// Index of the output, in contract order.
        index: usize,
    },
}
