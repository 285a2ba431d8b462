//! Pipeline-specific error types.
//!
//! [`PipelineError`] covers graph construction and whole-pipeline failures,
//! [`NodeError`] is what a tick returns, and [`CommandError`] is what the
//! command layer hands back to its caller.

use crate::pipeline::id::{NodeId, Timestamp};
use crate::pipeline::port::PortKind;
use thiserror::Error;

/// Errors that can occur while building or running a pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Duplicate node id {0}")]
    DuplicateId(NodeId),

    #[error("Duplicate node name '{0}'")]
    DuplicateName(String),

    #[error("Unknown node type '{0}'")]
    UnknownNodeType(String),

    #[error("Unknown node {0}")]
    UnknownNode(String),

    #[error("Node '{node}' has no port named '{port}'")]
    UnknownPort { node: String, port: String },

    #[error("Port kind mismatch: {from} ({from_kind}) -> {to} ({to_kind})")]
    KindMismatch {
        from: String,
        from_kind: PortKind,
        to: String,
        to_kind: PortKind,
    },

    #[error("Input {0} is already bound to a source")]
    AlreadyBound(String),

    #[error("Graph is finalized; connections can only be made once")]
    GraphFinalized,

    #[error("Not all nodes can be assigned a master (cycle or missing self-driven root): {}", unresolved.join(", "))]
    UnresolvableGraph { unresolved: Vec<String> },

    #[error("Primary input '{port}' of node '{node}' is not connected")]
    PrimaryInputNotConnected { node: String, port: String },

    #[error("Invalid parameter for node '{node}': {message}")]
    InvalidParam { node: String, message: String },

    #[error("Fatal error in node '{node}' at cycle {cycle}: {message}")]
    Fatal {
        node: String,
        cycle: u64,
        message: String,
    },

    #[error("Pipeline already started")]
    AlreadyStarted,

    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

impl PipelineError {
    /// Errors raised while building or finalizing the graph. These never
    /// leave a partially started pipeline behind.
    pub fn is_configuration_error(&self) -> bool {
        !matches!(
            self,
            PipelineError::Fatal { .. } | PipelineError::AlreadyStarted | PipelineError::ThreadSpawn(_)
        )
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Errors returned by a node from its tick.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Input '{port}' is not connected")]
    NotConnected { port: String },

    #[error("No port named '{port}'")]
    UnknownPort { port: String },

    #[error("Port '{port}' expects {expected} data")]
    PayloadMismatch { port: String, expected: PortKind },

    #[error("Timestamp on '{port}' went backwards ({previous} -> {attempted})")]
    TimestampRegression {
        port: String,
        previous: Timestamp,
        attempted: Timestamp,
    },

    /// Cooperative end of input; not a failure.
    #[error("End of stream")]
    StreamEnded,

    /// Opt-in: terminates the pipeline.
    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("{0}")]
    Failed(String),
}

impl NodeError {
    pub fn failed(message: impl Into<String>) -> Self {
        NodeError::Failed(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        NodeError::Fatal(message.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, NodeError::Fatal(_))
    }
}

/// Errors returned by the command layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("Unknown node {0}")]
    UnknownNode(String),

    #[error("Unknown action '{0}'")]
    UnknownAction(String),

    #[error("Unknown parameter '{0}'")]
    UnknownParam(String),

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("Command rejected: {0}")]
    Rejected(String),

    #[error("Pipeline is stopped")]
    Stopped,
}

impl CommandError {
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        CommandError::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(PipelineError::DuplicateId(NodeId(1)).is_configuration_error());
        assert!(PipelineError::UnresolvableGraph {
            unresolved: vec!["a".into()]
        }
        .is_configuration_error());
        assert!(!PipelineError::Fatal {
            node: "a".into(),
            cycle: 3,
            message: "boom".into()
        }
        .is_configuration_error());
    }

    #[test]
    fn test_unresolvable_lists_nodes() {
        let err = PipelineError::UnresolvableGraph {
            unresolved: vec!["A".into(), "B".into()],
        };
        assert!(err.to_string().contains("A, B"));
    }

    #[test]
    fn test_node_error_fatal() {
        assert!(NodeError::fatal("disk gone").is_fatal());
        assert!(!NodeError::StreamEnded.is_fatal());
        assert!(!NodeError::failed("transient").is_fatal());
    }
}
