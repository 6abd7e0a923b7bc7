use std::fmt::Display;

/// The pass a node was in when something went wrong.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Pass {
    Build,
    CheckOutputs,
    SetInputs,
    Evaluate,
    Deltas,
    InputDeltas,
    Adjust,
    CommitWeights,
}

/// Failures inside a computational kernel or a cost gradient source.
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    #[error("operator shape mismatch: expected {expected}, got {got}")]
    Shape { expected: usize, got: usize },

    #[error("{0}")]
    Msg(String),
}

impl OperatorError {
    pub fn msg(s: impl Into<String>) -> Self {
        OperatorError::Msg(s.into())
    }
}

/// Problems with the wiring of a graph, found while building it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructuralError {
    #[error("node name {0:?} is declared more than once")]
    DuplicateName(String),

    #[error("node {node:?} names input {input:?}, which does not exist")]
    UnknownInput { node: String, input: String },

    #[error("output {0:?} does not name a node")]
    UnknownOutput(String),

    #[error("layer {0:?} has no inputs")]
    NoInputs(String),

    #[error("node {0:?} has size 0")]
    EmptyNode(String),

    #[error("graph has no designated outputs")]
    NoOutputs,

    #[error("node {node:?} is part of a cycle")]
    Cycle { node: String },

    #[error("node {node:?} has no effect on network outputs (has no outputs and is not a network output)")]
    NoEffect { node: String },
}

/// The root cause of an [`Error`], ignoring any context added on the way up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum ErrorKind {
    Structural,
    ShapeMismatch,
    Operator,
    Precedence,
    UnknownNode,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("structural error: {0}")]
    Structural(#[from] StructuralError),

    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: usize, got: usize },

    #[error("{pass} of node {node:?} failed in operator")]
    Operator {
        node: String,
        pass: Pass,
        #[source]
        source: OperatorError,
    },

    #[error("{pass} of node {node:?} out of order: {reason}")]
    Precedence {
        node: String,
        pass: Pass,
        reason: String,
    },

    #[error("node #{index} does not belong to this graph of {len} nodes")]
    UnknownNode { index: usize, len: usize },

    #[error("{pass} of node {node:?}: {detail}")]
    Context {
        node: String,
        pass: Pass,
        detail: String,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn precedence(node: &str, pass: Pass, reason: impl Into<String>) -> Self {
        Error::Precedence {
            node: node.to_string(),
            pass,
            reason: reason.into(),
        }
    }

    pub fn operator(node: &str, pass: Pass, source: OperatorError) -> Self {
        Error::Operator {
            node: node.to_string(),
            pass,
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Structural(_) => ErrorKind::Structural,
            Error::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
            Error::Operator { .. } => ErrorKind::Operator,
            Error::Precedence { .. } => ErrorKind::Precedence,
            Error::UnknownNode { .. } => ErrorKind::UnknownNode,
            Error::Context { source, .. } => source.kind(),
        }
    }

    /// Number of context layers wrapped around the root cause.
    pub fn depth(&self) -> usize {
        match self {
            Error::Context { source, .. } => 1 + source.depth(),
            _ => 0,
        }
    }

    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            e => e,
        }
    }
}

/// Adds a layer of node/pass context to a failing result, the same way
/// `anyhow::Context` does for untyped errors.
pub trait ResultExt<T> {
    fn node_context<D: Display>(self, node: &str, pass: Pass, detail: impl FnOnce() -> D) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn node_context<D: Display>(self, node: &str, pass: Pass, detail: impl FnOnce() -> D) -> Result<T> {
        self.map_err(|e| Error::Context {
            node: node.to_string(),
            pass,
            detail: detail().to_string(),
            source: Box::new(e),
        })
    }
}
