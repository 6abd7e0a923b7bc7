use std::fmt::Display;
use std::ops::Range;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Pass, Result};
use crate::ops::{NodeData, Operator};

use super::status::{Staging, Status};

/// Index of a node in the graph's arena. Only the graph that issued it
/// can resolve it; out-of-range ids fail with `Error::UnknownNode`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Everything about a node that is fixed once the graph is built lives here,
/// the rest sits behind the node's own lock in [`NodeState`].
pub(crate) struct Node {
    pub name: String,
    pub size: usize,
    pub inputs: Vec<NodeId>,
    /// where each input's values land in the flattened input snapshot
    pub input_ranges: Vec<Range<usize>>,
    pub outputs: Vec<NodeId>,
    /// offset into the flat network output vector, for network outputs
    pub output_offset: Option<usize>,
    /// offset into the flat network input vector, for source nodes
    pub input_offset: Option<usize>,
    /// cached `can_be_adjusted`, fixed for the life of the graph
    pub adjustable: bool,
    pub state: Mutex<NodeState>,
}

pub(crate) struct NodeState {
    pub status: Status,
    pub values: Vec<f64>,
    pub deltas: Vec<f64>,
    pub deltas_computed: bool,
    /// the input values the current `values` were computed from
    pub inputs: Vec<f64>,
    pub staging: Staging,
    pub op: Option<Box<dyn Operator>>,
}

impl Node {
    pub fn is_output(&self) -> bool {
        self.output_offset.is_some()
    }

    pub fn is_source(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn input_size(&self) -> usize {
        self.input_ranges.last().map_or(0, |r| r.end)
    }

    pub fn lock(&self, pass: Pass) -> Result<MutexGuard<'_, NodeState>> {
        self.state
            .lock()
            .map_err(|_| Error::precedence(&self.name, pass, "lock poisoned"))
    }
}

impl NodeState {
    pub fn new(size: usize, input_size: usize, op: Option<Box<dyn Operator>>) -> Self {
        NodeState {
            status: Status::Initialized,
            values: vec![0.0; size],
            deltas: vec![0.0; size],
            deltas_computed: false,
            inputs: vec![0.0; input_size],
            staging: Staging::Clean,
            op,
        }
    }

    /// Moves to `to`, refusing anything the transition table does not allow.
    /// Fresh values make previously computed deltas stale.
    pub fn advance(&mut self, node: &str, pass: Pass, to: Status) -> Result<()> {
        if !self.status.can_become(to) {
            return Err(Error::precedence(
                node,
                pass,
                format!("illegal transition {} -> {}", self.status, to),
            ));
        }
        if matches!(to, Status::Changed | Status::Evaluated) {
            self.deltas_computed = false;
        }
        self.status = to;
        Ok(())
    }

    pub fn data(&self) -> NodeData<'_> {
        NodeData {
            inputs: &self.inputs,
            values: &self.values,
            deltas: &self.deltas,
        }
    }
}
