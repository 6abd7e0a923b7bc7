//! The recompute/propagation engine.
//!
//! A [`Graph`] owns its nodes in an arena; edges are [`NodeId`] indices fixed
//! at build time. Every node guards its mutable state with its own lock and
//! no pass ever holds two nodes' locks at once: a node locks itself, releases,
//! recurses into its neighbours (who lock themselves), then locks itself again
//! to record the result.

use std::collections::HashMap;

use tracing::debug;

use crate::cost::CostGradient;
use crate::error::{Error, Pass, Result, ResultExt};

mod adjust;
mod backward;
mod builder;
mod forward;
mod node;
mod status;

pub use builder::GraphBuilder;
pub use node::NodeId;
pub use status::{Staging, Status};

use node::Node;

/// When staged parameter changes are applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Commit {
    /// run the commit pass right after adjusting
    Immediate,
    /// leave changes staged until [`Graph::commit_all_weights`]
    Deferred,
}

pub struct Graph {
    nodes: Vec<Node>,
    names: HashMap<String, NodeId>,
    /// source nodes, fed from the flat input vector in this order
    inputs: Vec<NodeId>,
    /// network outputs, laid out in the flat output vector in this order
    outputs: Vec<NodeId>,
    input_size: usize,
    output_size: usize,
}

impl Graph {
    /// For ids taken from the graph's own wiring, which are always in range.
    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// For ids handed in by callers, which may come from another graph.
    fn get(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.0).ok_or(Error::UnknownNode {
            index: id.0,
            len: self.nodes.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    pub fn id(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(id.0).map(|n| n.name.as_str())
    }

    pub fn node_inputs(&self, id: NodeId) -> Option<&[NodeId]> {
        self.nodes.get(id.0).map(|n| n.inputs.as_slice())
    }

    pub fn node_outputs(&self, id: NodeId) -> Option<&[NodeId]> {
        self.nodes.get(id.0).map(|n| n.outputs.as_slice())
    }

    pub fn status(&self, id: NodeId) -> Result<Status> {
        Ok(self.get(id)?.lock(Pass::Evaluate)?.status)
    }

    pub fn values(&self, id: NodeId) -> Result<Vec<f64>> {
        Ok(self.get(id)?.lock(Pass::Evaluate)?.values.clone())
    }

    /// zeros for a node whose last backward pass only forwarded the request
    pub fn deltas(&self, id: NodeId) -> Result<Vec<f64>> {
        Ok(self.get(id)?.lock(Pass::Deltas)?.deltas.clone())
    }

    /// whether the last backward pass stored this node's deltas, as opposed to
    /// only forwarding the request to its outputs.
    pub fn deltas_computed(&self, id: NodeId) -> Result<bool> {
        Ok(self.get(id)?.lock(Pass::Deltas)?.deltas_computed)
    }

    pub fn staging(&self, id: NodeId) -> Result<Staging> {
        Ok(self.get(id)?.lock(Pass::Adjust)?.staging)
    }

    /// committed parameters of the node's operator
    pub fn parameters(&self, id: NodeId) -> Result<Vec<f64>> {
        let st = self.get(id)?.lock(Pass::Adjust)?;
        Ok(st.op.as_ref().map(|op| op.parameters()).unwrap_or_default())
    }

    /// Copies `values` into the source nodes and invalidates everything
    /// downstream that had been evaluated.
    pub fn set_inputs(&self, values: &[f64]) -> Result<()> {
        if values.len() != self.input_size {
            return Err(Error::ShapeMismatch {
                expected: self.input_size,
                got: values.len(),
            });
        }
        debug!(width = values.len(), "setting inputs");

        for &id in &self.inputs {
            let node = self.node(id);
            let offset = node.input_offset.unwrap_or_default();
            node.lock(Pass::SetInputs)?
                .values
                .copy_from_slice(&values[offset..offset + node.size]);
        }
        for (i, &id) in self.inputs.iter().enumerate() {
            self.inputs_changed(id)
                .node_context(&self.node(id).name, Pass::SetInputs, || format!("invalidating network input #{i} failed"))?;
        }
        Ok(())
    }

    /// Sets the inputs, evaluates every output node and returns a copy of the
    /// flat output vector.
    pub fn get_outputs(&self, values: &[f64]) -> Result<Vec<f64>> {
        self.set_inputs(values)?;

        let mut outputs = Vec::with_capacity(self.output_size);
        for (i, &id) in self.outputs.iter().enumerate() {
            self.evaluate(id).node_context(&self.node(id).name, Pass::Evaluate, || {
                format!("network output #{i} failed to evaluate")
            })?;
            outputs.extend_from_slice(&self.node(id).lock(Pass::Evaluate)?.values);
        }
        Ok(outputs)
    }

    /// Computes deltas for every node that needs them, seeding network outputs
    /// from `cost`. Every node descends from a source, so starting at the
    /// sources with no relevance reaches the whole graph.
    pub fn backpropagate(&self, cost: &dyn CostGradient) -> Result<()> {
        debug!("backpropagating");
        for (i, &id) in self.inputs.iter().enumerate() {
            self.get_deltas(id, cost, false).node_context(&self.node(id).name, Pass::Deltas, || {
                format!("getting deltas from network input #{i} failed")
            })?;
        }
        Ok(())
    }

    /// Stages parameter updates for every node, walking back from the outputs.
    pub fn adjust(&self, learning_rate: f64, commit: Commit) -> Result<()> {
        debug!(learning_rate, ?commit, "adjusting");
        for (i, &id) in self.outputs.iter().enumerate() {
            self.adjust_node(id, learning_rate).node_context(&self.node(id).name, Pass::Adjust, || {
                format!("adjusting from network output #{i} failed")
            })?;
        }
        match commit {
            Commit::Immediate => self.commit_all_weights(),
            Commit::Deferred => Ok(()),
        }
    }

    /// Applies every staged parameter change, walking back from the outputs.
    pub fn commit_all_weights(&self) -> Result<()> {
        debug!("committing weights");
        let mut visited = vec![false; self.nodes.len()];
        for (i, &id) in self.outputs.iter().enumerate() {
            self.commit_weights(id, &mut visited).node_context(&self.node(id).name, Pass::CommitWeights, || {
                format!("committing from network output #{i} failed")
            })?;
        }
        Ok(())
    }
}
