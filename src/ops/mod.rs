//! Computational kernels a node delegates its numeric work to.
//!
//! Parameter updates follow a two-phase protocol: [`Operator::adjust`] only
//! stages a change, [`Operator::commit_weights`] applies whatever has been
//! staged since the last commit. Several adjustments may be staged before a
//! single commit.

use crate::error::OperatorError;

pub mod activations;
pub mod neurons;
pub mod pass_through;

pub use activations::Activation;
pub use neurons::Neurons;
pub use pass_through::PassThrough;

/// What an operator gets to see of its node.
#[derive(Clone, Copy, Debug)]
pub struct NodeData<'a> {
    /// the node's input values, flattened in input order
    pub inputs: &'a [f64],
    pub values: &'a [f64],
    /// gradient of the cost with respect to `values`
    pub deltas: &'a [f64],
}

pub trait Operator: Send {
    /// Called once while the graph is built, with the flattened width of all
    /// inputs and the node's own size.
    fn init(&mut self, input_size: usize, size: usize) -> Result<(), OperatorError> {
        let _ = (input_size, size);
        Ok(())
    }

    fn evaluate(&mut self, inputs: &[f64], values: &mut [f64]) -> Result<(), OperatorError>;

    /// Converts the node's deltas into a contribution to the deltas of the
    /// flattened input elements `start..end`. `add` takes an index local to
    /// that range and may be called several times per element; the calls sum.
    fn input_deltas(
        &self,
        data: NodeData<'_>,
        start: usize,
        end: usize,
        add: &mut dyn FnMut(usize, f64),
    ) -> Result<(), OperatorError>;

    /// Whether this node's deltas must always be materialised.
    fn can_be_adjusted(&self) -> bool;

    /// Stages a parameter update for `data.deltas`.
    fn adjust(&mut self, data: NodeData<'_>, learning_rate: f64) -> Result<(), OperatorError>;

    /// Applies every staged update.
    fn commit_weights(&mut self) -> Result<(), OperatorError>;

    /// Current committed parameters, flattened. Empty for parameterless kernels.
    fn parameters(&self) -> Vec<f64> {
        Vec::new()
    }
}
