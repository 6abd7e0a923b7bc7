use itertools::Itertools;
use tracing::trace;

use super::node::NodeId;
use super::Graph;
use crate::cost::CostGradient;
use crate::error::{Error, Pass, Result, ResultExt};

/// Adds into `acc`, remembering the first index that falls outside it.
fn accumulate<'a>(acc: &'a mut [f64], overflow: &'a mut Option<usize>) -> impl FnMut(usize, f64) + 'a {
    move |i, value| match acc.get_mut(i) {
        Some(slot) => *slot += value,
        None => {
            overflow.get_or_insert(i);
        }
    }
}

impl Graph {
    /// Computes the deltas of `id`, or only forwards the request to its
    /// outputs when neither the caller nor the node's own operator needs them.
    pub(super) fn get_deltas(&self, id: NodeId, cost: &dyn CostGradient, relevant: bool) -> Result<()> {
        let node = self.node(id);
        let relevant = relevant || node.adjustable;
        {
            let st = node.lock(Pass::Deltas)?;
            if !st.status.has_values() {
                return Err(Error::precedence(&node.name, Pass::Deltas, "has not been evaluated"));
            }
            if st.status.has_deltas() && (st.deltas_computed || !relevant) {
                return Ok(());
            }
        }

        if !relevant {
            for (i, &out) in node.outputs.iter().enumerate() {
                self.get_deltas(out, cost, false).node_context(&node.name, Pass::Deltas, || {
                    format!("forwarding to output {:?} (#{i}) failed", self.node(out).name)
                })?;
            }
            let mut st = node.lock(Pass::Deltas)?;
            st.deltas.fill(0.0);
            let next = st.status.after_deltas();
            if next != st.status {
                st.advance(&node.name, Pass::Deltas, next)?;
            }
            trace!(node = %node.name, "deltas forwarded");
            return Ok(());
        }

        let mut acc = vec![0.0; node.size];
        if let Some(offset) = node.output_offset {
            let mut overflow = None;
            cost.range_cost_deriv(offset, offset + node.size, &mut accumulate(&mut acc, &mut overflow))
                .map_err(|e| Error::operator(&node.name, Pass::Deltas, e))
                .node_context(&node.name, Pass::Deltas, || "cost gradient failed")?;
            if let Some(index) = overflow {
                return Err(Error::ShapeMismatch { expected: node.size, got: index + 1 });
            }
        }
        for (i, &out) in node.outputs.iter().enumerate() {
            self.input_deltas(out, id, &mut acc, cost).node_context(&node.name, Pass::Deltas, || {
                format!("input deltas from output {:?} (#{i}) failed", self.node(out).name)
            })?;
        }

        let mut st = node.lock(Pass::Deltas)?;
        st.deltas.copy_from_slice(&acc);
        st.deltas_computed = true;
        let next = st.status.after_deltas();
        if next != st.status {
            st.advance(&node.name, Pass::Deltas, next)?;
        }
        trace!(node = %node.name, "deltas computed");
        Ok(())
    }

    /// Adds the contribution of `out`'s deltas to the deltas of its input
    /// `target`, once for every position `target` is wired into.
    fn input_deltas(&self, out: NodeId, target: NodeId, acc: &mut [f64], cost: &dyn CostGradient) -> Result<()> {
        let node = self.node(out);
        let ready = {
            let st = node.lock(Pass::InputDeltas)?;
            if !st.status.has_values() {
                return Err(Error::precedence(&node.name, Pass::InputDeltas, "has not been evaluated"));
            }
            st.status.has_deltas() && st.deltas_computed
        };
        if !ready {
            self.get_deltas(out, cost, true)
                .node_context(&node.name, Pass::InputDeltas, || "getting own deltas failed")?;
        }

        let positions = node.inputs.iter().positions(|&i| i == target).collect_vec();
        if positions.is_empty() {
            return Err(Error::precedence(
                &node.name,
                Pass::InputDeltas,
                format!("{:?} is not one of its inputs", self.node(target).name),
            ));
        }

        let st = node.lock(Pass::InputDeltas)?;
        let Some(op) = st.op.as_ref() else {
            return Err(Error::precedence(&node.name, Pass::InputDeltas, "layer has no operator"));
        };
        for p in positions {
            let range = node.input_ranges[p].clone();
            let mut overflow = None;
            op.input_deltas(st.data(), range.start, range.end, &mut accumulate(acc, &mut overflow))
                .map_err(|e| Error::operator(&node.name, Pass::InputDeltas, e))?;
            if let Some(index) = overflow {
                return Err(Error::ShapeMismatch { expected: acc.len(), got: index + 1 });
            }
        }
        Ok(())
    }
}
