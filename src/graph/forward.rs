use tracing::trace;

use super::node::NodeId;
use super::status::Status;
use super::Graph;
use crate::error::{Error, Pass, Result, ResultExt};

impl Graph {
    /// Marks `id` and everything downstream of it as changed. Stops at nodes
    /// that hold no values, since nothing past them can be stale.
    pub(super) fn inputs_changed(&self, id: NodeId) -> Result<()> {
        let node = self.node(id);
        {
            let mut st = node.lock(Pass::SetInputs)?;
            if !st.status.has_values() {
                return Ok(());
            }
            st.advance(&node.name, Pass::SetInputs, Status::Changed)?;
        }
        trace!(node = %node.name, "changed");

        for (i, &out) in node.outputs.iter().enumerate() {
            self.inputs_changed(out).node_context(&node.name, Pass::SetInputs, || {
                format!("invalidating output {:?} (#{i}) failed", self.node(out).name)
            })?;
        }
        Ok(())
    }

    /// Makes the values of `id` current with respect to all of its transitive
    /// inputs, recomputing only what has changed since the last call.
    pub fn evaluate(&self, id: NodeId) -> Result<()> {
        let node = self.get(id)?;
        {
            let mut st = node.lock(Pass::Evaluate)?;
            if st.status.is_current() {
                return Ok(());
            }
            if node.is_source() {
                return st.advance(&node.name, Pass::Evaluate, Status::Evaluated);
            }
        }

        for (i, &input) in node.inputs.iter().enumerate() {
            self.evaluate(input).node_context(&node.name, Pass::Evaluate, || {
                format!("evaluating input {:?} (#{i}) failed", self.node(input).name)
            })?;
        }

        let mut snapshot = Vec::with_capacity(node.input_size());
        for &input in &node.inputs {
            snapshot.extend_from_slice(&self.node(input).lock(Pass::Evaluate)?.values);
        }

        let mut guard = node.lock(Pass::Evaluate)?;
        // another thread got here first
        if guard.status.is_current() {
            return Ok(());
        }
        let st = &mut *guard;
        st.inputs = snapshot;
        let Some(op) = st.op.as_mut() else {
            return Err(Error::precedence(&node.name, Pass::Evaluate, "layer has no operator"));
        };
        op.evaluate(&st.inputs, &mut st.values)
            .map_err(|e| Error::operator(&node.name, Pass::Evaluate, e))?;
        st.advance(&node.name, Pass::Evaluate, Status::Evaluated)?;
        trace!(node = %node.name, "evaluated");
        Ok(())
    }
}
