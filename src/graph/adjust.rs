use tracing::trace;

use super::node::NodeId;
use super::status::{Staging, Status};
use super::Graph;
use crate::error::{Error, Pass, Result, ResultExt};
use crate::ops::NodeData;

impl Graph {
    /// Stages parameter updates for `id` from its deltas, then for its inputs.
    pub(super) fn adjust_node(&self, id: NodeId, learning_rate: f64) -> Result<()> {
        let node = self.node(id);
        {
            let mut guard = node.lock(Pass::Adjust)?;
            if !guard.status.has_deltas() {
                return Err(Error::precedence(&node.name, Pass::Adjust, "has no deltas"));
            }
            if guard.status.is_adjusted() {
                return Ok(());
            }
            if node.is_source() {
                return guard.advance(&node.name, Pass::Adjust, Status::Adjusted);
            }

            let st = &mut *guard;
            if node.adjustable {
                if let Some(op) = st.op.as_mut() {
                    let data = NodeData {
                        inputs: &st.inputs,
                        values: &st.values,
                        deltas: &st.deltas,
                    };
                    op.adjust(data, learning_rate)
                        .map_err(|e| Error::operator(&node.name, Pass::Adjust, e))?;
                    st.staging = Staging::Staged;
                }
            }
            st.advance(&node.name, Pass::Adjust, Status::Adjusted)?;
            trace!(node = %node.name, staging = ?st.staging, "adjusted");
        }

        for (i, &input) in node.inputs.iter().enumerate() {
            self.adjust_node(input, learning_rate).node_context(&node.name, Pass::Adjust, || {
                format!("adjusting input {:?} (#{i}) failed", self.node(input).name)
            })?;
        }
        Ok(())
    }

    /// Applies whatever `id` has staged, then does the same for its inputs.
    ///
    /// Only an adjusted node moves to `WeightsAdded`. A node without values
    /// keeps its status, so the next backward pass still demands an evaluate.
    /// An evaluated node whose parameters change is invalidated along with
    /// everything downstream of it.
    pub(super) fn commit_weights(&self, id: NodeId, visited: &mut [bool]) -> Result<()> {
        if std::mem::replace(&mut visited[id.0], true) {
            return Ok(());
        }
        let node = self.node(id);
        let stale = {
            let mut st = node.lock(Pass::CommitWeights)?;
            let committed = st.staging == Staging::Staged;
            if committed {
                if let Some(op) = st.op.as_mut() {
                    op.commit_weights()
                        .map_err(|e| Error::operator(&node.name, Pass::CommitWeights, e))?;
                }
                st.staging = Staging::Clean;
            }
            let status = st.status;
            match status {
                Status::Adjusted => {
                    st.advance(&node.name, Pass::CommitWeights, Status::WeightsAdded)?;
                    false
                }
                s => committed && s.has_values(),
            }
        };
        if stale {
            self.inputs_changed(id)?;
        }
        trace!(node = %node.name, stale, "weights committed");

        for (i, &input) in node.inputs.iter().enumerate() {
            self.commit_weights(input, visited).node_context(&node.name, Pass::CommitWeights, || {
                format!("committing input {:?} (#{i}) failed", self.node(input).name)
            })?;
        }
        Ok(())
    }
}
