use std::collections::HashMap;
use std::sync::Mutex;

use itertools::Itertools;
use tracing::{debug, trace};

use super::node::{Node, NodeId, NodeState};
use super::status::Status;
use super::Graph;
use crate::error::{Error, Pass, Result, ResultExt, StructuralError};
use crate::ops::Operator;

struct Declared {
    name: String,
    size: usize,
    inputs: Vec<String>,
    op: Option<Box<dyn Operator>>,
}

/// Collects node declarations by name. Inputs may name nodes declared later;
/// everything is resolved and validated in [`GraphBuilder::build`].
#[derive(Default)]
pub struct GraphBuilder {
    declared: Vec<Declared>,
    outputs: Vec<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source node, fed from the flat input vector.
    pub fn add_input(mut self, name: impl Into<String>, size: usize) -> Self {
        self.declared.push(Declared {
            name: name.into(),
            size,
            inputs: Vec::new(),
            op: None,
        });
        self
    }

    /// A node computing `size` values from the concatenation of `inputs`.
    pub fn add_layer(
        mut self,
        name: impl Into<String>,
        size: usize,
        op: impl Operator + 'static,
        inputs: &[&str],
    ) -> Self {
        self.declared.push(Declared {
            name: name.into(),
            size,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            op: Some(Box::new(op)),
        });
        self
    }

    pub fn set_outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn build(self) -> Result<Graph> {
        let GraphBuilder { declared, outputs } = self;

        if let Some(name) = declared.iter().map(|d| &d.name).duplicates().next() {
            return Err(StructuralError::DuplicateName(name.clone()).into());
        }
        for d in &declared {
            if d.size == 0 {
                return Err(StructuralError::EmptyNode(d.name.clone()).into());
            }
            if d.op.is_some() && d.inputs.is_empty() {
                return Err(StructuralError::NoInputs(d.name.clone()).into());
            }
        }
        if outputs.is_empty() {
            return Err(StructuralError::NoOutputs.into());
        }

        let names: HashMap<String, NodeId> = declared
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), NodeId(i)))
            .collect();

        let mut in_edges = Vec::with_capacity(declared.len());
        for d in &declared {
            let ids = d
                .inputs
                .iter()
                .map(|input| {
                    names.get(input).copied().ok_or_else(|| StructuralError::UnknownInput {
                        node: d.name.clone(),
                        input: input.clone(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            in_edges.push(ids);
        }

        let output_ids = outputs
            .iter()
            .unique()
            .map(|o| names.get(o).copied().ok_or_else(|| StructuralError::UnknownOutput(o.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(i) = find_cycle(&in_edges) {
            return Err(StructuralError::Cycle { node: declared[i].name.clone() }.into());
        }

        // out-edges, deduplicated and in declaration order of the consumer
        let mut out_edges = vec![Vec::new(); declared.len()];
        for (i, ins) in in_edges.iter().enumerate() {
            for input in ins.iter().unique() {
                out_edges[input.0].push(NodeId(i));
            }
        }

        let mut output_offsets = vec![None; declared.len()];
        let mut output_size = 0;
        for id in &output_ids {
            output_offsets[id.0] = Some(output_size);
            output_size += declared[id.0].size;
        }

        let sizes = declared.iter().map(|d| d.size).collect_vec();
        let mut input_size = 0;
        let mut sources = Vec::new();
        let mut nodes = Vec::with_capacity(declared.len());
        for (i, ((d, ins), outs)) in declared.into_iter().zip(in_edges).zip(out_edges).enumerate() {
            let input_ranges = ins
                .iter()
                .scan(0, |start, id| {
                    let range = *start..*start + sizes[id.0];
                    *start = range.end;
                    Some(range)
                })
                .collect_vec();
            let width = input_ranges.last().map_or(0, |r| r.end);

            let mut op = d.op;
            if let Some(op) = op.as_mut() {
                op.init(width, d.size).map_err(|e| Error::operator(&d.name, Pass::Build, e))?;
            }
            let adjustable = op.as_ref().map_or(false, |op| op.can_be_adjusted());

            let input_offset = if ins.is_empty() {
                sources.push(NodeId(i));
                let offset = input_size;
                input_size += d.size;
                Some(offset)
            } else {
                None
            };

            nodes.push(Node {
                size: d.size,
                state: Mutex::new(NodeState::new(d.size, width, op)),
                name: d.name,
                inputs: ins,
                input_ranges,
                outputs: outs,
                output_offset: output_offsets[i],
                input_offset,
                adjustable,
            });
        }

        let graph = Graph {
            nodes,
            names,
            inputs: sources,
            outputs: output_ids,
            input_size,
            output_size,
        };
        graph.check_outputs()?;
        debug!(
            nodes = graph.len(),
            input_size = graph.input_size,
            output_size = graph.output_size,
            "graph built"
        );
        Ok(graph)
    }
}

/// Index of some node on a cycle of the in-edge relation, if there is one.
fn find_cycle(in_edges: &[Vec<NodeId>]) -> Option<usize> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Open,
        Done,
    }

    fn visit(i: usize, in_edges: &[Vec<NodeId>], marks: &mut [Mark]) -> Option<usize> {
        match marks[i] {
            Mark::Done => return None,
            Mark::Open => return Some(i),
            Mark::New => {}
        }
        marks[i] = Mark::Open;
        for input in &in_edges[i] {
            if let Some(c) = visit(input.0, in_edges, marks) {
                return Some(c);
            }
        }
        marks[i] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::New; in_edges.len()];
    (0..in_edges.len()).find_map(|i| visit(i, in_edges, &mut marks))
}

impl Graph {
    /// Validates that every node reaches a network output, starting from the
    /// sources. Run once, while building.
    fn check_outputs(&self) -> Result<()> {
        for (i, &id) in self.inputs.iter().enumerate() {
            self.check_node_outputs(id).node_context(&self.node(id).name, Pass::CheckOutputs, || {
                format!("failed to check outputs of network input #{i}")
            })?;
        }
        Ok(())
    }

    fn check_node_outputs(&self, id: NodeId) -> Result<()> {
        let node = self.node(id);
        if node.lock(Pass::CheckOutputs)?.status.is_validated() {
            return Ok(());
        }
        if node.outputs.is_empty() && !node.is_output() {
            return Err(StructuralError::NoEffect { node: node.name.clone() }.into());
        }

        for (i, &out) in node.outputs.iter().enumerate() {
            self.check_node_outputs(out).node_context(&node.name, Pass::CheckOutputs, || {
                format!("checking outputs of output {:?} (#{i}) failed", self.node(out).name)
            })?;
        }

        let mut st = node.lock(Pass::CheckOutputs)?;
        if st.status == Status::Initialized {
            st.advance(&node.name, Pass::CheckOutputs, Status::CheckedOutputs)?;
            trace!(node = %node.name, "outputs checked");
        }
        Ok(())
    }
}
