use anyhow::{Error, Result};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// One row of training data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub inputs: Vec<f64>,
    pub targets: Vec<f64>,
}

impl Sample {
    pub fn new(inputs: Vec<f64>, targets: Vec<f64>) -> Self {
        Self { inputs, targets }
    }
}

/// The dataset trait handed to the training driver. `next` walks the data
/// once; `reset` starts the walk over.
pub trait Dataset: Send {
    fn next(&mut self) -> Option<Sample>;
    fn reset(&mut self);
    fn shuffle(&mut self);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A dataset held entirely in memory.
pub struct InMemory {
    samples: Vec<Sample>,
    pos: usize,
}

impl InMemory {
    /// Fails on an empty set or on rows of differing widths.
    pub fn new(samples: Vec<Sample>) -> Result<Self> {
        let Some(first) = samples.first() else {
            return Err(Error::msg("dataset has no samples"));
        };
        let (n_in, n_out) = (first.inputs.len(), first.targets.len());
        if let Some(i) = samples
            .iter()
            .position(|s| s.inputs.len() != n_in || s.targets.len() != n_out)
        {
            return Err(Error::msg(format!(
                "sample {i} has shape ({}, {}), expected ({n_in}, {n_out})",
                samples[i].inputs.len(),
                samples[i].targets.len()
            )));
        }
        Ok(Self { samples, pos: 0 })
    }

    /// The four XOR rows, inputs in {-1, 1}, targets in {0, 1}.
    pub fn xor() -> Self {
        let samples = [(-1.0, -1.0, 0.0), (-1.0, 1.0, 1.0), (1.0, -1.0, 1.0), (1.0, 1.0, 0.0)]
            .into_iter()
            .map(|(a, b, t)| Sample::new(vec![a, b], vec![t]))
            .collect();
        Self { samples, pos: 0 }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }
}

impl Dataset for InMemory {
    fn next(&mut self) -> Option<Sample> {
        let s = self.samples.get(self.pos)?.clone();
        self.pos += 1;
        Some(s)
    }

    fn reset(&mut self) {
        self.pos = 0;
    }

    fn shuffle(&mut self) {
        self.samples.shuffle(&mut rand::thread_rng());
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
