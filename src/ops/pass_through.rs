use super::{NodeData, Operator};
use crate::error::OperatorError;

/// Copies its flattened inputs straight to its values. Holds no parameters,
/// so unless built with [`PassThrough::relevant`] its deltas are only ever
/// forwarded, never stored.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThrough {
    relevant: bool,
}

impl PassThrough {
    pub fn new() -> Self {
        Self::default()
    }

    /// a pass-through whose deltas are always materialised
    pub fn relevant() -> Self {
        Self { relevant: true }
    }
}

impl Operator for PassThrough {
    fn init(&mut self, input_size: usize, size: usize) -> Result<(), OperatorError> {
        if input_size != size {
            return Err(OperatorError::Shape { expected: size, got: input_size });
        }
        Ok(())
    }

    fn evaluate(&mut self, inputs: &[f64], values: &mut [f64]) -> Result<(), OperatorError> {
        if inputs.len() != values.len() {
            return Err(OperatorError::Shape { expected: values.len(), got: inputs.len() });
        }
        values.copy_from_slice(inputs);
        Ok(())
    }

    fn input_deltas(
        &self,
        data: NodeData<'_>,
        start: usize,
        end: usize,
        add: &mut dyn FnMut(usize, f64),
    ) -> Result<(), OperatorError> {
        let Some(deltas) = data.deltas.get(start..end) else {
            return Err(OperatorError::Shape { expected: data.deltas.len(), got: end });
        };
        deltas.iter().enumerate().for_each(|(i, d)| add(i, *d));
        Ok(())
    }

    fn can_be_adjusted(&self) -> bool {
        self.relevant
    }

    fn adjust(&mut self, _data: NodeData<'_>, _learning_rate: f64) -> Result<(), OperatorError> {
        Ok(())
    }

    fn commit_weights(&mut self) -> Result<(), OperatorError> {
        Ok(())
    }
}
