use crate::{error::Result, loss::LossTerms};

/// Whether the model is being trained or evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Train,
    Eval,
}

/// One batch of samples as produced by a `DataSource`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<I, T> {
    pub inputs: I,
    pub targets: T,
    /// Dataset positions of the samples in this batch.
    pub indices: Vec<usize>,
}

impl<I, T> Batch<I, T> {
    pub fn new(inputs: I, targets: T, indices: Vec<usize>) -> Self {
        Self {
            inputs,
            targets,
            indices,
        }
    }
}

/// The forward/backward computation driven by the trainer.
///
/// Parameters and gradients live in flat `f32` buffers owned by the model, the
/// optimizer updates them in place through `parameters`.
pub trait Model {
    type Inputs;
    type Targets;

    /// Switches between training and evaluation behavior.
    fn set_mode(&mut self, mode: Mode);

    fn mode(&self) -> Mode;

    /// Moves a batch to wherever the model computes, the identity by default.
    fn to_device(
        &self,
        batch: Batch<Self::Inputs, Self::Targets>,
    ) -> Result<Batch<Self::Inputs, Self::Targets>> {
        Ok(batch)
    }

    /// Runs the forward pass over a batch.
    ///
    /// # Arguments
    /// * `inputs` - The batch inputs.
    /// * `targets` - The batch targets.
    ///
    /// # Returns
    /// The named loss terms of this batch.
    fn forward(&mut self, inputs: &Self::Inputs, targets: &Self::Targets) -> Result<LossTerms>;

    /// Accumulates into the gradients the derivative of `objective`, the sum of
    /// the terms returned by the last `forward` call.
    fn backward(&mut self, objective: f32) -> Result<()>;

    /// Returns the parameters and their gradients, in that order.
    fn parameters(&mut self) -> (&mut [f32], &mut [f32]);

    /// Peak memory used so far in MiB, for the status line.
    fn max_memory_mib(&self) -> f64 {
        0.0
    }
}
