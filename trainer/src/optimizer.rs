//! Update rules over flat parameter buffers.

use crate::{
    checkpoint::Checkpointable,
    error::{Result, TrainErr},
};

/// Defines the strategy for updating model parameters based on calculated gradients.
pub trait Optimizer {
    /// Resets the gradients before a backward pass.
    fn clear_gradients(&mut self, grads: &mut [f32]) {
        grads.fill(0.0);
    }

    /// Updates the provided parameters using the accumulated gradients.
    ///
    /// # Arguments
    /// * `params` - The parameters to update.
    /// * `grads` - The model's gradients.
    ///
    /// # Returns
    /// An error if there's a mismatch in the sizes of `params` and `grads`.
    fn apply_step(&mut self, params: &mut [f32], grads: &[f32]) -> Result<()>;

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, lr: f64);
}

fn check_len(params: &[f32], grads: &[f32]) -> Result<()> {
    if params.len() != grads.len() {
        return Err(TrainErr::SizeMismatch {
            what: "gradients",
            got: grads.len(),
            expected: params.len(),
        });
    }

    Ok(())
}

#[derive(Debug)]
pub struct GradientDescent {
    learning_rate: f64,
}

impl GradientDescent {
    /// Creates a new `GradientDescent` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    ///
    /// # Returns
    /// A new `GradientDescent` instance.
    pub fn new(learning_rate: f64) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for GradientDescent {
    fn apply_step(&mut self, params: &mut [f32], grads: &[f32]) -> Result<()> {
        check_len(params, grads)?;

        let lr = self.learning_rate as f32;

        for (p, g) in params.iter_mut().zip(grads) {
            *p -= lr * g;
        }

        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }
}

impl Checkpointable for GradientDescent {
    fn state_dict(&self) -> Vec<f32> {
        Vec::new()
    }

    fn load_state_dict(&mut self, state: &[f32]) -> Result<()> {
        if !state.is_empty() {
            return Err(TrainErr::SizeMismatch {
                what: "optimizer state",
                got: state.len(),
                expected: 0,
            });
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct GradientDescentWithMomentum {
    learning_rate: f64,
    momentum: f32,
    velocity: Box<[f32]>,
}

impl GradientDescentWithMomentum {
    /// Creates a new `GradientDescentWithMomentum` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `momentum` - Hyperparameter to the optimization algorithm.
    ///
    /// # Returns
    /// A new `GradientDescentWithMomentum` instance.
    pub fn new(len: usize, learning_rate: f64, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: vec![0.; len].into_boxed_slice(),
        }
    }
}

impl Optimizer for GradientDescentWithMomentum {
    fn apply_step(&mut self, params: &mut [f32], grads: &[f32]) -> Result<()> {
        check_len(params, grads)?;
        check_len(params, &self.velocity)?;

        let lr = self.learning_rate as f32;
        let mu = self.momentum;

        params
            .iter_mut()
            .zip(grads)
            .zip(self.velocity.iter_mut())
            .for_each(|((p, g), v)| {
                *v = (mu * *v) + g;
                *p -= lr * *v;
            });

        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }
}

impl Checkpointable for GradientDescentWithMomentum {
    fn state_dict(&self) -> Vec<f32> {
        self.velocity.to_vec()
    }

    fn load_state_dict(&mut self, state: &[f32]) -> Result<()> {
        if state.len() != self.velocity.len() {
            return Err(TrainErr::SizeMismatch {
                what: "optimizer state",
                got: state.len(),
                expected: self.velocity.len(),
            });
        }

        self.velocity.copy_from_slice(state);
        Ok(())
    }
}
