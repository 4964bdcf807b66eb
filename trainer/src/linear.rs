//! A one-dimensional linear regression, small enough to train anywhere.

use rand::Rng;

use crate::{
    checkpoint::Checkpointable,
    error::{Result, TrainErr},
    loss::LossTerms,
    model::{Batch, Mode, Model},
};

/// `y = w * x + b` trained under MSE with an L2 penalty on `w`.
///
/// Parameters are laid out flat as `[w, b]`, gradients as `[dw, db]`. The
/// forward pass reports two terms, `loss_mse` and `loss_l2`.
#[derive(Debug, Clone)]
pub struct LinearRegression {
    params: [f32; 2],
    grads: [f32; 2],
    l2: f32,
    mode: Mode,
    cached: Option<(Vec<f32>, Vec<f32>)>,
}

impl LinearRegression {
    /// Creates a new `LinearRegression` model.
    ///
    /// # Arguments
    /// * `w` - The initial slope.
    /// * `b` - The initial intercept.
    /// * `l2` - Weight of the L2 penalty on `w`.
    pub fn new(w: f32, b: f32, l2: f32) -> Self {
        Self {
            params: [w, b],
            grads: [0.0; 2],
            l2,
            mode: Mode::Train,
            cached: None,
        }
    }

    #[inline]
    pub fn predict(&self, x: f32) -> f32 {
        let [w, b] = self.params;
        w * x + b
    }

    #[inline]
    pub fn weights(&self) -> [f32; 2] {
        self.params
    }
}

impl Model for LinearRegression {
    type Inputs = Vec<f32>;
    type Targets = Vec<f32>;

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;

        if mode == Mode::Eval {
            self.cached = None;
        }
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn forward(&mut self, xs: &Vec<f32>, ys: &Vec<f32>) -> Result<LossTerms> {
        if xs.len() != ys.len() {
            return Err(TrainErr::SizeMismatch {
                what: "targets",
                got: ys.len(),
                expected: xs.len(),
            });
        }

        if xs.is_empty() {
            return Err(TrainErr::collaborator("model", "empty batch"));
        }

        let n = xs.len() as f32;
        let mse = xs
            .iter()
            .zip(ys)
            .map(|(&x, &y)| (self.predict(x) - y).powi(2))
            .sum::<f32>()
            / n;

        let w = self.params[0];
        let mut terms = LossTerms::new();
        terms.insert("loss_mse", mse);
        terms.insert("loss_l2", self.l2 * w * w);

        if self.mode == Mode::Train {
            self.cached = Some((xs.clone(), ys.clone()));
        }

        Ok(terms)
    }

    fn backward(&mut self, _objective: f32) -> Result<()> {
        let Some((xs, ys)) = self.cached.take() else {
            return Err(TrainErr::collaborator(
                "model",
                "backward called without a training forward pass",
            ));
        };

        let two_over_n = 2.0 / xs.len() as f32;
        let mut dw = 0.0_f32;
        let mut db = 0.0_f32;

        for (&x, &y) in xs.iter().zip(&ys) {
            let err = self.predict(x) - y;
            dw += err * x;
            db += err;
        }

        self.grads[0] += dw * two_over_n + 2.0 * self.l2 * self.params[0];
        self.grads[1] += db * two_over_n;
        Ok(())
    }

    fn parameters(&mut self) -> (&mut [f32], &mut [f32]) {
        (&mut self.params, &mut self.grads)
    }
}

impl Checkpointable for LinearRegression {
    fn state_dict(&self) -> Vec<f32> {
        self.params.to_vec()
    }

    fn load_state_dict(&mut self, state: &[f32]) -> Result<()> {
        if state.len() != self.params.len() {
            return Err(TrainErr::SizeMismatch {
                what: "model state",
                got: state.len(),
                expected: self.params.len(),
            });
        }

        self.params.copy_from_slice(state);
        Ok(())
    }
}

/// Samples noisy points of `y = w * x + b` with `x` in `[-1, 1)`.
///
/// # Arguments
/// * `rng` - The source of randomness, seed it for reproducible data.
/// * `line` - The `(w, b)` pair to sample from.
/// * `noise` - Half-width of the uniform noise added to `y`.
/// * `batch_size` - Samples per batch.
/// * `n_batches` - Amount of batches.
pub fn synthetic_batches<R: Rng>(
    rng: &mut R,
    (w, b): (f32, f32),
    noise: f32,
    batch_size: usize,
    n_batches: usize,
) -> Vec<Batch<Vec<f32>, Vec<f32>>> {
    (0..n_batches)
        .map(|i| {
            let xs: Vec<f32> = (0..batch_size).map(|_| rng.random_range(-1.0..1.0)).collect();
            let ys = xs
                .iter()
                .map(|x| {
                    let eps = if noise > 0.0 {
                        rng.random_range(-noise..noise)
                    } else {
                        0.0
                    };
                    w * x + b + eps
                })
                .collect();

            let start = i * batch_size;
            Batch::new(xs, ys, (start..start + batch_size).collect())
        })
        .collect()
}
