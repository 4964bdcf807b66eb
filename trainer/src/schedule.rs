//! Learning-rate schedules.

/// When the schedule advances relative to the optimizer update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepOrder {
    /// Advance at the start of the iteration, before the update.
    BeforeUpdate,
    /// Advance right after the update.
    #[default]
    AfterUpdate,
}

/// A step-dependent learning rate.
pub trait LrSchedule {
    /// The learning rate for the current step.
    fn learning_rate(&self) -> f64;

    /// Moves to the next step and returns its learning rate.
    fn advance(&mut self) -> f64;

    fn step_order(&self) -> StepOrder {
        StepOrder::AfterUpdate
    }
}

#[derive(Debug, Clone)]
pub struct ConstantLr {
    lr: f64,
    order: StepOrder,
}

impl ConstantLr {
    pub fn new(lr: f64) -> Self {
        Self {
            lr,
            order: StepOrder::default(),
        }
    }

    pub fn with_step_order(mut self, order: StepOrder) -> Self {
        self.order = order;
        self
    }
}

impl LrSchedule for ConstantLr {
    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn advance(&mut self) -> f64 {
        self.lr
    }

    fn step_order(&self) -> StepOrder {
        self.order
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WarmupMethod {
    /// Scale by a fixed factor during warmup.
    Constant,
    /// Ramp linearly from the warmup factor up to 1.
    #[default]
    Linear,
}

/// Warmup followed by a multiplicative decay at every milestone.
///
/// `lr(step) = base_lr * warmup(step) * gamma ^ (milestones <= step)`
#[derive(Debug, Clone)]
pub struct WarmupMultiStep {
    base_lr: f64,
    milestones: Vec<usize>,
    gamma: f64,
    warmup_factor: f64,
    warmup_iters: usize,
    method: WarmupMethod,
    order: StepOrder,
    step: usize,
}

impl WarmupMultiStep {
    /// Creates a new `WarmupMultiStep` schedule at step 0.
    ///
    /// # Arguments
    /// * `base_lr` - The learning rate after warmup and before the first milestone.
    /// * `milestones` - Steps at which the rate is multiplied by `gamma`, sorted on creation.
    /// * `gamma` - The decay factor.
    /// * `warmup_factor` - The factor applied at step 0.
    /// * `warmup_iters` - How many steps the warmup lasts.
    /// * `method` - How the factor evolves during warmup.
    pub fn new(
        base_lr: f64,
        mut milestones: Vec<usize>,
        gamma: f64,
        warmup_factor: f64,
        warmup_iters: usize,
        method: WarmupMethod,
    ) -> Self {
        milestones.sort_unstable();

        Self {
            base_lr,
            milestones,
            gamma,
            warmup_factor,
            warmup_iters,
            method,
            order: StepOrder::default(),
            step: 0,
        }
    }

    /// Fast-forwards the schedule, e.g. when resuming a run.
    pub fn starting_at(mut self, step: usize) -> Self {
        self.step = step;
        self
    }

    pub fn with_step_order(mut self, order: StepOrder) -> Self {
        self.order = order;
        self
    }

    #[inline]
    pub fn step(&self) -> usize {
        self.step
    }

    fn lr_at(&self, step: usize) -> f64 {
        let warmup = if step < self.warmup_iters {
            match self.method {
                WarmupMethod::Constant => self.warmup_factor,
                WarmupMethod::Linear => {
                    let alpha = step as f64 / self.warmup_iters as f64;
                    self.warmup_factor * (1.0 - alpha) + alpha
                }
            }
        } else {
            1.0
        };

        let decays = self.milestones.partition_point(|&m| m <= step);
        self.base_lr * warmup * self.gamma.powi(decays as i32)
    }
}

impl LrSchedule for WarmupMultiStep {
    fn learning_rate(&self) -> f64 {
        self.lr_at(self.step)
    }

    fn advance(&mut self) -> f64 {
        self.step += 1;
        self.learning_rate()
    }

    fn step_order(&self) -> StepOrder {
        self.order
    }
}
