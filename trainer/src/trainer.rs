use std::time::{Duration, Instant};

use log::{debug, info};

use crate::{
    checkpoint::CheckpointSink,
    config::TrainerConfig,
    data::DataSource,
    error::{Result, TrainErr},
    group::{COORDINATOR, ProcessGroup},
    loss::RESERVED_NAMES,
    meters::Meters,
    model::{Mode, Model},
    optimizer::Optimizer,
    reduce::reduce_loss_terms,
    schedule::{LrSchedule, StepOrder},
    state::TrainState,
    telemetry::{NullTelemetry, TelemetrySink},
    validation::{record_losses, validate},
};

const FINAL_CHECKPOINT: &str = "model_final";

/// Summary of one validation cycle.
///
/// The losses are group averages only when `authoritative` is set, which is
/// the case on the coordinator. Other ranks see unspecified values.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub iteration: usize,
    pub authoritative: bool,
    /// Windowed average of the training loss when validation started.
    pub train_loss_avg: f64,
    pub val_loss_global: f64,
    pub val_loss_avg: f64,
    pub batches: usize,
}

/// What a call to `Trainer::run` did.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub start_iter: usize,
    pub final_iter: usize,
    pub iterations: usize,
    pub total_time: Duration,
    pub secs_per_iter: f64,
    pub validations: Vec<ValidationReport>,
}

/// Drives the iterate-compute-update cycle of one rank.
///
/// Every rank of the group runs its own `Trainer` in lockstep: each iteration
/// reduces the loss terms and validation adds two barriers. Only the
/// coordinator logs status lines and emits telemetry.
pub struct Trainer<M, O, G> {
    cfg: TrainerConfig,
    model: M,
    optimizer: O,
    schedule: Box<dyn LrSchedule + Send>,
    group: G,
    telemetry: Box<dyn TelemetrySink + Send>,
    meters: Meters,
}

impl<M, O, G> Trainer<M, O, G>
where
    M: Model,
    O: Optimizer,
    G: ProcessGroup,
{
    /// Creates a new `Trainer`, without telemetry.
    ///
    /// # Arguments
    /// * `cfg` - The cadences of the run.
    /// * `model` - The model to train.
    /// * `optimizer` - The update rule applied to the model's parameters.
    /// * `schedule` - The learning-rate schedule driving the optimizer.
    /// * `group` - The process group of this rank.
    ///
    /// # Errors
    /// `InvalidConfig` if `cfg` doesn't validate.
    pub fn new<S>(cfg: TrainerConfig, model: M, optimizer: O, schedule: S, group: G) -> Result<Self>
    where
        S: LrSchedule + Send + 'static,
    {
        cfg.validate()?;

        Ok(Self {
            meters: Meters::new(cfg.window_size),
            cfg,
            model,
            optimizer,
            schedule: Box::new(schedule),
            group,
            telemetry: Box::new(NullTelemetry),
        })
    }

    pub fn with_telemetry<T>(mut self, telemetry: T) -> Self
    where
        T: TelemetrySink + Send + 'static,
    {
        self.telemetry = Box::new(telemetry);
        self
    }

    /// The training meters. Outside the coordinator they don't hold group
    /// averages.
    pub fn meters(&self) -> &Meters {
        &self.meters
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    pub fn group(&self) -> &G {
        &self.group
    }

    /// Takes the trainer apart, e.g. to shut the process group down.
    pub fn into_parts(self) -> (M, O, G) {
        (self.model, self.optimizer, self.group)
    }

    fn is_coordinator(&self) -> bool {
        self.group.rank() == COORDINATOR
    }

    /// Trains until `data` is exhausted.
    ///
    /// Iterations are numbered from `state.iteration + 1` up to `data.len()`,
    /// `state.iteration` is updated as soon as an iteration starts.
    ///
    /// # Arguments
    /// * `data` - The training batches, its length is the last iteration.
    /// * `val` - The held-out batches, validated every `test_period` iterations.
    /// * `checkpointer` - Receives a periodic and a final checkpoint.
    /// * `state` - The resumable state of the run.
    ///
    /// # Returns
    /// A report of the run.
    ///
    /// # Errors
    /// Any collaborator failure is returned as is, the run stops there.
    pub async fn run<D, V, C>(
        &mut self,
        data: &mut D,
        mut val: Option<&mut V>,
        checkpointer: &mut C,
        state: &mut TrainState,
    ) -> Result<TrainReport>
    where
        D: DataSource<Inputs = M::Inputs, Targets = M::Targets>,
        V: DataSource<Inputs = M::Inputs, Targets = M::Targets>,
        C: CheckpointSink<M, O>,
    {
        let start_iter = state.iteration;
        let max_iter = data.len();

        if let Some(val) = val.as_deref()
            && self.cfg.test_period > 0
            && val.is_empty()
        {
            return Err(TrainErr::InvalidConfig(
                "validation is enabled but the validation source is empty".into(),
            ));
        }

        info!(rank = self.group.rank(); "start training at iteration {start_iter} of {max_iter}");

        self.model.set_mode(Mode::Train);
        let order = self.schedule.step_order();
        self.optimizer.set_learning_rate(self.schedule.learning_rate());

        let start_training = Instant::now();
        let mut end = Instant::now();
        let mut iteration = start_iter;
        let mut validations = Vec::new();

        for batch in data.batches(start_iter) {
            let data_time = end.elapsed();
            iteration += 1;
            state.iteration = iteration;

            if order == StepOrder::BeforeUpdate {
                let lr = self.schedule.advance();
                self.optimizer.set_learning_rate(lr);
            }

            let (terms, objective) = {
                let batch = self.model.to_device(batch?)?;
                let terms = self.model.forward(&batch.inputs, &batch.targets)?;
                let objective = terms.total()?;
                (terms, objective)
            };

            let reduced = reduce_loss_terms(&mut self.group, &terms).await?;
            record_losses(&mut self.meters, &reduced);

            let (_, grads) = self.model.parameters();
            self.optimizer.clear_gradients(grads);
            self.model.backward(objective)?;
            let (params, grads) = self.model.parameters();
            self.optimizer.apply_step(params, grads)?;

            if order == StepOrder::AfterUpdate {
                let lr = self.schedule.advance();
                self.optimizer.set_learning_rate(lr);
            }

            let batch_time = end.elapsed();
            end = Instant::now();
            self.meters.update([
                ("time", batch_time.as_secs_f64()),
                ("data", data_time.as_secs_f64()),
            ]);

            let eta_secs = self.meters.global_average("time")? * max_iter.saturating_sub(iteration) as f64;
            let eta = format_duration(eta_secs);

            if self.cfg.should_log(iteration, max_iter) && self.is_coordinator() {
                self.report_progress(iteration, &eta)?;
            }

            if self.cfg.should_checkpoint(iteration) {
                let name = format!("model_{iteration:07}");
                checkpointer.save(&name, &self.model, &self.optimizer, state)?;
            }

            if self.cfg.should_validate(iteration)
                && let Some(val) = val.as_deref_mut()
            {
                let report = self.run_validation(val, iteration, &eta).await?;
                validations.push(report);
            }

            if iteration == max_iter {
                checkpointer.save(FINAL_CHECKPOINT, &self.model, &self.optimizer, state)?;
            }
        }

        let total_time = start_training.elapsed();
        let iterations = iteration - start_iter;
        let secs_per_iter = total_time.as_secs_f64() / iterations.max(1) as f64;

        if self.is_coordinator() {
            info!(
                "Total training time: {} ({secs_per_iter:.4} s / it)",
                format_duration(total_time.as_secs_f64())
            );
        }
        self.telemetry.close()?;

        Ok(TrainReport {
            start_iter,
            final_iter: iteration,
            iterations,
            total_time,
            secs_per_iter,
            validations,
        })
    }

    fn report_progress(&mut self, iteration: usize, eta: &str) -> Result<()> {
        let tag = &self.cfg.telemetry_tag;
        let lr = self.optimizer.learning_rate();

        self.telemetry
            .emit_scalar(&format!("{tag}/learning_rate"), lr, iteration)?;
        self.telemetry.emit_scalar(
            &format!("{tag}/loss_avg"),
            self.meters.windowed_average("loss")?,
            iteration,
        )?;

        let terms: Vec<_> = self
            .meters
            .names()
            .filter(|name| !RESERVED_NAMES.contains(name))
            .map(|name| -> Result<(String, f64)> {
                let avg = self.meters.windowed_average(name)?;
                Ok((format!("{name}_avg"), avg))
            })
            .collect::<Result<_>>()?;
        self.telemetry
            .emit_scalar_group(&format!("{tag}/losses"), &terms, iteration)?;

        info!(
            "{}",
            status_line(
                eta,
                iteration,
                &self.meters,
                lr,
                self.model.max_memory_mib()
            )
        );

        Ok(())
    }

    async fn run_validation<V>(
        &mut self,
        val: &mut V,
        iteration: usize,
        eta: &str,
    ) -> Result<ValidationReport>
    where
        V: DataSource<Inputs = M::Inputs, Targets = M::Targets>,
    {
        debug!(rank = self.group.rank(); "validating at iteration {iteration}");

        self.group.barrier().await?;
        self.model.set_mode(Mode::Eval);

        let val_meters = validate(
            &mut self.model,
            val,
            &mut self.group,
            self.cfg.window_size,
        )
        .await?;

        let report = ValidationReport {
            iteration,
            authoritative: self.is_coordinator(),
            train_loss_avg: self.meters.windowed_average("loss")?,
            val_loss_global: val_meters.global_average("loss")?,
            val_loss_avg: val_meters.windowed_average("loss")?,
            batches: val_meters.get("loss")?.count(),
        };

        if self.is_coordinator() {
            let group = [
                ("loss_train".to_string(), report.train_loss_avg),
                ("loss_val".to_string(), report.val_loss_global),
                ("loss_val_avg".to_string(), report.val_loss_avg),
            ];
            let tag = &self.cfg.telemetry_tag;
            self.telemetry
                .emit_scalar_group(&format!("{tag}/global"), &group, iteration)?;
        }

        self.group.barrier().await?;

        if self.is_coordinator() {
            let line = status_line(
                eta,
                iteration,
                &val_meters,
                self.optimizer.learning_rate(),
                self.model.max_memory_mib(),
            );
            info!("[Validation]  {line}");
        }

        self.model.set_mode(Mode::Train);
        Ok(report)
    }
}

fn status_line(eta: &str, iteration: usize, meters: &Meters, lr: f64, mem_mib: f64) -> String {
    format!("eta: {eta}  iter: {iteration}  {meters}  lr: {lr:.6}  max mem: {mem_mib:.0}")
}

/// Formats seconds as `H:MM:SS`, prefixed by the days when there are any.
pub fn format_duration(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    let (days, rem) = (total / 86_400, total % 86_400);
    let (h, m, s) = (rem / 3600, rem % 3600 / 60, rem % 60);

    match days {
        0 => format!("{h}:{m:02}:{s:02}"),
        1 => format!("1 day, {h}:{m:02}:{s:02}"),
        _ => format!("{days} days, {h}:{m:02}:{s:02}"),
    }
}
