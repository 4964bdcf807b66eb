use std::{num::NonZeroUsize, sync::Arc};

use futures::future;
use parking_lot::Mutex;

use trainer::{
    Batch, CheckpointSink, ConstantLr, GradientDescent, InMemorySource, LocalGroup, LossTerms,
    Mode, Model, ProcessGroup, Result, SingleProcess, StepOrder, TelemetrySink, TrainErr,
    TrainState, Trainer, TrainerConfig, WarmupMethod, WarmupMultiStep,
};

type Source = InMemorySource<f32, f32>;

/// Reports fixed loss terms and a unit gradient on its single parameter.
#[derive(Debug)]
struct FixedModel {
    terms: Vec<(String, f32)>,
    params: [f32; 1],
    grads: [f32; 1],
    mode: Mode,
    modes: Vec<Mode>,
    eval_forwards: usize,
    backwards: usize,
}

impl FixedModel {
    fn new(terms: &[(&str, f32)]) -> Self {
        Self {
            terms: terms.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
            params: [0.0],
            grads: [0.0],
            mode: Mode::Eval,
            modes: Vec::new(),
            eval_forwards: 0,
            backwards: 0,
        }
    }
}

impl Model for FixedModel {
    type Inputs = f32;
    type Targets = f32;

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        self.modes.push(mode);
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn forward(&mut self, _inputs: &f32, _targets: &f32) -> Result<LossTerms> {
        if self.mode == Mode::Eval {
            self.eval_forwards += 1;
        }

        Ok(self.terms.iter().map(|(n, v)| (n.as_str(), *v)).collect())
    }

    fn backward(&mut self, _objective: f32) -> Result<()> {
        assert_eq!(self.mode, Mode::Train);
        self.backwards += 1;
        self.grads[0] += 1.0;
        Ok(())
    }

    fn parameters(&mut self) -> (&mut [f32], &mut [f32]) {
        (&mut self.params, &mut self.grads)
    }
}

#[derive(Debug, Default)]
struct RecordingCheckpointer {
    saves: Vec<(String, usize)>,
}

impl<M, O> CheckpointSink<M, O> for RecordingCheckpointer {
    fn save(&mut self, name: &str, _model: &M, _optimizer: &O, state: &TrainState) -> Result<()> {
        self.saves.push((name.to_string(), state.iteration));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Scalar(String, usize),
    Group(String, Vec<String>, usize),
    Close,
}

#[derive(Debug, Clone, Default)]
struct RecordingTelemetry {
    events: Arc<Mutex<Vec<Event>>>,
}

impl TelemetrySink for RecordingTelemetry {
    fn emit_scalar(&mut self, series: &str, _value: f64, step: usize) -> Result<()> {
        self.events
            .lock()
            .push(Event::Scalar(series.to_string(), step));
        Ok(())
    }

    fn emit_scalar_group(
        &mut self,
        group: &str,
        values: &[(String, f64)],
        step: usize,
    ) -> Result<()> {
        let names = values.iter().map(|(n, _)| n.clone()).collect();
        self.events
            .lock()
            .push(Event::Group(group.to_string(), names, step));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.events.lock().push(Event::Close);
        Ok(())
    }
}

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn nz(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

fn source(len: usize) -> Source {
    let batches = (0..len).map(|i| Batch::new(i as f32, 0.0, vec![i])).collect();
    InMemorySource::once(batches)
}

fn config(checkpoint_period: usize, test_period: usize) -> TrainerConfig {
    TrainerConfig {
        checkpoint_period: nz(checkpoint_period),
        test_period,
        ..Default::default()
    }
}

#[tokio::test]
async fn checkpoints_on_period_and_at_the_end() {
    init_logs();

    let model = FixedModel::new(&[("loss_x", 4.0)]);
    let mut trainer = Trainer::new(
        config(5, 0),
        model,
        GradientDescent::new(0.1),
        ConstantLr::new(0.1),
        SingleProcess,
    )
    .unwrap();

    let mut ckpt = RecordingCheckpointer::default();
    let mut state = TrainState::default();

    let report = trainer
        .run(&mut source(10), None::<&mut Source>, &mut ckpt, &mut state)
        .await
        .unwrap();

    assert_eq!(
        ckpt.saves,
        [
            ("model_0000005".to_string(), 5),
            ("model_0000010".to_string(), 10),
            ("model_final".to_string(), 10),
        ]
    );
    assert_eq!(state.iteration, 10);
    assert_eq!(report.iterations, 10);
    assert_eq!(report.final_iter, 10);
    assert!(report.validations.is_empty());
    assert_eq!(trainer.model().backwards, 10);
}

#[tokio::test]
async fn constant_loss_averages_to_itself() {
    init_logs();

    let model = FixedModel::new(&[("loss_x", 4.0)]);
    let mut trainer = Trainer::new(
        config(100, 0),
        model,
        GradientDescent::new(0.1),
        ConstantLr::new(0.1),
        SingleProcess,
    )
    .unwrap();

    let mut ckpt = RecordingCheckpointer::default();
    trainer
        .run(
            &mut source(5),
            None::<&mut Source>,
            &mut ckpt,
            &mut TrainState::default(),
        )
        .await
        .unwrap();

    let meters = trainer.meters();
    assert_eq!(meters.global_average("loss_x").unwrap(), 4.0);
    assert_eq!(meters.global_average("loss").unwrap(), 4.0);
    assert_eq!(meters.get("time").unwrap().count(), 5);
    assert_eq!(meters.get("data").unwrap().count(), 5);
    assert!(matches!(
        meters.global_average("loss_y"),
        Err(TrainErr::MetricNotFound { .. })
    ));
}

#[tokio::test]
async fn resumed_run_continues_numbering() {
    init_logs();

    let model = FixedModel::new(&[("loss_x", 1.0)]);
    let mut trainer = Trainer::new(
        config(1, 0),
        model,
        GradientDescent::new(0.1),
        ConstantLr::new(0.1),
        SingleProcess,
    )
    .unwrap();

    let mut ckpt = RecordingCheckpointer::default();
    let mut state = TrainState::new(3).with_extra("run", "resumed");

    let report = trainer
        .run(&mut source(6), None::<&mut Source>, &mut ckpt, &mut state)
        .await
        .unwrap();

    let iterations: Vec<_> = ckpt.saves.iter().map(|(_, i)| *i).collect();
    assert_eq!(iterations, [4, 5, 6, 6]);
    assert_eq!(ckpt.saves[0].0, "model_0000004");
    assert_eq!(report.start_iter, 3);
    assert_eq!(report.iterations, 3);
    assert_eq!(state.iteration, 6);
    assert_eq!(state.extra["run"], "resumed");
}

#[tokio::test]
async fn nothing_left_to_run() {
    init_logs();

    let telemetry = RecordingTelemetry::default();
    let events = telemetry.events.clone();

    let mut trainer = Trainer::new(
        config(1, 0),
        FixedModel::new(&[("loss_x", 1.0)]),
        GradientDescent::new(0.1),
        ConstantLr::new(0.1),
        SingleProcess,
    )
    .unwrap()
    .with_telemetry(telemetry);

    let mut ckpt = RecordingCheckpointer::default();
    let mut state = TrainState::new(4);

    let report = trainer
        .run(&mut source(4), None::<&mut Source>, &mut ckpt, &mut state)
        .await
        .unwrap();

    assert_eq!(report.iterations, 0);
    assert_eq!(report.final_iter, 4);
    assert!(ckpt.saves.is_empty());
    assert_eq!(*events.lock(), [Event::Close]);
}

#[tokio::test]
async fn validation_runs_on_its_period_with_fresh_meters() {
    init_logs();

    let telemetry = RecordingTelemetry::default();
    let events = telemetry.events.clone();

    let model = FixedModel::new(&[("loss_b", 1.0), ("loss_a", 2.0)]);
    let mut trainer = Trainer::new(
        config(100, 2),
        model,
        GradientDescent::new(0.1),
        ConstantLr::new(0.1),
        SingleProcess,
    )
    .unwrap()
    .with_telemetry(telemetry);

    let mut ckpt = RecordingCheckpointer::default();
    let mut val = source(3);

    let report = trainer
        .run(
            &mut source(6),
            Some(&mut val),
            &mut ckpt,
            &mut TrainState::default(),
        )
        .await
        .unwrap();

    let at: Vec<_> = report.validations.iter().map(|v| v.iteration).collect();
    assert_eq!(at, [2, 4, 6]);

    for v in &report.validations {
        assert!(v.authoritative);
        assert_eq!(v.batches, 3);
        assert_eq!(v.val_loss_global, 3.0);
        assert_eq!(v.val_loss_avg, 3.0);
        assert_eq!(v.train_loss_avg, 3.0);
    }

    let model = trainer.model();
    assert_eq!(model.eval_forwards, 9);
    assert_eq!(model.backwards, 6);
    assert_eq!(model.mode(), Mode::Train);
    assert_eq!(
        model.modes,
        [
            Mode::Train,
            Mode::Eval,
            Mode::Train,
            Mode::Eval,
            Mode::Train,
            Mode::Eval,
            Mode::Train,
        ]
    );

    let globals: Vec<_> = events
        .lock()
        .iter()
        .filter_map(|e| match e {
            Event::Group(g, names, step) if g == "train/global" => Some((names.clone(), *step)),
            _ => None,
        })
        .collect();
    assert_eq!(globals.len(), 3);
    assert_eq!(globals[0].0, ["loss_train", "loss_val", "loss_val_avg"]);
    assert_eq!(globals[2].1, 6);
}

#[tokio::test]
async fn empty_validation_source_is_rejected() {
    let mut trainer = Trainer::new(
        config(100, 2),
        FixedModel::new(&[("loss_x", 1.0)]),
        GradientDescent::new(0.1),
        ConstantLr::new(0.1),
        SingleProcess,
    )
    .unwrap();

    let err = trainer
        .run(
            &mut source(4),
            Some(&mut source(0)),
            &mut RecordingCheckpointer::default(),
            &mut TrainState::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TrainErr::InvalidConfig(_)));
}

#[tokio::test]
async fn telemetry_follows_the_log_period() {
    init_logs();

    let telemetry = RecordingTelemetry::default();
    let events = telemetry.events.clone();

    let cfg = TrainerConfig {
        log_period: nz(2),
        telemetry_tag: "run".to_string(),
        ..config(100, 0)
    };
    let mut trainer = Trainer::new(
        cfg,
        FixedModel::new(&[("loss_x", 1.0)]),
        GradientDescent::new(0.1),
        ConstantLr::new(0.1),
        SingleProcess,
    )
    .unwrap()
    .with_telemetry(telemetry);

    trainer
        .run(
            &mut source(5),
            None::<&mut Source>,
            &mut RecordingCheckpointer::default(),
            &mut TrainState::default(),
        )
        .await
        .unwrap();

    let losses = vec!["loss_x_avg".to_string()];
    let mut expected = Vec::new();
    for step in [2, 4, 5] {
        expected.push(Event::Scalar("run/learning_rate".into(), step));
        expected.push(Event::Scalar("run/loss_avg".into(), step));
        expected.push(Event::Group("run/losses".into(), losses.clone(), step));
    }
    expected.push(Event::Close);

    assert_eq!(*events.lock(), expected);
}

#[tokio::test]
async fn malformed_loss_terms_stop_the_run() {
    let mut trainer = Trainer::new(
        config(100, 0),
        FixedModel::new(&[("loss_x", f32::INFINITY)]),
        GradientDescent::new(0.1),
        ConstantLr::new(0.1),
        SingleProcess,
    )
    .unwrap();

    let mut state = TrainState::default();
    let err = trainer
        .run(
            &mut source(3),
            None::<&mut Source>,
            &mut RecordingCheckpointer::default(),
            &mut state,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TrainErr::NonFiniteLoss { .. }));
    assert_eq!(state.iteration, 1);

    let mut trainer = Trainer::new(
        config(100, 0),
        FixedModel::new(&[]),
        GradientDescent::new(0.1),
        ConstantLr::new(0.1),
        SingleProcess,
    )
    .unwrap();

    let err = trainer
        .run(
            &mut source(3),
            None::<&mut Source>,
            &mut RecordingCheckpointer::default(),
            &mut TrainState::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TrainErr::EmptyLossTerms));
}

struct FailingCheckpointer;

impl<M, O> CheckpointSink<M, O> for FailingCheckpointer {
    fn save(&mut self, _name: &str, _model: &M, _optimizer: &O, _state: &TrainState) -> Result<()> {
        Err(TrainErr::collaborator("checkpointer", "disk full"))
    }
}

#[tokio::test]
async fn collaborator_failures_propagate() {
    let mut trainer = Trainer::new(
        config(2, 0),
        FixedModel::new(&[("loss_x", 1.0)]),
        GradientDescent::new(0.1),
        ConstantLr::new(0.1),
        SingleProcess,
    )
    .unwrap();

    let mut state = TrainState::default();
    let err = trainer
        .run(
            &mut source(5),
            None::<&mut Source>,
            &mut FailingCheckpointer,
            &mut state,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TrainErr::Collaborator {
            what: "checkpointer",
            ..
        }
    ));
    assert_eq!(state.iteration, 2);
    assert_eq!(err.to_string(), "checkpointer failed: disk full");
}

async fn first_update(order: StepOrder) -> f32 {
    // lr is 1.0 at step 0 and 0.5 from step 1 on
    let schedule = WarmupMultiStep::new(1.0, vec![1], 0.5, 1.0, 0, WarmupMethod::Constant)
        .with_step_order(order);

    let mut trainer = Trainer::new(
        config(100, 0),
        FixedModel::new(&[("loss_x", 1.0)]),
        GradientDescent::new(0.0),
        schedule,
        SingleProcess,
    )
    .unwrap();

    trainer
        .run(
            &mut source(1),
            None::<&mut Source>,
            &mut RecordingCheckpointer::default(),
            &mut TrainState::default(),
        )
        .await
        .unwrap();

    trainer.model().params[0]
}

#[tokio::test]
async fn step_order_decides_the_first_learning_rate() {
    assert_eq!(first_update(StepOrder::AfterUpdate).await, -1.0);
    assert_eq!(first_update(StepOrder::BeforeUpdate).await, -0.5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ranks_log_the_mean_loss() {
    init_logs();

    let groups = LocalGroup::new(nz(2));

    let tasks: Vec<_> = groups
        .into_iter()
        .map(|group| {
            tokio::spawn(async move {
                let loss = group.rank() as f32 + 1.0;
                let mut trainer = Trainer::new(
                    config(2, 2),
                    FixedModel::new(&[("loss_x", loss)]),
                    GradientDescent::new(0.1),
                    ConstantLr::new(0.1),
                    group,
                )
                .unwrap();

                let mut ckpt = RecordingCheckpointer::default();
                let mut val = source(2);
                let report = trainer
                    .run(
                        &mut source(4),
                        Some(&mut val),
                        &mut ckpt,
                        &mut TrainState::default(),
                    )
                    .await
                    .unwrap();

                (trainer, ckpt, report)
            })
        })
        .collect();

    let results: Vec<_> = future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let (root, root_ckpt, root_report) = &results[0];
    assert_eq!(root.meters().global_average("loss_x").unwrap(), 1.5);
    assert_eq!(root_report.validations.len(), 2);
    assert_eq!(root_report.validations[0].val_loss_global, 1.5);
    assert!(root_report.validations.iter().all(|v| v.authoritative));

    let (_, peer_ckpt, peer_report) = &results[1];
    assert_eq!(root_ckpt.saves, peer_ckpt.saves);
    assert_eq!(peer_report.validations.len(), 2);
    assert!(peer_report.validations.iter().all(|v| !v.authoritative));
}
