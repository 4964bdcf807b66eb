use std::{env, fs, io, num::NonZeroUsize, path::PathBuf};

use log::info;
use rand::{SeedableRng, rngs::StdRng};
use tokio::signal;

use trainer::{
    COORDINATOR, FileCheckpointer, GradientDescentWithMomentum, InMemorySource, JsonlTelemetry,
    LinearRegression, TcpGroup, Trainer, TrainerConfig, WarmupMethod, WarmupMultiStep,
    linear::synthetic_batches,
};

const DEFAULT_MASTER_ADDR: &str = "127.0.0.1:29500";
const DEFAULT_OUTPUT_DIR: &str = "output";
const SEED: u64 = 42;
const LINE: (f32, f32) = (2.0, 1.0);
const BATCH_SIZE: usize = 32;
const TRAIN_BATCHES: usize = 50;
const VAL_BATCHES: usize = 5;
const MAX_ITER: usize = 200;

fn env_usize(key: &str, default: usize) -> io::Result<usize> {
    match env::var(key) {
        Ok(v) => v.parse().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("invalid {key}={v}: {e}"))
        }),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let rank = env_usize("RANK", 0)?;
    let world_size = NonZeroUsize::new(env_usize("WORLD_SIZE", 1)?)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "WORLD_SIZE must be > 0"))?;
    let master_addr = env::var("MASTER_ADDR").unwrap_or_else(|_| DEFAULT_MASTER_ADDR.to_string());
    let output_dir =
        PathBuf::from(env::var("OUTPUT_DIR").unwrap_or_else(|_| DEFAULT_OUTPUT_DIR.to_string()));

    let cfg = match env::var("TRAIN_CONFIG") {
        Ok(path) => TrainerConfig::from_path(path)?,
        Err(_) => TrainerConfig::default(),
    };

    let is_coordinator = rank == COORDINATOR;

    // Every rank samples its own shard of the same distribution.
    let mut rng = StdRng::seed_from_u64(SEED + rank as u64);
    let train = synthetic_batches(&mut rng, LINE, 0.1, BATCH_SIZE, TRAIN_BATCHES);
    let val = synthetic_batches(&mut rng, LINE, 0.1, BATCH_SIZE, VAL_BATCHES);
    let mut train = InMemorySource::cycling(train, MAX_ITER)?;
    let mut val = InMemorySource::once(val);

    let mut model = LinearRegression::new(0.0, 0.0, 1e-4);
    let mut optimizer = GradientDescentWithMomentum::new(2, 0.05, 0.9);
    let mut checkpointer = FileCheckpointer::new(&output_dir, is_coordinator);

    // Ranks only train together when they resume from the same iteration,
    // the coordinator rejects peers that don't.
    let mut state = checkpointer
        .resume(&mut model, &mut optimizer)?
        .unwrap_or_default();

    let group = TcpGroup::connect(&master_addr, rank, world_size, state.iteration).await?;

    let schedule = WarmupMultiStep::new(
        0.05,
        vec![MAX_ITER * 2 / 3, MAX_ITER * 8 / 9],
        0.1,
        1.0 / 3.0,
        20,
        WarmupMethod::Linear,
    )
    .starting_at(state.iteration);

    let mut trainer = Trainer::new(cfg, model, optimizer, schedule, group)?;
    if is_coordinator {
        fs::create_dir_all(&output_dir)?;
        let telemetry = JsonlTelemetry::create(output_dir.join("telemetry.jsonl"))?;
        trainer = trainer.with_telemetry(telemetry);
    }

    let report = tokio::select! {
        ret = trainer.run(&mut train, Some(&mut val), &mut checkpointer, &mut state) => ret?,
        _ = signal::ctrl_c() => {
            info!("received SIGTERM");
            return Ok(());
        }
    };

    info!(
        "trained {} iterations, final weights {:?}",
        report.iterations,
        trainer.model().weights()
    );

    info!("wrapping up, disconnecting...");
    let (_, _, group) = trainer.into_parts();
    group.shutdown().await?;

    Ok(())
}
