pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod group;
pub mod linear;
pub mod loss;
pub mod meters;
pub mod model;
pub mod optimizer;
pub mod reduce;
pub mod schedule;
pub mod state;
pub mod telemetry;
pub mod trainer;
pub mod validation;

pub use checkpoint::{CheckpointSink, Checkpointable, FileCheckpointer};
pub use config::TrainerConfig;
pub use data::{DataSource, InMemorySource};
pub use error::{Result, TrainErr};
pub use group::{COORDINATOR, LocalGroup, ProcessGroup, SingleProcess, TcpGroup};
pub use linear::LinearRegression;
pub use loss::{LossTerms, ReducedLossTerms};
pub use meters::{Meters, SmoothedValue};
pub use model::{Batch, Mode, Model};
pub use optimizer::{GradientDescent, GradientDescentWithMomentum, Optimizer};
pub use reduce::reduce_loss_terms;
pub use schedule::{ConstantLr, LrSchedule, StepOrder, WarmupMethod, WarmupMultiStep};
pub use state::TrainState;
pub use telemetry::{JsonlTelemetry, NullTelemetry, TelemetrySink};
pub use trainer::{TrainReport, Trainer, ValidationReport};
pub use validation::validate;
