use std::{error::Error, fmt, io};

/// The trainer's result type.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// A boxed error coming from a collaborator (model, optimizer, sinks...).
pub type BoxErr = Box<dyn Error + Send + Sync + 'static>;

/// Training loop failures.
///
/// Every variant is fatal for the run, nothing in the loop retries.
#[derive(Debug)]
pub enum TrainErr {
    Io(io::Error),
    Json(serde_json::Error),
    MetricNotFound {
        name: String,
    },
    EmptyLossTerms,
    NonFiniteLoss {
        term: String,
        value: f32,
    },
    ReservedLossTerm {
        term: String,
    },
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    InvalidRank {
        rank: usize,
        world_size: usize,
    },
    UnexpectedMessage {
        from: String,
        got: &'static str,
    },
    InvalidConfig(String),
    Collaborator {
        what: &'static str,
        source: BoxErr,
    },
}

impl TrainErr {
    /// Wraps an error raised by an external collaborator.
    ///
    /// # Arguments
    /// * `what` - Which collaborator failed, e.g. `"model"`.
    /// * `source` - The original error, kept as the error source.
    pub fn collaborator<E>(what: &'static str, source: E) -> Self
    where
        E: Into<BoxErr>,
    {
        Self::Collaborator {
            what,
            source: source.into(),
        }
    }
}

impl fmt::Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainErr::Io(e) => write!(f, "io error: {e}"),
            TrainErr::Json(e) => write!(f, "json error: {e}"),
            TrainErr::MetricNotFound { name } => write!(f, "metric not found: {name}"),
            TrainErr::EmptyLossTerms => write!(f, "the model returned no loss terms"),
            TrainErr::NonFiniteLoss { term, value } => {
                write!(f, "loss term {term} is not finite: {value}")
            }
            TrainErr::ReservedLossTerm { term } => {
                write!(f, "loss term name {term} is reserved by the trainer")
            }
            TrainErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(f, "size mismatch for {what}: got {got}, expected {expected}"),
            TrainErr::InvalidRank { rank, world_size } => {
                write!(f, "rank {rank} is out of range for world size {world_size}")
            }
            TrainErr::UnexpectedMessage { from, got } => {
                write!(f, "unexpected message from {from}: got {got}")
            }
            TrainErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            TrainErr::Collaborator { what, source } => write!(f, "{what} failed: {source}"),
        }
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainErr::Io(e) => Some(e),
            TrainErr::Json(e) => Some(e),
            TrainErr::Collaborator { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for TrainErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for TrainErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<TrainErr> for io::Error {
    fn from(value: TrainErr) -> Self {
        match value {
            TrainErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
