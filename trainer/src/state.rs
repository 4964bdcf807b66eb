use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Resumable state of a run, persisted with every checkpoint.
///
/// `iteration` is the number of the last iteration that started. Anything
/// else the surrounding tooling wants to carry across resumes lives in `extra`
/// and is flattened next to it on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainState {
    pub iteration: usize,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TrainState {
    /// Creates a state resuming after `iteration`.
    pub fn new(iteration: usize) -> Self {
        Self {
            iteration,
            extra: Map::new(),
        }
    }

    /// Attaches an extra field to the state.
    pub fn with_extra<V: Into<Value>>(mut self, key: &str, value: V) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}
