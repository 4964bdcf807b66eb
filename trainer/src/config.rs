use std::{fs, num::NonZeroUsize, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainErr};

const DEFAULT_CHECKPOINT_PERIOD: usize = 2500;
const DEFAULT_LOG_PERIOD: usize = 20;
const DEFAULT_WINDOW_SIZE: usize = 20;

/// Cadences and reporting knobs of a training run.
///
/// Every rank of a process group must use the same configuration, the
/// periodic branches of the loop are taken on the shared iteration counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Save a `model_{iteration:07}` checkpoint every this many iterations.
    pub checkpoint_period: NonZeroUsize,
    /// Run validation every this many iterations, `0` disables it.
    pub test_period: usize,
    /// Emit a status line and telemetry every this many iterations.
    pub log_period: NonZeroUsize,
    /// Window of the smoothed metrics, shared by every metric.
    pub window_size: NonZeroUsize,
    /// Prefix of every telemetry series.
    pub telemetry_tag: String,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            checkpoint_period: nonzero(DEFAULT_CHECKPOINT_PERIOD),
            test_period: 0,
            log_period: nonzero(DEFAULT_LOG_PERIOD),
            window_size: nonzero(DEFAULT_WINDOW_SIZE),
            telemetry_tag: "train".to_string(),
        }
    }
}

impl TrainerConfig {
    /// Parses a configuration from JSON, missing fields take their defaults.
    ///
    /// # Errors
    /// Returns `TrainErr::Json` on malformed input (a zero period included) and
    /// `TrainErr::InvalidConfig` if the result doesn't validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads and parses a JSON configuration file.
    ///
    /// # Errors
    /// Same as `from_json`, plus `TrainErr::Io` if the file can't be read.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Checks the invariants the type system doesn't cover.
    pub fn validate(&self) -> Result<()> {
        if self.telemetry_tag.trim().is_empty() {
            return Err(TrainErr::InvalidConfig(
                "telemetry_tag must not be empty".into(),
            ));
        }

        if self.telemetry_tag.contains('/') {
            return Err(TrainErr::InvalidConfig(format!(
                "telemetry_tag must not contain '/', got {}",
                self.telemetry_tag
            )));
        }

        Ok(())
    }

    /// Whether validation is due at `iteration`.
    #[inline]
    pub fn should_validate(&self, iteration: usize) -> bool {
        self.test_period > 0 && iteration % self.test_period == 0
    }

    /// Whether a periodic checkpoint is due at `iteration`.
    #[inline]
    pub fn should_checkpoint(&self, iteration: usize) -> bool {
        iteration % self.checkpoint_period.get() == 0
    }

    /// Whether a status line is due at `iteration` of a `max_iter` long run.
    #[inline]
    pub fn should_log(&self, iteration: usize, max_iter: usize) -> bool {
        iteration % self.log_period.get() == 0 || iteration == max_iter
    }
}

fn nonzero(n: usize) -> NonZeroUsize {
    // SAFETY: only called with the non-zero defaults above.
    NonZeroUsize::new(n).unwrap()
}
