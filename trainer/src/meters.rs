//! Smoothed scalar metrics for progress reporting.

use std::{collections::VecDeque, fmt, num::NonZeroUsize};

use crate::error::{Result, TrainErr};

const DELIMITER: &str = "  ";

/// A scalar series with a bounded window of recent values and unbounded totals.
#[derive(Debug, Clone)]
pub struct SmoothedValue {
    window: VecDeque<f64>,
    window_size: usize,
    total: f64,
    count: usize,
}

impl SmoothedValue {
    /// Creates an empty series.
    ///
    /// # Arguments
    /// * `window_size` - How many recent values the window keeps.
    pub fn new(window_size: NonZeroUsize) -> Self {
        let window_size = window_size.get();

        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
            total: 0.0,
            count: 0,
        }
    }

    /// Records a value, evicting the oldest one if the window is full.
    pub fn update(&mut self, value: f64) {
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }

        self.window.push_back(value);
        self.total += value;
        self.count += 1;
    }

    /// Median of the window, the mean of the two middle values on even lengths.
    pub fn median(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }

        let mut sorted: Vec<_> = self.window.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);

        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        }
    }

    pub fn windowed_average(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }

        self.window.iter().sum::<f64>() / self.window.len() as f64
    }

    pub fn global_average(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }

        self.total / self.count as f64
    }

    #[inline]
    pub fn latest(&self) -> Option<f64> {
        self.window.back().copied()
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }
}

/// A named collection of `SmoothedValue`s sharing one window size.
///
/// Metrics are created on first update and displayed in that order.
#[derive(Debug, Clone)]
pub struct Meters {
    window_size: NonZeroUsize,
    meters: Vec<(String, SmoothedValue)>,
}

impl Meters {
    pub fn new(window_size: NonZeroUsize) -> Self {
        Self {
            window_size,
            meters: Vec::new(),
        }
    }

    /// Records one value for each named metric.
    ///
    /// # Arguments
    /// * `values` - Pairs of metric name and value.
    pub fn update<I, K, V>(&mut self, values: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<f64>,
    {
        for (name, value) in values {
            let name = name.as_ref();
            let value = value.into();

            match self.meters.iter_mut().find(|(n, _)| n == name) {
                Some((_, meter)) => meter.update(value),
                None => {
                    let mut meter = SmoothedValue::new(self.window_size);
                    meter.update(value);
                    self.meters.push((name.to_string(), meter));
                }
            }
        }
    }

    /// Looks up a metric by name.
    ///
    /// # Errors
    /// `MetricNotFound` if nothing was ever recorded under `name`.
    pub fn get(&self, name: &str) -> Result<&SmoothedValue> {
        self.meters
            .iter()
            .find_map(|(n, m)| (n == name).then_some(m))
            .ok_or_else(|| TrainErr::MetricNotFound {
                name: name.to_string(),
            })
    }

    pub fn windowed_average(&self, name: &str) -> Result<f64> {
        self.get(name).map(SmoothedValue::windowed_average)
    }

    pub fn global_average(&self, name: &str) -> Result<f64> {
        self.get(name).map(SmoothedValue::global_average)
    }

    pub fn median(&self, name: &str) -> Result<f64> {
        self.get(name).map(SmoothedValue::median)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.meters.iter().map(|(n, _)| n.as_str())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.meters.is_empty()
    }
}

impl fmt::Display for Meters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, meter)) in self.meters.iter().enumerate() {
            if i > 0 {
                f.write_str(DELIMITER)?;
            }

            write!(
                f,
                "{name}: {:.4} ({:.4})",
                meter.median(),
                meter.global_average()
            )?;
        }

        Ok(())
    }
}
