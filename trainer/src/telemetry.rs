//! Scalar telemetry sinks.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Result;

/// Receives the scalars the trainer reports, keyed by series and step.
pub trait TelemetrySink {
    /// Records one value of `series` at `step`.
    fn emit_scalar(&mut self, series: &str, value: f64, step: usize) -> Result<()>;

    /// Records several related values under `group` at `step`.
    fn emit_scalar_group(&mut self, group: &str, values: &[(String, f64)], step: usize)
    -> Result<()>;

    /// Flushes whatever is pending, called once when training ends.
    fn close(&mut self) -> Result<()>;
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn emit_scalar(&mut self, _series: &str, _value: f64, _step: usize) -> Result<()> {
        Ok(())
    }

    fn emit_scalar_group(
        &mut self,
        _group: &str,
        _values: &[(String, f64)],
        _step: usize,
    ) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum Record<'a> {
    Scalar {
        series: &'a str,
        step: usize,
        value: f64,
    },
    Group {
        group: &'a str,
        step: usize,
        values: Map<String, Value>,
    },
}

/// Writes one JSON object per line.
///
/// ```text
/// {"series":"train/learning_rate","step":20,"value":0.01}
/// {"group":"train/losses","step":20,"values":{"loss_mse_avg":0.5}}
/// ```
pub struct JsonlTelemetry<W: Write> {
    writer: W,
}

impl JsonlTelemetry<BufWriter<File>> {
    /// Creates (or truncates) the file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> JsonlTelemetry<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write(&mut self, record: &Record<'_>) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

impl<W: Write> TelemetrySink for JsonlTelemetry<W> {
    fn emit_scalar(&mut self, series: &str, value: f64, step: usize) -> Result<()> {
        self.write(&Record::Scalar {
            series,
            step,
            value,
        })
    }

    fn emit_scalar_group(
        &mut self,
        group: &str,
        values: &[(String, f64)],
        step: usize,
    ) -> Result<()> {
        let values = values
            .iter()
            .map(|(name, v)| (name.clone(), Value::from(*v)))
            .collect();

        self.write(&Record::Group {
            group,
            step,
            values,
        })
    }

    fn close(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
