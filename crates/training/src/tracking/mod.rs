//! Experiment-tracking runs: where metric rows end up.
//!
//! A run accepts rows made of a series name, an integer step and one or more
//! named float values. Every sink in this module implements [`TrackingRun`],
//! and [`FanoutRun`] lets several of them receive the same rows.

mod console;
mod jsonl;
mod memory;
mod tensorboard;

use thiserror::Error;

use crate::{config::TrackingConfig, TrainingError};

pub use console::ConsoleRun;
pub use jsonl::JsonLinesRun;
pub use memory::InMemoryRun;
pub use tensorboard::TensorBoardRun;

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode row: {0}")]
    Encode(String),

    #[error("row rejected: {0}")]
    Rejected(String),
}

pub trait TrackingRun {
    /// Records one row of the series `name` at `step`.
    fn log_row(&mut self, name: &str, step: i64, fields: &[(&str, f64)])
        -> Result<(), TrackingError>;

    fn flush(&mut self) -> Result<(), TrackingError> {
        Ok(())
    }
}

impl<T: TrackingRun + ?Sized> TrackingRun for &mut T {
    fn log_row(
        &mut self,
        name: &str,
        step: i64,
        fields: &[(&str, f64)],
    ) -> Result<(), TrackingError> {
        (**self).log_row(name, step, fields)
    }

    fn flush(&mut self) -> Result<(), TrackingError> {
        (**self).flush()
    }
}

impl<T: TrackingRun + ?Sized> TrackingRun for Box<T> {
    fn log_row(
        &mut self,
        name: &str,
        step: i64,
        fields: &[(&str, f64)],
    ) -> Result<(), TrackingError> {
        (**self).log_row(name, step, fields)
    }

    fn flush(&mut self) -> Result<(), TrackingError> {
        (**self).flush()
    }
}

/// An owned copy of a logged row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub name: String,
    pub step: i64,
    pub fields: Vec<(String, f64)>,
}

impl Row {
    pub fn new(name: &str, step: i64, fields: &[(&str, f64)]) -> Self {
        Self {
            name: name.to_string(),
            step,
            fields: fields
                .iter()
                .map(|(key, value)| (key.to_string(), *value))
                .collect(),
        }
    }

    pub fn field(&self, key: &str) -> Option<f64> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| *value)
    }
}

/// Forwards every row to each inner run in order, stopping at the first
/// failure.
#[derive(Default)]
pub struct FanoutRun<'a> {
    runs: Vec<Box<dyn TrackingRun + 'a>>,
}

impl<'a> FanoutRun<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, run: impl TrackingRun + 'a) {
        self.runs.push(Box::new(run));
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

impl TrackingRun for FanoutRun<'_> {
    fn log_row(
        &mut self,
        name: &str,
        step: i64,
        fields: &[(&str, f64)],
    ) -> Result<(), TrackingError> {
        for run in &mut self.runs {
            run.log_row(name, step, fields)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TrackingError> {
        for run in &mut self.runs {
            run.flush()?;
        }
        Ok(())
    }
}

/// Builds the runs enabled in `config`. An empty fanout is valid and drops
/// every row.
pub fn build_run(config: &TrackingConfig) -> Result<FanoutRun<'static>, TrainingError> {
    let mut fanout = FanoutRun::new();
    if config.enable_stdout {
        fanout.push(ConsoleRun::stdout());
    }
    if let Some(path) = config.jsonl.as_ref() {
        fanout.push(JsonLinesRun::create(path)?);
    }
    if let Some(dir) = config.tensorboard.as_ref() {
        fanout.push(TensorBoardRun::create(dir, config.tensorboard_flush_every_n)?);
    }
    if fanout.is_empty() {
        tracing::warn!("no tracking sinks enabled; metric rows will be discarded");
    }
    Ok(fanout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fanout_forwards_to_every_run() {
        let mut first = InMemoryRun::new();
        let mut second = InMemoryRun::new();

        let mut fanout = FanoutRun::new();
        fanout.push(&mut first);
        fanout.push(&mut second);
        assert_eq!(fanout.len(), 2);
        fanout.log_row("Loss curve", 10, &[("loss", 1.5)]).unwrap();
        drop(fanout);

        let expected = vec![Row::new("Loss curve", 10, &[("loss", 1.5)])];
        assert_eq!(first.rows(), expected.as_slice());
        assert_eq!(second.rows(), expected.as_slice());
    }

    #[test]
    fn fanout_stops_at_first_failure() {
        let mut fanout = FanoutRun::new();
        fanout.push(InMemoryRun::rejecting("quota exceeded"));
        fanout.push(InMemoryRun::new());

        let err = fanout
            .log_row("Throughput", 20, &[("ips", 128.0)])
            .unwrap_err();
        assert!(matches!(err, TrackingError::Rejected(ref msg) if msg == "quota exceeded"));
    }

    #[test]
    fn row_field_lookup() {
        let row = Row::new("Learning rate schedule", 30, &[("lr", 0.05)]);
        assert_eq!(row.field("lr"), Some(0.05));
        assert_eq!(row.field("loss"), None);
    }

    #[test]
    fn build_run_respects_disabled_sinks() {
        let config = TrackingConfig {
            enable_stdout: false,
            ..TrackingConfig::default()
        };
        let run = build_run(&config).unwrap();
        assert!(run.is_empty());
    }
}
