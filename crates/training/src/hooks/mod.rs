//! Step hooks: callbacks a session runs around every optimization step.
//!
//! Before a step, each hook names the values it wants to see afterwards
//! ([`StepArgs`]). The session runs the step, resolves those names against
//! what the step produced and hands the result back as [`StepValues`].

mod metrics;

use std::{collections::HashMap, fmt};

use crate::TrainingError;

pub use metrics::{
    MetricsLoggingHook, CROSS_ENTROPY_LOSS, L2_LOSS, LEARNING_RATE, LEARNING_RATE_SERIES,
    LOSS_CURVE_SERIES, THROUGHPUT_SERIES, TOTAL_LOSS,
};

/// A value a hook asks the session to fetch after a step.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FetchTarget {
    GlobalStep,
    Tensor(String),
}

impl FetchTarget {
    pub fn tensor(name: impl Into<String>) -> Self {
        Self::Tensor(name.into())
    }
}

impl fmt::Display for FetchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchTarget::GlobalStep => f.write_str("global_step"),
            FetchTarget::Tensor(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepArgs {
    pub fetches: Vec<FetchTarget>,
}

impl StepArgs {
    pub fn new(fetches: Vec<FetchTarget>) -> Self {
        Self { fetches }
    }
}

/// Values resolved for one hook after a step.
#[derive(Debug, Clone, Default)]
pub struct StepValues {
    global_step: Option<i64>,
    scalars: HashMap<String, f64>,
}

impl StepValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global_step(mut self, step: i64) -> Self {
        self.global_step = Some(step);
        self
    }

    pub fn with_scalar(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert_scalar(name, value);
        self
    }

    pub fn set_global_step(&mut self, step: i64) {
        self.global_step = Some(step);
    }

    pub fn insert_scalar(&mut self, name: impl Into<String>, value: f64) {
        self.scalars.insert(name.into(), value);
    }

    pub fn global_step(&self) -> Result<i64, TrainingError> {
        self.global_step
            .ok_or_else(|| TrainingError::MissingFetch(FetchTarget::GlobalStep.to_string()))
    }

    pub fn scalar(&self, name: &str) -> Result<f64, TrainingError> {
        self.scalars
            .get(name)
            .copied()
            .ok_or_else(|| TrainingError::MissingFetch(name.to_string()))
    }
}

/// Handed to hooks when the session closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub steps_run: u64,
    pub last_global_step: Option<i64>,
}

pub trait StepHook {
    /// Called right before a step runs. The returned fetches are resolved
    /// once the step completes.
    fn before_step(&mut self) -> StepArgs;

    fn after_step(&mut self, values: &StepValues) -> Result<(), TrainingError>;

    fn end(&mut self, _summary: &SessionSummary) {}
}

impl<T: StepHook + ?Sized> StepHook for &mut T {
    fn before_step(&mut self) -> StepArgs {
        (**self).before_step()
    }

    fn after_step(&mut self, values: &StepValues) -> Result<(), TrainingError> {
        (**self).after_step(values)
    }

    fn end(&mut self, summary: &SessionSummary) {
        (**self).end(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_values_name_the_fetch() {
        let values = StepValues::new().with_scalar("total_loss_ref:0", 1.25);

        assert_eq!(values.scalar("total_loss_ref:0").unwrap(), 1.25);
        assert!(matches!(
            values.global_step(),
            Err(TrainingError::MissingFetch(ref name)) if name == "global_step"
        ));
        assert!(matches!(
            values.scalar("l2_loss_ref:0"),
            Err(TrainingError::MissingFetch(ref name)) if name == "l2_loss_ref:0"
        ));
    }
}
