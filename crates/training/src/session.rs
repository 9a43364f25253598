//! A minimal synchronous session that drives step hooks.
//!
//! The session does not know how to train anything. The caller supplies a
//! closure per step that produces the step's outputs; the session runs the
//! hooks around it and resolves the values they asked for.

use std::collections::HashMap;

use candle_core::{DType, Device, Tensor};

use crate::{
    hooks::{FetchTarget, SessionSummary, StepArgs, StepHook, StepValues},
    TrainingError,
};

/// What one step produced: its global step index and named tensors.
#[derive(Debug, Clone)]
pub struct StepOutputs {
    global_step: i64,
    tensors: HashMap<String, Tensor>,
}

impl StepOutputs {
    pub fn new(global_step: i64) -> Self {
        Self {
            global_step,
            tensors: HashMap::new(),
        }
    }

    pub fn with_tensor(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.insert(name, tensor);
        self
    }

    /// Adds a rank-0 `f32` CPU tensor holding `value`.
    pub fn with_scalar(self, name: impl Into<String>, value: f32) -> Result<Self, TrainingError> {
        let tensor = Tensor::new(value, &Device::Cpu)?;
        Ok(self.with_tensor(name, tensor))
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn global_step(&self) -> i64 {
        self.global_step
    }

    pub fn resolve(&self, args: &StepArgs) -> Result<StepValues, TrainingError> {
        let mut values = StepValues::new();
        for target in &args.fetches {
            match target {
                FetchTarget::GlobalStep => values.set_global_step(self.global_step),
                FetchTarget::Tensor(name) => {
                    let tensor = self
                        .tensors
                        .get(name)
                        .ok_or_else(|| TrainingError::MissingFetch(name.clone()))?;
                    values.insert_scalar(name.clone(), scalar_value(name, tensor)?);
                }
            }
        }
        Ok(values)
    }
}

fn scalar_value(name: &str, tensor: &Tensor) -> Result<f64, TrainingError> {
    if tensor.elem_count() != 1 {
        return Err(TrainingError::runtime(format!(
            "fetch target '{}' is not a scalar (shape {:?})",
            name,
            tensor.dims()
        )));
    }
    let values = tensor.flatten_all()?.to_dtype(DType::F64)?.to_vec1::<f64>()?;
    Ok(values[0])
}

/// Runs registered hooks around each step, in registration order.
#[derive(Default)]
pub struct MonitoredSession<'a> {
    hooks: Vec<Box<dyn StepHook + 'a>>,
    steps_run: u64,
    last_global_step: Option<i64>,
    closed: bool,
}

impl<'a> MonitoredSession<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hook(mut self, hook: impl StepHook + 'a) -> Self {
        self.add_hook(hook);
        self
    }

    pub fn add_hook(&mut self, hook: impl StepHook + 'a) {
        self.hooks.push(Box::new(hook));
    }

    pub fn steps_run(&self) -> u64 {
        self.steps_run
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Runs one step and returns its global step index. Any hook or step
    /// error aborts the step and is returned unchanged.
    pub fn run_step<F>(&mut self, step: F) -> Result<i64, TrainingError>
    where
        F: FnOnce() -> Result<StepOutputs, TrainingError>,
    {
        if self.closed {
            return Err(TrainingError::runtime("session is already closed"));
        }

        let requests: Vec<StepArgs> = self
            .hooks
            .iter_mut()
            .map(|hook| hook.before_step())
            .collect();

        let outputs = step()?;

        for (hook, args) in self.hooks.iter_mut().zip(&requests) {
            let values = outputs.resolve(args)?;
            hook.after_step(&values)?;
        }

        self.steps_run += 1;
        self.last_global_step = Some(outputs.global_step());
        Ok(outputs.global_step())
    }

    /// Calls `end` on every hook. Later calls return the same summary
    /// without notifying hooks again.
    pub fn close(&mut self) -> SessionSummary {
        let summary = SessionSummary {
            steps_run: self.steps_run,
            last_global_step: self.last_global_step,
        };
        if !self.closed {
            for hook in &mut self.hooks {
                hook.end(&summary);
            }
            self.closed = true;
            tracing::info!(
                steps_run = summary.steps_run,
                last_global_step = ?summary.last_global_step,
                "session closed"
            );
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hooks::{
            MetricsLoggingHook, CROSS_ENTROPY_LOSS, L2_LOSS, LEARNING_RATE, LOSS_CURVE_SERIES,
            TOTAL_LOSS,
        },
        tracking::InMemoryRun,
    };

    fn outputs(step: i64) -> Result<StepOutputs, TrainingError> {
        StepOutputs::new(step)
            .with_scalar(CROSS_ENTROPY_LOSS, 1.5)?
            .with_scalar(L2_LOSS, 0.25)?
            .with_scalar(TOTAL_LOSS, 1.75)?
            .with_scalar(LEARNING_RATE, 0.5)
    }

    #[derive(Default)]
    struct CountingHook {
        before: usize,
        after: Vec<i64>,
        ends: usize,
    }

    impl StepHook for CountingHook {
        fn before_step(&mut self) -> StepArgs {
            self.before += 1;
            StepArgs::new(vec![FetchTarget::GlobalStep])
        }

        fn after_step(&mut self, values: &StepValues) -> Result<(), TrainingError> {
            self.after.push(values.global_step()?);
            Ok(())
        }

        fn end(&mut self, _summary: &SessionSummary) {
            self.ends += 1;
        }
    }

    #[test]
    fn resolves_scalar_tensors() {
        let args = StepArgs::new(vec![
            FetchTarget::GlobalStep,
            FetchTarget::tensor(L2_LOSS),
            FetchTarget::tensor(LEARNING_RATE),
        ]);
        let values = outputs(7).unwrap().resolve(&args).unwrap();

        assert_eq!(values.global_step().unwrap(), 7);
        assert_eq!(values.scalar(L2_LOSS).unwrap(), 0.25);
        assert_eq!(values.scalar(LEARNING_RATE).unwrap(), 0.5);
    }

    #[test]
    fn single_element_tensors_count_as_scalars() {
        let tensor = Tensor::new(&[[3.0f32]], &Device::Cpu).unwrap();
        let args = StepArgs::new(vec![FetchTarget::tensor("x")]);
        let values = StepOutputs::new(0)
            .with_tensor("x", tensor)
            .resolve(&args)
            .unwrap();
        assert_eq!(values.scalar("x").unwrap(), 3.0);
    }

    #[test]
    fn non_scalar_tensor_is_rejected() {
        let tensor = Tensor::new(&[1.0f32, 2.0], &Device::Cpu).unwrap();
        let args = StepArgs::new(vec![FetchTarget::tensor("loss")]);
        let err = StepOutputs::new(0)
            .with_tensor("loss", tensor)
            .resolve(&args)
            .unwrap_err();
        assert!(matches!(err, TrainingError::Runtime(ref msg) if msg.contains("not a scalar")));
    }

    #[test]
    fn missing_tensor_aborts_the_step() {
        let mut run = InMemoryRun::new();
        let hook = MetricsLoggingHook::with_log_every(&mut run, 16, 1).unwrap();
        let mut session = MonitoredSession::new().with_hook(hook);

        let err = session
            .run_step(|| StepOutputs::new(1).with_scalar(CROSS_ENTROPY_LOSS, 1.0))
            .unwrap_err();
        assert!(matches!(err, TrainingError::MissingFetch(ref name) if name == L2_LOSS));
        assert_eq!(session.steps_run(), 0);
        drop(session);

        assert!(run.rows().is_empty());
    }

    #[test]
    fn drives_metrics_hook_across_steps() {
        let mut run = InMemoryRun::new();
        let hook = MetricsLoggingHook::with_log_every(&mut run, 16, 2).unwrap();
        let mut session = MonitoredSession::new().with_hook(hook);

        for step in 1..=4 {
            assert_eq!(session.run_step(|| outputs(step)).unwrap(), step);
        }
        let summary = session.close();
        assert_eq!(summary.steps_run, 4);
        assert_eq!(summary.last_global_step, Some(4));
        drop(session);

        assert_eq!(run.steps(LOSS_CURVE_SERIES), vec![2, 4]);
        let loss = run.series(LOSS_CURVE_SERIES).next().unwrap();
        assert_eq!(loss.field("loss"), Some(1.5));
    }

    #[test]
    fn close_ends_hooks_once_and_blocks_further_steps() {
        let mut counter = CountingHook::default();
        let mut session = MonitoredSession::new().with_hook(&mut counter);

        session.run_step(|| Ok(StepOutputs::new(3))).unwrap();
        session.close();
        session.close();
        assert!(session.is_closed());
        assert!(matches!(
            session.run_step(|| Ok(StepOutputs::new(4))),
            Err(TrainingError::Runtime(_))
        ));
        drop(session);

        assert_eq!(counter.before, 1);
        assert_eq!(counter.after, vec![3]);
        assert_eq!(counter.ends, 1);
    }

    #[test]
    fn failed_step_skips_after_hooks() {
        let mut counter = CountingHook::default();
        let mut session = MonitoredSession::new().with_hook(&mut counter);

        let err = session
            .run_step(|| Err(TrainingError::runtime("nan loss")))
            .unwrap_err();
        assert!(matches!(err, TrainingError::Runtime(_)));
        drop(session);

        assert_eq!(counter.before, 1);
        assert!(counter.after.is_empty());
    }
}
