use std::time::{Duration, Instant};

use super::{FetchTarget, SessionSummary, StepArgs, StepHook, StepValues};
use crate::{
    clock::{Clock, SystemClock},
    config::{HookConfig, DEFAULT_LOG_EVERY},
    tracking::TrackingRun,
    TrainingError,
};

pub const CROSS_ENTROPY_LOSS: &str = "cross_entropy_loss_ref:0";
pub const L2_LOSS: &str = "l2_loss_ref:0";
pub const TOTAL_LOSS: &str = "total_loss_ref:0";
pub const LEARNING_RATE: &str = "learning_rate_ref:0";

pub const LOSS_CURVE_SERIES: &str = "Loss curve";
pub const LEARNING_RATE_SERIES: &str = "Learning rate schedule";
pub const THROUGHPUT_SERIES: &str = "Throughput";

/// Reports loss, learning rate and images/sec to a tracking run every
/// `log_every` steps.
///
/// A step is reported only the first time it is seen: once step `S` has been
/// observed, any later step `<= S` is ignored even if it falls on the
/// interval.
pub struct MetricsLoggingHook<R, C = SystemClock> {
    run: R,
    clock: C,
    global_batch_size: usize,
    log_every: u64,
    latest_step_seen: i64,
    step_started: Option<Instant>,
}

impl<R: TrackingRun> MetricsLoggingHook<R, SystemClock> {
    pub fn new(run: R, global_batch_size: usize) -> Result<Self, TrainingError> {
        Self::with_log_every(run, global_batch_size, DEFAULT_LOG_EVERY)
    }

    pub fn with_log_every(
        run: R,
        global_batch_size: usize,
        log_every: u64,
    ) -> Result<Self, TrainingError> {
        Self::with_clock(run, global_batch_size, log_every, SystemClock)
    }

    pub fn from_config(run: R, config: &HookConfig) -> Result<Self, TrainingError> {
        Self::with_log_every(run, config.global_batch_size, config.log_every)
    }
}

impl<R: TrackingRun, C: Clock> MetricsLoggingHook<R, C> {
    pub fn with_clock(
        run: R,
        global_batch_size: usize,
        log_every: u64,
        clock: C,
    ) -> Result<Self, TrainingError> {
        HookConfig {
            global_batch_size,
            log_every,
        }
        .validate()?;

        Ok(Self {
            run,
            clock,
            global_batch_size,
            log_every,
            latest_step_seen: -1,
            step_started: None,
        })
    }

    pub fn global_batch_size(&self) -> usize {
        self.global_batch_size
    }

    pub fn log_every(&self) -> u64 {
        self.log_every
    }

    /// Last step passed to `after_step`, or `-1` before the first one.
    pub fn latest_step_seen(&self) -> i64 {
        self.latest_step_seen
    }

    pub fn run(&self) -> &R {
        &self.run
    }

    pub fn run_mut(&mut self) -> &mut R {
        &mut self.run
    }

    pub fn into_run(self) -> R {
        self.run
    }

    fn should_log(&self, step: i64) -> bool {
        // Divisibility does not depend on sign; unsigned_abs also covers i64::MIN.
        step > self.latest_step_seen && step.unsigned_abs() % self.log_every == 0
    }

    fn images_per_sec(&self, elapsed: Duration) -> f64 {
        if elapsed.is_zero() {
            tracing::warn!(
                global_batch_size = self.global_batch_size,
                "step finished in zero measured time; throughput is unbounded"
            );
        }
        self.global_batch_size as f64 / elapsed.as_secs_f64()
    }
}

impl<R: TrackingRun, C: Clock> StepHook for MetricsLoggingHook<R, C> {
    fn before_step(&mut self) -> StepArgs {
        let args = StepArgs::new(vec![
            FetchTarget::GlobalStep,
            FetchTarget::tensor(CROSS_ENTROPY_LOSS),
            FetchTarget::tensor(L2_LOSS),
            FetchTarget::tensor(TOTAL_LOSS),
            FetchTarget::tensor(LEARNING_RATE),
        ]);
        self.step_started = Some(self.clock.now());
        args
    }

    fn after_step(&mut self, values: &StepValues) -> Result<(), TrainingError> {
        let started = self.step_started.take().ok_or_else(|| {
            TrainingError::runtime("after_step called without a matching before_step")
        })?;
        let batch_time = self.clock.now().saturating_duration_since(started);
        let ips = self.images_per_sec(batch_time);

        let global_step = values.global_step()?;
        let cross_entropy = values.scalar(CROSS_ENTROPY_LOSS)?;
        let l2_loss = values.scalar(L2_LOSS)?;
        let total_loss = values.scalar(TOTAL_LOSS)?;
        let learning_rate = values.scalar(LEARNING_RATE)?;

        if self.should_log(global_step) {
            tracing::debug!(
                step = global_step,
                cross_entropy,
                l2_loss,
                total_loss,
                learning_rate,
                ips,
                "reporting step metrics"
            );
            self.run
                .log_row(LOSS_CURVE_SERIES, global_step, &[("loss", cross_entropy)])?;
            self.run
                .log_row(LEARNING_RATE_SERIES, global_step, &[("lr", learning_rate)])?;
            self.run
                .log_row(THROUGHPUT_SERIES, global_step, &[("ips", ips)])?;
        }

        self.latest_step_seen = global_step;
        Ok(())
    }

    fn end(&mut self, _summary: &SessionSummary) {}
}
