//! Step hooks that report training metrics to experiment-tracking runs.

pub mod clock;
pub mod config;
pub mod errors;
pub mod hooks;
pub mod session;
pub mod tracking;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{HookConfig, RunConfig, SimulationConfig, TrackingConfig};
pub use errors::{Result, TrainingError};
pub use hooks::{
    FetchTarget, MetricsLoggingHook, SessionSummary, StepArgs, StepHook, StepValues,
};
pub use session::{MonitoredSession, StepOutputs};
pub use tracking::{
    build_run, ConsoleRun, FanoutRun, InMemoryRun, JsonLinesRun, Row, TensorBoardRun,
    TrackingError, TrackingRun,
};
