use std::{
    f64::consts::PI,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};
use training_hooks::{
    build_run,
    hooks::{CROSS_ENTROPY_LOSS, L2_LOSS, LEARNING_RATE, TOTAL_LOSS},
    MetricsLoggingHook, MonitoredSession, RunConfig, SimulationConfig, StepOutputs, TrackingRun,
    TrainingError,
};

fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    if let Err(err) = run() {
        eprintln!("simulation failed: {}", err);
        std::process::exit(1);
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Drive a synthetic training loop through the metrics logging hook",
    long_about = None
)]
struct Args {
    #[arg(short, long, value_name = "PATH", help = "Path to run config file")]
    config: PathBuf,

    #[arg(long, help = "Override simulation.steps")]
    steps: Option<u64>,

    #[arg(long, value_name = "MS", help = "Override simulation.step_millis")]
    step_millis: Option<u64>,

    #[arg(long, help = "Override hook.log_every")]
    log_every: Option<u64>,
}

fn run() -> Result<(), TrainingError> {
    let args = Args::parse();

    let mut config = RunConfig::load(&args.config)?;
    if let Some(steps) = args.steps {
        config.simulation.steps = steps;
    }
    if let Some(step_millis) = args.step_millis {
        config.simulation.step_millis = step_millis;
    }
    if let Some(log_every) = args.log_every {
        config.hook.log_every = log_every;
    }
    config.validate()?;

    let mut tracking = build_run(&config.tracking)?;
    let hook = MetricsLoggingHook::from_config(&mut tracking, &config.hook)?;
    let mut session = MonitoredSession::new().with_hook(hook);

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let handler_flag = shutdown_flag.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::Relaxed);
    })
    .map_err(|err| TrainingError::runtime(format!("failed to install signal handler: {err}")))?;

    let sim = &config.simulation;
    tracing::info!(
        steps = sim.steps,
        global_batch_size = config.hook.global_batch_size,
        log_every = config.hook.log_every,
        "starting simulation"
    );

    for step in 0..sim.steps {
        if shutdown_flag.load(Ordering::Relaxed) {
            tracing::info!(step, "interrupted; stopping");
            break;
        }
        let global_step = i64::try_from(step)
            .map_err(|_| TrainingError::runtime(format!("step {step} exceeds i64 range")))?;
        session.run_step(|| {
            if sim.step_millis > 0 {
                thread::sleep(Duration::from_millis(sim.step_millis));
            }
            synthetic_outputs(sim, global_step)
        })?;
    }

    let summary = session.close();
    drop(session);
    tracking.flush()?;

    tracing::info!(steps_run = summary.steps_run, "simulation finished");
    Ok(())
}

fn synthetic_outputs(sim: &SimulationConfig, step: i64) -> Result<StepOutputs, TrainingError> {
    let progress = step as f64 / sim.steps.max(1) as f64;
    let cross_entropy = 0.1 + (sim.initial_loss - 0.1) * (-3.0 * progress).exp();
    let l2_loss = sim.l2_weight * (1.0 + 1.0 / (1.0 + step as f64));
    let total_loss = cross_entropy + l2_loss;

    StepOutputs::new(step)
        .with_scalar(CROSS_ENTROPY_LOSS, cross_entropy as f32)?
        .with_scalar(L2_LOSS, l2_loss as f32)?
        .with_scalar(TOTAL_LOSS, total_loss as f32)?
        .with_scalar(LEARNING_RATE, learning_rate(sim, step as u64) as f32)
}

/// Linear warmup followed by cosine decay to zero.
fn learning_rate(sim: &SimulationConfig, step: u64) -> f64 {
    if step < sim.warmup_steps {
        return sim.learning_rate * (step + 1) as f64 / sim.warmup_steps as f64;
    }
    let decay_steps = sim.steps.saturating_sub(sim.warmup_steps).max(1);
    let progress = (step - sim.warmup_steps) as f64 / decay_steps as f64;
    0.5 * sim.learning_rate * (1.0 + (PI * progress.min(1.0)).cos())
}
