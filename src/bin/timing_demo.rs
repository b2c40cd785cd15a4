//! Timing Object Demo
//!
//! Runs a freestanding timing object and prints what it does as JSON lines:
//! periodic `sample` lines with the queried vector, and an `event` line for
//! every event the object emits.
//!
//! Usage:
//!   cargo run --bin timing_demo -- --velocity 1.5 --start 0 --end 3
//!   cargo run --bin timing_demo -- --realtime --rate 4 --acceleration -0.4 --velocity 1 --position 20 --start 10 --end 25
//!   cargo run --bin timing_demo -- --velocity 2 --end 10 --reverse-at 3
//!
//! Set RUST_LOG=rust_timing_object=debug to see commits, clamps and timers.

use clap::Parser;
use rust_timing_object::{
    Engine, EngineConfig, ReadyState, SchedulerMode, TimingEvent, TimingEventKind, TimingObject,
    Vector, VectorUpdate,
};
use serde::Serialize;
use std::rc::Rc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "timing_demo", about = "Drive a timing object and print its motion")]
struct Args {
    /// Follow the wall clock instead of simulated time
    #[arg(long)]
    realtime: bool,

    /// Logical seconds per wall second (realtime only)
    #[arg(long, default_value_t = 1.0)]
    rate: f64,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    position: f64,

    #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
    velocity: f64,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    acceleration: f64,

    /// Lower bound of the interval
    #[arg(long, default_value_t = f64::NEG_INFINITY, allow_negative_numbers = true)]
    start: f64,

    /// Upper bound of the interval
    #[arg(long, default_value_t = f64::INFINITY, allow_negative_numbers = true)]
    end: f64,

    /// Seconds to run for
    #[arg(long, default_value_t = 5.0)]
    duration: f64,

    /// Seconds between samples
    #[arg(long, default_value_t = 0.25)]
    sample_interval: f64,

    /// Flip the direction of motion at this time
    #[arg(long)]
    reverse_at: Option<f64>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "TIMING_DEMO_LOG", default_value = "info")]
    log_level: String,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Line<'a> {
    Sample { t: f64, vector: Vector },
    Event { t: f64, event: &'a str, ready_state: ReadyState },
}

fn emit(line: &Line<'_>) {
    match serde_json::to_string(line) {
        Ok(json) => println!("{json}"),
        Err(err) => warn!(%err, "failed to encode output line"),
    }
}

fn init_tracing(level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|err| err.to_string())?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let mode = if args.realtime {
        SchedulerMode::Realtime
    } else {
        SchedulerMode::Offline
    };
    let mut engine = Engine::new(
        mode,
        EngineConfig {
            rate: args.rate,
            ..Default::default()
        },
    );
    let handle = engine.handle();

    let object = TimingObject::with_bounds(
        &handle,
        VectorUpdate::new()
            .position(args.position)
            .velocity(args.velocity)
            .acceleration(args.acceleration),
        args.start,
        args.end,
    );
    info!(?mode, start = args.start, end = args.end, "timing object ready");

    for kind in [
        TimingEventKind::Change,
        TimingEventKind::Error,
        TimingEventKind::ReadyStateChange,
    ] {
        // Released by dispose() below.
        let target = object.clone();
        object.add_event_listener(
            kind,
            Rc::new(move |event: &TimingEvent| {
                emit(&Line::Event {
                    t: event.timestamp,
                    event: event.kind.as_str(),
                    ready_state: target.ready_state(),
                });
            }),
        );
    }

    // Sampler
    let (sampler, h) = (object.clone(), handle.clone());
    let interval = args.sample_interval.max(1e-3);
    let end_time = handle.now() + args.duration;
    handle.spawn(async move {
        while h.now() <= end_time {
            match sampler.query() {
                Ok(vector) => emit(&Line::Sample { t: h.now(), vector }),
                Err(err) => {
                    warn!(%err, "sampling stopped");
                    break;
                }
            }
            if h.sleep(interval).await.is_err() {
                break;
            }
        }
    });

    if let Some(at) = args.reverse_at {
        let target = object.clone();
        let h = handle.clone();
        handle.spawn(async move {
            if h.sleep_until(at).await.is_err() {
                return;
            }
            let current = match target.query() {
                Ok(vector) => vector,
                Err(err) => {
                    warn!(%err, "cannot reverse");
                    return;
                }
            };
            let update = VectorUpdate::new()
                .velocity(-current.velocity)
                .acceleration(-current.acceleration);
            match target.update(update).await {
                Ok(()) => info!(at, "direction reversed"),
                Err(err) => warn!(%err, "reverse rejected"),
            }
        });
    }

    engine.run_for(args.duration);
    object.dispose();
    Ok(())
}
