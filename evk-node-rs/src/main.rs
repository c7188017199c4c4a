//! EVK Node
//!
//! Runs the torque, regen brake and traction loops against the simulated
//! analog front end until a cycle limit, a time limit or Ctrl-C.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use evk_core::{Kernel, KernelConfig, StationaryWheelPolicy};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// EVK simulated vehicle control node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON config file (defaults apply to missing fields)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control period in milliseconds
    #[arg(short, long)]
    period_ms: Option<u64>,

    /// Stop every loop after this many cycles
    #[arg(short = 'n', long)]
    cycles: Option<u64>,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration_secs: Option<u64>,

    /// Seed for the simulated sensors
    #[arg(long)]
    seed: Option<u64>,

    /// Probability that a simulated conversion fails
    #[arg(long)]
    failure_rate: Option<f64>,

    /// Leave a stopped wheel out of the slip scan instead of treating it as full slip
    #[arg(long)]
    skip_stationary_wheels: bool,

    /// Log filter (trace, debug, info, warn, error); overrides RUST_LOG
    #[arg(short, long)]
    log_level: Option<String>,

    /// Print the final state, reports and stats as JSON
    #[arg(long)]
    json: bool,
}

fn load_config(args: &Args) -> Result<KernelConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => KernelConfig::from_json_file(path)?,
        None => KernelConfig::default(),
    };
    if let Some(period_ms) = args.period_ms {
        config = config.with_period(Duration::from_millis(period_ms));
    }
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    if let Some(rate) = args.failure_rate {
        config = config.with_failure_rate(rate);
    }
    if args.skip_stationary_wheels {
        config = config.with_stationary_policy(StationaryWheelPolicy::Skip);
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let filter = match &args.log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&args)?;
    info!(
        "EVK node starting (period {:?}, seed {:?}, failure rate {})",
        config.period(),
        config.sim.seed,
        config.sim.failure_rate
    );

    let mut kernel = Kernel::simulated(&config);
    if let Some(cycles) = args.cycles {
        kernel = kernel.with_max_cycles(cycles);
    }
    let state = kernel.state();
    let stats = kernel.stats();
    let shutdown = kernel.shutdown_handle();

    // Ctrl-C
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, stopping loops");
                ctrl_c.trigger();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    // Time limit
    if let Some(secs) = args.duration_secs {
        let timer = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            info!("Run time of {} s elapsed, stopping loops", secs);
            timer.trigger();
        });
    }

    let report = kernel.start().await?;
    let snapshot = state.snapshot().await;

    if args.json {
        let output = serde_json::json!({
            "loops": report.loops,
            "stats": stats.snapshot(),
            "state": snapshot,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for loop_report in &report.loops {
            info!(
                "{}: {} cycles{}",
                loop_report.name,
                loop_report.cycles,
                if loop_report.init_error.is_some() { " (degraded)" } else { "" }
            );
        }
        let torque = snapshot.torque().value();
        info!(
            "Final torque {:.2} Nm ({:?}), regen {:?}, traction {:?}",
            torque.desired_torque_nm,
            torque.advice,
            snapshot.regen().value().status,
            snapshot.traction().value().action
        );
        let kinematics = snapshot.kinematics();
        info!(
            "Final speed {:?} kph, inclination {:?} deg, wheels {:?}",
            kinematics.speed_kph, kinematics.inclination_deg, kinematics.wheel_angular_velocity
        );
        match snapshot.battery() {
            Some(battery) => info!(
                "Battery SOC {:.1}%, {:.1} C",
                battery.soc_percent, battery.temperature_c
            ),
            None => info!("Battery not read (regen inactive)"),
        }
    }

    Ok(())
}
