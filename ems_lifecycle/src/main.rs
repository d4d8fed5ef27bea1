//! # EMS Agent
//!
//! Runs the device lifecycle state machines of one energy-management agent
//! against simulated equipment.
//!
//! Loads the agent TOML, builds one device per configured entry, and
//! enters the fixed-period cycle loop until Ctrl+C or `--cycles` is reached.

use clap::Parser;
use ems_common::config::{ConfigLoader, LogLevel};
use ems_common::consts::DEFAULT_CONFIG_PATH;
use ems_common::lifecycle::config::AgentConfig;
use ems_lifecycle::context::SystemClock;
use ems_lifecycle::cycle::{CycleRunner, rt_setup};
use ems_lifecycle::sim::build_devices;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// EMS Agent: device lifecycle control loop
#[derive(Parser, Debug)]
#[command(name = "ems_agent")]
#[command(version)]
#[command(about = "Fixed-cycle device lifecycle engine for an energy-management agent")]
struct Args {
    /// Path to the agent configuration TOML.
    #[arg(long, short, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Stop after this many cycles (runs until Ctrl+C otherwise).
    #[arg(long, value_name = "N")]
    cycles: Option<u64>,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();

    // Config is read before tracing exists so its log level can apply.
    let config = match AgentConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            setup_tracing(&args, LogLevel::Info);
            error!("FATAL: {} ({})", e, args.config.display());
            process::exit(1);
        }
    };
    setup_tracing(&args, config.shared.log_level);

    info!("EMS agent v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args, config) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("EMS agent shutdown complete");
}

fn run(args: &Args, config: AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    info!(
        service = %config.shared.service_name,
        cycle_time_ms = config.cycle_time_ms,
        devices = config.device_count(),
        "config OK"
    );

    let devices = build_devices(&config)?;

    rt_setup()?;

    let mut runner = CycleRunner::new(devices, Box::new(SystemClock), config.cycle_time())?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    runner.run(&running, args.cycles)?;

    let stats = runner.stats();
    info!(
        cycles = stats.cycle_count,
        overruns = stats.overruns,
        min_ns = stats.min_or_zero(),
        avg_ns = stats.avg_cycle_ns(),
        max_ns = stats.max_cycle_ns,
        "cycle statistics"
    );
    for device in runner.devices() {
        info!(
            component = device.id(),
            state = %device.debug_log(),
            flags = ?device.status_flags(),
            "final device state"
        );
    }

    Ok(())
}

/// Setup tracing subscriber from CLI arguments and the configured level.
fn setup_tracing(args: &Args, configured: LogLevel) {
    let directive = if args.verbose {
        LogLevel::Debug.as_directive()
    } else {
        configured.as_directive()
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
