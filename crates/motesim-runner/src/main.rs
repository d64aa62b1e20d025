use clap::Parser;
use motesim_common::SimTime;
use motesim_model::RunConfig;
use motesim_mote::DeviceTimings;
use motesim_runner::{load_device_descriptor, load_trace, run_simulation, RunnerError};
use std::path::PathBuf;
use std::process;

/// Three-mote CC2420 radio simulation.
#[derive(Parser)]
#[command(name = "motesim", version, about)]
struct Cli {
    /// Seed for the random generator
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// The number of seconds the simulation should run
    #[arg(long, default_value_t = 10.0)]
    duration: f64,

    /// Packets per second offered to the first mote
    #[arg(long, default_value_t = 100.0)]
    pps: f64,

    /// UDP payload size of generated packets
    #[arg(long, default_value_t = 0)]
    payload_size: u32,

    /// Device descriptor with per-stage firmware delays (YAML)
    #[arg(long)]
    device: Option<PathBuf>,

    /// Replay a recorded trace (alternating send time / payload size lines)
    /// instead of the fixed rate
    #[arg(long)]
    trace_file: Option<PathBuf>,

    /// Write the run summary as JSON to this file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Disable clear channel assessment before transmitting
    #[arg(long)]
    no_cca: bool,

    /// Hold the medium without putting bytes on air
    #[arg(long)]
    suppress_tx: bool,

    /// Record pipeline hand-offs into the per-mote stage traces
    #[arg(long)]
    stage_trace: bool,
}

fn run(cli: Cli) -> Result<(), RunnerError> {
    let timings = match &cli.device {
        Some(path) => load_device_descriptor(path)?,
        None => DeviceTimings::default(),
    };

    let schedule = match &cli.trace_file {
        Some(path) => Some(load_trace(path)?),
        None => None,
    };

    let config = RunConfig {
        seed: cli.seed,
        duration: SimTime::from_secs(cli.duration),
        pps: cli.pps,
        payload_size: cli.payload_size,
        cca_enabled: !cli.no_cca,
        suppress_transmission: cli.suppress_tx,
        stage_trace_enabled: cli.stage_trace,
        schedule,
    };

    let summary = run_simulation(&config, &timings)?;
    println!("{summary}");

    if let Some(path) = &cli.output {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json)?;
        log::info!("summary written to {}", path.display());
    }

    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        process::exit(1);
    }
}
