//! `beaconsim` command line.

use std::path::PathBuf;
use std::process::ExitCode;

use beaconsim_runner::{
    decode_timestamp_hex, encode_timestamp_hex, run_simulation, RunnerError, SimulationConfig,
};
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "beaconsim")]
#[command(about = "LoRaWAN Class B beacon and ping-slot simulator")]
#[command(version)]
struct Cli {
    /// Log filter used when RUST_LOG is unset (e.g. "info", "beaconsim_gateway=debug").
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scenario file.
    Run {
        /// Scenario YAML.
        scenario: PathBuf,

        /// Override the scenario duration, in seconds.
        #[arg(long)]
        duration: Option<f64>,

        /// Override the scenario seed.
        #[arg(long)]
        seed: Option<u64>,

        /// Write the run summary as JSON.
        #[arg(long)]
        stats_json: Option<PathBuf>,
    },

    /// Encode or decode the beacon timestamp field.
    #[command(subcommand)]
    Timestamp(TimestampCommand),
}

#[derive(Subcommand, Debug)]
enum TimestampCommand {
    /// Print the hex field for a network time in seconds.
    Encode { secs: f64 },
    /// Print the network time carried by a hex field.
    Decode { hex: String },
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(cli: Cli) -> Result<(), RunnerError> {
    match cli.command {
        Command::Run {
            scenario,
            duration,
            seed,
            stats_json,
        } => {
            let mut config = SimulationConfig::load(&scenario)?;
            if let Some(duration) = duration {
                config.duration_secs = duration;
            }
            if let Some(seed) = seed {
                config.seed = seed;
            }
            beaconsim_metrics::describe_metrics();

            let stats = run_simulation(&config)?;
            println!(
                "{} beacons sent, {} skipped; {} ping slots used, {} missed; mean throughput {:.1} bit/s",
                stats.gateway.beacons_sent,
                stats.gateway.beacons_skipped,
                stats.gateway.ping_slots_used,
                stats.gateway.ping_slots_missed,
                stats.mean_throughput_bps,
            );
            if let Some(path) = stats_json {
                std::fs::write(&path, serde_json::to_string_pretty(&stats)?)?;
            }
        }
        Command::Timestamp(TimestampCommand::Encode { secs }) => {
            println!("{}", encode_timestamp_hex(secs)?);
        }
        Command::Timestamp(TimestampCommand::Decode { hex }) => {
            println!("{}", decode_timestamp_hex(&hex)?);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
