//! Command-line runner for a single lock-step pipeline.

use clap::Parser;
use lockstep_pipeline::{
    Bottleneck, PipelineBuilder, DEFAULT_CLI_GENERATOR_PAUSE, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_SEED, DEFAULT_STAGE_COUNT, DEFAULT_TICKS,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "lockstep-pipeline")]
#[command(about = "Run a barrier-synchronized generator/processor/filter pipeline")]
#[command(version)]
struct Cli {
    /// Number of ticks every stage runs
    #[arg(short, long, default_value_t = DEFAULT_TICKS)]
    ticks: u64,

    /// Number of stages (at least 2)
    #[arg(short, long, default_value_t = DEFAULT_STAGE_COUNT)]
    stages: usize,

    /// Capacity of each queue between stages
    #[arg(short, long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    capacity: usize,

    /// Deadline of each queue push/pop, in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Seed of the generator's value source
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Generator pause after each tick, in microseconds
    #[arg(long, default_value_t = DEFAULT_CLI_GENERATOR_PAUSE.as_micros() as u64)]
    pause_us: u64,

    /// Write per-item records as CSV to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut builder = PipelineBuilder::new()
        .queue_capacity(cli.capacity)
        .queue_timeout(Duration::from_millis(cli.timeout_ms))
        .seed(cli.seed)
        .generator_pause(Duration::from_micros(cli.pause_us));
    if let Some(path) = &cli.log_file {
        builder = builder.log_path(path);
    }

    let coordinator = match builder.build() {
        Ok(coordinator) => Arc::new(coordinator),
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    {
        let coordinator = Arc::clone(&coordinator);
        if let Err(e) = ctrlc::set_handler(move || coordinator.request_shutdown()) {
            tracing::warn!(error = %e, "could not install Ctrl-C handler");
        }
    }

    let result = match coordinator.run(cli.ticks, cli.stages) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("Pipeline results ({} ticks, {} stages):", cli.ticks, cli.stages);
    println!("  {}", result.summary());
    println!("  Throughput: {:.2} items/s", result.throughput_per_sec());
    println!("  Barrier arrivals: {}", result.barrier_arrivals);
    for stage in &result.stages {
        match stage.exit {
            Some(reason) => println!(
                "  Stage {} ({}): {:?} after {} ticks ({})",
                stage.index + 1,
                stage.name,
                stage.state,
                stage.ticks_completed,
                reason
            ),
            None => println!(
                "  Stage {} ({}): {:?} after {} ticks",
                stage.index + 1,
                stage.name,
                stage.state,
                stage.ticks_completed
            ),
        }
    }
    match result.bottleneck() {
        Bottleneck::Balanced => println!("  Balance: pipeline is balanced"),
        Bottleneck::Processing => println!("  Balance: processing stage is the bottleneck"),
        Bottleneck::Filtering => println!("  Balance: filter stage is the bottleneck"),
    }
    if let Some(path) = &cli.log_file {
        println!("  Records written to {}", path.display());
    }

    ExitCode::SUCCESS
}
