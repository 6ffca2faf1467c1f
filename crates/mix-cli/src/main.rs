//! Audio Mix: mixes local audio files as if they were participants of a video mix.
//!
//! ## Pipeline
//! 1. **Decode**: one thread per input decodes with Symphonia, paced against a simulated clock.
//! 2. **Clock**: a thread emits video mix sync events with every group in sync.
//! 3. **Mix**: the mixer worker aligns each stream to the clock and averages fixed-size frames.
//! 4. **Write**: the main thread writes mixed frames as raw interleaved `f32` little-endian.
//!
//! Final statistics are printed as JSON.

mod cli;
mod config;
mod runtime;

use std::path::Path;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,audio_mix=info")),
        )
        .init();

    match args.cmd {
        cli::Command::Params { input } => runtime::print_params(&input),
        cli::Command::Mix(mix) => {
            let config = config::MixRunConfig::resolve(mix)?;
            let to_stdout = config.output == Path::new("-");
            let stats = runtime::run_mix(config, true)?;
            let json = serde_json::to_string_pretty(&stats)?;
            if to_stdout {
                eprintln!("{json}");
            } else {
                println!("{json}");
            }
            Ok(())
        }
    }
}
