use std::path::PathBuf;

use audio_mix_types::GroupId;
use clap::{Args as ClapArgs, Parser, Subcommand};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "audio-mix", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mix audio files against a simulated video clock into raw f32le PCM
    Mix(MixArgs),

    /// Print the decoded parameters of an audio file
    Params {
        /// Path to audio file
        #[arg(long)]
        input: PathBuf,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct MixArgs {
    /// Input audio file; repeat for more streams (group id = position)
    #[arg(long = "input", required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output path for interleaved little-endian f32 samples ("-" for stdout)
    #[arg(long)]
    pub output: PathBuf,

    /// Optional TOML file with a [mixer] table
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Samples per channel in each mixed frame
    #[arg(long)]
    pub frame_size: Option<usize>,

    /// Destination sample rate
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Destination channel count
    #[arg(long)]
    pub channels: Option<usize>,

    /// Mute every stream's group when it joins
    #[arg(long)]
    pub mute_at_start: bool,

    /// Keep running after the last stream flushes
    #[arg(long)]
    pub no_auto_quit: bool,

    /// Group to mute from the start; repeatable
    #[arg(long = "mute")]
    pub mute: Vec<GroupId>,

    /// Interval between simulated video clock events
    #[arg(long)]
    pub clock_interval_ms: Option<u64>,

    /// Clock speed multiplier (2.0 mixes twice as fast as real time)
    #[arg(long)]
    pub speed: Option<f64>,
}
