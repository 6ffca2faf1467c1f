use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use audio_mix::config::MixerConfig;
use audio_mix_types::GroupId;
use serde::Deserialize;

use crate::cli::MixArgs;

const DEFAULT_CLOCK_INTERVAL_MS: u64 = 20;

/// Optional on-disk configuration.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub mixer: MixerConfig,
    pub run: RunFileConfig,
}

/// Simulation knobs.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct RunFileConfig {
    pub clock_interval_ms: Option<u64>,
    pub speed: Option<f64>,
    pub mute: Vec<GroupId>,
}

impl FileConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<FileConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Fully resolved settings for one `mix` run.
#[derive(Clone, Debug)]
pub struct MixRunConfig {
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    pub mixer: MixerConfig,
    pub mute: Vec<GroupId>,
    pub clock_interval_ms: u64,
    pub speed: f64,
}

impl MixRunConfig {
    /// Flags override the file; the file overrides defaults.
    pub fn resolve(args: MixArgs) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(args, file)
    }

    fn merge(args: MixArgs, file: FileConfig) -> Result<Self> {
        let mut mixer = file.mixer;
        if let Some(frame_size) = args.frame_size {
            mixer.frame_size = frame_size;
        }
        if let Some(rate) = args.sample_rate {
            mixer.sample_rate = rate;
        }
        if let Some(channels) = args.channels {
            mixer.channels = channels;
        }
        if args.mute_at_start {
            mixer.mute_new_streams_at_start = true;
        }
        if args.no_auto_quit {
            mixer.auto_quit_on_empty = false;
        }
        mixer.validate()?;

        let clock_interval_ms = args
            .clock_interval_ms
            .or(file.run.clock_interval_ms)
            .unwrap_or(DEFAULT_CLOCK_INTERVAL_MS);
        if clock_interval_ms == 0 {
            bail!("clock interval must be positive");
        }
        let speed = args.speed.or(file.run.speed).unwrap_or(1.0);
        if !(speed.is_finite() && speed > 0.0) {
            bail!("speed must be a positive number, got {speed}");
        }

        let mut mute = file.run.mute;
        mute.extend(args.mute);
        mute.sort_unstable();
        mute.dedup();

        Ok(Self {
            inputs: args.inputs,
            output: args.output,
            mixer,
            mute,
            clock_interval_ms,
            speed,
        })
    }
}
