use anyhow::{Result, bail};
use serde::Deserialize;

use crate::format::{AudioParams, SampleFormat, default_layout};

/// Mixer tuning parameters shared by the fifo/synchronizer/engine stages.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct MixerConfig {
    /// Samples per mixed output frame.
    pub frame_size: usize,
    /// Add the group of every newly joined stream to the mute set.
    pub mute_new_streams_at_start: bool,
    /// Report end-of-stream once the last input has flushed.
    ///
    /// When disabled the mixer stays idle and survives having zero participants.
    pub auto_quit_on_empty: bool,
    /// Destination sample rate in Hz.
    pub sample_rate: u32,
    /// Destination channel count (default layout for the count).
    pub channels: usize,
    /// Destination sample format. Mixing requires planar `f32`.
    pub format: SampleFormat,
    /// Input chunk size in frames for the rate converter.
    pub resample_chunk_frames: usize,
    /// Buffered duration above which a stream without a video anchor drops its oldest audio.
    pub max_free_running_ms: f64,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            frame_size: 1024,
            mute_new_streams_at_start: false,
            auto_quit_on_empty: true,
            sample_rate: 44_100,
            channels: 2,
            format: SampleFormat::F32Planar,
            resample_chunk_frames: 1024,
            max_free_running_ms: 3000.0,
        }
    }
}

impl MixerConfig {
    /// Reject configurations the mixing arithmetic cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.frame_size == 0 {
            bail!("frame_size must be positive");
        }
        if self.sample_rate == 0 {
            bail!("sample_rate must be positive");
        }
        if self.format != SampleFormat::F32Planar {
            bail!("destination format must be f32p, got {}", self.format);
        }
        if default_layout(self.channels).is_none() {
            bail!("unsupported destination channel count {}", self.channels);
        }
        if !(self.max_free_running_ms.is_finite() && self.max_free_running_ms > 0.0) {
            bail!("max_free_running_ms must be a positive number");
        }
        Ok(())
    }

    /// Destination parameters every stream is converted to.
    pub fn destination(&self) -> Result<AudioParams> {
        AudioParams::with_channel_count(self.format, self.sample_rate, self.channels)
    }
}
