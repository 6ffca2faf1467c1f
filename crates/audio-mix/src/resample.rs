//! Format, layout and rate conversion into the destination domain.
//!
//! Conversion happens in three steps:
//! 1. decode the inbound sample format into planar `f32`
//! 2. map the channel layout to the destination channel count
//! 3. when rates differ, run Rubato's sinc resampler over fixed input chunks
//!
//! The converter is synchronous: it is driven by the fifo that owns it and buffers any
//! partial resampler chunk until more input (or a flush) arrives.

use anyhow::{Result, anyhow, bail};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::format::{AudioFrame, AudioParams, ConversionParams, SampleFormat};

/// Converts inbound frames from `params.src` to planar `f32` in `params.dst`.
pub struct AudioConverter {
    params: ConversionParams,
    rate: Option<RateConverter>,
}

impl AudioConverter {
    /// Build a converter; `chunk_frames` is the resampler input chunk size.
    pub fn new(params: ConversionParams, chunk_frames: usize) -> Result<Self> {
        if params.dst.format != SampleFormat::F32Planar {
            bail!("unsupported destination format {}", params.dst.format);
        }
        if params.src.sample_rate == 0 || params.dst.sample_rate == 0 {
            bail!("sample rates must be positive ({params})");
        }
        if params.src.channel_count() == 0 || params.dst.channel_count() == 0 {
            bail!("channel layouts must not be empty ({params})");
        }

        let rate = if params.src.sample_rate == params.dst.sample_rate {
            None
        } else {
            Some(RateConverter::new(
                params.src.sample_rate,
                params.dst.sample_rate,
                params.dst.channel_count(),
                chunk_frames,
            )?)
        };
        Ok(Self { params, rate })
    }

    pub fn params(&self) -> &ConversionParams {
        &self.params
    }

    /// Convert one frame; the result may be empty while the resampler accumulates a chunk.
    pub fn convert(&mut self, frame: &AudioFrame) -> Result<Vec<Vec<f32>>> {
        check_source(&self.params.src, frame)?;
        let planes = map_channels(frame.to_planar_f32()?, self.params.dst.channel_count());
        match self.rate.as_mut() {
            Some(rate) => rate.process(&planes),
            None => Ok(planes),
        }
    }

    /// Drain whatever the resampler still holds.
    pub fn flush(&mut self) -> Result<Vec<Vec<f32>>> {
        match self.rate.as_mut() {
            Some(rate) => rate.flush(),
            None => Ok(vec![Vec::new(); self.params.dst.channel_count()]),
        }
    }
}

/// Reject a frame whose format, rate or channel count differs from the declared source.
pub fn check_source(src: &AudioParams, frame: &AudioFrame) -> Result<()> {
    if frame.params.format != src.format
        || frame.params.sample_rate != src.sample_rate
        || frame.params.channel_count() != src.channel_count()
    {
        bail!(
            "frame [{}] does not match declared source [{}]",
            frame.params,
            src
        );
    }
    Ok(())
}

/// Map planes onto `dst_channels` planes.
///
/// Mapping rules:
/// - mono → N: duplicate channel 0
/// - N → mono: average all channels
/// - equal counts: pass-through
/// - other layouts: best-effort "clamp to available channels"
pub fn map_channels(planes: Vec<Vec<f32>>, dst_channels: usize) -> Vec<Vec<f32>> {
    let src_channels = planes.len();
    if src_channels == dst_channels || src_channels == 0 {
        return planes;
    }
    let frames = planes[0].len();
    match (src_channels, dst_channels) {
        (1, _) => vec![planes[0].clone(); dst_channels],
        (_, 1) => {
            let scale = 1.0 / src_channels as f32;
            let mono = (0..frames)
                .map(|i| planes.iter().map(|p| p[i]).sum::<f32>() * scale)
                .collect();
            vec![mono]
        }
        _ => (0..dst_channels)
            .map(|ch| planes[ch.min(src_channels - 1)].clone())
            .collect(),
    }
}

/// Upper bound on silent chunks pushed through the filter on flush.
const MAX_DRAIN_CHUNKS: usize = 8;

/// Streaming sample-rate converter over planar data.
///
/// Rubato consumes fixed input chunks; input is staged interleaved in `pending` until a full
/// chunk is available. The filter's output delay is trimmed from the start and drained with
/// silence on flush, so the total output is `input * ratio` frames aligned with the input.
struct RateConverter {
    resampler: Box<dyn Resampler<f32> + Send>,
    channels: usize,
    chunk_frames: usize,
    ratio: f64,
    pending: Vec<f32>,
    out_interleaved: Vec<f32>,
    /// Leading output frames still to drop.
    skip_frames: usize,
    input_total: u64,
    output_total: u64,
    /// Output cap set on flush.
    output_limit: Option<u64>,
}

impl RateConverter {
    fn new(src_rate: u32, dst_rate: u32, channels: usize, chunk_frames: usize) -> Result<Self> {
        let f_ratio = dst_rate as f64 / src_rate as f64;

        let sinc_len = 128;
        let oversampling_factor = 256;
        let interpolation = SincInterpolationType::Cubic;
        let window = WindowFunction::BlackmanHarris2;
        let f_cutoff = calculate_cutoff(sinc_len, window);

        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff,
            interpolation,
            oversampling_factor,
            window,
        };

        let chunk_frames = chunk_frames.max(1);
        let resampler = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init error: {e}"))?;

        // Room for one chunk at the maximum relative ratio plus the filter's startup slack.
        let out_frames = ((chunk_frames as f64 * f_ratio * 1.1).ceil() as usize + sinc_len)
            .max(chunk_frames * 3);

        let skip_frames = resampler.output_delay();
        Ok(Self {
            resampler: Box::new(resampler),
            channels,
            chunk_frames,
            ratio: f_ratio,
            pending: Vec::new(),
            out_interleaved: vec![0.0f32; out_frames * channels],
            skip_frames,
            input_total: 0,
            output_total: 0,
            output_limit: None,
        })
    }

    fn process(&mut self, planes: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        let frames = planes.first().map(Vec::len).unwrap_or(0);
        self.input_total += frames as u64;
        self.pending.reserve(frames * self.channels);
        for i in 0..frames {
            for plane in planes {
                self.pending.push(plane[i]);
            }
        }

        let mut out = vec![Vec::new(); self.channels];
        let chunk_samples = self.chunk_frames * self.channels;
        while self.pending.len() >= chunk_samples {
            self.run_chunk(None, &mut out)?;
            self.pending.drain(..chunk_samples);
        }
        Ok(out)
    }

    fn flush(&mut self) -> Result<Vec<Vec<f32>>> {
        let mut out = vec![Vec::new(); self.channels];
        let expected = (self.input_total as f64 * self.ratio).round() as u64;
        self.output_limit = Some(expected);

        let chunk_samples = self.chunk_frames * self.channels;
        let tail_frames = self.pending.len() / self.channels;
        if tail_frames > 0 {
            self.pending.resize(chunk_samples, 0.0);
            self.run_chunk(Some(tail_frames), &mut out)?;
        }

        // Push silence until the delayed samples have come out.
        self.pending.clear();
        self.pending.resize(chunk_samples, 0.0);
        let mut drained = 0;
        while self.output_total < expected && drained < MAX_DRAIN_CHUNKS {
            self.run_chunk(None, &mut out)?;
            drained += 1;
        }
        self.pending.clear();

        self.resampler.reset();
        self.skip_frames = self.resampler.output_delay();
        self.input_total = 0;
        self.output_total = 0;
        self.output_limit = None;
        Ok(out)
    }

    /// Resample the first chunk of `pending` and append the result to `out`.
    fn run_chunk(&mut self, partial_len: Option<usize>, out: &mut [Vec<f32>]) -> Result<()> {
        let channels = self.channels;
        let chunk_samples = self.chunk_frames * channels;

        let input_adapter =
            InterleavedSlice::new(&self.pending[..chunk_samples], channels, self.chunk_frames)
                .map_err(|e| anyhow!("interleaved slice (input) error: {e}"))?;

        let out_capacity_frames = self.out_interleaved.len() / channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut self.out_interleaved, channels, out_capacity_frames)
                .map_err(|e| anyhow!("interleaved slice (output) error: {e}"))?;

        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len,
        };

        let (_nbr_in, nbr_out) = self
            .resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| anyhow!("resampler process error: {e}"))?;

        for frame in self.out_interleaved[..nbr_out * channels].chunks_exact(channels) {
            if self.skip_frames > 0 {
                self.skip_frames -= 1;
                continue;
            }
            if self.output_limit.is_some_and(|limit| self.output_total >= limit) {
                break;
            }
            for (plane, sample) in out.iter_mut().zip(frame) {
                plane.push(*sample);
            }
            self.output_total += 1;
        }
        Ok(())
    }
}
