//! File decode stage.
//!
//! Uses Symphonia to:
//! - probe the input container/codec
//! - decode packets into interleaved `f32` frames stamped with the packet timestamp

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::{Channels, SampleBuffer};
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::format::{AudioFrame, AudioParams, Rational, SampleData, SampleFormat};

/// Metadata captured while probing the source.
#[derive(Clone, Debug, Default)]
pub struct SourceInfo {
    /// Codec name (best-effort).
    pub codec: Option<String>,
    /// Source bit depth (best-effort).
    pub bit_depth: Option<u16>,
    /// Total duration (best-effort).
    pub duration_ms: Option<u64>,
}

/// An opened source producing [`AudioFrame`]s in presentation order.
pub struct DecodedSource {
    params: AudioParams,
    time_base: Rational,
    info: SourceInfo,
    track_id: u32,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
}

/// Open `path` and prepare its default track for decoding.
pub fn open_file(path: &Path) -> Result<DecodedSource> {
    let file = File::open(path).with_context(|| format!("open {:?}", path))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .with_context(|| format!("probe {:?}", path))?;

    let format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("No default audio track"))?;
    let codec_params = track.codec_params.clone();
    let track_id = track.id;

    let rate = codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("Unknown sample rate"))?;
    let channels = source_channels(&codec_params).ok_or_else(|| anyhow!("Unknown channels"))?;
    let time_base = codec_params
        .time_base
        .map(|tb| Rational::new(i64::from(tb.numer), i64::from(tb.denom)))
        .unwrap_or(Rational::per_sample(rate));

    let decoder = symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;

    let info = SourceInfo {
        codec: codec_name_from_params(&codec_params),
        bit_depth: codec_params
            .bits_per_sample
            .or(codec_params.bits_per_coded_sample)
            .and_then(|v| u16::try_from(v).ok()),
        duration_ms: duration_ms_from_codec_params(&codec_params),
    };

    Ok(DecodedSource {
        params: AudioParams::new(SampleFormat::F32, rate, channels),
        time_base,
        info,
        track_id,
        format,
        decoder,
    })
}

impl DecodedSource {
    /// Parameters of every frame this source yields.
    pub fn params(&self) -> AudioParams {
        self.params
    }

    pub fn info(&self) -> &SourceInfo {
        &self.info
    }

    /// Decode the next frame; `Ok(None)` at end of stream.
    ///
    /// Corrupt packets are skipped.
    pub fn next_frame(&mut self) -> Result<Option<AudioFrame>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => {
                    tracing::debug!("demux stopped: {e}");
                    return Ok(None);
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::warn!(ts = packet.ts(), "skipping undecodable packet: {e}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);

            return Ok(Some(AudioFrame {
                params: AudioParams::new(SampleFormat::F32, spec.rate, spec.channels),
                pts: i64::try_from(packet.ts()).ok(),
                time_base: self.time_base,
                data: SampleData::F32(sample_buf.samples().to_vec()),
            }));
        }
    }
}

impl Iterator for DecodedSource {
    type Item = Result<AudioFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

fn source_channels(params: &CodecParameters) -> Option<Channels> {
    params
        .channels
        .or_else(|| params.channel_layout.map(|layout| layout.into_channels()))
}

/// Best-effort duration in milliseconds from codec metadata.
///
/// Returns `None` if the container does not provide total frames or sample rate.
fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

/// Best-effort codec label.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}
