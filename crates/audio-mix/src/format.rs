//! Sample formats, stream parameters and the frame/chunk containers exchanged between stages.
//!
//! Inbound frames may carry any supported sample format (packed or planar, integer or float).
//! Everything downstream of the conversion stage works on planar `f32` planes.

use std::fmt;

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use symphonia::core::audio::Channels;

/// Time base of video clock events (microseconds).
pub const MICROSECONDS: Rational = Rational::new(1, 1_000_000);

/// A rational time base (`num / den` seconds per tick).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    /// Time base of one sample at `rate` Hz.
    pub const fn per_sample(rate: u32) -> Self {
        Self::new(1, rate as i64)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Convert `value` from time base `from` to time base `to`, rounding to nearest
/// (halfway cases away from zero).
///
/// Degenerate time bases (zero numerator or denominator) return `value` unchanged.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    if from == to || from.den == 0 || to.num == 0 || to.den == 0 {
        return value;
    }
    let num = value as i128 * from.num as i128 * to.den as i128;
    let den = from.den as i128 * to.num as i128;
    let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
    let half = den / 2;
    let rounded = if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    };
    rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Sample storage format of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    #[serde(rename = "u8")]
    U8,
    #[serde(rename = "s16")]
    S16,
    #[serde(rename = "s32")]
    S32,
    #[serde(rename = "f32")]
    F32,
    #[serde(rename = "u8p")]
    U8Planar,
    #[serde(rename = "s16p")]
    S16Planar,
    #[serde(rename = "s32p")]
    S32Planar,
    #[serde(rename = "f32p")]
    F32Planar,
}

impl SampleFormat {
    pub fn is_planar(self) -> bool {
        matches!(
            self,
            SampleFormat::U8Planar
                | SampleFormat::S16Planar
                | SampleFormat::S32Planar
                | SampleFormat::F32Planar
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S16 => "s16",
            SampleFormat::S32 => "s32",
            SampleFormat::F32 => "f32",
            SampleFormat::U8Planar => "u8p",
            SampleFormat::S16Planar => "s16p",
            SampleFormat::S32Planar => "s32p",
            SampleFormat::F32Planar => "f32p",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Default layout for a bare channel count (mono is front-centre, stereo is front L/R,
/// larger counts take the first `count` positions).
pub fn default_layout(count: usize) -> Option<Channels> {
    match count {
        1 => Some(Channels::FRONT_CENTRE),
        2 => Some(Channels::FRONT_LEFT | Channels::FRONT_RIGHT),
        3..=8 => Some(Channels::from_bits_truncate((1u32 << count) - 1)),
        _ => None,
    }
}

/// Format, rate and channel layout of an audio stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioParams {
    pub format: SampleFormat,
    pub sample_rate: u32,
    pub channels: Channels,
}

impl AudioParams {
    pub fn new(format: SampleFormat, sample_rate: u32, channels: Channels) -> Self {
        Self {
            format,
            sample_rate,
            channels,
        }
    }

    /// Build parameters from a channel count using [`default_layout`].
    pub fn with_channel_count(format: SampleFormat, sample_rate: u32, count: usize) -> Result<Self> {
        let channels =
            default_layout(count).ok_or_else(|| anyhow!("no default layout for {count} channels"))?;
        Ok(Self::new(format, sample_rate, channels))
    }

    pub fn channel_count(&self) -> usize {
        self.channels.count()
    }

    /// Convert a sample count at this rate into milliseconds.
    pub fn samples_to_ms(&self, samples: usize) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        samples as f64 * 1000.0 / self.sample_rate as f64
    }
}

impl fmt::Display for AudioParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}Hz {}ch (layout {:#x})",
            self.format,
            self.sample_rate,
            self.channel_count(),
            self.channels.bits()
        )
    }
}

/// Source and destination parameters of one conversion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConversionParams {
    pub src: AudioParams,
    pub dst: AudioParams,
}

impl ConversionParams {
    /// Identical source and destination: samples are buffered without conversion.
    pub fn is_passthrough(&self) -> bool {
        self.src == self.dst
    }
}

impl fmt::Display for ConversionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src [{}] -> dst [{}]", self.src, self.dst)
    }
}

/// Raw sample storage. Planar data stores the planes back to back.
#[derive(Clone, Debug, PartialEq)]
pub enum SampleData {
    U8(Vec<u8>),
    S16(Vec<i16>),
    S32(Vec<i32>),
    F32(Vec<f32>),
}

impl SampleData {
    fn len(&self) -> usize {
        match self {
            SampleData::U8(v) => v.len(),
            SampleData::S16(v) => v.len(),
            SampleData::S32(v) => v.len(),
            SampleData::F32(v) => v.len(),
        }
    }

    fn matches(&self, format: SampleFormat) -> bool {
        matches!(
            (self, format),
            (SampleData::U8(_), SampleFormat::U8 | SampleFormat::U8Planar)
                | (SampleData::S16(_), SampleFormat::S16 | SampleFormat::S16Planar)
                | (SampleData::S32(_), SampleFormat::S32 | SampleFormat::S32Planar)
                | (SampleData::F32(_), SampleFormat::F32 | SampleFormat::F32Planar)
        )
    }

    fn sample_f32(&self, idx: usize) -> f32 {
        match self {
            SampleData::U8(v) => (v[idx] as f32 - 128.0) / 128.0,
            SampleData::S16(v) => v[idx] as f32 / 32_768.0,
            SampleData::S32(v) => v[idx] as f32 / 2_147_483_648.0,
            SampleData::F32(v) => v[idx],
        }
    }
}

/// One decoded inbound audio frame.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFrame {
    pub params: AudioParams,
    /// Presentation timestamp in `time_base` units, when known.
    pub pts: Option<i64>,
    pub time_base: Rational,
    pub data: SampleData,
}

impl AudioFrame {
    /// Build a planar `f32` frame from per-channel planes; `pts` is in samples at the frame rate.
    pub fn from_planes(sample_rate: u32, channels: Channels, pts: Option<i64>, planes: &[Vec<f32>]) -> Self {
        let data = planes.iter().flat_map(|p| p.iter().copied()).collect();
        Self {
            params: AudioParams::new(SampleFormat::F32Planar, sample_rate, channels),
            pts,
            time_base: Rational::per_sample(sample_rate),
            data: SampleData::F32(data),
        }
    }

    /// Samples per channel.
    pub fn nb_samples(&self) -> usize {
        let channels = self.params.channel_count();
        if channels == 0 {
            return 0;
        }
        self.data.len() / channels
    }

    /// Decode the frame into planar `f32`, one `Vec` per channel.
    pub fn to_planar_f32(&self) -> Result<Vec<Vec<f32>>> {
        let channels = self.params.channel_count();
        if channels == 0 {
            bail!("frame has no channels");
        }
        if !self.data.matches(self.params.format) {
            bail!("sample data does not match declared format {}", self.params.format);
        }
        if self.data.len() % channels != 0 {
            bail!(
                "sample count {} is not a multiple of {} channels",
                self.data.len(),
                channels
            );
        }
        let frames = self.data.len() / channels;
        let planar = self.params.format.is_planar();
        let planes = (0..channels)
            .map(|ch| {
                (0..frames)
                    .map(|i| {
                        let idx = if planar { ch * frames + i } else { i * channels + ch };
                        self.data.sample_f32(idx)
                    })
                    .collect()
            })
            .collect();
        Ok(planes)
    }
}

/// A run of destination-domain samples dequeued from a fifo.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioChunk {
    /// Position of the first sample in destination sample units.
    pub position: i64,
    pub planes: Vec<Vec<f32>>,
}

impl AudioChunk {
    /// Samples per channel.
    pub fn len(&self) -> usize {
        self.planes.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo() -> Channels {
        Channels::FRONT_LEFT | Channels::FRONT_RIGHT
    }

    #[test]
    fn rescale_microseconds_to_samples_rounds_to_nearest() {
        let to = Rational::per_sample(44_100);
        assert_eq!(rescale(1_000_000, MICROSECONDS, to), 44_100);
        assert_eq!(rescale(10, MICROSECONDS, to), 0);
        assert_eq!(rescale(12, MICROSECONDS, to), 1);
        assert_eq!(rescale(-12, MICROSECONDS, to), -1);
        assert_eq!(rescale(5, to, to), 5);
    }

    #[test]
    fn rescale_between_sample_rates() {
        let from = Rational::per_sample(48_000);
        let to = Rational::per_sample(44_100);
        assert_eq!(rescale(48_000, from, to), 44_100);
    }

    #[test]
    fn default_layout_by_count() {
        assert_eq!(default_layout(1).unwrap().count(), 1);
        assert_eq!(default_layout(2), Some(stereo()));
        assert_eq!(default_layout(6).unwrap().count(), 6);
        assert!(default_layout(0).is_none());
        assert!(default_layout(9).is_none());
    }

    #[test]
    fn packed_s16_decodes_to_planes() {
        let frame = AudioFrame {
            params: AudioParams::new(SampleFormat::S16, 8_000, stereo()),
            pts: None,
            time_base: Rational::per_sample(8_000),
            data: SampleData::S16(vec![16_384, -16_384, 0, 32_767]),
        };
        assert_eq!(frame.nb_samples(), 2);
        let planes = frame.to_planar_f32().unwrap();
        assert_eq!(planes[0], vec![0.5, 0.0]);
        assert_eq!(planes[1][0], -0.5);
    }

    #[test]
    fn planar_u8_decodes_to_planes() {
        let frame = AudioFrame {
            params: AudioParams::new(SampleFormat::U8Planar, 8_000, stereo()),
            pts: Some(0),
            time_base: Rational::per_sample(8_000),
            data: SampleData::U8(vec![128, 192, 64, 128]),
        };
        let planes = frame.to_planar_f32().unwrap();
        assert_eq!(planes[0], vec![0.0, 0.5]);
        assert_eq!(planes[1], vec![-0.5, 0.0]);
    }

    #[test]
    fn mismatched_data_is_rejected() {
        let frame = AudioFrame {
            params: AudioParams::new(SampleFormat::S16, 8_000, stereo()),
            pts: None,
            time_base: Rational::per_sample(8_000),
            data: SampleData::F32(vec![0.0, 0.0]),
        };
        assert!(frame.to_planar_f32().is_err());

        let ragged = AudioFrame {
            params: AudioParams::new(SampleFormat::F32, 8_000, stereo()),
            pts: None,
            time_base: Rational::per_sample(8_000),
            data: SampleData::F32(vec![0.0, 0.0, 0.0]),
        };
        assert!(ragged.to_planar_f32().is_err());
    }

    #[test]
    fn from_planes_round_trips() {
        let planes = vec![vec![0.1, 0.2], vec![0.3, 0.4]];
        let frame = AudioFrame::from_planes(44_100, stereo(), Some(7), &planes);
        assert_eq!(frame.nb_samples(), 2);
        assert_eq!(frame.to_planar_f32().unwrap(), planes);
    }
}
