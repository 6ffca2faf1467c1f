//! Mix runtime helpers.
//!
//! Wires decoders, a simulated video clock and the raw PCM writer around the mixer worker.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use audio_mix::decode;
use audio_mix::engine::{MixEngine, MixedFrame};
use audio_mix::format::{AudioFrame, MICROSECONDS, Rational, rescale};
use audio_mix::pipeline::{self, MixerInput};
use audio_mix_types::{
    GroupId, MixStats, MuteUnmuteCommand, PeerPosition, StreamAddress, VideoMixSyncEvent,
};
use crossbeam_channel::{Receiver, Sender};

use crate::config::MixRunConfig;

/// How far (media time) a decoder may run ahead of the clock.
const DECODE_LEAD_US: i64 = 200_000;
const MAX_WAIT_SLICE: Duration = Duration::from_millis(50);

/// Print what the decoder reports for `path` as JSON.
pub fn print_params(path: &Path) -> Result<()> {
    let source = decode::open_file(path)?;
    let params = source.params();
    let info = source.info();
    let report = serde_json::json!({
        "path": path.display().to_string(),
        "sample_rate": params.sample_rate,
        "channels": params.channel_count(),
        "format": params.format.name(),
        "codec": info.codec,
        "bit_depth": info.bit_depth,
        "duration_ms": info.duration_ms,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Media clock running at `speed` times real time from `start`.
#[derive(Clone, Copy, Debug)]
struct SimClock {
    start: Instant,
    speed: f64,
}

impl SimClock {
    fn start(speed: f64) -> Self {
        Self {
            start: Instant::now(),
            speed,
        }
    }

    fn now_us(&self) -> i64 {
        (self.start.elapsed().as_secs_f64() * self.speed * 1_000_000.0) as i64
    }

    /// Sleep until media time `target_us`. Returns `false` if `stop` was raised first.
    fn wait_until(&self, target_us: i64, stop: &AtomicBool) -> bool {
        loop {
            if stop.load(Ordering::Relaxed) {
                return false;
            }
            let now = self.now_us();
            if now >= target_us {
                return true;
            }
            let real = Duration::from_secs_f64((target_us - now) as f64 / self.speed / 1_000_000.0);
            thread::sleep(real.min(MAX_WAIT_SLICE));
        }
    }
}

fn clock_event(position_us: i64, groups: &[GroupId]) -> VideoMixSyncEvent {
    VideoMixSyncEvent {
        video_mix_position: position_us,
        peer_positions: groups
            .iter()
            .map(|&group_id| PeerPosition {
                group_id,
                position: position_us,
            })
            .collect(),
    }
}

/// Mix every input of `config` and write raw PCM to its output.
///
/// Returns the final mixer stats; a fatal mixer error is returned as `Err`.
pub fn run_mix(config: MixRunConfig, install_ctrlc: bool) -> Result<MixStats> {
    let sources = config
        .inputs
        .iter()
        .map(|path| decode::open_file(path))
        .collect::<Result<Vec<_>>>()?;

    let handle = pipeline::spawn_mixer(MixEngine::new(config.mixer.clone())?)?;
    let control = handle.sender();
    let stop = Arc::new(AtomicBool::new(false));

    if install_ctrlc {
        let control = control.clone();
        let stop = stop.clone();
        let _ = ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
            let _ = control.send(MixerInput::Stop);
        });
    }

    let groups: Vec<GroupId> = (0..sources.len() as GroupId).collect();
    for (group_id, source) in groups.iter().zip(&sources) {
        let address = StreamAddress::new(*group_id, 0);
        tracing::info!(
            %address,
            params = %source.params(),
            codec = ?source.info().codec,
            "input stream"
        );
        control.send(MixerInput::Join {
            address,
            params: source.params(),
        })?;
    }
    if !config.mute.is_empty() {
        control.send(MixerInput::Mute(MuteUnmuteCommand {
            mute: config.mute.clone(),
            unmute: Vec::new(),
        }))?;
    }

    let clock = SimClock::start(config.speed);
    // Anchor every group before any audio arrives.
    control.send(MixerInput::Clock(clock_event(0, &groups)))?;

    let interval = Duration::from_millis(config.clock_interval_ms);
    let frame_us = rescale(
        config.mixer.frame_size as i64,
        Rational::per_sample(config.mixer.sample_rate),
        MICROSECONDS,
    );
    let grace_us = frame_us + 2 * (interval.as_secs_f64() * config.speed * 1_000_000.0) as i64;

    let mut workers = vec![spawn_clock(clock, interval, groups.clone(), control.clone(), stop.clone())?];
    for (group_id, source) in groups.iter().zip(sources) {
        let address = StreamAddress::new(*group_id, 0);
        let tx = control.clone();
        let stop = stop.clone();
        let worker = thread::Builder::new()
            .name(format!("decode-{address}"))
            .spawn(move || feed_stream(address, source, tx, clock, stop, grace_us))
            .context("spawn decode thread")?;
        workers.push(worker);
    }

    let written = write_frames(&config.output, handle.frames());
    if written.is_err() {
        let _ = control.send(MixerInput::Stop);
    }
    stop.store(true, Ordering::Relaxed);
    drop(control);

    let stats = handle.join();
    for worker in workers {
        match worker.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("input thread error: {e:#}"),
            Err(_) => tracing::warn!("input thread panicked"),
        }
    }
    let frames = written?;
    tracing::info!(frames, output = ?config.output, "mixed output written");
    stats
}

fn spawn_clock(
    clock: SimClock,
    interval: Duration,
    groups: Vec<GroupId>,
    tx: Sender<MixerInput>,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<Result<()>>> {
    thread::Builder::new()
        .name("video-clock".to_string())
        .spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                thread::sleep(interval);
                let event = clock_event(clock.now_us(), &groups);
                if tx.send(MixerInput::Clock(event)).is_err() {
                    break;
                }
            }
            Ok(())
        })
        .context("spawn clock thread")
}

/// Feed decoded `frames` into the mixer, paced against `clock`.
///
/// The stream is flushed and removed however decoding ends; a decoder error is returned after
/// the flush so the mix still reaches its end.
fn feed_stream<I>(
    address: StreamAddress,
    frames: I,
    tx: Sender<MixerInput>,
    clock: SimClock,
    stop: Arc<AtomicBool>,
    grace_us: i64,
) -> Result<()>
where
    I: IntoIterator<Item = Result<AudioFrame>>,
{
    let mut end_us = 0;
    let result = forward_frames(address, frames, &tx, clock, &stop, &mut end_us);
    match &result {
        Ok(()) => tracing::info!(%address, end_us, "input decoded"),
        Err(e) => tracing::warn!(%address, end_us, "input failed, flushing: {e:#}"),
    }
    // The flush runs a final mix pass; wait until the clock covers the tail.
    clock.wait_until(end_us + grace_us, &stop);
    let _ = tx.send(MixerInput::Flush { address });
    let _ = tx.send(MixerInput::Remove { address });
    result
}

/// Send frames until the input ends, `stop` is raised or the mixer goes away.
fn forward_frames<I>(
    address: StreamAddress,
    frames: I,
    tx: &Sender<MixerInput>,
    clock: SimClock,
    stop: &AtomicBool,
    end_us: &mut i64,
) -> Result<()>
where
    I: IntoIterator<Item = Result<AudioFrame>>,
{
    for frame in frames {
        let frame = frame?;
        let len_us = rescale(
            frame.nb_samples() as i64,
            Rational::per_sample(frame.params.sample_rate),
            MICROSECONDS,
        );
        match frame.pts {
            Some(pts) => {
                let start_us = rescale(pts, frame.time_base, MICROSECONDS);
                if !clock.wait_until(start_us - DECODE_LEAD_US, stop) {
                    return Ok(());
                }
                *end_us = start_us + len_us;
            }
            None => *end_us += len_us,
        }
        if tx.send(MixerInput::Frame { address, frame }).is_err() {
            return Ok(());
        }
    }
    Ok(())
}

/// Write mixed frames as interleaved little-endian `f32` until the mixer exits.
fn write_frames(output: &Path, frames: Receiver<MixedFrame>) -> Result<u64> {
    let mut out: Box<dyn Write> = if output == Path::new("-") {
        Box::new(BufWriter::new(io::stdout().lock()))
    } else {
        let file = File::create(output).with_context(|| format!("create output {:?}", output))?;
        Box::new(BufWriter::new(file))
    };
    let mut count = 0u64;
    for frame in frames.iter() {
        for sample in frame.interleaved() {
            out.write_all(&sample.to_le_bytes())
                .with_context(|| format!("write output {:?}", output))?;
        }
        count += 1;
    }
    out.flush().with_context(|| format!("flush output {:?}", output))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use audio_mix::config::MixerConfig;
    use audio_mix::format::{AudioParams, SampleFormat};
    use audio_mix_types::MixEndReason;
    use std::path::PathBuf;

    /// 16-bit PCM stereo WAV with a constant sample value.
    fn write_wav(name: &str, rate: u32, frames: usize, value: i16) -> PathBuf {
        let data_len = (frames * 4) as u32;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&rate.to_le_bytes());
        bytes.extend_from_slice(&(rate * 4).to_le_bytes());
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for _ in 0..frames * 2 {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        let path = std::env::temp_dir().join(format!("mix-cli-{}-{name}.wav", std::process::id()));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn clock_event_puts_every_group_in_sync() {
        let event = clock_event(40_000, &[0, 1]);
        assert_eq!(event.video_mix_position, 40_000);
        assert_eq!(event.peer_positions.len(), 2);
        assert!(event.peer_positions.iter().all(|p| p.position == 40_000));
    }

    #[test]
    fn sim_clock_wait_respects_stop() {
        let clock = SimClock::start(1.0);
        let stop = AtomicBool::new(true);
        assert!(!clock.wait_until(10_000_000, &stop));
        let stop = AtomicBool::new(false);
        assert!(clock.wait_until(0, &stop));
    }

    #[test]
    fn sim_clock_scales_with_speed() {
        let clock = SimClock::start(100.0);
        let stop = AtomicBool::new(false);
        assert!(clock.wait_until(500_000, &stop));
        assert!(clock.start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn decoder_error_still_ends_the_mix() {
        let engine = MixEngine::new(MixerConfig {
            frame_size: 160,
            sample_rate: 8_000,
            ..MixerConfig::default()
        })
        .unwrap();
        let handle = pipeline::spawn_mixer(engine).unwrap();
        let frames = handle.frames();
        let tx = handle.sender();
        let address = StreamAddress::new(0, 0);
        let params = AudioParams::with_channel_count(SampleFormat::F32Planar, 8_000, 2).unwrap();
        tx.send(MixerInput::Join { address, params }).unwrap();
        tx.send(MixerInput::Clock(clock_event(0, &[0]))).unwrap();

        let clock = SimClock::start(10.0);
        let stop = Arc::new(AtomicBool::new(false));
        let ticker = spawn_clock(
            clock,
            Duration::from_millis(5),
            vec![0],
            tx.clone(),
            stop.clone(),
        )
        .unwrap();

        let planes = vec![vec![0.5f32; 800], vec![0.5f32; 800]];
        let decoded = vec![
            Ok(AudioFrame::from_planes(8_000, params.channels, Some(0), &planes)),
            Err(anyhow!("corrupt packet")),
        ];
        let err = feed_stream(address, decoded, tx, clock, stop.clone(), 120_000).unwrap_err();
        assert!(err.to_string().contains("corrupt packet"));

        let stats = handle.join().unwrap();
        stop.store(true, Ordering::Relaxed);
        ticker.join().unwrap().unwrap();
        assert_eq!(stats.end_reason, Some(MixEndReason::Eof));
        assert!(frames.try_iter().count() >= 4);
    }

    #[test]
    fn mixes_two_files_to_raw_pcm() {
        let a = write_wav("a", 8_000, 4_000, 16_384);
        let b = write_wav("b", 8_000, 4_000, 8_192);
        let output =
            std::env::temp_dir().join(format!("mix-cli-{}-out.f32", std::process::id()));
        let config = MixRunConfig {
            inputs: vec![a.clone(), b.clone()],
            output: output.clone(),
            mixer: MixerConfig {
                frame_size: 160,
                sample_rate: 8_000,
                ..MixerConfig::default()
            },
            mute: Vec::new(),
            clock_interval_ms: 5,
            speed: 10.0,
        };

        let stats = run_mix(config, false).unwrap();
        assert_eq!(stats.end_reason, Some(MixEndReason::Eof));
        assert!(stats.output_frames >= 20, "output frames {}", stats.output_frames);

        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(bytes.len() as u64, stats.output_frames * 160 * 2 * 4);
        // ((0 + 0.5) / 2 + 0.25) / 2 once both streams are mixing.
        let first = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(first, 0.25);

        for path in [a, b, output] {
            std::fs::remove_file(path).ok();
        }
    }
}
