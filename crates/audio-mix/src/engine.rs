//! Mix engine: stream membership, mix cadence, mute policy and frame assembly.
//!
//! ## Assumptions
//! - the video mixer sends a sync event before audio can be mixed past its position;
//! - video sync positions increase monotonically;
//! - each group's video may lag the video mix position; the jitter buffer lives on the
//!   video side.
//!
//! All positions inside the engine are in destination samples (time base `1/sample_rate`).
//! Clock events arrive in microseconds and are rescaled on receipt.
//!
//! ## Tick
//! Every inbound frame (or flush) runs the cadence loop: while the video clock is at least one
//! frame ahead of the mix position, every synchronizer is asked for its decision; a single
//! stream that is behind stalls the whole mix so streams stay in lock-step. Otherwise one
//! frame is assembled and the mix position advances by `frame_size`.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use audio_mix_types::{
    GroupId, MixEndReason, MixStats, MuteUnmuteCommand, StreamAddress, VideoMixSyncEvent,
};

use crate::config::MixerConfig;
use crate::fifo::SendOutcome;
use crate::format::{AudioChunk, AudioFrame, AudioParams, ConversionParams, MICROSECONDS, Rational, rescale};
use crate::status::{MixClockState, MixCounters};
use crate::sync::StreamSynchronizer;

/// Completion signal of one engine call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MixStatus {
    /// Normal progress.
    Continue,
    /// Not ready yet (clock not anchored, or a joining stream could not be set up); call again
    /// with the same or a later input.
    Retry,
    /// The last stream left and auto-quit is disabled; keep the engine running.
    Idle,
    /// The last stream left with auto-quit enabled; the mixed output is complete.
    EndOfStream,
}

/// One mixed output frame.
#[derive(Clone, Debug, PartialEq)]
pub struct MixedFrame {
    /// Mix position of the first sample (destination samples).
    pub position: i64,
    pub params: AudioParams,
    pub planes: Vec<Vec<f32>>,
}

impl MixedFrame {
    /// Samples per channel.
    pub fn len(&self) -> usize {
        self.planes.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Interleave the planes (`frame0[ch0], frame0[ch1], ...`).
    pub fn interleaved(&self) -> Vec<f32> {
        let frames = self.len();
        let mut out = Vec::with_capacity(frames * self.planes.len());
        for i in 0..frames {
            for plane in &self.planes {
                out.push(plane[i]);
            }
        }
        out
    }
}

/// Status plus whatever frames the call produced.
#[derive(Debug)]
pub struct MixOutcome {
    pub status: MixStatus,
    pub frames: Vec<MixedFrame>,
}

impl MixOutcome {
    fn status(status: MixStatus) -> Self {
        Self {
            status,
            frames: Vec::new(),
        }
    }
}

/// Latest video clock positions, in destination samples.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VideoClockSnapshot {
    pub video_mix_position: Option<i64>,
    pub peer_positions: BTreeMap<GroupId, i64>,
}

/// Inputs a mixer accepts from the surrounding pipeline.
///
/// `Err` results are fatal (buffer allocation failure); every recoverable condition is
/// reported through [`MixStatus`].
pub trait MixHandler {
    /// Announce a stream and its source parameters ahead of its first frame.
    fn on_join(&mut self, address: StreamAddress, source: AudioParams) -> MixStatus;
    /// Feed one decoded frame and run the mix cadence.
    fn on_frame(&mut self, address: StreamAddress, frame: AudioFrame) -> Result<MixOutcome>;
    /// Signal end-of-input for a stream and run the mix cadence.
    fn on_flush(&mut self, address: StreamAddress) -> Result<MixOutcome>;
    fn on_clock_event(&mut self, event: &VideoMixSyncEvent);
    fn on_mute_command(&mut self, command: &MuteUnmuteCommand);
    /// Drop a stream's synchronizer on the external end signal. Returns whether it existed.
    fn on_stream_removed(&mut self, address: StreamAddress) -> bool;
    fn stats(&self) -> MixStats;
    /// Record the terminal reason, log a summary and return the final stats.
    fn close(&mut self, reason: MixEndReason) -> MixStats;
}

/// Central audio mixer.
pub struct MixEngine {
    config: MixerConfig,
    dst: AudioParams,
    synchronizers: BTreeMap<StreamAddress, StreamSynchronizer>,
    flushed: BTreeSet<StreamAddress>,
    mute_groups: BTreeSet<GroupId>,
    start_mix_position: Option<i64>,
    current_mix_position: Option<i64>,
    clock: VideoClockSnapshot,
    counters: MixCounters,
}

impl MixEngine {
    pub fn new(config: MixerConfig) -> Result<Self> {
        config.validate()?;
        let dst = config.destination()?;
        tracing::info!(
            dst = %dst,
            frame_size = config.frame_size,
            mute_at_start = config.mute_new_streams_at_start,
            auto_quit = config.auto_quit_on_empty,
            "audio mix ready for dynamic join"
        );
        Ok(Self {
            config,
            dst,
            synchronizers: BTreeMap::new(),
            flushed: BTreeSet::new(),
            mute_groups: BTreeSet::new(),
            start_mix_position: None,
            current_mix_position: None,
            clock: VideoClockSnapshot::default(),
            counters: MixCounters::default(),
        })
    }

    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    pub fn destination(&self) -> &AudioParams {
        &self.dst
    }

    pub fn clock(&self) -> &VideoClockSnapshot {
        &self.clock
    }

    pub fn start_mix_position(&self) -> Option<i64> {
        self.start_mix_position
    }

    pub fn current_mix_position(&self) -> Option<i64> {
        self.current_mix_position
    }

    pub fn is_muted(&self, group_id: GroupId) -> bool {
        self.mute_groups.contains(&group_id)
    }

    pub fn synchronizer(&self, address: &StreamAddress) -> Option<&StreamSynchronizer> {
        self.synchronizers.get(address)
    }

    /// Streams that have not flushed.
    pub fn active_streams(&self) -> usize {
        self.synchronizers
            .keys()
            .filter(|addr| !self.flushed.contains(addr))
            .count()
    }

    /// Delete the synchronizer of `address`. Returns whether it existed.
    pub fn remove_stream(&mut self, address: StreamAddress) -> bool {
        self.flushed.remove(&address);
        let removed = self.synchronizers.remove(&address).is_some();
        if removed {
            tracing::info!(%address, "removed audio synchronizer");
        }
        removed
    }

    fn add_synchronizer(&mut self, address: StreamAddress, source: AudioParams) -> Result<()> {
        let params = ConversionParams {
            src: source,
            dst: self.dst,
        };
        let sync = StreamSynchronizer::new(
            address,
            params,
            self.config.resample_chunk_frames,
            self.config.max_free_running_ms,
        )?;
        self.synchronizers.insert(address, sync);
        if self.config.mute_new_streams_at_start {
            self.mute_groups.insert(address.group_id);
        }
        tracing::info!(
            %address,
            %params,
            muted = self.config.mute_new_streams_at_start,
            "added audio synchronizer"
        );
        Ok(())
    }

    fn ensure_synchronizer(&mut self, address: StreamAddress, source: AudioParams) -> MixStatus {
        if self.synchronizers.contains_key(&address) {
            return MixStatus::Continue;
        }
        match self.add_synchronizer(address, source) {
            Ok(()) => MixStatus::Continue,
            Err(e) => {
                tracing::warn!(%address, source = %source, "failed to create synchronizer: {e:#}");
                MixStatus::Retry
            }
        }
    }

    /// Handle one inbound frame (`None` = end of input for `address`).
    pub fn process(&mut self, address: StreamAddress, frame: Option<AudioFrame>) -> Result<MixOutcome> {
        let is_flush = frame.is_none();

        match frame {
            None => {
                if let Some(sync) = self.synchronizers.get(&address) {
                    sync.send_frame(None)?;
                    // A later rejoin of this group starts unmuted.
                    self.mute_groups.remove(&sync.group_id());
                }
                self.flushed.insert(address);
                tracing::info!(%address, "audio mix received flush");
            }
            Some(frame) => {
                // A flushed fifo never reopens; a rejoin starts over with a new synchronizer.
                if self.flushed.remove(&address) && self.synchronizers.remove(&address).is_some() {
                    tracing::info!(%address, "stream rejoined after flush");
                }
                if self.ensure_synchronizer(address, frame.params) == MixStatus::Retry {
                    return Ok(MixOutcome::status(MixStatus::Retry));
                }
                if let Some(sync) = self.synchronizers.get(&address) {
                    if sync.send_frame(Some(&frame))? == SendOutcome::Discarded {
                        self.counters.discarded_inputs += 1;
                    }
                }
            }
        }

        if self.current_mix_position.is_none() && !is_flush {
            return Ok(MixOutcome::status(MixStatus::Retry));
        }

        let frames = self.run_ticks();

        let status = if !is_flush || self.active_streams() > 0 {
            MixStatus::Continue
        } else if self.config.auto_quit_on_empty {
            tracing::info!(%address, "last stream finished, end of mix");
            MixStatus::EndOfStream
        } else {
            tracing::info!(%address, "mix has no inputs, auto quit is off, staying idle");
            MixStatus::Idle
        };
        Ok(MixOutcome { status, frames })
    }

    /// Produce as many frames as the video clock allows.
    fn run_ticks(&mut self) -> Vec<MixedFrame> {
        let mut out = Vec::new();
        let frame_size = self.config.frame_size;
        let (Some(mut current), Some(video)) =
            (self.current_mix_position, self.clock.video_mix_position)
        else {
            return out;
        };

        while current + frame_size as i64 <= video {
            let mut ready = true;
            for sync in self.synchronizers.values() {
                ready &= sync.process_sync(frame_size, current).is_ready();
            }
            if !ready {
                break;
            }
            if let Some(frame) = self.mix_frame(current) {
                out.push(frame);
            }
            // Advance only after the frame at `current` has been assembled.
            current += frame_size as i64;
            self.current_mix_position = Some(current);
        }
        out
    }

    fn mix_frame(&mut self, position: i64) -> Option<MixedFrame> {
        let Some(mut planes) = alloc_silence(self.dst.channel_count(), self.config.frame_size) else {
            self.counters.discarded_outputs += 1;
            tracing::warn!(position, "cannot allocate mixed frame, discarding one frame");
            return None;
        };
        for sync in self.synchronizers.values() {
            let Some(chunk) = sync.receive_frame() else {
                continue;
            };
            if self.mute_groups.contains(&sync.group_id()) {
                continue;
            }
            mix_into(&mut planes, &chunk);
        }
        self.counters.output_frames += 1;
        Some(MixedFrame {
            position,
            params: self.dst,
            planes,
        })
    }

    fn clock_state(&self) -> MixClockState<'_> {
        MixClockState {
            active_streams: self.active_streams(),
            known_streams: self.synchronizers.len(),
            muted_groups: Some(&self.mute_groups),
            start_mix_position: self.start_mix_position,
            current_mix_position: self.current_mix_position,
            video_mix_position: self.clock.video_mix_position,
        }
    }
}

impl MixHandler for MixEngine {
    fn on_join(&mut self, address: StreamAddress, source: AudioParams) -> MixStatus {
        self.ensure_synchronizer(address, source)
    }

    fn on_frame(&mut self, address: StreamAddress, frame: AudioFrame) -> Result<MixOutcome> {
        self.process(address, Some(frame))
    }

    fn on_flush(&mut self, address: StreamAddress) -> Result<MixOutcome> {
        self.process(address, None)
    }

    fn on_clock_event(&mut self, event: &VideoMixSyncEvent) {
        let tb = Rational::per_sample(self.dst.sample_rate);
        let video_mix = rescale(event.video_mix_position, MICROSECONDS, tb);
        if self.start_mix_position.is_none() {
            // Audio buffered before the anchor may be thrown away by the first ticks.
            self.start_mix_position = Some(video_mix);
            self.current_mix_position = Some(video_mix);
            tracing::info!(
                start_mix_position = video_mix,
                video_mix_us = event.video_mix_position,
                "audio mix anchored to video clock"
            );
        }
        self.clock.video_mix_position = Some(video_mix);

        // Groups missing from the event are not updated this time.
        for peer in &event.peer_positions {
            let peer_pos = rescale(peer.position, MICROSECONDS, tb);
            self.clock.peer_positions.insert(peer.group_id, peer_pos);
            for sync in self
                .synchronizers
                .values()
                .filter(|s| s.group_id() == peer.group_id)
            {
                sync.process_video_peer_sync_event(video_mix, peer_pos);
            }
        }
    }

    fn on_mute_command(&mut self, command: &MuteUnmuteCommand) {
        for gid in &command.unmute {
            self.mute_groups.remove(gid);
            tracing::info!(group = gid, "unmute group");
        }
        for gid in &command.mute {
            self.mute_groups.insert(*gid);
            tracing::info!(group = gid, "mute group");
        }
    }

    fn on_stream_removed(&mut self, address: StreamAddress) -> bool {
        self.remove_stream(address)
    }

    fn stats(&self) -> MixStats {
        self.counters.snapshot(self.clock_state())
    }

    fn close(&mut self, reason: MixEndReason) -> MixStats {
        self.counters.end_reason = Some(reason);
        let stats = self.stats();
        tracing::info!(
            reason = ?reason,
            output_frames = stats.output_frames,
            discarded_inputs = stats.discarded_inputs,
            discarded_outputs = stats.discarded_outputs,
            start_mix_position = ?stats.start_mix_position,
            current_mix_position = ?stats.current_mix_position,
            "audio mix closed"
        );
        self.synchronizers.clear();
        self.flushed.clear();
        stats
    }
}

/// Zero-filled planes, or `None` when the allocation fails.
fn alloc_silence(channels: usize, frames: usize) -> Option<Vec<Vec<f32>>> {
    let mut planes = Vec::new();
    planes.try_reserve_exact(channels).ok()?;
    for _ in 0..channels {
        let mut plane = Vec::new();
        plane.try_reserve_exact(frames).ok()?;
        plane.resize(frames, 0.0);
        planes.push(plane);
    }
    Some(planes)
}

/// Average `chunk` into the tail of `planes`: `out = (out + new) / 2` per sample.
///
/// Contributions are folded one stream at a time, so with several streams earlier
/// contributions are weighted less than later ones. A chunk shorter than the frame covers
/// the end of the frame.
pub fn mix_into(planes: &mut [Vec<f32>], chunk: &AudioChunk) {
    for (dst, src) in planes.iter_mut().zip(&chunk.planes) {
        let Some(offset) = dst.len().checked_sub(src.len()) else {
            continue;
        };
        for (d, s) in dst[offset..].iter_mut().zip(src) {
            *d = (*d + *s) / 2.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio_mix_types::PeerPosition;
    use symphonia::core::audio::Channels;

    // 1 kHz keeps the arithmetic readable: one sample per millisecond.
    const RATE: u32 = 1_000;

    fn stereo() -> Channels {
        Channels::FRONT_LEFT | Channels::FRONT_RIGHT
    }

    fn config() -> MixerConfig {
        MixerConfig {
            frame_size: 10,
            sample_rate: RATE,
            ..MixerConfig::default()
        }
    }

    fn engine() -> MixEngine {
        MixEngine::new(config()).unwrap()
    }

    fn addr(group: GroupId) -> StreamAddress {
        StreamAddress::new(group, 0)
    }

    fn frame(pts: i64, len: usize, value: f32) -> AudioFrame {
        AudioFrame::from_planes(RATE, stereo(), Some(pts), &[vec![value; len], vec![value; len]])
    }

    /// Clock event with every listed group in sync with the video mix (positions in samples).
    fn clock(mix: i64, groups: &[GroupId]) -> VideoMixSyncEvent {
        VideoMixSyncEvent {
            video_mix_position: mix * 1000,
            peer_positions: groups
                .iter()
                .map(|&group_id| PeerPosition {
                    group_id,
                    position: mix * 1000,
                })
                .collect(),
        }
    }

    #[test]
    fn frames_before_anchor_request_retry() {
        let mut mix = engine();
        let out = mix.on_frame(addr(1), frame(0, 10, 0.5)).unwrap();
        assert_eq!(out.status, MixStatus::Retry);
        assert!(out.frames.is_empty());
        assert!(mix.synchronizer(&addr(1)).is_some());
        assert_eq!(mix.synchronizer(&addr(1)).unwrap().buffered(), 10);
    }

    #[test]
    fn first_clock_event_anchors_mix_position() {
        let mut mix = engine();
        mix.on_clock_event(&clock(40, &[]));
        assert_eq!(mix.start_mix_position(), Some(40));
        assert_eq!(mix.current_mix_position(), Some(40));
        mix.on_clock_event(&clock(90, &[]));
        assert_eq!(mix.start_mix_position(), Some(40));
        assert_eq!(mix.clock().video_mix_position, Some(90));
    }

    #[test]
    fn single_stream_mixes_frames_up_to_video_clock() {
        let mut mix = engine();
        mix.on_frame(addr(1), frame(0, 10, 0.5)).unwrap();
        mix.on_clock_event(&clock(0, &[1]));
        mix.on_clock_event(&clock(20, &[1]));

        let out = mix.on_frame(addr(1), frame(10, 20, 0.5)).unwrap();
        assert_eq!(out.status, MixStatus::Continue);
        let positions: Vec<i64> = out.frames.iter().map(|f| f.position).collect();
        assert_eq!(positions, vec![0, 10]);
        for f in &out.frames {
            assert_eq!(f.len(), 10);
            assert!(f.planes.iter().all(|p| p.iter().all(|&s| s == 0.25)));
        }
        assert_eq!(mix.current_mix_position(), Some(20));
        assert_eq!(mix.stats().output_frames, 2);
    }

    #[test]
    fn mix_position_stays_on_frame_grid() {
        let mut mix = engine();
        mix.on_clock_event(&clock(7, &[1]));
        let mut last = mix.current_mix_position().unwrap();
        let mut pts = 7;
        for step in 1..20 {
            mix.on_clock_event(&clock(7 + step * 13, &[1]));
            mix.on_frame(addr(1), frame(pts, 13, 0.1)).unwrap();
            pts += 13;
            let cur = mix.current_mix_position().unwrap();
            assert!(cur >= last);
            assert_eq!((cur - 7) % 10, 0);
            last = cur;
        }
        assert!(last > 7);
    }

    #[test]
    fn two_streams_use_incremental_pairwise_average() {
        let mut mix = engine();
        mix.on_join(addr(1), frame(0, 0, 0.0).params);
        mix.on_join(addr(2), frame(0, 0, 0.0).params);
        mix.on_clock_event(&clock(0, &[1, 2]));
        mix.on_clock_event(&clock(10, &[1, 2]));
        let out = mix.on_frame(addr(1), frame(0, 20, 0.5)).unwrap();
        assert!(out.frames.is_empty());
        let out = mix.on_frame(addr(2), frame(0, 20, 0.25)).unwrap();

        assert_eq!(out.frames.len(), 1);
        // ((0 + 0.5) / 2 + 0.25) / 2, not (0.5 + 0.25) / 2
        let expected = ((0.0 + 0.5) / 2.0 + 0.25) / 2.0;
        assert!(out.frames[0].planes[0].iter().all(|&s| s == expected));
        assert_ne!(expected, (0.5 + 0.25) / 2.0);
    }

    #[test]
    fn mix_into_right_aligns_short_chunks() {
        let mut planes = vec![vec![0.0; 4]];
        let chunk = AudioChunk {
            position: 0,
            planes: vec![vec![1.0, 1.0]],
        };
        mix_into(&mut planes, &chunk);
        assert_eq!(planes[0], vec![0.0, 0.0, 0.5, 0.5]);
        mix_into(&mut planes, &chunk);
        assert_eq!(planes[0], vec![0.0, 0.0, 0.75, 0.75]);
    }

    #[test]
    fn partial_window_lands_at_frame_tail() {
        let mut mix = engine();
        mix.on_join(addr(1), frame(0, 0, 0.0).params);
        mix.on_clock_event(&clock(0, &[1]));
        mix.on_clock_event(&clock(10, &[1]));
        let out = mix.on_frame(addr(1), frame(5, 30, 1.0)).unwrap();
        assert_eq!(out.frames.len(), 1);
        let left = &out.frames[0].planes[0];
        assert!(left[..5].iter().all(|&s| s == 0.0));
        assert!(left[5..].iter().all(|&s| s == 0.5));
    }

    #[test]
    fn stream_behind_stalls_the_whole_mix() {
        let mut mix = engine();
        mix.on_join(addr(2), frame(0, 0, 0.0).params);
        mix.on_clock_event(&clock(0, &[1, 2]));
        mix.on_clock_event(&clock(30, &[1, 2]));

        let out = mix.on_frame(addr(1), frame(0, 40, 0.5)).unwrap();
        assert!(out.frames.is_empty());
        assert_eq!(mix.current_mix_position(), Some(0));

        let out = mix.on_frame(addr(2), frame(0, 40, 0.5)).unwrap();
        assert_eq!(out.frames.len(), 3);
        assert_eq!(mix.current_mix_position(), Some(30));
    }

    #[test]
    fn free_running_stream_does_not_block_mixing() {
        let mut mix = engine();
        mix.on_frame(addr(2), frame(0, 40, 0.5)).unwrap();
        mix.on_clock_event(&clock(0, &[1]));
        mix.on_clock_event(&clock(20, &[1]));

        let out = mix.on_frame(addr(1), frame(0, 40, 0.5)).unwrap();
        assert_eq!(out.frames.len(), 2);
        assert!(out.frames[0].planes[0].iter().all(|&s| s == 0.25));
        assert!(!mix.synchronizer(&addr(2)).unwrap().is_anchored());
        assert_eq!(mix.synchronizer(&addr(2)).unwrap().buffered(), 40);
    }

    #[test]
    fn muted_group_is_consumed_but_not_mixed() {
        let mut mix = engine();
        mix.on_mute_command(&MuteUnmuteCommand {
            mute: vec![1],
            unmute: vec![],
        });
        mix.on_join(addr(1), frame(0, 0, 0.0).params);
        mix.on_join(addr(2), frame(0, 0, 0.0).params);
        mix.on_clock_event(&clock(0, &[1, 2]));
        mix.on_clock_event(&clock(10, &[1, 2]));
        mix.on_frame(addr(1), frame(0, 20, 1.0)).unwrap();
        let out = mix.on_frame(addr(2), frame(0, 20, 0.5)).unwrap();

        assert_eq!(out.frames.len(), 1);
        assert!(out.frames[0].planes[0].iter().all(|&s| s == 0.25));
        assert_eq!(mix.synchronizer(&addr(1)).unwrap().buffered(), 10);
    }

    #[test]
    fn mute_uses_set_semantics_and_unmutes_first() {
        let mut mix = engine();
        let mute = MuteUnmuteCommand {
            mute: vec![3],
            unmute: vec![],
        };
        mix.on_mute_command(&mute);
        mix.on_mute_command(&mute);
        assert_eq!(mix.stats().muted_groups, vec![3]);

        mix.on_mute_command(&MuteUnmuteCommand {
            mute: vec![],
            unmute: vec![3],
        });
        assert!(!mix.is_muted(3));

        // Both in one command: unmute is applied first, so the group ends up muted.
        mix.on_mute_command(&MuteUnmuteCommand {
            mute: vec![4],
            unmute: vec![4],
        });
        assert!(mix.is_muted(4));
    }

    #[test]
    fn new_streams_can_start_muted() {
        let mut mix = MixEngine::new(MixerConfig {
            mute_new_streams_at_start: true,
            ..config()
        })
        .unwrap();
        mix.on_frame(addr(5), frame(0, 10, 0.5)).unwrap();
        assert!(mix.is_muted(5));
    }

    #[test]
    fn flush_unmutes_group_and_keeps_synchronizer() {
        let mut mix = engine();
        mix.on_clock_event(&clock(0, &[1, 2]));
        mix.on_frame(addr(1), frame(0, 10, 0.5)).unwrap();
        mix.on_frame(addr(2), frame(0, 10, 0.5)).unwrap();
        mix.on_mute_command(&MuteUnmuteCommand {
            mute: vec![1],
            unmute: vec![],
        });

        let out = mix.on_flush(addr(1)).unwrap();
        assert_eq!(out.status, MixStatus::Continue);
        assert!(!mix.is_muted(1));
        assert!(mix.synchronizer(&addr(1)).unwrap().is_flushed());
        assert_eq!(mix.active_streams(), 1);
        assert_eq!(mix.stats().known_streams, 2);
    }

    #[test]
    fn last_flush_with_auto_quit_ends_stream() {
        let mut mix = engine();
        mix.on_clock_event(&clock(0, &[1]));
        mix.on_frame(addr(1), frame(0, 10, 0.5)).unwrap();
        let out = mix.on_flush(addr(1)).unwrap();
        assert_eq!(out.status, MixStatus::EndOfStream);
    }

    #[test]
    fn last_flush_without_auto_quit_stays_idle() {
        let mut mix = MixEngine::new(MixerConfig {
            auto_quit_on_empty: false,
            ..config()
        })
        .unwrap();
        mix.on_clock_event(&clock(0, &[1]));
        mix.on_frame(addr(1), frame(0, 5, 0.5)).unwrap();
        let out = mix.on_flush(addr(1)).unwrap();
        assert_eq!(out.status, MixStatus::Idle);
        assert!(out.frames.is_empty());
        assert_eq!(mix.stats().output_frames, 0);
    }

    #[test]
    fn flush_before_anchor_still_reports_end() {
        let mut mix = engine();
        mix.on_frame(addr(1), frame(0, 10, 0.5)).unwrap();
        let out = mix.on_flush(addr(1)).unwrap();
        assert_eq!(out.status, MixStatus::EndOfStream);
    }

    #[test]
    fn frame_after_flush_reactivates_stream() {
        let mut mix = engine();
        mix.on_clock_event(&clock(0, &[1]));
        mix.on_frame(addr(1), frame(0, 10, 0.5)).unwrap();
        mix.on_frame(addr(2), frame(0, 10, 0.5)).unwrap();
        mix.on_flush(addr(1)).unwrap();
        assert_eq!(mix.active_streams(), 1);
        assert!(mix.synchronizer(&addr(1)).unwrap().is_flushed());

        mix.on_frame(addr(1), frame(10, 10, 0.5)).unwrap();
        assert_eq!(mix.active_streams(), 2);
        let rejoined = mix.synchronizer(&addr(1)).unwrap();
        assert!(!rejoined.is_flushed());
        assert_eq!(rejoined.buffered(), 10);
        assert_eq!(rejoined.position(), 10);
    }

    #[test]
    fn failed_join_requests_retry() {
        let mut mix = engine();
        let mut bad = frame(0, 10, 0.5);
        bad.params.sample_rate = 0;
        let out = mix.on_frame(addr(9), bad).unwrap();
        assert_eq!(out.status, MixStatus::Retry);
        assert!(mix.synchronizer(&addr(9)).is_none());
        assert_eq!(mix.on_join(addr(9), frame(0, 0, 0.0).params), MixStatus::Continue);
    }

    #[test]
    fn unconvertible_frames_count_as_discarded_inputs() {
        let mut mix = engine();
        mix.on_clock_event(&clock(0, &[1]));
        mix.on_frame(addr(1), frame(0, 10, 0.5)).unwrap();
        let mut ragged = frame(10, 10, 0.5);
        ragged.data = crate::format::SampleData::F32(vec![0.0; 7]);
        let out = mix.on_frame(addr(1), ragged).unwrap();
        assert_eq!(out.status, MixStatus::Continue);
        assert_eq!(mix.stats().discarded_inputs, 1);
    }

    #[test]
    fn removal_is_external_and_close_reports_reason() {
        let mut mix = engine();
        mix.on_clock_event(&clock(0, &[1]));
        mix.on_frame(addr(1), frame(0, 10, 0.5)).unwrap();
        mix.on_flush(addr(1)).unwrap();
        assert!(mix.synchronizer(&addr(1)).is_some());
        assert!(mix.on_stream_removed(addr(1)));
        assert!(!mix.on_stream_removed(addr(1)));

        let stats = mix.close(MixEndReason::Stopped);
        assert_eq!(stats.end_reason, Some(MixEndReason::Stopped));
        assert_eq!(stats.known_streams, 0);
    }

    #[test]
    fn clock_events_only_update_listed_groups() {
        let mut mix = engine();
        mix.on_frame(addr(1), frame(0, 10, 0.5)).unwrap();
        mix.on_frame(addr(2), frame(0, 10, 0.5)).unwrap();
        mix.on_clock_event(&clock(0, &[2]));
        assert!(!mix.synchronizer(&addr(1)).unwrap().is_anchored());
        assert!(mix.synchronizer(&addr(2)).unwrap().is_anchored());
        assert_eq!(mix.clock().peer_positions.get(&2), Some(&0));
    }

    #[test]
    fn interleaved_output_alternates_channels() {
        let frame = MixedFrame {
            position: 0,
            params: AudioParams::new(crate::format::SampleFormat::F32Planar, RATE, stereo()),
            planes: vec![vec![1.0, 2.0], vec![3.0, 4.0]],
        };
        assert_eq!(frame.interleaved(), vec![1.0, 3.0, 2.0, 4.0]);
    }
}
