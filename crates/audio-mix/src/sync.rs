//! Per-stream synchronizer.
//!
//! Each inbound stream owns one [`StreamSynchronizer`]. Once per mix tick the engine asks it
//! whether its buffered audio can contribute to the current mix window and how many samples to
//! emit, discarding stale audio when the stream has fallen behind.
//!
//! ## Sync rule
//! The offset between a stream's own audio clock and the mix clock equals the offset between
//! its group's video position and the video mix position:
//!
//! `desired_audio_position = video_peer_position - video_mix_position + current_mix_position`
//!
//! Until a clock event has referenced the stream's group, the synchronizer is free-running: it
//! never contributes and only trims its backlog.

use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use audio_mix_types::{GroupId, StreamAddress};

use crate::fifo::{ResampleFifo, SendOutcome};
use crate::format::{AudioChunk, AudioFrame, ConversionParams};

/// Default backlog ceiling for free-running streams.
pub const DEFAULT_MAX_FREE_RUNNING_MS: f64 = 3000.0;

/// Outcome of one [`StreamSynchronizer::process_sync`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncDecision {
    /// No video anchor yet; nothing to emit. `dropped` oldest samples were trimmed.
    FreeRunning { dropped: usize },
    /// Buffered audio starts after the current window; nothing to emit.
    Ahead,
    /// Enough audio is buffered; `len` samples will be emitted after dropping `dropped`.
    Ready { len: usize, dropped: usize },
    /// Not enough audio for the window; the mix tick has to wait.
    Behind { dropped: usize },
}

impl SyncDecision {
    /// Whether the mix tick may proceed with this stream.
    pub fn is_ready(&self) -> bool {
        !matches!(self, SyncDecision::Behind { .. })
    }

    /// Samples `receive_frame` will return.
    pub fn output_len(&self) -> usize {
        match self {
            SyncDecision::Ready { len, .. } => *len,
            _ => 0,
        }
    }
}

struct SyncState {
    fifo: ResampleFifo,
    video_mix_position: Option<i64>,
    video_peer_position: Option<i64>,
    mix_position: Option<i64>,
    output_len: usize,
}

/// Drift/alignment state of one inbound stream.
///
/// All methods lock the same mutex, so the clock-event path and the data path may run on
/// different threads.
pub struct StreamSynchronizer {
    address: StreamAddress,
    label: String,
    max_free_running_ms: f64,
    state: Mutex<SyncState>,
}

impl StreamSynchronizer {
    pub fn new(
        address: StreamAddress,
        params: ConversionParams,
        chunk_frames: usize,
        max_free_running_ms: f64,
    ) -> Result<Self> {
        let label = format!("sync[{address}]");
        let fifo = ResampleFifo::new(params, chunk_frames, label.clone())?;
        Ok(Self {
            address,
            label,
            max_free_running_ms,
            state: Mutex::new(SyncState {
                fifo,
                video_mix_position: None,
                video_peer_position: None,
                mix_position: None,
                output_len: 0,
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn address(&self) -> StreamAddress {
        self.address
    }

    pub fn group_id(&self) -> GroupId {
        self.address.group_id
    }

    pub fn params(&self) -> ConversionParams {
        *self.state().fifo.params()
    }

    /// Record the latest video positions (destination sample units) for this stream's group.
    pub fn process_video_peer_sync_event(&self, video_mix_position: i64, video_peer_position: i64) {
        let mut st = self.state();
        st.video_mix_position = Some(video_mix_position);
        st.video_peer_position = Some(video_peer_position);
        tracing::trace!(
            sync = %self.label,
            video_mix_position,
            video_peer_position,
            audio_mix_position = ?st.mix_position,
            "video peer sync"
        );
    }

    /// Whether a clock event has anchored this stream.
    pub fn is_anchored(&self) -> bool {
        self.state().video_peer_position.is_some()
    }

    /// Queue a frame, or mark end-of-input with `None`.
    pub fn send_frame(&self, frame: Option<&AudioFrame>) -> Result<SendOutcome> {
        self.state().fifo.send(frame)
    }

    /// Decide how this stream contributes to the mix window `[mix_position, mix_position + desired)`.
    ///
    /// Must be called before [`receive_frame`](Self::receive_frame).
    pub fn process_sync(&self, desired: usize, mix_position: i64) -> SyncDecision {
        let mut st = self.state();
        let decision = self.decide(&mut st, desired, mix_position);
        st.output_len = decision.output_len();
        decision
    }

    fn decide(&self, st: &mut SyncState, desired: usize, mix_position: i64) -> SyncDecision {
        let (Some(video_peer), Some(video_mix)) = (st.video_peer_position, st.video_mix_position)
        else {
            // Video not coming yet; keep the backlog bounded by dropping the oldest audio.
            let mut dropped = 0;
            if st.fifo.buffered_ms() > self.max_free_running_ms {
                let pos = st.fifo.position();
                dropped = st.fifo.discard(desired);
                tracing::debug!(sync = %self.label, dropped, pos, "free running, skip one frame");
            }
            return SyncDecision::FreeRunning { dropped };
        };

        st.mix_position = Some(mix_position);
        let size = desired as i64;
        let desired_pos = video_peer - video_mix + mix_position;
        let cur = st.fifo.position();
        let available = st.fifo.buffered() as i64;

        if cur >= desired_pos + size {
            tracing::debug!(
                sync = %self.label,
                cur,
                desired = desired_pos,
                video_peer,
                video_mix,
                mix_position,
                "audio data is ahead of the mix window"
            );
            return SyncDecision::Ahead;
        }

        if cur + available - desired_pos - size > 0 {
            if cur >= desired_pos {
                return SyncDecision::Ready {
                    len: (desired_pos + size - cur) as usize,
                    dropped: 0,
                };
            }
            let dropped = st.fifo.discard((desired_pos - cur) as usize);
            tracing::debug!(sync = %self.label, dropped, pos = cur, "dropped late audio");
            return SyncDecision::Ready {
                len: desired,
                dropped,
            };
        }

        let stale = (desired_pos - cur).min(available);
        let mut dropped = 0;
        if stale > 0 {
            dropped = st.fifo.discard(stale as usize);
            tracing::debug!(sync = %self.label, dropped, pos = cur, "behind, dropped stale audio");
        }
        SyncDecision::Behind { dropped }
    }

    /// Dequeue the chunk sized by the last [`process_sync`](Self::process_sync) call.
    ///
    /// Returns `None` when that call decided to emit nothing.
    pub fn receive_frame(&self) -> Option<AudioChunk> {
        let mut st = self.state();
        if st.output_len == 0 {
            return None;
        }
        let len = st.output_len;
        st.fifo.receive(len)
    }

    /// Buffered destination-domain samples.
    pub fn buffered(&self) -> usize {
        self.state().fifo.buffered()
    }

    pub fn buffered_ms(&self) -> f64 {
        self.state().fifo.buffered_ms()
    }

    /// Position of the next unread sample.
    pub fn position(&self) -> i64 {
        self.state().fifo.position()
    }

    pub fn is_flushed(&self) -> bool {
        self.state().fifo.is_flushed()
    }
}
