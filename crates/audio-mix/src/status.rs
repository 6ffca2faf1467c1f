use std::collections::BTreeSet;

use audio_mix_types::{GroupId, MixEndReason, MixStats};

/// Counters maintained by the mix engine.
#[derive(Debug, Default, Clone)]
pub struct MixCounters {
    /// Mixed frames emitted.
    pub output_frames: u64,
    /// Inbound frames dropped by their synchronizer.
    pub discarded_inputs: u64,
    /// Mixed frames dropped because the output buffer could not be allocated.
    pub discarded_outputs: u64,
    /// Terminal reason recorded when the run ends.
    pub end_reason: Option<MixEndReason>,
}

/// Clock and membership state captured alongside the counters.
#[derive(Debug, Default)]
pub struct MixClockState<'a> {
    pub active_streams: usize,
    pub known_streams: usize,
    pub muted_groups: Option<&'a BTreeSet<GroupId>>,
    pub start_mix_position: Option<i64>,
    pub current_mix_position: Option<i64>,
    pub video_mix_position: Option<i64>,
}

impl MixCounters {
    /// Return a snapshot suitable for reporting.
    pub fn snapshot(&self, clock: MixClockState<'_>) -> MixStats {
        MixStats {
            output_frames: self.output_frames,
            discarded_inputs: self.discarded_inputs,
            discarded_outputs: self.discarded_outputs,
            active_streams: clock.active_streams,
            known_streams: clock.known_streams,
            muted_groups: clock
                .muted_groups
                .map(|groups| groups.iter().copied().collect())
                .unwrap_or_default(),
            start_mix_position: clock.start_mix_position,
            current_mix_position: clock.current_mix_position,
            video_mix_position: clock.video_mix_position,
            end_reason: self.end_reason,
        }
    }
}
