use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a participant group; mute commands and video peer positions address groups.
pub type GroupId = u64;

/// Composite key identifying one inbound audio feed.
///
/// A group may carry several streams (for example a participant publishing two microphones);
/// the pair is stable for the lifetime of the feed.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamAddress {
    /// Group the stream belongs to.
    pub group_id: GroupId,
    /// Index of the stream inside its group.
    pub stream_index: u32,
}

impl StreamAddress {
    pub fn new(group_id: GroupId, stream_index: u32) -> Self {
        Self {
            group_id,
            stream_index,
        }
    }
}

impl fmt::Display for StreamAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}:s{}", self.group_id, self.stream_index)
    }
}

/// Position of one group's video stream as reported by the video mixer.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerPosition {
    pub group_id: GroupId,
    /// Video stream position in microseconds (not the mix position).
    pub position: i64,
}

/// Periodic clock reference emitted by the video mixer.
///
/// Positions are expressed in microseconds; the audio mixer rescales them into its own
/// destination sample units.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VideoMixSyncEvent {
    /// Current video mix position in microseconds.
    pub video_mix_position: i64,
    /// Per-group video positions that were mixed at `video_mix_position`.
    #[serde(default)]
    pub peer_positions: Vec<PeerPosition>,
}

/// Mute/unmute request; unmutes are applied before mutes.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MuteUnmuteCommand {
    #[serde(default)]
    pub mute: Vec<GroupId>,
    #[serde(default)]
    pub unmute: Vec<GroupId>,
}

/// Reason why a mix run ended.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MixEndReason {
    /// The last input stream flushed with auto-quit enabled.
    Eof,
    /// The run was stopped by its owner.
    Stopped,
    /// A fatal error interrupted mixing.
    Error,
}

/// Snapshot of mixer counters and clock state.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MixStats {
    /// Mixed frames produced so far.
    pub output_frames: u64,
    /// Input frames that could not be queued (conversion failures).
    pub discarded_inputs: u64,
    /// Mixed frames dropped because the output buffer could not be allocated.
    pub discarded_outputs: u64,
    /// Streams that have not signaled end-of-input.
    pub active_streams: usize,
    /// Streams known to the mixer, flushed or not.
    pub known_streams: usize,
    /// Currently muted groups, ascending.
    pub muted_groups: Vec<GroupId>,
    /// Mix position established by the first clock event (destination samples).
    pub start_mix_position: Option<i64>,
    /// Position of the next mixed frame (destination samples).
    pub current_mix_position: Option<i64>,
    /// Latest video mix position (destination samples).
    pub video_mix_position: Option<i64>,
    /// Terminal reason once the run is over.
    pub end_reason: Option<MixEndReason>,
}
