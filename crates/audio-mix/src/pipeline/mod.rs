//! Mixer worker wiring: one thread owns the [`MixHandler`] and serializes every input.
//!
//! Producers (decoders, the clock source, the control surface) share a cloned
//! [`Sender<MixerInput>`]; mixed frames come out of an unbounded channel in mix order.
//! The worker ends on `Stop`, on end-of-stream, when every input sender is dropped, or on a
//! fatal error.

use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use audio_mix_types::{
    MixEndReason, MixStats, MuteUnmuteCommand, StreamAddress, VideoMixSyncEvent,
};
use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::engine::{MixHandler, MixStatus, MixedFrame};
use crate::format::{AudioFrame, AudioParams};

/// Everything the mixer worker accepts.
#[derive(Debug)]
pub enum MixerInput {
    Join {
        address: StreamAddress,
        params: AudioParams,
    },
    Frame {
        address: StreamAddress,
        frame: AudioFrame,
    },
    Flush {
        address: StreamAddress,
    },
    Clock(VideoMixSyncEvent),
    Mute(MuteUnmuteCommand),
    /// External end signal for a stream.
    Remove {
        address: StreamAddress,
    },
    Stop,
}

/// Handle to a running mixer worker.
pub struct MixerHandle {
    input: Sender<MixerInput>,
    output: Receiver<MixedFrame>,
    thread: JoinHandle<Result<MixStats>>,
}

impl MixerHandle {
    /// Sender for inputs; clone it per producer.
    pub fn sender(&self) -> Sender<MixerInput> {
        self.input.clone()
    }

    /// Mixed frames; disconnects when the worker exits.
    pub fn frames(&self) -> Receiver<MixedFrame> {
        self.output.clone()
    }

    /// Drop this handle's sender and wait for the worker's final stats.
    pub fn join(self) -> Result<MixStats> {
        drop(self.input);
        self.thread
            .join()
            .map_err(|_| anyhow!("mixer thread panicked"))?
    }
}

/// Start the mixer worker thread around `handler`.
pub fn spawn_mixer<H>(handler: H) -> Result<MixerHandle>
where
    H: MixHandler + Send + 'static,
{
    let (input_tx, input_rx) = unbounded();
    let (output_tx, output_rx) = unbounded();
    let thread = thread::Builder::new()
        .name("audio-mix".to_string())
        .spawn(move || run_worker(handler, input_rx, output_tx))
        .context("spawn mixer thread")?;
    Ok(MixerHandle {
        input: input_tx,
        output: output_rx,
        thread,
    })
}

fn run_worker<H: MixHandler>(
    mut handler: H,
    input: Receiver<MixerInput>,
    output: Sender<MixedFrame>,
) -> Result<MixStats> {
    let reason = loop {
        let Ok(msg) = input.recv() else {
            tracing::info!("all mixer inputs closed");
            break MixEndReason::Stopped;
        };
        let result = match msg {
            MixerInput::Join { address, params } => {
                if handler.on_join(address, params) == MixStatus::Retry {
                    tracing::warn!(%address, "join deferred until the first frame");
                }
                continue;
            }
            MixerInput::Frame { address, frame } => handler.on_frame(address, frame),
            MixerInput::Flush { address } => handler.on_flush(address),
            MixerInput::Clock(event) => {
                handler.on_clock_event(&event);
                continue;
            }
            MixerInput::Mute(command) => {
                handler.on_mute_command(&command);
                continue;
            }
            MixerInput::Remove { address } => {
                handler.on_stream_removed(address);
                continue;
            }
            MixerInput::Stop => {
                tracing::info!("mixer stop requested");
                break MixEndReason::Stopped;
            }
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("mixer failed: {e:#}");
                handler.close(MixEndReason::Error);
                return Err(e);
            }
        };
        for frame in outcome.frames {
            if output.send(frame).is_err() {
                tracing::debug!("mixed frame dropped, output receiver closed");
            }
        }
        match outcome.status {
            MixStatus::Continue | MixStatus::Idle => {}
            MixStatus::Retry => tracing::trace!("mixer waiting for clock or stream setup"),
            MixStatus::EndOfStream => break MixEndReason::Eof,
        }
    };
    Ok(handler.close(reason))
}
