//! Resample fifo: conversion into the destination domain plus a sample queue.
//!
//! Frames of any size/format/rate go in through [`ResampleFifo::send`]; fixed-size chunks of
//! planar `f32` come out through [`ResampleFifo::receive`]. The fifo tracks the position of
//! the next unread sample in destination sample units.

use anyhow::Result;

use crate::format::{AudioChunk, AudioFrame, ConversionParams, Rational, rescale};
use crate::queue::{PlanarQueue, is_allocation_error};
use crate::resample::{AudioConverter, check_source};

/// Result of feeding the fifo.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Destination samples appended (may be zero while the resampler fills a chunk).
    Queued(usize),
    /// End-of-input recorded.
    Flushed,
    /// The frame could not be converted and was dropped.
    Discarded,
}

/// Item produced by [`ResampleFifo::receive_many`].
#[derive(Clone, Debug, PartialEq)]
pub enum FifoOutput {
    Chunk(AudioChunk),
    /// Sentinel appended once the input has been flushed.
    End,
}

/// Conversion stage plus planar buffer of converted samples.
pub struct ResampleFifo {
    params: ConversionParams,
    /// `None` in fifo-only mode (source and destination identical).
    converter: Option<AudioConverter>,
    queue: PlanarQueue,
    start_position: Option<i64>,
    position: i64,
    flushed: bool,
    total_output: u64,
    label: String,
}

impl ResampleFifo {
    /// Build a fifo converting `params.src` into `params.dst`.
    pub fn new(params: ConversionParams, chunk_frames: usize, label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        let converter = if params.is_passthrough() {
            tracing::info!(fifo = %label, %params, "fifo only mode, no conversion needed");
            // Validate the destination even when nothing is converted.
            AudioConverter::new(params, chunk_frames)?;
            None
        } else {
            let converter = AudioConverter::new(params, chunk_frames)?;
            tracing::info!(fifo = %label, %params, "resampler ready");
            Some(converter)
        };
        Ok(Self {
            params,
            converter,
            queue: PlanarQueue::new(params.dst.channel_count()),
            start_position: None,
            position: 0,
            flushed: false,
            total_output: 0,
            label,
        })
    }

    pub fn params(&self) -> &ConversionParams {
        &self.params
    }

    pub fn is_fifo_only(&self) -> bool {
        self.converter.is_none()
    }

    /// Append a frame, or mark end-of-input with `None`.
    ///
    /// Conversion failures drop the frame and report [`SendOutcome::Discarded`]; a failed
    /// buffer allocation is returned as an error and is fatal for the caller.
    pub fn send(&mut self, frame: Option<&AudioFrame>) -> Result<SendOutcome> {
        let Some(frame) = frame else {
            self.flushed = true;
            if let Some(converter) = self.converter.as_mut() {
                match converter.flush() {
                    Ok(tail) => {
                        self.queue.push_planar(&tail)?;
                    }
                    Err(e) => tracing::warn!(fifo = %self.label, "resampler flush failed: {e:#}"),
                }
            }
            return Ok(SendOutcome::Flushed);
        };

        if self.start_position.is_none() {
            if let Some(pts) = frame.pts {
                let start = rescale(
                    pts,
                    frame.time_base,
                    Rational::per_sample(self.params.dst.sample_rate),
                );
                self.start_position = Some(start);
                self.position = start;
            }
        }

        let converted = match self.converter.as_mut() {
            None => check_source(&self.params.src, frame).and_then(|()| frame.to_planar_f32()),
            Some(converter) => converter.convert(frame),
        };
        let planes = match converted {
            Ok(planes) => planes,
            Err(e) => {
                tracing::warn!(fifo = %self.label, "conversion failed, frame dropped: {e:#}");
                return Ok(SendOutcome::Discarded);
            }
        };
        match self.queue.push_planar(&planes) {
            Ok(n) => Ok(SendOutcome::Queued(n)),
            Err(e) if is_allocation_error(&e) => Err(e),
            Err(e) => {
                tracing::warn!(fifo = %self.label, "converted frame rejected: {e:#}");
                Ok(SendOutcome::Discarded)
            }
        }
    }

    /// Dequeue exactly `desired` samples, or everything buffered when `desired == 0`.
    ///
    /// Returns `None` when fewer than `desired` samples are buffered (or nothing at all for a
    /// drain request). Never returns a shorter chunk.
    pub fn receive(&mut self, desired: usize) -> Option<AudioChunk> {
        let desired = if desired == 0 {
            self.queue.len_frames()
        } else {
            desired
        };
        if desired == 0 {
            return None;
        }
        let planes = self.queue.pop(desired)?;
        let chunk = AudioChunk {
            position: self.position,
            planes,
        };
        self.advance(desired);
        Some(chunk)
    }

    /// Dequeue as many `desired`-sized chunks as are buffered.
    ///
    /// Once the input has been flushed the result ends with [`FifoOutput::End`].
    pub fn receive_many(&mut self, desired: usize) -> Vec<FifoOutput> {
        let desired = if desired == 0 {
            self.queue.len_frames()
        } else {
            desired
        };
        let mut out = Vec::new();
        while desired > 0 {
            match self.receive(desired) {
                Some(chunk) => out.push(FifoOutput::Chunk(chunk)),
                None => break,
            }
        }
        if self.flushed {
            out.push(FifoOutput::End);
        }
        out
    }

    /// Drop exactly `count` samples from the front when that many are buffered.
    ///
    /// Returns the number dropped (0 or `count`); the position advances accordingly.
    pub fn discard(&mut self, count: usize) -> usize {
        if count == 0 || self.queue.len_frames() < count {
            return 0;
        }
        let dropped = self.queue.discard(count);
        self.advance(dropped);
        dropped
    }

    fn advance(&mut self, samples: usize) {
        self.position += samples as i64;
        self.total_output += samples as u64;
    }

    /// Destination-domain samples currently buffered.
    pub fn buffered(&self) -> usize {
        self.queue.len_frames()
    }

    /// Buffered duration in milliseconds at the destination rate.
    pub fn buffered_ms(&self) -> f64 {
        self.params.dst.samples_to_ms(self.buffered())
    }

    /// Position of the next unread sample.
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Position recorded from the first timestamped frame.
    pub fn start_position(&self) -> Option<i64> {
        self.start_position
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// Total samples dequeued (received or discarded).
    pub fn total_output(&self) -> u64 {
        self.total_output
    }
}
