//! Planar sample queue backing the resample fifo.
//!
//! Samples are stored **planar**: one `VecDeque<f32>` per channel, all planes always holding
//! the same number of samples. The queue never blocks; callers that need exclusive access
//! wrap it in their own lock (see [`crate::sync::StreamSynchronizer`]).

use std::collections::VecDeque;

use anyhow::{Result, bail};

/// Unbounded planar `f32` queue.
pub struct PlanarQueue {
    planes: Vec<VecDeque<f32>>,
}

impl PlanarQueue {
    pub fn new(channels: usize) -> Self {
        Self {
            planes: (0..channels).map(|_| VecDeque::new()).collect(),
        }
    }

    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    /// Buffered samples per channel.
    pub fn len_frames(&self) -> usize {
        self.planes.first().map(VecDeque::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len_frames() == 0
    }

    /// Append one block of planes.
    ///
    /// Planes must match the channel count and have equal lengths. Capacity is reserved
    /// fallibly for every plane before any sample is written, so an allocation failure leaves
    /// the queue unchanged.
    pub fn push_planar(&mut self, planes: &[Vec<f32>]) -> Result<usize> {
        if planes.len() != self.planes.len() {
            bail!(
                "expected {} planes, got {}",
                self.planes.len(),
                planes.len()
            );
        }
        let frames = planes.first().map(Vec::len).unwrap_or(0);
        if planes.iter().any(|p| p.len() != frames) {
            bail!("planes have unequal lengths");
        }
        for plane in self.planes.iter_mut() {
            plane
                .try_reserve(frames)
                .map_err(|e| anyhow::Error::new(AllocationError(e.to_string())))?;
        }
        for (dst, src) in self.planes.iter_mut().zip(planes) {
            dst.extend(src.iter().copied());
        }
        Ok(frames)
    }

    /// Pop exactly `frames` samples per channel, or `None` if fewer are buffered.
    pub fn pop(&mut self, frames: usize) -> Option<Vec<Vec<f32>>> {
        if self.len_frames() < frames {
            return None;
        }
        Some(
            self.planes
                .iter_mut()
                .map(|plane| plane.drain(..frames).collect())
                .collect(),
        )
    }

    /// Drop up to `frames` samples per channel from the front; returns how many were dropped.
    pub fn discard(&mut self, frames: usize) -> usize {
        let take = frames.min(self.len_frames());
        for plane in self.planes.iter_mut() {
            plane.drain(..take);
        }
        take
    }
}

/// Marker for allocation failures in the sample queue.
///
/// Allocation failure is not data dependent; callers treat it as fatal.
#[derive(Debug)]
pub struct AllocationError(pub String);

impl std::fmt::Display for AllocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sample queue allocation failed: {}", self.0)
    }
}

impl std::error::Error for AllocationError {}

/// Whether `err` originates from a failed queue allocation.
pub fn is_allocation_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<AllocationError>().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_exact_requires_full_frames() {
        let mut q = PlanarQueue::new(2);
        q.push_planar(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert!(q.pop(3).is_none());
        assert_eq!(q.len_frames(), 2);

        let out = q.pop(2).unwrap();
        assert_eq!(out, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert!(q.is_empty());
    }

    #[test]
    fn push_rejects_mismatched_planes() {
        let mut q = PlanarQueue::new(2);
        assert!(q.push_planar(&[vec![1.0]]).is_err());
        assert!(q.push_planar(&[vec![1.0], vec![1.0, 2.0]]).is_err());
        assert!(q.is_empty());
    }

    #[test]
    fn discard_is_bounded_by_buffered() {
        let mut q = PlanarQueue::new(2);
        q.push_planar(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        assert_eq!(q.discard(2), 2);
        assert_eq!(q.discard(5), 1);
        assert_eq!(q.len_frames(), 0);
    }

    #[test]
    fn allocation_errors_are_recognizable() {
        let err = anyhow::Error::new(AllocationError("capacity overflow".to_string()));
        assert!(is_allocation_error(&err));
        assert!(!is_allocation_error(&anyhow::anyhow!("other")));
    }
}
