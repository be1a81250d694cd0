//! Ordered collection of accepted stills.

use crate::types::StillImage;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("batch already holds {capacity} frames")]
    Full { capacity: usize },
    #[error("batch incomplete: {collected} of {required} frames")]
    Incomplete { collected: usize, required: usize },
}

/// Append-only holder for accepted frames, bounded by `capacity`.
#[derive(Debug, Clone)]
pub struct BatchCollector {
    frames: Vec<StillImage>,
    capacity: usize,
}

impl BatchCollector {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, returning the new length.
    pub fn push(&mut self, still: StillImage) -> Result<usize, BatchError> {
        if self.frames.len() >= self.capacity {
            return Err(BatchError::Full {
                capacity: self.capacity,
            });
        }
        self.frames.push(still);
        Ok(self.frames.len())
    }

    /// Single-shot mode: keep only the newest frame.
    pub fn replace(&mut self, still: StillImage) {
        self.frames.clear();
        self.frames.push(still);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    pub fn frames(&self) -> &[StillImage] {
        &self.frames
    }

    pub fn latest(&self) -> Option<&StillImage> {
        self.frames.last()
    }

    /// Snapshot the collected frames as a finished batch. The collector keeps
    /// its frames so a failed submission can be retried.
    pub fn finish(&self) -> Result<EnrollmentBatch, BatchError> {
        if !self.is_full() {
            return Err(BatchError::Incomplete {
                collected: self.frames.len(),
                required: self.capacity,
            });
        }
        Ok(EnrollmentBatch {
            frames: self.frames.clone(),
        })
    }
}

/// A complete, ordered enrollment batch (one still per pose step).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentBatch {
    frames: Vec<StillImage>,
}

impl EnrollmentBatch {
    pub fn frames(&self) -> &[StillImage] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn into_frames(self) -> Vec<StillImage> {
        self.frames
    }
}
