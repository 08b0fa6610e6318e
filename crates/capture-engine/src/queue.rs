//! Bounded FIFO of frames waiting for the encoder.
//!
//! The queue itself has no locking; it lives inside the session state and is
//! only touched under the session mutex.

use std::collections::VecDeque;

use crate::frame::QueuedFrame;

#[derive(Debug)]
pub struct FrameQueue {
    frames: VecDeque<QueuedFrame>,
    capacity: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, handing it back if the queue is full.
    pub fn push(&mut self, frame: QueuedFrame) -> Result<(), QueuedFrame> {
        if self.is_full() {
            return Err(frame);
        }
        self.frames.push_back(frame);
        Ok(())
    }

    /// Oldest queued frame.
    pub fn pop(&mut self) -> Option<QueuedFrame> {
        self.frames.pop_front()
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

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
