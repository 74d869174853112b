//! Buffer module for accumulating readings and cutting them into batches.
//!
//! The buffer is owned by the simulation task and never shared, so it needs
//! no locking. It enforces the dispatch rules: batches are cut from the front
//! in generation order, and at most one batch is in flight at a time.

use std::collections::VecDeque;

use tracing::debug;

use crate::reading::{Batch, Reading};

/// Statistics about buffer operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Total number of readings enqueued
    pub readings_received: u64,

    /// Total number of readings handed out in batches
    pub readings_flushed: u64,

    /// Number of batches cut because the size threshold was reached
    pub size_flushes: u64,

    /// Number of batches cut by the final drain after stop
    pub final_flushes: u64,
}

/// FIFO of pending readings with a single in-flight slot.
#[derive(Debug)]
pub struct ReadingBuffer {
    queue: VecDeque<Reading>,
    batch_size: usize,
    in_flight: bool,
    stats: BufferStats,
}

impl ReadingBuffer {
    /// Create an empty buffer. A zero batch size is treated as one.
    pub fn new(batch_size: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            batch_size: batch_size.max(1),
            in_flight: false,
            stats: BufferStats::default(),
        }
    }

    /// Append readings at the tail, preserving their order.
    pub fn enqueue(&mut self, readings: impl IntoIterator<Item = Reading>) {
        let before = self.queue.len();
        self.queue.extend(readings);
        self.stats.readings_received += (self.queue.len() - before) as u64;
    }

    /// Cut the next full batch if one is ready and nothing is in flight.
    ///
    /// Marks the batch as in flight; the caller must report completion with
    /// [`ReadingBuffer::complete_in_flight`].
    pub fn take_ready_batch(&mut self) -> Option<Batch> {
        if self.in_flight || self.queue.len() < self.batch_size {
            return None;
        }

        self.stats.size_flushes += 1;
        debug!(
            batch_size = self.batch_size,
            buffered = self.queue.len(),
            "Cutting batch: size threshold reached"
        );
        Some(self.cut(self.batch_size))
    }

    /// Cut up to `batch_size` readings regardless of the threshold.
    ///
    /// Used only while draining after stop. Returns `None` when the buffer is
    /// empty or a batch is still in flight.
    pub fn take_final_batch(&mut self) -> Option<Batch> {
        if self.in_flight || self.queue.is_empty() {
            return None;
        }

        let count = self.queue.len().min(self.batch_size);
        self.stats.final_flushes += 1;
        debug!(batch_size = count, remaining = self.queue.len(), "Draining buffer");
        Some(self.cut(count))
    }

    /// Release the in-flight slot after a delivery attempt finished.
    pub fn complete_in_flight(&mut self) {
        self.in_flight = false;
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }

    fn cut(&mut self, count: usize) -> Batch {
        let readings: Vec<Reading> = self.queue.drain(..count).collect();
        self.stats.readings_flushed += readings.len() as u64;
        self.in_flight = true;
        Batch::new(readings)
    }
}
