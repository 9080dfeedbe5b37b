//! Bounded hand-off between the transport thread and the scheduler.
//!
//! Producers never block: a full queue sheds the incoming batch and reports
//! it. Consumers wait at most a short poll timeout so a scheduler tick stays
//! bounded when no data arrives.

use crate::core::decoder::decode_frame;
use crate::core::types::{AccelBatch, PpgBatch, SampleBatch};
use crate::diagnostics::SharedDiagnostics;
use crate::events::EventBus;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;

/// Default queue depth, in batches.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Returned by [`IngestQueue::try_push`] when the queue is full.
///
/// Carries the rejected item back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFull<T>(pub T);

impl<T> std::fmt::Display for QueueFull<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "queue full")
    }
}

impl<T: std::fmt::Debug> std::error::Error for QueueFull<T> {}

/// A bounded multi-producer queue. Cloning shares the same queue.
#[derive(Debug)]
pub struct IngestQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    capacity: usize,
}

impl<T> Clone for IngestQueue<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> IngestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Enqueue without blocking.
    pub fn try_push(&self, item: T) -> Result<(), QueueFull<T>> {
        self.sender.try_send(item).map_err(|e| match e {
            TrySendError::Full(item) | TrySendError::Disconnected(item) => QueueFull(item),
        })
    }

    /// Wait up to `timeout` for the first item, then take everything else
    /// already queued. Returns an empty vector on expiry.
    pub fn drain(&self, timeout: Duration) -> Vec<T> {
        let mut items = Vec::new();
        match self.receiver.recv_timeout(timeout) {
            Ok(item) => items.push(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                return items
            }
        }
        items.extend(self.receiver.try_iter());
        items
    }

    /// Take everything already queued without waiting.
    pub fn try_drain(&self) -> Vec<T> {
        self.receiver.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// One queue per sample kind.
#[derive(Debug, Clone)]
pub struct IngestQueues {
    pub ppg: IngestQueue<PpgBatch>,
    pub accel: IngestQueue<AccelBatch>,
}

impl IngestQueues {
    pub fn new(capacity: usize) -> Self {
        Self {
            ppg: IngestQueue::new(capacity),
            accel: IngestQueue::new(capacity),
        }
    }

    /// Producer half for the transport side.
    pub fn sink(&self, events: EventBus, diagnostics: SharedDiagnostics) -> SampleSink {
        SampleSink {
            queues: self.clone(),
            events,
            diagnostics,
        }
    }
}

impl Default for IngestQueues {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

/// Where the transport delivers frames.
///
/// Decodes, counts, and enqueues; a full queue becomes a warning event.
#[derive(Debug, Clone)]
pub struct SampleSink {
    queues: IngestQueues,
    events: EventBus,
    diagnostics: SharedDiagnostics,
}

impl SampleSink {
    /// Decode a raw notification and enqueue its samples.
    ///
    /// Returns `true` if the frame was valid and enqueued.
    pub fn push_frame(&self, bytes: &[u8]) -> bool {
        match decode_frame(bytes) {
            Ok(batch) => {
                self.diagnostics.record_frame_decoded();
                self.push_batch(batch)
            }
            Err(e) => {
                self.diagnostics.record_frame_rejected();
                tracing::debug!("dropping frame ({} bytes): {e}", bytes.len());
                false
            }
        }
    }

    /// Enqueue an already decoded batch.
    pub fn push_batch(&self, batch: SampleBatch) -> bool {
        let result = match batch {
            SampleBatch::Ppg(b) => self.queues.ppg.try_push(b).map_err(|_| "PPG"),
            SampleBatch::Accel(b) => self.queues.accel.try_push(b).map_err(|_| "accelerometer"),
        };

        match result {
            Ok(()) => true,
            Err(kind) => {
                self.diagnostics.record_batch_dropped();
                tracing::warn!("{kind} queue full, dropping batch");
                self.events.warning(format!("{kind} queue full, data dropped"));
                false
            }
        }
    }
}
