//! Typed notifications for the presentation layer.
//!
//! The transport session and the processing scheduler publish
//! [`MonitorEvent`]s onto an [`EventBus`]. Consumers subscribe and get their
//! own bounded channel; each event replaces whatever the consumer showed
//! before unless it chooses to keep history.

use crate::core::types::AccelSample;
use crate::transport::ConnectionState;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Default per-subscriber channel depth.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Everything the core tells the outside world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MonitorEvent {
    /// Cleaned, normalized waveform, most recent sample last
    Waveform(Vec<f64>),
    /// Raw PPG history, most recent sample last
    RawPpg(Vec<f64>),
    /// Raw accelerometer history, most recent triple last
    Accelerometer(Vec<AccelSample>),
    /// A new heart-rate estimate
    HeartRate { bpm: f64, rri_ms: Vec<f64> },
    /// Connection state change
    Connection(ConnectionState),
    /// Human-readable status line
    Status(String),
    /// Non-fatal problem, e.g. dropped data
    Warning(String),
}

/// Fan-out of events to every registered subscriber.
///
/// Publishing never blocks. A subscriber whose channel is full misses that
/// event; a subscriber that dropped its receiver is forgotten.
#[derive(Debug, Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<MonitorEvent>>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    /// Register a new consumer.
    pub fn subscribe(&self) -> Receiver<MonitorEvent> {
        let (tx, rx) = bounded(self.capacity);
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    /// Deliver an event to all subscribers.
    pub fn publish(&self, event: MonitorEvent) {
        let Ok(mut subs) = self.subscribers.lock() else {
            return;
        };
        subs.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn status(&self, message: impl Into<String>) {
        self.publish(MonitorEvent::Status(message.into()));
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.publish(MonitorEvent::Warning(message.into()));
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
