//! Lock-free counters describing what the monitor has seen.
//!
//! The transport thread and the scheduler thread both record into the same
//! instance; reads are snapshots and may be slightly out of step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running statistics for one monitoring session.
#[derive(Debug)]
pub struct Diagnostics {
    /// Frames that passed validation
    frames_decoded: AtomicU64,
    /// Frames dropped by the decoder
    frames_rejected: AtomicU64,
    /// PPG samples appended to the ring buffer
    ppg_samples: AtomicU64,
    /// Accelerometer triples appended to the ring buffer
    accel_samples: AtomicU64,
    /// Batches shed because an ingestion queue was full
    batches_dropped: AtomicU64,
    /// Full filter + estimator passes
    processing_passes: AtomicU64,
    /// Passes that produced a heart rate
    heart_rate_updates: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            frames_decoded: AtomicU64::new(0),
            frames_rejected: AtomicU64::new(0),
            ppg_samples: AtomicU64::new(0),
            accel_samples: AtomicU64::new(0),
            batches_dropped: AtomicU64::new(0),
            processing_passes: AtomicU64::new(0),
            heart_rate_updates: AtomicU64::new(0),
            session_start: Utc::now(),
        }
    }

    pub fn record_frame_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ppg_samples(&self, count: u64) {
        self.ppg_samples.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_accel_samples(&self, count: u64) {
        self.accel_samples.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_batch_dropped(&self) {
        self.batches_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processing_pass(&self) {
        self.processing_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heart_rate_update(&self) {
        self.heart_rate_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> DiagnosticsStats {
        DiagnosticsStats {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            ppg_samples: self.ppg_samples.load(Ordering::Relaxed),
            accel_samples: self.accel_samples.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            processing_passes: self.processing_passes.load(Ordering::Relaxed),
            heart_rate_updates: self.heart_rate_updates.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Frames decoded: {}\n\
             - Frames rejected: {}\n\
             - PPG samples: {}\n\
             - Accelerometer samples: {}\n\
             - Batches dropped: {}\n\
             - Processing passes: {}\n\
             - Heart-rate updates: {}\n\
             - Session duration: {} seconds",
            stats.frames_decoded,
            stats.frames_rejected,
            stats.ppg_samples,
            stats.accel_samples,
            stats.batches_dropped,
            stats.processing_passes,
            stats.heart_rate_updates,
            stats.session_duration_secs
        )
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the diagnostics counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsStats {
    pub frames_decoded: u64,
    pub frames_rejected: u64,
    pub ppg_samples: u64,
    pub accel_samples: u64,
    pub batches_dropped: u64,
    pub processing_passes: u64,
    pub heart_rate_updates: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Diagnostics shared between the transport and scheduler threads.
pub type SharedDiagnostics = Arc<Diagnostics>;

/// Create a new shared diagnostics instance.
pub fn create_shared_diagnostics() -> SharedDiagnostics {
    Arc::new(Diagnostics::new())
}
