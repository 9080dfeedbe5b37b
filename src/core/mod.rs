//! Core functionality for the PPG monitor.
//!
//! This module contains:
//! - Frame decoding of the wearable's wire format
//! - Bounded ingestion queues and fixed-capacity ring buffers
//! - The filter chain and the RR-interval / heart-rate estimator
//! - The processing scheduler tying them together

pub mod decoder;
pub mod filters;
pub mod queue;
pub mod ring;
pub mod rri;
pub mod scheduler;
pub mod types;

// Re-export commonly used types
pub use decoder::{decode, decode_frame, encode_accel, encode_ppg, FrameError};
pub use filters::{
    normalize, Bandpass, BandpassStream, FilterChain, FilterError, Nlms, SavitzkyGolay,
};
pub use queue::{IngestQueue, IngestQueues, QueueFull, SampleSink, DEFAULT_QUEUE_CAPACITY};
pub use ring::RingBuffer;
pub use rri::{RriEstimator, RriResult};
pub use scheduler::{Processor, Scheduler, SchedulerHandle};
pub use types::{AccelBatch, AccelSample, DecodedSample, PpgBatch, SampleBatch};
