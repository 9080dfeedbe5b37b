//! PPG Monitor - heart rate from a wrist-worn optical sensor.
//!
//! This library ingests PPG and accelerometer frames notified by a BLE
//! wearable, cleans the optical signal and estimates heart rate and
//! RR intervals in real time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         PPG Monitor                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │  Transport  │──▶│   Decoder   │──▶│   Ingest    │        │
//! │  │  (session)  │   │  (frames)   │   │   Queues    │        │
//! │  └─────────────┘   └─────────────┘   └─────────────┘        │
//! │                                             │ tick           │
//! │                                             ▼                │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │  Estimator  │◀──│   Filter    │◀──│    Ring     │        │
//! │  │  (RRI/BPM)  │   │    Chain    │   │   Buffers   │        │
//! │  └─────────────┘   └─────────────┘   └─────────────┘        │
//! │         │                                                    │
//! │         ▼                                                    │
//! │  ┌─────────────┐                     ┌─────────────┐        │
//! │  │  Event Bus  │                     │ Diagnostics │        │
//! │  └─────────────┘                     └─────────────┘        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use ppg_monitor::{core, create_shared_diagnostics, Config, EventBus};
//!
//! let config = Config::default();
//! let events = EventBus::new();
//! let queues = core::IngestQueues::new(config.scheduler.queue_capacity);
//! let processor = core::Processor::new(
//!     &config,
//!     queues.clone(),
//!     events.clone(),
//!     create_shared_diagnostics(),
//! )
//! .expect("valid configuration");
//!
//! // Hand queues.sink(..) to a transport session, then:
//! let handle = core::Scheduler::spawn(processor, &config.scheduler);
//! ```

pub mod config;
pub mod core;
pub mod diagnostics;
pub mod events;
pub mod transport;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError, ProcessingMode};
pub use core::{Processor, RriResult, SampleBatch, Scheduler};
pub use diagnostics::{create_shared_diagnostics, Diagnostics, SharedDiagnostics};
pub use events::{EventBus, MonitorEvent};
pub use transport::{ConnectionState, FailureReason, TransportSession};

/// Version of the monitor.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
