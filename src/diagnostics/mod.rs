//! Diagnostics for the PPG monitor.
//!
//! Counts decoded and rejected frames, shed batches and processing passes so
//! that silent drops stay visible.

pub mod counters;

// Re-export commonly used types
pub use counters::{
    create_shared_diagnostics, Diagnostics, DiagnosticsStats, SharedDiagnostics,
};
