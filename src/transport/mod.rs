//! Device link: scanning, connecting and receiving sensor notifications.
//!
//! The session logic is backend-agnostic; backends implement [`Central`] and
//! [`Link`]. Real hardware goes through btleplug (`ble` feature), the
//! simulated wearable is always available.

pub mod session;
pub mod simulated;
pub mod types;

#[cfg(feature = "ble")]
pub mod ble;

pub use session::{stop_channel, Central, Link, StopHandle, StopSignal, TransportSession};
pub use simulated::{SimulatedCentral, SimulatedSignal};
pub use types::{Advertisement, ConnectionState, FailureReason, TransportError};

#[cfg(feature = "ble")]
pub use ble::{BleCentral, BleLink};

use std::future::Future;

/// Run a transport future to completion on a current-thread runtime.
///
/// Sessions are driven from a dedicated thread; this is that thread's
/// executor.
pub fn block_on<F: Future>(future: F) -> Result<F::Output, TransportError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| TransportError::Runtime(e.to_string()))?;
    Ok(runtime.block_on(future))
}
