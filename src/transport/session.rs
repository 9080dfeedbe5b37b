//! Scan, connect, subscribe and listen, against any [`Central`] backend.
//!
//! The session walks `Idle -> Scanning -> Connecting -> Connected ->
//! Listening` and ends in `Failed(_)` or `Stopped`. Every await point also
//! watches the stop signal, so a stop request is honoured within one poll.

use crate::config::{Config, DeviceConfig, TransportConfig};
use crate::core::queue::SampleSink;
use crate::events::{EventBus, MonitorEvent};
use crate::transport::types::{Advertisement, ConnectionState, FailureReason, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

/// A BLE central role: discovers and connects peripherals.
#[allow(async_fn_in_trait)]
pub trait Central {
    type Link: Link;

    /// Scan for `window` and report every device seen.
    async fn scan(&mut self, window: Duration) -> Result<Vec<Advertisement>, TransportError>;

    /// Open a link to a previously advertised device.
    async fn connect(&mut self, device: &Advertisement) -> Result<Self::Link, TransportError>;
}

/// An open connection to one peripheral.
#[allow(async_fn_in_trait)]
pub trait Link {
    /// Enable notifications on a characteristic.
    async fn subscribe(&mut self, characteristic: Uuid) -> Result<(), TransportError>;

    /// Next notification payload, `None` once the link is gone.
    async fn next_notification(&mut self) -> Option<Vec<u8>>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// Requests a session stop. Cloneable; any clone stops the session.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Session side of a [`StopHandle`].
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Resolves once a stop was requested. Never resolves if every handle
    /// was dropped without stopping.
    pub async fn stopped(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create a connected stop handle / signal pair.
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
}

/// How establishing or listening ended early.
enum Interrupt {
    Stopped,
    Failed(FailureReason),
}

/// One connection attempt cycle, from scanning to the end of listening.
pub struct TransportSession<C: Central> {
    central: C,
    device: DeviceConfig,
    timing: TransportConfig,
    sink: SampleSink,
    events: EventBus,
    stop: StopSignal,
    state: ConnectionState,
}

impl<C: Central> TransportSession<C> {
    pub fn new(
        central: C,
        config: &Config,
        sink: SampleSink,
        events: EventBus,
        stop: StopSignal,
    ) -> Self {
        Self {
            central,
            device: config.device.clone(),
            timing: config.transport.clone(),
            sink,
            events,
            stop,
            state: ConnectionState::Idle,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run until the link fails or a stop is requested. Returns the
    /// terminal state.
    pub async fn run(&mut self) -> ConnectionState {
        let deadline = Instant::now() + self.timing.connection_timeout;

        let mut link = match self.establish(deadline).await {
            Ok(link) => link,
            Err(interrupt) => return self.finish(interrupt),
        };

        if let Err(interrupt) = self.subscribe(&mut link, deadline).await {
            self.disconnect(&mut link).await;
            return self.finish(interrupt);
        }

        let interrupt = self.listen(&mut link).await;
        if matches!(interrupt, Interrupt::Stopped) {
            self.disconnect(&mut link).await;
        }
        self.finish(interrupt)
    }

    async fn establish(&mut self, deadline: Instant) -> Result<C::Link, Interrupt> {
        loop {
            self.transition(ConnectionState::Scanning);

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Interrupt::Failed(FailureReason::Timeout));
            }
            let window = self.timing.scan_timeout.min(remaining);

            let scanned = tokio::select! {
                _ = self.stop.stopped() => return Err(Interrupt::Stopped),
                r = tokio::time::timeout_at(deadline, self.central.scan(window)) => r,
            };
            let adverts = match scanned {
                Err(_) => return Err(Interrupt::Failed(FailureReason::Timeout)),
                Ok(Ok(adverts)) => adverts,
                Ok(Err(e)) => {
                    tracing::warn!("{e}");
                    self.events.status(format!("scan error: {e}"));
                    Vec::new()
                }
            };

            let name = self.device.name.clone();
            for advert in adverts.iter().filter(|a| a.matches(&name)) {
                self.transition(ConnectionState::Connecting);
                tracing::info!("connecting to {name} ({})", advert.id);

                let connected = tokio::select! {
                    _ = self.stop.stopped() => return Err(Interrupt::Stopped),
                    r = tokio::time::timeout_at(deadline, self.central.connect(advert)) => r,
                };
                match connected {
                    Err(_) => return Err(Interrupt::Failed(FailureReason::Timeout)),
                    Ok(Ok(link)) => {
                        self.transition(ConnectionState::Connected);
                        return Ok(link);
                    }
                    Ok(Err(e)) => {
                        tracing::warn!("{e}");
                        self.events.status(format!("connection error: {e}"));
                    }
                }
            }

            tracing::debug!(
                "{name} not found, retrying in {} ms",
                self.timing.scan_retry_interval.as_millis()
            );
            let retry_at = (Instant::now() + self.timing.scan_retry_interval).min(deadline);
            tokio::select! {
                _ = self.stop.stopped() => return Err(Interrupt::Stopped),
                _ = tokio::time::sleep_until(retry_at) => {}
            }
        }
    }

    async fn subscribe(&mut self, link: &mut C::Link, deadline: Instant) -> Result<(), Interrupt> {
        let characteristic = self.device.characteristic;
        let subscribed = tokio::select! {
            _ = self.stop.stopped() => return Err(Interrupt::Stopped),
            r = tokio::time::timeout_at(deadline, link.subscribe(characteristic)) => r,
        };

        match subscribed {
            Ok(Ok(())) => {
                self.transition(ConnectionState::Listening);
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::warn!("{e}");
                self.events.status(format!("subscribe error: {e}"));
                Err(Interrupt::Failed(FailureReason::SubscribeFailed))
            }
            Err(_) => Err(Interrupt::Failed(FailureReason::SubscribeFailed)),
        }
    }

    async fn listen(&mut self, link: &mut C::Link) -> Interrupt {
        loop {
            let notification = tokio::select! {
                _ = self.stop.stopped() => return Interrupt::Stopped,
                n = link.next_notification() => n,
            };
            match notification {
                Some(bytes) => {
                    self.sink.push_frame(&bytes);
                }
                None => return Interrupt::Failed(FailureReason::LinkLost),
            }
        }
    }

    async fn disconnect(&mut self, link: &mut C::Link) {
        if let Err(e) = link.disconnect().await {
            tracing::warn!("{e}");
        }
    }

    fn finish(&mut self, interrupt: Interrupt) -> ConnectionState {
        let state = match interrupt {
            Interrupt::Stopped => ConnectionState::Stopped,
            Interrupt::Failed(reason) => ConnectionState::Failed(reason),
        };
        self.transition(state);
        state
    }

    fn transition(&mut self, state: ConnectionState) {
        if state == self.state {
            return;
        }
        match state {
            ConnectionState::Failed(_) => tracing::warn!("transport: {}", state),
            _ => tracing::info!("transport: {}", state),
        }
        self.state = state;
        self.events.publish(MonitorEvent::Connection(state));
        self.events.status(state.status_message());
    }
}
