//! An in-process wearable.
//!
//! Advertises under a configurable name and, once subscribed, notifies
//! encoded PPG and accelerometer frames at the configured sample rate. The
//! PPG trace is a pulse at a fixed heart rate on a DC offset, optionally
//! contaminated by motion that also shows up on the accelerometer.

use crate::config::{DEFAULT_DEVICE_NAME, DEFAULT_NOTIFY_CHARACTERISTIC};
use crate::core::decoder::{encode_accel, encode_ppg};
use crate::core::types::AccelSample;
use crate::transport::session::{Central, Link};
use crate::transport::types::{Advertisement, TransportError};
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::time::Duration;
use uuid::Uuid;

const SIMULATED_ID: &str = "sim-0";

/// Simulated scans resolve after at most this long.
const SCAN_LATENCY: Duration = Duration::from_millis(20);

/// Shape of the simulated signal.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedSignal {
    pub sample_rate: f64,
    pub heart_rate_bpm: f64,
    /// Raw PPG DC level
    pub baseline: f64,
    /// Raw PPG pulse amplitude
    pub amplitude: f64,
    /// Accelerometer sway amplitude on x, in counts; leaks into PPG
    pub motion_amplitude: f64,
    /// Sway frequency in Hz
    pub motion_hz: f64,
    /// Samples per notified frame
    pub samples_per_frame: usize,
}

impl Default for SimulatedSignal {
    fn default() -> Self {
        Self {
            sample_rate: 100.0,
            heart_rate_bpm: 72.0,
            baseline: 2000.0,
            amplitude: 500.0,
            motion_amplitude: 0.0,
            motion_hz: 1.7,
            samples_per_frame: 10,
        }
    }
}

/// A wearable that exists only in memory.
#[derive(Debug, Clone)]
pub struct SimulatedCentral {
    name: String,
    characteristic: Uuid,
    signal: SimulatedSignal,
    advertising: bool,
    failing_connects: usize,
    frame_limit: Option<u64>,
}

impl SimulatedCentral {
    pub fn new(signal: SimulatedSignal) -> Self {
        Self {
            name: DEFAULT_DEVICE_NAME.to_string(),
            characteristic: DEFAULT_NOTIFY_CHARACTERISTIC,
            signal,
            advertising: true,
            failing_connects: 0,
            frame_limit: None,
        }
    }

    /// Advertise under a different name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Notify on a different characteristic.
    pub fn with_characteristic(mut self, characteristic: Uuid) -> Self {
        self.characteristic = characteristic;
        self
    }

    /// Never show up in scans.
    pub fn silent(mut self) -> Self {
        self.advertising = false;
        self
    }

    /// Refuse the first `count` connection attempts.
    pub fn failing_connects(mut self, count: usize) -> Self {
        self.failing_connects = count;
        self
    }

    /// Drop the link after `frames` notifications.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }
}

impl Central for SimulatedCentral {
    type Link = SimulatedLink;

    async fn scan(&mut self, window: Duration) -> Result<Vec<Advertisement>, TransportError> {
        if !self.advertising {
            tokio::time::sleep(window).await;
            return Ok(Vec::new());
        }

        tokio::time::sleep(window.min(SCAN_LATENCY)).await;
        Ok(vec![Advertisement {
            name: Some(self.name.clone()),
            id: SIMULATED_ID.to_string(),
        }])
    }

    async fn connect(&mut self, device: &Advertisement) -> Result<SimulatedLink, TransportError> {
        if device.id != SIMULATED_ID {
            return Err(TransportError::Connect(format!("unknown device {}", device.id)));
        }
        if self.failing_connects > 0 {
            self.failing_connects -= 1;
            return Err(TransportError::Connect("device busy".into()));
        }

        Ok(SimulatedLink {
            characteristic: self.characteristic,
            generator: Generator::new(self.signal.clone()),
            subscribed: false,
            pending: VecDeque::new(),
            ticker: None,
            frames_sent: 0,
            frame_limit: self.frame_limit,
        })
    }
}

/// Connection to a [`SimulatedCentral`].
#[derive(Debug)]
pub struct SimulatedLink {
    characteristic: Uuid,
    generator: Generator,
    subscribed: bool,
    pending: VecDeque<Vec<u8>>,
    ticker: Option<tokio::time::Interval>,
    frames_sent: u64,
    frame_limit: Option<u64>,
}

impl Link for SimulatedLink {
    async fn subscribe(&mut self, characteristic: Uuid) -> Result<(), TransportError> {
        if characteristic != self.characteristic {
            return Err(TransportError::Subscribe(format!(
                "characteristic {characteristic} not found"
            )));
        }
        let period = self.generator.frame_period();
        self.ticker = Some(tokio::time::interval(period));
        self.subscribed = true;
        Ok(())
    }

    async fn next_notification(&mut self) -> Option<Vec<u8>> {
        if !self.subscribed {
            return None;
        }
        if self
            .frame_limit
            .is_some_and(|limit| self.frames_sent >= limit)
        {
            return None;
        }

        if self.pending.is_empty() {
            self.ticker.as_mut()?.tick().await;
            let (ppg, accel) = self.generator.next_frames();
            self.pending.extend(ppg);
            self.pending.extend(accel);
        }

        let frame = self.pending.pop_front()?;
        self.frames_sent += 1;
        Some(frame)
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.subscribed = false;
        self.ticker = None;
        self.pending.clear();
        Ok(())
    }
}

/// Produces one PPG frame and one accelerometer frame per tick.
#[derive(Debug)]
struct Generator {
    signal: SimulatedSignal,
    sample_index: u64,
}

impl Generator {
    fn new(signal: SimulatedSignal) -> Self {
        Self {
            signal,
            sample_index: 0,
        }
    }

    fn frame_period(&self) -> Duration {
        let samples = self.signal.samples_per_frame.max(1) as f64;
        Duration::from_secs_f64(samples / self.signal.sample_rate)
    }

    fn next_frames(&mut self) -> (Option<Vec<u8>>, Option<Vec<u8>>) {
        let s = &self.signal;
        let timestamp = (self.sample_index as f64 / s.sample_rate * 1000.0) as u32;

        let mut ppg = Vec::with_capacity(s.samples_per_frame);
        let mut accel = Vec::with_capacity(s.samples_per_frame);
        for _ in 0..s.samples_per_frame.max(1) {
            let t = self.sample_index as f64 / s.sample_rate;
            let beat = 2.0 * PI * s.heart_rate_bpm / 60.0 * t;
            let sway = s.motion_amplitude * (2.0 * PI * s.motion_hz * t).sin();

            let value = s.baseline + s.amplitude * beat.sin() + 0.5 * sway;
            ppg.push(value.clamp(0.0, u16::MAX as f64).round() as u16);
            accel.push(AccelSample::new(sway.round() as i16, 0, 1000));
            self.sample_index += 1;
        }

        (
            encode_ppg(timestamp, &ppg).ok(),
            encode_accel(timestamp, &accel).ok(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::decoder::decode;
    use crate::core::types::SampleBatch;

    #[tokio::test]
    async fn test_scan_reports_advertised_name() {
        let mut central = SimulatedCentral::new(SimulatedSignal::default()).with_name("Bench");
        let adverts = central.scan(Duration::from_millis(50)).await.unwrap();
        assert_eq!(adverts.len(), 1);
        assert!(adverts[0].matches("Bench"));
    }

    #[tokio::test]
    async fn test_link_notifies_decodable_frames() {
        let mut central = SimulatedCentral::new(SimulatedSignal::default()).with_frame_limit(4);
        let advert = central.scan(Duration::from_millis(10)).await.unwrap().remove(0);
        let mut link = central.connect(&advert).await.unwrap();
        link.subscribe(DEFAULT_NOTIFY_CHARACTERISTIC).await.unwrap();

        let mut kinds = Vec::new();
        while let Some(frame) = link.next_notification().await {
            match decode(&frame).unwrap() {
                SampleBatch::Ppg(b) => kinds.push(("ppg", b.samples.len())),
                SampleBatch::Accel(b) => kinds.push(("accel", b.samples.len())),
            }
        }
        assert_eq!(
            kinds,
            vec![("ppg", 10), ("accel", 10), ("ppg", 10), ("accel", 10)]
        );
    }

    #[tokio::test]
    async fn test_wrong_characteristic_is_rejected() {
        let mut central = SimulatedCentral::new(SimulatedSignal::default());
        let advert = central.scan(Duration::from_millis(10)).await.unwrap().remove(0);
        let mut link = central.connect(&advert).await.unwrap();
        assert!(link.subscribe(Uuid::nil()).await.is_err());
        assert!(link.next_notification().await.is_none());
    }

    #[tokio::test]
    async fn test_failing_connects_then_succeeds() {
        let mut central = SimulatedCentral::new(SimulatedSignal::default()).failing_connects(1);
        let advert = central.scan(Duration::from_millis(10)).await.unwrap().remove(0);
        assert!(central.connect(&advert).await.is_err());
        assert!(central.connect(&advert).await.is_ok());
    }
}
