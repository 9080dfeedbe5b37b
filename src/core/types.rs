//! Sample types produced by the frame decoder.
//!
//! A frame carries one timestamp and a batch of samples of a single kind.

use serde::{Deserialize, Serialize};

/// One accelerometer reading (raw device counts per axis).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccelSample {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl AccelSample {
    pub fn new(x: i16, y: i16, z: i16) -> Self {
        Self { x, y, z }
    }

    /// The three axes as floating point values, in x, y, z order.
    pub fn axes(&self) -> [f64; 3] {
        [self.x as f64, self.y as f64, self.z as f64]
    }
}

/// A single decoded sample, tagged with the timestamp of its frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodedSample {
    Ppg { value: u16, timestamp: u32 },
    Accel { x: i16, y: i16, z: i16, timestamp: u32 },
}

impl DecodedSample {
    pub fn timestamp(&self) -> u32 {
        match self {
            DecodedSample::Ppg { timestamp, .. } => *timestamp,
            DecodedSample::Accel { timestamp, .. } => *timestamp,
        }
    }
}

/// PPG samples from one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PpgBatch {
    pub timestamp: u32,
    pub samples: Vec<u16>,
}

/// Accelerometer triples from one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccelBatch {
    pub timestamp: u32,
    pub samples: Vec<AccelSample>,
}

/// Everything a valid frame decodes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleBatch {
    Ppg(PpgBatch),
    Accel(AccelBatch),
}

impl SampleBatch {
    pub fn timestamp(&self) -> u32 {
        match self {
            SampleBatch::Ppg(b) => b.timestamp,
            SampleBatch::Accel(b) => b.timestamp,
        }
    }

    /// Number of samples in the batch.
    pub fn len(&self) -> usize {
        match self {
            SampleBatch::Ppg(b) => b.samples.len(),
            SampleBatch::Accel(b) => b.samples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expand the batch into individually tagged samples.
    pub fn samples(&self) -> Vec<DecodedSample> {
        match self {
            SampleBatch::Ppg(b) => b
                .samples
                .iter()
                .map(|&value| DecodedSample::Ppg {
                    value,
                    timestamp: b.timestamp,
                })
                .collect(),
            SampleBatch::Accel(b) => b
                .samples
                .iter()
                .map(|s| DecodedSample::Accel {
                    x: s.x,
                    y: s.y,
                    z: s.z,
                    timestamp: b.timestamp,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accel_axes_order() {
        assert_eq!(AccelSample::new(3, -4, 7).axes(), [3.0, -4.0, 7.0]);
    }

    #[test]
    fn test_batch_expansion_keeps_timestamp() {
        let batch = SampleBatch::Accel(AccelBatch {
            timestamp: 42,
            samples: vec![AccelSample::new(1, -2, 3), AccelSample::new(0, 0, -1)],
        });

        let samples = batch.samples();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.timestamp() == 42));
        assert_eq!(
            samples[0],
            DecodedSample::Accel {
                x: 1,
                y: -2,
                z: 3,
                timestamp: 42
            }
        );
    }
}
