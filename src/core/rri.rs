//! Peak detection and RR-interval / heart-rate estimation.
//!
//! Peaks are local maxima above an adaptive threshold (median + 0.5 standard
//! deviations), thinned so no two are closer than the shortest physiologically
//! plausible beat. Intervals are clamped to the configured heart-rate bounds
//! before averaging.

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median, Statistics};

/// Threshold = median + this many standard deviations.
const THRESHOLD_STD_FACTOR: f64 = 0.5;

/// Intervals and the rate derived from them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RriResult {
    /// Clamped inter-peak intervals in milliseconds
    pub intervals_ms: Vec<f64>,
    /// Beats per minute, `None` with fewer than two peaks
    pub bpm: Option<f64>,
}

/// Invalid heart-rate bounds or sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidBounds {
    pub hr_min: f64,
    pub hr_max: f64,
    pub sample_rate: f64,
}

impl std::fmt::Display for InvalidBounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Invalid heart-rate bounds {}-{} BPM at {} Hz",
            self.hr_min, self.hr_max, self.sample_rate
        )
    }
}

impl std::error::Error for InvalidBounds {}

/// Stateless per call, apart from remembering the last peak set.
#[derive(Debug, Clone)]
pub struct RriEstimator {
    sample_rate: f64,
    hr_min: f64,
    hr_max: f64,
    min_spacing: usize,
    last_peaks: Vec<usize>,
}

impl RriEstimator {
    pub fn new(sample_rate: f64, hr_min: f64, hr_max: f64) -> Result<Self, InvalidBounds> {
        if !(sample_rate > 0.0 && hr_min > 0.0 && hr_min < hr_max) {
            return Err(InvalidBounds {
                hr_min,
                hr_max,
                sample_rate,
            });
        }

        let min_spacing = ((sample_rate * 60.0 / hr_max).floor() as usize).max(1);
        Ok(Self {
            sample_rate,
            hr_min,
            hr_max,
            min_spacing,
            last_peaks: Vec::new(),
        })
    }

    /// Minimum distance between two peaks, in samples.
    pub fn min_peak_spacing(&self) -> usize {
        self.min_spacing
    }

    /// Shortest admissible interval (at `hr_max`), in milliseconds.
    pub fn min_interval_ms(&self) -> f64 {
        60_000.0 / self.hr_max
    }

    /// Longest admissible interval (at `hr_min`), in milliseconds.
    pub fn max_interval_ms(&self) -> f64 {
        60_000.0 / self.hr_min
    }

    /// Peaks found by the most recent [`RriEstimator::detect_peaks`] call.
    pub fn last_peaks(&self) -> &[usize] {
        &self.last_peaks
    }

    /// Detect systolic peaks in a cleaned waveform.
    pub fn detect_peaks(&mut self, waveform: &[f64]) -> Vec<usize> {
        if waveform.len() < self.min_spacing || waveform.len() < 3 {
            self.last_peaks.clear();
            return Vec::new();
        }

        let threshold = adaptive_threshold(waveform);
        let candidates: Vec<usize> = local_maxima(waveform)
            .into_iter()
            .filter(|&i| waveform[i] > threshold)
            .collect();
        let peaks = merge_close_peaks(&candidates, waveform, self.min_spacing);

        self.last_peaks = peaks.clone();
        peaks
    }

    /// Intervals and BPM from peak indices.
    pub fn compute_rri(&self, peaks: &[usize]) -> RriResult {
        if peaks.len() < 2 {
            return RriResult::default();
        }

        let intervals: Vec<f64> = peaks
            .windows(2)
            .map(|pair| (pair[1] - pair[0]) as f64 / self.sample_rate * 1000.0)
            .collect();
        self.rate_from_intervals(&intervals)
    }

    /// Clamp raw intervals into the admissible range and derive BPM.
    pub fn rate_from_intervals(&self, intervals_ms: &[f64]) -> RriResult {
        if intervals_ms.is_empty() {
            return RriResult::default();
        }

        let (lo, hi) = (self.min_interval_ms(), self.max_interval_ms());
        let clamped: Vec<f64> = intervals_ms.iter().map(|v| v.clamp(lo, hi)).collect();
        let mean = clamped.iter().sum::<f64>() / clamped.len() as f64;

        RriResult {
            bpm: Some(60_000.0 / mean),
            intervals_ms: clamped,
        }
    }

    /// Peak detection followed by interval computation.
    pub fn estimate(&mut self, waveform: &[f64]) -> RriResult {
        let peaks = self.detect_peaks(waveform);
        self.compute_rri(&peaks)
    }
}

/// Median plus half a population standard deviation.
fn adaptive_threshold(waveform: &[f64]) -> f64 {
    let median = Data::new(waveform.to_vec()).median();
    let std_dev = waveform.iter().population_std_dev();
    median + THRESHOLD_STD_FACTOR * std_dev
}

/// Indices of local maxima. A flat top counts once, at its middle.
fn local_maxima(data: &[f64]) -> Vec<usize> {
    let n = data.len();
    let mut peaks = Vec::new();
    let mut i = 1;
    while i + 1 < n {
        if data[i] > data[i - 1] {
            let mut end = i;
            while end + 1 < n && data[end + 1] == data[i] {
                end += 1;
            }
            if end + 1 < n && data[end + 1] < data[i] {
                peaks.push((i + end) / 2);
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
    peaks
}

/// Scan peaks in order; whenever two are closer than `min_spacing`, keep the
/// taller. The result is pairwise at least `min_spacing` apart, so merging it
/// again changes nothing. Peaks are expected in ascending order; out-of-order
/// input is compared by distance and never underflows.
pub fn merge_close_peaks(peaks: &[usize], waveform: &[f64], min_spacing: usize) -> Vec<usize> {
    let mut kept: Vec<usize> = Vec::with_capacity(peaks.len());
    for &p in peaks {
        match kept.last_mut() {
            Some(last) if p.abs_diff(*last) < min_spacing => {
                if waveform[p] > waveform[*last] {
                    *last = p;
                }
            }
            _ => kept.push(p),
        }
    }
    kept
}
