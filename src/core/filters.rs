//! The PPG cleaning chain.
//!
//! Each pass runs, in order:
//! 1. Butterworth bandpass (causal IIR, biquad sections)
//! 2. NLMS motion-artifact cancellation against the accelerometer
//! 3. Savitzky-Golay smoothing
//! 4. Min-max normalization

use crate::config::SignalConfig;
use crate::core::types::AccelSample;
use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};

/// Q factors of the two sections of a 4th-order Butterworth filter:
/// 1 / (2 cos(pi/8)) and 1 / (2 cos(3 pi/8)).
const BUTTERWORTH_4_Q: [f64; 2] = [0.541_196_100_146_197, 1.306_562_964_876_376_6];

/// Errors raised while building the chain from configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterError {
    InvalidPassband { low: f64, high: f64, nyquist: f64 },
    InvalidSmoothing { window: usize, order: usize },
    InvalidNlms(String),
    InvalidRange { min: f64, max: f64 },
    Design(String),
}

impl std::fmt::Display for FilterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterError::InvalidPassband { low, high, nyquist } => write!(
                f,
                "Invalid passband {low}-{high} Hz (must satisfy 0 < low < high < {nyquist})"
            ),
            FilterError::InvalidSmoothing { window, order } => write!(
                f,
                "Invalid smoothing window {window} / order {order} (window must be odd and larger than order)"
            ),
            FilterError::InvalidNlms(e) => write!(f, "Invalid NLMS parameters: {e}"),
            FilterError::InvalidRange { min, max } => {
                write!(f, "Invalid normalization range [{min}, {max}]")
            }
            FilterError::Design(e) => write!(f, "Filter design failed: {e}"),
        }
    }
}

impl std::error::Error for FilterError {}

// ============================================================================
// Bandpass
// ============================================================================

/// 4th-order Butterworth high-pass cascaded with a 4th-order Butterworth
/// low-pass.
///
/// Coefficients are computed once. Every call to [`Bandpass::apply`] starts
/// from rest with the first sample subtracted, so the sensor's DC level does
/// not produce an onset transient.
#[derive(Debug, Clone)]
pub struct Bandpass {
    sections: Vec<Coefficients<f64>>,
}

impl Bandpass {
    pub fn new(sample_rate: f64, low_hz: f64, high_hz: f64) -> Result<Self, FilterError> {
        let nyquist = sample_rate / 2.0;
        if !(low_hz > 0.0 && low_hz < high_hz && high_hz < nyquist) {
            return Err(FilterError::InvalidPassband {
                low: low_hz,
                high: high_hz,
                nyquist,
            });
        }

        let mut sections = Vec::with_capacity(4);
        for q in BUTTERWORTH_4_Q {
            sections.push(section(Type::HighPass, sample_rate, low_hz, q)?);
        }
        for q in BUTTERWORTH_4_Q {
            sections.push(section(Type::LowPass, sample_rate, high_hz, q)?);
        }

        Ok(Self { sections })
    }

    /// Filter a chunk.
    pub fn apply(&self, data: &[f64]) -> Vec<f64> {
        self.stream().apply(data)
    }

    /// A filter at rest whose state carries over from chunk to chunk.
    pub fn stream(&self) -> BandpassStream {
        BandpassStream {
            stages: self
                .sections
                .iter()
                .map(|c| DirectForm2Transposed::<f64>::new(*c))
                .collect(),
            offset: None,
        }
    }
}

/// Running bandpass state for data that arrives in pieces.
///
/// The offset is the first sample ever seen; later chunks continue from the
/// state the previous one left behind.
#[derive(Debug, Clone)]
pub struct BandpassStream {
    stages: Vec<DirectForm2Transposed<f64>>,
    offset: Option<f64>,
}

impl BandpassStream {
    pub fn apply(&mut self, data: &[f64]) -> Vec<f64> {
        let Some(&first) = data.first() else {
            return Vec::new();
        };
        let offset = *self.offset.get_or_insert(first);

        data.iter()
            .map(|&x| self.stages.iter_mut().fold(x - offset, |acc, s| s.run(acc)))
            .collect()
    }
}

fn section(kind: Type<f64>, fs: f64, f0: f64, q: f64) -> Result<Coefficients<f64>, FilterError> {
    Coefficients::<f64>::from_params(kind, fs.hz(), f0.hz(), q)
        .map_err(|e| FilterError::Design(format!("{e:?}")))
}

// ============================================================================
// NLMS
// ============================================================================

/// Normalized least-mean-squares adaptive canceller.
///
/// The weights model the transfer from accelerometer motion to the PPG
/// artifact and persist across calls.
#[derive(Debug, Clone)]
pub struct Nlms {
    weights: Vec<f64>,
    mu: f64,
    eps: f64,
}

impl Nlms {
    pub fn new(order: usize, mu: f64, eps: f64) -> Result<Self, FilterError> {
        if order == 0 {
            return Err(FilterError::InvalidNlms("order must be at least 1".into()));
        }
        if !(mu > 0.0 && mu < 2.0) {
            return Err(FilterError::InvalidNlms(format!(
                "step size {mu} outside (0, 2)"
            )));
        }
        if eps <= 0.0 {
            return Err(FilterError::InvalidNlms(format!("epsilon {eps} must be > 0")));
        }
        Ok(Self {
            weights: vec![0.0; order],
            mu,
            eps,
        })
    }

    pub fn order(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Clean one sample `d` given the reference vector `x` (most recent
    /// first). Returns the error term, which is the cleaned sample.
    ///
    /// A reference shorter than the filter order passes `d` through.
    pub fn adapt(&mut self, d: f64, x: &[f64]) -> f64 {
        if x.len() < self.weights.len() {
            return d;
        }
        let x = &x[..self.weights.len()];

        let norm = dot(x, x) + self.eps;
        let y = dot(&self.weights, x);
        let e = d - y;
        let step = self.mu * e / norm;
        for (w, xi) in self.weights.iter_mut().zip(x) {
            *w += step * xi;
        }
        e
    }

}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

// ============================================================================
// Savitzky-Golay
// ============================================================================

/// Least-squares polynomial smoothing over a sliding window.
///
/// Interior points use the centre row of the projection matrix. The first and
/// last half-window are evaluated from the polynomial fitted to the first and
/// last full window.
#[derive(Debug, Clone)]
pub struct SavitzkyGolay {
    window: usize,
    /// `rows[j][k]`: weight of window sample `k` when estimating position `j`
    rows: Vec<Vec<f64>>,
}

impl SavitzkyGolay {
    pub fn new(window: usize, order: usize) -> Result<Self, FilterError> {
        if window % 2 == 0 || window <= order {
            return Err(FilterError::InvalidSmoothing { window, order });
        }

        let half = (window / 2) as f64;
        let positions: Vec<f64> = (0..window).map(|j| j as f64 - half).collect();
        let terms = order + 1;

        // Normal equations X^T X of the Vandermonde matrix
        let gram: Vec<Vec<f64>> = (0..terms)
            .map(|a| {
                (0..terms)
                    .map(|b| positions.iter().map(|t| t.powi((a + b) as i32)).sum::<f64>())
                    .collect()
            })
            .collect();

        let mut rows = Vec::with_capacity(window);
        for &tj in &positions {
            let basis: Vec<f64> = (0..terms).map(|a| tj.powi(a as i32)).collect();
            let coeffs = solve(gram.clone(), basis).ok_or(FilterError::InvalidSmoothing {
                window,
                order,
            })?;
            let row: Vec<f64> = positions
                .iter()
                .map(|tk| {
                    coeffs
                        .iter()
                        .enumerate()
                        .map(|(a, c)| c * tk.powi(a as i32))
                        .sum::<f64>()
                })
                .collect();
            rows.push(row);
        }

        Ok(Self { window, rows })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Smooth a chunk. Chunks shorter than the window pass through.
    pub fn apply(&self, data: &[f64]) -> Vec<f64> {
        let n = data.len();
        let w = self.window;
        if n < w {
            return data.to_vec();
        }

        let half = w / 2;
        let centre = &self.rows[half];
        (0..n)
            .map(|i| {
                let (row, start) = if i < half {
                    (&self.rows[i], 0)
                } else if i >= n - half {
                    (&self.rows[w - (n - i)], n - w)
                } else {
                    (centre, i - half)
                };
                dot(row, &data[start..start + w])
            })
            .collect()
    }
}

/// Solve `a * x = b` by Gauss-Jordan elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    Some((0..n).map(|i| b[i] / a[i][i]).collect())
}

// ============================================================================
// Normalization
// ============================================================================

/// Min-max rescale into `[min, max]`. Constant input maps to zeros.
pub fn normalize(data: &[f64], range: (f64, f64)) -> Vec<f64> {
    let lo = data.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = hi - lo;
    if data.is_empty() || span == 0.0 || !span.is_finite() {
        return vec![0.0; data.len()];
    }

    let (min, max) = range;
    data.iter()
        .map(|&v| (v - lo) / span * (max - min) + min)
        .collect()
}

// ============================================================================
// Chain
// ============================================================================

/// Bandpass, NLMS, smoothing and normalization wired together.
///
/// [`FilterChain::process`] cleans a whole window in one go. For chunked
/// input, [`FilterChain::clean_chunk`] runs the causal stages with their
/// state carried across chunks, and [`FilterChain::finish`] smooths and
/// normalizes the accumulated result.
#[derive(Debug, Clone)]
pub struct FilterChain {
    bandpass: Bandpass,
    stream: BandpassStream,
    nlms: Nlms,
    smoother: SavitzkyGolay,
    range: (f64, f64),
    /// Reused reference vector
    reference: Vec<f64>,
}

impl FilterChain {
    pub fn new(config: &SignalConfig) -> Result<Self, FilterError> {
        let (min, max) = config.normalize_range;
        if !(min < max) {
            return Err(FilterError::InvalidRange { min, max });
        }

        let nlms = Nlms::new(config.nlms_order, config.nlms_mu, config.nlms_eps)?;
        let bandpass = Bandpass::new(config.sample_rate, config.low_hz, config.high_hz)?;
        Ok(Self {
            stream: bandpass.stream(),
            bandpass,
            reference: Vec::with_capacity(nlms.order()),
            nlms,
            smoother: SavitzkyGolay::new(config.smoothing_window, config.smoothing_order)?,
            range: config.normalize_range,
        })
    }

    pub fn nlms(&self) -> &Nlms {
        &self.nlms
    }

    /// Clean a PPG window using the accelerometer history as motion reference.
    ///
    /// `accel` is oldest first; its last `ppg.len()` triples are aligned with
    /// the PPG samples. With less accelerometer history than PPG samples the
    /// adaptive stage is skipped.
    pub fn process(&mut self, ppg: &[f64], accel: &[AccelSample]) -> Vec<f64> {
        if ppg.is_empty() {
            return Vec::new();
        }

        let filtered = self.bandpass.apply(ppg);
        let cleaned = self.cancel_if_aligned(filtered, accel);
        self.finish(&cleaned)
    }

    /// Bandpass and NLMS for one chunk of a continuous stream.
    ///
    /// Alignment with `accel` is the same as in [`FilterChain::process`]. The
    /// output is neither smoothed nor normalized.
    pub fn clean_chunk(&mut self, ppg: &[f64], accel: &[AccelSample]) -> Vec<f64> {
        let filtered = self.stream.apply(ppg);
        self.cancel_if_aligned(filtered, accel)
    }

    /// Smoothing and normalization of an already cleaned waveform.
    pub fn finish(&self, cleaned: &[f64]) -> Vec<f64> {
        let smoothed = self.smoother.apply(cleaned);
        normalize(&smoothed, self.range)
    }

    fn cancel_if_aligned(&mut self, filtered: Vec<f64>, accel: &[AccelSample]) -> Vec<f64> {
        if !filtered.is_empty() && accel.len() >= filtered.len() {
            self.cancel_motion(&filtered, accel)
        } else {
            filtered
        }
    }

    fn cancel_motion(&mut self, filtered: &[f64], accel: &[AccelSample]) -> Vec<f64> {
        let order = self.nlms.order();
        let offset = accel.len() - filtered.len();
        let flat: Vec<f64> = accel.iter().flat_map(|s| s.axes()).collect();

        let mut out = Vec::with_capacity(filtered.len());
        for (i, &d) in filtered.iter().enumerate() {
            fill_reference(&mut self.reference, &flat, offset + i, order);
            out.push(self.nlms.adapt(d, &self.reference));
        }
        out
    }
}

/// Reference vector for the sample aligned with triple `triple`: the last
/// `order` axis values up to and including that triple, most recent first,
/// zero where the history runs out.
fn fill_reference(reference: &mut Vec<f64>, flat: &[f64], triple: usize, order: usize) {
    let end = (triple + 1) * 3;
    let start = end.saturating_sub(order);

    reference.clear();
    reference.extend(flat[start..end].iter().rev());
    reference.resize(order, 0.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, fs: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / fs).sin())
            .collect()
    }

    fn rms(data: &[f64]) -> f64 {
        (data.iter().map(|v| v * v).sum::<f64>() / data.len() as f64).sqrt()
    }

    #[test]
    fn test_bandpass_keeps_passband_rejects_outside() {
        let bp = Bandpass::new(100.0, 0.5, 4.5).unwrap();

        let pass = bp.apply(&sine(1.5, 100.0, 2000));
        let stop_high = bp.apply(&sine(20.0, 100.0, 2000));
        let stop_low = bp.apply(&sine(0.05, 100.0, 2000));

        // Skip the settling period
        assert!(rms(&pass[500..]) > 0.6);
        assert!(rms(&stop_high[500..]) < 0.01);
        assert!(rms(&stop_low[500..]) < 0.05);
    }

    #[test]
    fn test_bandpass_ignores_dc_offset() {
        let bp = Bandpass::new(100.0, 0.5, 4.5).unwrap();
        let out = bp.apply(&vec![30_000.0; 500]);
        assert!(out.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn test_stream_continues_across_chunks() {
        let bp = Bandpass::new(100.0, 0.5, 4.5).unwrap();
        let data: Vec<f64> = sine(1.2, 100.0, 600)
            .iter()
            .map(|v| 2000.0 + 300.0 * v)
            .collect();

        let whole = bp.apply(&data);
        let mut stream = bp.stream();
        let pieces: Vec<f64> = data.chunks(10).flat_map(|c| stream.apply(c)).collect();

        assert_eq!(pieces.len(), whole.len());
        for (a, b) in pieces.iter().zip(&whole) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_bandpass_rejects_bad_passband() {
        assert!(Bandpass::new(100.0, 4.5, 0.5).is_err());
        assert!(Bandpass::new(100.0, 0.5, 60.0).is_err());
        assert!(Bandpass::new(100.0, 0.0, 4.5).is_err());
    }

    #[test]
    fn test_nlms_zero_reference_passes_through() {
        let mut nlms = Nlms::new(8, 0.01, 1e-6).unwrap();
        let zeros = [0.0; 8];
        for d in [0.3, -1.2, 5.0, 0.0] {
            assert_eq!(nlms.adapt(d, &zeros), d);
        }
        assert!(nlms.weights().iter().all(|&w| w == 0.0));
    }

    #[test]
    fn test_nlms_short_reference_passes_through() {
        let mut nlms = Nlms::new(8, 0.01, 1e-6).unwrap();
        assert_eq!(nlms.adapt(1.5, &[1.0, 2.0, 3.0]), 1.5);
        assert!(nlms.weights().iter().all(|&w| w == 0.0));
    }

    #[test]
    fn test_nlms_learns_correlated_artifact() {
        let mut nlms = Nlms::new(2, 0.5, 1e-6).unwrap();
        // Artifact is 0.8 * reference, no underlying signal
        let mut last_error = f64::MAX;
        for i in 0..2000 {
            let r = ((i as f64) * 0.37).sin() + 1.5;
            let x = [r, 0.5];
            last_error = nlms.adapt(0.8 * r, &x).abs();
        }
        assert!(last_error < 1e-3);
    }

    #[test]
    fn test_nlms_rejects_bad_params() {
        assert!(Nlms::new(0, 0.01, 1e-6).is_err());
        assert!(Nlms::new(8, 0.0, 1e-6).is_err());
        assert!(Nlms::new(8, 0.01, 0.0).is_err());
    }

    #[test]
    fn test_savgol_centre_coefficients() {
        let sg = SavitzkyGolay::new(11, 3).unwrap();
        let expected = [-36.0, 9.0, 44.0, 69.0, 84.0, 89.0, 84.0, 69.0, 44.0, 9.0, -36.0];
        for (got, want) in sg.rows[5].iter().zip(expected) {
            assert!((got - want / 429.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_savgol_preserves_cubic() {
        let sg = SavitzkyGolay::new(11, 3).unwrap();
        let data: Vec<f64> = (0..40)
            .map(|i| {
                let t = i as f64 * 0.1;
                t * t * t - 2.0 * t + 1.0
            })
            .collect();
        let out = sg.apply(&data);
        for (a, b) in out.iter().zip(&data) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_savgol_short_input_untouched() {
        let sg = SavitzkyGolay::new(11, 3).unwrap();
        let data = vec![1.0, 5.0, -2.0];
        assert_eq!(sg.apply(&data), data);
    }

    #[test]
    fn test_savgol_rejects_even_window() {
        assert!(SavitzkyGolay::new(10, 3).is_err());
        assert!(SavitzkyGolay::new(3, 3).is_err());
    }

    #[test]
    fn test_normalize_range() {
        let out = normalize(&[2.0, 4.0, 6.0], (-1.0, 1.0));
        assert_eq!(out, vec![-1.0, 0.0, 1.0]);

        let out = normalize(&[10.0, 20.0], (0.0, 100.0));
        assert_eq!(out, vec![0.0, 100.0]);
    }

    #[test]
    fn test_normalize_constant_is_zero() {
        assert_eq!(normalize(&[3.0; 4], (-1.0, 1.0)), vec![0.0; 4]);
        assert!(normalize(&[], (-1.0, 1.0)).is_empty());
    }

    #[test]
    fn test_reference_is_most_recent_first_zero_padded() {
        let accel = [
            AccelSample::new(1, 2, 3),
            AccelSample::new(4, 5, 6),
            AccelSample::new(7, 8, 9),
        ];
        let flat: Vec<f64> = accel.iter().flat_map(|s| s.axes()).collect();
        let mut reference = Vec::new();

        fill_reference(&mut reference, &flat, 0, 8);
        assert_eq!(reference, vec![3.0, 2.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

        fill_reference(&mut reference, &flat, 2, 8);
        assert_eq!(reference, vec![9.0, 8.0, 7.0, 6.0, 5.0, 4.0, 3.0, 2.0]);

        fill_reference(&mut reference, &flat, 1, 4);
        assert_eq!(reference, vec![6.0, 5.0, 4.0, 3.0]);
    }

    /// Cancels an artifact proportional to the x axis of the aligned triple,
    /// with more accelerometer history than PPG samples.
    fn residual_ratio(lead: usize) -> f64 {
        let mut config = SignalConfig::default();
        config.nlms_mu = 0.5;
        let mut chain = FilterChain::new(&config).unwrap();

        let (n, extra) = (2000, 50);
        let x = |j: usize| ((j * j * 37 + j * 11) % 199) as f64 - 99.0;
        let accel: Vec<AccelSample> = (0..n + extra)
            .map(|j| AccelSample::new(x(j) as i16, 0, 0))
            .collect();
        let artifact: Vec<f64> = (0..n).map(|i| 0.5 * x(extra + i + lead)).collect();

        let out = chain.cancel_motion(&artifact, &accel);
        rms(&out[n - 200..]) / rms(&artifact[n - 200..])
    }

    #[test]
    fn test_nlms_cancels_only_aligned_artifact() {
        assert!(residual_ratio(0) < 1e-6);
        // One sample ahead of the reference cannot be modelled
        assert!(residual_ratio(1) > 0.5);
    }

    #[test]
    fn test_chain_output_in_range() {
        let mut chain = FilterChain::new(&SignalConfig::default()).unwrap();
        let ppg: Vec<f64> = sine(1.2, 100.0, 600)
            .iter()
            .map(|v| 2000.0 + 300.0 * v)
            .collect();
        let accel = vec![AccelSample::new(10, -20, 4096); 600];

        let out = chain.process(&ppg, &accel);
        assert_eq!(out.len(), 600);
        assert!(out.iter().all(|v| (-1.0..=1.0).contains(v)));
        // Accelerometer history was long enough, so the canceller adapted
        assert!(chain.nlms().weights().iter().any(|&w| w != 0.0));
    }

    #[test]
    fn test_chunked_cleaning_matches_whole_window() {
        let mut whole = FilterChain::new(&SignalConfig::default()).unwrap();
        let mut chunked = FilterChain::new(&SignalConfig::default()).unwrap();
        let ppg: Vec<f64> = sine(1.0, 100.0, 500)
            .iter()
            .map(|v| 2000.0 + 500.0 * v)
            .collect();

        let expected = whole.process(&ppg, &[]);
        let cleaned: Vec<f64> = ppg.chunks(10).flat_map(|c| chunked.clean_chunk(c, &[])).collect();
        let out = chunked.finish(&cleaned);

        for (a, b) in out.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_chain_skips_nlms_without_accel_history() {
        let mut chain = FilterChain::new(&SignalConfig::default()).unwrap();
        let ppg = sine(1.0, 100.0, 300);
        let out = chain.process(&ppg, &[AccelSample::new(1, 1, 1); 10]);
        assert_eq!(out.len(), 300);
        assert!(chain.nlms().weights().iter().all(|&w| w == 0.0));
    }
}
