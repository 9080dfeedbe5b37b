//! Configuration for the PPG monitor.
//!
//! Every tunable of the device link, the processing chain and the scheduler
//! lives here. Nothing is hardwired into the algorithms.

use crate::core::filters::FilterChain;
use crate::core::rri::RriEstimator;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Advertised name of the reference wearable.
pub const DEFAULT_DEVICE_NAME: &str = "Q31(ID-B4F7)";

/// Characteristic that notifies sensor frames.
pub const DEFAULT_NOTIFY_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x0000_34F2_0000_1000_8000_0080_5F9B_34FB);

/// Main configuration for the monitor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which wearable to connect to
    pub device: DeviceConfig,
    /// Scan / connect timing
    pub transport: TransportConfig,
    /// Signal processing parameters
    pub signal: SignalConfig,
    /// Queue and cadence settings
    pub scheduler: SchedulerConfig,
}

/// Target wearable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Advertised name to match exactly
    pub name: String,
    /// Notify characteristic carrying frames
    pub characteristic: Uuid,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_DEVICE_NAME.to_string(),
            characteristic: DEFAULT_NOTIFY_CHARACTERISTIC,
        }
    }
}

/// Scan and connection timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Length of one scan window
    #[serde(with = "duration_ms")]
    pub scan_timeout: Duration,
    /// Pause between scan attempts
    #[serde(with = "duration_ms")]
    pub scan_retry_interval: Duration,
    /// Give up establishing a link after this long
    #[serde(with = "duration_ms")]
    pub connection_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(3),
            scan_retry_interval: Duration::from_secs(1),
            connection_timeout: Duration::from_secs(40),
        }
    }
}

/// Signal processing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Sensor sample rate in Hz
    pub sample_rate: f64,
    /// Seconds of history kept in the ring buffers
    pub window_secs: f64,
    /// Bandpass lower edge in Hz
    pub low_hz: f64,
    /// Bandpass upper edge in Hz
    pub high_hz: f64,
    /// NLMS filter length
    pub nlms_order: usize,
    /// NLMS step size
    pub nlms_mu: f64,
    /// NLMS regularization
    pub nlms_eps: f64,
    /// Savitzky-Golay window length (odd)
    pub smoothing_window: usize,
    /// Savitzky-Golay polynomial order
    pub smoothing_order: usize,
    /// Output range of the cleaned waveform
    pub normalize_range: (f64, f64),
    /// Lowest plausible heart rate (BPM)
    pub hr_min: f64,
    /// Highest plausible heart rate (BPM)
    pub hr_max: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            sample_rate: 100.0,
            window_secs: 20.0,
            low_hz: 0.5,
            high_hz: 4.5,
            nlms_order: 8,
            nlms_mu: 0.01,
            nlms_eps: 1e-6,
            smoothing_window: 11,
            smoothing_order: 3,
            normalize_range: (-1.0, 1.0),
            hr_min: 45.0,
            hr_max: 185.0,
        }
    }
}

impl SignalConfig {
    /// Ring buffer capacity in samples.
    pub fn buffer_len(&self) -> usize {
        (self.sample_rate * self.window_secs).round().max(1.0) as usize
    }
}

/// When the filter chain runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Once per processing interval over the whole ring buffer
    #[default]
    PerTick,
    /// Once per drained PPG batch
    PerChunk,
}

/// Queue and cadence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Depth of each ingestion queue, in batches
    pub queue_capacity: usize,
    /// Longest wait on an empty queue
    #[serde(with = "duration_ms")]
    pub poll_timeout: Duration,
    /// Full filter + estimate cadence
    #[serde(with = "duration_ms")]
    pub process_interval: Duration,
    /// Raw waveform refresh cadence, `None` to disable
    #[serde(with = "option_duration_ms")]
    pub refresh_interval: Option<Duration>,
    /// Per-tick or per-chunk filtering
    pub mode: ProcessingMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            poll_timeout: Duration::from_millis(100),
            process_interval: Duration::from_millis(1000),
            refresh_interval: Some(Duration::from_millis(50)),
            mode: ProcessingMode::PerTick,
        }
    }
}

impl Config {
    /// Load configuration from a file, falling back to defaults if absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ppg-monitor")
            .join("config.json")
    }

    /// Check that the values describe a buildable pipeline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.name.is_empty() {
            return Err(ConfigError::Invalid("device name is empty".into()));
        }

        let t = &self.transport;
        if t.scan_timeout.is_zero() || t.connection_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "scan and connection timeouts must be non-zero".into(),
            ));
        }

        let s = &self.signal;
        if !(s.sample_rate > 0.0) || !(s.window_secs > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "sample rate {} Hz / window {} s must be positive",
                s.sample_rate, s.window_secs
            )));
        }
        FilterChain::new(s).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        RriEstimator::new(s.sample_rate, s.hr_min, s.hr_max)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let q = &self.scheduler;
        if q.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue capacity must be non-zero".into()));
        }
        if q.process_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "process interval must be non-zero".into(),
            ));
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration, as milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Serde support for an optional Duration, as milliseconds or null.
mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = Option::<u64>::deserialize(deserializer)?;
        Ok(ms.map(Duration::from_millis))
    }
}
