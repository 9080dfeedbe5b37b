//! Fixed-cadence processing of the ingested samples.
//!
//! The [`Processor`] is single-owner state: ring buffers, filter chain,
//! estimator. [`Scheduler::spawn`] moves it onto a worker thread that drains
//! the queues on every loop iteration and runs the chain on a timer.

use crate::config::{Config, ConfigError, ProcessingMode, SchedulerConfig};
use crate::core::filters::FilterChain;
use crate::core::queue::IngestQueues;
use crate::core::ring::RingBuffer;
use crate::core::rri::{RriEstimator, RriResult};
use crate::core::types::AccelSample;
use crate::diagnostics::SharedDiagnostics;
use crate::events::{EventBus, MonitorEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Samples moved from the queues into the ring buffers by one ingest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ingested {
    pub ppg: usize,
    pub accel: usize,
}

/// Ring buffers plus the processing chain.
pub struct Processor {
    queues: IngestQueues,
    ppg: RingBuffer<f64>,
    accel: RingBuffer<AccelSample>,
    /// Bandpassed and motion-cancelled PPG, only filled in per-chunk mode
    cleaned: RingBuffer<f64>,
    chain: FilterChain,
    estimator: RriEstimator,
    mode: ProcessingMode,
    latest_bpm: Option<f64>,
    last_waveform: Vec<f64>,
    events: EventBus,
    diagnostics: SharedDiagnostics,
}

impl Processor {
    pub fn new(
        config: &Config,
        queues: IngestQueues,
        events: EventBus,
        diagnostics: SharedDiagnostics,
    ) -> Result<Self, ConfigError> {
        let signal = &config.signal;
        let chain = FilterChain::new(signal).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let estimator = RriEstimator::new(signal.sample_rate, signal.hr_min, signal.hr_max)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let (rate, secs) = (signal.sample_rate, signal.window_secs);

        Ok(Self {
            queues,
            ppg: RingBuffer::with_history_seconds(rate, secs),
            accel: RingBuffer::with_history_seconds(rate, secs),
            cleaned: RingBuffer::with_history_seconds(rate, secs),
            chain,
            estimator,
            mode: config.scheduler.mode,
            latest_bpm: None,
            last_waveform: Vec::new(),
            events,
            diagnostics,
        })
    }

    /// Move queued batches into the ring buffers.
    ///
    /// Only the PPG queue is waited on, for at most `timeout`; it sets the
    /// pace of the loop. Accelerometer data is taken only if already queued,
    /// so a stalled accelerometer never delays PPG and the loop never waits
    /// twice. Accelerometer samples go in first so a per-chunk pass sees the
    /// motion recorded alongside its PPG.
    pub fn ingest(&mut self, timeout: Duration) -> Ingested {
        let ppg_batches = self.queues.ppg.drain(timeout);
        let accel_batches = self.queues.accel.try_drain();

        let mut counts = Ingested::default();
        for batch in accel_batches {
            counts.accel += batch.samples.len();
            self.accel.extend(batch.samples);
        }

        let history = match self.mode {
            ProcessingMode::PerChunk => self.accel.chronological(),
            ProcessingMode::PerTick => Vec::new(),
        };
        let mut pending: usize = ppg_batches.iter().map(|b| b.samples.len()).sum();

        for batch in ppg_batches {
            let values: Vec<f64> = batch.samples.iter().map(|&v| v as f64).collect();
            counts.ppg += values.len();
            pending -= values.len();
            self.ppg.extend(values.iter().copied());

            if self.mode == ProcessingMode::PerChunk {
                // Later batches of this drain own the newest motion samples
                let aligned = &history[..history.len().saturating_sub(pending)];
                let cleaned = self.chain.clean_chunk(&values, aligned);
                self.cleaned.extend(cleaned);
            }
        }

        if counts.ppg > 0 {
            self.diagnostics.record_ppg_samples(counts.ppg as u64);
        }
        if counts.accel > 0 {
            self.diagnostics.record_accel_samples(counts.accel as u64);
        }
        counts
    }

    /// Run the chain and the estimator, then publish the results.
    ///
    /// Returns `None` when there is no PPG data yet. A pass without a
    /// determinable rate leaves the last known BPM in place.
    pub fn process(&mut self) -> Option<RriResult> {
        if self.ppg.is_empty() {
            return None;
        }

        let waveform = match self.mode {
            ProcessingMode::PerTick => {
                let ppg = self.ppg.chronological();
                let accel = self.accel.chronological();
                self.chain.process(&ppg, &accel)
            }
            ProcessingMode::PerChunk => self.chain.finish(&self.cleaned.chronological()),
        };
        self.diagnostics.record_processing_pass();

        let result = self.estimator.estimate(&waveform);
        self.events.publish(MonitorEvent::Waveform(waveform.clone()));
        self.events
            .publish(MonitorEvent::Accelerometer(self.accel.chronological()));

        if let Some(bpm) = result.bpm {
            self.latest_bpm = Some(bpm);
            self.diagnostics.record_heart_rate_update();
            tracing::debug!(
                "heart rate {bpm:.1} BPM from {} peaks",
                self.estimator.last_peaks().len()
            );
            self.events.publish(MonitorEvent::HeartRate {
                bpm,
                rri_ms: result.intervals_ms.clone(),
            });
        }

        self.last_waveform = waveform;
        Some(result)
    }

    /// Publish the raw buffers without re-running the chain.
    pub fn refresh(&self) {
        self.events
            .publish(MonitorEvent::RawPpg(self.ppg.chronological()));
        self.events
            .publish(MonitorEvent::Accelerometer(self.accel.chronological()));
    }

    /// Last BPM any pass produced.
    pub fn latest_bpm(&self) -> Option<f64> {
        self.latest_bpm
    }

    /// Waveform of the most recent pass.
    pub fn last_waveform(&self) -> &[f64] {
        &self.last_waveform
    }

    pub fn ppg_buffer(&self) -> &RingBuffer<f64> {
        &self.ppg
    }

    pub fn accel_buffer(&self) -> &RingBuffer<AccelSample> {
        &self.accel
    }

    pub fn estimator(&self) -> &RriEstimator {
        &self.estimator
    }

    pub fn mode(&self) -> ProcessingMode {
        self.mode
    }
}

/// Drives a [`Processor`] on its own thread.
pub struct Scheduler;

impl Scheduler {
    pub fn spawn(processor: Processor, config: &SchedulerConfig) -> SchedulerHandle {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let config = config.clone();

        let thread = thread::spawn(move || run(processor, &config, &flag));

        SchedulerHandle {
            running,
            thread: Some(thread),
        }
    }
}

fn run(mut processor: Processor, config: &SchedulerConfig, running: &AtomicBool) -> Processor {
    tracing::info!(
        "scheduler started ({:?}, every {} ms)",
        processor.mode(),
        config.process_interval.as_millis()
    );

    let mut last_process = Instant::now();
    let mut last_refresh = Instant::now();

    while running.load(Ordering::SeqCst) {
        processor.ingest(config.poll_timeout);

        if last_process.elapsed() >= config.process_interval {
            processor.process();
            last_process = Instant::now();
        }

        if let Some(interval) = config.refresh_interval {
            if last_refresh.elapsed() >= interval {
                processor.refresh();
                last_refresh = Instant::now();
            }
        }
    }

    tracing::info!("scheduler stopped");
    processor
}

/// Owner handle of a running scheduler thread.
pub struct SchedulerHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<Processor>>,
}

impl SchedulerHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop between ticks and hand the processor back.
    ///
    /// `None` only if the worker thread panicked.
    pub fn stop(mut self) -> Option<Processor> {
        self.running.store(false, Ordering::SeqCst);
        self.thread.take().and_then(|t| t.join().ok())
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AccelBatch, PpgBatch};
    use crate::diagnostics::create_shared_diagnostics;

    fn config(window_secs: f64) -> Config {
        let mut config = Config::default();
        config.signal.window_secs = window_secs;
        config
    }

    fn pulse(n: usize) -> Vec<u16> {
        (0..n)
            .map(|i| {
                let phase = 2.0 * std::f64::consts::PI * i as f64 / 100.0;
                (2000.0 + 500.0 * phase.sin()).round() as u16
            })
            .collect()
    }

    fn processor(config: &Config) -> (Processor, IngestQueues, EventBus) {
        let queues = IngestQueues::new(config.scheduler.queue_capacity);
        let events = EventBus::new();
        let processor = Processor::new(
            config,
            queues.clone(),
            events.clone(),
            create_shared_diagnostics(),
        )
        .unwrap();
        (processor, queues, events)
    }

    fn push_ppg(queues: &IngestQueues, samples: &[u16]) {
        for (k, chunk) in samples.chunks(20).enumerate() {
            queues
                .ppg
                .try_push(PpgBatch {
                    timestamp: k as u32,
                    samples: chunk.to_vec(),
                })
                .unwrap();
        }
    }

    #[test]
    fn test_ingest_fills_rings() {
        let (mut processor, queues, _events) = processor(&config(10.0));
        push_ppg(&queues, &pulse(100));
        queues
            .accel
            .try_push(AccelBatch {
                timestamp: 0,
                samples: vec![AccelSample::new(1, 2, 3); 4],
            })
            .unwrap();

        let counts = processor.ingest(Duration::from_millis(10));
        assert_eq!(counts, Ingested { ppg: 100, accel: 4 });
        assert_eq!(processor.ppg_buffer().len(), 100);
        assert_eq!(processor.accel_buffer().latest(), Some(AccelSample::new(1, 2, 3)));
    }

    #[test]
    fn test_process_without_data_publishes_nothing() {
        let (mut processor, _queues, events) = processor(&config(10.0));
        let rx = events.subscribe();
        assert!(processor.process().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_process_estimates_and_keeps_latest_bpm() {
        let (mut processor, queues, events) = processor(&config(10.0));
        let rx = events.subscribe();

        push_ppg(&queues, &pulse(1000));
        processor.ingest(Duration::from_millis(10));
        let result = processor.process().unwrap();
        let bpm = result.bpm.unwrap();
        assert!((58.0..=62.0).contains(&bpm), "bpm = {bpm}");
        assert_eq!(processor.latest_bpm(), Some(bpm));
        assert_eq!(processor.last_waveform().len(), 1000);

        let published: Vec<MonitorEvent> = rx.try_iter().collect();
        assert!(matches!(published[0], MonitorEvent::Waveform(_)));
        assert!(published
            .iter()
            .any(|e| matches!(e, MonitorEvent::HeartRate { .. })));

        // A flat window has no peaks; the previous rate is kept.
        push_ppg(&queues, &[2000; 1000]);
        processor.ingest(Duration::from_millis(10));
        let flat = processor.process().unwrap();
        assert_eq!(flat.bpm, None);
        assert_eq!(processor.latest_bpm(), Some(bpm));
    }

    #[test]
    fn test_refresh_publishes_raw_buffers() {
        let (mut processor, queues, events) = processor(&config(10.0));
        let rx = events.subscribe();
        push_ppg(&queues, &[1, 2, 3]);
        processor.ingest(Duration::from_millis(10));

        processor.refresh();
        assert_eq!(rx.try_recv().unwrap(), MonitorEvent::RawPpg(vec![1.0, 2.0, 3.0]));
        assert_eq!(rx.try_recv().unwrap(), MonitorEvent::Accelerometer(Vec::new()));
    }

    #[test]
    fn test_accel_drained_without_waiting_on_ppg() {
        let (mut processor, queues, _events) = processor(&config(10.0));
        queues
            .accel
            .try_push(AccelBatch {
                timestamp: 0,
                samples: vec![AccelSample::new(1, 2, 3); 4],
            })
            .unwrap();

        let counts = processor.ingest(Duration::from_millis(20));
        assert_eq!(counts, Ingested { ppg: 0, accel: 4 });
    }

    fn frame_by_frame(mode: ProcessingMode, period: f64, secs: usize) -> Processor {
        let mut config = config(10.0);
        config.scheduler.mode = mode;
        let (mut processor, queues, _events) = processor(&config);

        let samples: Vec<u16> = (0..secs * 100)
            .map(|i| {
                let phase = 2.0 * std::f64::consts::PI * i as f64 / period;
                (2000.0 + 500.0 * phase.sin()).round() as u16
            })
            .collect();
        for (k, chunk) in samples.chunks(10).enumerate() {
            queues
                .ppg
                .try_push(PpgBatch {
                    timestamp: k as u32,
                    samples: chunk.to_vec(),
                })
                .unwrap();
            queues
                .accel
                .try_push(AccelBatch {
                    timestamp: k as u32,
                    samples: vec![AccelSample::default(); chunk.len()],
                })
                .unwrap();
            processor.ingest(Duration::from_millis(10));
            if k % 10 == 9 {
                processor.process();
            }
        }
        processor
    }

    #[test]
    fn test_per_chunk_mode_tracks_heart_rate() {
        for (period, expected) in [(100.0, 60.0), (6000.0 / 72.0, 72.0), (60.0, 100.0)] {
            let processor = frame_by_frame(ProcessingMode::PerChunk, period, 30);
            let bpm = processor.latest_bpm().unwrap();
            assert!((bpm - expected).abs() < 1.0, "expected {expected}, got {bpm}");

            let waveform = processor.last_waveform();
            assert_eq!(waveform.len(), 1000);
            assert!(waveform.iter().all(|v| (-1.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_modes_agree_on_steady_signal() {
        let per_tick = frame_by_frame(ProcessingMode::PerTick, 100.0, 30);
        let per_chunk = frame_by_frame(ProcessingMode::PerChunk, 100.0, 30);
        let (a, b) = (per_tick.latest_bpm().unwrap(), per_chunk.latest_bpm().unwrap());
        assert!((a - b).abs() < 1.0, "per-tick {a}, per-chunk {b}");
    }

    #[test]
    fn test_spawned_scheduler_returns_processor() {
        let mut config = config(10.0);
        config.scheduler.poll_timeout = Duration::from_millis(5);
        config.scheduler.process_interval = Duration::from_millis(20);
        let (processor, queues, events) = processor(&config);
        let rx = events.subscribe();

        push_ppg(&queues, &pulse(200));
        let handle = Scheduler::spawn(processor, &config.scheduler);
        assert!(handle.is_running());
        thread::sleep(Duration::from_millis(150));

        let processor = handle.stop().unwrap();
        assert_eq!(processor.ppg_buffer().len(), 200);
        assert!(rx
            .try_iter()
            .any(|e| matches!(e, MonitorEvent::Waveform(_))));
    }
}
