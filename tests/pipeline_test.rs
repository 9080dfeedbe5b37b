//! End-to-end tests: encoded frames in, heart rate out.

use ppg_monitor::config::Config;
use ppg_monitor::core::{encode_accel, encode_ppg, AccelSample, IngestQueues, Processor};
use ppg_monitor::diagnostics::{create_shared_diagnostics, SharedDiagnostics};
use ppg_monitor::events::{EventBus, MonitorEvent};
use std::f64::consts::PI;
use std::time::Duration;

const FRAME_SAMPLES: usize = 10;

fn pulse(n: usize, period: f64, baseline: f64, amplitude: f64) -> Vec<u16> {
    (0..n)
        .map(|i| (baseline + amplitude * (2.0 * PI * i as f64 / period).sin()).round() as u16)
        .collect()
}

/// PPG and zero-motion accelerometer frames, interleaved like the device sends them.
fn frames(ppg: &[u16]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    for (k, chunk) in ppg.chunks(FRAME_SAMPLES).enumerate() {
        let timestamp = (k * FRAME_SAMPLES * 10) as u32;
        out.push(encode_ppg(timestamp, chunk).unwrap());
        out.push(encode_accel(timestamp, &vec![AccelSample::default(); chunk.len()]).unwrap());
    }
    out
}

fn pipeline(window_secs: f64) -> (Processor, IngestQueues, EventBus, SharedDiagnostics) {
    let mut config = Config::default();
    config.signal.window_secs = window_secs;

    let events = EventBus::new();
    let diagnostics = create_shared_diagnostics();
    let queues = IngestQueues::new(config.scheduler.queue_capacity);
    let processor =
        Processor::new(&config, queues.clone(), events.clone(), diagnostics.clone()).unwrap();
    (processor, queues, events, diagnostics)
}

#[test]
fn test_sixty_bpm_end_to_end() {
    let (mut processor, queues, events, diagnostics) = pipeline(10.0);
    let rx = events.subscribe();
    let sink = queues.sink(events.clone(), diagnostics.clone());

    for frame in frames(&pulse(1000, 100.0, 2000.0, 500.0)) {
        assert!(sink.push_frame(&frame));
    }

    let ingested = processor.ingest(Duration::from_millis(50));
    assert_eq!(ingested.ppg, 1000);
    assert_eq!(ingested.accel, 1000);

    let result = processor.process().unwrap();
    let peaks = processor.estimator().last_peaks().len();
    assert!((9..=10).contains(&peaks), "found {peaks} peaks");

    let bpm = result.bpm.unwrap();
    assert!((58.0..=62.0).contains(&bpm), "bpm = {bpm}");
    assert!(result
        .intervals_ms
        .iter()
        .all(|&v| (60_000.0 / 185.0..=60_000.0 / 45.0).contains(&v)));

    let waveform = processor.last_waveform();
    assert_eq!(waveform.len(), 1000);
    assert!(waveform.iter().all(|v| (-1.0..=1.0).contains(v)));

    let heart_rates: Vec<f64> = rx
        .try_iter()
        .filter_map(|e| match e {
            MonitorEvent::HeartRate { bpm, .. } => Some(bpm),
            _ => None,
        })
        .collect();
    assert_eq!(heart_rates, vec![bpm]);

    let stats = diagnostics.stats();
    assert_eq!(stats.frames_decoded, 200);
    assert_eq!(stats.ppg_samples, 1000);
    assert_eq!(stats.heart_rate_updates, 1);
}

#[test]
fn test_corrupted_frames_are_dropped() {
    let (mut processor, queues, events, diagnostics) = pipeline(10.0);
    let sink = queues.sink(events, diagnostics.clone());

    let mut all = frames(&pulse(1000, 100.0, 1500.0, 300.0));
    // Damage every tenth PPG frame's checksum
    for frame in all.iter_mut().step_by(20) {
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
    }
    let accepted = all.iter().filter(|f| sink.push_frame(f)).count();

    assert_eq!(accepted, 190);
    assert_eq!(diagnostics.stats().frames_rejected, 10);

    processor.ingest(Duration::from_millis(50));
    assert_eq!(processor.ppg_buffer().len(), 900);
    let result = processor.process().unwrap();
    assert!(result.bpm.is_some());
}

#[test]
fn test_no_rate_before_two_beats() {
    let (mut processor, queues, events, diagnostics) = pipeline(10.0);
    let sink = queues.sink(events, diagnostics);

    // Less than one period of signal
    for frame in frames(&pulse(60, 100.0, 2000.0, 500.0)) {
        sink.push_frame(&frame);
    }
    processor.ingest(Duration::from_millis(50));

    let result = processor.process().unwrap();
    assert_eq!(result.bpm, None);
    assert_eq!(processor.latest_bpm(), None);
}
