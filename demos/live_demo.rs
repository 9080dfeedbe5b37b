//! Demonstration of the PPG monitor pipeline.
//!
//! This example shows how to:
//! 1. Wire ingestion queues, processor and event bus together
//! 2. Drive a transport session against the simulated wearable
//! 3. Run the processing scheduler on its own thread
//! 4. Consume heart-rate events
//!
//! Run with: cargo run --example live_demo

use std::thread;
use std::time::{Duration, Instant};

use ppg_monitor::{
    core::{IngestQueues, Processor, Scheduler},
    create_shared_diagnostics,
    transport::{self, stop_channel, SimulatedCentral, SimulatedSignal, TransportSession},
    Config, EventBus, MonitorEvent,
};

fn main() {
    println!("PPG Monitor - Live Demo");
    println!("=======================");
    println!();

    let config = Config::default();
    let events = EventBus::new();
    let receiver = events.subscribe();
    let diagnostics = create_shared_diagnostics();
    let queues = IngestQueues::new(config.scheduler.queue_capacity);

    let processor =
        match Processor::new(&config, queues.clone(), events.clone(), diagnostics.clone()) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Error creating processor: {e}");
                return;
            }
        };
    let scheduler = Scheduler::spawn(processor, &config.scheduler);

    // A 64 BPM wearer swinging their arm a little
    let signal = SimulatedSignal {
        heart_rate_bpm: 64.0,
        motion_amplitude: 80.0,
        ..SimulatedSignal::default()
    };
    let (stop, stop_signal) = stop_channel();
    let sink = queues.sink(events.clone(), diagnostics.clone());
    let session_events = events.clone();
    let session_config = config.clone();
    let transport = thread::spawn(move || {
        let central = SimulatedCentral::new(signal);
        let mut session =
            TransportSession::new(central, &session_config, sink, session_events, stop_signal);
        transport::block_on(session.run())
    });

    println!("Streaming for 15 seconds...");
    println!();

    let started = Instant::now();
    while started.elapsed() < Duration::from_secs(15) {
        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(MonitorEvent::HeartRate { bpm, rri_ms }) => {
                println!("  {bpm:5.1} BPM  ({} intervals)", rri_ms.len());
            }
            Ok(MonitorEvent::Status(text)) => println!("  [{text}]"),
            Ok(MonitorEvent::Warning(text)) => println!("  warning: {text}"),
            Ok(_) => {}
            Err(_) => {}
        }
    }

    stop.stop();
    match transport.join() {
        Ok(Ok(state)) => println!("\nSession ended: {state}"),
        Ok(Err(e)) => eprintln!("\nSession error: {e}"),
        Err(_) => eprintln!("\nTransport thread panicked"),
    }

    if let Some(processor) = scheduler.stop() {
        if let Some(bpm) = processor.latest_bpm() {
            println!("Last heart rate: {bpm:.1} BPM");
        }
    }
    println!();
    println!("{}", diagnostics.summary());
}
