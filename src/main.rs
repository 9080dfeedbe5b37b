//! PPG Monitor CLI
//!
//! Live heart rate from a BLE PPG wearable, or from the built-in simulator.

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::RecvTimeoutError;
use ppg_monitor::{
    config::{Config, ProcessingMode},
    core::{IngestQueues, Processor, SampleSink, Scheduler},
    create_shared_diagnostics,
    events::{EventBus, MonitorEvent},
    transport::{
        self, stop_channel, ConnectionState, SimulatedCentral, SimulatedSignal, StopSignal,
        TransportError, TransportSession,
    },
    VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ppg-monitor")]
#[command(version = VERSION)]
#[command(about = "Live heart rate from a BLE PPG wearable", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the wearable and stream heart rate
    Monitor {
        /// Advertised device name (overrides the configuration)
        #[arg(long)]
        device: Option<String>,

        /// When to run the filter chain
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Run the full pipeline against a simulated wearable
    Simulate {
        /// Heart rate of the synthetic pulse
        #[arg(long, default_value = "72")]
        bpm: f64,

        /// Accelerometer sway amplitude (counts); leaks into the PPG trace
        #[arg(long, default_value = "0")]
        motion: f64,

        /// When to run the filter chain
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Stop after this many seconds
        #[arg(long, default_value = "30")]
        duration: u64,
    },

    /// Show configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        init: bool,
    },

    /// Show configuration health and build capabilities
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    PerTick,
    PerChunk,
}

impl From<ModeArg> for ProcessingMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::PerTick => ProcessingMode::PerTick,
            ModeArg::PerChunk => ProcessingMode::PerChunk,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.unwrap_or_else(Config::config_path);
    let config = Config::load_from(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    match cli.command {
        Commands::Monitor {
            device,
            mode,
            duration,
        } => cmd_monitor(config, device, mode, duration.map(Duration::from_secs)),
        Commands::Simulate {
            bpm,
            motion,
            mode,
            duration,
        } => cmd_simulate(config, bpm, motion, mode, Duration::from_secs(duration)),
        Commands::Config { init } => cmd_config(&config, &config_path, init),
        Commands::Status => cmd_status(&config, &config_path),
    }
}

#[cfg(feature = "ble")]
fn cmd_monitor(
    mut config: Config,
    device: Option<String>,
    mode: Option<ModeArg>,
    duration: Option<Duration>,
) -> Result<()> {
    if let Some(name) = device {
        config.device.name = name;
    }
    if let Some(mode) = mode {
        config.scheduler.mode = mode.into();
    }
    config.validate()?;

    println!("PPG Monitor v{VERSION}");
    println!("Looking for {}...", config.device.name);
    println!();

    let session_config = config.clone();
    run_pipeline(&config, duration, move |sink, events, stop| {
        transport::block_on(async move {
            let central = transport::BleCentral::new().await?;
            let mut session = TransportSession::new(central, &session_config, sink, events, stop);
            Ok::<_, TransportError>(session.run().await)
        })
        .and_then(|state| state)
    })
}

#[cfg(not(feature = "ble"))]
fn cmd_monitor(
    _config: Config,
    _device: Option<String>,
    _mode: Option<ModeArg>,
    _duration: Option<Duration>,
) -> Result<()> {
    bail!("this build has no Bluetooth support; rebuild with `--features ble` or use `simulate`")
}

fn cmd_simulate(
    mut config: Config,
    bpm: f64,
    motion: f64,
    mode: Option<ModeArg>,
    duration: Duration,
) -> Result<()> {
    if !(bpm > 0.0) {
        bail!("heart rate must be positive, got {bpm}");
    }
    if let Some(mode) = mode {
        config.scheduler.mode = mode.into();
    }
    config.validate()?;

    println!("PPG Monitor v{VERSION} (simulated wearable at {bpm:.0} BPM)");
    println!();

    let signal = SimulatedSignal {
        sample_rate: config.signal.sample_rate,
        heart_rate_bpm: bpm,
        motion_amplitude: motion,
        ..SimulatedSignal::default()
    };
    let central = SimulatedCentral::new(signal)
        .with_name(config.device.name.clone())
        .with_characteristic(config.device.characteristic);

    let session_config = config.clone();
    run_pipeline(&config, Some(duration), move |sink, events, stop| {
        let mut session = TransportSession::new(central, &session_config, sink, events, stop);
        transport::block_on(session.run())
    })
}

/// Wire queues, scheduler and a transport session together and print
/// events until Ctrl+C, the duration elapses, or the session ends.
fn run_pipeline<F>(config: &Config, duration: Option<Duration>, session: F) -> Result<()>
where
    F: FnOnce(SampleSink, EventBus, StopSignal) -> Result<ConnectionState, TransportError>
        + Send
        + 'static,
{
    // Set up Ctrl+C handler before any worker thread exists
    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let events = EventBus::new();
    let receiver = events.subscribe();
    let diagnostics = create_shared_diagnostics();
    let queues = IngestQueues::new(config.scheduler.queue_capacity);

    let processor = Processor::new(config, queues.clone(), events.clone(), diagnostics.clone())?;
    let scheduler = Scheduler::spawn(processor, &config.scheduler);

    let (stop, stop_signal) = stop_channel();
    let sink = queues.sink(events.clone(), diagnostics.clone());
    let session_events = events.clone();
    let transport = thread::spawn(move || session(sink, session_events, stop_signal));

    let started = Instant::now();
    while running.load(Ordering::SeqCst) {
        if duration.is_some_and(|d| started.elapsed() >= d) {
            break;
        }

        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(MonitorEvent::Connection(state)) if state.is_terminal() => break,
            Ok(event) => print_event(&event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    stop.stop();
    let outcome = transport
        .join()
        .map_err(|_| anyhow::anyhow!("transport thread panicked"))?;
    let processor = scheduler.stop();

    println!();
    match outcome {
        Ok(state) => println!("Session ended: {state}"),
        Err(e) => eprintln!("Session error: {e}"),
    }
    if let Some(bpm) = processor.as_ref().and_then(|p| p.latest_bpm()) {
        println!("Last heart rate: {bpm:.1} BPM");
    }
    println!("{}", diagnostics.summary());

    Ok(())
}

fn print_event(event: &MonitorEvent) {
    let now = Local::now().format("%H:%M:%S");
    match event {
        MonitorEvent::HeartRate { bpm, rri_ms } => {
            let mean = rri_ms.iter().sum::<f64>() / rri_ms.len().max(1) as f64;
            println!(
                "[{now}] {bpm:5.1} BPM  (RRI {mean:.0} ms over {} beats)",
                rri_ms.len()
            );
        }
        MonitorEvent::Status(text) => println!("[{now}] {text}"),
        MonitorEvent::Warning(text) => eprintln!("[{now}] warning: {text}"),
        MonitorEvent::Waveform(samples) => {
            tracing::debug!("waveform: {} samples", samples.len());
        }
        MonitorEvent::RawPpg(_) | MonitorEvent::Accelerometer(_) | MonitorEvent::Connection(_) => {}
    }
}

fn cmd_config(config: &Config, path: &Path, init: bool) -> Result<()> {
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {path:?}");
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);

    if init {
        config.save_to(path)?;
        println!();
        println!("Written to {path:?}");
    }
    Ok(())
}

fn cmd_status(config: &Config, path: &Path) -> Result<()> {
    println!("PPG Monitor Status");
    println!("==================");
    println!();

    println!(
        "Config file: {path:?} ({})",
        if path.exists() { "found" } else { "defaults" }
    );
    match config.validate() {
        Ok(()) => println!("Configuration: valid ✓"),
        Err(e) => println!("Configuration: {e} ✗"),
    }
    println!(
        "Bluetooth support: {}",
        if cfg!(feature = "ble") {
            "compiled in"
        } else {
            "not compiled (use --features ble)"
        }
    );
    println!();

    println!("Device:");
    println!("  Name: {}", config.device.name);
    println!("  Characteristic: {}", config.device.characteristic);
    println!(
        "  Scan window: {} ms, connection timeout: {} ms",
        config.transport.scan_timeout.as_millis(),
        config.transport.connection_timeout.as_millis()
    );
    println!();

    let s = &config.signal;
    println!("Signal:");
    println!(
        "  {} Hz, {} s history ({} samples)",
        s.sample_rate,
        s.window_secs,
        s.buffer_len()
    );
    println!("  Passband: {}-{} Hz", s.low_hz, s.high_hz);
    println!("  Heart-rate bounds: {}-{} BPM", s.hr_min, s.hr_max);
    println!("  Processing: {:?}", config.scheduler.mode);

    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")
}
