use clap::Parser;
use crossbeam_channel::{never, select, unbounded};
use ppg_scope::config::Config;
use ppg_scope::connection::{ConnectionManager, TransportEvent};
use ppg_scope::encoder::GifBackend;
use ppg_scope::error::Report;
use ppg_scope::monitor::Monitor;
use ppg_scope::recorder::{ArtifactExporter, CaptureController, DirectoryExporter, FinalizeReport, RecorderSettings};
use ppg_scope::sink::LogSink;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Live PPG telemetry monitor and processed-chart recorder
#[derive(Debug, Parser)]
#[command(name = "ppg-scope", version)]
struct Args {
    /// Telemetry source as host:port, overrides the config file
    #[arg(long, value_name = "ADDR")]
    connect: Option<String>,

    /// Config file to use instead of the platform default
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Where recordings are written, overrides the config file
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Start recording the processed charts right away
    #[arg(long)]
    record: bool,

    /// Write the effective settings, overrides included, back to the config file
    #[arg(long)]
    save_config: bool,
}

fn load_config(args: &Args) -> Config {
    let loaded = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let mut config = loaded.unwrap_or_else(|e| {
        log::warn!("{}, using defaults", Report(&e));
        Config::default()
    });

    if let Some(addr) = &args.connect {
        config.transport_addr = addr.clone();
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }

    if args.save_config {
        let saved = match &args.config {
            Some(path) => config.save_to(path),
            None => config.save(),
        };
        match saved {
            Ok(()) => log::info!("Saved settings"),
            Err(e) => log::error!("{}", Report(&e)),
        }
    }
    config
}

fn report_finalize(report: FinalizeReport) {
    match report {
        FinalizeReport::Exported { location, bytes, .. } => {
            log::info!("Recording saved to {} ({} bytes)", location, bytes);
        }
        FinalizeReport::Empty => log::warn!("Recording was empty, nothing saved"),
        FinalizeReport::ExportFailed { artifact, error } => {
            log::error!("{}", Report(&error));
            // Second chance in the system temp directory
            match DirectoryExporter::new(std::env::temp_dir()).export(&artifact) {
                Ok(location) => log::info!("Recording saved to {} instead", location),
                Err(e) => log::error!("Recording {} lost: {}", artifact.filename, Report(&e)),
            }
        }
        FinalizeReport::TimedOut { buffered_bytes } => {
            log::error!("Encoder still busy at exit, {} recorded bytes not saved", buffered_bytes);
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(&args);

    let mut monitor = Monitor::from_config(&config, LogSink);
    let controller = CaptureController::new(
        Some(Arc::new(GifBackend)),
        Box::new(DirectoryExporter::new(config.output_dir.clone())),
        RecorderSettings::from_config(&config),
    );

    if args.record {
        match controller.start(monitor.processed_surfaces()) {
            Ok(outcome) => log::info!("{:?}", outcome),
            Err(e) => log::error!("Recording not started: {}", Report(&e)),
        }
    }

    let (sender, events) = unbounded();
    let manager = ConnectionManager::new(config.transport_addr.clone(), sender);
    let stop = manager.stop_flag();
    let transport = std::thread::spawn(move || manager.run());

    loop {
        let timer = controller.timer().unwrap_or_else(never);
        select! {
            recv(events) -> event => match event {
                Ok(TransportEvent::Message(text)) => {
                    monitor.handle_text(&text);
                }
                Ok(TransportEvent::Connected(addr)) => log::info!("Receiving telemetry from {}", addr),
                Ok(TransportEvent::Disconnected) => log::warn!("Telemetry source disconnected"),
                Ok(TransportEvent::Shutdown) | Err(_) => break,
            },
            recv(timer) -> _ => {
                controller.draw_tick();
            }
            default(IDLE_POLL) => {}
        }

        if let Some(report) = controller.poll() {
            report_finalize(report);
        }
    }

    log::info!("Shutting down");
    stop.store(true, Ordering::Relaxed);
    if let Some(report) = controller.shutdown(SHUTDOWN_TIMEOUT) {
        report_finalize(report);
    }
    if transport.join().is_err() {
        log::error!("Transport thread panicked");
    }

    let stats = monitor.stats();
    log::info!(
        "Handled {} messages, {} samples, {} dropped",
        stats.messages,
        stats.samples,
        stats.malformed + stats.unrecognized
    );
}
