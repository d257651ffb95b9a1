//! # Capture Session Module
//!
//! Records the processed charts into a single video artifact.
//!
//! ## Architecture
//! - **CaptureController**: start/stop state machine, one mutex for all transitions
//! - **Compositor**: stacks the chart surfaces into one frame per timer tick
//! - **Encoder worker**: background thread turning frames into chunks
//! - **ArtifactExporter**: where the finished recording goes
//!
//! ## Lifecycle
//! ```text
//! Idle --start--> Recording --stop--> Finalizing --Stopped event--> Idle
//! ```
//! While recording, a `crossbeam_channel::tick` timer paces composite frames
//! at the configured frame rate. `stop()` drops the timer before asking the
//! encoder to flush, so no frame is admitted after the stop request. Chunks
//! are appended in emission order and concatenated into one artifact once
//! the encoder reports that it has stopped.
//!
//! `shutdown()` is the teardown hook. It runs once per controller, and
//! dropping the controller calls it, so an encoder is never left running.

use crate::compositor::{Compositor, SurfaceHandle};
use crate::config::{Config, DEFAULT_CHUNK_INTERVAL_MS, DEFAULT_FRAME_RATE};
use crate::encoder::{extension_for_mime, negotiate_mime, EncoderBackend, EncoderEvent, EncoderHandle, EncoderParams};
use crate::error::{CompositorError, ExportError, Report, StartError};
use chrono::{DateTime, SecondsFormat, Utc};
use crossbeam_channel::{tick, Receiver};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// How long `Drop` waits for the encoder to finish
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const ARTIFACT_PREFIX: &str = "procesado";

/// Recorder tuning taken from [`Config`]
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub frame_rate: u32,
    pub compositor_padding: u32,
    pub chunk_interval: Duration,
    pub mime_preferences: Vec<String>,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RecorderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            frame_rate: if config.frame_rate == 0 { DEFAULT_FRAME_RATE } else { config.frame_rate },
            compositor_padding: config.compositor_padding,
            chunk_interval: if config.chunk_interval_ms == 0 {
                Duration::from_millis(DEFAULT_CHUNK_INTERVAL_MS)
            } else {
                config.chunk_interval()
            },
            mime_preferences: config.mime_preferences.clone(),
        }
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frame_rate.max(1)))
    }
}

/// A finished recording
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// `procesado-<ISO8601 with ':' and '.' replaced by '-'>.<ext>`
pub fn artifact_filename(created_at: DateTime<Utc>, mime_type: &str) -> String {
    let stamp = created_at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("{}-{}.{}", ARTIFACT_PREFIX, stamp, extension_for_mime(mime_type))
}

/// Destination for finished recordings
pub trait ArtifactExporter: Send {
    /// Store the artifact and return where it went
    fn export(&self, artifact: &Artifact) -> Result<String, ExportError>;
}

/// Writes recordings into a directory, creating it on demand
#[derive(Debug, Clone)]
pub struct DirectoryExporter {
    dir: PathBuf,
}

impl DirectoryExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ArtifactExporter for DirectoryExporter {
    fn export(&self, artifact: &Artifact) -> Result<String, ExportError> {
        fs::create_dir_all(&self.dir).map_err(|source| ExportError::CreateDir {
            path: self.dir.display().to_string(),
            source,
        })?;

        let path = self.dir.join(&artifact.filename);
        fs::write(&path, &artifact.bytes).map_err(|source| ExportError::Write {
            path: path.display().to_string(),
            source,
        })?;

        Ok(path.display().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { mime_type: String },
    AlreadyRecording,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Encoder asked to flush; the artifact follows once it stops
    Stopping,
    NotRecording,
    AlreadyFinalizing,
}

#[derive(Debug)]
pub enum FinalizeReport {
    Exported {
        location: String,
        filename: String,
        bytes: usize,
    },
    /// The encoder produced no data
    Empty,
    /// The artifact was assembled but could not be stored; retry with it
    ExportFailed { artifact: Artifact, error: ExportError },
    /// The encoder did not stop before the shutdown deadline. The session
    /// stays in finalizing, so a later `poll` can still export it.
    TimedOut { buffered_bytes: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
    Finalizing,
}

struct ActiveSession {
    compositor: Compositor,
    timer: Receiver<Instant>,
    encoder: EncoderHandle,
    chunks: Vec<Vec<u8>>,
    frames_sent: u64,
}

struct FinalizingSession {
    encoder: EncoderHandle,
    chunks: Vec<Vec<u8>>,
}

enum SessionState {
    Idle,
    Recording(ActiveSession),
    Finalizing(FinalizingSession),
}

impl SessionState {
    fn encoder(&self) -> Option<&EncoderHandle> {
        match self {
            SessionState::Idle => None,
            SessionState::Recording(session) => Some(&session.encoder),
            SessionState::Finalizing(session) => Some(&session.encoder),
        }
    }

    fn chunks_mut(&mut self) -> Option<&mut Vec<Vec<u8>>> {
        match self {
            SessionState::Idle => None,
            SessionState::Recording(session) => Some(&mut session.chunks),
            SessionState::Finalizing(session) => Some(&mut session.chunks),
        }
    }

    fn buffered_bytes(&self) -> Option<usize> {
        match self {
            SessionState::Idle => None,
            SessionState::Recording(session) => Some(session.chunks.iter().map(Vec::len).sum()),
            SessionState::Finalizing(session) => Some(session.chunks.iter().map(Vec::len).sum()),
        }
    }
}

pub struct CaptureController {
    backend: Option<Arc<dyn EncoderBackend>>,
    exporter: Box<dyn ArtifactExporter>,
    settings: RecorderSettings,
    state: Mutex<SessionState>,
    shut_down: AtomicBool,
}

impl CaptureController {
    /// `backend` is `None` on platforms without a usable encoder
    pub fn new(
        backend: Option<Arc<dyn EncoderBackend>>,
        exporter: Box<dyn ArtifactExporter>,
        settings: RecorderSettings,
    ) -> Self {
        Self {
            backend,
            exporter,
            settings,
            state: Mutex::new(SessionState::Idle),
            shut_down: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> RecorderState {
        match &*self.lock() {
            SessionState::Idle => RecorderState::Idle,
            SessionState::Recording(_) => RecorderState::Recording,
            SessionState::Finalizing(_) => RecorderState::Finalizing,
        }
    }

    /// Begin recording `sources`. Any failure leaves the controller idle.
    pub fn start(&self, sources: Vec<SurfaceHandle>) -> Result<StartOutcome, StartError> {
        let mut state = self.lock();
        match &*state {
            SessionState::Recording(_) => return Ok(StartOutcome::AlreadyRecording),
            SessionState::Finalizing(_) => return Err(StartError::Finalizing),
            SessionState::Idle => {}
        }
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(StartError::ShutDown);
        }

        let backend = self.backend.as_ref().ok_or(StartError::NoEncoder)?;

        let mut compositor = Compositor::build(sources, self.settings.compositor_padding).map_err(|e| match e {
            CompositorError::NoSources => StartError::NoSources,
            other => StartError::Compositor(other),
        })?;

        let mime_type = negotiate_mime(backend.as_ref(), &self.settings.mime_preferences).unwrap_or_else(|| {
            log::info!("No preferred recording format supported, using {}", backend.default_mime_type());
            backend.default_mime_type().to_string()
        });

        let params = EncoderParams {
            width: compositor.width(),
            height: compositor.height(),
            fps: self.settings.frame_rate,
        };
        let writer = backend.open(&mime_type, params)?;
        let mut encoder = EncoderHandle::spawn(writer, &mime_type, self.settings.chunk_interval)?;

        // First frame goes out immediately, the timer paces the rest
        let mut frames_sent = 0;
        match encoder.push_frame(compositor.draw_frame().clone()) {
            Ok(true) => frames_sent += 1,
            Ok(false) => {}
            Err(e) => log::warn!("Failed to submit first frame: {}", Report(&e)),
        }

        log::info!(
            "Recording {}x{} at {} fps as {}",
            params.width,
            params.height,
            params.fps,
            mime_type
        );

        *state = SessionState::Recording(ActiveSession {
            compositor,
            timer: tick(self.settings.frame_interval()),
            encoder,
            chunks: Vec::new(),
            frames_sent,
        });

        Ok(StartOutcome::Started { mime_type })
    }

    /// Stop drawing and ask the encoder to flush. Safe from any state.
    pub fn stop(&self) -> StopOutcome {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, SessionState::Idle) {
            SessionState::Recording(session) => {
                let ActiveSession {
                    compositor,
                    timer,
                    mut encoder,
                    chunks,
                    frames_sent,
                } = session;
                drop(timer);
                drop(compositor);
                encoder.request_stop();
                log::info!(
                    "Recording stopped after {} frames ({} dropped), finalizing",
                    frames_sent,
                    encoder.frames_dropped()
                );
                *state = SessionState::Finalizing(FinalizingSession { encoder, chunks });
                StopOutcome::Stopping
            }
            SessionState::Finalizing(session) => {
                *state = SessionState::Finalizing(session);
                StopOutcome::AlreadyFinalizing
            }
            SessionState::Idle => StopOutcome::NotRecording,
        }
    }

    /// Draw timer of the active session, for use in a `select!` loop
    pub fn timer(&self) -> Option<Receiver<Instant>> {
        match &*self.lock() {
            SessionState::Recording(session) => Some(session.timer.clone()),
            _ => None,
        }
    }

    /// Draw one composite frame and hand it to the encoder.
    ///
    /// Returns whether a frame was submitted. Failures are logged, never propagated.
    pub fn draw_tick(&self) -> bool {
        let mut state = self.lock();
        let SessionState::Recording(session) = &mut *state else {
            return false;
        };

        let frame = session.compositor.draw_frame().clone();
        match session.encoder.push_frame(frame) {
            Ok(true) => {
                session.frames_sent += 1;
                true
            }
            Ok(false) => false,
            Err(e) => {
                log::warn!("Failed to submit frame: {}", Report(&e));
                false
            }
        }
    }

    /// Draw once if the timer fired since the last call. Missed ticks are coalesced.
    pub fn draw_due(&self) -> bool {
        let due = match &*self.lock() {
            SessionState::Recording(session) => session.timer.try_iter().count() > 0,
            _ => false,
        };
        due && self.draw_tick()
    }

    /// Drain pending encoder events. Returns a report once the artifact is finalized.
    pub fn poll(&self) -> Option<FinalizeReport> {
        let mut state = self.lock();
        while let Some(event) = state.encoder().and_then(EncoderHandle::try_event) {
            if self.absorb(&mut state, event) {
                return Some(self.finalize(&mut state));
            }
        }
        None
    }

    /// Returns true when the encoder has stopped
    fn absorb(&self, state: &mut SessionState, event: EncoderEvent) -> bool {
        match event {
            EncoderEvent::Chunk(bytes) => {
                if let Some(chunks) = state.chunks_mut() {
                    if !bytes.is_empty() {
                        chunks.push(bytes);
                    }
                }
                false
            }
            EncoderEvent::Failed(message) => {
                log::warn!("Encoder error: {}", message);
                false
            }
            EncoderEvent::Stopped => {
                if matches!(state, SessionState::Recording(_)) {
                    log::warn!("Encoder stopped while recording");
                }
                true
            }
        }
    }

    fn finalize(&self, state: &mut SessionState) -> FinalizeReport {
        let (encoder, chunks) = match std::mem::replace(state, SessionState::Idle) {
            SessionState::Recording(session) => (session.encoder, session.chunks),
            SessionState::Finalizing(session) => (session.encoder, session.chunks),
            SessionState::Idle => return FinalizeReport::Empty,
        };
        let mime_type = encoder.mime_type().to_string();
        drop(encoder);

        if chunks.is_empty() {
            log::warn!("Recording produced no data");
            return FinalizeReport::Empty;
        }

        let created_at = Utc::now();
        let artifact = Artifact {
            filename: artifact_filename(created_at, &mime_type),
            mime_type,
            bytes: chunks.concat(),
            created_at,
        };

        match self.exporter.export(&artifact) {
            Ok(location) => {
                log::info!("Saved recording {} ({} bytes)", location, artifact.bytes.len());
                FinalizeReport::Exported {
                    location,
                    filename: artifact.filename,
                    bytes: artifact.bytes.len(),
                }
            }
            Err(error) => {
                log::error!("Failed to export recording: {}", Report(&error));
                FinalizeReport::ExportFailed { artifact, error }
            }
        }
    }

    /// Stop any session and wait up to `timeout` for its artifact.
    ///
    /// Runs once per controller; later calls return `None`.
    pub fn shutdown(&self, timeout: Duration) -> Option<FinalizeReport> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.stop();

        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            let encoder = state.encoder()?;
            let Some(event) = encoder.recv_deadline(deadline) else {
                let buffered_bytes = state.buffered_bytes().unwrap_or(0);
                log::warn!(
                    "Encoder did not stop within {:?}, {} bytes still buffered",
                    timeout,
                    buffered_bytes
                );
                return Some(FinalizeReport::TimedOut { buffered_bytes });
            };
            if self.absorb(&mut state, event) {
                return Some(self.finalize(&mut state));
            }
        }
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        if let Some(FinalizeReport::ExportFailed { artifact, .. }) = self.shutdown(DEFAULT_SHUTDOWN_TIMEOUT) {
            log::error!("Recording {} lost at teardown", artifact.filename);
        }

        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(bytes) = state.buffered_bytes() {
            log::error!("Unfinished recording discarded at teardown, {} bytes lost", bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charts::ProcessedChart;
    use crate::compositor::SourceSurface;
    use crate::config::Config;
    use crate::encoder::test_support::{ByteBackend, SlowFinishBackend};
    use crate::monitor::Monitor;
    use crate::sink::MemorySink;
    use crate::encoder::GifBackend;
    use crate::error::RenderError;
    use chrono::TimeZone;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    struct Solid;

    impl SourceSurface for Solid {
        fn size(&self) -> (u32, u32) {
            (4, 3)
        }

        fn render(&self) -> Result<RgbImage, RenderError> {
            Ok(RgbImage::from_pixel(4, 3, Rgb([10, 20, 30])))
        }
    }

    /// Keeps exported artifacts in memory, optionally failing every export
    #[derive(Clone, Default)]
    struct MemoryExporter {
        artifacts: Arc<Mutex<Vec<Artifact>>>,
        fail: bool,
    }

    impl ArtifactExporter for MemoryExporter {
        fn export(&self, artifact: &Artifact) -> Result<String, ExportError> {
            if self.fail {
                return Err(ExportError::Write {
                    path: artifact.filename.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
                });
            }
            self.artifacts.lock().unwrap().push(artifact.clone());
            Ok(format!("memory://{}", artifact.filename))
        }
    }

    fn settings() -> RecorderSettings {
        RecorderSettings {
            frame_rate: 50,
            compositor_padding: 2,
            chunk_interval: Duration::from_millis(10),
            mime_preferences: vec!["video/webm;codecs=vp9".into(), "video/test".into()],
        }
    }

    fn controller(exporter: MemoryExporter) -> CaptureController {
        CaptureController::new(Some(Arc::new(ByteBackend)), Box::new(exporter), settings())
    }

    fn sources() -> Vec<SurfaceHandle> {
        vec![Arc::new(Solid) as SurfaceHandle, Arc::new(Solid) as SurfaceHandle]
    }

    fn wait_for_report(controller: &CaptureController) -> FinalizeReport {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(report) = controller.poll() {
                return report;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("recording was not finalized");
    }

    #[test]
    fn test_artifact_filename() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap() + chrono::Duration::milliseconds(678);
        assert_eq!(
            artifact_filename(at, "video/webm;codecs=vp9"),
            "procesado-2024-01-02T03-04-05-678Z.webm"
        );
        assert_eq!(artifact_filename(at, "image/gif"), "procesado-2024-01-02T03-04-05-678Z.gif");
    }

    #[test]
    fn test_start_without_encoder_stays_idle() {
        let controller = CaptureController::new(None, Box::new(MemoryExporter::default()), settings());
        assert!(matches!(controller.start(sources()), Err(StartError::NoEncoder)));
        assert_eq!(controller.state(), RecorderState::Idle);
    }

    #[test]
    fn test_start_without_sources_stays_idle() {
        let controller = controller(MemoryExporter::default());
        assert!(matches!(controller.start(Vec::new()), Err(StartError::NoSources)));
        assert_eq!(controller.state(), RecorderState::Idle);
        assert!(controller.timer().is_none());
    }

    #[test]
    fn test_unsupported_preferences_fall_back_to_default_type() {
        let controller = CaptureController::new(
            Some(Arc::new(ByteBackend)),
            Box::new(MemoryExporter::default()),
            RecorderSettings {
                mime_preferences: vec!["video/webm".into()],
                ..settings()
            },
        );
        let outcome = controller.start(sources()).unwrap();
        assert_eq!(
            outcome,
            StartOutcome::Started {
                mime_type: "video/test".into()
            }
        );
    }

    #[test]
    fn test_double_start_is_idempotent() {
        let controller = controller(MemoryExporter::default());
        assert!(matches!(controller.start(sources()), Ok(StartOutcome::Started { .. })));
        let timer = controller.timer().unwrap();

        assert_eq!(controller.start(sources()).unwrap(), StartOutcome::AlreadyRecording);
        assert_eq!(controller.state(), RecorderState::Recording);
        // Same session, same timer
        assert!(controller.timer().unwrap().same_channel(&timer));
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let controller = controller(MemoryExporter::default());
        assert_eq!(controller.stop(), StopOutcome::NotRecording);
        assert_eq!(controller.state(), RecorderState::Idle);
        assert!(controller.poll().is_none());
    }

    #[test]
    fn test_double_stop_exports_once() {
        let exporter = MemoryExporter::default();
        let controller = controller(exporter.clone());
        controller.start(sources()).unwrap();
        assert!(controller.draw_tick());
        assert!(controller.draw_tick());

        assert_eq!(controller.stop(), StopOutcome::Stopping);
        assert_eq!(controller.stop(), StopOutcome::AlreadyFinalizing);
        assert!(!controller.draw_tick());

        let report = wait_for_report(&controller);
        assert!(matches!(report, FinalizeReport::Exported { bytes: 4, .. }));
        assert_eq!(controller.state(), RecorderState::Idle);
        assert_eq!(controller.stop(), StopOutcome::NotRecording);

        let artifacts = exporter.artifacts.lock().unwrap();
        assert_eq!(artifacts.len(), 1);
        // Three frames then the closing marker, in order
        assert_eq!(artifacts[0].bytes, vec![1, 2, 3, 0xFF]);
        assert_eq!(artifacts[0].mime_type, "video/test");
        assert!(artifacts[0].filename.starts_with("procesado-"));
        assert!(artifacts[0].filename.ends_with(".test"));
    }

    #[test]
    fn test_start_while_finalizing_is_refused() {
        let controller = controller(MemoryExporter::default());
        controller.start(sources()).unwrap();
        controller.stop();
        // Nothing has polled yet, so the encoder's Stopped event is unread
        assert_eq!(controller.state(), RecorderState::Finalizing);
        assert!(matches!(controller.start(sources()), Err(StartError::Finalizing)));
        wait_for_report(&controller);
        assert!(matches!(controller.start(sources()), Ok(StartOutcome::Started { .. })));
    }

    #[test]
    fn test_failed_export_returns_artifact() {
        let controller = controller(MemoryExporter {
            fail: true,
            ..MemoryExporter::default()
        });
        controller.start(sources()).unwrap();
        controller.stop();

        match wait_for_report(&controller) {
            FinalizeReport::ExportFailed { artifact, .. } => {
                assert_eq!(artifact.bytes, vec![1, 0xFF]);
            }
            other => panic!("unexpected report: {:?}", other),
        }
        assert_eq!(controller.state(), RecorderState::Idle);
    }

    #[test]
    fn test_shutdown_runs_once() {
        let exporter = MemoryExporter::default();
        let controller = controller(exporter.clone());
        controller.start(sources()).unwrap();

        let report = controller.shutdown(Duration::from_secs(5));
        assert!(matches!(report, Some(FinalizeReport::Exported { .. })));
        assert!(controller.shutdown(Duration::from_secs(5)).is_none());
        assert!(matches!(controller.start(sources()), Err(StartError::ShutDown)));
        assert_eq!(exporter.artifacts.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_drop_finalizes_active_recording() {
        let exporter = MemoryExporter::default();
        {
            let controller = controller(exporter.clone());
            controller.start(sources()).unwrap();
        }
        assert_eq!(exporter.artifacts.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_records_processed_charts_to_gif_file() {
        let dir = tempdir().unwrap();
        let controller = CaptureController::new(
            Some(Arc::new(GifBackend)),
            Box::new(DirectoryExporter::new(dir.path().join("out"))),
            RecorderSettings {
                mime_preferences: vec!["video/webm".into(), "image/gif".into()],
                ..settings()
            },
        );

        let chart = Arc::new(ProcessedChart::new("RED", 240, 140, None));
        chart.update(&[0.0, 1.0, 0.5, 1.5], None);
        let outcome = controller.start(vec![chart.clone() as SurfaceHandle]).unwrap();
        assert_eq!(
            outcome,
            StartOutcome::Started {
                mime_type: "image/gif".into()
            }
        );

        chart.update(&[1.0, 0.0, 1.0, 0.0], None);
        controller.draw_tick();

        match controller.shutdown(Duration::from_secs(5)) {
            Some(FinalizeReport::Exported { location, filename, .. }) => {
                assert!(filename.ends_with(".gif"));
                let bytes = std::fs::read(location).unwrap();
                assert!(bytes.starts_with(b"GIF89a"));
            }
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[test]
    fn test_missed_ticks_draw_one_frame() {
        let exporter = MemoryExporter::default();
        let controller = CaptureController::new(
            Some(Arc::new(ByteBackend)),
            Box::new(exporter.clone()),
            RecorderSettings {
                frame_rate: 10,
                ..settings()
            },
        );
        controller.start(sources()).unwrap();
        assert!(!controller.draw_due());

        // Several 100 ms ticks elapse without anyone drawing
        std::thread::sleep(Duration::from_millis(350));
        assert!(controller.draw_due());
        assert!(!controller.draw_due());

        controller.stop();
        wait_for_report(&controller);
        // First frame, one catch-up frame, closing marker
        assert_eq!(exporter.artifacts.lock().unwrap()[0].bytes, vec![1, 2, 0xFF]);
    }

    #[test]
    fn test_shutdown_timeout_keeps_recording_recoverable() {
        let exporter = MemoryExporter::default();
        let controller = CaptureController::new(
            Some(Arc::new(SlowFinishBackend(Duration::from_millis(300)))),
            Box::new(exporter.clone()),
            settings(),
        );
        controller.start(sources()).unwrap();

        let report = controller.shutdown(Duration::from_millis(20));
        assert!(matches!(report, Some(FinalizeReport::TimedOut { .. })));
        assert_eq!(controller.state(), RecorderState::Finalizing);

        let report = wait_for_report(&controller);
        assert!(matches!(report, FinalizeReport::Exported { bytes: 2, .. }));
        assert_eq!(exporter.artifacts.lock().unwrap()[0].bytes, vec![1, 0xFF]);
    }

    #[test]
    fn test_default_monitor_charts_start_recording() {
        let monitor = Monitor::from_config(&Config::default(), MemorySink::new());
        for surface in monitor.processed_surfaces() {
            let image = surface.render().unwrap();
            assert_eq!(image.dimensions(), surface.size());
        }

        let controller = controller(MemoryExporter::default());

        assert!(matches!(
            controller.start(monitor.processed_surfaces()),
            Ok(StartOutcome::Started { .. })
        ));
        assert!(controller.draw_tick());
        assert!(matches!(
            controller.shutdown(Duration::from_secs(5)),
            Some(FinalizeReport::Exported { .. })
        ));
    }
}
