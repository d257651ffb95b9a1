//! # Encoder Module
//!
//! Turns composite frames into recording bytes off the drawing thread.
//!
//! ## Architecture
//! - **EncoderBackend**: what the platform can encode (MIME support, writer factory)
//! - **FrameWriter**: one open encoding session, fed frame by frame
//! - **EncoderHandle**: background worker thread owning a writer
//!
//! Frames flow drawing thread → bounded command channel → worker. When the
//! channel is full the frame is dropped instead of stalling the draw timer.
//! The worker hands accumulated bytes back as [`EncoderEvent::Chunk`] every
//! chunk interval and once more when it stops, then reports
//! [`EncoderEvent::Stopped`].

use crate::error::{EncoderError, Report};
use crossbeam_channel::{bounded, select, tick, unbounded, Receiver, Sender, TrySendError};
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, DynamicImage, Frame, RgbImage};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Frames buffered between the draw timer and the worker
const FRAME_QUEUE_DEPTH: usize = 8;

/// Lower is better quality, 30 is the fastest setting
const GIF_SPEED: i32 = 30;

pub const GIF_MIME: &str = "image/gif";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderParams {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// An open encoding session
pub trait FrameWriter: Send {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), EncoderError>;

    /// Bytes produced since the last call
    fn take_bytes(&mut self) -> Vec<u8>;

    /// Close the stream and return whatever bytes remain
    fn finish(self: Box<Self>) -> Result<Vec<u8>, EncoderError>;
}

/// A recording format provider
pub trait EncoderBackend: Send + Sync {
    fn is_type_supported(&self, mime: &str) -> bool;

    /// Generic container type used when no preference is supported
    fn default_mime_type(&self) -> &str;

    fn open(&self, mime: &str, params: EncoderParams) -> Result<Box<dyn FrameWriter>, EncoderError>;
}

/// MIME type without parameters, lower-cased
fn essence(mime: &str) -> String {
    mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

/// First preference the backend supports. `None` means use the backend default.
pub fn negotiate_mime(backend: &dyn EncoderBackend, preferences: &[String]) -> Option<String> {
    preferences
        .iter()
        .find(|mime| backend.is_type_supported(mime))
        .cloned()
}

/// File extension for a MIME type: `video/webm;codecs=vp9` gives `webm`
pub fn extension_for_mime(mime: &str) -> String {
    essence(mime)
        .split_once('/')
        .map(|(_, subtype)| subtype.trim().to_string())
        .filter(|subtype| !subtype.is_empty())
        .unwrap_or_else(|| String::from("bin"))
}

/// `Write` target shared between an encoder and its owner
#[derive(Debug, Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Animated GIF through the `image` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct GifBackend;

impl EncoderBackend for GifBackend {
    fn is_type_supported(&self, mime: &str) -> bool {
        essence(mime) == GIF_MIME
    }

    fn default_mime_type(&self) -> &str {
        GIF_MIME
    }

    fn open(&self, mime: &str, params: EncoderParams) -> Result<Box<dyn FrameWriter>, EncoderError> {
        if !self.is_type_supported(mime) {
            return Err(EncoderError::UnsupportedMime(mime.to_string()));
        }

        let buffer = SharedBuffer::default();
        let mut encoder = GifEncoder::new_with_speed(buffer.clone(), GIF_SPEED);
        encoder.set_repeat(Repeat::Infinite)?;

        Ok(Box::new(GifWriter {
            encoder: Some(encoder),
            buffer,
            size: (params.width, params.height),
            delay: Delay::from_numer_denom_ms(1000, params.fps.max(1)),
        }))
    }
}

struct GifWriter {
    encoder: Option<GifEncoder<SharedBuffer>>,
    buffer: SharedBuffer,
    size: (u32, u32),
    delay: Delay,
}

impl FrameWriter for GifWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), EncoderError> {
        if frame.dimensions() != self.size {
            return Err(EncoderError::FrameSize {
                expected: self.size,
                actual: frame.dimensions(),
            });
        }
        let encoder = self.encoder.as_mut().ok_or(EncoderError::Finished)?;
        let rgba = DynamicImage::ImageRgb8(frame.clone()).into_rgba8();
        encoder.encode_frame(Frame::from_parts(rgba, 0, 0, self.delay))?;
        Ok(())
    }

    fn take_bytes(&mut self) -> Vec<u8> {
        self.buffer.take()
    }

    fn finish(mut self: Box<Self>) -> Result<Vec<u8>, EncoderError> {
        // Dropping the encoder writes the GIF trailer
        drop(self.encoder.take());
        Ok(self.buffer.take())
    }
}

#[derive(Debug)]
enum EncoderCommand {
    Frame(RgbImage),
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderEvent {
    /// Encoded bytes, in emission order
    Chunk(Vec<u8>),
    /// A frame could not be encoded; the worker keeps running
    Failed(String),
    /// The worker has flushed its last chunk and exited
    Stopped,
}

/// Handle to a running encoder worker.
///
/// Dropping the handle stops the worker and waits for it.
pub struct EncoderHandle {
    mime_type: String,
    commands: Sender<EncoderCommand>,
    events: Receiver<EncoderEvent>,
    worker: Option<JoinHandle<()>>,
    stop_requested: bool,
    frames_dropped: u64,
}

impl EncoderHandle {
    pub fn spawn(
        writer: Box<dyn FrameWriter>,
        mime_type: &str,
        chunk_interval: Duration,
    ) -> Result<Self, EncoderError> {
        let (command_sender, command_receiver) = bounded(FRAME_QUEUE_DEPTH);
        let (event_sender, event_receiver) = unbounded();

        let worker = thread::Builder::new()
            .name(String::from("encoder"))
            .spawn(move || run_worker(writer, command_receiver, event_sender, chunk_interval))
            .map_err(EncoderError::Spawn)?;

        log::info!("Encoder started ({})", mime_type);

        Ok(Self {
            mime_type: mime_type.to_string(),
            commands: command_sender,
            events: event_receiver,
            worker: Some(worker),
            stop_requested: false,
            frames_dropped: 0,
        })
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Queue a frame. `Ok(false)` means the queue was full and the frame was dropped.
    pub fn push_frame(&mut self, frame: RgbImage) -> Result<bool, EncoderError> {
        if self.stop_requested {
            return Err(EncoderError::Finished);
        }
        match self.commands.try_send(EncoderCommand::Frame(frame)) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                self.frames_dropped += 1;
                log::debug!("Encoder busy, dropped frame ({} so far)", self.frames_dropped);
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => Err(EncoderError::Disconnected),
        }
    }

    /// Ask the worker to flush and exit. Idempotent.
    pub fn request_stop(&mut self) {
        if self.stop_requested {
            return;
        }
        self.stop_requested = true;
        if self.commands.send(EncoderCommand::Stop).is_err() {
            log::debug!("Encoder worker already gone");
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    pub fn try_event(&self) -> Option<EncoderEvent> {
        self.events.try_recv().ok()
    }

    /// Wait for the next event until `deadline`
    pub fn recv_deadline(&self, deadline: Instant) -> Option<EncoderEvent> {
        self.events.recv_deadline(deadline).ok()
    }
}

impl Drop for EncoderHandle {
    fn drop(&mut self) {
        self.request_stop();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Encoder worker panicked");
            }
        }
    }
}

fn emit_chunk(writer: &mut dyn FrameWriter, events: &Sender<EncoderEvent>) {
    let bytes = writer.take_bytes();
    if !bytes.is_empty() {
        let _ = events.send(EncoderEvent::Chunk(bytes));
    }
}

fn run_worker(
    mut writer: Box<dyn FrameWriter>,
    commands: Receiver<EncoderCommand>,
    events: Sender<EncoderEvent>,
    chunk_interval: Duration,
) {
    let ticker = tick(chunk_interval);
    let mut frames = 0u64;

    loop {
        select! {
            recv(commands) -> command => match command {
                Ok(EncoderCommand::Frame(frame)) => match writer.write_frame(&frame) {
                    Ok(()) => frames += 1,
                    Err(e) => {
                        let message = Report(&e).to_string();
                        log::warn!("Failed to encode frame: {}", message);
                        let _ = events.send(EncoderEvent::Failed(message));
                    }
                },
                // A dropped handle counts as a stop request
                Ok(EncoderCommand::Stop) | Err(_) => break,
            },
            recv(ticker) -> _ => emit_chunk(writer.as_mut(), &events),
        }
    }

    match writer.finish() {
        Ok(bytes) => {
            if !bytes.is_empty() {
                let _ = events.send(EncoderEvent::Chunk(bytes));
            }
        }
        Err(e) => {
            let message = Report(&e).to_string();
            log::error!("Failed to finish encoding: {}", message);
            let _ = events.send(EncoderEvent::Failed(message));
        }
    }

    log::info!("Encoder stopped after {} frames", frames);
    let _ = events.send(EncoderEvent::Stopped);
}


#[cfg(test)]
mod tests {
    use super::test_support::ByteBackend;
    use super::*;
    use image::codecs::gif::GifDecoder;
    use image::{AnimationDecoder, Rgb};
    use std::io::Cursor;

    fn collect_until_stopped(handle: &EncoderHandle) -> Vec<EncoderEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while let Some(event) = handle.recv_deadline(deadline) {
            let stopped = event == EncoderEvent::Stopped;
            events.push(event);
            if stopped {
                break;
            }
        }
        events
    }

    fn chunks(events: &[EncoderEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|event| match event {
                EncoderEvent::Chunk(bytes) => Some(bytes.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    #[test]
    fn test_negotiate_first_supported() {
        let prefs = vec![
            "video/webm;codecs=vp9".to_string(),
            "video/webm".to_string(),
            "image/gif".to_string(),
        ];
        assert_eq!(negotiate_mime(&GifBackend, &prefs).as_deref(), Some("image/gif"));
        assert_eq!(negotiate_mime(&GifBackend, &prefs[..2]), None);
        assert_eq!(negotiate_mime(&ByteBackend, &["video/test; x=1".to_string()]).as_deref(), Some("video/test; x=1"));
    }

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(extension_for_mime("video/webm;codecs=vp9"), "webm");
        assert_eq!(extension_for_mime("image/gif"), "gif");
        assert_eq!(extension_for_mime("Video/MP4 ; codecs=avc1"), "mp4");
        assert_eq!(extension_for_mime("garbage"), "bin");
        assert_eq!(extension_for_mime("video/"), "bin");
    }

    #[test]
    fn test_gif_rejects_other_types() {
        let params = EncoderParams {
            width: 4,
            height: 4,
            fps: 10,
        };
        assert!(matches!(
            GifBackend.open("video/webm", params),
            Err(EncoderError::UnsupportedMime(_))
        ));
    }

    #[test]
    fn test_gif_writer_checks_frame_size() {
        let params = EncoderParams {
            width: 4,
            height: 4,
            fps: 10,
        };
        let mut writer = GifBackend.open(GIF_MIME, params).unwrap();
        let result = writer.write_frame(&RgbImage::new(5, 4));
        assert!(matches!(result, Err(EncoderError::FrameSize { .. })));
    }

    #[test]
    fn test_gif_worker_produces_playable_animation() {
        let params = EncoderParams {
            width: 8,
            height: 6,
            fps: 10,
        };
        let writer = GifBackend.open(GIF_MIME, params).unwrap();
        let mut handle = EncoderHandle::spawn(writer, GIF_MIME, Duration::from_millis(20)).unwrap();

        for shade in [0u8, 128, 255] {
            assert!(handle.push_frame(RgbImage::from_pixel(8, 6, Rgb([shade, 0, 0]))).unwrap());
        }
        handle.request_stop();

        let events = collect_until_stopped(&handle);
        assert_eq!(events.last(), Some(&EncoderEvent::Stopped));

        let bytes = chunks(&events);
        assert!(bytes.starts_with(b"GIF89a"));
        assert_eq!(bytes.last(), Some(&0x3B));

        let decoder = GifDecoder::new(Cursor::new(bytes)).unwrap();
        let frames = decoder.into_frames().collect_frames().unwrap();
        assert_eq!(frames.len(), 3);
    }

    #[test]
    fn test_chunks_arrive_in_order() {
        let writer = ByteBackend
            .open(
                "video/test",
                EncoderParams {
                    width: 1,
                    height: 1,
                    fps: 10,
                },
            )
            .unwrap();
        let mut handle = EncoderHandle::spawn(writer, "video/test", Duration::from_millis(5)).unwrap();

        for _ in 0..5 {
            handle.push_frame(RgbImage::new(1, 1)).unwrap();
            thread::sleep(Duration::from_millis(3));
        }
        handle.request_stop();

        let events = collect_until_stopped(&handle);
        assert_eq!(chunks(&events), vec![1, 2, 3, 4, 5, 0xFF]);
    }

    #[test]
    fn test_push_after_stop_fails() {
        let writer = ByteBackend
            .open(
                "video/test",
                EncoderParams {
                    width: 1,
                    height: 1,
                    fps: 10,
                },
            )
            .unwrap();
        let mut handle = EncoderHandle::spawn(writer, "video/test", Duration::from_secs(1)).unwrap();
        handle.request_stop();
        handle.request_stop();
        assert!(handle.is_stop_requested());
        assert!(matches!(handle.push_frame(RgbImage::new(1, 1)), Err(EncoderError::Finished)));
    }
}
