//! # Error Types Module
//!
//! Centralized error handling for ppg-scope.
//! Each module gets its own error type so callers can match on the failure
//! class and decide whether to drop a message, skip a frame or refuse a
//! recording.
//!
//! ## Error Types
//! - `ConfigError`: configuration file I/O and parsing errors
//! - `PayloadError`: inbound message could not be decoded
//! - `SinkError`: the chart sink rejected an update
//! - `RenderError`: a source surface failed to rasterize
//! - `CompositorError`: composite surface could not be built
//! - `EncoderError`: encoder construction or encoding failures
//! - `StartError`: a capture session could not be started
//! - `ExportError`: a finished artifact could not be written
//! - `TransportError`: transport runtime or socket failures
//!
//! Messages never repeat their source error. Log them through [`Report`] to
//! get the whole chain on one line.
//!
//! ## Usage Examples
//! ```rust,ignore
//! pub fn load() -> Result<Config, ConfigError> { ... }
//! pub fn start(&self) -> Result<StartOutcome, StartError> { ... }
//! ```

use std::fmt;
use thiserror::Error;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file")]
    ReadFailed(#[source] std::io::Error),
    #[error("Failed to write config file")]
    WriteFailed(#[source] std::io::Error),
    #[error("Failed to parse config file")]
    ParseFailed(#[from] toml::de::Error),
    #[error("Failed to serialize config")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors raised while decoding an inbound transport message
#[derive(Debug, Error)]
pub enum PayloadError {
    /// Text was not valid JSON
    #[error("Malformed JSON payload")]
    Json(#[from] serde_json::Error),
    /// Valid JSON but none of the known shapes
    #[error("Unhandled payload format")]
    Unrecognized,
}

/// Errors reported by a chart sink for one channel update
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Chart for channel {0} is not available")]
    UnknownChannel(String),
    #[error("Chart update failed for {channel}: {reason}")]
    UpdateFailed { channel: String, reason: String },
}

/// Errors raised while rasterizing a surface
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to draw chart: {0}")]
    Draw(String),
    #[error("Surface has zero size")]
    EmptySurface,
    #[error("Chart font is not available")]
    FontUnavailable,
}

impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for RenderError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        RenderError::Draw(format!("{value:?}"))
    }
}

/// Errors that can occur while building a composite surface
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompositorError {
    /// Nothing to record
    #[error("No source surfaces to record")]
    NoSources,
    #[error("Composite surface would be empty ({width}x{height})")]
    EmptyLayout { width: u32, height: u32 },
}

/// Errors from encoder backends and the encoder worker
#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("MIME type {0} is not supported by this encoder")]
    UnsupportedMime(String),
    #[error("Frame size {actual:?} does not match encoder size {expected:?}")]
    FrameSize {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("Encoding failed")]
    Encode(#[from] image::ImageError),
    #[error("Encoder worker is not running")]
    Disconnected,
    #[error("Failed to spawn encoder worker")]
    Spawn(#[source] std::io::Error),
    #[error("Encoder already finished")]
    Finished,
}

/// Reasons a capture session could not be started. The session stays idle.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("No encoder available on this platform")]
    NoEncoder,
    #[error("No processed charts to record")]
    NoSources,
    #[error("Previous recording is still finalizing")]
    Finalizing,
    #[error("Could not build composite surface")]
    Compositor(#[from] CompositorError),
    #[error("Recorder has been shut down")]
    ShutDown,
    #[error("Could not create encoder")]
    Encoder(#[from] EncoderError),
}

/// Errors that can occur while exporting a finished recording
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to create output directory {path}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write recording {path}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur in the transport thread
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to create Tokio runtime
    #[error("Failed to create async runtime")]
    RuntimeCreation(#[source] std::io::Error),
    #[error("Failed to connect to {addr}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Connection lost")]
    Read(#[source] std::io::Error),
}

/// Formats an error followed by each of its sources, separated by `: `
pub struct Report<'a>(pub &'a (dyn std::error::Error + 'static));

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(error) = source {
            write!(f, ": {}", error)?;
            source = error.source();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_error_display() {
        let err = StartError::NoEncoder;
        assert!(err.to_string().contains("encoder"));
    }

    #[test]
    fn test_config_error_chain() {
        use std::error::Error;
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ConfigError::ReadFailed(io_err);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_encoder_error_converts_into_start_error() {
        let err: StartError = EncoderError::UnsupportedMime("video/webm".into()).into();
        assert!(matches!(err, StartError::Encoder(_)));
        assert_eq!(
            Report(&err).to_string(),
            "Could not create encoder: MIME type video/webm is not supported by this encoder"
        );
    }

    #[test]
    fn test_report_prints_io_source_once() {
        let err = ExportError::Write {
            path: "/out/a.gif".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        };
        assert_eq!(err.to_string(), "Failed to write recording /out/a.gif");
        assert_eq!(Report(&err).to_string(), "Failed to write recording /out/a.gif: read-only");
    }
}
