use std::path::PathBuf;

use thiserror::Error;

use crate::source::drive::DriveError;

/// Library error type for picframe operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A full traversal of the image source produced no usable images.
    #[error("no images found in the configured image source")]
    NoImagesFound,

    /// The file exists but could not be decoded.
    #[error("failed to decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    /// The file format is recognised but not supported on this platform.
    #[error("unsupported image format: {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    /// A code path that exists but has not been built yet.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// The motion camera could not be opened or read.
    #[error("camera {port} unavailable: {reason}")]
    CameraUnavailable { port: u32, reason: String },

    /// A camera handed back a buffer that does not match its frame size.
    #[error("frame buffer holds {len} bytes, expected {width}x{height}")]
    FrameSize { width: u32, height: u32, len: usize },

    /// Cloud-drive traversal failed after retries.
    #[error(transparent)]
    Drive(#[from] DriveError),

    /// The display surface could not be created or written.
    #[error("display surface error: {0}")]
    Surface(String),

    /// Blocking work handed to a worker thread panicked or was dropped.
    #[error("background work failed: {0}")]
    Worker(String),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Per-image failures that the coordinator replaces with a blank frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Decode { .. } | Error::UnsupportedFormat { .. })
    }
}
