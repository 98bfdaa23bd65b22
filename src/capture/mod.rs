//! Image acquisition: live camera frames or files chosen in a native picker.
//!
//! ```text
//! Idle → RequestingDevice → Streaming → (capture / cancel) → Idle
//!              └──────→ Error ──(retry)──┘
//! ```
//!
//! On constrained platforms (phones) the camera states are never entered;
//! capture is handed to the platform file picker instead.

pub mod controller;
pub mod device;
pub mod source;

pub use controller::{CaptureController, CaptureSnapshot};
pub use device::{
    CameraDevice, FrameDimensions, ScriptedCamera, StreamConstraints, VideoFrame, VideoStream,
};
pub use source::{CameraFacing, CaptureRoute, PlatformCapabilities, RawCapture};

use serde::Serialize;
use thiserror::Error;

/// Camera device lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Idle,
    RequestingDevice,
    Streaming,
    Error,
}

/// Why the camera could not be opened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceAccessError {
    #[error("Camera permission denied")]
    PermissionDenied,

    #[error("Camera unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error(transparent)]
    DeviceAccess(#[from] DeviceAccessError),

    #[error("Could not play video stream: {0}")]
    StreamPlayback(String),

    #[error("Camera not ready, no frame captured")]
    EmptyFrame,

    #[error("Camera is not streaming (state: {0:?})")]
    NotStreaming(DeviceState),

    #[error("Frame encoding failed: {0}")]
    FrameEncoding(String),

    #[error("File is empty: {0}")]
    EmptyFile(String),

    #[error("File too large: {size_mb:.1}MB exceeds {max_mb}MB limit")]
    TooLarge { size_mb: f64, max_mb: u64 },

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid data URL")]
    InvalidDataUrl,

    #[error("Could not read file: {0}")]
    FileRead(String),
}
