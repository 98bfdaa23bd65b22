//! CaptureController: camera lifecycle and frame capture.
//!
//! Owns at most one live stream. The stream is released on every exit path:
//! successful capture, cancel, error, and drop (popup close / unmount).

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::device::{CameraDevice, StreamConstraints, VideoStream};
use super::source::{CameraFacing, CaptureRoute, PlatformCapabilities, RawCapture};
use super::{CaptureError, DeviceState};
use crate::config::CAMERA_RETRY_DELAY;

/// Filename given to frames sampled from the live stream.
const FRAME_FILENAME: &str = "capture.png";

/// Read-only view for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureSnapshot {
    pub state: DeviceState,
    pub holding_stream: bool,
    pub last_error: Option<String>,
    pub live_camera: bool,
}

pub struct CaptureController {
    camera: Arc<dyn CameraDevice>,
    capabilities: PlatformCapabilities,
    facing: CameraFacing,
    state: DeviceState,
    stream: Option<Box<dyn VideoStream>>,
    last_error: Option<CaptureError>,
    retry_delay: Duration,
}

impl CaptureController {
    pub fn new(
        camera: Arc<dyn CameraDevice>,
        capabilities: PlatformCapabilities,
        facing: CameraFacing,
    ) -> Self {
        Self {
            camera,
            capabilities,
            facing,
            state: DeviceState::Idle,
            stream: None,
            last_error: None,
            retry_delay: CAMERA_RETRY_DELAY,
        }
    }

    /// Override the retry debounce (tests use zero).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn last_error(&self) -> Option<&CaptureError> {
        self.last_error.as_ref()
    }

    /// Whether a live stream handle is currently held.
    pub fn is_holding_stream(&self) -> bool {
        self.stream.is_some()
    }

    pub fn capabilities(&self) -> PlatformCapabilities {
        self.capabilities
    }

    /// Start a capture: open the camera, or hand off to the file picker on
    /// platforms without a usable live camera (camera states stay untouched).
    pub async fn begin(&mut self) -> Result<CaptureRoute, CaptureError> {
        if !self.capabilities.live_camera {
            tracing::debug!(facing = ?self.facing, "Delegating capture to native picker");
            return Ok(CaptureRoute::FilePicker {
                facing: self.facing,
            });
        }
        self.acquire_device().await?;
        Ok(CaptureRoute::Camera)
    }

    /// Request a live stream and bring it to `Streaming`.
    ///
    /// `Streaming` is entered only after metadata loads and playback starts.
    /// Any failure leaves the controller in `Error` with no stream held.
    pub async fn acquire_device(&mut self) -> Result<(), CaptureError> {
        if self.state == DeviceState::Streaming && self.stream.is_some() {
            return Ok(());
        }
        if !self.capabilities.live_camera {
            return Err(super::DeviceAccessError::Unavailable(
                "live camera not supported on this platform".into(),
            )
            .into());
        }

        if let Some(mut stale) = self.stream.take() {
            stale.stop_tracks();
        }
        self.state = DeviceState::RequestingDevice;
        self.last_error = None;
        tracing::info!(facing = ?self.facing, "Requesting camera");

        let constraints = StreamConstraints {
            facing: self.facing,
        };
        match self.camera.open_stream(&constraints).await {
            Ok(stream) => self.stream = Some(stream),
            Err(e) => return Err(self.fail(e.into())),
        }

        // Owned by `self` from here on: `release` and `Drop` reach it even
        // when this future is dropped mid-await.
        let started = match self.stream.as_mut() {
            Some(stream) => start_playback(stream.as_mut()).await,
            None => Err("stream released while starting".to_string()),
        };
        if let Err(reason) = started {
            return Err(self.fail(CaptureError::StreamPlayback(reason)));
        }

        self.state = DeviceState::Streaming;
        tracing::info!("Camera streaming");
        Ok(())
    }

    /// Sample the current frame into a `RawCapture`, then release the camera.
    ///
    /// A paused or zero-width stream is a no-op: state is unchanged and
    /// `EmptyFrame` is returned.
    pub fn capture_frame(&mut self) -> Result<RawCapture, CaptureError> {
        let stream = match (self.state, self.stream.as_mut()) {
            (DeviceState::Streaming, Some(stream)) => stream,
            _ => return Err(CaptureError::NotStreaming(self.state)),
        };

        if stream.is_paused() || stream.dimensions().width == 0 {
            tracing::debug!("Video not ready yet, ignoring capture");
            return Err(CaptureError::EmptyFrame);
        }

        let frame = stream.read_frame().ok_or(CaptureError::EmptyFrame)?;
        let capture = RawCapture::from_frame(frame, FRAME_FILENAME)?;

        tracing::info!(size = capture.len(), "Frame captured");
        self.release();
        Ok(capture)
    }

    /// Stop all tracks and return to `Idle`. Safe to call at any time.
    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop_tracks();
            tracing::debug!("Camera released");
        }
        self.state = DeviceState::Idle;
        self.last_error = None;
    }

    /// Release, wait out the debounce, and request the camera again.
    pub async fn retry(&mut self) -> Result<(), CaptureError> {
        self.release();
        tokio::time::sleep(self.retry_delay).await;
        self.acquire_device().await
    }

    pub fn snapshot(&self) -> CaptureSnapshot {
        CaptureSnapshot {
            state: self.state,
            holding_stream: self.stream.is_some(),
            last_error: self.last_error.as_ref().map(|e| e.to_string()),
            live_camera: self.capabilities.live_camera,
        }
    }

    fn fail(&mut self, error: CaptureError) -> CaptureError {
        tracing::warn!(error = %error, "Camera unavailable");
        if let Some(mut stream) = self.stream.take() {
            stream.stop_tracks();
        }
        self.state = DeviceState::Error;
        self.last_error = Some(error.clone());
        error
    }
}

async fn start_playback(stream: &mut dyn VideoStream) -> Result<(), String> {
    let dimensions = stream.load_metadata().await?;
    tracing::debug!(
        width = dimensions.width,
        height = dimensions.height,
        "Stream metadata loaded"
    );
    stream.play().await
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.release();
    }
}
