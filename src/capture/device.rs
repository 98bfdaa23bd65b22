//! Camera seam: the platform media layer implements these traits.
//!
//! `ScriptedCamera` is an in-memory device with configurable outcomes,
//! used by controller and session tests and by headless front ends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::source::CameraFacing;
use super::DeviceAccessError;

/// Pixel size of a video stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameDimensions {
    pub width: u32,
    pub height: u32,
}

impl FrameDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// One sampled frame, tightly packed RGBA8.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub dimensions: FrameDimensions,
    pub rgba: Vec<u8>,
}

/// What to ask the platform for when opening a stream.
#[derive(Debug, Clone, Default)]
pub struct StreamConstraints {
    pub facing: CameraFacing,
}

/// Source of live video streams.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    /// Request a live video stream. The returned stream is not yet playing.
    async fn open_stream(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<Box<dyn VideoStream>, DeviceAccessError>;
}

/// An open, exclusively-owned video stream.
#[async_trait]
pub trait VideoStream: Send {
    /// Resolves once stream metadata (dimensions) is available.
    async fn load_metadata(&mut self) -> Result<FrameDimensions, String>;

    /// Start playback.
    async fn play(&mut self) -> Result<(), String>;

    fn is_paused(&self) -> bool;

    fn dimensions(&self) -> FrameDimensions;

    /// Sample the current frame, `None` if nothing is decodable yet.
    fn read_frame(&mut self) -> Option<VideoFrame>;

    /// Stop every track. Must be safe to call more than once.
    fn stop_tracks(&mut self);
}

// ═══════════════════════════════════════════════════════════
// ScriptedCamera
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum ScriptedOutcome {
    Grant,
    Deny,
    Unavailable(String),
    PlaybackFails(String),
}

/// In-memory camera with a fixed outcome per `open_stream`.
///
/// Counters are shared across clones so a test can keep a handle while the
/// controller owns another.
#[derive(Debug, Clone)]
pub struct ScriptedCamera {
    outcome: ScriptedOutcome,
    dimensions: FrameDimensions,
    start_paused: bool,
    stall_metadata: bool,
    opened: Arc<AtomicUsize>,
    stopped: Arc<AtomicUsize>,
}

impl ScriptedCamera {
    fn with_outcome(outcome: ScriptedOutcome) -> Self {
        Self {
            outcome,
            dimensions: FrameDimensions::new(4, 3),
            start_paused: false,
            stall_metadata: false,
            opened: Arc::new(AtomicUsize::new(0)),
            stopped: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Grants access and plays a solid-colour stream.
    pub fn granting(width: u32, height: u32) -> Self {
        let mut camera = Self::with_outcome(ScriptedOutcome::Grant);
        camera.dimensions = FrameDimensions::new(width, height);
        camera
    }

    pub fn denying() -> Self {
        Self::with_outcome(ScriptedOutcome::Deny)
    }

    pub fn unavailable(reason: &str) -> Self {
        Self::with_outcome(ScriptedOutcome::Unavailable(reason.to_string()))
    }

    /// Grants access but `play()` fails.
    pub fn failing_playback(reason: &str) -> Self {
        Self::with_outcome(ScriptedOutcome::PlaybackFails(reason.to_string()))
    }

    /// Streams report paused even after `play()`.
    pub fn paused(mut self) -> Self {
        self.start_paused = true;
        self
    }

    /// Streams never finish loading metadata.
    pub fn stalling_metadata(mut self) -> Self {
        self.stall_metadata = true;
        self
    }

    /// Streams ever handed out.
    pub fn opened_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Streams handed out and not yet stopped.
    pub fn live_streams(&self) -> usize {
        self.opened_count() - self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraDevice for ScriptedCamera {
    async fn open_stream(
        &self,
        _constraints: &StreamConstraints,
    ) -> Result<Box<dyn VideoStream>, DeviceAccessError> {
        let playback_error = match &self.outcome {
            ScriptedOutcome::Deny => return Err(DeviceAccessError::PermissionDenied),
            ScriptedOutcome::Unavailable(reason) => {
                return Err(DeviceAccessError::Unavailable(reason.clone()))
            }
            ScriptedOutcome::Grant => None,
            ScriptedOutcome::PlaybackFails(reason) => Some(reason.clone()),
        };

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedStream {
            dimensions: self.dimensions,
            playback_error,
            paused: true,
            stay_paused: self.start_paused,
            stall_metadata: self.stall_metadata,
            stopped: false,
            stop_counter: Arc::clone(&self.stopped),
        }))
    }
}

struct ScriptedStream {
    dimensions: FrameDimensions,
    playback_error: Option<String>,
    paused: bool,
    stay_paused: bool,
    stall_metadata: bool,
    stopped: bool,
    stop_counter: Arc<AtomicUsize>,
}

#[async_trait]
impl VideoStream for ScriptedStream {
    async fn load_metadata(&mut self) -> Result<FrameDimensions, String> {
        if self.stall_metadata {
            std::future::pending::<()>().await;
        }
        Ok(self.dimensions)
    }

    async fn play(&mut self) -> Result<(), String> {
        if let Some(reason) = &self.playback_error {
            return Err(reason.clone());
        }
        self.paused = self.stay_paused;
        Ok(())
    }

    fn is_paused(&self) -> bool {
        self.paused || self.stopped
    }

    fn dimensions(&self) -> FrameDimensions {
        self.dimensions
    }

    fn read_frame(&mut self) -> Option<VideoFrame> {
        if self.stopped || self.dimensions.is_empty() {
            return None;
        }
        let pixels = (self.dimensions.width * self.dimensions.height) as usize;
        let rgba = [0x20, 0x80, 0xC0, 0xFF].repeat(pixels);
        Some(VideoFrame {
            dimensions: self.dimensions,
            rgba,
        })
    }

    fn stop_tracks(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.stop_counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn granting_camera_hands_out_playable_stream() {
        let camera = ScriptedCamera::granting(8, 6);
        let mut stream = camera
            .open_stream(&StreamConstraints::default())
            .await
            .unwrap();

        assert_eq!(stream.load_metadata().await.unwrap(), FrameDimensions::new(8, 6));
        assert!(stream.is_paused());
        stream.play().await.unwrap();
        assert!(!stream.is_paused());

        let frame = stream.read_frame().unwrap();
        assert_eq!(frame.rgba.len(), 8 * 6 * 4);
        assert_eq!(camera.live_streams(), 1);
    }

    #[tokio::test]
    async fn stop_tracks_is_idempotent() {
        let camera = ScriptedCamera::granting(2, 2);
        let mut stream = camera
            .open_stream(&StreamConstraints::default())
            .await
            .unwrap();

        stream.stop_tracks();
        stream.stop_tracks();
        assert_eq!(camera.live_streams(), 0);
        assert!(stream.read_frame().is_none());
    }

    #[tokio::test]
    async fn denying_camera_opens_nothing() {
        let camera = ScriptedCamera::denying();
        let result = camera.open_stream(&StreamConstraints::default()).await;
        assert!(matches!(result, Err(DeviceAccessError::PermissionDenied)));
        assert_eq!(camera.opened_count(), 0);
    }

    #[test]
    fn zero_width_dimensions_are_empty() {
        assert!(FrameDimensions::new(0, 480).is_empty());
        assert!(!FrameDimensions::new(640, 480).is_empty());
    }
}
