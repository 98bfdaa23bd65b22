//! Raw captures and where they come from.
//!
//! A `RawCapture` is immutable once built and is moved (consumed) into the
//! acquisition queue. MIME type is taken from magic bytes first, then from the
//! filename extension, since picker-supplied names are often wrong.

use std::path::Path;
use std::sync::LazyLock;

use base64::Engine as _;
use regex::Regex;
use serde::Serialize;

use super::device::VideoFrame;
use super::CaptureError;
use crate::config::MAX_CAPTURE_BYTES;

/// User agents that get the native picker instead of a live camera.
static CONSTRAINED_PLATFORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Android|webOS|iPhone|iPad|iPod|BlackBerry|IEMobile|Opera Mini").unwrap()
});

/// Which camera the platform should prefer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraFacing {
    /// Rear camera: documents on a counter.
    #[default]
    Environment,
    /// Front camera: a product held up by the clerk.
    User,
}

/// What the host platform can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlatformCapabilities {
    pub live_camera: bool,
}

impl PlatformCapabilities {
    pub fn desktop() -> Self {
        Self { live_camera: true }
    }

    pub fn constrained() -> Self {
        Self { live_camera: false }
    }

    /// Classify a browser/webview user agent.
    pub fn from_user_agent(user_agent: &str) -> Self {
        Self {
            live_camera: !CONSTRAINED_PLATFORM.is_match(user_agent),
        }
    }
}

/// How a capture request will be fulfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum CaptureRoute {
    /// The controller holds a live stream; call `capture_frame`.
    Camera,
    /// Hand off to the native file picker with a capture hint.
    FilePicker { facing: CameraFacing },
}

// ═══════════════════════════════════════════════════════════
// RawCapture
// ═══════════════════════════════════════════════════════════

/// One acquired image, prior to extraction.
#[derive(Debug, PartialEq, Eq)]
pub struct RawCapture {
    bytes: Vec<u8>,
    mime_type: String,
    filename: String,
}

impl RawCapture {
    /// Build from bytes already in memory, validating size and format.
    pub fn from_bytes(bytes: Vec<u8>, filename: &str) -> Result<Self, CaptureError> {
        let filename = sanitize_filename(filename);
        if bytes.is_empty() {
            return Err(CaptureError::EmptyFile(filename));
        }
        check_size(bytes.len() as u64)?;

        let mime_type = detect_mime(&bytes, &filename);
        if !is_supported_mime(&mime_type) {
            return Err(CaptureError::UnsupportedFormat(mime_type));
        }

        Ok(Self {
            bytes,
            mime_type,
            filename,
        })
    }

    /// Read a file chosen in the native picker.
    pub async fn from_file(path: &Path) -> Result<Self, CaptureError> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("capture")
            .to_string();

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| CaptureError::FileRead(e.to_string()))?;
        check_size(metadata.len())?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| CaptureError::FileRead(e.to_string()))?;

        tracing::debug!(file = %filename, size = bytes.len(), "Read picked file");
        Self::from_bytes(bytes, &filename)
    }

    /// Decode a `data:<mime>;base64,<payload>` URL produced by a web view.
    pub fn from_data_url(data_url: &str, filename: &str) -> Result<Self, CaptureError> {
        let rest = data_url
            .strip_prefix("data:")
            .ok_or(CaptureError::InvalidDataUrl)?;
        let (header, payload) = rest.split_once(',').ok_or(CaptureError::InvalidDataUrl)?;
        // "data:," is what a canvas yields when it had nothing to draw
        if payload.trim().is_empty() {
            return Err(CaptureError::EmptyFrame);
        }
        if !header.ends_with(";base64") {
            return Err(CaptureError::InvalidDataUrl);
        }

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|_| CaptureError::InvalidDataUrl)?;
        Self::from_bytes(bytes, filename)
    }

    /// Encode a sampled video frame as PNG.
    pub fn from_frame(frame: VideoFrame, filename: &str) -> Result<Self, CaptureError> {
        if frame.dimensions.is_empty() {
            return Err(CaptureError::EmptyFrame);
        }
        let buffer = image::RgbaImage::from_raw(
            frame.dimensions.width,
            frame.dimensions.height,
            frame.rgba,
        )
        .ok_or_else(|| {
            CaptureError::FrameEncoding("frame buffer does not match dimensions".into())
        })?;

        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(buffer)
            .write_to(&mut bytes, image::ImageOutputFormat::Png)
            .map_err(|e| CaptureError::FrameEncoding(e.to_string()))?;

        Ok(Self {
            bytes,
            mime_type: "image/png".into(),
            filename: sanitize_filename(filename),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Consume into `(bytes, mime_type, filename)`.
    pub fn into_parts(self) -> (Vec<u8>, String, String) {
        (self.bytes, self.mime_type, self.filename)
    }
}

fn check_size(size: u64) -> Result<(), CaptureError> {
    if size > MAX_CAPTURE_BYTES {
        return Err(CaptureError::TooLarge {
            size_mb: size as f64 / (1024.0 * 1024.0),
            max_mb: MAX_CAPTURE_BYTES / (1024 * 1024),
        });
    }
    Ok(())
}

/// MIME from magic bytes, falling back to the filename extension.
fn detect_mime(bytes: &[u8], filename: &str) -> String {
    let sniffed = match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [0x89, 0x50, 0x4E, 0x47, ..] => Some("image/png"),
        [0x25, 0x50, 0x44, 0x46, ..] => Some("application/pdf"),
        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => Some("image/tiff"),
        [b'G', b'I', b'F', b'8', ..] => Some("image/gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("image/webp"),
        _ if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" => Some("image/heic"),
        _ => None,
    };

    match sniffed {
        Some(mime) => mime.to_string(),
        None => mime_guess::from_path(filename)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string(),
    }
}

fn is_supported_mime(mime: &str) -> bool {
    mime.starts_with("image/") || mime == "application/pdf"
}

/// Keep only the final path component and printable characters.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(&['/', '\\'][..]).next().unwrap_or(name);
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "capture".into()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::device::FrameDimensions;

    const PNG_HEADER: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn mobile_user_agents_are_constrained() {
        let iphone = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15";
        let android = "Mozilla/5.0 (Linux; android 14; Pixel 8) AppleWebKit/537.36";
        let desktop = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 Chrome/126.0";

        assert!(!PlatformCapabilities::from_user_agent(iphone).live_camera);
        assert!(!PlatformCapabilities::from_user_agent(android).live_camera);
        assert!(PlatformCapabilities::from_user_agent(desktop).live_camera);
    }

    #[test]
    fn magic_bytes_win_over_extension() {
        let capture = RawCapture::from_bytes(PNG_HEADER.to_vec(), "bill.jpg").unwrap();
        assert_eq!(capture.mime_type(), "image/png");
        assert_eq!(capture.filename(), "bill.jpg");
    }

    #[test]
    fn extension_used_when_bytes_unknown() {
        let capture = RawCapture::from_bytes(vec![1, 2, 3, 4], "label.jpeg").unwrap();
        assert_eq!(capture.mime_type(), "image/jpeg");
    }

    #[test]
    fn pdf_bills_are_accepted() {
        let capture = RawCapture::from_bytes(b"%PDF-1.7 ...".to_vec(), "invoice.pdf").unwrap();
        assert_eq!(capture.mime_type(), "application/pdf");
    }

    #[test]
    fn unsupported_format_rejected() {
        let err = RawCapture::from_bytes(b"hello".to_vec(), "notes.txt").unwrap_err();
        assert_eq!(err, CaptureError::UnsupportedFormat("text/plain".into()));
    }

    #[test]
    fn empty_bytes_rejected() {
        let err = RawCapture::from_bytes(Vec::new(), "bill.png").unwrap_err();
        assert_eq!(err, CaptureError::EmptyFile("bill.png".into()));
    }

    #[test]
    fn filename_is_reduced_to_basename() {
        let capture =
            RawCapture::from_bytes(PNG_HEADER.to_vec(), "C:\\Users\\clerk\\scan 1.png").unwrap();
        assert_eq!(capture.filename(), "scan 1.png");
        let capture = RawCapture::from_bytes(PNG_HEADER.to_vec(), "  ").unwrap();
        assert_eq!(capture.filename(), "capture");
    }

    #[test]
    fn data_url_roundtrip() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(PNG_HEADER);
        let url = format!("data:image/png;base64,{encoded}");
        let capture = RawCapture::from_data_url(&url, "bill.png").unwrap();
        assert_eq!(capture.bytes(), &PNG_HEADER);
        assert_eq!(capture.mime_type(), "image/png");
    }

    #[test]
    fn empty_canvas_data_url_is_empty_frame() {
        let err = RawCapture::from_data_url("data:,", "bill.png").unwrap_err();
        assert_eq!(err, CaptureError::EmptyFrame);
        let err = RawCapture::from_data_url("data:image/png;base64,", "bill.png").unwrap_err();
        assert_eq!(err, CaptureError::EmptyFrame);
    }

    #[test]
    fn frame_encodes_to_png() {
        let frame = VideoFrame {
            dimensions: FrameDimensions::new(2, 2),
            rgba: vec![255; 16],
        };
        let capture = RawCapture::from_frame(frame, "capture.png").unwrap();
        assert_eq!(capture.mime_type(), "image/png");
        assert_eq!(&capture.bytes()[..8], &PNG_HEADER);
    }

    #[test]
    fn mismatched_frame_buffer_fails_encoding() {
        let frame = VideoFrame {
            dimensions: FrameDimensions::new(4, 4),
            rgba: vec![0; 8],
        };
        assert!(matches!(
            RawCapture::from_frame(frame, "capture.png"),
            Err(CaptureError::FrameEncoding(_))
        ));
    }

    #[tokio::test]
    async fn from_file_reads_picked_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bill.jpg");
        std::fs::write(&path, [0xFF, 0xD8, 0xFF, 0xE0, 0x00]).unwrap();

        let capture = RawCapture::from_file(&path).await.unwrap();
        assert_eq!(capture.mime_type(), "image/jpeg");
        assert_eq!(capture.filename(), "bill.jpg");
        assert_eq!(capture.len(), 5);
    }

    #[tokio::test]
    async fn from_file_missing_path_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = RawCapture::from_file(&dir.path().join("gone.png")).await;
        assert!(matches!(result, Err(CaptureError::FileRead(_))));
    }
}
