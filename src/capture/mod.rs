//! Frame source interface
//!
//! Capture hardware is external to this crate; a deployment provides a
//! [`FrameSourceProvider`] that opens devices and yields raw frames. The
//! [`synthetic`] provider ships as a hardware-free stand-in.

use bytes::Bytes;

use crate::errors::AgentError;

pub mod synthetic;

pub use synthetic::SyntheticProvider;

/// Raw frame as produced by a capture device
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Normalized outbound frame handed to the transport's pacing loop
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    /// Monotonic frame index, continuous across enable/disable switches.
    pub sequence: u64,
    /// Presentation timestamp in microseconds since track creation.
    pub timestamp_us: u64,
    /// True when this frame is filler rather than real capture output.
    pub filler: bool,
}

impl VideoFrame {
    /// Deterministic blank frame (RGB24 black) at the track's resolution.
    pub fn filler(width: u32, height: u32, sequence: u64, timestamp_us: u64) -> Self {
        Self {
            data: Bytes::from(vec![0u8; (width * height * 3) as usize]),
            width,
            height,
            sequence,
            timestamp_us,
            filler: true,
        }
    }

    pub fn from_capture(raw: CaptureFrame, sequence: u64, timestamp_us: u64) -> Self {
        Self {
            data: raw.data,
            width: raw.width,
            height: raw.height,
            sequence,
            timestamp_us,
            filler: false,
        }
    }
}

/// Settings a frame source is opened with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub device_id: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl From<&crate::config::VideoSettings> for SourceConfig {
    fn from(settings: &crate::config::VideoSettings) -> Self {
        Self {
            device_id: settings.device_id.clone(),
            width: settings.width,
            height: settings.height,
            fps: settings.fps,
        }
    }
}

/// A live capture device.
///
/// `read_frame` must return within the device's own frame interval; `None`
/// means the device produced nothing in time and the caller substitutes
/// filler.
pub trait FrameSource: Send {
    fn read_frame(&mut self) -> Option<CaptureFrame>;
    fn close(&mut self);
}

impl std::fmt::Debug for dyn FrameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("FrameSource")
    }
}

/// Opens frame sources.
///
/// Exclusive device claims are enforced here: opening a device that a
/// not-yet-released source still holds fails fast with `DeviceBusy` instead
/// of blocking.
pub trait FrameSourceProvider: Send + Sync {
    fn open(&self, config: &SourceConfig) -> Result<Box<dyn FrameSource>, AgentError>;
}

/// Pull-based feed the transport's pacing loop draws frames from
pub trait MediaFeed: Send + Sync {
    /// Next outbound frame. Never blocks past a bounded time; degraded
    /// capture yields filler rather than an error.
    fn produce_frame(&self) -> VideoFrame;
    fn id(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filler_frame_shape() {
        let frame = VideoFrame::filler(640, 480, 7, 33_000);
        assert_eq!(frame.data.len(), 640 * 480 * 3);
        assert_eq!(frame.sequence, 7);
        assert!(frame.filler);
        assert!(frame.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_source_config_from_video_settings() {
        let settings = crate::config::VideoSettings {
            width: 1280,
            height: 720,
            fps: 15,
            device_id: "cam1".to_string(),
        };
        let config = SourceConfig::from(&settings);
        assert_eq!(config.width, 1280);
        assert_eq!(config.device_id, "cam1");
    }
}
