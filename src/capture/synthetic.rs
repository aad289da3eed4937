//! Hardware-free frame source
//!
//! Produces a moving-gradient test pattern at the configured resolution so
//! the full pipeline can run offline. Device claims behave like real
//! hardware: a device id stays claimed until the source that opened it is
//! closed, and a second open fails fast with `DeviceBusy`.

use bytes::Bytes;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::capture::{CaptureFrame, FrameSource, FrameSourceProvider, SourceConfig};
use crate::errors::AgentError;

/// Provider of synthetic test-pattern sources
pub struct SyntheticProvider {
    claims: Arc<Mutex<HashSet<String>>>,
}

impl SyntheticProvider {
    pub fn new() -> Self {
        Self {
            claims: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Device ids currently held by unreleased sources
    pub fn claimed(&self) -> Vec<String> {
        let claims = self.claims.lock().expect("lock poisoned");
        claims.iter().cloned().collect()
    }
}

impl Default for SyntheticProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSourceProvider for SyntheticProvider {
    fn open(&self, config: &SourceConfig) -> Result<Box<dyn FrameSource>, AgentError> {
        let mut claims = self.claims.lock().expect("lock poisoned");
        if !claims.insert(config.device_id.clone()) {
            return Err(AgentError::DeviceBusy(format!(
                "device {} already claimed",
                config.device_id
            )));
        }
        log::debug!(
            "Opened synthetic source {} at {}x{}@{}",
            config.device_id,
            config.width,
            config.height,
            config.fps
        );
        Ok(Box::new(SyntheticSource {
            device_id: config.device_id.clone(),
            width: config.width,
            height: config.height,
            frame_number: 0,
            closed: false,
            claims: Arc::clone(&self.claims),
        }))
    }
}

/// One open synthetic device
pub struct SyntheticSource {
    device_id: String,
    width: u32,
    height: u32,
    frame_number: u64,
    closed: bool,
    claims: Arc<Mutex<HashSet<String>>>,
}

impl FrameSource for SyntheticSource {
    fn read_frame(&mut self) -> Option<CaptureFrame> {
        if self.closed {
            return None;
        }
        let frame = gradient_frame(self.frame_number, self.width, self.height);
        self.frame_number = self.frame_number.wrapping_add(1);
        Some(frame)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut claims = self.claims.lock().expect("lock poisoned");
        claims.remove(&self.device_id);
        log::debug!("Closed synthetic source {}", self.device_id);
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// RGB gradient that shifts each frame, so consumers can verify motion
fn gradient_frame(frame_number: u64, width: u32, height: u32) -> CaptureFrame {
    let mut data = vec![0u8; (width * height * 3) as usize];
    let base = (frame_number % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 3) as usize;
            data[idx] = base.wrapping_add((x % 256) as u8);
            data[idx + 1] = base.wrapping_add((y % 256) as u8);
            data[idx + 2] = base.wrapping_add(((x + y) % 256) as u8);
        }
    }
    CaptureFrame {
        data: Bytes::from(data),
        width,
        height,
    }
}
