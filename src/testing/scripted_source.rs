//! Frame source with scripted failure modes
//!
//! Counts device opens and closes so tests can prove the enable/disable
//! path never reacquires hardware, and lets tests flip capture reads into
//! failure while a source is live.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::capture::{CaptureFrame, FrameSource, FrameSourceProvider, SourceConfig};
use crate::errors::AgentError;

#[derive(Default)]
pub struct ScriptedProvider {
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
    unavailable: AtomicBool,
    busy: AtomicBool,
    reads_fail: Arc<AtomicBool>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Next opens fail with `CaptureUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Next opens fail with `DeviceBusy`.
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    /// Make live sources return no frame on read.
    pub fn set_reads_fail(&self, fail: bool) {
        self.reads_fail.store(fail, Ordering::SeqCst);
    }
}

impl FrameSourceProvider for ScriptedProvider {
    fn open(&self, config: &SourceConfig) -> Result<Box<dyn FrameSource>, AgentError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AgentError::CaptureUnavailable(
                "scripted capture offline".to_string(),
            ));
        }
        if self.busy.load(Ordering::SeqCst) {
            return Err(AgentError::DeviceBusy("scripted device busy".to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource {
            width: config.width,
            height: config.height,
            reads_fail: self.reads_fail.clone(),
            closes: self.closes.clone(),
            closed: false,
        }))
    }
}

struct ScriptedSource {
    width: u32,
    height: u32,
    reads_fail: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
    closed: bool,
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self) -> Option<CaptureFrame> {
        if self.closed || self.reads_fail.load(Ordering::SeqCst) {
            return None;
        }
        let len = (self.width * self.height * 3) as usize;
        Some(CaptureFrame {
            data: Bytes::from(vec![0x5A; len]),
            width: self.width,
            height: self.height,
        })
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}
