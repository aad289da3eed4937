//! Outbound media track lifecycle
//!
//! [`TrackController`] owns the capture device and the feed the transport
//! pulls frames from. Enable/disable switches between real capture output
//! and filler frames without touching the device, so the outbound cadence
//! and timestamp sequence stay continuous; detach removes the feed from its
//! sender without closing the device; release frees the hardware.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use uuid::Uuid;

use crate::capture::{FrameSource, FrameSourceProvider, MediaFeed, SourceConfig, VideoFrame};
use crate::errors::AgentError;
use crate::transport::{MediaKind, TrackSender, TransportHandle};

/// Snapshot of a track's state for telemetry and command handling
#[derive(Debug, Clone, serde::Serialize)]
pub struct TrackStatus {
    pub enabled: bool,
    pub attached: bool,
    pub released: bool,
    pub frames_produced: u64,
}

struct TrackFeed {
    id: String,
    width: u32,
    height: u32,
    enabled: AtomicBool,
    sequence: AtomicU64,
    started: Instant,
    // Snapshot lock only: produce_frame uses try_lock and substitutes filler
    // on contention, so the pacing loop is never stalled by session mutation.
    source: Mutex<Option<Box<dyn FrameSource>>>,
}

impl MediaFeed for TrackFeed {
    fn produce_frame(&self) -> VideoFrame {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let timestamp_us = self.started.elapsed().as_micros() as u64;

        if self.enabled.load(Ordering::Relaxed) {
            if let Ok(mut guard) = self.source.try_lock() {
                if let Some(source) = guard.as_mut() {
                    if let Some(raw) = source.read_frame() {
                        return VideoFrame::from_capture(raw, sequence, timestamp_us);
                    }
                    log::debug!("Track {}: capture read failed, emitting filler", self.id);
                }
            }
        }

        VideoFrame::filler(self.width, self.height, sequence, timestamp_us)
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// Controller for the one outbound video track of a session
pub struct TrackController {
    feed: Arc<TrackFeed>,
    // Serializes attach/detach/release; at most one in flight per track.
    attach_lock: tokio::sync::Mutex<()>,
    sender: tokio::sync::Mutex<Option<Arc<dyn TrackSender>>>,
    released: AtomicBool,
}

impl std::fmt::Debug for TrackController {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("TrackController")
            .field("id", &self.feed.id)
            .field("enabled", &self.feed.enabled)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl TrackController {
    /// Acquire the capture device and build the track feed.
    ///
    /// Fails fast with `CaptureUnavailable`/`DeviceBusy`; callers treat both
    /// as a degraded session, never as a session-fatal error.
    pub fn create(
        provider: &dyn FrameSourceProvider,
        config: &SourceConfig,
    ) -> Result<Self, AgentError> {
        let source = provider.open(config)?;
        let id = format!("video-{}", Uuid::new_v4());
        log::info!(
            "Track {} created on device {} ({}x{}@{})",
            id,
            config.device_id,
            config.width,
            config.height,
            config.fps
        );
        Ok(Self {
            feed: Arc::new(TrackFeed {
                id,
                width: config.width,
                height: config.height,
                enabled: AtomicBool::new(true),
                sequence: AtomicU64::new(0),
                started: Instant::now(),
                source: Mutex::new(Some(source)),
            }),
            attach_lock: tokio::sync::Mutex::new(()),
            sender: tokio::sync::Mutex::new(None),
            released: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.feed.id
    }

    /// Resume real captured frames.
    pub fn enable(&self) {
        if !self.feed.enabled.swap(true, Ordering::Relaxed) {
            log::info!("Track {} enabled", self.feed.id);
        }
    }

    /// Switch to filler frames at the same cadence; the device stays open.
    pub fn disable(&self) {
        if self.feed.enabled.swap(false, Ordering::Relaxed) {
            log::info!("Track {} disabled", self.feed.id);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.feed.enabled.load(Ordering::Relaxed)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// The feed handed to transport senders.
    pub fn feed(&self) -> Arc<dyn MediaFeed> {
        self.feed.clone() as Arc<dyn MediaFeed>
    }

    /// Bind the track to the transport's outbound video sender.
    ///
    /// Reuses a track-less video slot when one exists (replace-in-place, no
    /// renegotiation), otherwise asks the handle for a new sender.
    pub async fn attach_to(&self, handle: &Arc<dyn TransportHandle>) -> Result<(), AgentError> {
        let _attach = self.attach_lock.lock().await;
        if self.is_released() {
            return Err(AgentError::CaptureUnavailable(format!(
                "track {} already released",
                self.feed.id
            )));
        }

        let feed = self.feed();
        for candidate in handle.senders().await {
            if candidate.kind() == MediaKind::Video && !candidate.has_feed().await {
                candidate.replace_feed(Some(feed)).await?;
                *self.sender.lock().await = Some(candidate);
                log::info!("Track {} substituted into existing sender", self.feed.id);
                return Ok(());
            }
        }

        let sender = handle.add_track(feed).await?;
        *self.sender.lock().await = Some(sender);
        log::info!("Track {} attached via new sender", self.feed.id);
        Ok(())
    }

    /// Remove the track from its sender without releasing the device.
    pub async fn detach(&self) -> Result<(), AgentError> {
        let _attach = self.attach_lock.lock().await;
        self.detach_inner().await
    }

    async fn detach_inner(&self) -> Result<(), AgentError> {
        let sender = self.sender.lock().await.take();
        if let Some(sender) = sender {
            sender.replace_feed(None).await?;
            log::info!("Track {} detached", self.feed.id);
        }
        Ok(())
    }

    /// Detach if attached, then release the capture device. Idempotent.
    pub async fn release(&self) {
        let _attach = self.attach_lock.lock().await;
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.detach_inner().await {
            log::warn!("Track {}: detach during release failed: {}", self.feed.id, e);
        }
        let source = {
            let mut guard = self.feed.source.lock().expect("lock poisoned");
            guard.take()
        };
        if let Some(mut source) = source {
            source.close();
        }
        log::info!("Track {} released", self.feed.id);
    }

    pub async fn is_attached(&self) -> bool {
        self.sender.lock().await.is_some()
    }

    pub async fn status(&self) -> TrackStatus {
        TrackStatus {
            enabled: self.is_enabled(),
            attached: self.is_attached().await,
            released: self.is_released(),
            frames_produced: self.feed.sequence.load(Ordering::Relaxed),
        }
    }
}

impl Drop for TrackController {
    fn drop(&mut self) {
        // Device close only; sender detach needs async and the session
        // teardown path has already done it.
        if !self.released.swap(true, Ordering::SeqCst) {
            let source = {
                let mut guard = self.feed.source.lock().expect("lock poisoned");
                guard.take()
            };
            if let Some(mut source) = source {
                source.close();
                log::warn!("Track {} released in drop", self.feed.id);
            }
        }
    }
}
