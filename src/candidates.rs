//! Remote ICE candidate buffering and ordered application
//!
//! Candidates can outrun the offer they belong to. [`CandidateRelay`] holds
//! them until the remote description has been accepted, then replays the
//! backlog in receipt order; once primed, later candidates pass straight
//! through. The relay owns no locking: the session orchestrator serializes
//! every call on its session lock.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::errors::AgentError;
use crate::transport::{IceCandidate, TransportHandle};

/// What became of one relayed candidate
#[derive(Debug)]
pub enum CandidateDisposition {
    /// Held until the remote description lands
    Queued,
    /// Handed to the transport
    Applied,
    /// Refused by the transport as malformed; the session is unaffected
    Rejected(AgentError),
}

/// Outcome of draining the backlog after the remote description was set
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub applied: usize,
    pub rejected: usize,
}

#[derive(Default)]
pub struct CandidateRelay {
    queue: VecDeque<IceCandidate>,
    remote_ready: bool,
    applied: u64,
    rejected: u64,
}

impl CandidateRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed candidates that arrived before the session existed. Must be
    /// called before [`flush`](Self::flush) so they keep their place at the
    /// head of the receipt order.
    pub fn preload(&mut self, candidates: impl IntoIterator<Item = IceCandidate>) {
        for candidate in candidates {
            self.queue.push_back(candidate);
        }
    }

    /// Take in one remote candidate: queue it while the remote description
    /// is still pending, apply it once the relay is primed.
    ///
    /// `Err` means the transport itself failed; a candidate the transport
    /// merely refuses comes back as [`CandidateDisposition::Rejected`].
    pub async fn accept(
        &mut self,
        handle: &Arc<dyn TransportHandle>,
        candidate: IceCandidate,
    ) -> Result<CandidateDisposition, AgentError> {
        if !self.remote_ready {
            self.queue.push_back(candidate);
            log::debug!("Candidate queued ({} waiting)", self.queue.len());
            return Ok(CandidateDisposition::Queued);
        }
        self.apply_one(handle, candidate).await
    }

    /// Mark the remote description as accepted and drain the backlog in
    /// receipt order. Malformed entries are skipped and counted; a transport
    /// failure aborts the drain and surfaces as `Err`.
    pub async fn flush(
        &mut self,
        handle: &Arc<dyn TransportHandle>,
    ) -> Result<FlushReport, AgentError> {
        self.remote_ready = true;
        let mut report = FlushReport::default();
        while let Some(candidate) = self.queue.pop_front() {
            match self.apply_one(handle, candidate).await? {
                CandidateDisposition::Applied => report.applied += 1,
                CandidateDisposition::Rejected(_) => report.rejected += 1,
                CandidateDisposition::Queued => unreachable!("relay is primed"),
            }
        }
        if report.applied > 0 || report.rejected > 0 {
            log::info!(
                "Candidate backlog drained: {} applied, {} rejected",
                report.applied,
                report.rejected
            );
        }
        Ok(report)
    }

    async fn apply_one(
        &mut self,
        handle: &Arc<dyn TransportHandle>,
        candidate: IceCandidate,
    ) -> Result<CandidateDisposition, AgentError> {
        match handle.add_ice_candidate(candidate).await {
            Ok(()) => {
                self.applied += 1;
                Ok(CandidateDisposition::Applied)
            }
            Err(e @ AgentError::MalformedCandidate(_)) => {
                self.rejected += 1;
                log::warn!("Candidate rejected by transport: {}", e);
                Ok(CandidateDisposition::Rejected(e))
            }
            Err(e) => Err(e),
        }
    }

    /// Drop everything still queued, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        if dropped > 0 {
            log::debug!("Discarded {} queued candidates", dropped);
        }
        dropped
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn counts(&self) -> (u64, u64) {
        (self.applied, self.rejected)
    }
}
