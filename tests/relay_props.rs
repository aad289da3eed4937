//! Property-Based Tests for the Candidate Relay
//!
//! These tests verify ordering and accounting invariants of candidate
//! relaying using proptest for input generation and shrinking.
//!
//! Run with: cargo test --test relay_props

use proptest::prelude::*;

use rovercam::candidates::{CandidateDisposition, CandidateRelay};
use rovercam::testing::MockTransportHandle;
use rovercam::transport::IceCandidate;

fn valid_line(n: usize, tail: &str) -> String {
    format!("candidate:{} 1 udp 2122260223 10.0.0.1 5000 typ host {}", n, tail)
}

fn invalid_line(n: usize, tail: &str) -> String {
    format!("junk {} {}", n, tail)
}

// ═══════════════════════════════════════════════════════════════════════════
// RECEIPT ORDER
// ═══════════════════════════════════════════════════════════════════════════

proptest! {
    /// INVARIANT: candidates reach the transport in receipt order no matter
    /// where the remote description lands in the arrival sequence
    #[test]
    fn applied_order_matches_receipt_order(
        total in 1usize..48,
        split in any::<prop::sample::Index>(),
    ) {
        let split = split.index(total + 1);
        let lines: Vec<String> = (0..total).map(|n| valid_line(n, "gen0")).collect();

        let applied = tokio_test::block_on(async {
            let handle = MockTransportHandle::standalone();
            let dyn_handle = handle.clone().as_handle();
            let mut relay = CandidateRelay::new();

            for line in &lines[..split] {
                let disposition = relay
                    .accept(&dyn_handle, IceCandidate::new(line.clone()))
                    .await
                    .unwrap();
                assert!(matches!(disposition, CandidateDisposition::Queued));
            }
            relay.flush(&dyn_handle).await.unwrap();
            for line in &lines[split..] {
                relay
                    .accept(&dyn_handle, IceCandidate::new(line.clone()))
                    .await
                    .unwrap();
            }

            handle
                .applied_candidates()
                .into_iter()
                .map(|c| c.candidate)
                .collect::<Vec<_>>()
        });

        prop_assert_eq!(applied, lines);
    }

    /// INVARIANT: a malformed candidate never aborts the backlog flush, and
    /// applied plus rejected always accounts for every queued candidate
    #[test]
    fn flush_accounting_is_exhaustive(
        entries in prop::collection::vec((any::<bool>(), "[a-z0-9]{1,10}"), 1..40),
    ) {
        let lines: Vec<(bool, String)> = entries
            .iter()
            .enumerate()
            .map(|(n, (ok, tail))| {
                let line = if *ok { valid_line(n, tail) } else { invalid_line(n, tail) };
                (*ok, line)
            })
            .collect();
        let valid: Vec<String> = lines
            .iter()
            .filter(|(ok, _)| *ok)
            .map(|(_, line)| line.clone())
            .collect();

        let (report, counts, applied) = tokio_test::block_on(async {
            let handle = MockTransportHandle::standalone();
            let dyn_handle = handle.clone().as_handle();
            let mut relay = CandidateRelay::new();

            for (_, line) in &lines {
                relay
                    .accept(&dyn_handle, IceCandidate::new(line.clone()))
                    .await
                    .unwrap();
            }
            let report = relay.flush(&dyn_handle).await.unwrap();
            let applied = handle
                .applied_candidates()
                .into_iter()
                .map(|c| c.candidate)
                .collect::<Vec<_>>();
            (report, relay.counts(), applied)
        });

        prop_assert_eq!(report.applied + report.rejected, lines.len());
        prop_assert_eq!(report.applied, valid.len());
        prop_assert_eq!(counts, (valid.len() as u64, (lines.len() - valid.len()) as u64));
        prop_assert_eq!(applied, valid);
    }

    /// INVARIANT: once the relay is primed, dispositions mirror what the
    /// transport did with each individual candidate
    #[test]
    fn live_disposition_matches_line_validity(
        entries in prop::collection::vec((any::<bool>(), "[a-z0-9]{1,10}"), 1..24),
    ) {
        let ok = tokio_test::block_on(async {
            let handle = MockTransportHandle::standalone();
            let dyn_handle = handle.clone().as_handle();
            let mut relay = CandidateRelay::new();
            relay.flush(&dyn_handle).await.unwrap();

            for (n, (valid, tail)) in entries.iter().enumerate() {
                let line = if *valid { valid_line(n, tail) } else { invalid_line(n, tail) };
                let disposition = relay
                    .accept(&dyn_handle, IceCandidate::new(line))
                    .await
                    .unwrap();
                let matched = match disposition {
                    CandidateDisposition::Applied => *valid,
                    CandidateDisposition::Rejected(_) => !*valid,
                    CandidateDisposition::Queued => false,
                };
                if !matched {
                    return false;
                }
            }
            true
        });

        prop_assert!(ok);
    }

    /// INVARIANT: clearing reports exactly what it dropped and leaves
    /// nothing behind for a later flush
    #[test]
    fn clear_drops_the_whole_backlog(n in 0usize..64) {
        let (cleared, queued, applied) = tokio_test::block_on(async {
            let handle = MockTransportHandle::standalone();
            let dyn_handle = handle.clone().as_handle();
            let mut relay = CandidateRelay::new();

            relay.preload((0..n).map(|i| IceCandidate::new(valid_line(i, "gen0"))));
            let cleared = relay.clear();
            let queued = relay.queued();
            relay.flush(&dyn_handle).await.unwrap();
            (cleared, queued, handle.applied_candidates().len())
        });

        prop_assert_eq!(cleared, n);
        prop_assert_eq!(queued, 0);
        prop_assert_eq!(applied, 0);
    }
}
