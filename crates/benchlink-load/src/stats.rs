use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Communication counters for one engine.
///
/// Counters only grow. The arrival observer bumps `spurious_arrivals` from
/// its own thread; everything else is bumped by the engine.
#[derive(Debug, Default)]
pub struct TransactionStats {
    messages_sent: AtomicU64,
    expected_replies: AtomicU64,
    received_replies: AtomicU64,
    retries: AtomicU64,
    checksum_failures: AtomicU64,
    spurious_arrivals: AtomicU64,
    framing_failures: AtomicU64,
}

/// Point-in-time copy of [`TransactionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub messages_sent: u64,
    pub expected_replies: u64,
    pub received_replies: u64,
    pub retries: u64,
    pub checksum_failures: u64,
    pub spurious_arrivals: u64,
    pub framing_failures: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl TransactionStats {
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn expected_replies(&self) -> u64 {
        self.expected_replies.load(Ordering::Relaxed)
    }

    pub fn received_replies(&self) -> u64 {
        self.received_replies.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn checksum_failures(&self) -> u64 {
        self.checksum_failures.load(Ordering::Relaxed)
    }

    pub fn spurious_arrivals(&self) -> u64 {
        self.spurious_arrivals.load(Ordering::Relaxed)
    }

    pub fn framing_failures(&self) -> u64 {
        self.framing_failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_sent: self.messages_sent(),
            expected_replies: self.expected_replies(),
            received_replies: self.received_replies(),
            retries: self.retries(),
            checksum_failures: self.checksum_failures(),
            spurious_arrivals: self.spurious_arrivals(),
            framing_failures: self.framing_failures(),
        }
    }

    pub(crate) fn record_sent(&self) {
        bump(&self.messages_sent);
        bump(&self.expected_replies);
    }

    pub(crate) fn record_reply(&self) {
        bump(&self.received_replies);
    }

    pub(crate) fn record_retry(&self) {
        bump(&self.retries);
    }

    pub(crate) fn record_checksum_failure(&self) {
        bump(&self.checksum_failures);
    }

    pub(crate) fn record_spurious_arrival(&self) {
        bump(&self.spurious_arrivals);
    }

    pub(crate) fn record_framing_failure(&self) {
        bump(&self.framing_failures);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = TransactionStats::default();
        stats.record_sent();
        stats.record_sent();
        stats.record_reply();
        stats.record_retry();
        stats.record_checksum_failure();
        stats.record_spurious_arrival();
        stats.record_framing_failure();

        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                messages_sent: 2,
                expected_replies: 2,
                received_replies: 1,
                retries: 1,
                checksum_failures: 1,
                spurious_arrivals: 1,
                framing_failures: 1,
            }
        );
    }

    #[test]
    fn snapshot_serializes_counter_names() {
        let json = serde_json::to_value(StatsSnapshot::default()).unwrap();
        assert_eq!(json["checksum_failures"], 0);
        assert_eq!(json["spurious_arrivals"], 0);
    }
}
