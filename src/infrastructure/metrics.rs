use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MutationOutcomeStatus {
    Committed,
    RolledBack,
    TimedOut,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetricsSnapshot {
    pub mutations_committed: u64,
    pub mutations_rolled_back: u64,
    pub mutations_timed_out: u64,
    pub mutations_queued: u64,
    pub consecutive_failure: u64,
    pub push_applied: u64,
    pub push_merged: u64,
    pub push_deferred: u64,
    pub push_stale: u64,
    pub push_malformed: u64,
    pub resyncs: u64,
    pub notification_polls: u64,
    pub last_outcome: Option<MutationOutcomeStatus>,
    pub last_outcome_ms: Option<u64>,
    pub last_resync_ms: Option<u64>,
}

#[derive(Default)]
struct LastOutcome {
    status: Option<MutationOutcomeStatus>,
    timestamp_ms: Option<u64>,
}

/// Counters for one sync engine instance.
pub struct SyncMetrics {
    committed: AtomicU64,
    rolled_back: AtomicU64,
    timed_out: AtomicU64,
    queued: AtomicU64,
    consecutive_failure: AtomicU64,
    push_applied: AtomicU64,
    push_merged: AtomicU64,
    push_deferred: AtomicU64,
    push_stale: AtomicU64,
    push_malformed: AtomicU64,
    resyncs: AtomicU64,
    notification_polls: AtomicU64,
    last_resync_ms: AtomicU64,
    last_outcome: Mutex<LastOutcome>,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self {
            committed: AtomicU64::new(0),
            rolled_back: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            queued: AtomicU64::new(0),
            consecutive_failure: AtomicU64::new(0),
            push_applied: AtomicU64::new(0),
            push_merged: AtomicU64::new(0),
            push_deferred: AtomicU64::new(0),
            push_stale: AtomicU64::new(0),
            push_malformed: AtomicU64::new(0),
            resyncs: AtomicU64::new(0),
            notification_polls: AtomicU64::new(0),
            last_resync_ms: AtomicU64::new(0),
            last_outcome: Mutex::new(LastOutcome::default()),
        }
    }

    pub fn record_mutation(&self, status: MutationOutcomeStatus) {
        match status {
            MutationOutcomeStatus::Committed => {
                self.committed.fetch_add(1, Ordering::Relaxed);
                self.consecutive_failure.store(0, Ordering::Relaxed);
            }
            MutationOutcomeStatus::RolledBack => {
                self.rolled_back.fetch_add(1, Ordering::Relaxed);
                self.consecutive_failure.fetch_add(1, Ordering::Relaxed);
            }
            MutationOutcomeStatus::TimedOut => {
                self.rolled_back.fetch_add(1, Ordering::Relaxed);
                self.timed_out.fetch_add(1, Ordering::Relaxed);
                self.consecutive_failure.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Ok(mut guard) = self.last_outcome.lock() {
            guard.status = Some(status);
            guard.timestamp_ms = Some(current_unix_ms());
        }
    }

    pub fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_push_applied(&self) {
        self.push_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_push_merged(&self) {
        self.push_merged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_push_deferred(&self) {
        self.push_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_push_stale(&self) {
        self.push_stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_push_malformed(&self) {
        self.push_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resync(&self) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
        self.last_resync_ms
            .store(current_unix_ms(), Ordering::Relaxed);
    }

    pub fn record_notification_poll(&self) {
        self.notification_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        let (last_outcome, last_outcome_ms) = self
            .last_outcome
            .lock()
            .map(|guard| (guard.status, guard.timestamp_ms))
            .unwrap_or((None, None));

        SyncMetricsSnapshot {
            mutations_committed: self.committed.load(Ordering::Relaxed),
            mutations_rolled_back: self.rolled_back.load(Ordering::Relaxed),
            mutations_timed_out: self.timed_out.load(Ordering::Relaxed),
            mutations_queued: self.queued.load(Ordering::Relaxed),
            consecutive_failure: self.consecutive_failure.load(Ordering::Relaxed),
            push_applied: self.push_applied.load(Ordering::Relaxed),
            push_merged: self.push_merged.load(Ordering::Relaxed),
            push_deferred: self.push_deferred.load(Ordering::Relaxed),
            push_stale: self.push_stale.load(Ordering::Relaxed),
            push_malformed: self.push_malformed.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            notification_polls: self.notification_polls.load(Ordering::Relaxed),
            last_outcome,
            last_outcome_ms,
            last_resync_ms: to_option(self.last_resync_ms.load(Ordering::Relaxed)),
        }
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn to_option(value: u64) -> Option<u64> {
    if value == 0 { None } else { Some(value) }
}

fn current_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}
