//! Per-user admission control: a token bucket that escalates into a timed
//! block, refilled by one shared sweeper task.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::debug;

const DEFAULT_BURST: u32 = 10;
const DEFAULT_REFILL_MS: u64 = 200;
const DEFAULT_BLOCK_HOURS: i64 = 3;

/// Tunables for the limiter. These are policy, not protocol; any values
/// describing a bounded burst with a fixed refill rate are valid.
#[derive(Clone, Copy, Debug)]
pub struct RatePolicy {
    burst: u32,
    refill: std::time::Duration,
    block: Duration,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            burst: DEFAULT_BURST,
            refill: std::time::Duration::from_millis(DEFAULT_REFILL_MS),
            block: Duration::hours(DEFAULT_BLOCK_HOURS),
        }
    }
}

impl RatePolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    #[must_use]
    pub fn with_refill(mut self, refill: std::time::Duration) -> Self {
        self.refill = refill;
        self
    }

    #[must_use]
    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    #[must_use]
    pub fn burst(&self) -> u32 {
        self.burst
    }

    #[must_use]
    pub fn refill(&self) -> std::time::Duration {
        self.refill
    }

    #[must_use]
    pub fn block(&self) -> Duration {
        self.block
    }
}

/// Decision for one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Blocked,
    /// The block has lapsed relative to the identity's recorded activity.
    /// Reported exactly once; the caller must force re-authentication.
    UnblockDue,
}

#[derive(Default)]
struct Inner {
    // user id -> tokens left; a bucket is born full and never exceeds burst
    buckets: HashMap<i64, u32>,
    blocked: HashMap<i64, DateTime<Utc>>,
}

/// Shared limiter state. One sweeper tops up every bucket, so retiring an
/// identity is a map removal and nothing can leak a task.
#[derive(Clone)]
pub struct AdmissionLimiter {
    inner: Arc<RwLock<Inner>>,
    policy: RatePolicy,
}

impl AdmissionLimiter {
    #[must_use]
    pub fn new(policy: RatePolicy) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> RatePolicy {
        self.policy
    }

    /// Try to admit one request for a user. `last_activity` is the
    /// session's recorded activity, not wall-clock now: a dormant identity
    /// stays blocked until it actually comes back.
    pub async fn try_admit(&self, user_id: i64, last_activity: DateTime<Utc>) -> Admission {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        if let Some(blocked_at) = inner.blocked.get(&user_id).copied() {
            if last_activity - blocked_at >= self.policy.block {
                inner.blocked.remove(&user_id);
                inner.buckets.remove(&user_id);
                debug!(user_id, "admission block lapsed");
                return Admission::UnblockDue;
            }
            return Admission::Blocked;
        }

        let tokens = inner.buckets.entry(user_id).or_insert(self.policy.burst);
        if *tokens > 0 {
            *tokens -= 1;
            Admission::Allowed
        } else {
            inner.blocked.insert(user_id, Utc::now());
            debug!(user_id, "admission bucket exhausted, blocking");
            Admission::Blocked
        }
    }

    /// Drop all limiter state for an identity. Called when the user's last
    /// session goes away.
    pub async fn retire(&self, user_id: i64) {
        let mut guard = self.inner.write().await;
        guard.buckets.remove(&user_id);
        guard.blocked.remove(&user_id);
    }

    /// One sweep of the shared refill: every bucket gains one token, capped
    /// at the burst size.
    pub async fn refill_once(&self) {
        let mut guard = self.inner.write().await;
        for tokens in guard.buckets.values_mut() {
            if *tokens < self.policy.burst {
                *tokens += 1;
            }
        }
    }

    /// The refill task. Runs for the life of the process and stops when the
    /// shutdown channel fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.policy.refill);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.refill_once().await,
                _ = shutdown.changed() => break,
            }
        }
    }
}
