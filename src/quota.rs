use crate::errors::AppError;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running request counter checked against the monthly quota.
///
/// Reservations are atomic so concurrent detail fetches never overshoot
/// the limit.
#[derive(Debug)]
pub struct RequestQuota {
    limit: u64,
    used: AtomicU64,
}

impl RequestQuota {
    pub fn new(limit: u64) -> Self {
        Self::with_used(limit, 0)
    }

    /// Restore a counter, e.g. from a checkpoint.
    pub fn with_used(limit: u64, used: u64) -> Self {
        Self {
            limit,
            used: AtomicU64::new(used),
        }
    }

    /// Reserve one request, refusing when it would exceed the limit.
    pub fn try_acquire(&self) -> Result<u64, AppError> {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.limit).then_some(used + 1)
            })
            .map(|previous| previous + 1)
            .map_err(|used| AppError::QuotaExhausted {
                used,
                limit: self.limit,
            })
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used())
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}
