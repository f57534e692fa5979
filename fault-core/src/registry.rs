//! Side table of requests parked by a delay fault
//!
//! A delay is two calls apart: the executor parks the request under a fresh
//! timer handle, asks the host to arm that handle, and later the host reports
//! it as fired. This registry hands out the handles and remembers which
//! request each one belongs to. An entry exists before its timer is armed.

use crate::host::{RequestId, TimerHandle};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// A request waiting for its delay timer.
#[derive(Debug, Clone)]
pub struct SuspendedRequest {
    pub request: RequestId,
    pub rule: String,
    pub delay: Duration,
    pub suspended_at: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct DelayTimerRegistry {
    /// Maps timer handle -> suspended request. Sharded, so inserts from request
    /// processing and removals from timer callbacks rarely contend.
    suspended: Arc<DashMap<TimerHandle, SuspendedRequest>>,
    next_handle: Arc<AtomicU64>,
}

impl DelayTimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `suspended` under a handle that was never handed out before.
    pub fn park(&self, suspended: SuspendedRequest) -> TimerHandle {
        let handle = TimerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        if let Some(stale) = self.suspended.insert(handle, suspended) {
            debug!(%handle, request = %stale.request, "Replaced stale suspended request");
        }
        handle
    }

    /// Take the request parked under `handle`, if it is still there.
    pub fn take(&self, handle: TimerHandle) -> Option<SuspendedRequest> {
        self.suspended.remove(&handle).map(|(_, suspended)| suspended)
    }

    /// Delay of the request parked under `handle`.
    pub fn delay_of(&self, handle: TimerHandle) -> Option<Duration> {
        self.suspended.get(&handle).map(|suspended| suspended.delay)
    }

    /// Drop every entry of a request the host terminated on its own.
    pub fn forget_request(&self, request: RequestId) -> usize {
        let before = self.suspended.len();
        self.suspended.retain(|_, suspended| suspended.request != request);
        before.saturating_sub(self.suspended.len())
    }

    pub fn len(&self) -> usize {
        self.suspended.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suspended.is_empty()
    }
}
