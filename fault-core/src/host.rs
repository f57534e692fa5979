//! Callbacks the engine needs from the proxy it is embedded in

use crate::error::HostError;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Metric names emitted by the engine.
pub mod metric {
    /// Counter: abort faults that produced a local response.
    pub const ABORTS_TOTAL: &str = "faultline_aborts_total";
    /// Counter: delay faults that suspended a request.
    pub const DELAYS_TOTAL: &str = "faultline_delays_total";
    /// Histogram: length of each injected delay, in milliseconds.
    pub const DELAY_DURATION_MS: &str = "faultline_delay_duration_ms";
    /// Counter: faults that failed to execute and fell back to passthrough.
    pub const EXECUTION_FAULTS_TOTAL: &str = "faultline_execution_faults_total";
}

/// Opaque handle of a delay timer, issued by the [`DelayTimerRegistry`].
///
/// [`DelayTimerRegistry`]: crate::registry::DelayTimerRegistry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Identity of one in-flight request, assigned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The proxy host as seen from the engine.
///
/// Calls come from request-processing context, so implementations must not
/// block: a timer is scheduled and reported back later through
/// `FaultFilter::on_timer`, never waited on.
pub trait FilterHost: Send + Sync {
    /// Arrange for `on_timer(handle)` to be called once `delay` has elapsed.
    ///
    /// The request is already parked under `handle` when this is called, so
    /// the timer may fire before `set_timer` returns.
    fn set_timer(&self, handle: TimerHandle, delay: Duration) -> Result<(), HostError>;

    /// Let a suspended request continue to its upstream.
    fn resume(&self, request: RequestId) -> Result<(), HostError>;

    fn increment_counter(&self, name: &'static str, by: u64);

    fn record_histogram(&self, name: &'static str, value: u64);
}
