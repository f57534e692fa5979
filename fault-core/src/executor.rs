//! Probability gate and fault execution
//!
//! `execute` decides what happens to a request that matched a rule. Aborts
//! are answered locally, delays are split into a suspend now and a resume
//! later, keyed by the host timer handle in the [`DelayTimerRegistry`].

use crate::error::HostError;
use crate::host::{metric, FilterHost, RequestId, TimerHandle};
use crate::registry::{DelayTimerRegistry, SuspendedRequest};
use crate::rules::{CompiledRule, FaultKind};
use rand::Rng;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Marker header set on every synthesized abort response.
pub const FAULT_MARKER_HEADER: &str = "x-fault-injected";

/// A response produced by an abort fault instead of forwarding upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<String>,
}

impl LocalResponse {
    fn abort(status: u16, body: Option<String>) -> Self {
        let mut headers = vec![(FAULT_MARKER_HEADER, "abort".to_string())];
        if body.is_some() {
            headers.push(("content-type", "text/plain".to_string()));
        }
        Self {
            status,
            headers,
            body,
        }
    }
}

/// What the host should do with the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Forward the request untouched.
    Continue,
    /// Answer with this response; the upstream is never contacted.
    Terminate(LocalResponse),
    /// Hold the request until the timer fires.
    Suspend(TimerHandle),
}

/// Result of one timer callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    Resumed(RequestId),
    /// The request was gone already; nothing to do.
    Miss,
    /// The host refused to resume the request.
    ResumeFailed(RequestId),
}

/// Roll a number in `[0, 100)` and fire if it falls below `percentage`.
pub fn gate_passes<R: Rng + ?Sized>(percentage: u8, rng: &mut R) -> bool {
    match percentage {
        0 => false,
        p if p >= 100 => true,
        p => rng.gen_range(0u8..100) < p,
    }
}

#[derive(Debug, Clone, Default)]
pub struct FaultExecutor {
    registry: DelayTimerRegistry,
}

impl FaultExecutor {
    pub fn new(registry: DelayTimerRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &DelayTimerRegistry {
        &self.registry
    }

    /// Run the matched rule for one request.
    ///
    /// Never fails: anything that goes wrong on the way (for example the host
    /// has no timer to give) turns into [`Decision::Continue`].
    pub fn execute<H, R>(
        &self,
        rule: &CompiledRule,
        request: RequestId,
        host: &H,
        rng: &mut R,
    ) -> Decision
    where
        H: FilterHost + ?Sized,
        R: Rng + ?Sized,
    {
        if !gate_passes(rule.action.percentage, rng) {
            return Decision::Continue;
        }

        match &rule.action.kind {
            FaultKind::Abort { status, body } => {
                host.increment_counter(metric::ABORTS_TOTAL, 1);
                debug!(rule = %rule.name, %request, status, "Injecting abort");
                Decision::Terminate(LocalResponse::abort(*status, body.clone()))
            }
            FaultKind::Delay { delay_ms } => {
                match self.suspend(rule, request, Duration::from_millis(*delay_ms), host) {
                    Ok(handle) => {
                        host.increment_counter(metric::DELAYS_TOTAL, 1);
                        host.record_histogram(metric::DELAY_DURATION_MS, *delay_ms);
                        debug!(rule = %rule.name, %request, %handle, delay_ms, "Injecting delay");
                        Decision::Suspend(handle)
                    }
                    Err(e) => {
                        host.increment_counter(metric::EXECUTION_FAULTS_TOTAL, 1);
                        warn!(rule = %rule.name, %request, error = %e, "Delay not injected, passing request through");
                        Decision::Continue
                    }
                }
            }
        }
    }

    fn suspend<H>(
        &self,
        rule: &CompiledRule,
        request: RequestId,
        delay: Duration,
        host: &H,
    ) -> Result<TimerHandle, HostError>
    where
        H: FilterHost + ?Sized,
    {
        let handle = self.registry.park(SuspendedRequest {
            request,
            rule: rule.name.clone(),
            delay,
            suspended_at: Instant::now(),
        });
        // Unparks on an error or a panic inside the host.
        let parked = Parked {
            registry: &self.registry,
            handle,
            armed: false,
        };
        host.set_timer(handle, delay)?;
        parked.arm();
        Ok(handle)
    }

    /// Timer callback: resume whichever request was parked under `handle`.
    pub fn on_timer<H>(&self, handle: TimerHandle, host: &H) -> TimerOutcome
    where
        H: FilterHost + ?Sized,
    {
        let Some(suspended) = self.registry.take(handle) else {
            debug!(%handle, "Timer fired for a request that is already gone");
            return TimerOutcome::Miss;
        };

        match host.resume(suspended.request) {
            Ok(()) => {
                debug!(
                    %handle,
                    request = %suspended.request,
                    rule = %suspended.rule,
                    waited_ms = suspended.suspended_at.elapsed().as_millis() as u64,
                    "Resumed delayed request"
                );
                TimerOutcome::Resumed(suspended.request)
            }
            Err(HostError::ResumeTargetGone(_)) => {
                debug!(%handle, request = %suspended.request, "Delayed request went away before resume");
                TimerOutcome::Miss
            }
            Err(e) => {
                host.increment_counter(metric::EXECUTION_FAULTS_TOTAL, 1);
                warn!(%handle, request = %suspended.request, error = %e, "Failed to resume delayed request");
                TimerOutcome::ResumeFailed(suspended.request)
            }
        }
    }

    /// Forget the parked entries of a request the host ended on its own.
    pub fn on_request_cancelled(&self, request: RequestId) -> usize {
        self.registry.forget_request(request)
    }
}

/// A registry entry whose timer is not armed yet.
struct Parked<'a> {
    registry: &'a DelayTimerRegistry,
    handle: TimerHandle,
    armed: bool,
}

impl Parked<'_> {
    fn arm(mut self) {
        self.armed = true;
    }
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        if !self.armed {
            self.registry.take(self.handle);
        }
    }
}
