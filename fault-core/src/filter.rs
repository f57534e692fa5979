//! Per-request entry points handed to the proxy host

use crate::executor::{Decision, FaultExecutor, TimerOutcome};
use crate::host::{metric, FilterHost, RequestId, TimerHandle};
use crate::matcher::{find_first_match, RequestView};
use crate::registry::DelayTimerRegistry;
use crate::store::RuleStore;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// The fault-injection filter as the host sees it.
///
/// Nothing escapes these entry points: a panic anywhere below is caught and
/// the request is let through as if no rule had matched.
pub struct FaultFilter<H: FilterHost> {
    store: Arc<RuleStore>,
    executor: FaultExecutor,
    host: Arc<H>,
}

impl<H: FilterHost> Clone for FaultFilter<H> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            executor: self.executor.clone(),
            host: self.host.clone(),
        }
    }
}

impl<H: FilterHost> FaultFilter<H> {
    pub fn new(store: Arc<RuleStore>, host: Arc<H>) -> Self {
        Self {
            store,
            executor: FaultExecutor::new(DelayTimerRegistry::new()),
            host,
        }
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn registry(&self) -> &DelayTimerRegistry {
        self.executor.registry()
    }

    /// Called once the request headers are available.
    pub fn on_request_headers<R>(&self, request: &R, id: RequestId) -> Decision
    where
        R: RequestView + ?Sized,
    {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            // Pinned for the whole match, whatever gets published meanwhile.
            let rule_set = self.store.current();
            match find_first_match(request, &rule_set) {
                Some(rule) => {
                    self.executor
                        .execute(rule, id, self.host.as_ref(), &mut rand::thread_rng())
                }
                None => Decision::Continue,
            }
        }));

        outcome.unwrap_or_else(|_| {
            error!(request = %id, "Fault filter panicked, passing request through");
            self.count_fault();
            Decision::Continue
        })
    }

    /// Called by the host when a timer set through `FilterHost::set_timer` fires.
    pub fn on_timer(&self, handle: TimerHandle) -> TimerOutcome {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.executor.on_timer(handle, self.host.as_ref())
        }));

        outcome.unwrap_or_else(|_| {
            error!(%handle, "Timer callback panicked");
            self.count_fault();
            TimerOutcome::Miss
        })
    }

    /// Called when the host ends a request before its delay ran out.
    pub fn on_request_cancelled(&self, id: RequestId) {
        let _ = catch_unwind(AssertUnwindSafe(|| self.executor.on_request_cancelled(id)));
    }

    fn count_fault(&self) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            self.host.increment_counter(metric::EXECUTION_FAULTS_TOTAL, 1)
        }));
    }
}
