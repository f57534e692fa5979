//! Tokio-backed [`FilterHost`] used by the standalone sidecar proxy

use crate::admin::Metrics;
use crate::controller::ResumeController;
use crate::error::HostError;
use crate::executor::TimerOutcome;
use crate::filter::FaultFilter;
use crate::host::{FilterHost, RequestId, TimerHandle};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Host callbacks on top of the tokio runtime.
///
/// Timers are spawned sleeps that post their handle on a channel; the
/// dispatcher returned next to the host feeds them back into the filter.
#[derive(Debug)]
pub struct SidecarHost {
    fired_tx: mpsc::UnboundedSender<TimerHandle>,
    controller: ResumeController,
    metrics: Arc<Metrics>,
}

impl SidecarHost {
    pub fn new(metrics: Arc<Metrics>) -> (Self, TimerDispatcher) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let host = Self {
            fired_tx,
            controller: ResumeController::new(),
            metrics,
        };
        (host, TimerDispatcher { fired_rx })
    }

    pub fn controller(&self) -> &ResumeController {
        &self.controller
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

impl FilterHost for SidecarHost {
    fn set_timer(&self, handle: TimerHandle, delay: Duration) -> Result<(), HostError> {
        let runtime = Handle::try_current().map_err(|e| HostError::TimerUnavailable(e.to_string()))?;
        if self.fired_tx.is_closed() {
            return Err(HostError::TimerUnavailable("timer dispatcher stopped".into()));
        }

        let fired_tx = self.fired_tx.clone();
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = fired_tx.send(handle);
        });
        Ok(())
    }

    fn resume(&self, request: RequestId) -> Result<(), HostError> {
        if self.controller.resume(request) {
            Ok(())
        } else {
            Err(HostError::ResumeTargetGone(request.to_string()))
        }
    }

    fn increment_counter(&self, name: &'static str, by: u64) {
        self.metrics.increment(name, by);
    }

    fn record_histogram(&self, name: &'static str, value: u64) {
        self.metrics.observe(name, value);
    }
}

/// Receiving end of fired timers.
#[derive(Debug)]
pub struct TimerDispatcher {
    fired_rx: mpsc::UnboundedReceiver<TimerHandle>,
}

impl TimerDispatcher {
    /// Deliver fired timers to `filter`. Runs until the task is dropped.
    pub async fn run(mut self, filter: FaultFilter<SidecarHost>) {
        info!("Timer dispatcher started");
        while let Some(handle) = self.fired_rx.recv().await {
            if let TimerOutcome::Miss = filter.on_timer(handle) {
                filter.host().metrics.registry_misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        debug!("Timer dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::executor::Decision;
    use crate::matcher::RequestView;
    use crate::store::RuleStore;

    struct Get(&'static str);

    impl RequestView for Get {
        fn method(&self) -> &str {
            "GET"
        }

        fn path(&self) -> &str {
            self.0
        }

        fn header(&self, _name: &str) -> Option<&[u8]> {
            None
        }
    }

    fn delayed_filter() -> (FaultFilter<SidecarHost>, TimerDispatcher) {
        let store = Arc::new(RuleStore::new());
        store.publish(
            compile(
                br#"{"version": "d", "rules": [{"name": "slow", "match": {"path": {"prefix": "/slow"}},
                    "fault": {"percentage": 100, "delay": {"duration": "100ms"}}}]}"#,
            )
            .unwrap(),
        );
        let (host, dispatcher) = SidecarHost::new(Arc::new(Metrics::default()));
        (FaultFilter::new(store, Arc::new(host)), dispatcher)
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_resumes_after_timer() {
        let (filter, dispatcher) = delayed_filter();
        tokio::spawn(dispatcher.run(filter.clone()));

        let id = RequestId::new();
        let started = tokio::time::Instant::now();
        let signal = filter.host().controller().register(id);
        let Decision::Suspend(_) = filter.on_request_headers(&Get("/slow"), id) else {
            panic!("expected Suspend");
        };
        signal.wait().await;

        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(filter.registry().is_empty());
        assert_eq!(filter.host().metrics().delays_total.load(Ordering::Relaxed), 1);
        assert_eq!(filter.host().metrics().delay_histogram.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_request_counts_miss() {
        let (filter, dispatcher) = delayed_filter();
        tokio::spawn(dispatcher.run(filter.clone()));

        let id = RequestId::new();
        let Decision::Suspend(_) = filter.on_request_headers(&Get("/slow"), id) else {
            panic!("expected Suspend");
        };
        filter.on_request_cancelled(id);

        tokio::time::sleep(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;
        assert_eq!(filter.host().metrics().registry_misses.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_after_handler_gave_up_is_a_miss() {
        let (filter, dispatcher) = delayed_filter();
        tokio::spawn(dispatcher.run(filter.clone()));

        let id = RequestId::new();
        let signal = filter.host().controller().register(id);
        let Decision::Suspend(_) = filter.on_request_headers(&Get("/slow"), id) else {
            panic!("expected Suspend");
        };
        // The handler stopped waiting but the timer is still armed.
        drop(signal);
        filter.host().controller().forget(id);

        tokio::time::sleep(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;
        assert_eq!(filter.host().metrics().registry_misses.load(Ordering::Relaxed), 1);
        assert_eq!(filter.host().controller().pending(), 0);
        assert!(filter.registry().is_empty());
    }

    #[test]
    fn test_no_runtime_means_no_timer() {
        let (host, _dispatcher) = SidecarHost::new(Arc::new(Metrics::default()));
        assert!(matches!(
            host.set_timer(TimerHandle(1), Duration::from_millis(1)),
            Err(HostError::TimerUnavailable(_))
        ));
    }
}
