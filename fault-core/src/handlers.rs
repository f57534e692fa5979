use crate::error::HostError;
use crate::controller::ResumeSignal;
use crate::executor::{Decision, LocalResponse};
use crate::filter::FaultFilter;
use crate::host::{metric, FilterHost, RequestId, TimerHandle};
use crate::matcher::RequestView;
use crate::sidecar::SidecarHost;
use hudsucker::{
    hyper::{Body, Request, Response},
    HttpContext, HttpHandler, RequestOrResponse,
};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Borrowed view of a hyper request, for matching.
pub struct HyperRequestView<'a> {
    req: &'a Request<Body>,
}

impl<'a> HyperRequestView<'a> {
    pub fn new(req: &'a Request<Body>) -> Self {
        Self { req }
    }
}

impl RequestView for HyperRequestView<'_> {
    fn method(&self) -> &str {
        self.req.method().as_str()
    }

    fn path(&self) -> &str {
        self.req.uri().path()
    }

    fn header(&self, name: &str) -> Option<&[u8]> {
        self.req.headers().get(name).map(|value| value.as_bytes())
    }
}

/// Turn an abort into the hyper response sent back to the client.
pub fn build_response(local: &LocalResponse) -> Result<Response<Body>, HostError> {
    let mut builder = Response::builder().status(local.status);
    for (name, value) in &local.headers {
        builder = builder.header(*name, value.as_str());
    }
    let body = match &local.body {
        Some(text) => Body::from(text.clone()),
        None => Body::empty(),
    };
    builder
        .body(body)
        .map_err(|e| HostError::ResponseBuild(e.to_string()))
}

/// Proxy handler that runs every request through the fault filter.
#[derive(Clone)]
pub struct FaultHandler {
    filter: FaultFilter<SidecarHost>,
    /// How much longer than its delay a request waits for the resume signal
    resume_grace: Duration,
}

impl FaultHandler {
    pub fn new(filter: FaultFilter<SidecarHost>, resume_grace: Duration) -> Self {
        Self {
            filter,
            resume_grace,
        }
    }

    async fn hold(&self, id: RequestId, handle: TimerHandle, signal: ResumeSignal) {
        let host = self.filter.host();
        let metrics = host.metrics();
        // Gone already if the timer fired; the signal is then ready too.
        let delay = self.filter.registry().delay_of(handle).unwrap_or_default();

        metrics.suspended_requests.fetch_add(1, Ordering::Relaxed);
        let mut guard = SuspensionGuard {
            filter: &self.filter,
            id,
            armed: true,
        };

        match timeout(delay + self.resume_grace, signal.wait()).await {
            Ok(()) => debug!(request = %id, %handle, "Delayed request released"),
            Err(_) => {
                metrics.resume_timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(request = %id, %handle, ?delay, "Resume never arrived, releasing request");
                self.filter.on_request_cancelled(id);
            }
        }

        guard.armed = false;
        host.controller().forget(id);
        metrics.suspended_requests.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Cleans up after a parked request whose future was dropped by the proxy.
struct SuspensionGuard<'a> {
    filter: &'a FaultFilter<SidecarHost>,
    id: RequestId,
    armed: bool,
}

impl Drop for SuspensionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(request = %self.id, "Delayed request dropped before resume");
            self.filter.on_request_cancelled(self.id);
            let host = self.filter.host();
            host.controller().forget(self.id);
            host.metrics().suspended_requests.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

#[async_trait::async_trait]
impl HttpHandler for FaultHandler {
    async fn handle_request(&mut self, _ctx: &HttpContext, req: Request<Body>) -> RequestOrResponse {
        self.filter
            .host()
            .metrics()
            .total_requests
            .fetch_add(1, Ordering::Relaxed);

        let id = RequestId::new();
        let controller = self.filter.host().controller();
        let signal = controller.register(id);
        let decision = self
            .filter
            .on_request_headers(&HyperRequestView::new(&req), id);
        if !matches!(decision, Decision::Suspend(_)) {
            controller.forget(id);
        }

        match decision {
            Decision::Continue => RequestOrResponse::Request(req),
            Decision::Terminate(local) => match build_response(&local) {
                Ok(res) => {
                    info!(request = %id, method = %req.method(), uri = %req.uri(), status = local.status, "Aborted request");
                    RequestOrResponse::Response(res)
                }
                Err(e) => {
                    self.filter
                        .host()
                        .increment_counter(metric::EXECUTION_FAULTS_TOTAL, 1);
                    warn!(request = %id, error = %e, "Abort response could not be built, forwarding request");
                    RequestOrResponse::Request(req)
                }
            },
            Decision::Suspend(handle) => {
                self.hold(id, handle, signal).await;
                RequestOrResponse::Request(req)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::FAULT_MARKER_HEADER;

    #[test]
    fn test_view_reads_path_without_query() {
        let req = Request::builder()
            .method("PATCH")
            .uri("http://example.com/api/items?page=2")
            .header("X-Tenant", "blue")
            .body(Body::empty())
            .unwrap();
        let view = HyperRequestView::new(&req);

        assert_eq!(view.method(), "PATCH");
        assert_eq!(view.path(), "/api/items");
        assert_eq!(view.header("x-tenant"), Some(&b"blue"[..]));
        assert_eq!(view.header("x-missing"), None);
    }

    #[test]
    fn test_build_abort_response() {
        let local = LocalResponse {
            status: 503,
            headers: vec![
                (FAULT_MARKER_HEADER, "abort".to_string()),
                ("content-type", "text/plain".to_string()),
            ],
            body: Some("unavailable".to_string()),
        };

        let res = build_response(&local).unwrap();
        assert_eq!(res.status().as_u16(), 503);
        assert_eq!(res.headers()[FAULT_MARKER_HEADER], "abort");
        assert_eq!(res.headers()["content-type"], "text/plain");
    }

    #[test]
    fn test_bad_header_value_fails_build() {
        let local = LocalResponse {
            status: 500,
            headers: vec![(FAULT_MARKER_HEADER, "line\nbreak".to_string())],
            body: None,
        };
        assert!(matches!(build_response(&local), Err(HostError::ResponseBuild(_))));
    }
}
