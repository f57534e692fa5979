use crate::host::metric;
use crate::status::SubscriberStatus;
use crate::store::RuleStore;
use crate::Result;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::watch;
use tracing::{debug, info};

/// Upper bounds (ms) of the delay histogram buckets; one overflow bucket follows.
pub const DELAY_BUCKETS_MS: [u64; 9] = [10, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000];

/// Shared state for metrics
#[derive(Debug, Default)]
pub struct Metrics {
    pub total_requests: AtomicU64,
    pub suspended_requests: AtomicU64,
    pub aborts_total: AtomicU64,
    pub delays_total: AtomicU64,
    pub execution_faults_total: AtomicU64,
    pub registry_misses: AtomicU64,
    pub resume_timeouts: AtomicU64,
    pub delay_histogram: DelayHistogram,
}

impl Metrics {
    /// Bump the counter registered under `name`.
    pub fn increment(&self, name: &str, by: u64) {
        let counter = match name {
            metric::ABORTS_TOTAL => &self.aborts_total,
            metric::DELAYS_TOTAL => &self.delays_total,
            metric::EXECUTION_FAULTS_TOTAL => &self.execution_faults_total,
            other => {
                debug!(metric = other, "Ignoring unknown counter");
                return;
            }
        };
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn observe(&self, name: &str, value: u64) {
        if name == metric::DELAY_DURATION_MS {
            self.delay_histogram.observe(value);
        } else {
            debug!(metric = name, "Ignoring unknown histogram");
        }
    }
}

#[derive(Debug, Default)]
pub struct DelayHistogram {
    buckets: [AtomicU64; DELAY_BUCKETS_MS.len() + 1],
    sum: AtomicU64,
    count: AtomicU64,
}

impl DelayHistogram {
    pub fn observe(&self, value_ms: u64) {
        let slot = DELAY_BUCKETS_MS
            .iter()
            .position(|bound| value_ms <= *bound)
            .unwrap_or(DELAY_BUCKETS_MS.len());
        self.buckets[slot].fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value_ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let buckets = self
            .buckets
            .iter()
            .enumerate()
            .map(|(i, bucket)| BucketSnapshot {
                le: DELAY_BUCKETS_MS.get(i).copied(),
                count: bucket.load(Ordering::Relaxed),
            })
            .collect();
        HistogramSnapshot {
            buckets,
            sum: self.sum.load(Ordering::Relaxed),
            count: self.count(),
        }
    }
}

/// What the admin endpoints read from.
#[derive(Clone)]
pub struct AdminState {
    pub metrics: Arc<Metrics>,
    pub store: Arc<RuleStore>,
    pub subscriber: watch::Receiver<SubscriberStatus>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    rule_set_version: String,
    rules: usize,
    subscriber: SubscriberStatus,
}

#[derive(Serialize)]
struct MetricsResponse {
    total_requests: u64,
    suspended_requests: u64,
    faults: FaultMetrics,
    rule_updates: RuleUpdateMetrics,
}

#[derive(Serialize)]
struct FaultMetrics {
    #[serde(rename = "faultline_aborts_total")]
    aborts_total: u64,
    #[serde(rename = "faultline_delays_total")]
    delays_total: u64,
    #[serde(rename = "faultline_execution_faults_total")]
    execution_faults_total: u64,
    #[serde(rename = "faultline_delay_duration_ms")]
    delay_duration_ms: HistogramSnapshot,
    registry_misses: u64,
    resume_timeouts: u64,
}

#[derive(Serialize)]
struct RuleUpdateMetrics {
    applied: u64,
    rejected: u64,
}

#[derive(Serialize)]
struct HistogramSnapshot {
    buckets: Vec<BucketSnapshot>,
    sum: u64,
    count: u64,
}

#[derive(Serialize)]
struct BucketSnapshot {
    /// `None` for the overflow bucket
    le: Option<u64>,
    count: u64,
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

pub async fn start_admin_server(port: u16, state: AdminState) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting Admin API on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        crate::error::ProxyError::Network(format!("Failed to bind admin port {}: {}", port, e))
    })?;

    axum::serve(listener, admin_router(state))
        .await
        .map_err(|e| crate::error::ProxyError::Network(format!("Admin server failed: {}", e)))?;

    Ok(())
}

async fn health_handler(State(state): State<AdminState>) -> Json<HealthResponse> {
    let rule_set = state.store.current();
    Json(HealthResponse {
        status: "ok".to_string(),
        rule_set_version: rule_set.version().to_string(),
        rules: rule_set.len(),
        subscriber: state.subscriber.borrow().clone(),
    })
}

async fn metrics_handler(State(state): State<AdminState>) -> Json<MetricsResponse> {
    let metrics = &state.metrics;
    let (applied, rejected) = {
        let status = state.subscriber.borrow();
        (status.updates_applied, status.updates_rejected)
    };

    Json(MetricsResponse {
        total_requests: metrics.total_requests.load(Ordering::Relaxed),
        suspended_requests: metrics.suspended_requests.load(Ordering::Relaxed),
        faults: FaultMetrics {
            aborts_total: metrics.aborts_total.load(Ordering::Relaxed),
            delays_total: metrics.delays_total.load(Ordering::Relaxed),
            execution_faults_total: metrics.execution_faults_total.load(Ordering::Relaxed),
            delay_duration_ms: metrics.delay_histogram.snapshot(),
            registry_misses: metrics.registry_misses.load(Ordering::Relaxed),
            resume_timeouts: metrics.resume_timeouts.load(Ordering::Relaxed),
        },
        rule_updates: RuleUpdateMetrics { applied, rejected },
    })
}
