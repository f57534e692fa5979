//! Long-lived subscription to the control plane's rule stream
//!
//! `Idle -> Connecting -> Streaming -> Backoff -> Connecting -> ...`, forever.
//! Every update is compiled and published as a whole; a payload that fails to
//! compile is dropped and the rule set already in force stays active.

use async_trait::async_trait;
use fault_core::pb::RuleSetUpdate;
use fault_core::{compile_as, BackoffConfig, RuleStore, SubscriberStatus, SubscriptionState};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

/// Loss of the connection to the control plane.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("stream failed: {0}")]
    Stream(String),

    #[error("stream closed by the control plane")]
    Closed,

    #[error("undecodable update: {0}")]
    Decode(String),

    #[error("no rule-set update within {0:?}")]
    Silent(Duration),
}

/// Updates of one open subscription. The stream ending means the server closed it.
pub type UpdateStream = Pin<Box<dyn Stream<Item = Result<RuleSetUpdate, TransportError>> + Send>>;

/// Where rule-set updates come from.
#[async_trait]
pub trait RuleSource: Send + Sync {
    /// Open a subscription. `last_version` is the version this node already runs.
    async fn subscribe(&self, last_version: Option<String>) -> Result<UpdateStream, TransportError>;
}

pub struct ConfigSubscriber<S> {
    source: S,
    store: Arc<RuleStore>,
    backoff: BackoffConfig,
    status_tx: watch::Sender<SubscriberStatus>,
    rng: Box<dyn RngCore + Send>,
    attempt: u32,
}

impl<S: RuleSource> ConfigSubscriber<S> {
    pub fn new(source: S, store: Arc<RuleStore>, backoff: BackoffConfig) -> Self {
        let (status_tx, _) = watch::channel(SubscriberStatus::default());
        Self {
            source,
            store,
            backoff,
            status_tx,
            rng: Box::new(StdRng::from_entropy()),
            attempt: 0,
        }
    }

    /// Use a specific jitter source.
    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = Box::new(rng);
        self
    }

    pub fn status(&self) -> watch::Receiver<SubscriberStatus> {
        self.status_tx.subscribe()
    }

    /// Keep the store fed until the task is dropped. Never gives up.
    pub async fn run(mut self) {
        loop {
            self.transition(SubscriptionState::Connecting, None);
            let last_version = Some(self.store.version()).filter(|v| !v.is_empty());

            let silent_after = self.backoff.first_update_timeout();
            let subscribed = timeout(silent_after, self.source.subscribe(last_version)).await;
            let lost = match subscribed {
                Ok(Ok(stream)) => self.stream(stream).await,
                Ok(Err(e)) => e,
                Err(_) => TransportError::Silent(silent_after),
            };
            warn!(error = %lost, attempt = self.attempt, "Rule subscription lost");

            let delay = self.backoff.delay_for_attempt(self.attempt, &mut self.rng);
            self.attempt = self.attempt.saturating_add(1);
            self.transition(SubscriptionState::Backoff, Some(delay));
            info!(?delay, attempt = self.attempt, "Reconnecting to control plane after backoff");
            tokio::time::sleep(delay).await;
        }
    }

    /// Drain one subscription. Returns why it ended.
    async fn stream(&mut self, mut updates: UpdateStream) -> TransportError {
        // The connection only counts once it delivers something.
        let silent_after = self.backoff.first_update_timeout();
        let first = match timeout(silent_after, updates.next()).await {
            Ok(next) => next,
            Err(_) => return TransportError::Silent(silent_after),
        };
        match first {
            Some(Ok(update)) => {
                self.attempt = 0;
                self.transition(SubscriptionState::Streaming, None);
                info!("Rule stream established");
                self.apply(update);
            }
            Some(Err(e)) => return e,
            None => return TransportError::Closed,
        }

        loop {
            match updates.next().await {
                Some(Ok(update)) => self.apply(update),
                Some(Err(e)) => return e,
                None => return TransportError::Closed,
            }
        }
    }

    /// Compile and publish one update; keep the current set if it is invalid.
    fn apply(&mut self, update: RuleSetUpdate) {
        match compile_as(&update.payload, update.wire_format()) {
            Ok(rule_set) => {
                if rule_set.version() != update.version {
                    warn!(
                        event_version = %update.version,
                        payload_version = %rule_set.version(),
                        "Update version differs from payload version, using payload version"
                    );
                }
                let version = rule_set.version().to_string();
                self.store.publish(rule_set);
                self.status_tx.send_modify(|status| {
                    status.active_version = Some(version);
                    status.updates_applied += 1;
                });
            }
            Err(e) => {
                warn!(
                    version = %update.version,
                    error = %e,
                    active_version = %self.store.version(),
                    "Rejected rule-set update, keeping active rule set"
                );
                self.status_tx.send_modify(|status| status.updates_rejected += 1);
            }
        }
    }

    fn transition(&self, state: SubscriptionState, next_delay: Option<Duration>) {
        let attempt = self.attempt;
        self.status_tx.send_modify(|status| {
            debug!(from = %status.state, to = %state, attempt, "Subscriber state change");
            status.state = state;
            status.attempt = attempt;
            status.next_delay = next_delay;
        });
    }
}
