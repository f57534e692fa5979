//! Observable state of the rule subscription

use serde::Serialize;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Backoff,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubscriptionState::Idle => "idle",
            SubscriptionState::Connecting => "connecting",
            SubscriptionState::Streaming => "streaming",
            SubscriptionState::Backoff => "backoff",
        };
        f.write_str(name)
    }
}

/// Snapshot published by the subscriber on every transition.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SubscriberStatus {
    pub state: SubscriptionState,
    /// Consecutive failed connection attempts.
    pub attempt: u32,
    /// Wait before the next attempt, set while in backoff.
    #[serde(serialize_with = "serialize_millis")]
    pub next_delay: Option<Duration>,
    /// Version of the last update the subscriber published.
    pub active_version: Option<String>,
    pub updates_applied: u64,
    pub updates_rejected: u64,
}

fn serialize_millis<S: serde::Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(delay) => serializer.serialize_some(&(delay.as_millis() as u64)),
        None => serializer.serialize_none(),
    }
}
