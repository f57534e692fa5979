//! Configuration types and utilities

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Static sidecar startup configuration.
/// These settings are set at startup and do not change during runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// Address to listen on
    pub listen_address: String,
    /// Port to listen on
    pub listen_port: u16,
    /// Admin API port
    pub admin_port: u16,
    /// Rule distribution endpoint of the control plane
    pub control_plane_endpoint: String,
    /// Identity reported to the control plane; empty until the agent fills it in
    pub node_id: String,
    /// Certificate configuration
    pub certificate_config: CertificateConfig,
    /// Reconnect policy of the rule subscription
    pub backoff: BackoffConfig,
    /// Extra time a delayed request waits for its resume before it is let through anyway
    pub resume_grace_ms: u64,
    /// Rules file published before the first control-plane update arrives
    pub bootstrap_rules: Option<PathBuf>,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1".to_string(),
            listen_port: 8080,
            admin_port: 9091,
            control_plane_endpoint: "http://127.0.0.1:9090".to_string(),
            node_id: String::new(),
            certificate_config: CertificateConfig::default(),
            backoff: BackoffConfig::default(),
            resume_grace_ms: 1_000,
            bootstrap_rules: None,
        }
    }
}

impl SidecarConfig {
    pub fn resume_grace(&self) -> Duration {
        Duration::from_millis(self.resume_grace_ms)
    }
}

/// Certificate configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateConfig {
    /// Path to store generated certificates
    pub cert_store_path: String,
    /// Root CA validity in days
    pub validity_days: u32,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            cert_store_path: "./certs".to_string(),
            validity_days: 3650,
        }
    }
}

/// Exponential backoff between reconnect attempts.
///
/// Attempts are unbounded; only the per-attempt delay is capped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction of the delay that jitter may take off, within 0.0..=1.0
    pub jitter_factor: f64,
    pub connect_timeout_ms: u64,
    /// A subscription that delivers nothing for this long counts as lost
    pub first_update_timeout_ms: u64,
    /// HTTP/2 keepalive ping interval on the control-plane channel
    pub keepalive_interval_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_factor: 0.2,
            connect_timeout_ms: 5_000,
            first_update_timeout_ms: 30_000,
            keepalive_interval_ms: 15_000,
        }
    }
}

impl BackoffConfig {
    /// Calculate the delay before reconnect attempt `attempt` (0-indexed)
    ///
    /// `min(max_delay, base_delay * 2^attempt)`, then shortened by a random
    /// share of up to `jitter_factor`, so the result never exceeds `max_delay`.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for_attempt<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let capped = self.capped_delay_ms(attempt);
        let jitter = self.jitter_factor.clamp(0.0, 1.0);
        let scaled = if jitter > 0.0 {
            capped as f64 * (1.0 - jitter * rng.gen::<f64>())
        } else {
            capped as f64
        };
        Duration::from_millis(scaled.round() as u64)
    }

    /// The delay before jitter.
    pub fn capped_delay_ms(&self, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX);
        self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn first_update_timeout(&self) -> Duration {
        Duration::from_millis(self.first_update_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}
