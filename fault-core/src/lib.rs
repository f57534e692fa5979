//! Fault Core Library
//!
//! This library provides the data plane of the faultline sidecar: rule
//! compilation, hot-swappable rule storage, request matching and fault
//! execution, plus the hudsucker proxy host that embeds them.

/// Declarative rule documents and their compiled form
pub mod compiler;
pub mod policy;
pub mod rules;

/// Request hot path
pub mod executor;
pub mod filter;
pub mod host;
pub mod matcher;
pub mod registry;
pub mod store;

/// Proxy host
pub mod admin;
pub mod ca;
pub mod controller;
pub mod handlers;
pub mod proxy;
pub mod sidecar;

/// Configuration types and utilities
pub mod config;

/// Error types for rule and proxy operations
pub mod error;

/// Rule distribution wire messages
pub mod pb;

pub mod status;

pub use admin::Metrics;
pub use ca::CertificateAuthority;
pub use compiler::{compile, compile_as, compile_rule_set};
pub use config::{BackoffConfig, CertificateConfig, SidecarConfig};
pub use controller::ResumeController;
pub use error::{CompileError, HostError, ProxyError, RuleViolation};
pub use executor::{Decision, FaultExecutor, LocalResponse, TimerOutcome};
pub use filter::FaultFilter;
pub use handlers::FaultHandler;
pub use host::{FilterHost, RequestId, TimerHandle};
pub use matcher::{find_first_match, RequestView};
pub use policy::{RawPolicy, RawRuleSet, WireFormat};
/// Re-export commonly used types
pub use proxy::ProxyServer;
pub use registry::DelayTimerRegistry;
pub use rules::{CompiledRule, CompiledRuleSet, FaultAction, FaultKind, MatchCondition};
pub use sidecar::SidecarHost;
pub use status::{SubscriberStatus, SubscriptionState};
pub use store::RuleStore;

/// Result type alias for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;
