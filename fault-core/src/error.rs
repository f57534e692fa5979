//! Error types for the fault-injection engine and its proxy host

use thiserror::Error;

/// A rule-set payload that cannot become an active rule set.
///
/// Always non-fatal: the caller keeps the previously published set.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The payload is not a well-formed rule-set document
    #[error("malformed rule set payload: {0}")]
    Malformed(String),

    /// One rule failed validation; the whole update is rejected
    #[error("rule #{index} ({name:?}) is invalid: {violation}")]
    InvalidRule {
        index: usize,
        name: String,
        violation: RuleViolation,
    },
}

/// Why a single rule was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleViolation {
    #[error("rule name must not be empty")]
    EmptyName,

    #[error("rule name is already used by rule #{first_index}")]
    DuplicateName { first_index: usize },

    #[error("percentage {0} is outside 0..=100")]
    PercentageOutOfRange(i64),

    #[error("fault declares neither abort nor delay")]
    MissingAction,

    #[error("fault declares both abort and delay")]
    ConflictingActions,

    #[error("abort status {0} is outside 200..=599")]
    InvalidStatus(i64),

    #[error("invalid delay duration {value:?}: {reason}")]
    InvalidDuration { value: String, reason: String },

    #[error("{field} regex {pattern:?} does not compile: {reason}")]
    InvalidRegex {
        field: String,
        pattern: String,
        reason: String,
    },

    #[error("{field} matcher must set exactly one of exact, prefix or regex")]
    AmbiguousMatcher { field: String },

    #[error("{field} matcher sets none of exact, prefix or regex")]
    EmptyMatcher { field: String },

    #[error("method matcher only supports exact")]
    UnsupportedMethodMatcher,

    #[error("header matcher name must not be empty")]
    EmptyHeaderName,
}

/// Failures reported by the host callbacks the engine relies on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("timer could not be scheduled: {0}")]
    TimerUnavailable(String),

    #[error("no suspended request {0} to resume")]
    ResumeTargetGone(String),

    #[error("local response could not be built: {0}")]
    ResponseBuild(String),
}

/// Main error type for proxy host operations
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Rule set error: {0}")]
    RuleSet(#[from] CompileError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
