//! Wire-format fault policies
//!
//! These are the declarative documents streamed by the control plane. They are
//! only ever read by the compiler, which turns them into matchable rules.

use crate::error::CompileError;
use serde::{Deserialize, Serialize};

/// Serialization used by a rule-set payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WireFormat {
    #[default]
    Json,
    Yaml,
}

impl WireFormat {
    /// Guess the format of a payload: JSON documents open with `{`.
    pub fn detect(payload: &[u8]) -> Self {
        match payload.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => WireFormat::Json,
            _ => WireFormat::Yaml,
        }
    }
}

/// A complete rule set as authored by an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRuleSet {
    pub version: String,
    #[serde(default)]
    pub rules: Vec<RawPolicy>,
}

/// One declared rule: when to fire and what to inject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPolicy {
    pub name: String,
    #[serde(default, rename = "match")]
    pub matches: Option<RawMatch>,
    pub fault: RawFault,
}

/// Match conditions; every absent part is satisfied by any request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawMatch {
    #[serde(default)]
    pub path: Option<RawStringMatch>,
    #[serde(default)]
    pub method: Option<RawStringMatch>,
    #[serde(default)]
    pub headers: Vec<RawHeaderMatch>,
}

/// A string matcher; exactly one field is expected to be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStringMatch {
    #[serde(default)]
    pub exact: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub regex: Option<String>,
}

/// A header matcher. With no value matcher it only checks presence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawHeaderMatch {
    pub name: String,
    #[serde(default)]
    pub exact: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub regex: Option<String>,
}

impl RawHeaderMatch {
    /// False for a bare presence check.
    pub fn has_value_matcher(&self) -> bool {
        self.exact.is_some() || self.prefix.is_some() || self.regex.is_some()
    }
}

/// The fault to inject. `percentage` is kept wide so out-of-range values
/// surface as rule violations rather than decode errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawFault {
    pub percentage: i64,
    #[serde(default)]
    pub abort: Option<RawAbort>,
    #[serde(default)]
    pub delay: Option<RawDelay>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawAbort {
    pub status: i64,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawDelay {
    pub duration: String,
}

impl RawRuleSet {
    /// Decode a payload in the given format, preserving rule order.
    pub fn decode(payload: &[u8], format: WireFormat) -> Result<Self, CompileError> {
        match format {
            WireFormat::Json => serde_json::from_slice(payload)
                .map_err(|e| CompileError::Malformed(e.to_string())),
            WireFormat::Yaml => serde_yaml::from_slice(payload)
                .map_err(|e| CompileError::Malformed(e.to_string())),
        }
    }
}
