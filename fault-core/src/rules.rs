//! Compiled, matchable rules
//!
//! Everything in here is built once by the compiler and then only read. A
//! `CompiledRuleSet` is never mutated after construction; updates replace it.

use regex::Regex;
use std::time::Duration;

/// A pre-built string predicate.
#[derive(Debug, Clone)]
pub enum StringMatcher {
    Exact(String),
    Prefix(String),
    /// Anchored at both ends, so the whole value must match.
    Regex(Regex),
}

impl StringMatcher {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            StringMatcher::Exact(expected) => value == expected,
            StringMatcher::Prefix(prefix) => value.starts_with(prefix.as_str()),
            StringMatcher::Regex(re) => re.is_match(value),
        }
    }
}

/// Header condition. Names are stored lowercased.
#[derive(Debug, Clone)]
pub struct HeaderMatcher {
    pub name: String,
    /// `None` means the header only has to be present.
    pub value: Option<StringMatcher>,
}

/// All conditions of a rule; an absent part is always satisfied.
#[derive(Debug, Clone, Default)]
pub struct MatchCondition {
    pub method: Option<String>,
    pub path: Option<StringMatcher>,
    pub headers: Vec<HeaderMatcher>,
}

/// What a rule injects once its probability gate passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultKind {
    Abort { status: u16, body: Option<String> },
    Delay { delay_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultAction {
    /// Chance in percent, always within 0..=100.
    pub percentage: u8,
    pub kind: FaultKind,
}

impl FaultAction {
    pub fn delay(&self) -> Option<Duration> {
        match self.kind {
            FaultKind::Delay { delay_ms } => Some(Duration::from_millis(delay_ms)),
            FaultKind::Abort { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub name: String,
    pub condition: MatchCondition,
    pub action: FaultAction,
}

/// An ordered, immutable rule set. The first matching rule wins.
#[derive(Debug, Clone, Default)]
pub struct CompiledRuleSet {
    version: String,
    rules: Vec<CompiledRule>,
}

impl CompiledRuleSet {
    pub fn new(version: impl Into<String>, rules: Vec<CompiledRule>) -> Self {
        Self {
            version: version.into(),
            rules,
        }
    }

    /// The set that is active before any update landed: matches nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
