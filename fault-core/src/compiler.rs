//! Rule-set compiler
//!
//! Turns a wire payload into a [`CompiledRuleSet`]. Compilation is pure and
//! all-or-nothing: one bad rule rejects the whole payload, so a partially
//! valid set can never become active.

use crate::error::{CompileError, RuleViolation};
use crate::policy::{RawFault, RawHeaderMatch, RawPolicy, RawRuleSet, RawStringMatch, WireFormat};
use crate::rules::{
    CompiledRule, CompiledRuleSet, FaultAction, FaultKind, HeaderMatcher, MatchCondition,
    StringMatcher,
};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

/// Compile a payload, sniffing whether it is JSON or YAML.
pub fn compile(payload: &[u8]) -> Result<CompiledRuleSet, CompileError> {
    compile_as(payload, WireFormat::detect(payload))
}

/// Compile a payload whose format is known.
pub fn compile_as(payload: &[u8], format: WireFormat) -> Result<CompiledRuleSet, CompileError> {
    let raw = RawRuleSet::decode(payload, format)?;
    compile_rule_set(&raw)
}

/// Compile an already-decoded rule set.
pub fn compile_rule_set(raw: &RawRuleSet) -> Result<CompiledRuleSet, CompileError> {
    let mut seen: HashMap<&str, usize> = HashMap::with_capacity(raw.rules.len());
    let mut rules = Vec::with_capacity(raw.rules.len());

    for (index, policy) in raw.rules.iter().enumerate() {
        let invalid = |violation| CompileError::InvalidRule {
            index,
            name: policy.name.clone(),
            violation,
        };

        if policy.name.trim().is_empty() {
            return Err(invalid(RuleViolation::EmptyName));
        }
        if let Some(&first_index) = seen.get(policy.name.as_str()) {
            return Err(invalid(RuleViolation::DuplicateName { first_index }));
        }
        seen.insert(policy.name.as_str(), index);

        rules.push(compile_policy(policy).map_err(invalid)?);
    }

    Ok(CompiledRuleSet::new(raw.version.clone(), rules))
}

fn compile_policy(policy: &RawPolicy) -> Result<CompiledRule, RuleViolation> {
    let action = compile_fault(&policy.fault)?;

    let mut condition = MatchCondition::default();
    if let Some(matches) = &policy.matches {
        if let Some(method) = &matches.method {
            condition.method = Some(compile_method(method)?);
        }
        if let Some(path) = &matches.path {
            condition.path = Some(compile_string_matcher(Field::Path, path.into())?);
        }
        for header in &matches.headers {
            let name = header.name.trim();
            if name.is_empty() {
                return Err(RuleViolation::EmptyHeaderName);
            }
            let value = if header.has_value_matcher() {
                Some(compile_string_matcher(Field::Header(name), header.into())?)
            } else {
                None
            };
            condition.headers.push(HeaderMatcher {
                name: name.to_ascii_lowercase(),
                value,
            });
        }
    }

    Ok(CompiledRule {
        name: policy.name.clone(),
        condition,
        action,
    })
}

fn compile_fault(fault: &RawFault) -> Result<FaultAction, RuleViolation> {
    let percentage = u8::try_from(fault.percentage)
        .ok()
        .filter(|p| *p <= 100)
        .ok_or(RuleViolation::PercentageOutOfRange(fault.percentage))?;

    let kind = match (&fault.abort, &fault.delay) {
        (None, None) => return Err(RuleViolation::MissingAction),
        (Some(_), Some(_)) => return Err(RuleViolation::ConflictingActions),
        (Some(abort), None) => {
            let status = u16::try_from(abort.status)
                .ok()
                .filter(|s| (200..=599).contains(s))
                .ok_or(RuleViolation::InvalidStatus(abort.status))?;
            FaultKind::Abort {
                status,
                body: abort.body.clone(),
            }
        }
        (None, Some(delay)) => {
            let delay_ms =
                parse_duration_ms(&delay.duration).map_err(|reason| RuleViolation::InvalidDuration {
                    value: delay.duration.clone(),
                    reason,
                })?;
            FaultKind::Delay { delay_ms }
        }
    };

    Ok(FaultAction { percentage, kind })
}

fn compile_method(raw: &RawStringMatch) -> Result<String, RuleViolation> {
    if raw.prefix.is_some() || raw.regex.is_some() {
        return Err(RuleViolation::UnsupportedMethodMatcher);
    }
    match &raw.exact {
        Some(method) if !method.trim().is_empty() => Ok(method.trim().to_ascii_uppercase()),
        _ => Err(RuleViolation::EmptyMatcher {
            field: "method".to_string(),
        }),
    }
}

/// The request part a matcher reads; only rendered into error messages.
#[derive(Debug, Clone, Copy)]
enum Field<'a> {
    Path,
    Header(&'a str),
}

impl fmt::Display for Field<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Path => f.write_str("path"),
            Field::Header(name) => write!(f, "header {name}"),
        }
    }
}

/// Borrowed exact/prefix/regex triple of a path or header matcher.
struct MatcherParts<'a> {
    exact: Option<&'a String>,
    prefix: Option<&'a String>,
    regex: Option<&'a String>,
}

impl<'a> From<&'a RawStringMatch> for MatcherParts<'a> {
    fn from(raw: &'a RawStringMatch) -> Self {
        Self {
            exact: raw.exact.as_ref(),
            prefix: raw.prefix.as_ref(),
            regex: raw.regex.as_ref(),
        }
    }
}

impl<'a> From<&'a RawHeaderMatch> for MatcherParts<'a> {
    fn from(raw: &'a RawHeaderMatch) -> Self {
        Self {
            exact: raw.exact.as_ref(),
            prefix: raw.prefix.as_ref(),
            regex: raw.regex.as_ref(),
        }
    }
}

fn compile_string_matcher(field: Field<'_>, raw: MatcherParts<'_>) -> Result<StringMatcher, RuleViolation> {
    match (raw.exact, raw.prefix, raw.regex) {
        (Some(exact), None, None) => Ok(StringMatcher::Exact(exact.clone())),
        (None, Some(prefix), None) => Ok(StringMatcher::Prefix(prefix.clone())),
        (None, None, Some(pattern)) => Regex::new(&format!("^(?:{pattern})$"))
            .map(StringMatcher::Regex)
            .map_err(|e| RuleViolation::InvalidRegex {
                field: field.to_string(),
                pattern: pattern.clone(),
                reason: e.to_string(),
            }),
        (None, None, None) => Err(RuleViolation::EmptyMatcher {
            field: field.to_string(),
        }),
        _ => Err(RuleViolation::AmbiguousMatcher {
            field: field.to_string(),
        }),
    }
}

/// Parse a duration such as `250ms`, `1.5s`, `2m` or `1h` into milliseconds.
pub fn parse_duration_ms(input: &str) -> Result<u64, String> {
    let input = input.trim();
    let unit_start = input
        .find(|c: char| c.is_ascii_alphabetic())
        .ok_or_else(|| "missing unit suffix (ms, s, m or h)".to_string())?;
    let (number, unit) = input.split_at(unit_start);

    let multiplier = match unit {
        "ms" => 1.0,
        "s" => 1_000.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        other => return Err(format!("unknown unit {other:?}")),
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("{:?} is not a number", number.trim()))?;
    if !value.is_finite() || value < 0.0 {
        return Err("duration must be a finite, non-negative number".to_string());
    }

    let millis = (value * multiplier).round();
    if millis >= u64::MAX as f64 {
        return Err("duration is too large".to_string());
    }
    let millis = millis as u64;
    if millis == 0 {
        return Err("duration must be at least 1ms".to_string());
    }
    Ok(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_violation(payload: &str) -> RuleViolation {
        match compile(payload.as_bytes()) {
            Err(CompileError::InvalidRule { violation, .. }) => violation,
            other => panic!("expected an invalid rule, got {:?}", other),
        }
    }

    #[test]
    fn test_compile_preserves_order_and_version() {
        let set = compile(
            br#"{"version": "42", "rules": [
                {"name": "first", "fault": {"percentage": 5, "abort": {"status": 503, "body": "down"}}},
                {"name": "second", "match": {"method": {"exact": "get"}},
                 "fault": {"percentage": 100, "delay": {"duration": "1.5s"}}}
            ]}"#,
        )
        .unwrap();

        assert_eq!(set.version(), "42");
        assert_eq!(set.len(), 2);
        assert_eq!(set.rules()[0].name, "first");
        assert_eq!(
            set.rules()[0].action.kind,
            FaultKind::Abort {
                status: 503,
                body: Some("down".to_string())
            }
        );
        assert_eq!(set.rules()[1].condition.method.as_deref(), Some("GET"));
        assert_eq!(set.rules()[1].action.kind, FaultKind::Delay { delay_ms: 1500 });
    }

    #[test]
    fn test_percentage_out_of_range() {
        let violation = invalid_violation(
            r#"{"version": "1", "rules": [
                {"name": "too-much", "fault": {"percentage": 150, "abort": {"status": 500}}}
            ]}"#,
        );
        assert_eq!(violation, RuleViolation::PercentageOutOfRange(150));

        let violation = invalid_violation(
            r#"{"version": "1", "rules": [
                {"name": "negative", "fault": {"percentage": -1, "abort": {"status": 500}}}
            ]}"#,
        );
        assert_eq!(violation, RuleViolation::PercentageOutOfRange(-1));
    }

    #[test]
    fn test_action_must_be_exactly_one() {
        let violation = invalid_violation(
            r#"{"version": "1", "rules": [{"name": "none", "fault": {"percentage": 10}}]}"#,
        );
        assert_eq!(violation, RuleViolation::MissingAction);

        let violation = invalid_violation(
            r#"{"version": "1", "rules": [{"name": "both", "fault": {"percentage": 10,
                "abort": {"status": 500}, "delay": {"duration": "1s"}}}]}"#,
        );
        assert_eq!(violation, RuleViolation::ConflictingActions);
    }

    #[test]
    fn test_error_reports_position() {
        let err = compile(
            br#"{"version": "1", "rules": [
                {"name": "ok", "fault": {"percentage": 10, "abort": {"status": 500}}},
                {"name": "bad-regex", "match": {"path": {"regex": "(unclosed"}},
                 "fault": {"percentage": 10, "abort": {"status": 500}}}
            ]}"#,
        )
        .unwrap_err();

        match err {
            CompileError::InvalidRule {
                index,
                name,
                violation: RuleViolation::InvalidRegex { field, .. },
            } => {
                assert_eq!(index, 1);
                assert_eq!(name, "bad-regex");
                assert_eq!(field, "path");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_header_matcher_errors_name_the_header() {
        let violation = invalid_violation(
            r#"{"version": "1", "rules": [{"name": "x",
                "match": {"headers": [{"name": "X-Canary", "regex": "[oops"}]},
                "fault": {"percentage": 10, "abort": {"status": 500}}}]}"#,
        );
        match violation {
            RuleViolation::InvalidRegex { field, pattern, .. } => {
                assert_eq!(field, "header X-Canary");
                assert_eq!(pattern, "[oops");
            }
            other => panic!("unexpected violation: {other:?}"),
        }

        let violation = invalid_violation(
            r#"{"version": "1", "rules": [{"name": "x",
                "match": {"headers": [{"name": "x-tenant", "exact": "a", "prefix": "b"}]},
                "fault": {"percentage": 10, "abort": {"status": 500}}}]}"#,
        );
        assert_eq!(
            violation,
            RuleViolation::AmbiguousMatcher {
                field: "header x-tenant".to_string()
            }
        );
    }

    #[test]
    fn test_matcher_shape_validation() {
        let violation = invalid_violation(
            r#"{"version": "1", "rules": [{"name": "x",
                "match": {"path": {"exact": "/a", "prefix": "/b"}},
                "fault": {"percentage": 10, "abort": {"status": 500}}}]}"#,
        );
        assert!(matches!(violation, RuleViolation::AmbiguousMatcher { .. }));

        let violation = invalid_violation(
            r#"{"version": "1", "rules": [{"name": "x",
                "match": {"path": {}},
                "fault": {"percentage": 10, "abort": {"status": 500}}}]}"#,
        );
        assert!(matches!(violation, RuleViolation::EmptyMatcher { .. }));

        let violation = invalid_violation(
            r#"{"version": "1", "rules": [{"name": "x",
                "match": {"method": {"prefix": "PO"}},
                "fault": {"percentage": 10, "abort": {"status": 500}}}]}"#,
        );
        assert_eq!(violation, RuleViolation::UnsupportedMethodMatcher);
    }

    #[test]
    fn test_duplicate_and_empty_names() {
        let violation = invalid_violation(
            r#"{"version": "1", "rules": [
                {"name": "dup", "fault": {"percentage": 10, "abort": {"status": 500}}},
                {"name": "dup", "fault": {"percentage": 10, "abort": {"status": 500}}}
            ]}"#,
        );
        assert_eq!(violation, RuleViolation::DuplicateName { first_index: 0 });

        let violation = invalid_violation(
            r#"{"version": "1", "rules": [{"name": " ", "fault": {"percentage": 10, "abort": {"status": 500}}}]}"#,
        );
        assert_eq!(violation, RuleViolation::EmptyName);
    }

    #[test]
    fn test_status_range() {
        let violation = invalid_violation(
            r#"{"version": "1", "rules": [{"name": "x", "fault": {"percentage": 10, "abort": {"status": 99}}}]}"#,
        );
        assert_eq!(violation, RuleViolation::InvalidStatus(99));
    }

    #[test]
    fn test_header_names_lowercased_and_presence() {
        let set = compile(
            b"
version: '3'
rules:
  - name: canary
    match:
      headers:
        - name: X-Canary
          prefix: yes
        - name: X-Debug
    fault:
      percentage: 100
      abort: { status: 500 }
",
        )
        .unwrap();

        let headers = &set.rules()[0].condition.headers;
        assert_eq!(headers[0].name, "x-canary");
        assert!(headers[0].value.is_some());
        assert_eq!(headers[1].name, "x-debug");
        assert!(headers[1].value.is_none());
    }

    #[test]
    fn test_malformed_payload() {
        assert!(matches!(
            compile(b"{not json"),
            Err(CompileError::Malformed(_))
        ));
        assert!(matches!(
            compile(br#"{"version": "1", "rules": [{"name": "x", "fault": {"percentage": 12.5, "abort": {"status": 500}}}]}"#),
            Err(CompileError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration_ms("100ms"), Ok(100));
        assert_eq!(parse_duration_ms(" 2s "), Ok(2_000));
        assert_eq!(parse_duration_ms("0.25s"), Ok(250));
        assert_eq!(parse_duration_ms("1m"), Ok(60_000));
        assert_eq!(parse_duration_ms("1h"), Ok(3_600_000));

        assert!(parse_duration_ms("100").is_err());
        assert!(parse_duration_ms("ms").is_err());
        assert!(parse_duration_ms("5d").is_err());
        assert!(parse_duration_ms("0s").is_err());
        assert!(parse_duration_ms("-1s").is_err());
    }

    #[test]
    fn test_empty_rule_list() {
        let set = compile(br#"{"version": "empty"}"#).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.version(), "empty");
    }
}
