//! Request matching against the active rule set
//!
//! Runs on every proxied request, so it never allocates, never logs and never
//! fails: a condition that cannot be evaluated just does not match.

use crate::rules::{CompiledRule, CompiledRuleSet, HeaderMatcher, MatchCondition};

/// Read-only access to the parts of a request that rules can look at.
pub trait RequestView {
    fn method(&self) -> &str;

    /// Path component of the request URI, without the query string.
    fn path(&self) -> &str;

    /// Raw value of the first header with this name. `name` is lowercase;
    /// implementations must look it up case-insensitively.
    fn header(&self, name: &str) -> Option<&[u8]>;
}

/// Return the first rule, in declaration order, whose conditions all hold.
pub fn find_first_match<'a, R>(request: &R, rule_set: &'a CompiledRuleSet) -> Option<&'a CompiledRule>
where
    R: RequestView + ?Sized,
{
    rule_set
        .rules()
        .iter()
        .find(|rule| condition_holds(&rule.condition, request))
}

/// Evaluate one condition, cheapest checks first: method, path, headers.
pub fn condition_holds<R>(condition: &MatchCondition, request: &R) -> bool
where
    R: RequestView + ?Sized,
{
    if let Some(method) = &condition.method {
        if !request.method().eq_ignore_ascii_case(method) {
            return false;
        }
    }

    if let Some(path) = &condition.path {
        if !path.matches(request.path()) {
            return false;
        }
    }

    condition
        .headers
        .iter()
        .all(|header| header_holds(header, request))
}

fn header_holds<R>(matcher: &HeaderMatcher, request: &R) -> bool
where
    R: RequestView + ?Sized,
{
    let Some(raw) = request.header(&matcher.name) else {
        return false;
    };
    match &matcher.value {
        None => true,
        Some(value) => match std::str::from_utf8(raw) {
            Ok(text) => value.matches(text),
            Err(_) => false,
        },
    }
}
