//! Pure matching functions: semver constraint checking and tag scoring.
//!
//! Nothing here touches the store; these two pure functions define all
//! version and tag matching semantics.

use semver::{Version, VersionReq};
use tracing::debug;

use crate::model::TagExpr;

/// Check whether `provider_version` satisfies `constraint`.
///
/// 1. Empty constraint matches anything.
/// 2. Empty provider version with a non-empty constraint never matches.
/// 3. Both parseable as semver: standard constraint semantics.
/// 4. Parse failure on either side: fall back to exact string equality.
pub fn match_version(provider_version: &str, constraint: &str) -> bool {
    if constraint.is_empty() {
        return true;
    }
    if provider_version.is_empty() {
        return false;
    }

    match (Version::parse(provider_version), VersionReq::parse(constraint)) {
        (Ok(version), Ok(req)) => req.matches(&version),
        _ => {
            debug!(
                "version match fallback to string equality: '{}' vs constraint '{}'",
                provider_version, constraint
            );
            provider_version == constraint
        }
    }
}

/// Score and match a provider's tags against a flat required list and any
/// number of OR-groups.
///
/// Returns `(matches, score)`. Score only ranks among candidates that
/// already match; a non-matching candidate always scores 0.
pub fn match_tags(
    provider_tags: &[String],
    required: &[TagExpr],
    or_groups: &[Vec<TagExpr>],
) -> (bool, i64) {
    let mut score: i64 = 0;

    for expr in required {
        match eval_single(expr, provider_tags) {
            EvalResult::HardFail => return (false, 0),
            EvalResult::Score(s) => score += s,
        }
    }

    for group in or_groups {
        match eval_group(group, provider_tags) {
            None => return (false, 0),
            Some(s) => score += s,
        }
    }

    (true, score)
}

enum EvalResult {
    HardFail,
    Score(i64),
}

fn eval_single(expr: &TagExpr, provider_tags: &[String]) -> EvalResult {
    match expr {
        TagExpr::Excluded(tag) => {
            if provider_tags.iter().any(|t| t == tag) {
                EvalResult::HardFail
            } else {
                EvalResult::Score(0)
            }
        }
        TagExpr::Preferred(tag) => {
            if provider_tags.iter().any(|t| t == tag) {
                EvalResult::Score(10)
            } else {
                EvalResult::Score(0)
            }
        }
        TagExpr::Required(tag) => {
            if provider_tags.iter().any(|t| t == tag) {
                EvalResult::Score(5)
            } else {
                EvalResult::HardFail
            }
        }
    }
}

/// Evaluate one OR-group: at least one non-excluded entry must match; an
/// excluded hit anywhere in the group fails the whole group. Score is the
/// max over matched entries.
fn eval_group(group: &[TagExpr], provider_tags: &[String]) -> Option<i64> {
    let mut best: Option<i64> = None;
    for expr in group {
        match expr {
            TagExpr::Excluded(tag) => {
                if provider_tags.iter().any(|t| t == tag) {
                    return None;
                }
            }
            TagExpr::Preferred(tag) => {
                if provider_tags.iter().any(|t| t == tag) {
                    best = Some(best.map_or(10, |b| b.max(10)));
                }
            }
            TagExpr::Required(tag) => {
                if provider_tags.iter().any(|t| t == tag) {
                    best = Some(best.map_or(5, |b| b.max(5)));
                }
            }
        }
    }
    // An OR-group with only excluded entries that all pass (no hard fail)
    // still needs at least one non-excluded match.
    if best.is_none() && !group.iter().all(|e| matches!(e, TagExpr::Excluded(_))) {
        return None;
    }
    Some(best.unwrap_or(0))
}
