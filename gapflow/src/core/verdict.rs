//! Gate verdicts and their extraction from free-form task output.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// The decision produced by the gate task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Proceed straight to the report.
    Go,
    /// Needs a revision pass.
    Hold,
    /// Rejected by the gate.
    No,
    /// No verdict marker could be parsed.
    Unknown,
}

impl Default for Verdict {
    fn default() -> Self {
        Self::Unknown
    }
}

impl Verdict {
    /// Returns false only for `Unknown`.
    #[must_use]
    pub fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Combines the verdict extracted after revision with the one before it.
    ///
    /// An unparsable recheck keeps the earlier decision.
    #[must_use]
    pub fn after_revision(prior: Self, recheck: Self) -> Self {
        if recheck.is_known() {
            recheck
        } else {
            prior
        }
    }

    /// Returns the marker form written into report context, e.g. `LANDING_GO`.
    #[must_use]
    pub fn as_marker(self) -> &'static str {
        match self {
            Self::Go => "LANDING_GO",
            Self::Hold => "LANDING_HOLD",
            Self::No => "LANDING_NO",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Go => write!(f, "GO"),
            Self::Hold => write!(f, "HOLD"),
            Self::No => write!(f, "NO"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Parses a verdict out of gate task output.
///
/// Implementations must be pure: the same text always yields the same verdict.
pub trait VerdictExtractor: Send + Sync {
    /// Extracts the verdict, returning `Verdict::Unknown` when none is present.
    fn extract(&self, text: &str) -> Verdict;
}

/// Default extractor matching `VERDICT: <value>` markers.
///
/// Accepts `GO`, `HOLD` and `NO` behind a required `LANDING_` or
/// `VALIDATION_` prefix, case-insensitively. Falls back to the legacy
/// `PASS` (GO) and `FAIL` (NO) markers when no current marker is found.
/// A bare `VERDICT: GO` is prose, not a marker, and yields `Unknown`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerVerdictExtractor;

#[allow(clippy::expect_used)]
fn marker_patterns() -> &'static (Regex, Regex) {
    static PATTERNS: OnceLock<(Regex, Regex)> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        // Both patterns are literals.
        let current = Regex::new(r"(?i)VERDICT\s*:\s*(?:LANDING_|VALIDATION_)(GO|HOLD|NO)\b")
            .expect("verdict pattern compiles");
        let legacy = Regex::new(r"(?i)VERDICT\s*:\s*(PASS|FAIL)\b")
            .expect("legacy verdict pattern compiles");
        (current, legacy)
    })
}

impl VerdictExtractor for MarkerVerdictExtractor {
    fn extract(&self, text: &str) -> Verdict {
        let (current, legacy) = marker_patterns();

        if let Some(caps) = current.captures(text) {
            return match caps[1].to_ascii_uppercase().as_str() {
                "GO" => Verdict::Go,
                "HOLD" => Verdict::Hold,
                _ => Verdict::No,
            };
        }
        if let Some(caps) = legacy.captures(text) {
            return if caps[1].eq_ignore_ascii_case("PASS") {
                Verdict::Go
            } else {
                Verdict::No
            };
        }

        tracing::debug!(chars = text.len(), "No verdict marker found; treating as UNKNOWN");
        Verdict::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str) -> Verdict {
        MarkerVerdictExtractor.extract(text)
    }

    #[test]
    fn test_prefixed_markers() {
        assert_eq!(extract("VERDICT: LANDING_GO"), Verdict::Go);
        assert_eq!(extract("blah\nVERDICT : VALIDATION_HOLD\nmore"), Verdict::Hold);
        assert_eq!(extract("verdict:landing_no"), Verdict::No);
    }

    #[test]
    fn test_bare_words_are_not_markers() {
        assert_eq!(extract("Final VERDICT: GO"), Verdict::Unknown);
        assert_eq!(extract("VERDICT: hold"), Verdict::Unknown);
    }

    #[test]
    fn test_prose_after_verdict_is_unknown() {
        assert_eq!(extract("VERDICT: No consensus could be reached on this idea"), Verdict::Unknown);
        assert_eq!(extract("Final verdict: go-to-market plan still unclear"), Verdict::Unknown);
        assert_eq!(extract("verdict: hold on, more data needed"), Verdict::Unknown);
    }

    #[test]
    fn test_legacy_markers() {
        assert_eq!(extract("✅ VERDICT: PASS"), Verdict::Go);
        assert_eq!(extract("❌ VERDICT: FAIL"), Verdict::No);
    }

    #[test]
    fn test_current_marker_wins_over_legacy() {
        assert_eq!(extract("VERDICT: PASS\nVERDICT: LANDING_HOLD"), Verdict::Hold);
    }

    #[test]
    fn test_word_boundary_prevents_partial_match() {
        assert_eq!(extract("VERDICT: LANDING_GOOD"), Verdict::Unknown);
        assert_eq!(extract("VERDICT: VALIDATION_NOTHING"), Verdict::Unknown);
        assert_eq!(extract("VERDICT: LANDING_HOLDING"), Verdict::Unknown);
    }

    #[test]
    fn test_unparsable_is_unknown() {
        assert_eq!(extract(""), Verdict::Unknown);
        assert_eq!(extract("looks promising overall"), Verdict::Unknown);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let text = "analysis...\nVERDICT: LANDING_HOLD\n";
        assert_eq!(extract(text), extract(text));
    }

    #[test]
    fn test_after_revision_keeps_prior_on_unknown() {
        assert_eq!(Verdict::after_revision(Verdict::Hold, Verdict::Unknown), Verdict::Hold);
        assert_eq!(Verdict::after_revision(Verdict::Hold, Verdict::Go), Verdict::Go);
    }

    #[test]
    fn test_display_and_marker() {
        assert_eq!(Verdict::No.to_string(), "NO");
        assert_eq!(Verdict::Go.as_marker(), "LANDING_GO");
        assert_eq!(serde_json::to_string(&Verdict::Hold).unwrap(), "\"HOLD\"");
    }
}
