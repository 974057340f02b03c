//! Review verdict parsing and the acceptance policy.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::response::strip_code_fences;
use crate::core::types::TestResults;

/// Structured verdict returned by the reviewing model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    #[serde(default)]
    pub patch_accepted: bool,
    #[serde(default)]
    pub feedback: String,
}

/// Parse `{"patch_accepted": bool, "feedback": "..."}` from a model response.
pub fn parse_verdict(response: &str) -> Result<Verdict> {
    serde_json::from_str(strip_code_fences(response)).context("parse review verdict")
}

/// Decide whether a change is kept.
///
/// A change is only kept when the tests ran and passed and, if required, the
/// reviewer approved it. `Err` carries the rejection reason.
pub fn acceptance(
    tests: Option<&TestResults>,
    verdict: Option<&Verdict>,
    require_model_approval: bool,
) -> Result<(), String> {
    let Some(tests) = tests else {
        return Err("no test results".to_string());
    };
    if !tests.passed {
        return Err(format!("tests {}", tests.summary()));
    }
    if !require_model_approval {
        return Ok(());
    }
    match verdict {
        Some(v) if v.patch_accepted => Ok(()),
        Some(v) if v.feedback.trim().is_empty() => Err("reviewer declined".to_string()),
        Some(v) => Err(format!("reviewer declined: {}", v.feedback.trim())),
        None => Err("no review verdict".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passed() -> TestResults {
        TestResults {
            passed: true,
            exit_code: Some(0),
            ..TestResults::default()
        }
    }

    #[test]
    fn parses_fenced_verdict() {
        let verdict =
            parse_verdict("```json\n{\"patch_accepted\": true, \"feedback\": \"lgtm\"}\n```")
                .expect("parse");
        assert!(verdict.patch_accepted);
        assert_eq!(verdict.feedback, "lgtm");
    }

    #[test]
    fn failing_tests_always_reject() {
        let failed = TestResults {
            passed: false,
            exit_code: Some(1),
            ..TestResults::default()
        };
        let approve = Verdict {
            patch_accepted: true,
            feedback: String::new(),
        };
        let reason = acceptance(Some(&failed), Some(&approve), true).unwrap_err();
        assert!(reason.contains("failed"));
        assert!(acceptance(None, Some(&approve), false).is_err());
    }

    #[test]
    fn approval_policy() {
        let decline = Verdict {
            patch_accepted: false,
            feedback: "too broad".to_string(),
        };
        assert_eq!(
            acceptance(Some(&passed()), Some(&decline), true),
            Err("reviewer declined: too broad".to_string())
        );
        assert!(acceptance(Some(&passed()), None, false).is_ok());
        assert!(acceptance(Some(&passed()), None, true).is_err());
    }
}
