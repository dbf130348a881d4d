//! Harness declaration: how many times a test runs and what its output must satisfy.

use serde::Deserialize;
use std::fmt;

/// Output expectations shared by every run of one test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Expectations {
    /// Every run must write byte-identical stderr.
    #[serde(default)]
    pub matching_stderr: bool,
}

/// Declared by a test and consumed by the external harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessDeclaration {
    /// Each run gets a fresh sandbox instance.
    pub runs: u32,
    #[serde(default)]
    pub expect: Expectations,
}

impl Default for HarnessDeclaration {
    fn default() -> Self {
        Self {
            runs: 1,
            expect: Expectations::default(),
        }
    }
}

#[derive(Debug)]
pub enum DeclarationError {
    Parse(serde_json::Error),
    ZeroRuns,
}

impl fmt::Display for DeclarationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclarationError::Parse(err) => write!(f, "invalid harness declaration: {err}"),
            DeclarationError::ZeroRuns => write!(f, "harness declaration must request at least 1 run"),
        }
    }
}

impl std::error::Error for DeclarationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeclarationError::Parse(err) => Some(err),
            DeclarationError::ZeroRuns => None,
        }
    }
}

impl HarnessDeclaration {
    /// Parse and validate a JSON declaration such as
    /// `{"runs": 2, "expect": {"matching_stderr": true}}`.
    ///
    /// # Errors
    ///
    /// Malformed JSON, unknown keys, or `runs == 0`.
    pub fn from_json(text: &str) -> Result<Self, DeclarationError> {
        let declaration: Self = serde_json::from_str(text).map_err(DeclarationError::Parse)?;
        declaration.validate()?;
        Ok(declaration)
    }

    /// # Errors
    ///
    /// [`DeclarationError::ZeroRuns`] when no run is requested.
    pub fn validate(&self) -> Result<(), DeclarationError> {
        if self.runs == 0 {
            return Err(DeclarationError::ZeroRuns);
        }
        Ok(())
    }

    /// True when the harness will compare stderr across more than one run.
    #[must_use]
    pub fn compares_runs(&self) -> bool {
        self.expect.matching_stderr && self.runs > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn parses_two_run_matching_stderr_declaration() {
        let declaration =
            HarnessDeclaration::from_json(r#"{"runs": 2, "expect": {"matching_stderr": true}}"#)
                .expect("valid declaration");
        assert_eq!(declaration.runs, 2);
        assert!(declaration.expect.matching_stderr);
        assert!(declaration.compares_runs());
    }

    #[test]
    fn expectations_default_to_off() {
        let declaration = HarnessDeclaration::from_json(r#"{"runs": 3}"#).expect("valid");
        assert_eq!(declaration.expect, Expectations::default());
        assert!(!declaration.compares_runs());
    }

    #[rstest]
    #[case(r#"{"runs": 0}"#)]
    #[case(r#"{"expect": {"matching_stderr": true}}"#)]
    #[case(r#"{"runs": 2, "retries": 1}"#)]
    #[case("not json")]
    fn rejects_invalid_declarations(#[case] text: &str) {
        assert!(HarnessDeclaration::from_json(text).is_err());
    }

    #[test]
    fn zero_runs_has_readable_message() {
        let err = HarnessDeclaration::from_json(r#"{"runs": 0}"#).unwrap_err();
        assert_eq!(
            err.to_string(),
            "harness declaration must request at least 1 run"
        );
    }
}
