//! Checks a finished run against the output and exit status the probe expects.

use crate::pty_session::RunReport;
use std::fmt;

/// Output the default probe command produces on a PTY.
pub const DEFAULT_EXPECTED_OUTPUT: &[u8] = b"Hello, world!\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectationError {
    OutputMismatch { expected: Vec<u8>, actual: Vec<u8> },
    NonZeroExit { code: Option<i32>, signal: Option<i32> },
}

impl fmt::Display for ExpectationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectationError::OutputMismatch { expected, actual } => write!(
                f,
                "output mismatch: expected \"{}\", got \"{}\"",
                expected.escape_ascii(),
                actual.escape_ascii()
            ),
            ExpectationError::NonZeroExit {
                code: Some(code), ..
            } => write!(f, "child exited with status {code}"),
            ExpectationError::NonZeroExit {
                signal: Some(signal),
                ..
            } => write!(f, "child killed by signal {signal}"),
            ExpectationError::NonZeroExit { .. } => write!(f, "child exit status unavailable"),
        }
    }
}

impl std::error::Error for ExpectationError {}

/// Output must equal `expected` byte for byte, then the child must have exited 0.
///
/// # Errors
///
/// The first expectation the run violates.
pub fn check_run(report: &RunReport, expected: &[u8]) -> Result<(), ExpectationError> {
    if report.output != expected {
        return Err(ExpectationError::OutputMismatch {
            expected: expected.to_vec(),
            actual: report.output.clone(),
        });
    }
    if !report.succeeded() {
        return Err(ExpectationError::NonZeroExit {
            code: report.exit_code,
            signal: report.signal,
        });
    }
    Ok(())
}

/// Decode `\r`, `\n`, `\t` and `\\` so expected output can be passed on a command line.
/// Any other backslash sequence is kept as written.
#[must_use]
pub fn decode_escapes(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut bytes = text.bytes().peekable();
    while let Some(byte) = bytes.next() {
        if byte != b'\\' {
            out.push(byte);
            continue;
        }
        match bytes.peek().copied() {
            Some(b'r') => out.push(b'\r'),
            Some(b'n') => out.push(b'\n'),
            Some(b't') => out.push(b'\t'),
            Some(b'\\') => out.push(b'\\'),
            _ => {
                out.push(b'\\');
                continue;
            }
        }
        bytes.next();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn report(output: &[u8], exit_code: Option<i32>, signal: Option<i32>) -> RunReport {
        RunReport {
            argv: vec!["echo".to_string(), "Hello, world!".to_string()],
            device_index: 0,
            lowest_free_before: 0,
            namespace: vec![0],
            output: output.to_vec(),
            exit_code,
            signal,
        }
    }

    #[test]
    fn matching_output_and_clean_exit_pass() {
        let run = report(b"Hello, world!\r\n", Some(0), None);
        assert_eq!(check_run(&run, DEFAULT_EXPECTED_OUTPUT), Ok(()));
    }

    #[test]
    fn untranslated_newline_is_a_mismatch() {
        let run = report(b"Hello, world!\n", Some(0), None);
        let err = check_run(&run, DEFAULT_EXPECTED_OUTPUT).unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"output mismatch: expected "Hello, world!\r\n", got "Hello, world!\n""#
        );
    }

    #[rstest]
    #[case(Some(3), None, "child exited with status 3")]
    #[case(None, Some(9), "child killed by signal 9")]
    fn failed_exit_is_reported(
        #[case] code: Option<i32>,
        #[case] signal: Option<i32>,
        #[case] message: &str,
    ) {
        let run = report(DEFAULT_EXPECTED_OUTPUT, code, signal);
        let err = check_run(&run, DEFAULT_EXPECTED_OUTPUT).unwrap_err();
        assert_eq!(err, ExpectationError::NonZeroExit { code, signal });
        assert_eq!(err.to_string(), message);
    }

    #[rstest]
    #[case(r"Hello, world!\r\n", b"Hello, world!\r\n".as_slice())]
    #[case(r"a\tb", b"a\tb".as_slice())]
    #[case(r"back\\slash", b"back\\slash".as_slice())]
    #[case(r"keep\q", b"keep\\q".as_slice())]
    #[case(r"trailing\", b"trailing\\".as_slice())]
    fn decodes_supported_escapes(#[case] text: &str, #[case] expected: &[u8]) {
        assert_eq!(decode_escapes(text), expected);
    }

    proptest! {
        #[test]
        fn text_without_backslashes_is_unchanged(text in "[^\\\\]{0,64}") {
            prop_assert_eq!(decode_escapes(&text), text.as_bytes().to_vec());
        }
    }
}
