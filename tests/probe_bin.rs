//! Integration tests that pin the probe binary's stderr listing and exit behavior.

use std::fs;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn probe(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pty-probe"))
        .args(args)
        .env_remove("PTY_PROBE_NAMESPACE")
        .env_remove("PTY_PROBE_DECLARATION")
        .output()
        .expect("run pty-probe")
}

#[test]
fn two_fresh_instances_print_identical_listings() {
    let declaration = r#"{"runs": 2, "expect": {"matching_stderr": true}}"#;
    let runs: Vec<Output> = (0..2)
        .map(|_| {
            probe(&[
                "--namespace",
                "virtual",
                "--declaration",
                declaration,
                "--verbose",
            ])
        })
        .collect();
    for run in &runs {
        assert!(run.status.success(), "{}", String::from_utf8_lossy(&run.stderr));
    }
    assert_eq!(runs[0].stderr, b"[0]\n");
    assert_eq!(runs[0].stderr, runs[1].stderr);
}

#[test]
fn verbose_adds_details_without_matching_stderr() {
    let output = probe(&["--namespace", "virtual", "--verbose"]);
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("[0]\n"));
    assert!(stderr.contains("pty 0 (lowest free before: 0), 15 bytes"));
}

#[test]
fn single_run_declaration_keeps_verbose_details() {
    let output = probe(&[
        "--namespace",
        "virtual",
        "--declaration",
        r#"{"runs": 1, "expect": {"matching_stderr": true}}"#,
        "--verbose",
    ]);
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("[0]\n"));
    assert!(stderr.contains("lowest free before: 0"), "{stderr}");
}

#[test]
fn silenced_stdout_still_passes() {
    let output = probe(&["--namespace", "virtual", "--silence-stdout"]);
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn mismatched_expectation_exits_with_failure() {
    let output = probe(&["--namespace", "virtual", "--expect", r"Goodbye\r\n"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("output mismatch"), "{stderr}");
}

#[test]
fn nonzero_child_exit_fails_the_probe() {
    let output = probe(&["--namespace", "virtual", "--expect", "", "--", "false"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("child exited with status 1"), "{stderr}");
}

#[test]
fn command_flag_is_shell_split() {
    let output = probe(&[
        "--namespace",
        "virtual",
        "--command",
        "printf '%s|%s' 'a b' c",
        "--expect",
        "a b|c",
    ]);
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn zero_run_declaration_is_rejected() {
    let output = probe(&["--namespace", "virtual", "--declaration", r#"{"runs": 0}"#]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("at least 1 run"));
}

#[test]
fn doctor_prints_device_section() {
    let output = probe(&["--doctor", "--namespace", "virtual"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("pty-probe doctor"));
    assert!(stdout.contains("Devices:"));
    assert!(stdout.contains("  namespace: virtual"));
}

#[test]
fn report_json_records_the_run() {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_nanos();
    let path = std::env::temp_dir().join(format!("pty-probe-report-{nanos}.json"));
    let path_arg = path.to_string_lossy().into_owned();
    let output = probe(&["--namespace", "virtual", "--report-json", &path_arg]);
    assert!(output.status.success());

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).expect("read report")).expect("json");
    assert_eq!(json["device_index"], 0);
    assert_eq!(json["namespace"], serde_json::json!([0]));
    assert_eq!(json["argv"], serde_json::json!(["echo", "Hello, world!"]));
    assert_eq!(json["exit_code"], 0);
    let _ = fs::remove_file(path);
}
