//! Drives the `bepsift` binary against fixture files.

use prost::encoding::{encode_key, encode_varint, WireType};
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bepsift"))
        .args(args)
        .env_remove("BUILDKITE_STEP_KEY")
        .env_remove("BUILDKITE_REPO")
        .env_remove("BUILDKITE_COMMIT")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run bepsift")
}

fn put_string(buf: &mut Vec<u8>, field: u32, payload: &[u8]) {
    encode_key(field, WireType::LengthDelimited, buf);
    encode_varint(payload.len() as u64, buf);
    buf.extend_from_slice(payload);
}

/// One framed test-result event
fn test_event(label: &str, status: &str, details: Option<&str>) -> Vec<u8> {
    let mut id = Vec::new();
    put_string(&mut id, 1, label.as_bytes());
    let mut wrapped_id = Vec::new();
    put_string(&mut wrapped_id, 4, &id);

    let mut result = Vec::new();
    put_string(&mut result, 5, status.as_bytes());
    encode_key(6, WireType::Varint, &mut result);
    encode_varint(1000, &mut result);
    if let Some(details) = details {
        put_string(&mut result, 9, details.as_bytes());
    }

    let mut event = Vec::new();
    put_string(&mut event, 1, &wrapped_id);
    put_string(&mut event, 10, &result);

    let mut framed = Vec::new();
    encode_varint(event.len() as u64, &mut framed);
    framed.extend(event);
    framed
}

fn write_fixture(dir: &TempDir, name: &str, data: &[u8]) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, data).expect("Failed to write fixture");
    path.to_string_lossy().into_owned()
}

fn failing_stream() -> Vec<u8> {
    [
        test_event("//app:ok_test", "PASSED", None),
        test_event(
            "//app:math_test",
            "FAILED",
            Some("app/math_test.cc:42:15: error: expected 4 but got 5"),
        ),
    ]
    .concat()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_help() {
    let output = run(&["--help"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Usage:"));
}

#[test]
fn test_missing_file_exits_1() {
    let output = run(&["/nonexistent/build_events.pb"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Error: BEP file not found: /nonexistent/build_events.pb"));
}

#[test]
fn test_empty_file_reports_success() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "empty.pb", &[]);

    let output = run(&[&path]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output), "Build completed\n");
}

#[test]
fn test_skip_if_no_failures_prints_nothing() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "ok.pb", &test_event("//app:ok_test", "PASSED", None));

    let output = run(&[&path, "--skip-if-no-failures"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output), "");
}

#[test]
fn test_text_output() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "failing.pb", &failing_stream());

    let output = run(&[&path, "--skip-if-no-failures"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(
        stdout(&output),
        "Build completed with 1 failure\n\
         \n\
         //app:math_test - app/math_test.cc:42:15: error: expected 4 but got 5 [app/math_test.cc:42]\n"
    );
}

#[test]
fn test_json_output() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "failing.pb", &failing_stream());

    let output = run(&[&path, "--output-format", "json"]);
    assert_eq!(output.status.code(), Some(0));

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["total_failures_seen"], 1);
    assert_eq!(value["failures_kept"], 1);
    assert_eq!(value["truncated"], false);
    assert_eq!(value["failures"][0]["target_label"], "//app:math_test");
    assert_eq!(value["failures"][0]["kind"], "test");
    assert_eq!(value["failures"][0]["location"]["line"], 42);
}

#[test]
fn test_truncated_stream_exits_2() {
    let dir = TempDir::new().unwrap();
    let mut data = failing_stream();
    data.truncate(data.len() - 3);
    let path = write_fixture(&dir, "truncated.pb", &data);

    let output = run(&[&path]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("Error: analysis aborted: stream truncated"));
    assert_eq!(stdout(&output), "");
}

#[test]
fn test_file_size_limit_exits_2() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "big.pb", &vec![0u8; 2 * 1024 * 1024]);

    let output = run(&[&path, "--max-file-size-mb", "1"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("exceeding the 1048576 byte limit"));
}

#[test]
fn test_max_failures() {
    let dir = TempDir::new().unwrap();
    let data: Vec<u8> = (0..5)
        .flat_map(|i| {
            test_event(
                &format!("//app:t{}", i),
                "FAILED",
                Some(&format!("app/t{}.cc:1:1: error: broken", i)),
            )
        })
        .collect();
    let path = write_fixture(&dir, "many.pb", &data);

    let output = run(&[&path, "--max-failures", "2"]);
    assert_eq!(output.status.code(), Some(0));
    let text = stdout(&output);
    assert!(text.starts_with("Build completed with 2 failures\n"));
    assert!(text.contains("(showing 2 of 5 failures)"));
}

#[cfg(unix)]
fn fake_agent(dir: &Path, script: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("buildkite-agent");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

#[cfg(unix)]
#[test]
fn test_annotate_through_agent() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "failing.pb", &failing_stream());
    let args_file = dir.path().join("args");
    let body_file = dir.path().join("body");
    let agent = fake_agent(
        dir.path(),
        &format!(
            "#!/bin/sh\necho \"$@\" > '{}'\ncat > '{}'\n",
            args_file.display(),
            body_file.display()
        ),
    );

    let output = Command::new(env!("CARGO_BIN_EXE_bepsift"))
        .args([path.as_str(), "--annotate", "--buildkite-agent", agent.as_str()])
        .env("BUILDKITE_STEP_KEY", "unit-tests")
        .env("BUILDKITE_REPO", "git@github.com:acme/widgets.git")
        .env("BUILDKITE_COMMIT", "0123abc")
        .output()
        .expect("Failed to run bepsift");
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));

    let args = std::fs::read_to_string(args_file).unwrap();
    assert_eq!(args.trim(), "annotate --style error --context unit-tests");

    let body = std::fs::read_to_string(body_file).unwrap();
    assert!(body.starts_with("### Build completed with 1 failure\n"));
    assert!(body.contains("https://github.com/acme/widgets/blob/0123abc/app/math_test.cc#L42"));
}

#[cfg(unix)]
#[test]
fn test_annotation_failure_is_only_a_warning() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "failing.pb", &failing_stream());
    let agent = fake_agent(dir.path(), "#!/bin/sh\ncat > /dev/null\necho 'agent offline' >&2\nexit 1\n");

    let output = run(&[&path, "--annotate", "--buildkite-agent", &agent]);
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).starts_with("Build completed with 1 failure\n"));
    assert!(stderr(&output).contains("agent offline"));
}
