//! Tests for `src/executor/process.rs`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio_stream::StreamExt;

use tether::executor::process::{spawn_streaming, ProcessSpec, DEFAULT_SHELL};
use tether::executor::{ByteStream, ExecOptions, ExecutorError};

async fn collect_output(mut output: ByteStream) -> String {
    let mut bytes = Vec::new();
    while let Some(chunk) = output.next().await {
        bytes.extend_from_slice(&chunk.expect("chunk should be readable"));
    }
    String::from_utf8(bytes).expect("output should be UTF-8")
}

fn script(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("should write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("should chmod");
    path
}

#[tokio::test]
async fn shell_reads_script_from_stdin() {
    let output = spawn_streaming(
        &ProcessSpec::shell(DEFAULT_SHELL),
        Bytes::from_static(b"echo hi\n"),
        &ExecOptions::default(),
    )
    .expect("shell should spawn");
    assert_eq!(collect_output(output).await, "hi\n");
}

#[tokio::test]
async fn stderr_is_merged_into_output() {
    let output = spawn_streaming(
        &ProcessSpec::shell(DEFAULT_SHELL),
        Bytes::from_static(b"echo out\necho err >&2\n"),
        &ExecOptions::default(),
    )
    .expect("shell should spawn");
    let text = collect_output(output).await;
    assert!(text.contains("out\n"), "got: {text:?}");
    assert!(text.contains("err\n"), "got: {text:?}");
}

#[tokio::test]
async fn failing_exit_code_still_streams_output() {
    let output = spawn_streaming(
        &ProcessSpec::shell(DEFAULT_SHELL),
        Bytes::from_static(b"echo before\nexit 7\n"),
        &ExecOptions::default(),
    )
    .expect("shell should spawn");
    assert_eq!(collect_output(output).await, "before\n");
}

#[tokio::test]
async fn command_arguments_are_not_shell_interpreted() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let program = script(tmp.path(), "args.sh", r#"for a in "$@"; do echo "[$a]"; done"#);

    let args = vec!["-v".to_owned(), "$HOME; rm -rf /".to_owned(), "two words".to_owned()];
    let output = spawn_streaming(
        &ProcessSpec::command(&program, args),
        Bytes::new(),
        &ExecOptions::default(),
    )
    .expect("command should spawn");
    assert_eq!(
        collect_output(output).await,
        "[-v]\n[$HOME; rm -rf /]\n[two words]\n"
    );
}

#[tokio::test]
async fn command_receives_request_body_on_stdin() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let program = script(tmp.path(), "upper.sh", "tr a-z A-Z");

    let output = spawn_streaming(
        &ProcessSpec::command(&program, Vec::new()),
        Bytes::from_static(b"payload"),
        &ExecOptions::default(),
    )
    .expect("command should spawn");
    assert_eq!(collect_output(output).await, "PAYLOAD");
}

#[tokio::test]
async fn timeout_kills_long_running_child() {
    let started = Instant::now();
    let output = spawn_streaming(
        &ProcessSpec::shell(DEFAULT_SHELL),
        Bytes::from_static(b"echo started\nexec sleep 30\n"),
        &ExecOptions {
            timeout: Some(Duration::from_millis(300)),
        },
    )
    .expect("shell should spawn");

    let text = collect_output(output).await;
    assert_eq!(text, "started\n");
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "child should have been killed, took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn timeout_ends_output_even_when_shell_forked_children() {
    let started = Instant::now();
    let output = spawn_streaming(
        &ProcessSpec::shell(DEFAULT_SHELL),
        Bytes::from_static(b"echo started\nsleep 30\necho after\n"),
        &ExecOptions {
            timeout: Some(Duration::from_millis(300)),
        },
    )
    .expect("shell should spawn");

    let text = collect_output(output).await;
    assert_eq!(text, "started\n");
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "output should end once the time limit fires, took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn timeout_reaches_background_jobs() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let marker = tmp.path().join("survivor");
    let script = format!(
        "(sleep 2; touch {}) &\nsleep 30\n",
        marker.display()
    );

    let output = spawn_streaming(
        &ProcessSpec::shell(DEFAULT_SHELL),
        Bytes::from(script),
        &ExecOptions {
            timeout: Some(Duration::from_millis(300)),
        },
    )
    .expect("shell should spawn");
    collect_output(output).await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!marker.exists(), "background job should have been killed with the group");
}

#[tokio::test]
async fn output_streams_before_child_exits() {
    let started = Instant::now();
    let mut output = spawn_streaming(
        &ProcessSpec::shell(DEFAULT_SHELL),
        Bytes::from_static(b"echo early\nsleep 3\necho late\n"),
        &ExecOptions::default(),
    )
    .expect("shell should spawn");

    let first = output
        .next()
        .await
        .expect("stream should yield")
        .expect("chunk should be readable");
    assert_eq!(first.as_ref(), b"early\n");
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "first chunk should arrive while the child still runs, took {:?}",
        started.elapsed()
    );

    assert_eq!(collect_output(output).await, "late\n");
}

#[tokio::test]
async fn missing_program_is_not_found() {
    let err = spawn_streaming(
        &ProcessSpec::command("/nonexistent/tether-program", Vec::new()),
        Bytes::new(),
        &ExecOptions::default(),
    )
    .expect_err("spawn must fail");
    assert!(matches!(err, ExecutorError::NotFound(_)));
}

#[tokio::test]
async fn non_executable_program_is_permission_denied() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("plain.txt");
    fs::write(&path, "not a program").expect("should write");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).expect("should chmod");

    let err = spawn_streaming(
        &ProcessSpec::command(&path, Vec::new()),
        Bytes::new(),
        &ExecOptions::default(),
    )
    .expect_err("spawn must fail");
    assert_eq!(err.status(), 403);
}
