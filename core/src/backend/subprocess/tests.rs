use super::*;
use crate::inspect::{PromiseState, SerializedValue, PROTOTYPE_KEY};
use crate::types::LogKind;
use std::os::unix::fs::PermissionsExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A stand-in runtime: a shell script run as `<script> <runner> <payload>`.
fn fake_runtime(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-node");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut permissions = std::fs::metadata(&path).unwrap().permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).unwrap();
    path
}

fn backend(dir: &Path, runtime: Option<PathBuf>) -> SubprocessBackend {
    let settings = SubprocessSettings {
        working_directory: Some(dir.to_path_buf()),
        ..SubprocessSettings::default()
    };
    SubprocessBackend::with_runtime(settings, Arc::new(ExecutionRegistry::new()), runtime)
}

fn request(script: &str) -> BackendRequest {
    BackendRequest::new(
        Uuid::new_v4(),
        script,
        Duration::from_secs(5),
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn test_reply_is_found_among_noise() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = fake_runtime(
        dir.path(),
        r#"echo "warming up"
echo '{"success":true,"result":7,"resultLine":1,"output":[{"type":"log","level":"info","message":"hi","line":1}]}'
echo "(node) trailing diagnostic" >&2"#,
    );

    let output = backend(dir.path(), Some(runtime)).run(&request("7")).await;

    let Ok(completion) = output.outcome else {
        unreachable!()
    };
    assert_eq!(completion.value, SerializedValue::Number(7.0));
    assert_eq!(completion.result_line, Some(1));
    assert_eq!(output.logs.len(), 1);
    assert_eq!(output.logs[0].kind, LogKind::Log);
}

#[tokio::test]
async fn test_payload_carries_rewritten_script() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = fake_runtime(
        dir.path(),
        r#"case "$1" in *.cjs) ;; *) exit 3 ;; esac
if grep -q '"normalizedScript":"const fs = ' "$2" && grep -q '"timeoutMs":5000' "$2"; then
  echo '{"success":true,"result":"ok","output":[]}'
else
  echo '{"success":false,"error":"Error: bad payload","output":[]}'
fi"#,
    );

    let output = backend(dir.path(), Some(runtime))
        .run(&request("import fs from 'fs';\nfs"))
        .await;

    let Ok(completion) = output.outcome else {
        unreachable!()
    };
    assert_eq!(completion.value, SerializedValue::String("ok".into()));
}

#[tokio::test]
async fn test_temp_files_are_removed() {
    let dir = tempfile::tempdir().unwrap();
    let seen = dir.path().join("seen");
    let runtime = fake_runtime(
        dir.path(),
        &format!(
            r#"echo "$1" > {seen}
echo "$2" >> {seen}
echo '{{"success":true,"result":null,"output":[]}}'"#,
            seen = seen.display()
        ),
    );

    let output = backend(dir.path(), Some(runtime)).run(&request("null")).await;
    assert!(output.outcome.is_ok());

    let recorded = std::fs::read_to_string(&seen).unwrap();
    let paths: Vec<&str> = recorded.lines().collect();
    assert_eq!(paths.len(), 2);
    for path in paths {
        assert!(path.contains("scratchpad-"), "{path}");
        assert!(!Path::new(path).exists(), "{path} left behind");
    }
}

#[tokio::test]
async fn test_reply_is_taken_while_pipes_stay_open() {
    let dir = tempfile::tempdir().unwrap();
    // A leftover child keeps stdout open long after the reply
    let runtime = fake_runtime(
        dir.path(),
        r#"echo '{"success":true,"result":1,"resultLine":1,"output":[]}'
sleep 30"#,
    );

    let started = Instant::now();
    let output = backend(dir.path(), Some(runtime)).run(&request("1")).await;

    let Ok(completion) = output.outcome else {
        unreachable!()
    };
    assert_eq!(completion.value, SerializedValue::Number(1.0));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_crash_without_reply_is_mapped() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = fake_runtime(
        dir.path(),
        r#"echo "TypeError: boom" >&2
echo "    at scratchpad.js:3:1" >&2
exit 1"#,
    );

    let output = backend(dir.path(), Some(runtime)).run(&request("a;\nb;")).await;

    let Err(error) = output.outcome else {
        unreachable!()
    };
    assert_eq!(error.to_string(), "TypeError: boom");
    assert_eq!(error.line(), Some(2));
}

#[tokio::test]
async fn test_cancellation_kills_runner() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = fake_runtime(dir.path(), "sleep 30");
    let request = request("1");
    let token = request.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let started = Instant::now();
    let output = backend(dir.path(), Some(runtime)).run(&request).await;

    assert!(matches!(output.outcome, Err(ExecutionError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_missing_runtime_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let backend = backend(dir.path(), None);

    assert!(!backend.is_available());
    let output = backend.run(&request("1")).await;
    assert!(matches!(output.outcome, Err(ExecutionError::BackendUnavailable(_))));
}

#[test]
fn test_capabilities() {
    let dir = tempfile::tempdir().unwrap();
    let backend = backend(dir.path(), Some(PathBuf::from("/usr/bin/node")));
    assert!(backend.supports_modules());
    assert!(backend.supports_host_capability(HostCapability::Network));
    assert!(!backend.supports_host_capability(HostCapability::Audio));
    assert_eq!(backend.describe(), "subprocess (/usr/bin/node)");
}

#[test]
fn test_node_path_prepends_working_directory() {
    let joined = node_path(Path::new("/work"));
    let first = std::env::split_paths(&joined).next().unwrap();
    assert_eq!(first, PathBuf::from("/work/node_modules"));
}

/* ===================== Real runtime ===================== */

/// The backend on an installed `node`, if there is one.
fn node_backend(dir: &Path) -> Option<SubprocessBackend> {
    let settings = SubprocessSettings {
        working_directory: Some(dir.to_path_buf()),
        ..SubprocessSettings::default()
    };
    let backend = SubprocessBackend::new(settings, Arc::new(ExecutionRegistry::new()));
    if !backend.is_available() {
        eprintln!("node not found; skipping");
        return None;
    }
    Some(backend)
}

async fn run_on_node(script: &str, timeout: Duration) -> Option<RunOutput> {
    let dir = tempfile::tempdir().unwrap();
    let backend = node_backend(dir.path())?;
    let request = BackendRequest::new(
        Uuid::new_v4(),
        script,
        timeout,
        CancellationToken::new(),
    );
    Some(backend.run(&request).await)
}

#[tokio::test]
async fn test_node_value_console_and_capture() {
    let script = "const a = 2;\nconsole.log('hi', a);\na * 21";
    let Some(output) = run_on_node(script, Duration::from_secs(5)).await else {
        return;
    };

    let Ok(completion) = output.outcome else {
        unreachable!()
    };
    assert_eq!(completion.value, SerializedValue::Number(42.0));
    assert_eq!(completion.result_line, Some(3));

    assert_eq!(output.logs.len(), 2);
    assert_eq!(output.logs[0].kind, LogKind::Log);
    assert_eq!(output.logs[0].line, Some(2));
    assert_eq!(
        output.logs[0].message,
        SerializedValue::Array {
            length: 2,
            items: vec![SerializedValue::String("hi".into()), SerializedValue::Number(2.0)],
        }
    );
    assert_eq!(output.logs[1].kind, LogKind::Result);
    assert_eq!(output.logs[1].line, Some(3));
}

#[tokio::test]
async fn test_node_syntax_error_runs_nothing() {
    let script = "console.log('side effect');\nconst b = ;";
    let Some(output) = run_on_node(script, Duration::from_secs(5)).await else {
        return;
    };

    let Err(ExecutionError::Syntax { line, .. }) = output.outcome else {
        unreachable!()
    };
    assert_eq!(line, 2);
    assert!(output.logs.is_empty());
}

#[tokio::test]
async fn test_node_runtime_error_keeps_logs() {
    let script = "console.log(1);\nthrow new TypeError('nope');";
    let Some(output) = run_on_node(script, Duration::from_secs(5)).await else {
        return;
    };

    let Err(error) = output.outcome else {
        unreachable!()
    };
    assert_eq!(error.to_string(), "TypeError: nope");
    assert_eq!(error.line(), Some(2));
    assert_eq!(output.logs.len(), 1);
}

#[tokio::test]
async fn test_node_awaited_and_pending_promises() {
    let Some(output) = run_on_node("await Promise.resolve(5)", Duration::from_secs(5)).await else {
        return;
    };
    let Ok(completion) = output.outcome else {
        unreachable!()
    };
    assert_eq!(completion.value, SerializedValue::Number(5.0));

    let Some(output) = run_on_node("new Promise(() => {})", Duration::from_millis(300)).await else {
        return;
    };
    assert!(matches!(output.outcome, Err(ExecutionError::Timeout(_))));
    // The interim entry for the returned promise
    let pending = SerializedValue::Promise {
        state: PromiseState::Pending,
    };
    assert!(output.logs.iter().any(|entry| entry.message == pending));
}

#[tokio::test]
async fn test_node_inspector_cycles_and_truncation() {
    let script = "const a = { n: 1 };\na.self = a;\n[a, Array.from({ length: 150 }, (_, i) => i), 0.5]";
    let Some(output) = run_on_node(script, Duration::from_secs(5)).await else {
        return;
    };

    let Ok(completion) = output.outcome else {
        unreachable!()
    };
    let SerializedValue::Array { items, .. } = completion.value else {
        unreachable!()
    };

    let SerializedValue::Object { name, props } = &items[0] else {
        unreachable!()
    };
    assert_eq!(name, "Object");
    assert_eq!(props["n"], SerializedValue::Number(1.0));
    assert_eq!(props["self"], SerializedValue::Circular { name: "Object".into() });

    let SerializedValue::Array { length, items: numbers } = &items[1] else {
        unreachable!()
    };
    assert_eq!(*length, 150);
    assert_eq!(numbers.len(), 101);
    assert_eq!(numbers[100], SerializedValue::Truncated { count: 50 });

    assert_eq!(items[2], SerializedValue::Decimal("0.5".into()));
}

#[tokio::test]
async fn test_node_prototype_slot() {
    let script = "const base = { a: 1, b: 2 };\nconst child = Object.create(base);\nchild.c = 3;\nchild";
    let Some(output) = run_on_node(script, Duration::from_secs(5)).await else {
        return;
    };

    let Ok(completion) = output.outcome else {
        unreachable!()
    };
    let SerializedValue::Object { props, .. } = completion.value else {
        unreachable!()
    };
    assert_eq!(props["c"], SerializedValue::Number(3.0));
    let SerializedValue::Object { props: inherited, .. } = &props[PROTOTYPE_KEY] else {
        unreachable!()
    };
    assert_eq!(inherited.keys().collect::<Vec<_>>(), ["a", "b"]);
}
