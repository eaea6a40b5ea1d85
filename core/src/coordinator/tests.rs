use super::*;
use crate::config::SubprocessSettings;
use crate::inspect::SerializedValue;
use crate::types::LogKind;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

const REPLY: &str = r#"echo '{"success":true,"result":"from fallback","resultLine":1,"output":[]}'"#;

#[cfg(unix)]
fn fake_runtime(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-node");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut permissions = std::fs::metadata(&path).unwrap().permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).unwrap();
    path
}

fn coordinator(dir: &Path, runtime: Option<PathBuf>, config: Config) -> Coordinator {
    let registry = Arc::new(ExecutionRegistry::new());
    let settings = SubprocessSettings {
        working_directory: Some(dir.to_path_buf()),
        exit_grace_ms: 200,
        ..SubprocessSettings::default()
    };
    let subprocess = SubprocessBackend::with_runtime(settings.clone(), registry.clone(), runtime);
    let config = Config {
        subprocess: settings,
        ..config
    };
    Coordinator::with_backends(config, IsolatedBackend::default(), subprocess, registry)
}

#[tokio::test]
async fn test_plain_script_runs_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator(dir.path(), None, Config::default());

    let result = coordinator
        .execute("const a = 2;\nconsole.log('half');\na * 21", ExecuteOptions::new())
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.value, Some(SerializedValue::Number(42.0)));
    assert_eq!(result.result_line, Some(3));
    assert_eq!(result.logs[0].kind, LogKind::Log);
    assert_eq!(coordinator.registry().in_flight(), 0);
}

#[tokio::test]
async fn test_user_errors_are_results() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator(dir.path(), None, Config::default());

    let result = coordinator
        .execute("console.log(1);\nthrow new TypeError('nope');", ExecuteOptions::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("TypeError: nope"));
    assert_eq!(result.error_line, Some(2));
    assert_eq!(result.logs.len(), 1);
    assert!(result.value.is_none());
}

#[tokio::test]
async fn test_isolated_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator(dir.path(), None, Config::default());

    let result = coordinator
        .execute(
            "while (true) {}",
            ExecuteOptions::new().timeout(Duration::from_millis(150)),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Execution timed out after 150ms"));
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator(dir.path(), None, Config::default());
    let token = CancellationToken::new();
    token.cancel();

    let result = coordinator
        .execute("1 + 1", ExecuteOptions::new().cancellation(token))
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Execution cancelled"));
    assert!(result.logs.is_empty());
}

#[tokio::test]
async fn test_cancel_current_stops_isolated_run() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = Arc::new(coordinator(dir.path(), None, Config::default()));

    let running = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .execute(
                    "console.log('started');\nwhile (true) {}",
                    ExecuteOptions::new().timeout(Duration::from_secs(30)),
                )
                .await
        })
    };
    while coordinator.registry().in_flight() == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(coordinator.cancel_current(), 1);

    let result = running.await.unwrap();
    assert_eq!(result.error.as_deref(), Some("Execution cancelled"));
    // Reported as a cancellation, not a failure with its partial logs
    assert!(result.logs.is_empty());
}

#[tokio::test]
async fn test_modules_without_runtime_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator(dir.path(), None, Config::default());

    let result = coordinator
        .execute("import fs from 'fs';\nfs", ExecuteOptions::new())
        .await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.starts_with("No JavaScript runtime available"), "{error}");
}

#[test]
fn test_prepare_for_external_host() {
    let prepared = prepare_for_external_host("const ctx = new AudioContext();\nctx;\nctx.sampleRate");

    assert_eq!(
        prepared.instrumented_script,
        "const ctx = new AudioContext();\n__scratchpad_capture(ctx, 2);\nreturn __scratchpad_capture(ctx.sampleRate, 3);"
    );
    assert_eq!(prepared.result_line, Some(3));
    assert_eq!(
        prepared.expression_line_map,
        maplit::btreemap! { 2 => "ctx".to_string(), 3 => "ctx.sampleRate".to_string() }
    );
}

#[test]
fn test_backend_report() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator(dir.path(), None, Config::default());
    let reports = coordinator.backends();

    assert_eq!(reports.len(), 2);
    assert!(reports[0].available);
    assert!(!reports[0].supports_modules);
    assert_eq!(reports[1].kind, BackendKind::Subprocess);
    assert!(!reports[1].available);
}

/* ===================== Fallback path (fake runtime) ===================== */

#[cfg(unix)]
mod fallback {
    use super::*;

    #[tokio::test]
    async fn test_module_script_goes_to_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = fake_runtime(dir.path(), REPLY);
        let coordinator = coordinator(dir.path(), Some(runtime), Config::default());

        let result = coordinator
            .execute("const path = require('path');\npath", ExecuteOptions::new())
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.value, Some(SerializedValue::String("from fallback".into())));
    }

    #[tokio::test]
    async fn test_forced_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = fake_runtime(dir.path(), REPLY);
        let mut config = Config::default();
        config.execution.force_subprocess = true;
        let coordinator = coordinator(dir.path(), Some(runtime), config);

        let result = coordinator.execute("1 + 1", ExecuteOptions::new()).await;

        assert_eq!(result.value, Some(SerializedValue::String("from fallback".into())));
    }

    #[tokio::test]
    async fn test_isolated_parse_quirk_retries_on_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = fake_runtime(dir.path(), REPLY);
        let coordinator = coordinator(dir.path(), Some(runtime), Config::default());

        // QuickJS: "unexpected token in expression"
        let result = coordinator.execute("const a = ;", ExecuteOptions::new()).await;

        assert_eq!(result.value, Some(SerializedValue::String("from fallback".into())));
    }

    #[tokio::test]
    async fn test_fallback_runs_never_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("trace");
        let runtime = fake_runtime(
            dir.path(),
            &format!(
                "echo start >> {trace}\nsleep 0.3\necho end >> {trace}\n{REPLY}",
                trace = trace.display()
            ),
        );
        let coordinator = coordinator(dir.path(), Some(runtime), Config::default());

        let options = ExecuteOptions::new().timeout(Duration::from_secs(5));
        let (first, second) = tokio::join!(
            coordinator.execute("require('a')", options.clone()),
            coordinator.execute("require('b')", options),
        );

        assert!(first.success && second.success);
        let recorded = std::fs::read_to_string(&trace).unwrap();
        assert_eq!(recorded.lines().collect::<Vec<_>>(), ["start", "end", "start", "end"]);
    }

    #[tokio::test]
    async fn test_fallback_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = fake_runtime(dir.path(), "sleep 30");
        let coordinator = coordinator(dir.path(), Some(runtime), Config::default());

        let started = Instant::now();
        let result = coordinator
            .execute(
                "require('x')",
                ExecuteOptions::new().timeout(Duration::from_millis(200)),
            )
            .await;

        assert_eq!(result.error.as_deref(), Some("Execution timed out after 200ms"));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(coordinator.registry().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_lock() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = fake_runtime(dir.path(), &format!("sleep 1\n{REPLY}"));
        let coordinator = coordinator(dir.path(), Some(runtime), Config::default());

        let token = CancellationToken::new();
        let waiting_token = token.clone();
        let cancel_soon = async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            waiting_token.cancel();
        };

        let started = Instant::now();
        let (first, second, ()) = tokio::join!(
            coordinator.execute("require('a')", ExecuteOptions::new()),
            coordinator.execute("require('b')", ExecuteOptions::new().cancellation(token)),
            cancel_soon,
        );

        assert!(first.success);
        assert_eq!(second.error.as_deref(), Some("Execution cancelled"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
