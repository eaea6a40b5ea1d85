//! Out-of-process backend: a JavaScript runtime (Node.js) driving the
//! embedded runner program.
//!
//! # Flow
//!
//! 1. Stage the payload and the runner as uniquely named temp files
//! 2. Spawn `<runtime> <runner> <payload>` in its own process group, with
//!    `<working dir>/node_modules` prepended to `NODE_PATH`
//! 3. Read stdout and stderr line by line until a `{...}` line parses as the
//!    reply or both streams close, killing the process group on cancellation
//! 4. With no reply, map the diagnostic text through the error mapper
//!
//! Temp files are removed when the staging guard drops, which covers every
//! exit path including a dropped future.

mod locate;
pub mod protocol;

#[cfg(all(test, unix))]
mod tests;

use chrono::Utc;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use super::{BackendCapabilities, BackendKind, BackendRequest, ExecutionBackend, ExecutionRegistry, RunOutput};
use crate::config::SubprocessSettings;
use crate::error::ExecutionError;
use crate::error_map;
use crate::inspect::audio;
use crate::rewriter::{self, HostCapability, WRAPPER_LINES};

pub use locate::resolve_runtime;
use protocol::RunnerPayload;

const RUNNER_SOURCE: &str = include_str!("runner.js");

/// How long to wait for a killed or finished child to be reaped.
const EXIT_WAIT: Duration = Duration::from_secs(2);

pub struct SubprocessBackend {
    settings: SubprocessSettings,
    runtime: Option<PathBuf>,
    registry: Arc<ExecutionRegistry>,
}

impl SubprocessBackend {
    /// Locate the runtime from settings, environment and `PATH`.
    pub fn new(settings: SubprocessSettings, registry: Arc<ExecutionRegistry>) -> Self {
        let runtime = resolve_runtime(settings.runtime_path.as_deref());
        Self::with_runtime(settings, registry, runtime)
    }

    pub fn with_runtime(
        settings: SubprocessSettings,
        registry: Arc<ExecutionRegistry>,
        runtime: Option<PathBuf>,
    ) -> Self {
        Self {
            settings,
            runtime,
            registry,
        }
    }

    pub fn runtime(&self) -> Option<&Path> {
        self.runtime.as_deref()
    }

    fn stage(&self, request: &BackendRequest, working_directory: &Path) -> io::Result<Staged> {
        let transform = &request.transform;
        let payload = RunnerPayload {
            script: &request.script,
            normalized_script: &transform.normalized_script,
            instrumented_script: &transform.instrumented_script,
            result_line: transform.result_line,
            expression_line_map: &transform.expression_line_map,
            working_directory,
            timeout_ms: request.timeout.as_millis() as u64,
            async_wrapper: rewriter::needs_async_wrapper(&transform.instrumented_script),
            audio_types: audio::curated_table(),
            audio_node_properties: audio::GENERIC_NODE_PROPERTIES,
        };
        let payload = serde_json::to_vec(&payload).map_err(io::Error::other)?;

        // Timestamp plus tempfile's random suffix keeps concurrent runs apart
        let prefix = format!("scratchpad-{}-", Utc::now().format("%Y%m%d%H%M%S%3f"));
        Ok(Staged {
            payload: write_temp(&prefix, ".json", &payload)?,
            runner: write_temp(&prefix, ".cjs", RUNNER_SOURCE.as_bytes())?,
        })
    }

    fn command(&self, runtime: &Path, staged: &Staged, working_directory: &Path) -> Command {
        let mut command = Command::new(runtime);
        command
            .arg(staged.runner.path())
            .arg(staged.payload.path())
            .current_dir(working_directory)
            .env("NODE_PATH", node_path(working_directory))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        command
    }
}

impl BackendCapabilities for SubprocessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Subprocess
    }

    fn supports_modules(&self) -> bool {
        true
    }

    fn supports_host_capability(&self, capability: HostCapability) -> bool {
        capability != HostCapability::Audio
    }

    fn is_available(&self) -> bool {
        self.runtime.is_some()
    }

    fn describe(&self) -> String {
        match &self.runtime {
            Some(runtime) => format!("subprocess ({})", runtime.display()),
            None => "subprocess (no runtime found)".to_string(),
        }
    }
}

impl ExecutionBackend for SubprocessBackend {
    #[tracing::instrument(skip_all, fields(request_id = %request.id, backend = "subprocess"))]
    async fn run(&self, request: &BackendRequest) -> RunOutput {
        if request.cancel.is_cancelled() {
            return RunOutput::failed(ExecutionError::Cancelled);
        }
        let Some(runtime) = self.runtime.as_deref() else {
            return RunOutput::failed(ExecutionError::BackendUnavailable(format!(
                "install Node.js or set {}",
                crate::config::NODE_PATH_ENV
            )));
        };

        let working_directory = self.settings.resolved_working_directory();
        let staged = match self.stage(request, &working_directory) {
            Ok(staged) => staged,
            Err(e) => return RunOutput::failed(e.into()),
        };

        let started = Instant::now();
        let mut child = match self.command(runtime, &staged, &working_directory).spawn() {
            Ok(child) => child,
            Err(e) => {
                return RunOutput::failed(ExecutionError::BackendUnavailable(format!(
                    "failed to start {}: {e}",
                    runtime.display()
                )))
            }
        };
        let mut group = ProcessGroup(child.id());
        if let Some(pid) = child.id() {
            self.registry.attach_pid(request.id, pid);
        }
        tracing::debug!(pid = ?child.id(), "Runner started");

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return RunOutput::failed(ExecutionError::Protocol("runner streams unavailable".to_string()));
        };
        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();
        let mut stdout_lines: Vec<String> = Vec::new();
        let mut stderr_lines: Vec<String> = Vec::new();
        let (mut stdout_done, mut stderr_done) = (false, false);
        let mut reply = None;

        // The reply is the runner's last act; stop at it even if a leftover
        // grandchild still holds the pipes open
        while reply.is_none() && !(stdout_done && stderr_done) {
            tokio::select! {
                biased;
                _ = request.cancel.cancelled() => {
                    // The runner's own cleanup is not awaited
                    group.kill();
                    let _ = child.start_kill();
                    tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Runner cancelled");
                    return RunOutput::failed(ExecutionError::Cancelled);
                }
                line = stdout.next_line(), if !stdout_done => match line {
                    Ok(Some(line)) => match protocol::parse_reply(&line) {
                        Some(parsed) => reply = Some(parsed),
                        None => stdout_lines.push(line),
                    },
                    Ok(None) => stdout_done = true,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed reading runner stdout");
                        stdout_done = true;
                    }
                },
                line = stderr.next_line(), if !stderr_done => match line {
                    Ok(Some(line)) => stderr_lines.push(line),
                    Ok(None) => stderr_done = true,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed reading runner stderr");
                        stderr_done = true;
                    }
                },
            }
        }

        if reply.is_some() {
            group.kill();
        }
        let status = reap(&mut child).await;
        // Anything the script left running in the group goes too
        group.kill();
        tracing::debug!(
            status = ?status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Runner exited"
        );

        let source = &request.transform.normalized_script;
        match reply {
            Some(reply) => reply.into_output(source, request.timeout),
            None => {
                let mut diagnostic = stderr_lines;
                diagnostic.extend(stdout_lines);
                RunOutput::failed(error_map::map_diagnostic(&diagnostic.join("\n"), source, WRAPPER_LINES))
            }
        }
    }
}

/* ===================== Process helpers ===================== */

/// Temp files for one run, deleted on drop.
struct Staged {
    payload: NamedTempFile,
    runner: NamedTempFile,
}

fn write_temp(prefix: &str, suffix: &str, contents: &[u8]) -> io::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new().prefix(prefix).suffix(suffix).tempfile()?;
    file.write_all(contents)?;
    file.flush()?;
    Ok(file)
}

/// `<working dir>/node_modules` ahead of any inherited `NODE_PATH`.
fn node_path(working_directory: &Path) -> std::ffi::OsString {
    let mut paths = vec![working_directory.join("node_modules")];
    if let Some(existing) = std::env::var_os("NODE_PATH") {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths).unwrap_or_else(|_| working_directory.join("node_modules").into_os_string())
}

/// Kills the child's whole process group at most once, at the latest on
/// drop, so a dropped run (timeout) takes any grandchildren down with it.
struct ProcessGroup(Option<u32>);

impl ProcessGroup {
    fn kill(&mut self) {
        if let Some(pid) = self.0.take() {
            kill_process_tree(pid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// SIGKILL the process group led by `pid`.
#[cfg(unix)]
pub fn kill_process_tree(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // Negative pid addresses the group
    unsafe {
        libc::kill(-pid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
pub fn kill_process_tree(_pid: u32) {}

async fn reap(child: &mut Child) -> Option<std::process::ExitStatus> {
    match tokio::time::timeout(EXIT_WAIT, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Failed waiting for runner exit");
            None
        }
        Err(_) => {
            tracing::warn!("Runner still alive after closing its streams; killing");
            let _ = child.start_kill();
            None
        }
    }
}
