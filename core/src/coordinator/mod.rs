//! # Execution Coordinator
//!
//! Entry point for running a script. Each request moves through
//!
//! ```text
//! Idle → Deciding → RunningIsolated | RunningFallback → Completed | Failed | Cancelled
//! ```
//!
//! - **Deciding** rewrites the script once, reads the environment overrides
//!   and picks a backend from declared capabilities ([`select`])
//! - **RunningIsolated** may hand over to the fallback when the engine
//!   rejects text with a known parse quirk
//! - **RunningFallback** reaps overdue fallback runs, then waits on a fair
//!   lock so only one fallback process runs at a time
//!
//! Every run is raced against its cancellation token and a timer; whichever
//! loses is dropped, which tears down the engine or process. Every request is
//! in the [`ExecutionRegistry`] from the moment a backend is chosen until its
//! terminal transition.

pub mod select;

#[cfg(test)]
mod tests;

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::Instrument;

use crate::backend::isolated::IsolatedBackend;
use crate::backend::subprocess::SubprocessBackend;
use crate::backend::{BackendCapabilities, BackendKind, BackendRequest, ExecutionBackend, ExecutionRegistry, RunOutput};
use crate::config::Config;
use crate::error::ExecutionError;
use crate::rewriter;
use crate::types::{ExecuteOptions, ExecutionRequest, ExecutionResult, ExecutionState, ExternalHostScript};

pub use select::{choose_backend, Selection};

/// Availability line for one backend, as printed by `scratchpad backends`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendReport {
    pub kind: BackendKind,
    pub available: bool,
    pub supports_modules: bool,
    pub detail: String,
}

impl BackendReport {
    fn of(backend: &dyn BackendCapabilities) -> Self {
        Self {
            kind: backend.kind(),
            available: backend.is_available(),
            supports_modules: backend.supports_modules(),
            detail: backend.describe(),
        }
    }
}

pub struct Coordinator {
    config: Config,
    isolated: IsolatedBackend,
    subprocess: SubprocessBackend,
    registry: Arc<ExecutionRegistry>,
    fallback_lock: Mutex<()>,
}

impl Coordinator {
    /// Build both backends from `config`, locating the runtime binary.
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(ExecutionRegistry::new());
        let isolated = IsolatedBackend::new(config.isolated.clone());
        let subprocess = SubprocessBackend::new(config.subprocess.clone(), registry.clone());
        Self::with_backends(config, isolated, subprocess, registry)
    }

    /// `subprocess` must report its process ids into `registry`.
    pub fn with_backends(
        config: Config,
        isolated: IsolatedBackend,
        subprocess: SubprocessBackend,
        registry: Arc<ExecutionRegistry>,
    ) -> Self {
        Self {
            config,
            isolated,
            subprocess,
            registry,
            fallback_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ExecutionRegistry {
        &self.registry
    }

    pub fn backends(&self) -> Vec<BackendReport> {
        vec![
            BackendReport::of(&self.isolated),
            BackendReport::of(&self.subprocess),
        ]
    }

    /// Run `script` to a terminal result. User script failures, timeouts and
    /// cancellation all come back as `success = false`.
    pub async fn execute(&self, script: &str, options: ExecuteOptions) -> ExecutionResult {
        let request = ExecutionRequest::new(
            script,
            options
                .timeout
                .unwrap_or_else(|| self.config.execution.default_timeout()),
            options.cancellation.unwrap_or_default(),
        );
        let span = tracing::info_span!("execute", request_id = %request.id);
        self.execute_request(request).instrument(span).await
    }

    async fn execute_request(&self, request: ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();
        transition(ExecutionState::Idle);
        if request.cancellation.is_cancelled() {
            transition(ExecutionState::Cancelled);
            return ExecutionResult::cancelled();
        }

        transition(ExecutionState::Deciding);
        // A child token, so cancel_current never fires a caller-owned token
        let backend_request = BackendRequest::new(
            request.id,
            request.script,
            request.timeout,
            request.cancellation.child_token(),
        );
        let settings = self.config.execution.with_env_overrides();
        let required = rewriter::required_capabilities(&backend_request.script);
        let selection = choose_backend(&settings, &required, &self.isolated, &self.subprocess);
        tracing::debug!(
            backend = %selection.backend,
            reason = selection.reason,
            capabilities = ?required,
            "Backend selected"
        );

        let output = match selection.backend {
            BackendKind::Isolated => {
                transition(ExecutionState::RunningIsolated);
                let output = self.run_guarded(&self.isolated, &backend_request).await;
                match &output.outcome {
                    Err(e) if e.is_retryable_parse_error() && self.subprocess.is_available() => {
                        tracing::info!(error = %e, "Isolated engine rejected the script; retrying on fallback");
                        self.run_fallback(&backend_request).await
                    }
                    _ => output,
                }
            }
            BackendKind::Subprocess => self.run_fallback(&backend_request).await,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match output.outcome {
            Ok(completion) => {
                transition(ExecutionState::Completed);
                tracing::info!(elapsed_ms, logs = output.logs.len(), "Execution completed");
                ExecutionResult::completed(completion.value, completion.result_line, output.logs)
            }
            Err(e) if e.is_cancelled() => {
                transition(ExecutionState::Cancelled);
                tracing::info!(elapsed_ms, "Execution cancelled");
                ExecutionResult::cancelled()
            }
            Err(e) => {
                transition(ExecutionState::Failed);
                tracing::info!(elapsed_ms, error = %e, "Execution failed");
                ExecutionResult::failed(&e, output.logs)
            }
        }
    }

    async fn run_fallback(&self, request: &BackendRequest) -> RunOutput {
        let reaped = self.registry.reap_stuck(
            BackendKind::Subprocess,
            Instant::now(),
            self.config.subprocess.exit_grace(),
        );
        if reaped > 0 {
            tracing::warn!(reaped, "Terminated overdue fallback executions");
        }

        // tokio's Mutex queues waiters in FIFO order
        let _turn = tokio::select! {
            biased;
            _ = request.cancel.cancelled() => return RunOutput::failed(ExecutionError::Cancelled),
            turn = self.fallback_lock.lock() => turn,
        };
        if request.cancel.is_cancelled() {
            return RunOutput::failed(ExecutionError::Cancelled);
        }

        transition(ExecutionState::RunningFallback);
        self.run_guarded(&self.subprocess, request).await
    }

    /// Run on `backend` under the registry, racing cancellation and the
    /// timer. The timer allows the exit grace on top of the request timeout
    /// so a backend can report its own timeout with the logs it collected.
    async fn run_guarded<B: ExecutionBackend>(&self, backend: &B, request: &BackendRequest) -> RunOutput {
        let budget = self.budget_for(request.timeout);
        self.registry
            .register(request.id, backend.kind(), request.cancel.clone(), budget);

        let output = tokio::select! {
            biased;
            _ = request.cancel.cancelled() => RunOutput::failed(ExecutionError::Cancelled),
            ran = tokio::time::timeout(budget, backend.run(request)) => match ran {
                Ok(output) => output,
                Err(_) => {
                    tracing::warn!(backend = %backend.kind(), budget_ms = budget.as_millis() as u64, "Backend overran its budget");
                    RunOutput::failed(ExecutionError::Timeout(request.timeout))
                }
            },
        };

        if let Some(elapsed) = self.registry.finish(request.id) {
            tracing::debug!(backend = %backend.kind(), elapsed_ms = elapsed.as_millis() as u64, "Backend finished");
        }
        output
    }

    /// Rewrite `script` for a host that runs it itself. Nothing executes.
    pub fn prepare_for_external_host(&self, script: &str) -> ExternalHostScript {
        prepare_for_external_host(script)
    }

    /// Cancel every in-flight execution on this coordinator. Returns how
    /// many were signalled.
    pub fn cancel_current(&self) -> usize {
        let cancelled = self.registry.cancel_all();
        tracing::info!(cancelled, "Cancel requested");
        cancelled
    }

    /// How long a request may take before the timer wins, for callers that
    /// want to bound their own waits.
    pub fn budget_for(&self, timeout: Duration) -> Duration {
        timeout + self.config.subprocess.exit_grace()
    }
}

pub fn prepare_for_external_host(script: &str) -> ExternalHostScript {
    let transform = rewriter::transform(script);
    ExternalHostScript {
        instrumented_script: transform.instrumented_script,
        result_line: transform.result_line,
        expression_line_map: transform.expression_line_map,
    }
}

fn transition(state: ExecutionState) {
    tracing::trace!(%state, terminal = state.is_terminal(), "State transition");
}
