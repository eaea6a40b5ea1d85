//! # Execution Backends
//!
//! Two strategies run an instrumented script:
//!
//! - [`isolated::IsolatedBackend`]: an embedded QuickJS context, in process,
//!   memory and stack bounded. No module loading.
//! - [`subprocess::SubprocessBackend`]: a Node.js child process driving the
//!   embedded runner program. Full host capabilities.
//!
//! The coordinator only looks at what a backend declares through
//! [`BackendCapabilities`]; it never checks which backend it is holding.

pub mod isolated;
pub mod registry;
pub mod subprocess;

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ExecutionError;
use crate::inspect::SerializedValue;
use crate::rewriter::{self, HostCapability, TransformationResult};
use crate::types::LogEntry;

pub use registry::ExecutionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Isolated,
    Subprocess,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Isolated => f.write_str("isolated"),
            BackendKind::Subprocess => f.write_str("subprocess"),
        }
    }
}

// ============================================================================
// Capability trait
// ============================================================================

/// What a backend can do. Object safe so selection can work over
/// `&dyn BackendCapabilities`.
pub trait BackendCapabilities {
    fn kind(&self) -> BackendKind;

    /// Whether scripts may load modules (`require`, rewritten imports).
    fn supports_modules(&self) -> bool;

    fn supports_host_capability(&self, capability: HostCapability) -> bool;

    /// Whether the backend can run anything at all right now.
    fn is_available(&self) -> bool;

    /// Human-readable detail for `backends` reports.
    fn describe(&self) -> String {
        self.kind().to_string()
    }
}

/// A backend that can run one request to completion.
///
/// `run` must honour `request.cancel` and must release every resource it
/// holds (engine context, child process, temp files) before resolving, or
/// when its future is dropped.
pub trait ExecutionBackend: BackendCapabilities + Send + Sync {
    fn run(&self, request: &BackendRequest) -> impl Future<Output = RunOutput> + Send;
}

// ============================================================================
// Request / output
// ============================================================================

#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub id: Uuid,
    /// The user's original text
    pub script: String,
    pub transform: TransformationResult,
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl BackendRequest {
    /// Rewrite `script` and bundle it with its limits.
    pub fn new(id: Uuid, script: impl Into<String>, timeout: Duration, cancel: CancellationToken) -> Self {
        let script = script.into();
        let transform = rewriter::transform(&script);
        Self {
            id,
            script,
            transform,
            timeout,
            cancel,
        }
    }
}

/// Successful completion of a script.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub value: SerializedValue,
    pub result_line: Option<usize>,
}

/// Logs collected so far plus how the run ended. Logs survive failures.
#[derive(Debug)]
pub struct RunOutput {
    pub logs: Vec<LogEntry>,
    pub outcome: Result<Completion, ExecutionError>,
}

impl RunOutput {
    pub fn completed(value: SerializedValue, result_line: Option<usize>, logs: Vec<LogEntry>) -> Self {
        Self {
            logs,
            outcome: Ok(Completion { value, result_line }),
        }
    }

    pub fn failed(error: ExecutionError) -> Self {
        Self::failed_with_logs(error, Vec::new())
    }

    pub fn failed_with_logs(error: ExecutionError, logs: Vec<LogEntry>) -> Self {
        Self {
            logs,
            outcome: Err(error),
        }
    }
}
