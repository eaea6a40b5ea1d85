use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ExecutionError;
use crate::inspect::SerializedValue;

/* ===================== Requests ===================== */

/// One call to `Coordinator::execute`. Immutable once built.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub id: Uuid,
    pub script: String,
    pub timeout: Duration,
    pub cancellation: CancellationToken,
}

impl ExecutionRequest {
    pub fn new(script: impl Into<String>, timeout: Duration, cancellation: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            script: script.into(),
            timeout,
            cancellation,
        }
    }
}

/// Caller-side knobs for `execute`. Unset fields fall back to configuration.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/* ===================== Log entries ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Log,
    Info,
    Warn,
    Error,
    Result,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogKind {
    /// Map a console method name onto a log kind. Unknown methods log.
    pub fn from_console_method(method: &str) -> Self {
        match method {
            "info" => LogKind::Info,
            "warn" => LogKind::Warn,
            "error" => LogKind::Error,
            _ => LogKind::Log,
        }
    }

    pub fn level(self) -> LogLevel {
        match self {
            LogKind::Warn => LogLevel::Warn,
            LogKind::Error => LogLevel::Error,
            LogKind::Log | LogKind::Info | LogKind::Result => LogLevel::Info,
        }
    }
}

/// A console call or a captured expression value, in emission order.
///
/// The serde shape doubles as the runner's `LogEntryJSON` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub level: LogLevel,
    pub message: SerializedValue,
    #[serde(default)]
    pub line: Option<usize>,
}

impl LogEntry {
    pub fn new(kind: LogKind, message: SerializedValue, line: Option<usize>) -> Self {
        Self {
            kind,
            level: kind.level(),
            message,
            line,
        }
    }

    pub fn result(message: SerializedValue, line: Option<usize>) -> Self {
        Self::new(LogKind::Result, message, line)
    }
}

/* ===================== Results ===================== */

/// Terminal outcome of one `execute` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub value: Option<SerializedValue>,
    pub error: Option<String>,
    pub error_line: Option<usize>,
    pub logs: Vec<LogEntry>,
    pub result_line: Option<usize>,
}

impl ExecutionResult {
    pub fn completed(value: SerializedValue, result_line: Option<usize>, logs: Vec<LogEntry>) -> Self {
        Self {
            success: true,
            value: Some(value),
            error: None,
            error_line: None,
            logs,
            result_line,
        }
    }

    pub fn failed(error: &ExecutionError, logs: Vec<LogEntry>) -> Self {
        Self {
            success: false,
            value: None,
            error: Some(error.to_string()),
            error_line: error.line(),
            logs,
            result_line: None,
        }
    }

    pub fn cancelled() -> Self {
        Self::failed(&ExecutionError::Cancelled, Vec::new())
    }
}

/// Output of `prepare_for_external_host`: the instrumented text plus the
/// metadata a foreign host needs to attribute results back to lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalHostScript {
    pub instrumented_script: String,
    pub result_line: Option<usize>,
    pub expression_line_map: BTreeMap<usize, String>,
}

/* ===================== Lifecycle ===================== */

/// Coordinator state machine, reported through tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Idle,
    Deciding,
    RunningIsolated,
    RunningFallback,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionState::Idle => "idle",
            ExecutionState::Deciding => "deciding",
            ExecutionState::RunningIsolated => "running_isolated",
            ExecutionState::RunningFallback => "running_fallback",
            ExecutionState::Completed => "completed",
            ExecutionState::Failed => "failed",
            ExecutionState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}
