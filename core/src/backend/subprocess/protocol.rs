//! Wire format between the backend and the runner program.
//!
//! The payload file is one JSON object. The runner answers with exactly one
//! JSON line on stdout, which may be preceded by unrelated noise.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::backend::RunOutput;
use crate::error::ExecutionError;
use crate::inspect::SerializedValue;
use crate::types::LogEntry;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerPayload<'a> {
    pub script: &'a str,
    pub normalized_script: &'a str,
    pub instrumented_script: &'a str,
    pub result_line: Option<usize>,
    pub expression_line_map: &'a BTreeMap<usize, String>,
    pub working_directory: &'a Path,
    pub timeout_ms: u64,
    /// Run inside an async wrapper (the script awaits)
    pub async_wrapper: bool,
    pub audio_types: BTreeMap<&'static str, &'static [&'static str]>,
    pub audio_node_properties: &'static [&'static str],
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyntaxErrorReply {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerReply {
    pub success: bool,
    #[serde(default)]
    pub syntax_error: Option<SyntaxErrorReply>,
    #[serde(default)]
    pub result: Option<SerializedValue>,
    #[serde(default)]
    pub result_line: Option<usize>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_line: Option<usize>,
    /// Set when the runner's own promise race expired
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub output: Vec<LogEntry>,
}

impl RunnerReply {
    /// Map the reply onto a backend outcome. `source` is the text syntax
    /// errors are located in.
    pub fn into_output(self, source: &str, timeout: Duration) -> RunOutput {
        if let Some(syntax) = self.syntax_error {
            let error = ExecutionError::syntax(source, syntax.message, syntax.line, syntax.column);
            return RunOutput::failed_with_logs(error, self.output);
        }
        if self.success {
            // `null` results decode as a missing field
            let value = self.result.unwrap_or(SerializedValue::Null);
            return RunOutput::completed(value, self.result_line, self.output);
        }
        let error = if self.timed_out {
            ExecutionError::Timeout(timeout)
        } else {
            ExecutionError::runtime(
                self.error.unwrap_or_else(|| "Error: unknown failure".to_string()),
                self.error_line,
            )
        };
        RunOutput::failed_with_logs(error, self.output)
    }
}

/// `line` as a reply, if it is one.
pub fn parse_reply(line: &str) -> Option<RunnerReply> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str(line).ok()
}
