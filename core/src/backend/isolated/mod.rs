//! In-process backend on an embedded QuickJS engine.
//!
//! Each run owns a fresh runtime and context on a blocking thread:
//!
//! 1. Memory and stack limits are applied, and an interrupt handler polls
//!    the abort flag and the deadline
//! 2. The prelude installs `console`, `module`/`exports` and throwing stubs
//!    for every host capability
//! 3. The normalized script is compiled, not run, to surface syntax errors
//! 4. The instrumented script runs inside the invocation wrapper; a returned
//!    promise is driven through the job queue until it settles or time is up
//!
//! Runtime and context are dropped on every exit path when `execute` returns.

mod bridge;


use rquickjs::function::Rest;
use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, Function, Runtime, Value};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{BackendCapabilities, BackendKind, BackendRequest, Completion, ExecutionBackend, RunOutput};
use crate::config::IsolatedSettings;
use crate::error::ExecutionError;
use crate::error_map;
use crate::inspect::{inspect, SerializedValue};
use crate::rewriter::{self, HostCapability, CAPTURE_FUNCTION, WRAPPER_LINES};
use crate::types::{LogEntry, LogKind};

const PRELUDE: &str = include_str!("prelude.js");

type SharedLogs = Rc<RefCell<Vec<LogEntry>>>;

#[derive(Debug, Clone, Default)]
pub struct IsolatedBackend {
    settings: IsolatedSettings,
}

impl IsolatedBackend {
    pub fn new(settings: IsolatedSettings) -> Self {
        Self { settings }
    }
}

impl BackendCapabilities for IsolatedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Isolated
    }

    fn supports_modules(&self) -> bool {
        false
    }

    fn supports_host_capability(&self, _capability: HostCapability) -> bool {
        false
    }

    fn is_available(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!(
            "isolated (QuickJS, {} MiB heap)",
            self.settings.memory_limit_bytes / (1024 * 1024)
        )
    }
}

impl ExecutionBackend for IsolatedBackend {
    #[tracing::instrument(skip_all, fields(request_id = %request.id, backend = "isolated"))]
    async fn run(&self, request: &BackendRequest) -> RunOutput {
        if request.cancel.is_cancelled() {
            return RunOutput::failed(ExecutionError::Cancelled);
        }

        let job = Job {
            normalized: request.transform.normalized_script.clone(),
            instrumented: request.transform.instrumented_script.clone(),
            result_line: request.transform.result_line,
            timeout: request.timeout,
            settings: self.settings.clone(),
        };

        let abort = AbortOnDrop::default();
        let flag = abort.flag();
        let handle = tokio::task::spawn_blocking(move || job.execute(flag));

        tokio::select! {
            biased;
            _ = request.cancel.cancelled() => {
                abort.trigger();
                RunOutput::failed(ExecutionError::Cancelled)
            }
            joined = handle => joined.unwrap_or_else(|e| {
                tracing::error!(error = %e, "Isolated engine thread failed");
                RunOutput::failed(ExecutionError::Protocol(format!("isolated engine failed: {e}")))
            }),
        }
    }
}

/// Sets the abort flag when the run future is dropped (coordinator timeout)
/// so the engine thread stops at its next interrupt poll.
#[derive(Debug, Default)]
struct AbortOnDrop(Arc<AtomicBool>);

impl AbortOnDrop {
    fn flag(&self) -> Arc<AtomicBool> {
        self.0.clone()
    }

    fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.trigger();
    }
}

/* ===================== Engine thread ===================== */

struct Job {
    normalized: String,
    instrumented: String,
    result_line: Option<usize>,
    timeout: Duration,
    settings: IsolatedSettings,
}

/// How the interrupt handler stopped the engine, if it did.
struct Interrupts {
    abort: Arc<AtomicBool>,
    timed_out: Arc<AtomicBool>,
    deadline: Instant,
}

impl Interrupts {
    fn check(&self) -> Option<ExecutionError> {
        if self.abort.load(Ordering::SeqCst) {
            Some(ExecutionError::Cancelled)
        } else if self.timed_out.load(Ordering::SeqCst) || Instant::now() >= self.deadline {
            Some(ExecutionError::Timeout(Duration::ZERO))
        } else {
            None
        }
    }

    /// Whether the interrupt handler itself stopped the engine.
    fn interrupted(&self) -> Option<ExecutionError> {
        if self.abort.load(Ordering::SeqCst) {
            Some(ExecutionError::Cancelled)
        } else if self.timed_out.load(Ordering::SeqCst) {
            Some(ExecutionError::Timeout(Duration::ZERO))
        } else {
            None
        }
    }
}

impl Job {
    fn execute(self, abort: Arc<AtomicBool>) -> RunOutput {
        let interrupts = Interrupts {
            abort,
            timed_out: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now() + self.timeout,
        };

        let runtime = match Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                return RunOutput::failed(ExecutionError::BackendUnavailable(format!(
                    "failed to start QuickJS: {e}"
                )))
            }
        };
        runtime.set_memory_limit(self.settings.memory_limit_bytes);
        runtime.set_max_stack_size(self.settings.max_stack_bytes);
        {
            let abort = interrupts.abort.clone();
            let timed_out = interrupts.timed_out.clone();
            let deadline = interrupts.deadline;
            runtime.set_interrupt_handler(Some(Box::new(move || {
                if abort.load(Ordering::SeqCst) {
                    return true;
                }
                if Instant::now() >= deadline {
                    timed_out.store(true, Ordering::SeqCst);
                    return true;
                }
                false
            })));
        }

        let context = match Context::full(&runtime) {
            Ok(context) => context,
            Err(e) => {
                return RunOutput::failed(ExecutionError::BackendUnavailable(format!(
                    "failed to create QuickJS context: {e}"
                )))
            }
        };

        let logs: SharedLogs = Rc::new(RefCell::new(Vec::new()));
        let outcome = context.with(|ctx| self.evaluate(&ctx, &logs, &interrupts));
        drop(context);
        drop(runtime);

        let logs = logs.take();
        let outcome = outcome.map_err(|error| match error {
            // An interrupted engine throws a generic error; report why
            ExecutionError::Runtime { .. } => match interrupts.interrupted() {
                Some(ExecutionError::Cancelled) => ExecutionError::Cancelled,
                Some(_) => ExecutionError::Timeout(self.timeout),
                None => error,
            },
            ExecutionError::Timeout(_) => match interrupts.check() {
                Some(ExecutionError::Cancelled) => ExecutionError::Cancelled,
                Some(_) => ExecutionError::Timeout(self.timeout),
                None => error,
            },
            other => other,
        });

        match outcome {
            Ok(completion) => RunOutput {
                logs,
                outcome: Ok(completion),
            },
            Err(error) => RunOutput::failed_with_logs(error, logs),
        }
    }

    fn evaluate<'js>(
        &self,
        ctx: &Ctx<'js>,
        logs: &SharedLogs,
        interrupts: &Interrupts,
    ) -> Result<Completion, ExecutionError> {
        install_globals(ctx, logs)
            .catch(ctx)
            .map_err(|e| ExecutionError::Protocol(format!("failed to prepare context: {e}")))?;

        // Compile only: the wrapper function is never called
        ctx.eval::<Value, _>(rewriter::wrap_for_syntax_check(&self.normalized))
            .catch(ctx)
            .map_err(|e| map_caught(&e, &self.normalized))?;

        let is_async = rewriter::needs_async_wrapper(&self.instrumented);
        let returned = ctx
            .eval::<Value, _>(rewriter::wrap_invocation(&self.instrumented, is_async))
            .catch(ctx)
            .map_err(|e| map_caught(&e, &self.normalized))?;

        let value = match returned.as_promise() {
            Some(promise) => loop {
                if let Some(settled) = promise.result::<Value>() {
                    break settled.catch(ctx).map_err(|e| map_caught(&e, &self.normalized))?;
                }
                if let Some(stop) = interrupts.check() {
                    return Err(stop);
                }
                if !ctx.execute_pending_job() {
                    // Nothing queued can ever settle it
                    return Err(ExecutionError::Timeout(self.timeout));
                }
            },
            None => returned,
        };

        // Let callbacks queued by the script (`.then(console.log)`) run
        while interrupts.check().is_none() && ctx.execute_pending_job() {}

        Ok(Completion {
            value: inspect(&value),
            result_line: self.result_line,
        })
    }
}

/* ===================== Globals ===================== */

fn install_globals<'js>(ctx: &Ctx<'js>, logs: &SharedLogs) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let capture_logs = logs.clone();
    let capture = Function::new(ctx.clone(), move |value: Value<'js>, line: i32| -> Value<'js> {
        // Inspect first: getters may log while being read
        let serialized = inspect(&value);
        capture_logs
            .borrow_mut()
            .push(LogEntry::result(serialized, usize::try_from(line).ok()));
        value
    })?;
    globals.set(CAPTURE_FUNCTION, capture)?;

    let console_logs = logs.clone();
    let host_console = Function::new(
        ctx.clone(),
        move |method: String, stack: String, args: Rest<Value<'js>>| {
            let message = console_message(&args.0);
            let line = error_map::line_from_stack(&stack, WRAPPER_LINES);
            console_logs
                .borrow_mut()
                .push(LogEntry::new(LogKind::from_console_method(&method), message, line));
        },
    )?;

    let unavailable: Vec<String> = HostCapability::ALL
        .iter()
        .flat_map(|capability| capability.globals().iter().map(|name| name.to_string()))
        .collect();

    let prelude: Function = ctx.eval(PRELUDE)?;
    prelude.call::<_, ()>((globals, host_console, unavailable))
}

/// One argument logs as itself; several log as an array.
fn console_message(args: &[Value<'_>]) -> SerializedValue {
    match args {
        [single] => inspect(single),
        many => SerializedValue::Array {
            length: many.len(),
            items: many.iter().map(inspect).collect(),
        },
    }
}

fn map_caught(error: &CaughtError<'_>, source: &str) -> ExecutionError {
    let CaughtError::Exception(exception) = error else {
        return ExecutionError::runtime(bridge::describe_caught(error), None);
    };

    let object = exception.as_object();
    let name: Option<String> = object.get("name").ok();
    let stack = exception.stack().unwrap_or_default();
    let located = error_map::location_from_stack(&stack, WRAPPER_LINES).or_else(|| {
        let raw = usize::try_from(object.get::<_, Option<i32>>("lineNumber").ok().flatten()?).ok()?;
        let column = object
            .get::<_, Option<i32>>("columnNumber")
            .ok()
            .flatten()
            .and_then(|c| usize::try_from(c).ok())
            .unwrap_or(1);
        let line = raw.checked_sub(WRAPPER_LINES).filter(|&line| line > 0)?;
        Some(error_map::SourceLocation::new(line, column))
    });

    if name.as_deref() == Some("SyntaxError") {
        let location = located.unwrap_or(error_map::SourceLocation::new(1, 1));
        return ExecutionError::syntax(
            source,
            exception.message().unwrap_or_default(),
            location.line,
            location.column,
        );
    }

    ExecutionError::runtime(
        bridge::describe_caught(error),
        located.map(|location| location.line),
    )
}
