//! Execution environment for model-written snippets.
//!
//! Each session owns one [`Repl`]: a Rhai engine plus a persistent scope seeded
//! with the session's `context`. Top-level `let` bindings survive from one
//! [`Repl::execute`] call to the next; nothing is shared with other sessions.
//!
//! Capabilities (`print`, `llm_query`, the text helpers) are registered on the
//! engine rather than placed in the scope, so a snippet cannot shadow or
//! delete them.
//!
//! Snippet failures, timeouts and operation-limit hits are returned as
//! diagnostic output. Only a transport failure inside a delegated session is
//! an `Err`, and it aborts the snippet even if the snippet catches it.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::Result;
use regex::Regex;
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Array, Dynamic, Engine, EvalAltResult, Position, Scope};
use tracing::{debug, instrument, warn};

use crate::core::budget::remaining_budget;
use crate::core::truncate::truncate_output;
use crate::io::config::SessionConfig;

/// Name of the scope binding that holds the session context.
pub const CONTEXT_BINDING: &str = "context";
/// Prefix of the diagnostic returned for a failed snippet.
pub const ERROR_PREFIX: &str = "REPL Error: ";

type RhaiResult<T> = Result<T, Box<EvalAltResult>>;

/// Recursive delegation capability injected into the environment.
pub trait Delegate {
    /// Answer `query` in a fresh session over `context` (the caller's context
    /// when `None`). Exhaustion is reported as answer text, not as an error.
    fn delegate(&self, query: &str, context: Option<&str>) -> Result<String>;
}

/// Resource limits applied to every `execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplLimits {
    pub timeout: Duration,
    /// 0 = unlimited.
    pub max_operations: u64,
    pub output_limit_bytes: usize,
}

impl From<&SessionConfig> for ReplLimits {
    fn from(config: &SessionConfig) -> Self {
        Self {
            timeout: config.snippet_timeout,
            max_operations: config.max_operations,
            output_limit_bytes: config.output_limit_bytes,
        }
    }
}

/// Result of running one snippet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    /// Printed text, or the diagnostic when `failed`.
    pub output: String,
    pub failed: bool,
    pub truncated_bytes: usize,
}

/// State shared between the engine callbacks and the current `execute` call.
#[derive(Default)]
struct CallState {
    output: RefCell<String>,
    deadline: Cell<Option<Instant>>,
    fault: RefCell<Option<anyhow::Error>>,
}

impl CallState {
    fn begin(&self, timeout: Duration) {
        self.output.borrow_mut().clear();
        self.deadline.set(Some(Instant::now() + timeout));
    }

    fn end(&self) {
        self.deadline.set(None);
    }

    fn push_line(&self, text: &str) {
        let mut output = self.output.borrow_mut();
        output.push_str(text);
        output.push('\n');
    }

    fn take_output(&self) -> String {
        std::mem::take(&mut *self.output.borrow_mut())
    }

    /// Push the deadline back by time spent outside this snippet.
    fn extend(&self, by: Duration) {
        if let Some(at) = self.deadline.get() {
            self.deadline.set(Some(at + by));
        }
    }

    fn expired(&self) -> bool {
        self.deadline
            .get()
            .is_some_and(|at| remaining_budget(at).is_err())
    }

    /// Keep the first fault; later ones are consequences of it.
    fn record_fault(&self, err: anyhow::Error) {
        let mut slot = self.fault.borrow_mut();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn has_fault(&self) -> bool {
        self.fault.borrow().is_some()
    }

    fn take_fault(&self) -> Option<anyhow::Error> {
        self.fault.borrow_mut().take()
    }
}

/// A session's execution environment.
pub struct Repl {
    engine: Engine,
    scope: Scope<'static>,
    limits: ReplLimits,
    state: Rc<CallState>,
}

impl Repl {
    pub fn new(context: &str, delegate: Rc<dyn Delegate>, limits: ReplLimits) -> Self {
        let state = Rc::new(CallState::default());
        let mut engine = Engine::new();
        engine.set_module_resolver(DummyModuleResolver::new());
        engine.set_max_operations(limits.max_operations);

        let sink = Rc::clone(&state);
        engine.on_print(move |text| sink.push_line(text));
        let sink = Rc::clone(&state);
        engine.on_debug(move |text, _source, _pos: Position| {
            sink.push_line(&format!("[debug] {text}"));
        });
        let watch = Rc::clone(&state);
        engine.on_progress(move |_operations| {
            (watch.has_fault() || watch.expired()).then_some(Dynamic::UNIT)
        });

        register_delegation(&mut engine, &delegate, &state);
        register_text_helpers(&mut engine);

        let mut scope = Scope::new();
        scope.push(CONTEXT_BINDING, context.to_string());

        Self {
            engine,
            scope,
            limits,
            state,
        }
    }

    /// Run `snippet` against the session bindings.
    ///
    /// Returns `Err` only when a delegated session hit a transport failure.
    #[instrument(skip_all, fields(snippet_bytes = snippet.len()))]
    pub fn execute(&mut self, snippet: &str) -> Result<Execution> {
        self.state.begin(self.limits.timeout);
        let result = self.engine.run_with_scope(&mut self.scope, snippet);
        self.state.end();
        let printed = self.state.take_output();

        if let Some(fault) = self.state.take_fault() {
            return Err(fault.context("delegated session failed"));
        }

        let (text, failed) = match result {
            Ok(()) => (printed, false),
            Err(err) => {
                let diagnostic = describe_failure(&err, self.limits.timeout);
                warn!(error = %diagnostic, "snippet failed");
                (format!("{ERROR_PREFIX}{diagnostic}"), true)
            }
        };
        let (output, truncated_bytes) = truncate_output(&text, self.limits.output_limit_bytes);
        debug!(output_bytes = output.len(), failed, truncated_bytes, "snippet executed");
        Ok(Execution {
            output,
            failed,
            truncated_bytes,
        })
    }

    /// Current value of a binding rendered as text.
    pub fn binding(&self, name: &str) -> Option<String> {
        self.scope
            .get_value::<Dynamic>(name)
            .map(|value| value.to_string())
    }
}

fn describe_failure(err: &EvalAltResult, timeout: Duration) -> String {
    match err {
        EvalAltResult::ErrorTerminated(..) => format!("execution timed out after {timeout:?}"),
        EvalAltResult::ErrorTooManyOperations(..) => "operation limit exceeded".to_string(),
        other => other.to_string(),
    }
}

fn register_delegation(engine: &mut Engine, delegate: &Rc<dyn Delegate>, state: &Rc<CallState>) {
    let (target, watch) = (Rc::clone(delegate), Rc::clone(state));
    engine.register_fn("llm_query", move |query: &str| -> RhaiResult<String> {
        call_delegate(target.as_ref(), &watch, query, None)
    });
    let (target, watch) = (Rc::clone(delegate), Rc::clone(state));
    engine.register_fn(
        "llm_query",
        move |query: &str, context: &str| -> RhaiResult<String> {
            call_delegate(target.as_ref(), &watch, query, Some(context))
        },
    );
}

fn call_delegate(
    delegate: &dyn Delegate,
    state: &CallState,
    query: &str,
    context: Option<&str>,
) -> RhaiResult<String> {
    let context = context.filter(|text| !text.is_empty());
    let started = Instant::now();
    let result = delegate.delegate(query, context);
    state.extend(started.elapsed());
    match result {
        Ok(answer) => Ok(answer),
        Err(err) => {
            let message = format!("llm_query failed: {err:#}");
            state.record_fault(err);
            Err(message.into())
        }
    }
}

fn register_text_helpers(engine: &mut Engine) {
    engine.register_fn("slice", |text: &str, start: i64, end: i64| {
        slice_chars(text, start, end)
    });
    engine.register_fn("slice", |text: &str, start: i64| {
        slice_chars(text, start, i64::MAX)
    });
    engine.register_fn("lines", |text: &str| -> Array {
        text.lines().map(|line| Dynamic::from(line.to_string())).collect()
    });
    engine.register_fn("chunks", |text: &str, size: i64| -> RhaiResult<Array> {
        let size = usize::try_from(size)
            .ok()
            .filter(|size| *size > 0)
            .ok_or_else(|| format!("chunk size must be positive, got {size}"))?;
        let chars: Vec<char> = text.chars().collect();
        Ok(chars
            .chunks(size)
            .map(|chunk| Dynamic::from(chunk.iter().collect::<String>()))
            .collect())
    });
    engine.register_fn("grep", |text: &str, pattern: &str| -> RhaiResult<Array> {
        let re = compile(pattern)?;
        Ok(text
            .lines()
            .enumerate()
            .filter(|(_, line)| re.is_match(line))
            .map(|(idx, line)| Dynamic::from(format!("{}:{}", idx + 1, line)))
            .collect())
    });
    engine.register_fn("find_all", |text: &str, pattern: &str| -> RhaiResult<Array> {
        let re = compile(pattern)?;
        Ok(re
            .find_iter(text)
            .map(|found| Dynamic::from(found.as_str().to_string()))
            .collect())
    });
}

fn compile(pattern: &str) -> RhaiResult<Regex> {
    Regex::new(pattern).map_err(|err| format!("invalid pattern {pattern:?}: {err}").into())
}

/// Character slice with Python semantics: negative indices count from the
/// end and out-of-range indices clamp.
fn slice_chars(text: &str, start: i64, end: i64) -> String {
    let len = i64::try_from(text.chars().count()).unwrap_or(i64::MAX);
    let clamp = |idx: i64| -> usize {
        let idx = if idx < 0 {
            len.saturating_add(idx).max(0)
        } else {
            idx.min(len)
        };
        usize::try_from(idx).unwrap_or(0)
    };
    let (start, end) = (clamp(start), clamp(end));
    if start >= end {
        return String::new();
    }
    text.chars().skip(start).take(end - start).collect()
}
