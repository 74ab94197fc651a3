//! Embedded interpreter for agent-authored code blocks.
//!
//! Scripts run in a fresh Rhai engine on a blocking worker. The language has
//! no file, process or network primitives, module resolution only sees the
//! helper modules granted by policy, and `eval` is disabled. The only bridge
//! to the host is the `ctx` object passed to the entry function, whose
//! methods forward to a [`CapabilityHost`].
//!
//! A cancel flag stops a script at its next operation batch or capability
//! call, so a cancelled run does not keep acting through its code block.
//!
//! Every failure mode is folded into an [`ExecutionOutcome`]; nothing a
//! script does can make [`CodeRuntime::execute`] return an error or panic.

use crate::footprint::MemoryMeter;
use crate::host::{CapabilityCall, CapabilityError, CapabilityHost};
use crate::limits::{EngineLimits, ExecutionLimits};
use crate::modules::{self, script_error};
use rhai::module_resolvers::StaticModuleResolver;
use rhai::{Dynamic, Engine, EvalAltResult, Map, Position, Scope, AST};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Name of the function every code block must define.
pub const ENTRY_FUNCTION: &str = "run";

/// Helper modules a policy may grant.
pub const AVAILABLE_MODULES: &[&str] = &[modules::JSON, modules::TEXT];

const MAX_LOG_LINE_CHARS: usize = 4096;

const DEADLINE_EXCEEDED: &str = "deadline exceeded";
const CANCELLED: &str = "cancelled";

/// Result of one code block execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timed_out: bool,
    pub logs: Vec<String>,
    pub duration_ms: u64,
}

impl ExecutionOutcome {
    fn failure(error: impl Into<String>, logs: Vec<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            value: None,
            error: Some(error.into()),
            timed_out: false,
            logs,
            duration_ms,
        }
    }
}

/// What a script can see of the host.
#[derive(Clone)]
pub struct ScriptEnvironment {
    pub host: Arc<dyn CapabilityHost>,
    /// Read-only variables exposed as `ctx.env`.
    pub env: BTreeMap<String, String>,
    /// Helper modules importable with `import "<name>" as <alias>;`.
    pub allowed_modules: Vec<String>,
    /// Set to `true` to stop the script.
    pub cancel: Option<watch::Receiver<bool>>,
}

impl ScriptEnvironment {
    pub fn new(host: Arc<dyn CapabilityHost>) -> Self {
        Self {
            host,
            env: BTreeMap::new(),
            allowed_modules: Vec::new(),
            cancel: None,
        }
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().is_some_and(|rx| *rx.borrow())
}

enum ScriptResult {
    Value(Value),
    Failed(String),
    TimedOut,
    Cancelled,
}

/// Captured `print`, `debug` and `ctx.log` output.
#[derive(Debug, Default)]
struct LogSink {
    lines: Vec<String>,
    max_lines: usize,
    dropped: usize,
}

impl LogSink {
    fn new(max_lines: usize) -> Self {
        Self {
            lines: Vec::new(),
            max_lines,
            dropped: 0,
        }
    }

    fn push(&mut self, line: String) {
        if self.lines.len() >= self.max_lines {
            self.dropped += 1;
            return;
        }
        let line = if line.chars().count() > MAX_LOG_LINE_CHARS {
            let mut cut: String = line.chars().take(MAX_LOG_LINE_CHARS).collect();
            cut.push_str("...");
            cut
        } else {
            line
        };
        self.lines.push(line);
    }

    fn take(&mut self) -> Vec<String> {
        let mut lines = std::mem::take(&mut self.lines);
        if self.dropped > 0 {
            lines.push(format!("... {} more log lines dropped", self.dropped));
            self.dropped = 0;
        }
        lines
    }
}

type SharedLogs = Arc<Mutex<LogSink>>;

fn push_log(logs: &SharedLogs, line: String) {
    logs.lock().unwrap_or_else(PoisonError::into_inner).push(line);
}

/// The `ctx` value handed to the entry function.
#[derive(Clone)]
struct ScriptContext {
    host: Arc<dyn CapabilityHost>,
    handle: Handle,
    deadline: Instant,
    cancel: Option<watch::Receiver<bool>>,
    logs: SharedLogs,
    env: Map,
}

impl ScriptContext {
    fn log(&mut self, message: Dynamic) {
        push_log(&self.logs, message.to_string());
    }

    /// Run a capability call to completion on the async host, bounded by
    /// whatever remains of the deadline.
    fn invoke(&mut self, call: CapabilityCall) -> Result<Dynamic, Box<EvalAltResult>> {
        if is_cancelled(&self.cancel) {
            return Err(terminated(CANCELLED));
        }
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(terminated(DEADLINE_EXCEEDED));
        }
        let name = call.name();
        let host = self.host.clone();
        let result = self
            .handle
            .block_on(async move { tokio::time::timeout(remaining, host.call(call)).await });
        match result {
            Err(_) => Err(terminated(DEADLINE_EXCEEDED)),
            Ok(Err(CapabilityError::Denied(reason))) => {
                debug!(capability = name, %reason, "capability denied");
                Err(script_error(format!("Permission denied: {reason}")))
            }
            Ok(Err(CapabilityError::Failed(message))) => {
                Err(script_error(format!("{name} failed: {message}")))
            }
            Ok(Ok(value)) => rhai::serde::to_dynamic(value),
        }
    }
}

/// Non-catchable stop carrying `reason` as its token.
fn terminated(reason: &str) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorTerminated(
        Dynamic::from(reason.to_string()),
        Position::NONE,
    ))
}

/// Executes code blocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct CodeRuntime;

impl CodeRuntime {
    pub fn new() -> Self {
        Self
    }

    /// Execute `code`'s entry function with `input` under `limits`.
    pub async fn execute(
        &self,
        code: &str,
        input: Value,
        environment: ScriptEnvironment,
        limits: &ExecutionLimits,
    ) -> ExecutionOutcome {
        let started = Instant::now();
        let deadline = started + limits.timeout;
        let engine_limits = limits.engine_limits();
        let logs: SharedLogs = Arc::new(Mutex::new(LogSink::new(engine_limits.max_log_lines)));

        let handle = Handle::current();
        let code = code.to_string();
        let worker_logs = logs.clone();
        let worker = tokio::task::spawn_blocking(move || {
            run_script(
                &code,
                input,
                environment,
                engine_limits,
                deadline,
                handle,
                worker_logs,
            )
        });

        let joined = tokio::time::timeout(limits.timeout + limits.grace, worker).await;
        let captured = logs.lock().unwrap_or_else(PoisonError::into_inner).take();
        let duration_ms = started.elapsed().as_millis() as u64;
        let time_limit_ms = limits.timeout.as_millis() as u64;

        match joined {
            Err(_) => {
                warn!(time_limit_ms, "code block did not stop within grace period");
                timed_out(time_limit_ms, captured, duration_ms)
            }
            Ok(Err(join_error)) => {
                let reason = if join_error.is_panic() {
                    "code block runtime panicked"
                } else {
                    "code block runtime was cancelled"
                };
                warn!(error = %join_error, "{reason}");
                ExecutionOutcome::failure(reason, captured, duration_ms)
            }
            Ok(Ok(ScriptResult::TimedOut)) => timed_out(time_limit_ms, captured, duration_ms),
            Ok(Ok(ScriptResult::Cancelled)) => {
                debug!(duration_ms, "code block cancelled");
                ExecutionOutcome::failure("code block cancelled", captured, duration_ms)
            }
            Ok(Ok(ScriptResult::Failed(error))) => {
                ExecutionOutcome::failure(error, captured, duration_ms)
            }
            Ok(Ok(ScriptResult::Value(value))) => ExecutionOutcome {
                success: true,
                value: Some(value),
                error: None,
                timed_out: false,
                logs: captured,
                duration_ms,
            },
        }
    }
}

fn timed_out(time_limit_ms: u64, logs: Vec<String>, duration_ms: u64) -> ExecutionOutcome {
    ExecutionOutcome {
        timed_out: true,
        ..ExecutionOutcome::failure(
            format!("code block exceeded time limit of {time_limit_ms}ms"),
            logs,
            duration_ms,
        )
    }
}

fn run_script(
    code: &str,
    input: Value,
    environment: ScriptEnvironment,
    limits: EngineLimits,
    deadline: Instant,
    handle: Handle,
    logs: SharedLogs,
) -> ScriptResult {
    let cancel = environment.cancel.clone();
    let engine = match build_engine(&environment.allowed_modules, &limits, deadline, &cancel, &logs) {
        Ok(engine) => engine,
        Err(error) => return ScriptResult::Failed(error),
    };

    let ast = match engine.compile(code) {
        Ok(ast) => ast,
        Err(e) => return ScriptResult::Failed(format!("parse error: {e}")),
    };
    let arity = match entry_arity(&ast) {
        Ok(arity) => arity,
        Err(error) => return ScriptResult::Failed(error),
    };

    let input = match rhai::serde::to_dynamic(input) {
        Ok(input) => input,
        Err(e) => return ScriptResult::Failed(format!("invalid input: {e}")),
    };
    let env: Map = environment
        .env
        .iter()
        .map(|(k, v)| (k.as_str().into(), Dynamic::from(v.clone())))
        .collect();
    let ctx = ScriptContext {
        host: environment.host,
        handle,
        deadline,
        cancel,
        logs,
        env,
    };

    let mut scope = Scope::new();
    let result = if arity == 1 {
        engine.call_fn::<Dynamic>(&mut scope, &ast, ENTRY_FUNCTION, (input,))
    } else {
        engine.call_fn::<Dynamic>(&mut scope, &ast, ENTRY_FUNCTION, (input, ctx))
    };

    match result {
        Ok(value) => match rhai::serde::from_dynamic::<Value>(&value) {
            Ok(value) => ScriptResult::Value(value),
            Err(e) => ScriptResult::Failed(format!("result is not JSON-representable: {e}")),
        },
        Err(err) => classify(*err),
    }
}

fn build_engine(
    allowed_modules: &[String],
    limits: &EngineLimits,
    deadline: Instant,
    cancel: &Option<watch::Receiver<bool>>,
    logs: &SharedLogs,
) -> Result<Engine, String> {
    let mut resolver = StaticModuleResolver::new();
    for name in allowed_modules {
        let module = modules::build(name).ok_or_else(|| format!("unknown module '{name}'"))?;
        resolver.insert(name.as_str(), module);
    }

    let mut engine = Engine::new();
    engine.set_module_resolver(resolver);
    engine.disable_symbol("eval");

    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_function_expr_depth);

    let meter = MemoryMeter::new(limits.max_retained_bytes);
    engine.on_var(move |_name, _index, context| {
        meter.observe(context.scope())?;
        Ok(None)
    });

    let progress_cancel = cancel.clone();
    engine.on_progress(move |ops| {
        if ops % 64 != 0 {
            None
        } else if is_cancelled(&progress_cancel) {
            Some(Dynamic::from(CANCELLED.to_string()))
        } else if Instant::now() >= deadline {
            Some(Dynamic::from(DEADLINE_EXCEEDED.to_string()))
        } else {
            None
        }
    });

    let print_logs = logs.clone();
    engine.on_print(move |text| push_log(&print_logs, text.to_string()));
    let debug_logs = logs.clone();
    engine.on_debug(move |text, _source, _pos| push_log(&debug_logs, format!("[debug] {text}")));

    engine
        .register_type_with_name::<ScriptContext>("Context")
        .register_fn("log", ScriptContext::log)
        .register_get("env", |ctx: &mut ScriptContext| ctx.env.clone())
        .register_fn("http_get", |ctx: &mut ScriptContext, url: &str| {
            ctx.invoke(CapabilityCall::HttpGet {
                url: url.to_string(),
            })
        })
        .register_fn(
            "http_post",
            |ctx: &mut ScriptContext, url: &str, body: Dynamic| {
                let body: Value = rhai::serde::from_dynamic(&body)?;
                ctx.invoke(CapabilityCall::HttpPost {
                    url: url.to_string(),
                    body,
                })
            },
        )
        .register_fn("read_file", |ctx: &mut ScriptContext, path: &str| {
            ctx.invoke(CapabilityCall::ReadFile {
                path: path.to_string(),
            })
        })
        .register_fn(
            "write_file",
            |ctx: &mut ScriptContext, path: &str, content: &str| {
                ctx.invoke(CapabilityCall::WriteFile {
                    path: path.to_string(),
                    content: content.to_string(),
                })
            },
        )
        .register_fn("list_dir", |ctx: &mut ScriptContext, path: &str| {
            ctx.invoke(CapabilityCall::ListDir {
                path: path.to_string(),
            })
        })
        .register_fn("exec", |ctx: &mut ScriptContext, command: &str| {
            ctx.invoke(CapabilityCall::Exec {
                command: command.to_string(),
            })
        });

    Ok(engine)
}

fn entry_arity(ast: &AST) -> Result<usize, String> {
    let entry = ast
        .iter_functions()
        .filter(|f| f.name == ENTRY_FUNCTION)
        .map(|f| f.params.len())
        .max();
    match entry {
        None => Err(format!(
            "entry function `{ENTRY_FUNCTION}(input, ctx)` is not defined"
        )),
        Some(arity @ 1..=2) => Ok(arity),
        Some(_) => Err(format!(
            "entry function `{ENTRY_FUNCTION}` must take (input) or (input, ctx)"
        )),
    }
}

fn classify(err: EvalAltResult) -> ScriptResult {
    match err {
        EvalAltResult::ErrorTerminated(token, _) => {
            let cancelled = token
                .into_immutable_string()
                .is_ok_and(|reason| reason.as_str() == CANCELLED);
            if cancelled {
                ScriptResult::Cancelled
            } else {
                ScriptResult::TimedOut
            }
        }
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => classify(*inner),
        EvalAltResult::ErrorDataTooLarge(what, _) => {
            ScriptResult::Failed(format!("memory limit exceeded: {what}"))
        }
        EvalAltResult::ErrorStackOverflow(_) => {
            ScriptResult::Failed("call depth limit exceeded".to_string())
        }
        EvalAltResult::ErrorRuntime(value, _) => {
            ScriptResult::Failed(format!("uncaught error: {value}"))
        }
        other => ScriptResult::Failed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::DenyAllHost;
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingHost {
        calls: Mutex<Vec<CapabilityCall>>,
    }

    #[async_trait]
    impl CapabilityHost for RecordingHost {
        async fn call(&self, call: CapabilityCall) -> Result<Value, CapabilityError> {
            self.calls.lock().unwrap().push(call.clone());
            match call {
                CapabilityCall::ReadFile { path } => Ok(Value::String(format!("contents of {path}"))),
                CapabilityCall::ListDir { .. } => Ok(serde_json::json!(["a.txt", "b.txt"])),
                CapabilityCall::Exec { .. } => {
                    Err(CapabilityError::Denied("command 'rm' is not allowed".to_string()))
                }
                _ => Ok(Value::Null),
            }
        }
    }

    struct SlowHost;

    #[async_trait]
    impl CapabilityHost for SlowHost {
        async fn call(&self, _call: CapabilityCall) -> Result<Value, CapabilityError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Value::Null)
        }
    }

    fn deny_all() -> ScriptEnvironment {
        ScriptEnvironment::new(Arc::new(DenyAllHost))
    }

    async fn run(code: &str, input: Value) -> ExecutionOutcome {
        CodeRuntime::new()
            .execute(code, input, deny_all(), &ExecutionLimits::default())
            .await
    }

    #[tokio::test]
    async fn test_entry_function_receives_input() {
        let outcome = run(
            "fn run(input, ctx) { #{ total: input.a + input.b, tag: `n=${input.a}` } }",
            serde_json::json!({"a": 40, "b": 2}),
        )
        .await;
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.value, Some(serde_json::json!({"total": 42, "tag": "n=40"})));
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn test_single_parameter_entry() {
        let outcome = run("fn run(input) { input.len() }", serde_json::json!([1, 2, 3])).await;
        assert_eq!(outcome.value, Some(serde_json::json!(3)));
    }

    #[tokio::test]
    async fn test_missing_entry_function_is_reported() {
        let outcome = run("fn main(input) { 1 }", Value::Null).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("entry function"));
    }

    #[tokio::test]
    async fn test_parse_error_is_normalized() {
        let outcome = run("fn run(input) { let = ; }", Value::Null).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("parse error"));
    }

    #[tokio::test]
    async fn test_thrown_error_is_normalized() {
        let outcome = run(r#"fn run(input) { throw "boom"; }"#, Value::Null).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("boom"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_infinite_loop_times_out() {
        let limits = ExecutionLimits::new(16, 200);
        let start = Instant::now();
        let outcome = CodeRuntime::new()
            .execute("fn run(input) { let n = 0; loop { n += 1; } }", Value::Null, deny_all(), &limits)
            .await;
        assert!(outcome.timed_out);
        assert!(!outcome.success);
        assert!(start.elapsed() < Duration::from_millis(200) + limits.grace + Duration::from_secs(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_host_stays_responsive_during_runaway_script() {
        let runtime = CodeRuntime::new();
        let limits = ExecutionLimits::new(16, 500);
        let runaway = runtime.execute("fn run(input) { let n = 0; loop { n += 1; } }", Value::Null, deny_all(), &limits);
        let quick = async {
            let started = Instant::now();
            let outcome = runtime
                .execute("fn run(input) { 1 }", Value::Null, deny_all(), &limits)
                .await;
            (outcome, started.elapsed())
        };
        let (runaway, (quick, elapsed)) = tokio::join!(runaway, quick);
        assert!(runaway.timed_out);
        assert!(quick.success);
        assert!(elapsed < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_memory_limit_is_controlled_failure() {
        let limits = ExecutionLimits::new(1, 5_000);
        let outcome = CodeRuntime::new()
            .execute(
                r#"fn run(input) { let s = "xxxxxxxx"; loop { s += s; } }"#,
                Value::Null,
                deny_all(),
                &limits,
            )
            .await;
        assert!(!outcome.success);
        assert!(!outcome.timed_out);
        assert!(outcome.error.unwrap().contains("memory limit"));
    }

    #[tokio::test]
    async fn test_many_retained_values_hit_memory_limit() {
        let limits = ExecutionLimits::new(1, 20_000);
        let outcome = CodeRuntime::new()
            .execute(
                r#"fn run(input) {
                    let s = "x";
                    while s.len() < 131072 { s += s; }
                    let kept = [];
                    for i in 0..200 { kept.push(s + i); }
                    kept.len()
                }"#,
                Value::Null,
                deny_all(),
                &limits,
            )
            .await;
        assert!(!outcome.success, "{:?}", outcome.value);
        assert!(!outcome.timed_out);
        assert!(outcome.error.unwrap().contains("memory limit"));
    }

    #[tokio::test]
    async fn test_retained_values_within_budget_succeed() {
        let limits = ExecutionLimits::new(1, 20_000);
        let outcome = CodeRuntime::new()
            .execute(
                r#"fn run(input) {
                    let kept = [];
                    for i in 0..50 { kept.push(`item ${i}`); }
                    kept.len()
                }"#,
                Value::Null,
                deny_all(),
                &limits,
            )
            .await;
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.value, Some(serde_json::json!(50)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_stops_running_script() {
        let (cancel, rx) = watch::channel(false);
        let mut environment = deny_all();
        environment.cancel = Some(rx);
        let limits = ExecutionLimits::new(16, 10_000);

        let started = Instant::now();
        let task = tokio::spawn(async move {
            CodeRuntime::new()
                .execute("fn run(input) { let n = 0; loop { n += 1; } }", Value::Null, environment, &limits)
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.send_replace(true);

        let outcome = task.await.unwrap();
        assert!(!outcome.success);
        assert!(!outcome.timed_out);
        assert_eq!(outcome.error.as_deref(), Some("code block cancelled"));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_script_makes_no_capability_calls() {
        let host = Arc::new(RecordingHost::default());
        let (_cancel, rx) = watch::channel(true);
        let mut environment = ScriptEnvironment::new(host.clone());
        environment.cancel = Some(rx);
        let outcome = CodeRuntime::new()
            .execute(
                r#"fn run(input, ctx) { try { ctx.read_file("/tmp/a") } catch (e) { "caught" } }"#,
                Value::Null,
                environment,
                &ExecutionLimits::default(),
            )
            .await;
        assert_eq!(outcome.error.as_deref(), Some("code block cancelled"));
        assert!(host.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deep_recursion_is_controlled_failure() {
        let outcome = run("fn down(n) { down(n + 1) } fn run(input) { down(0) }", Value::Null).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("call depth"));
    }

    #[tokio::test]
    async fn test_eval_is_disabled() {
        let outcome = run(r#"fn run(input) { eval("40 + 2") }"#, Value::Null).await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_print_and_log_are_captured() {
        let outcome = run(
            r#"fn run(input, ctx) { print("hello"); debug("state"); ctx.log("from ctx"); 0 }"#,
            Value::Null,
        )
        .await;
        assert!(outcome.success);
        assert_eq!(outcome.logs[0], "hello");
        assert!(outcome.logs[1].starts_with("[debug]"));
        assert_eq!(outcome.logs[2], "from ctx");
    }

    #[tokio::test]
    async fn test_modules_require_grant() {
        let code = r#"fn run(input) { import "json" as json; json::stringify(input) }"#;
        let denied = run(code, serde_json::json!({"a": 1})).await;
        assert!(!denied.success);

        let mut environment = deny_all();
        environment.allowed_modules = vec!["json".to_string()];
        let granted = CodeRuntime::new()
            .execute(code, serde_json::json!({"a": 1}), environment, &ExecutionLimits::default())
            .await;
        assert!(granted.success, "{:?}", granted.error);
        assert_eq!(granted.value, Some(Value::String(r#"{"a":1}"#.to_string())));
    }

    #[tokio::test]
    async fn test_text_module() {
        let mut environment = deny_all();
        environment.allowed_modules = vec!["text".to_string()];
        let outcome = CodeRuntime::new()
            .execute(
                r#"fn run(input) { import "text" as text; [text::words(input).len(), text::truncate(input, 5)] }"#,
                Value::String("alpha beta gamma".to_string()),
                environment,
                &ExecutionLimits::default(),
            )
            .await;
        assert_eq!(outcome.value, Some(serde_json::json!([3, "alpha"])));
    }

    #[tokio::test]
    async fn test_unknown_module_grant_is_configuration_error() {
        let mut environment = deny_all();
        environment.allowed_modules = vec!["fs".to_string()];
        let outcome = CodeRuntime::new()
            .execute("fn run(input) { 1 }", Value::Null, environment, &ExecutionLimits::default())
            .await;
        assert!(outcome.error.unwrap().contains("unknown module"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_denied_capability_is_catchable() {
        let outcome = run(
            r#"fn run(input, ctx) { try { ctx.exec("ls"); "ran" } catch (e) { `caught: ${e}` } }"#,
            Value::Null,
        )
        .await;
        let value = outcome.value.unwrap();
        assert!(value.as_str().unwrap().starts_with("caught: Permission denied"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_capabilities_route_through_host() {
        let host = Arc::new(RecordingHost::default());
        let environment = ScriptEnvironment::new(host.clone());
        let outcome = CodeRuntime::new()
            .execute(
                r#"fn run(input, ctx) {
                    let text = ctx.read_file("/tmp/in.txt");
                    let names = ctx.list_dir("/tmp");
                    ctx.write_file("/tmp/out.txt", text);
                    names.len()
                }"#,
                Value::Null,
                environment,
                &ExecutionLimits::default(),
            )
            .await;
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.value, Some(serde_json::json!(2)));

        let calls = host.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls[2],
            CapabilityCall::WriteFile {
                path: "/tmp/out.txt".to_string(),
                content: "contents of /tmp/in.txt".to_string(),
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_uncaught_denial_fails_block() {
        let host = Arc::new(RecordingHost::default());
        let outcome = CodeRuntime::new()
            .execute(
                r#"fn run(input, ctx) { ctx.exec("rm -rf /") }"#,
                Value::Null,
                ScriptEnvironment::new(host),
                &ExecutionLimits::default(),
            )
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("not allowed"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_capability_bounded_by_deadline() {
        let limits = ExecutionLimits::new(16, 300);
        let outcome = CodeRuntime::new()
            .execute(
                r#"fn run(input, ctx) { ctx.http_get("https://example.com") }"#,
                Value::Null,
                ScriptEnvironment::new(Arc::new(SlowHost)),
                &limits,
            )
            .await;
        assert!(outcome.timed_out);
        assert!(outcome.duration_ms < 2_000);
    }

    #[tokio::test]
    async fn test_env_is_exposed_read_only() {
        let mut environment = deny_all();
        environment.env.insert("REGION".to_string(), "eu".to_string());
        let outcome = CodeRuntime::new()
            .execute(
                r#"fn run(input, ctx) { let e = ctx.env; e.REGION = "us"; ctx.env.REGION }"#,
                Value::Null,
                environment,
                &ExecutionLimits::default(),
            )
            .await;
        assert_eq!(outcome.value, Some(Value::String("eu".to_string())));
    }
}
