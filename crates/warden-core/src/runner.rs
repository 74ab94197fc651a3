//! Run coordination.
//!
//! A run walks one agent's step graph from its input step. Every run gets a
//! snapshot of the agent's permission model and its own evaluator, so rate
//! limits and session approvals never leak between runs. Steps execute one
//! at a time; runs execute concurrently.
//!
//! Each run emits exactly one terminal event (`run-completed` or
//! `run-error`), including when it is stopped or its task panics.

use crate::agent::AgentDefinition;
use crate::audit::AuditRecorder;
use crate::config::Config;
use crate::confirm::{ConfirmBroker, Decision, DEFAULT_CONFIRMATION_TIMEOUT};
use crate::error::WardenError;
use crate::events::{EventReceiver, EventSender, RunEmitter, RunEventType};
use crate::gate::{event_value, ActionGate, RunCapabilityHost, AUDIT_CODE_EXEC, AUDIT_TOOL_CALL};
use crate::graph::{MatchMode, Predicate, Step, StepKind};
use crate::template::{render, render_json, render_value, Variables};
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use warden_policy::redact::DEFAULT_PAYLOAD_CAP;
use warden_policy::{ActionRequest, PolicyEvaluator};
use warden_provider::{ProviderError, ProviderRegistry, Request, StreamEvent};
use warden_sandbox::{CodeRuntime, ExecutionLimits, ScriptEnvironment};
use warden_store::{AuditOutcome, AuditSink, DocumentStore};
use warden_tools::{ToolContext, ToolError, ToolRegistry};

/// Agent definitions, keyed by agent id.
pub type AgentStore = Arc<dyn DocumentStore<AgentDefinition>>;

/// Runner settings.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub confirmation_timeout: Duration,
    pub audit_payload_cap: usize,
    /// Base directory for relative tool paths.
    pub working_dir: PathBuf,
    /// Timeout for tools without a policy-specific one.
    pub tool_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            audit_payload_cap: DEFAULT_PAYLOAD_CAP,
            working_dir: std::env::current_dir().unwrap_or_default(),
            tool_timeout: Duration::from_secs(120),
        }
    }
}

impl RunnerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            confirmation_timeout: config.confirmation_timeout(),
            audit_payload_cap: config.audit_payload_cap,
            working_dir: config
                .working_dir
                .clone()
                .unwrap_or_else(|| std::env::current_dir().unwrap_or_default()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAck {
    pub run_id: String,
    pub started: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopAck {
    pub stopped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmAck {
    pub confirmed: bool,
}

/// State of one active run. Dropped when the run ends.
struct RunState {
    agent_id: String,
    cancel: watch::Sender<bool>,
}

struct RunnerInner {
    agents: AgentStore,
    providers: ProviderRegistry,
    tools: ToolRegistry,
    audit: Arc<dyn AuditSink>,
    broker: ConfirmBroker,
    runtime: CodeRuntime,
    config: RunnerConfig,
    active: Mutex<HashMap<String, RunState>>,
    events: EventSender,
}

impl RunnerInner {
    fn active(&self) -> std::sync::MutexGuard<'_, HashMap<String, RunState>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Starts, stops and answers confirmations for agent runs.
#[derive(Clone)]
pub struct Runner {
    inner: Arc<RunnerInner>,
}

impl Runner {
    /// Create a runner. Events of every run arrive on the returned receiver.
    pub fn new(
        agents: AgentStore,
        providers: ProviderRegistry,
        tools: ToolRegistry,
        audit: Arc<dyn AuditSink>,
        config: RunnerConfig,
    ) -> (Self, EventReceiver) {
        let (events, receiver) = mpsc::unbounded_channel();
        let runner = Self {
            inner: Arc::new(RunnerInner {
                agents,
                providers,
                tools,
                audit,
                broker: ConfirmBroker::new(),
                runtime: CodeRuntime::new(),
                config,
                active: Mutex::new(HashMap::new()),
                events,
            }),
        };
        (runner, receiver)
    }

    /// Start a run of `agent_id`. Returns as soon as the run is spawned.
    pub async fn start(
        &self,
        agent_id: &str,
        user_message: impl Into<String>,
        run_id: Option<String>,
    ) -> Result<StartAck, WardenError> {
        let inner = &self.inner;
        let agent = inner
            .agents
            .get(agent_id)
            .await?
            .ok_or_else(|| WardenError::NotFound(format!("agent '{agent_id}'")))?;
        agent.validate()?;
        self.check_references(&agent)?;

        let run_id = run_id.unwrap_or_else(|| ulid::Ulid::new().to_string());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        {
            let mut active = inner.active();
            if active.contains_key(&run_id) {
                return Err(WardenError::Validation(format!(
                    "run '{run_id}' is already active"
                )));
            }
            active.insert(
                run_id.clone(),
                RunState {
                    agent_id: agent.id.clone(),
                    cancel: cancel_tx,
                },
            );
        }

        let user_message = user_message.into();
        let emitter = RunEmitter::new(&run_id, inner.events.clone());
        let audit = if agent.audit_enabled {
            AuditRecorder::new(
                Some(inner.audit.clone()),
                &agent.id,
                &run_id,
                inner.config.audit_payload_cap,
            )
        } else {
            AuditRecorder::disabled(&agent.id, &run_id)
        };
        let permissions = Arc::new(agent.permissions.clone());
        let gate = Arc::new(ActionGate {
            permissions: permissions.clone(),
            evaluator: PolicyEvaluator::new(),
            broker: inner.broker.clone(),
            confirmation_timeout: inner.config.confirmation_timeout,
            emitter: emitter.clone(),
            audit: audit.clone(),
            tools: inner.tools.clone(),
            tool_context: ToolContext {
                working_dir: inner.config.working_dir.clone(),
                run_id: run_id.clone(),
                timeout: inner.config.tool_timeout,
                permissions,
            },
            cancel: cancel_rx.clone(),
        });

        emitter.emit(
            RunEventType::RunStarted,
            json!({"agentId": agent.id, "agentName": agent.name}),
        );
        audit
            .record(
                RunEventType::RunStarted.as_str(),
                None,
                &json!({"agentName": agent.name, "message": user_message}),
                AuditOutcome::Success,
                None,
            )
            .await;
        info!(run_id = %run_id, agent_id = %agent.id, "Run started");

        let execution = RunExecution {
            agent: Arc::new(agent),
            gate,
            providers: inner.providers.clone(),
            runtime: inner.runtime,
            cancel: cancel_rx,
            vars: Variables::new(),
        };
        tokio::spawn(drive(inner.clone(), execution, emitter, audit, user_message));

        Ok(StartAck {
            run_id,
            started: true,
        })
    }

    fn check_references(&self, agent: &AgentDefinition) -> Result<(), WardenError> {
        let mut problems = Vec::new();
        for step in &agent.graph.steps {
            match &step.kind {
                StepKind::ToolCall { tool, .. } if !self.inner.tools.has(tool) => {
                    problems.push(format!("step '{}': unknown tool '{tool}'", step.id));
                }
                StepKind::LlmCall { .. } if !self.inner.providers.has(&agent.provider.provider) => {
                    problems.push(format!(
                        "step '{}': provider '{}' is not available",
                        step.id, agent.provider.provider
                    ));
                }
                _ => {}
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(WardenError::Validation(problems.join("; ")))
        }
    }

    /// Cancel a run. Pending confirmations are rejected; the run ends with `run-error`.
    pub fn stop(&self, run_id: &str) -> StopAck {
        let stopped = match self.inner.active().get(run_id) {
            Some(run) => {
                run.cancel.send_replace(true);
                info!(run_id, agent_id = %run.agent_id, "Run stop requested");
                true
            }
            None => false,
        };
        if stopped {
            self.inner.broker.cancel_run(run_id);
        }
        StopAck { stopped }
    }

    /// Answer a pending confirmation.
    pub fn confirm(
        &self,
        run_id: &str,
        confirmation_id: &str,
        decision: Decision,
    ) -> Result<ConfirmAck, WardenError> {
        self.inner
            .broker
            .resolve(run_id, confirmation_id, decision)
            .map_err(|e| WardenError::NotFound(e.to_string()))?;
        Ok(ConfirmAck { confirmed: true })
    }

    /// Ids of runs that have not finished yet.
    pub fn active_runs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.active().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_active(&self, run_id: &str) -> bool {
        self.inner.active().contains_key(run_id)
    }
}

/// Why a run ended early.
#[derive(Debug)]
struct StepFailure {
    node_id: Option<String>,
    error: WardenError,
}

struct StepOutcome {
    value: Value,
    /// Set by condition steps.
    branch: Option<bool>,
    logs: Vec<String>,
}

impl StepOutcome {
    fn value(value: Value) -> Self {
        Self {
            value,
            branch: None,
            logs: Vec::new(),
        }
    }
}

struct RunExecution {
    agent: Arc<AgentDefinition>,
    gate: Arc<ActionGate>,
    providers: ProviderRegistry,
    runtime: CodeRuntime,
    cancel: watch::Receiver<bool>,
    vars: Variables,
}

async fn drive(
    inner: Arc<RunnerInner>,
    mut execution: RunExecution,
    emitter: RunEmitter,
    audit: AuditRecorder,
    user_message: String,
) {
    let run_id = emitter.run_id().to_string();
    let result = AssertUnwindSafe(execution.run(user_message))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            Err(StepFailure {
                node_id: None,
                error: WardenError::Internal("run task panicked".to_string()),
            })
        });

    let (event_type, node_id, data) = match result {
        Ok(output) => {
            info!(run_id = %run_id, "Run completed");
            audit
                .record(
                    RunEventType::RunCompleted.as_str(),
                    None,
                    &json!({"output": output}),
                    AuditOutcome::Success,
                    None,
                )
                .await;
            (RunEventType::RunCompleted, None, json!({"output": event_value(&output)}))
        }
        Err(failure) => {
            let cancelled = matches!(failure.error, WardenError::Cancelled);
            let reason = if cancelled {
                "cancelled".to_string()
            } else {
                failure.error.to_string()
            };
            let outcome = if failure.error.is_denial() {
                AuditOutcome::Denied
            } else {
                AuditOutcome::Error
            };
            if cancelled {
                info!(run_id = %run_id, "Run cancelled");
            } else {
                warn!(run_id = %run_id, node_id = ?failure.node_id, reason = %reason, "Run failed");
            }
            audit
                .record(
                    RunEventType::RunError.as_str(),
                    None,
                    &json!({"nodeId": failure.node_id}),
                    outcome,
                    Some(&reason),
                )
                .await;
            (
                RunEventType::RunError,
                failure.node_id.clone(),
                json!({"nodeId": failure.node_id, "reason": reason, "cancelled": cancelled}),
            )
        }
    };

    inner.broker.finish_run(&run_id);
    inner.active().remove(&run_id);
    match node_id {
        Some(node_id) => emitter.emit_node(event_type, &node_id, data),
        None => emitter.emit(event_type, data),
    }
}

/// Resolves once the run is cancelled. Never resolves if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl RunExecution {
    fn emitter(&self) -> &RunEmitter {
        &self.gate.emitter
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    async fn run(&mut self, user_message: String) -> Result<Value, StepFailure> {
        let agent = self.agent.clone();
        let graph = &agent.graph;
        let entry = graph.entry().ok_or_else(|| StepFailure {
            node_id: None,
            error: WardenError::Validation("graph has no input step".to_string()),
        })?;

        let mut queue = VecDeque::from([entry.id.as_str()]);
        let mut visited = HashSet::new();
        let mut final_output = None;
        let mut last_output = Value::Null;

        while let Some(id) = queue.pop_front() {
            if self.is_cancelled() {
                return Err(StepFailure {
                    node_id: None,
                    error: WardenError::Cancelled,
                });
            }
            if !visited.insert(id) {
                continue;
            }
            let step = graph.step(id).ok_or_else(|| StepFailure {
                node_id: Some(id.to_string()),
                error: WardenError::NotFound(format!("step '{id}'")),
            })?;

            debug!(run_id = self.emitter().run_id(), node_id = id, step = step.kind.type_name(), "Dispatching step");
            self.emitter().emit_node(
                RunEventType::NodeStarted,
                id,
                json!({"type": step.kind.type_name(), "label": step.label}),
            );

            let result = if matches!(step.kind, StepKind::CodeBlock { .. }) {
                // The script's worker thread outlives a dropped future, so the
                // block is left to observe the cancel flag and return.
                self.execute_step(step, &user_message).await
            } else {
                let mut cancel = self.cancel.clone();
                tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel) => Err(WardenError::Cancelled),
                    result = self.execute_step(step, &user_message) => result,
                }
            };
            let result = match result {
                Err(_) if self.is_cancelled() => Err(WardenError::Cancelled),
                other => other,
            };

            match result {
                Ok(outcome) => {
                    let mut data = json!({"output": event_value(&outcome.value)});
                    if !outcome.logs.is_empty() {
                        data["logs"] = json!(outcome.logs);
                    }
                    if let Some(branch) = outcome.branch {
                        data["branch"] = json!(branch);
                    }
                    self.emitter().emit_node(RunEventType::NodeCompleted, id, data);

                    if matches!(step.kind, StepKind::Output { .. }) {
                        final_output = Some(outcome.value.clone());
                    }
                    last_output = outcome.value;
                    for next in graph.successors(id, outcome.branch) {
                        if !visited.contains(next) {
                            queue.push_back(next);
                        }
                    }
                }
                Err(WardenError::Cancelled) => {
                    return Err(StepFailure {
                        node_id: Some(id.to_string()),
                        error: WardenError::Cancelled,
                    });
                }
                Err(error) => {
                    self.emitter().emit_node(
                        RunEventType::NodeError,
                        id,
                        json!({"error": error.to_string(), "denied": error.is_denial()}),
                    );
                    return Err(StepFailure {
                        node_id: Some(id.to_string()),
                        error,
                    });
                }
            }
        }

        Ok(final_output.unwrap_or(last_output))
    }

    async fn execute_step(
        &mut self,
        step: &Step,
        user_message: &str,
    ) -> Result<StepOutcome, WardenError> {
        match &step.kind {
            StepKind::Input => {
                let input = Value::String(user_message.to_string());
                self.vars.set("input", input.clone());
                Ok(StepOutcome::value(input))
            }
            StepKind::Output { template } => {
                let text = render(template, &self.vars)?;
                Ok(StepOutcome::value(Value::String(text)))
            }
            StepKind::Transform { template, output } => {
                let value = render_value(template, &self.vars)?;
                self.vars.set(output, value.clone());
                Ok(StepOutcome::value(value))
            }
            StepKind::Condition { conditions, mode } => {
                let branch = self.evaluate_condition(conditions, *mode);
                debug!(node_id = %step.id, branch, "Condition evaluated");
                Ok(StepOutcome {
                    value: json!({"branch": branch}),
                    branch: Some(branch),
                    logs: Vec::new(),
                })
            }
            StepKind::LlmCall { prompt, output } => {
                let text = self.llm_call(&step.id, prompt).await?;
                self.vars.set(output, Value::String(text.clone()));
                Ok(StepOutcome::value(Value::String(text)))
            }
            StepKind::ToolCall {
                tool,
                arguments,
                output,
            } => {
                let args = render_json(arguments, &self.vars)?;
                let result = self
                    .gate
                    .call_tool(&step.id, AUDIT_TOOL_CALL, tool, args)
                    .await?;
                if result.is_error {
                    return Err(ToolError::ExecutionError(result.output).into());
                }
                let value = Value::String(result.output);
                self.vars.set(output, value.clone());
                Ok(StepOutcome::value(value))
            }
            StepKind::CodeBlock {
                block,
                inputs,
                output,
            } => {
                let outcome = self.code_block(&step.id, block, inputs).await?;
                self.vars.set(output, outcome.value.clone());
                Ok(outcome)
            }
        }
    }

    fn evaluate_condition(&self, conditions: &[Predicate], mode: MatchMode) -> bool {
        let mut results = conditions
            .iter()
            .map(|p| p.evaluate(self.vars.lookup(&p.variable)));
        match mode {
            MatchMode::All => results.all(|r| r),
            MatchMode::Any => results.any(|r| r),
        }
    }

    async fn llm_call(&self, node_id: &str, prompt: &str) -> Result<String, WardenError> {
        let config = &self.agent.provider;
        let provider = self.providers.get(&config.provider)?;
        let request = Request::from_prompt(config, render(prompt, &self.vars)?);
        let mut stream = provider.stream(request).await?;

        let mut text = String::new();
        while let Some(event) = stream.next().await {
            if self.is_cancelled() {
                return Err(WardenError::Cancelled);
            }
            match event? {
                StreamEvent::TextDelta { delta } => {
                    self.emitter()
                        .emit_node(RunEventType::LlmChunk, node_id, json!({"delta": delta}));
                    text.push_str(&delta);
                }
                StreamEvent::Usage { input, output } => {
                    debug!(node_id, input, output, "Provider usage");
                }
                StreamEvent::Done { .. } => break,
                StreamEvent::Error(message) => {
                    return Err(ProviderError::StreamError(message).into());
                }
            }
        }
        Ok(text)
    }

    async fn code_block(
        &self,
        node_id: &str,
        block_id: &str,
        inputs: &BTreeMap<String, String>,
    ) -> Result<StepOutcome, WardenError> {
        let block = self
            .agent
            .code_block(block_id)
            .ok_or_else(|| WardenError::NotFound(format!("code block '{block_id}'")))?;
        let request = ActionRequest::CodeExec {
            block: block_id.to_string(),
        };
        self.gate
            .authorize(node_id, AUDIT_CODE_EXEC, "code_block", &request)
            .await?;

        let input = if inputs.is_empty() {
            self.vars.to_object()
        } else {
            let mut fields = Map::new();
            for (name, template) in inputs {
                fields.insert(name.clone(), render_value(template, &self.vars)?);
            }
            Value::Object(fields)
        };

        let policy = &self.gate.permissions().code_exec;
        let host = RunCapabilityHost::new(self.gate.clone(), node_id);
        let mut environment = ScriptEnvironment::new(Arc::new(host));
        environment.env = policy.env.clone();
        environment.allowed_modules = policy.allowed_modules.clone();
        environment.cancel = Some(self.cancel.clone());
        let limits = ExecutionLimits::new(policy.memory_limit_mb, policy.time_limit_ms);

        let outcome = self
            .runtime
            .execute(&block.code, input, environment, &limits)
            .await;
        debug!(
            node_id,
            block = block_id,
            success = outcome.success,
            timed_out = outcome.timed_out,
            duration_ms = outcome.duration_ms,
            "Code block finished"
        );

        let payload = json!({
            "block": block_id,
            "name": block.name,
            "durationMs": outcome.duration_ms,
            "timedOut": outcome.timed_out,
            "logLines": outcome.logs.len(),
        });
        let (audit_outcome, error) = if outcome.success {
            (AuditOutcome::Success, None)
        } else {
            (AuditOutcome::Error, outcome.error.clone())
        };
        self.gate
            .audit
            .record(AUDIT_CODE_EXEC, Some("code_block"), &payload, audit_outcome, error.as_deref())
            .await;

        if outcome.success {
            Ok(StepOutcome {
                value: outcome.value.unwrap_or(Value::Null),
                branch: None,
                logs: outcome.logs,
            })
        } else {
            Err(WardenError::Sandbox(
                outcome
                    .error
                    .unwrap_or_else(|| "code block failed".to_string()),
            ))
        }
    }
}
