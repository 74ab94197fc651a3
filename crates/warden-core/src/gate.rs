//! Permission gate for side-effecting actions within one run.
//!
//! Tool steps and sandbox capability calls both come through here, so a
//! script calling `ctx.exec(..)` faces exactly the checks a shell step does:
//! evaluate against the run's permission snapshot, ask the user when the
//! policy says so, then execute and record the outcome.

use crate::audit::AuditRecorder;
use crate::confirm::{ConfirmBroker, ConfirmationResult};
use crate::error::WardenError;
use crate::events::{RunEmitter, RunEventType};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};
use warden_policy::redact::{audit_projection, redact_value};
use warden_policy::{ActionRequest, PermissionModel, PolicyEvaluator, Verdict};
use warden_sandbox::{CapabilityCall, CapabilityError, CapabilityHost};
use warden_store::AuditOutcome;
use warden_tools::{ToolContext, ToolError, ToolRegistry, ToolResult};

/// Longest tool output copied into a `tool-result` event.
const EVENT_OUTPUT_PREVIEW: usize = 2048;

/// Audit event type for tool steps.
pub const AUDIT_TOOL_CALL: &str = "tool-call";
/// Audit event type for capability calls made by code blocks.
pub const AUDIT_CAPABILITY: &str = "code-capability";
/// Audit event type for code block executions.
pub const AUDIT_CODE_EXEC: &str = "code-exec";

/// Everything a run needs to decide on and perform actions.
pub struct ActionGate {
    pub(crate) permissions: Arc<PermissionModel>,
    pub(crate) evaluator: PolicyEvaluator,
    pub(crate) broker: ConfirmBroker,
    pub(crate) confirmation_timeout: Duration,
    pub(crate) emitter: RunEmitter,
    pub(crate) audit: AuditRecorder,
    pub(crate) tools: ToolRegistry,
    pub(crate) tool_context: ToolContext,
    /// Flips to `true` when the run is stopped; no action starts after that.
    pub(crate) cancel: watch::Receiver<bool>,
}

impl ActionGate {
    pub fn permissions(&self) -> &PermissionModel {
        &self.permissions
    }

    fn run_id(&self) -> &str {
        self.emitter.run_id()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Decide whether `request` may run. Denials are reported and audited here.
    pub async fn authorize(
        &self,
        node_id: &str,
        audit_event: &str,
        tool_name: &str,
        request: &ActionRequest,
    ) -> Result<(), WardenError> {
        match self.evaluator.evaluate(request, &self.permissions) {
            Verdict::Allow => Ok(()),
            Verdict::Deny { reason } => {
                self.report_denial(node_id, audit_event, tool_name, request, &reason)
                    .await;
                Err(WardenError::PolicyDenied(reason))
            }
            Verdict::RequireConfirmation { .. } => {
                self.confirm(node_id, audit_event, tool_name, request).await
            }
        }
    }

    async fn confirm(
        &self,
        node_id: &str,
        audit_event: &str,
        tool_name: &str,
        request: &ActionRequest,
    ) -> Result<(), WardenError> {
        let key = request.key();
        if self.broker.is_session_approved(self.run_id(), &key) {
            debug!(run_id = self.run_id(), %key, "Action approved for this run");
            return Ok(());
        }

        let pending = self.broker.open(self.run_id(), request);
        self.emitter
            .emit_node(RunEventType::RequiresConfirmation, node_id, pending.event_data());

        match pending.wait(self.confirmation_timeout).await {
            ConfirmationResult::Decided(decision) if decision.is_allowed() => {
                debug!(run_id = self.run_id(), %key, ?decision, "Action confirmed");
                Ok(())
            }
            ConfirmationResult::Decided(_) => {
                let reason = "denied by user";
                self.report_denial(node_id, audit_event, tool_name, request, reason)
                    .await;
                Err(WardenError::PolicyDenied(reason.to_string()))
            }
            ConfirmationResult::TimedOut => {
                self.report_denial(node_id, audit_event, tool_name, request, "confirmation timed out")
                    .await;
                Err(WardenError::ConfirmationTimeout)
            }
            ConfirmationResult::Cancelled => {
                self.audit
                    .record(
                        audit_event,
                        Some(tool_name),
                        &request.display_parameters(),
                        AuditOutcome::Denied,
                        Some("confirmation cancelled"),
                    )
                    .await;
                Err(WardenError::ConfirmationCancelled)
            }
        }
    }

    async fn report_denial(
        &self,
        node_id: &str,
        audit_event: &str,
        tool_name: &str,
        request: &ActionRequest,
        reason: &str,
    ) {
        warn!(run_id = self.run_id(), node_id, tool = tool_name, reason, "Action denied");
        self.emitter.emit_node(
            RunEventType::SecurityWarning,
            node_id,
            json!({
                "tool": tool_name,
                "action": request.describe(),
                "parameters": request.display_parameters(),
                "reason": reason,
            }),
        );
        self.audit
            .record(
                audit_event,
                Some(tool_name),
                &request.display_parameters(),
                AuditOutcome::Denied,
                Some(reason),
            )
            .await;
    }

    /// Validate, authorize and execute one tool call.
    ///
    /// A result with `is_error` set is returned as `Ok`; callers decide
    /// whether that fails their step.
    pub async fn call_tool(
        &self,
        node_id: &str,
        audit_event: &str,
        tool_name: &str,
        args: Value,
    ) -> Result<ToolResult, WardenError> {
        if self.is_cancelled() {
            return Err(WardenError::Cancelled);
        }
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()))?;
        self.tools.validate_args(tool_name, &args)?;
        let request = tool.prepare(&args, &self.tool_context).await?;

        self.emitter.emit_node(
            RunEventType::ToolCall,
            node_id,
            json!({
                "tool": tool_name,
                "action": request.describe(),
                "parameters": request.display_parameters(),
            }),
        );
        self.authorize(node_id, audit_event, tool_name, &request)
            .await?;
        if self.is_cancelled() {
            return Err(WardenError::Cancelled);
        }

        let audit_payload = json!({
            "action": request.display_parameters(),
            "arguments": args.clone(),
        });
        match tool.execute(args, &self.tool_context).await {
            Ok(result) => {
                self.emitter.emit_node(
                    RunEventType::ToolResult,
                    node_id,
                    json!({
                        "tool": tool_name,
                        "output": preview(&result.output),
                        "isError": result.is_error,
                        "metadata": audit_projection(&result.metadata, EVENT_OUTPUT_PREVIEW),
                    }),
                );
                let (outcome, error) = if result.is_error {
                    (AuditOutcome::Error, Some(preview(&result.output)))
                } else {
                    (AuditOutcome::Success, None)
                };
                self.audit
                    .record(audit_event, Some(tool_name), &audit_payload, outcome, error.as_deref())
                    .await;
                Ok(result)
            }
            Err(ToolError::PermissionDenied(reason)) => {
                self.report_denial(node_id, audit_event, tool_name, &request, &reason)
                    .await;
                Err(WardenError::PolicyDenied(reason))
            }
            Err(e) => {
                let message = e.to_string();
                self.emitter.emit_node(
                    RunEventType::ToolResult,
                    node_id,
                    json!({"tool": tool_name, "isError": true, "error": message}),
                );
                self.audit
                    .record(
                        audit_event,
                        Some(tool_name),
                        &audit_payload,
                        AuditOutcome::Error,
                        Some(&message),
                    )
                    .await;
                Err(e.into())
            }
        }
    }
}

fn preview(text: &str) -> String {
    if text.len() <= EVENT_OUTPUT_PREVIEW {
        return text.to_string();
    }
    let mut end = EVENT_OUTPUT_PREVIEW;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [{} bytes]", &text[..end], text.len())
}

/// Capability host handed to a code block. Every call becomes a tool call through the gate.
pub struct RunCapabilityHost {
    gate: Arc<ActionGate>,
    node_id: String,
}

impl RunCapabilityHost {
    pub fn new(gate: Arc<ActionGate>, node_id: impl Into<String>) -> Self {
        Self {
            gate,
            node_id: node_id.into(),
        }
    }
}

fn to_capability_error(err: WardenError) -> CapabilityError {
    match err {
        WardenError::PolicyDenied(reason) => CapabilityError::Denied(reason),
        WardenError::Cancelled => CapabilityError::Denied("run cancelled".to_string()),
        e if e.is_denial() => CapabilityError::Denied(e.to_string()),
        e => CapabilityError::Failed(e.to_string()),
    }
}

#[async_trait]
impl CapabilityHost for RunCapabilityHost {
    async fn call(&self, call: CapabilityCall) -> Result<Value, CapabilityError> {
        if self.gate.is_cancelled() {
            return Err(CapabilityError::Denied("run cancelled".to_string()));
        }
        let is_network = matches!(
            call,
            CapabilityCall::HttpGet { .. } | CapabilityCall::HttpPost { .. }
        );
        if is_network && !self.gate.permissions.code_exec.network_access {
            return Err(CapabilityError::Denied(
                "network access is disabled for code blocks".to_string(),
            ));
        }

        let name = call.name();
        let (tool, args) = match call {
            CapabilityCall::HttpGet { url } => ("http_request", json!({"url": url})),
            CapabilityCall::HttpPost { url, body } => (
                "http_request",
                json!({"url": url, "method": "POST", "body": body}),
            ),
            CapabilityCall::ReadFile { path } => ("read_file", json!({"path": path})),
            CapabilityCall::WriteFile { path, content } => {
                ("write_file", json!({"path": path, "content": content}))
            }
            CapabilityCall::ListDir { path } => ("list_dir", json!({"path": path})),
            CapabilityCall::Exec { command } => ("shell", json!({"command": command})),
        };
        debug!(node_id = %self.node_id, capability = name, tool, "Capability call");

        let result = self
            .gate
            .call_tool(&self.node_id, AUDIT_CAPABILITY, tool, args)
            .await
            .map_err(to_capability_error)?;

        match tool {
            "http_request" => Ok(json!({
                "status": result.metadata["status"],
                "ok": !result.is_error,
                "body": result.output,
                "contentType": result.metadata["contentType"],
            })),
            "shell" => Ok(json!({
                "exitCode": result.metadata["exitCode"],
                "stdout": result.metadata["stdout"],
                "stderr": result.metadata["stderr"],
            })),
            _ if result.is_error => Err(CapabilityError::Failed(result.output)),
            "list_dir" => Ok(result.metadata["entries"].clone()),
            "write_file" => Ok(json!({"bytes": result.metadata["bytes"]})),
            _ => Ok(Value::String(result.output)),
        }
    }
}

/// Redacted copy of a value for events.
pub(crate) fn event_value(value: &Value) -> Value {
    audit_projection(&redact_value(value), EVENT_OUTPUT_PREVIEW)
}
