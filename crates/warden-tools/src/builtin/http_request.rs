//! HTTP request tool — outbound requests under the run's HTTP policy.
//!
//! The policy evaluator only sees the URL. The client resolves every host,
//! redirect targets included, through [`PolicyResolver`], which refuses any
//! answer containing a private address. Redirects are off unless the policy
//! enables them, and every redirect target is re-checked.

use crate::error::ToolError;
use crate::traits::{parse_params, Tool, ToolContext, ToolResult};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;
use warden_policy::{check_http_destination, check_resolved_address, ActionRequest, HttpPolicy};

const MAX_REDIRECTS: usize = 5;

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct HttpRequestParams {
    /// Absolute http(s) URL.
    pub url: String,
    /// HTTP method. Default: GET.
    #[serde(default = "default_method")]
    pub method: String,
    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Request body. Strings are sent as-is, anything else as JSON.
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

pub struct HttpRequestTool;

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }
    fn label(&self) -> &str {
        "HTTP Request"
    }
    fn description(&self) -> &str {
        "Send an HTTP request and return the response body as text."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(HttpRequestParams))
            .expect("schema serialization should not fail")
    }

    async fn prepare(
        &self,
        args: &serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ActionRequest, ToolError> {
        let params: HttpRequestParams = parse_params(args)?;
        Ok(ActionRequest::Http {
            method: params.method.to_ascii_uppercase(),
            url: params.url,
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let params: HttpRequestParams = parse_params(&args)?;
        let policy = &ctx.permissions.http;

        let url = Url::parse(&params.url)
            .map_err(|e| ToolError::InvalidParameters(format!("invalid url: {e}")))?;
        check_http_destination(policy, url.as_str()).map_err(ToolError::PermissionDenied)?;
        let method = reqwest::Method::from_bytes(params.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| ToolError::InvalidParameters(format!("invalid method: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(policy.timeout_ms))
            .user_agent("warden/0.1")
            .redirect(redirect_policy(policy))
            .dns_resolver(Arc::new(PolicyResolver))
            .build()
            .map_err(|e| ToolError::ExecutionError(format!("Failed to create HTTP client: {e}")))?;

        let mut request = client.request(method, url.clone());
        for (name, value) in &params.headers {
            request = request.header(name, value);
        }
        request = match params.body {
            Some(serde_json::Value::String(text)) => request.body(text),
            Some(value) => request.json(&value),
            None => request,
        };

        let mut response = request.send().await.map_err(|e| {
            if let Some(blocked) = find_blocked(&e) {
                ToolError::PermissionDenied(blocked.to_string())
            } else if e.is_timeout() {
                ToolError::Timeout(format!("HTTP request timed out after {}ms", policy.timeout_ms))
            } else {
                ToolError::ExecutionError(format!("HTTP request failed: {e}"))
            }
        })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();

        let max_bytes = usize::try_from(policy.max_response_size_bytes).unwrap_or(usize::MAX);
        let mut body = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ToolError::ExecutionError(format!("Failed to read response: {e}")))?
        {
            let remaining = max_bytes - body.len();
            if chunk.len() > remaining {
                body.extend_from_slice(&chunk[..remaining]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        let text = String::from_utf8_lossy(&body).into_owned();
        let metadata = serde_json::json!({
            "status": status.as_u16(),
            "contentType": content_type,
            "bytes": body.len(),
            "truncated": truncated,
        });
        debug!(status = status.as_u16(), bytes = body.len(), "http request completed");

        if status.is_success() {
            Ok(ToolResult::success_with_metadata(text, metadata))
        } else {
            Ok(ToolResult {
                output: format!("HTTP {status}\n{text}"),
                metadata,
                is_error: true,
            })
        }
    }
}

/// A lookup answer that included an address the policy refuses.
#[derive(Debug)]
struct BlockedAddress {
    host: String,
    addr: SocketAddr,
    reason: String,
}

impl fmt::Display for BlockedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} resolves to {}", self.reason, self.host, self.addr.ip())
    }
}

impl StdError for BlockedAddress {}

/// DNS resolver for the HTTP client. Every connection, including one made
/// after a redirect, goes through it, so the checked addresses are the ones
/// dialed.
#[derive(Debug, Clone, Copy)]
struct PolicyResolver;

impl Resolve for PolicyResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_string();
        Box::pin(async move {
            let addrs = lookup_checked(&host).await?;
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok::<_, Box<dyn StdError + Send + Sync>>(addrs)
        })
    }
}

async fn lookup_checked(host: &str) -> Result<Vec<SocketAddr>, Box<dyn StdError + Send + Sync>> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, 0)).await?.collect();
    if addrs.is_empty() {
        return Err(format!("DNS lookup returned no addresses for {host}").into());
    }
    Ok(checked_addrs(host, addrs)?)
}

/// Refuse the whole answer when any address is private; a client may try
/// them in any order.
fn checked_addrs(host: &str, addrs: Vec<SocketAddr>) -> Result<Vec<SocketAddr>, BlockedAddress> {
    for addr in &addrs {
        if let Err(reason) = check_resolved_address(addr.ip()) {
            debug!(host, addr = %addr.ip(), "refusing resolved address");
            return Err(BlockedAddress {
                host: host.to_string(),
                addr: *addr,
                reason,
            });
        }
    }
    Ok(addrs)
}

fn find_blocked<'a>(error: &'a (dyn StdError + 'static)) -> Option<&'a BlockedAddress> {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(blocked) = err.downcast_ref::<BlockedAddress>() {
            return Some(blocked);
        }
        current = err.source();
    }
    None
}

fn redirect_policy(policy: &HttpPolicy) -> reqwest::redirect::Policy {
    if !policy.follow_redirects {
        return reqwest::redirect::Policy::none();
    }
    let policy = policy.clone();
    reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        match check_http_destination(&policy, attempt.url().as_str()) {
            Ok(()) => attempt.follow(),
            Err(reason) => attempt.error(format!("redirect blocked: {reason}")),
        }
    })
}
