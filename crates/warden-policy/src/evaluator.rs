//! Policy evaluation: decides whether an action may proceed.

use crate::action::{split_command_line, ActionRequest, FsOperation};
use crate::matcher::{domain_matches, is_blocked_ip, is_local_hostname, normalize_path, path_matches};
use crate::model::{FilesystemPolicy, FsAccess, HttpPolicy, PermissionModel, ShellPolicy};
use crate::rate::RateWindow;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::debug;
use url::{Host, Url};

/// Outcome of evaluating an [`ActionRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "kebab-case")]
pub enum Verdict {
    Allow,
    Deny {
        reason: String,
    },
    RequireConfirmation {
        description: String,
        parameters: serde_json::Value,
    },
}

impl Verdict {
    pub fn deny(reason: impl Into<String>) -> Self {
        Verdict::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    pub fn is_deny(&self) -> bool {
        matches!(self, Verdict::Deny { .. })
    }
}

/// Evaluates action requests against a permission model.
///
/// Evaluation is pure apart from the HTTP rate window, so one evaluator is
/// created per run and shared by every step of that run.
#[derive(Debug, Default)]
pub struct PolicyEvaluator {
    http_window: RateWindow,
    /// Compiled blocked-command patterns; `None` marks an invalid pattern.
    patterns: Mutex<HashMap<String, Option<Regex>>>,
}

impl PolicyEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(&self, request: &ActionRequest, model: &PermissionModel) -> Verdict {
        let verdict = match request {
            ActionRequest::Filesystem {
                operation,
                path,
                size_bytes,
            } => evaluate_filesystem(&model.filesystem, *operation, path, *size_bytes),
            ActionRequest::Http { method, url } => self.evaluate_http(&model.http, method, url),
            ActionRequest::Shell { command } => self.evaluate_shell(&model.shell, request, command),
            ActionRequest::CodeExec { .. } => {
                if model.code_exec.enabled {
                    Verdict::Allow
                } else {
                    Verdict::deny("tool disabled")
                }
            }
        };
        debug!(tool = request.tool(), ?verdict, "policy evaluated");
        verdict
    }

    /// Number of HTTP requests currently counted against the rate limit.
    pub fn http_requests_in_window(&self) -> usize {
        self.http_window.in_window()
    }

    fn evaluate_http(&self, policy: &HttpPolicy, method: &str, raw_url: &str) -> Verdict {
        if !policy.enabled {
            return Verdict::deny("tool disabled");
        }

        if let Err(reason) = check_http_destination(policy, raw_url) {
            return Verdict::Deny { reason };
        }
        if !policy.allows_method(method) {
            return Verdict::deny(format!(
                "method '{}' not allowed",
                method.to_ascii_uppercase()
            ));
        }
        if !self.http_window.try_acquire(policy.requests_per_minute) {
            return Verdict::deny("rate limit");
        }
        Verdict::Allow
    }

    fn evaluate_shell(
        &self,
        policy: &ShellPolicy,
        request: &ActionRequest,
        command: &str,
    ) -> Verdict {
        if !policy.enabled {
            return Verdict::deny("tool disabled");
        }

        let tokens = match split_command_line(command) {
            Ok(tokens) => tokens,
            Err(e) => return Verdict::deny(e.to_string()),
        };
        if let Some(verdict) = self.match_blocked_pattern(&policy.blocked_patterns, command) {
            return verdict;
        }

        let Some(binary) = tokens.first() else {
            return Verdict::deny("empty command");
        };
        if !policy.allowed_commands.iter().any(|c| c == binary) {
            return Verdict::deny(format!("command '{binary}' is not allowed"));
        }

        if policy.requires_confirmation {
            Verdict::RequireConfirmation {
                description: request.describe(),
                parameters: request.display_parameters(),
            }
        } else {
            Verdict::Allow
        }
    }

    /// First blocked pattern matching `command`, as a denial. Patterns are
    /// compiled once per evaluator.
    fn match_blocked_pattern(&self, patterns: &[String], command: &str) -> Option<Verdict> {
        let mut compiled = self.patterns.lock().unwrap_or_else(PoisonError::into_inner);
        for pattern in patterns {
            let re = compiled
                .entry(pattern.clone())
                .or_insert_with(|| Regex::new(pattern).ok());
            match re {
                Some(re) if re.is_match(command) => {
                    return Some(Verdict::deny(format!(
                        "command matches blocked pattern '{pattern}'"
                    )));
                }
                Some(_) => {}
                None => return Some(Verdict::deny(format!("invalid blocked pattern '{pattern}'"))),
            }
        }
        None
    }

    #[cfg(test)]
    fn compiled_pattern_count(&self) -> usize {
        self.patterns.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Check the scheme, host and domain rules for an HTTP destination, without
/// touching the method or the rate window. Used for the initial request and
/// for every redirect target.
pub fn check_http_destination(policy: &HttpPolicy, raw_url: &str) -> Result<(), String> {
    let url = Url::parse(raw_url).map_err(|e| format!("invalid url: {e}"))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(format!("scheme '{}' not allowed", url.scheme()));
    }

    let host = match url.host() {
        Some(Host::Ipv4(ip)) => {
            check_resolved_address(IpAddr::V4(ip))?;
            ip.to_string()
        }
        Some(Host::Ipv6(ip)) => {
            check_resolved_address(IpAddr::V6(ip))?;
            ip.to_string()
        }
        Some(Host::Domain(domain)) => {
            if is_local_hostname(domain) {
                return Err("SSRF blocked".to_string());
            }
            domain.to_string()
        }
        None => return Err("url has no host".to_string()),
    };

    if policy
        .blocked_domains
        .iter()
        .any(|pattern| domain_matches(pattern, &host))
    {
        return Err(format!("domain '{host}' is blocked"));
    }
    if !policy
        .allowed_domains
        .iter()
        .any(|pattern| domain_matches(pattern, &host))
    {
        return Err(format!("domain '{host}' is not in allowed domains"));
    }
    Ok(())
}

/// Check a resolved peer address for an HTTP request. Applied by the HTTP tool
/// to every DNS answer and redirect target before connecting.
pub fn check_resolved_address(ip: IpAddr) -> Result<(), String> {
    if is_blocked_ip(ip) {
        Err("SSRF blocked".to_string())
    } else {
        Ok(())
    }
}

fn evaluate_filesystem(
    policy: &FilesystemPolicy,
    operation: FsOperation,
    path: &str,
    size_bytes: Option<u64>,
) -> Verdict {
    if !policy.enabled {
        return Verdict::deny("tool disabled");
    }

    let raw = Path::new(path);
    if !raw.is_absolute() {
        return Verdict::deny(format!("path '{path}' must be absolute"));
    }
    let normalized = normalize_path(raw);

    if policy
        .denied_paths
        .iter()
        .any(|pattern| path_matches(pattern, &normalized))
    {
        return Verdict::deny(format!("path '{}' is denied", normalized.display()));
    }
    if !policy
        .allowed_paths
        .iter()
        .any(|pattern| path_matches(pattern, &normalized))
    {
        return Verdict::deny(format!(
            "path '{}' is not in allowed paths",
            normalized.display()
        ));
    }

    if operation.is_write() && policy.access != FsAccess::ReadWrite {
        return Verdict::deny("write access not granted");
    }

    match operation {
        FsOperation::List => Verdict::Allow,
        FsOperation::Read | FsOperation::Write => match size_bytes {
            None => Verdict::deny("file size unknown"),
            Some(size) if size > policy.max_file_size_bytes => Verdict::deny(format!(
                "file size {size} exceeds limit of {} bytes",
                policy.max_file_size_bytes
            )),
            Some(_) => Verdict::Allow,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn shell(command: &str) -> ActionRequest {
        ActionRequest::Shell {
            command: command.to_string(),
        }
    }

    fn get(url: &str) -> ActionRequest {
        ActionRequest::Http {
            method: "GET".to_string(),
            url: url.to_string(),
        }
    }

    fn fs(operation: FsOperation, path: &str, size: Option<u64>) -> ActionRequest {
        ActionRequest::Filesystem {
            operation,
            path: path.to_string(),
            size_bytes: size,
        }
    }

    fn reason(verdict: Verdict) -> String {
        match verdict {
            Verdict::Deny { reason } => reason,
            other => panic!("expected deny, got {other:?}"),
        }
    }

    #[test]
    fn test_deny_all_denies_everything() {
        let evaluator = PolicyEvaluator::new();
        let model = PermissionModel::deny_all();
        let requests = [
            fs(FsOperation::Read, "/tmp/a", Some(1)),
            fs(FsOperation::Write, "/tmp/a", Some(1)),
            fs(FsOperation::List, "/tmp", None),
            get("https://api.example.com/"),
            shell("ls"),
            ActionRequest::CodeExec {
                block: "b1".to_string(),
            },
        ];
        for request in requests {
            assert_eq!(
                reason(evaluator.evaluate(&request, &model)),
                "tool disabled"
            );
        }
    }

    #[test]
    fn test_private_address_is_ssrf_blocked_even_if_allowed() {
        let evaluator = PolicyEvaluator::new();
        let mut model = PermissionModel::default();
        model.http.enabled = true;
        model.http.allowed_domains = vec!["api.example.com".to_string(), "*".to_string()];

        for url in [
            "http://10.0.0.5/",
            "http://127.0.0.1:8080/admin",
            "http://169.254.169.254/latest/meta-data",
            "http://[::1]/",
            "http://[::ffff:10.0.0.1]/",
            "http://localhost:3000/",
        ] {
            assert_eq!(reason(evaluator.evaluate(&get(url), &model)), "SSRF blocked", "{url}");
        }
        assert!(evaluator
            .evaluate(&get("https://api.example.com/v1"), &model)
            .is_allow());
    }

    #[test]
    fn test_http_domain_and_method_rules() {
        let evaluator = PolicyEvaluator::new();
        let mut model = PermissionModel::default();
        model.http.enabled = true;
        model.http.allowed_domains = vec!["*.example.com".to_string()];
        model.http.blocked_domains = vec!["internal.example.com".to_string()];

        assert!(evaluator
            .evaluate(&get("https://internal.example.com/"), &model)
            .is_deny());
        assert!(evaluator.evaluate(&get("https://evil.io/"), &model).is_deny());
        assert!(evaluator.evaluate(&get("ftp://a.example.com/"), &model).is_deny());

        let post = ActionRequest::Http {
            method: "POST".to_string(),
            url: "https://a.example.com/".to_string(),
        };
        assert!(reason(evaluator.evaluate(&post, &model)).contains("method"));
        assert!(evaluator.evaluate(&get("https://a.example.com/"), &model).is_allow());
    }

    #[test]
    fn test_http_rate_limit_counts_only_allowed_requests() {
        let evaluator = PolicyEvaluator::new();
        let mut model = PermissionModel::default();
        model.http.enabled = true;
        model.http.allowed_domains = vec!["api.example.com".to_string()];
        model.http.requests_per_minute = 2;

        // Denied requests must not consume quota.
        assert!(evaluator.evaluate(&get("https://evil.io/"), &model).is_deny());
        assert!(evaluator.evaluate(&get("https://api.example.com/1"), &model).is_allow());
        assert!(evaluator.evaluate(&get("https://api.example.com/2"), &model).is_allow());
        assert_eq!(
            reason(evaluator.evaluate(&get("https://api.example.com/3"), &model)),
            "rate limit"
        );
        assert_eq!(evaluator.http_requests_in_window(), 2);
    }

    #[test]
    fn test_rate_window_frees_after_oldest_expires() {
        let evaluator = PolicyEvaluator::new();
        let start = Instant::now();
        assert!(evaluator.http_window.try_acquire_at(2, start));
        assert!(evaluator
            .http_window
            .try_acquire_at(2, start + Duration::from_secs(20)));
        assert!(!evaluator
            .http_window
            .try_acquire_at(2, start + Duration::from_secs(40)));
        assert!(evaluator
            .http_window
            .try_acquire_at(2, start + Duration::from_secs(61)));
    }

    #[test]
    fn test_shell_allowed_command_requires_confirmation() {
        let evaluator = PolicyEvaluator::new();
        let mut model = PermissionModel::default();
        model.shell.enabled = true;
        model.shell.allowed_commands = vec!["git".to_string()];

        match evaluator.evaluate(&shell("git status"), &model) {
            Verdict::RequireConfirmation {
                description,
                parameters,
            } => {
                assert!(description.contains("git status"));
                assert_eq!(parameters["command"], "git status");
            }
            other => panic!("expected confirmation, got {other:?}"),
        }

        model.shell.requires_confirmation = false;
        assert!(evaluator.evaluate(&shell("git status"), &model).is_allow());
    }

    #[test]
    fn test_shell_chaining_denied_even_for_allowed_binary() {
        let evaluator = PolicyEvaluator::new();
        let mut model = PermissionModel::default();
        model.shell.enabled = true;
        model.shell.allowed_commands = vec!["git".to_string()];

        for command in [
            "git; rm -rf /",
            "git status && curl x",
            "git log | sh",
            "git $(whoami)",
            "git status > /etc/passwd",
        ] {
            assert!(
                reason(evaluator.evaluate(&shell(command), &model)).contains("blocked pattern"),
                "{command}"
            );
        }
        assert!(reason(evaluator.evaluate(&shell("gitx status"), &model)).contains("not allowed"));
        assert!(reason(evaluator.evaluate(&shell("/usr/bin/git status"), &model))
            .contains("not allowed"));
        assert!(evaluator.evaluate(&shell("   "), &model).is_deny());
    }

    #[test]
    fn test_blocked_patterns_compiled_once_and_still_deny() {
        let evaluator = PolicyEvaluator::new();
        let mut model = PermissionModel::default();
        model.shell.enabled = true;
        model.shell.allowed_commands = vec!["git".to_string()];
        let patterns = model.shell.blocked_patterns.len();
        assert!(patterns > 0);

        for _ in 0..3 {
            assert!(reason(evaluator.evaluate(&shell("git; rm -rf /"), &model))
                .contains("blocked pattern"));
        }
        assert!(evaluator.compiled_pattern_count() <= patterns);

        model.shell.blocked_patterns.push("(unclosed".to_string());
        for _ in 0..2 {
            assert!(reason(evaluator.evaluate(&shell("git status"), &model))
                .contains("invalid blocked pattern"));
        }
    }

    #[test]
    fn test_filesystem_deny_glob_wins() {
        let evaluator = PolicyEvaluator::new();
        let mut model = PermissionModel::default();
        model.filesystem.enabled = true;
        model.filesystem.allowed_paths = vec!["/tmp/**".to_string()];
        model.filesystem.denied_paths = vec!["/tmp/secret/**".to_string()];

        assert!(reason(evaluator.evaluate(&fs(FsOperation::Read, "/tmp/secret/x", Some(1)), &model))
            .contains("denied"));
        // Traversal is collapsed before matching.
        assert!(evaluator
            .evaluate(&fs(FsOperation::Read, "/tmp/ok/../secret/x", Some(1)), &model)
            .is_deny());
        assert!(evaluator
            .evaluate(&fs(FsOperation::Read, "/tmp/../etc/passwd", Some(1)), &model)
            .is_deny());
        assert!(evaluator
            .evaluate(&fs(FsOperation::Read, "/tmp/notes.txt", Some(1)), &model)
            .is_allow());
        assert!(evaluator
            .evaluate(&fs(FsOperation::List, "/tmp/dir", None), &model)
            .is_allow());
    }

    #[test]
    fn test_filesystem_write_and_size_rules() {
        let evaluator = PolicyEvaluator::new();
        let mut model = PermissionModel::default();
        model.filesystem.enabled = true;
        model.filesystem.allowed_paths = vec!["/tmp/**".to_string()];
        model.filesystem.max_file_size_bytes = 100;

        assert!(reason(evaluator.evaluate(&fs(FsOperation::Write, "/tmp/a", Some(1)), &model))
            .contains("write access"));

        model.filesystem.access = FsAccess::ReadWrite;
        assert!(evaluator
            .evaluate(&fs(FsOperation::Write, "/tmp/a", Some(100)), &model)
            .is_allow());
        assert!(evaluator
            .evaluate(&fs(FsOperation::Write, "/tmp/a", Some(101)), &model)
            .is_deny());
        assert!(evaluator
            .evaluate(&fs(FsOperation::Read, "/tmp/a", None), &model)
            .is_deny());
        assert!(evaluator
            .evaluate(&fs(FsOperation::Read, "relative/a", Some(1)), &model)
            .is_deny());
    }

    #[test]
    fn test_code_exec_gate() {
        let evaluator = PolicyEvaluator::new();
        let mut model = PermissionModel::default();
        let request = ActionRequest::CodeExec {
            block: "b1".to_string(),
        };
        assert!(evaluator.evaluate(&request, &model).is_deny());
        model.code_exec.enabled = true;
        assert!(evaluator.evaluate(&request, &model).is_allow());
    }

    #[test]
    fn test_destination_check_skips_rate_window() {
        let evaluator = PolicyEvaluator::new();
        let mut model = PermissionModel::default();
        model.http.enabled = true;
        model.http.allowed_domains = vec!["*.example.com".to_string()];
        assert!(check_http_destination(&model.http, "https://cdn.example.com/x").is_ok());
        assert_eq!(
            check_http_destination(&model.http, "http://192.168.0.1/").unwrap_err(),
            "SSRF blocked"
        );
        assert!(check_http_destination(&model.http, "https://other.io/").is_err());
        assert_eq!(evaluator.http_requests_in_window(), 0);
    }

    #[test]
    fn test_resolved_address_check() {
        assert!(check_resolved_address("10.1.2.3".parse().unwrap()).is_err());
        assert!(check_resolved_address("93.184.216.34".parse().unwrap()).is_ok());
    }

    #[test]
    fn test_verdict_wire_format() {
        let json = serde_json::to_value(Verdict::deny("rate limit")).unwrap();
        assert_eq!(json["verdict"], "deny");
        assert_eq!(json["reason"], "rate limit");
        let json = serde_json::to_value(Verdict::Allow).unwrap();
        assert_eq!(json["verdict"], "allow");
    }
}
