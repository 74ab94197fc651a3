//! Per-agent permission model.
//!
//! Four independent sub-policies grant filesystem, HTTP, shell and code
//! execution access. Every sub-policy is disabled by default, so an agent
//! without explicit grants cannot perform any side effect.

use crate::error::PolicyError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current schema version of [`PermissionModel`].
pub const PERMISSION_MODEL_VERSION: u32 = 1;

const KNOWN_METHODS: &[&str] = &["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"];
const MAX_MEMORY_LIMIT_MB: u32 = 4096;
const MAX_TIME_LIMIT_MS: u64 = 10 * 60 * 1000;

/// Complete set of grants for one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PermissionModel {
    /// Schema version.
    pub version: u32,
    /// Filesystem access.
    pub filesystem: FilesystemPolicy,
    /// Outbound HTTP access.
    pub http: HttpPolicy,
    /// Shell command execution.
    pub shell: ShellPolicy,
    /// Custom code block execution.
    pub code_exec: CodeExecPolicy,
}

impl Default for PermissionModel {
    fn default() -> Self {
        Self {
            version: PERMISSION_MODEL_VERSION,
            filesystem: FilesystemPolicy::default(),
            http: HttpPolicy::default(),
            shell: ShellPolicy::default(),
            code_exec: CodeExecPolicy::default(),
        }
    }
}

/// Filesystem access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FsAccess {
    /// Reads and directory listings only.
    #[default]
    Read,
    /// Reads and writes.
    ReadWrite,
}

/// Filesystem grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilesystemPolicy {
    pub enabled: bool,
    pub access: FsAccess,
    /// Globs a path must match at least one of.
    pub allowed_paths: Vec<String>,
    /// Globs that reject a path even when an allow glob matches.
    pub denied_paths: Vec<String>,
    pub max_file_size_bytes: u64,
}

impl Default for FilesystemPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            access: FsAccess::Read,
            allowed_paths: Vec::new(),
            denied_paths: Vec::new(),
            max_file_size_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Outbound HTTP grants.
///
/// Private, loopback and link-local destinations are always rejected by the
/// evaluator; there is no field to turn that off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpPolicy {
    pub enabled: bool,
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub requests_per_minute: u32,
    pub timeout_ms: u64,
    pub follow_redirects: bool,
    pub max_response_size_bytes: u64,
}

impl Default for HttpPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_domains: Vec::new(),
            blocked_domains: Vec::new(),
            allowed_methods: vec!["GET".to_string()],
            requests_per_minute: 60,
            timeout_ms: 30_000,
            follow_redirects: false,
            max_response_size_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Shell execution grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShellPolicy {
    pub enabled: bool,
    /// Binary names allowed as the first token of a command line. Exact match only.
    pub allowed_commands: Vec<String>,
    /// Regexes matched against the full command line. Any match denies.
    pub blocked_patterns: Vec<String>,
    pub working_directory: Option<String>,
    pub timeout_ms: u64,
    pub requires_confirmation: bool,
    /// Variables injected into the child environment on top of `PATH` and `HOME`.
    pub env: BTreeMap<String, String>,
}

impl Default for ShellPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_commands: Vec::new(),
            blocked_patterns: default_blocked_patterns(),
            working_directory: None,
            timeout_ms: 30_000,
            requires_confirmation: true,
            env: BTreeMap::new(),
        }
    }
}

/// Code block execution grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CodeExecPolicy {
    pub enabled: bool,
    pub memory_limit_mb: u32,
    pub time_limit_ms: u64,
    /// Whether the sandbox HTTP capability is wired to a live implementation.
    pub network_access: bool,
    /// Helper modules importable from inside the sandbox.
    pub allowed_modules: Vec<String>,
    /// Read-only variables visible to sandboxed code as `ctx.env`.
    pub env: BTreeMap<String, String>,
}

impl Default for CodeExecPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            memory_limit_mb: 64,
            time_limit_ms: 5_000,
            network_access: false,
            allowed_modules: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

/// Default shell deny patterns: destructive commands, privilege escalation,
/// and shell chaining / substitution / redirection.
pub fn default_blocked_patterns() -> Vec<String> {
    [
        r"\brm\s+-[a-zA-Z]*[rRf]",
        r"[;&|`]",
        r"\$\(",
        r"[<>]",
        r"\bsudo\b",
        r"\bmkfs(\.\w+)?\b",
        r"\bdd\b.*\bof=",
        r"\b(shutdown|reboot|halt|poweroff)\b",
        r"\bchmod\s+(-R\s+)?0?777\b",
        r"\bchown\s+-R\b",
        r":\(\)\s*\{",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

impl PermissionModel {
    /// A model with every sub-policy disabled.
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// Validate the model, collecting every problem found.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let mut problems = Vec::new();

        if self.version == 0 || self.version > PERMISSION_MODEL_VERSION {
            problems.push(format!("version: unsupported version {}", self.version));
        }

        self.filesystem.collect_problems(&mut problems);
        self.http.collect_problems(&mut problems);
        self.shell.collect_problems(&mut problems);
        self.code_exec.collect_problems(&mut problems);

        if problems.is_empty() {
            Ok(())
        } else {
            Err(PolicyError::Invalid(problems))
        }
    }
}

impl FilesystemPolicy {
    fn collect_problems(&self, problems: &mut Vec<String>) {
        check_globs("filesystem.allowedPaths", &self.allowed_paths, problems);
        check_globs("filesystem.deniedPaths", &self.denied_paths, problems);
        if self.max_file_size_bytes == 0 {
            problems.push("filesystem.maxFileSizeBytes: must be greater than zero".to_string());
        }
    }
}

impl HttpPolicy {
    fn collect_problems(&self, problems: &mut Vec<String>) {
        check_globs("http.allowedDomains", &self.allowed_domains, problems);
        check_globs("http.blockedDomains", &self.blocked_domains, problems);
        for method in &self.allowed_methods {
            if !KNOWN_METHODS.contains(&method.to_ascii_uppercase().as_str()) {
                problems.push(format!("http.allowedMethods: unknown method '{method}'"));
            }
        }
        if self.requests_per_minute == 0 {
            problems.push("http.requestsPerMinute: must be greater than zero".to_string());
        }
        if self.timeout_ms == 0 {
            problems.push("http.timeoutMs: must be greater than zero".to_string());
        }
        if self.max_response_size_bytes == 0 {
            problems.push("http.maxResponseSizeBytes: must be greater than zero".to_string());
        }
    }

    /// Whether `method` is in the allowed set (case-insensitive).
    pub fn allows_method(&self, method: &str) -> bool {
        self.allowed_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
    }
}

impl ShellPolicy {
    fn collect_problems(&self, problems: &mut Vec<String>) {
        for command in &self.allowed_commands {
            if command.is_empty() || command.chars().any(char::is_whitespace) {
                problems.push(format!(
                    "shell.allowedCommands: '{command}' must be a single binary name"
                ));
            }
        }
        for pattern in &self.blocked_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                problems.push(format!("shell.blockedPatterns: '{pattern}' is not a valid regex: {e}"));
            }
        }
        if self.timeout_ms == 0 {
            problems.push("shell.timeoutMs: must be greater than zero".to_string());
        }
        for key in self.env.keys() {
            if key.is_empty() || key.contains('=') {
                problems.push(format!("shell.env: invalid variable name '{key}'"));
            }
        }
    }
}

impl CodeExecPolicy {
    fn collect_problems(&self, problems: &mut Vec<String>) {
        if self.memory_limit_mb == 0 || self.memory_limit_mb > MAX_MEMORY_LIMIT_MB {
            problems.push(format!(
                "codeExec.memoryLimitMb: must be between 1 and {MAX_MEMORY_LIMIT_MB}"
            ));
        }
        if self.time_limit_ms == 0 || self.time_limit_ms > MAX_TIME_LIMIT_MS {
            problems.push(format!(
                "codeExec.timeLimitMs: must be between 1 and {MAX_TIME_LIMIT_MS}"
            ));
        }
        for module in &self.allowed_modules {
            let valid = !module.is_empty()
                && module
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
            if !valid {
                problems.push(format!("codeExec.allowedModules: invalid module name '{module}'"));
            }
        }
    }
}

fn check_globs(field: &str, globs: &[String], problems: &mut Vec<String>) {
    for glob in globs {
        if glob.trim().is_empty() {
            problems.push(format!("{field}: empty pattern"));
        } else if let Err(e) = glob::Pattern::new(glob) {
            problems.push(format!("{field}: '{glob}' is not a valid glob: {e}"));
        }
    }
}
