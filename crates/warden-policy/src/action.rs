//! Side-effecting actions an agent may request.

use crate::error::PolicyError;
use crate::matcher::normalize_path;
use crate::redact::{redact_text, redact_url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Filesystem operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FsOperation {
    Read,
    Write,
    List,
}

impl FsOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            FsOperation::Read => "read",
            FsOperation::Write => "write",
            FsOperation::List => "list",
        }
    }

    /// Whether the operation mutates the filesystem.
    pub fn is_write(self) -> bool {
        matches!(self, FsOperation::Write)
    }
}

/// One attempted action, built per call and never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ActionRequest {
    /// Filesystem access. `size_bytes` comes from a stat (reads) or the payload (writes).
    #[serde(rename_all = "camelCase")]
    Filesystem {
        operation: FsOperation,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size_bytes: Option<u64>,
    },
    /// Outbound HTTP request.
    Http { method: String, url: String },
    /// Shell command line.
    Shell { command: String },
    /// Instantiation of the code sandbox for a code block.
    CodeExec { block: String },
}

/// Normalized shape of an action, used to cache session-wide approvals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionKey(String);

impl ActionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ActionRequest {
    /// Tool family the action belongs to.
    pub fn tool(&self) -> &'static str {
        match self {
            ActionRequest::Filesystem { .. } => "filesystem",
            ActionRequest::Http { .. } => "http",
            ActionRequest::Shell { .. } => "shell",
            ActionRequest::CodeExec { .. } => "codeExec",
        }
    }

    /// Normalized key: tool plus target. Two requests share a key only when
    /// they would do the same thing.
    pub fn key(&self) -> ActionKey {
        let key = match self {
            ActionRequest::Filesystem {
                operation, path, ..
            } => format!(
                "filesystem:{}:{}",
                operation.as_str(),
                normalize_path(Path::new(path)).display()
            ),
            ActionRequest::Http { method, url } => {
                format!("http:{} {}", method.to_ascii_uppercase(), normalize_url(url))
            }
            // argv is JSON-encoded so token boundaries survive
            ActionRequest::Shell { command } => {
                let argv = split_command_line(command)
                    .ok()
                    .and_then(|tokens| serde_json::to_string(&tokens).ok());
                match argv {
                    Some(argv) => format!("shell:{argv}"),
                    None => format!("shell-raw:{}", command.trim()),
                }
            }
            ActionRequest::CodeExec { block } => format!("codeExec:{block}"),
        };
        ActionKey(key)
    }

    /// Human-readable one-line description with secrets removed.
    pub fn describe(&self) -> String {
        match self {
            ActionRequest::Filesystem {
                operation, path, ..
            } => match operation {
                FsOperation::Read => format!("Read file {path}"),
                FsOperation::Write => format!("Write file {path}"),
                FsOperation::List => format!("List directory {path}"),
            },
            ActionRequest::Http { method, url } => {
                format!("{} {}", method.to_ascii_uppercase(), redact_url(url))
            }
            ActionRequest::Shell { command } => format!("Run command: {}", redact_text(command)),
            ActionRequest::CodeExec { block } => format!("Execute code block {block}"),
        }
    }

    /// Normalized, redacted parameters for display in a confirmation prompt or audit entry.
    pub fn display_parameters(&self) -> serde_json::Value {
        match self {
            ActionRequest::Filesystem {
                operation,
                path,
                size_bytes,
            } => serde_json::json!({
                "tool": self.tool(),
                "operation": operation.as_str(),
                "path": normalize_path(Path::new(path)).display().to_string(),
                "sizeBytes": size_bytes,
            }),
            ActionRequest::Http { method, url } => serde_json::json!({
                "tool": self.tool(),
                "method": method.to_ascii_uppercase(),
                "url": redact_url(url),
            }),
            ActionRequest::Shell { command } => serde_json::json!({
                "tool": self.tool(),
                "command": redact_text(command.trim()),
            }),
            ActionRequest::CodeExec { block } => serde_json::json!({
                "tool": self.tool(),
                "block": block,
            }),
        }
    }

    /// Target shown alongside a confirmation prompt: (command, url, path).
    pub fn target(&self) -> (Option<String>, Option<String>, Option<String>) {
        match self {
            ActionRequest::Shell { command } => (Some(redact_text(command.trim())), None, None),
            ActionRequest::Http { url, .. } => (None, Some(redact_url(url)), None),
            ActionRequest::Filesystem { path, .. } => (None, None, Some(path.clone())),
            ActionRequest::CodeExec { .. } => (None, None, None),
        }
    }
}

fn normalize_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.set_query(None);
            let _ = url.set_username("");
            let _ = url.set_password(None);
            url.to_string()
        }
        Err(_) => raw.trim().to_string(),
    }
}

/// Split a command line into tokens, honoring single quotes, double quotes and
/// backslash escapes. No expansion of any kind is performed.
pub fn split_command_line(line: &str) -> Result<Vec<String>, PolicyError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => {
                            return Err(PolicyError::CommandLine(
                                "unterminated single quote".to_string(),
                            ))
                        }
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch) => current.push(ch),
                            None => {
                                return Err(PolicyError::CommandLine(
                                    "trailing backslash".to_string(),
                                ))
                            }
                        },
                        Some(ch) => current.push(ch),
                        None => {
                            return Err(PolicyError::CommandLine(
                                "unterminated double quote".to_string(),
                            ))
                        }
                    }
                }
            }
            '\\' => {
                in_token = true;
                match chars.next() {
                    Some(ch) => current.push(ch),
                    None => {
                        return Err(PolicyError::CommandLine("trailing backslash".to_string()))
                    }
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }

    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_plain_and_quoted() {
        assert_eq!(
            split_command_line("git  commit -m 'first commit'").unwrap(),
            vec!["git", "commit", "-m", "first commit"]
        );
        assert_eq!(
            split_command_line(r#"echo "a \"b\"" c\ d"#).unwrap(),
            vec!["echo", "a \"b\"", "c d"]
        );
        assert_eq!(split_command_line("echo ''").unwrap(), vec!["echo", ""]);
        assert!(split_command_line("   ").unwrap().is_empty());
    }

    #[test]
    fn test_split_rejects_unterminated_quotes() {
        assert!(split_command_line("echo 'oops").is_err());
        assert!(split_command_line("echo \"oops").is_err());
        assert!(split_command_line("echo oops\\").is_err());
    }

    #[test]
    fn test_shell_key_ignores_spacing_only() {
        let a = ActionRequest::Shell {
            command: "git   status".to_string(),
        };
        let b = ActionRequest::Shell {
            command: "git status".to_string(),
        };
        let c = ActionRequest::Shell {
            command: "git push".to_string(),
        };
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn test_shell_key_keeps_argument_boundaries() {
        let quoted = ActionRequest::Shell {
            command: "cat '/tmp/notes /etc/shadow'".to_string(),
        };
        let split = ActionRequest::Shell {
            command: "cat /tmp/notes /etc/shadow".to_string(),
        };
        assert_ne!(quoted.key(), split.key());
        assert_eq!(quoted.key().as_str(), r#"shell:["cat","/tmp/notes /etc/shadow"]"#);
    }

    #[test]
    fn test_unparsable_shell_key_never_matches_argv_key() {
        let broken = ActionRequest::Shell {
            command: "echo 'oops".to_string(),
        };
        assert!(broken.key().as_str().starts_with("shell-raw:"));
    }

    #[test]
    fn test_http_key_drops_query_and_credentials() {
        let a = ActionRequest::Http {
            method: "get".to_string(),
            url: "https://u:p@api.example.com/v1?token=1".to_string(),
        };
        assert_eq!(a.key().as_str(), "http:GET https://api.example.com/v1");
    }

    #[test]
    fn test_filesystem_key_is_normalized() {
        let a = ActionRequest::Filesystem {
            operation: FsOperation::Write,
            path: "/tmp/a/../b.txt".to_string(),
            size_bytes: Some(3),
        };
        assert_eq!(a.key().as_str(), "filesystem:write:/tmp/b.txt");
    }

    #[test]
    fn test_wire_format_is_tagged() {
        let request = ActionRequest::Filesystem {
            operation: FsOperation::Read,
            path: "/tmp/x".to_string(),
            size_bytes: Some(10),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["kind"], "filesystem");
        assert_eq!(json["operation"], "read");
        assert_eq!(json["sizeBytes"], 10);
        let back: ActionRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_describe_redacts() {
        let request = ActionRequest::Http {
            method: "GET".to_string(),
            url: "https://api.example.com/?api_key=abc123".to_string(),
        };
        assert!(!request.describe().contains("abc123"));
    }
}
