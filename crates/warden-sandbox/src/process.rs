//! Restricted child process execution.
//!
//! Commands run from a tokenized argv without a shell, with a cleared
//! environment: only the host `PATH` and `HOME` plus explicitly injected
//! variables reach the child. Output is read as it arrives; a child that
//! writes past the cap is killed.

use crate::error::SandboxError;
use crate::limits::LimitedBuffer;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::debug;

/// Host variables forwarded to every child.
const INHERITED_ENV: &[&str] = &["PATH", "HOME"];

/// Description of one child process.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    /// Cap on captured stdout and stderr, each.
    pub max_output_bytes: usize,
}

impl CommandSpec {
    /// Build a spec from an already-tokenized command line.
    pub fn from_argv(argv: &[String], cwd: PathBuf, timeout: Duration) -> Result<Self, SandboxError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SandboxError::Configuration("empty command".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            cwd,
            env: BTreeMap::new(),
            timeout,
            max_output_bytes: 1024 * 1024,
        })
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

/// Result from a child process.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code. -1 when terminated by a signal.
    pub exit_code: i32,
    pub success: bool,
    /// Output passed the cap. The child was killed at that point.
    pub truncated: bool,
}

/// Run a command to completion, killing it when the timeout expires.
pub async fn run_command(spec: &CommandSpec) -> Result<ProcessOutput, SandboxError> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .env_clear()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for key in INHERITED_ENV {
        if let Some(value) = std::env::var_os(key) {
            command.env(key, value);
        }
    }
    command.envs(&spec.env);

    debug!(program = %spec.program, args = spec.args.len(), "spawning child process");
    run_with_timeout(command, spec.timeout, spec.max_output_bytes).await
}

async fn run_with_timeout(
    mut command: Command,
    timeout: Duration,
    max_output_bytes: usize,
) -> Result<ProcessOutput, SandboxError> {
    let mut child = command
        .spawn()
        .map_err(|e| SandboxError::Execution(e.to_string()))?;
    // On timeout the child is dropped, which kills it.
    tokio::time::timeout(timeout, collect_output(&mut child, max_output_bytes))
        .await
        .map_err(|_| SandboxError::Timeout(timeout.as_millis() as u64))?
}

async fn collect_output(
    child: &mut Child,
    max_output_bytes: usize,
) -> Result<ProcessOutput, SandboxError> {
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let mut stdout = LimitedBuffer::new(max_output_bytes);
    let mut stderr = LimitedBuffer::new(max_output_bytes);
    let mut out_chunk = [0u8; 8192];
    let mut err_chunk = [0u8; 8192];

    let mut capped = false;
    while !capped && (stdout_pipe.is_some() || stderr_pipe.is_some()) {
        tokio::select! {
            read = read_chunk(&mut stdout_pipe, &mut out_chunk) => match read? {
                0 => stdout_pipe = None,
                n => {
                    stdout.write(&out_chunk[..n]);
                    capped = stdout.was_truncated();
                }
            },
            read = read_chunk(&mut stderr_pipe, &mut err_chunk) => match read? {
                0 => stderr_pipe = None,
                n => {
                    stderr.write(&err_chunk[..n]);
                    capped = stderr.was_truncated();
                }
            },
        }
    }

    if capped {
        debug!(max_output_bytes, "output cap reached, killing child");
        // Fails only when the child already exited.
        let _ = child.start_kill();
    }
    let status = child
        .wait()
        .await
        .map_err(|e| SandboxError::Execution(e.to_string()))?;

    Ok(ProcessOutput {
        stdout: stdout.into_string(),
        stderr: stderr.into_string(),
        exit_code: status.code().unwrap_or(-1),
        success: status.success(),
        truncated: capped,
    })
}

/// Next chunk from a pipe. A closed pipe never yields.
async fn read_chunk<R>(pipe: &mut Option<R>, chunk: &mut [u8]) -> Result<usize, SandboxError>
where
    R: AsyncRead + Unpin,
{
    match pipe {
        Some(pipe) => pipe
            .read(chunk)
            .await
            .map_err(|e| SandboxError::Execution(format!("Failed to read output: {e}"))),
        None => std::future::pending().await,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn spec(argv: &[&str]) -> CommandSpec {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        CommandSpec::from_argv(&argv, std::env::temp_dir(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_runs_without_shell_interpretation() {
        let output = run_command(&spec(&["echo", "a; rm -rf /", "$(whoami)"]))
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "a; rm -rf / $(whoami)");
    }

    #[tokio::test]
    async fn test_environment_is_cleared() {
        std::env::set_var("WARDEN_TEST_LEAK", "leaked");
        let mut env = BTreeMap::new();
        env.insert("INJECTED".to_string(), "yes".to_string());
        let output = run_command(&spec(&["env"]).with_env(env)).await.unwrap();
        assert!(output.stdout.contains("INJECTED=yes"));
        assert!(!output.stdout.contains("WARDEN_TEST_LEAK"));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let mut spec = spec(&["sleep", "5"]);
        spec.timeout = Duration::from_millis(100);
        let start = std::time::Instant::now();
        let err = run_command(&spec).await.unwrap_err();
        assert!(matches!(err, SandboxError::Timeout(100)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let mut spec = spec(&["echo", "0123456789"]);
        spec.max_output_bytes = 4;
        let output = run_command(&spec).await.unwrap();
        assert!(output.truncated);
        assert!(output.stdout.starts_with("0123\n"));
    }

    #[tokio::test]
    async fn test_flooding_child_is_killed_at_cap() {
        // roughly 78 MB if left to finish
        let mut spec = spec(&["seq", "1", "10000000"]);
        spec.max_output_bytes = 64;
        spec.timeout = Duration::from_secs(10);
        let start = std::time::Instant::now();
        let output = run_command(&spec).await.unwrap();
        assert!(output.truncated);
        assert!(!output.success);
        assert!(output.stdout.starts_with("1\n2\n3\n"));
        assert!(output.stdout.len() < 64 + 64);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_binary_is_execution_error() {
        let err = run_command(&spec(&["definitely-not-a-real-binary-xyz"]))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Execution(_)));
    }

    #[test]
    fn test_empty_argv_rejected() {
        assert!(CommandSpec::from_argv(&[], std::env::temp_dir(), Duration::from_secs(1)).is_err());
    }
}
