/// Errors returned by the process runner and runtime setup.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Execution exceeded its wall-clock limit.
    #[error("Execution timed out after {0}ms")]
    Timeout(u64),
    /// Process could not be spawned or waited on.
    #[error("Failed to execute command: {0}")]
    Execution(String),
    /// Invalid command or runtime configuration.
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}
