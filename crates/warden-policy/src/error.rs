//! Error types for the warden-policy crate.

/// Errors raised while validating or interpreting a permission model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// The permission model failed validation. Each entry names a field and the problem.
    #[error("Invalid permission model: {}", .0.join("; "))]
    Invalid(Vec<String>),

    /// A shell command line could not be tokenized.
    #[error("Invalid command line: {0}")]
    CommandLine(String),
}
