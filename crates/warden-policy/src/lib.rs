//! warden-policy: Permission model, action requests, and the policy evaluator.

pub mod action;
mod error;
pub mod evaluator;
pub mod matcher;
pub mod model;
pub mod rate;
pub mod redact;

pub use action::{split_command_line, ActionKey, ActionRequest, FsOperation};
pub use error::PolicyError;
pub use evaluator::{check_http_destination, check_resolved_address, PolicyEvaluator, Verdict};
pub use model::{
    default_blocked_patterns, CodeExecPolicy, FilesystemPolicy, FsAccess, HttpPolicy,
    PermissionModel, ShellPolicy, PERMISSION_MODEL_VERSION,
};
pub use rate::RateWindow;
