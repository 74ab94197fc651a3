//! Isolation primitives: the embedded code runtime for agent-authored code
//! blocks and the restricted process runner used by the shell tool.

mod error;
mod footprint;
pub mod host;
pub mod limits;
mod modules;
pub mod process;
pub mod runtime;

pub use error::SandboxError;
pub use host::{CapabilityCall, CapabilityError, CapabilityHost, DenyAllHost};
pub use limits::{EngineLimits, ExecutionLimits, LimitedBuffer};
pub use process::{run_command, CommandSpec, ProcessOutput};
pub use runtime::{CodeRuntime, ExecutionOutcome, ScriptEnvironment, AVAILABLE_MODULES};
