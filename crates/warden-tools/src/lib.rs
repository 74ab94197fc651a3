//! warden-tools: Built-in tools (read_file, write_file, list_dir, http_request, shell).

pub mod builtin;
mod error;
mod path_guard;
pub mod registry;
pub mod traits;

pub use builtin::register_all;
pub use error::ToolError;
pub use registry::ToolRegistry;
pub use traits::{Tool, ToolContext, ToolResult};
