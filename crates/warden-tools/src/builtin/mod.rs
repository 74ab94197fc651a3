//! Built-in tool implementations.

pub mod http_request;
pub mod list_dir;
pub mod read_file;
pub mod shell;
pub mod write_file;

use crate::ToolRegistry;
use std::sync::Arc;

/// Register all built-in tools into a registry.
pub fn register_all(registry: &mut ToolRegistry) {
    registry.register(Arc::new(read_file::ReadFileTool));
    registry.register(Arc::new(write_file::WriteFileTool));
    registry.register(Arc::new(list_dir::ListDirTool));
    registry.register(Arc::new(http_request::HttpRequestTool));
    registry.register(Arc::new(shell::ShellTool));
}
