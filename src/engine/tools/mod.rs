//! Built-in tool implementations for the tool registry.
//!
//! Two families ship in the box, matching the minimum tool set: file system
//! access (`read_file`, `write_file`, `list_directory`, `create_directory`)
//! and shell execution (`execute_command`). Each adapter struct wraps the
//! underlying domain tool (`FileSystemTool`, `BashTool`) and implements
//! [`crate::engine::tool_protocol::Tool`] so it can be dropped straight into
//! a [`crate::engine::tool_protocol::ToolRegistry`].
//!
//! # Wiring the built-ins into a registry
//!
//! ```ignore
//! use agentforge::engine::tool_protocol::ToolRegistry;
//! use agentforge::engine::tools::{register_builtin_tools, bash::{BashTool, Platform}, filesystem::FileSystemTool};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! # async fn setup() {
//! let fs = Arc::new(FileSystemTool::new().with_root_path(PathBuf::from("/workspace")));
//! let bash = Arc::new(BashTool::new(Platform::Linux).with_cwd_restriction(PathBuf::from("/workspace")));
//! let registry = ToolRegistry::new();
//! register_builtin_tools(&registry, fs, bash).await.unwrap();
//! # }
//! ```

pub mod bash;
pub mod filesystem;

pub use bash::{BashError, BashResult, BashTool, ExecuteCommandTool, Platform};
pub use filesystem::{
    CreateDirectoryTool, DirectoryEntry, FileMetadata, FileSystemError, FileSystemTool,
    ListDirectoryTool, ReadFileTool, WriteFileTool,
};

use crate::engine::tool_protocol::{ToolError, ToolRegistry};
use std::sync::Arc;

/// Register the five built-in tools (§4.1) against a shared file system root
/// and shell sandbox.
pub async fn register_builtin_tools(
    registry: &ToolRegistry,
    fs: Arc<FileSystemTool>,
    bash: Arc<BashTool>,
) -> Result<(), ToolError> {
    registry.register(Arc::new(ReadFileTool::new(fs.clone()))).await?;
    registry.register(Arc::new(WriteFileTool::new(fs.clone()))).await?;
    registry.register(Arc::new(ListDirectoryTool::new(fs.clone()))).await?;
    registry.register(Arc::new(CreateDirectoryTool::new(fs))).await?;
    registry.register(Arc::new(ExecuteCommandTool::new(bash))).await?;
    Ok(())
}
