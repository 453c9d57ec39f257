//! 工具层：Tool trait、注册表、执行器与内置工具
//!
//! 内置工具：read_file / read_files / list_dir / search_code（只读）；write_file / write_files /
//! edit_file / generate_project_structure / run_shell_command / run_code_file（有副作用）。

pub mod code_runner;
pub mod executor;
pub mod file_edit;
pub mod file_write;
pub mod filesystem;
pub mod registry;
pub mod search;
pub mod shell;

use std::path::Path;

pub use code_runner::CodeRunnerTool;
pub use executor::{args_preview, ToolExecutor};
pub use file_edit::EditFileTool;
pub use file_write::{GenerateProjectTool, WriteFileTool, WriteFilesTool};
pub use filesystem::{ListDirTool, ReadFileTool, ReadFilesTool, SafeFs};
pub use registry::{Tool, ToolDescriptor, ToolError, ToolRegistry};
pub use search::SearchCodeTool;
pub use shell::ShellTool;

use crate::config::ToolsSection;

/// 注册全部内置工具，路径统一限制在 workspace 下
pub fn builtin_registry(workspace: &Path, cfg: &ToolsSection) -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(ReadFileTool::new(workspace));
    tools.register(ReadFilesTool::new(workspace));
    tools.register(ListDirTool::new(workspace));
    tools.register(SearchCodeTool::new(workspace));
    tools.register(WriteFileTool::new(workspace, cfg.max_file_size));
    tools.register(WriteFilesTool::new(workspace));
    tools.register(EditFileTool::new(workspace, cfg.max_file_size));
    tools.register(GenerateProjectTool::new(workspace));
    tools.register(ShellTool::new(
        workspace,
        cfg.shell.allowed_commands.clone(),
        cfg.tool_timeout_secs,
    ));
    tools.register(CodeRunnerTool::new(workspace, cfg.tool_timeout_secs));
    tools
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_side_effect_flags() {
        let dir = tempfile::TempDir::new().unwrap();
        let reg = builtin_registry(dir.path(), &ToolsSection::default());
        for name in ["read_file", "read_files", "list_dir", "search_code"] {
            assert_eq!(reg.is_side_effecting(name), Some(false), "{name}");
        }
        for name in [
            "write_file",
            "write_files",
            "edit_file",
            "generate_project_structure",
            "run_shell_command",
            "run_code_file",
        ] {
            assert_eq!(reg.is_side_effecting(name), Some(true), "{name}");
        }
    }
}
