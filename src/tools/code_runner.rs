//! 代码运行工具：按扩展名运行 .py / .sh / .cpp 文件
//!
//! .cpp 先用 g++ 编译到同名可执行文件再运行；inputs 按行拼接后写入 stdin。

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::tools::shell::run_command;
use crate::tools::{SafeFs, Tool};

pub struct CodeRunnerTool {
    fs: SafeFs,
    timeout_secs: u64,
}

impl CodeRunnerTool {
    pub fn new(root_dir: impl AsRef<Path>, timeout_secs: u64) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
            timeout_secs,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    async fn compile_cpp(&self, source: &Path) -> Result<PathBuf, String> {
        let binary = source.with_extension("");
        let mut cmd = Command::new("g++");
        cmd.arg(source).arg("-o").arg(&binary);
        run_command(cmd, self.fs.root(), None, self.timeout())
            .await
            .map_err(|e| format!("Compilation failed:\n{}", e))?;
        Ok(binary)
    }
}

#[async_trait]
impl Tool for CodeRunnerTool {
    fn name(&self) -> &str {
        "run_code_file"
    }

    fn description(&self) -> &str {
        "Run a code file based on its extension. Supports Python (.py), Bash (.sh) and C++ (.cpp). Returns output or error."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path to the code file"},
                "inputs": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Optional simulated user inputs for interactive programs"
                }
            },
            "required": ["path"]
        })
    }

    fn side_effecting(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or("");
        let source = self.fs.resolve(path)?;
        if !source.is_file() {
            return Err(format!("File not found: {}", path));
        }
        let stdin = args.get("inputs").and_then(|v| v.as_array()).map(|items| {
            let mut joined = items
                .iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            joined.push('\n');
            joined
        });

        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        let cmd = match ext.as_str() {
            "py" => {
                let mut c = Command::new("python3");
                c.arg(&source);
                c
            }
            "sh" => {
                let mut c = Command::new("bash");
                c.arg(&source);
                c
            }
            "cpp" => Command::new(self.compile_cpp(&source).await?),
            other => return Err(format!("Unsupported file type: .{}", other)),
        };

        tracing::info!(path = %path, ext = %ext, "run_code_file");
        let out = run_command(cmd, self.fs.root(), stdin.as_deref(), self.timeout()).await?;
        Ok(format!("Output:\n{}", out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_unsupported_extension() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.rb"), "puts 1").unwrap();
        let tool = CodeRunnerTool::new(dir.path(), 5);
        let err = tool
            .execute(serde_json::json!({"path": "main.rb"}))
            .await
            .unwrap_err();
        assert!(err.contains("Unsupported file type"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_shell_script_with_inputs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("greet.sh"), "read name\necho \"hello $name\"\n").unwrap();
        let tool = CodeRunnerTool::new(dir.path(), 5);
        let out = tool
            .execute(serde_json::json!({"path": "greet.sh", "inputs": ["bee"]}))
            .await
            .unwrap();
        assert!(out.contains("hello bee"));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let tool = CodeRunnerTool::new(dir.path(), 5);
        let err = tool
            .execute(serde_json::json!({"path": "absent.py"}))
            .await
            .unwrap_err();
        assert!(err.contains("File not found"));
    }
}
