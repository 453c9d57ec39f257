//! 写文件类工具：write_file / write_files / generate_project_structure
//!
//! 三者都有副作用；路径经 SafeFs 校验，父目录自动创建。批量写入逐项执行，任一项失败时返回汇总错误，
//! 已写入的部分由 Orchestrator 的 checkpoint 负责回滚。

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{SafeFs, Tool};

fn file_entries_schema(description: &str) -> Value {
    serde_json::json!({
        "type": "array",
        "description": description,
        "items": {
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path (e.g. 'app/main.py')"},
                "content": {"type": "string", "description": "Text to write inside the file"}
            },
            "required": ["path", "content"]
        }
    })
}

/// 逐项写入，返回每项的报告；有失败项时返回 Err（报告全文）
fn write_entries(fs: &SafeFs, base: &str, files: &[Value]) -> Result<String, String> {
    let mut lines = Vec::with_capacity(files.len());
    let mut failed = false;
    for file in files {
        let path = file.get("path").and_then(|v| v.as_str()).unwrap_or("");
        let content = file.get("content").and_then(|v| v.as_str());
        let Some(content) = content.filter(|_| !path.is_empty()) else {
            failed = true;
            lines.push(format!("invalid file entry: {}", file));
            continue;
        };
        let target = if base.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", base.trim_end_matches('/'), path)
        };
        match fs.write_file(&target, content) {
            Ok(_) => lines.push(format!("written: {}", target)),
            Err(e) => {
                failed = true;
                lines.push(e);
            }
        }
    }
    let report = lines.join("\n");
    if failed {
        Err(report)
    } else {
        Ok(report)
    }
}

/// 创建或覆盖单个文件
pub struct WriteFileTool {
    fs: SafeFs,
    max_file_size: usize,
}

impl WriteFileTool {
    pub fn new(root_dir: impl AsRef<Path>, max_file_size: usize) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
            max_file_size,
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Creates or overwrites a single file with the provided content."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path of the file to write (e.g. 'index.html')"},
                "content": {"type": "string", "description": "Content of the file"}
            },
            "required": ["path", "content"]
        })
    }

    fn side_effecting(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or("");
        let content = args.get("content").and_then(|v| v.as_str()).unwrap_or("");
        if content.len() > self.max_file_size {
            return Err(format!(
                "Content too large: {} bytes (max: {})",
                content.len(),
                self.max_file_size
            ));
        }
        self.fs.write_file(path, content)?;
        tracing::info!(path = %path, bytes = content.len(), "write_file");
        Ok(format!("File written successfully at: {}", path))
    }
}

/// 批量写入多个文件
pub struct WriteFilesTool {
    fs: SafeFs,
}

impl WriteFilesTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for WriteFilesTool {
    fn name(&self) -> &str {
        "write_files"
    }

    fn description(&self) -> &str {
        "Creates multiple files with given paths and content."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "files": file_entries_schema("List of file objects with path and content")
            },
            "required": ["files"]
        })
    }

    fn side_effecting(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let files = args
            .get("files")
            .and_then(|v| v.as_array())
            .ok_or("Missing required parameter: files")?;
        write_entries(&self.fs, "", files)
    }
}

/// 在 folder_name 下生成项目骨架
pub struct GenerateProjectTool {
    fs: SafeFs,
}

impl GenerateProjectTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for GenerateProjectTool {
    fn name(&self) -> &str {
        "generate_project_structure"
    }

    fn description(&self) -> &str {
        "Creates a project folder with multiple files and their contents."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "folder_name": {"type": "string", "description": "The name of the base folder to create"},
                "files": file_entries_schema("Files to create, with paths relative to the folder")
            },
            "required": ["folder_name", "files"]
        })
    }

    fn side_effecting(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let folder = args
            .get("folder_name")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or("Missing required parameter: folder_name")?;
        let files = args
            .get("files")
            .and_then(|v| v.as_array())
            .ok_or("Missing required parameter: files")?;
        let dir = self.fs.resolve(folder)?;
        std::fs::create_dir_all(&dir).map_err(|e| format!("Failed to create {}: {}", folder, e))?;
        let report = write_entries(&self.fs, folder, files)?;
        Ok(format!("Project structure created under {}\n{}", folder, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_file_creates_parents() {
        let dir = TempDir::new().unwrap();
        let tool = WriteFileTool::new(dir.path(), 1024);
        tool.execute(serde_json::json!({"path": "website/index.html", "content": "<html></html>"}))
            .await
            .unwrap();
        let written = std::fs::read_to_string(dir.path().join("website/index.html")).unwrap();
        assert_eq!(written, "<html></html>");
        assert!(tool.side_effecting());
    }

    #[tokio::test]
    async fn test_write_file_rejects_oversized() {
        let dir = TempDir::new().unwrap();
        let tool = WriteFileTool::new(dir.path(), 4);
        let err = tool
            .execute(serde_json::json!({"path": "a.txt", "content": "too long"}))
            .await
            .unwrap_err();
        assert!(err.contains("too large"));
    }

    #[tokio::test]
    async fn test_write_files_reports_invalid_entry() {
        let dir = TempDir::new().unwrap();
        let tool = WriteFilesTool::new(dir.path());
        let err = tool
            .execute(serde_json::json!({"files": [
                {"path": "a.txt", "content": "a"},
                {"path": "", "content": "b"}
            ]}))
            .await
            .unwrap_err();
        assert!(err.contains("written: a.txt"));
        assert!(err.contains("invalid file entry"));
        assert!(dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_generate_project_structure() {
        let dir = TempDir::new().unwrap();
        let tool = GenerateProjectTool::new(dir.path());
        let out = tool
            .execute(serde_json::json!({
                "folder_name": "website",
                "files": [
                    {"path": "index.html", "content": "<h1>hi</h1>"},
                    {"path": "js/script.js", "content": "console.log('hi')"}
                ]
            }))
            .await
            .unwrap();
        assert!(out.contains("website/js/script.js"));
        assert!(dir.path().join("website/js/script.js").exists());
    }
}
