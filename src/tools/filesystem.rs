//! 沙箱文件系统与只读文件工具
//!
//! SafeFs 绑定 root_dir，所有路径必须落在 root 下（禁止 ../ 逃逸）：先按词法规范化校验，
//! 再把最近的已存在祖先 canonicalize 后校验，经符号链接指向 root 之外的路径一律拒绝。
//! ReadFileTool / ReadFilesTool / ListDirTool 基于 SafeFs。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::Tool;

/// 沙箱文件系统
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 解析路径（可不存在）：词法去除 `.` / `..` 后必须仍在 root 下，
    /// 且最近的已存在祖先的真实路径也在 root 下
    pub fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let denied = || format!("Access denied: path '{}' is outside workspace", path);
        let raw = Path::new(path);
        let joined = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.root_dir.join(raw)
        };
        let normalized = normalize(&joined);
        if !normalized.starts_with(&self.root_dir) {
            return Err(denied());
        }

        let mut existing = normalized.as_path();
        let mut missing = Vec::new();
        loop {
            match existing.canonicalize() {
                Ok(real) => {
                    if !real.starts_with(&self.root_dir) {
                        return Err(denied());
                    }
                    return Ok(missing.iter().rev().fold(real, |acc, name| acc.join(name)));
                }
                // 存在但无法解析：悬空的符号链接，写入会落到链接目标
                Err(_) if std::fs::symlink_metadata(existing).is_ok() => return Err(denied()),
                Err(_) => match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        missing.push(name.to_os_string());
                        existing = parent;
                    }
                    _ => return Ok(normalized),
                },
            }
        }
    }

    pub fn read_file(&self, path: &str) -> Result<String, String> {
        let resolved = self.resolve(path)?;
        std::fs::read_to_string(&resolved).map_err(|e| format!("Read failed for {}: {}", path, e))
    }

    /// 写入文件，父目录不存在时自动创建
    pub fn write_file(&self, path: &str, content: &str) -> Result<PathBuf, String> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create parent directory for {}: {}", path, e))?;
        }
        std::fs::write(&resolved, content)
            .map_err(|e| format!("Failed to write file at {}: {}", path, e))?;
        Ok(resolved)
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, String> {
        let base = if path.is_empty() || path == "." {
            self.root_dir.clone()
        } else {
            self.resolve(path)?
        };
        let mut entries = Vec::new();
        for e in std::fs::read_dir(&base).map_err(|e| format!("List failed: {}", e))? {
            let e = e.map_err(|e| e.to_string())?;
            let name = e.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                let ty = if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    "/"
                } else {
                    ""
                };
                entries.push(format!("{}{}", name, ty));
            }
        }
        entries.sort();
        Ok(entries)
    }
}

/// 词法规范化：不访问文件系统
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// 读取文件
pub struct ReadFileTool {
    fs: SafeFs,
}

impl ReadFileTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file inside the workspace."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path relative to the workspace"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or("");
        tracing::debug!(path = %path, "read_file");
        self.fs.read_file(path)
    }
}

/// 一次读取多个文件；单个文件失败只记录在输出里，全部失败时返回错误
pub struct ReadFilesTool {
    fs: SafeFs,
}

impl ReadFilesTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for ReadFilesTool {
    fn name(&self) -> &str {
        "read_files"
    }

    fn description(&self) -> &str {
        "Read several UTF-8 text files inside the workspace in one call."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "paths": {
                    "type": "array",
                    "description": "File paths relative to the workspace (e.g. ['app.py', 'config.json'])",
                    "items": {"type": "string"},
                    "minItems": 1
                }
            },
            "required": ["paths"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let paths: Vec<&str> = args
            .get("paths")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|p| p.as_str()).collect())
            .unwrap_or_default();
        tracing::debug!(count = paths.len(), "read_files");
        let mut sections = Vec::with_capacity(paths.len());
        let mut failures = 0;
        for path in &paths {
            match self.fs.read_file(path) {
                Ok(content) => sections.push(format!("=== {path} ===\n{content}")),
                Err(e) => {
                    failures += 1;
                    sections.push(format!("=== {path} ===\n{e}"));
                }
            }
        }
        let report = sections.join("\n\n");
        if failures == paths.len() {
            Err(report)
        } else {
            Ok(report)
        }
    }
}

/// 列出目录
pub struct ListDirTool {
    fs: SafeFs,
}

impl ListDirTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List a directory inside the workspace (default '.'). Directories end with '/'."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory path, default '.'"}
            }
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        tracing::debug!(path = %path, "list_dir");
        Ok(self.fs.list_dir(path)?.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_blocks_escape() {
        let dir = TempDir::new().unwrap();
        let fs = SafeFs::new(dir.path());
        assert!(fs.resolve("../etc/passwd").is_err());
        assert!(fs.resolve("a/../../x").is_err());
        assert!(fs.resolve("/etc/passwd").is_err());
        assert!(fs.resolve("a/./b/../c.txt").unwrap().ends_with("a/c.txt"));
    }

    #[test]
    fn test_write_then_read_and_list() {
        let dir = TempDir::new().unwrap();
        let fs = SafeFs::new(dir.path());
        fs.write_file("src/lib.rs", "pub fn answer() -> u32 { 42 }").unwrap();
        assert!(fs.read_file("src/lib.rs").unwrap().contains("42"));
        assert_eq!(fs.list_dir(".").unwrap(), vec!["src/".to_string()]);
    }

    #[tokio::test]
    async fn test_read_file_tool_missing_file() {
        let dir = TempDir::new().unwrap();
        let tool = ReadFileTool::new(dir.path());
        let err = tool
            .execute(serde_json::json!({"path": "nope.txt"}))
            .await
            .unwrap_err();
        assert!(err.contains("Read failed"));
        assert!(!tool.side_effecting());
    }

    #[tokio::test]
    async fn test_read_files_reports_each_file() {
        let dir = TempDir::new().unwrap();
        let fs = SafeFs::new(dir.path());
        fs.write_file("app.py", "print('hi')\n").unwrap();
        fs.write_file("config.json", "{}").unwrap();
        let tool = ReadFilesTool::new(dir.path());

        let out = tool
            .execute(serde_json::json!({"paths": ["app.py", "config.json", "missing.txt"]}))
            .await
            .unwrap();
        assert!(out.contains("=== app.py ===\nprint('hi')"));
        assert!(out.contains("=== config.json ===\n{}"));
        assert!(out.contains("=== missing.txt ===\nRead failed"));

        let err = tool
            .execute(serde_json::json!({"paths": ["missing.txt", "../escape"]}))
            .await
            .unwrap_err();
        assert!(err.contains("Access denied"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_blocks_symlink_escape_for_new_paths() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("gone.txt"), dir.path().join("dangling")).unwrap();
        let fs = SafeFs::new(dir.path());

        assert!(fs.resolve("link/new.txt").is_err());
        assert!(fs.resolve("link/deeper/new.txt").is_err());
        assert!(fs.write_file("link/new.txt", "x").is_err());
        assert!(fs.write_file("dangling", "x").is_err());
        assert!(!outside.path().join("new.txt").exists());
        assert!(!outside.path().join("gone.txt").exists());

        // 链接留在工作区内时照常解析
        std::fs::create_dir_all(dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("inner")).unwrap();
        let resolved = fs.resolve("inner/new.txt").unwrap();
        assert_eq!(resolved, fs.root().join("real/new.txt"));
    }
}
