//! 编辑已有文件：append / prepend / replace（整体覆盖）/ substitute（精确替换唯一匹配的片段）
//!
//! 目标文件必须已存在（新建文件用 write_file）；结果超过 max_file_size 时拒绝写入。

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{SafeFs, Tool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditMode {
    Append,
    Prepend,
    Replace,
    Substitute,
}

impl EditMode {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "append" => Some(EditMode::Append),
            "prepend" => Some(EditMode::Prepend),
            "replace" => Some(EditMode::Replace),
            "substitute" => Some(EditMode::Substitute),
            _ => None,
        }
    }
}

/// 拼接时保证两段之间恰好有换行
fn join_lines(first: &str, second: &str) -> String {
    if first.is_empty() || first.ends_with('\n') {
        format!("{first}{second}")
    } else {
        format!("{first}\n{second}")
    }
}

fn apply_edit(current: &str, mode: EditMode, content: &str, old_string: Option<&str>) -> Result<String, String> {
    match mode {
        EditMode::Append => Ok(join_lines(current, content)),
        EditMode::Prepend => Ok(join_lines(content, current)),
        EditMode::Replace => Ok(content.to_string()),
        EditMode::Substitute => {
            let old = old_string
                .filter(|s| !s.is_empty())
                .ok_or("mode 'substitute' requires a non-empty old_string")?;
            match current.matches(old).count() {
                0 => Err("old_string not found in file".to_string()),
                1 => Ok(current.replacen(old, content, 1)),
                n => Err(format!("old_string matches {n} times; include more surrounding context")),
            }
        }
    }
}

pub struct EditFileTool {
    fs: SafeFs,
    max_file_size: usize,
}

impl EditFileTool {
    pub fn new(root_dir: impl AsRef<Path>, max_file_size: usize) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
            max_file_size,
        }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit an existing file: append or prepend content, replace the whole file, or substitute \
         one exact occurrence of old_string with content."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Existing file path relative to the workspace"},
                "content": {"type": "string", "description": "Text to add, the new file body, or the substitution"},
                "mode": {
                    "type": "string",
                    "enum": ["append", "prepend", "replace", "substitute"],
                    "description": "Default 'append'"
                },
                "old_string": {"type": "string", "description": "Exact text to replace (mode 'substitute' only)"}
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
        let mode_name = args.get("mode").and_then(|v| v.as_str()).unwrap_or("append");
        let mode = EditMode::parse(mode_name).ok_or_else(|| format!("Invalid mode: {mode_name}"))?;
        let old_string = args.get("old_string").and_then(|v| v.as_str());

        let resolved = self.fs.resolve(path)?;
        if !resolved.is_file() {
            return Err(format!("File does not exist: {path}"));
        }
        let current = self.fs.read_file(path)?;
        let updated = apply_edit(&current, mode, content, old_string)?;
        if updated.len() > self.max_file_size {
            return Err(format!(
                "Edited file too large: {} bytes (max {})",
                updated.len(),
                self.max_file_size
            ));
        }
        self.fs.write_file(path, &updated)?;
        tracing::info!(path = %path, mode = mode_name, bytes = updated.len(), "edit_file");
        Ok(format!("File edited: {path} (mode: {mode_name})"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_apply_edit_modes() {
        assert_eq!(apply_edit("a", EditMode::Append, "b", None).unwrap(), "a\nb");
        assert_eq!(apply_edit("a\n", EditMode::Append, "b\n", None).unwrap(), "a\nb\n");
        assert_eq!(apply_edit("body\n", EditMode::Prepend, "# header", None).unwrap(), "# header\nbody\n");
        assert_eq!(apply_edit("old", EditMode::Replace, "new", None).unwrap(), "new");
        assert_eq!(
            apply_edit("x = 1\ny = 2\n", EditMode::Substitute, "y = 3", Some("y = 2")).unwrap(),
            "x = 1\ny = 3\n"
        );
        assert!(apply_edit("a a", EditMode::Substitute, "b", Some("a")).unwrap_err().contains("2 times"));
        assert!(apply_edit("a", EditMode::Substitute, "b", Some("z")).is_err());
        assert!(apply_edit("a", EditMode::Substitute, "b", None).is_err());
    }

    #[tokio::test]
    async fn test_edit_file_tool() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.py"), "def main():\n    pass\n").unwrap();
        let tool = EditFileTool::new(dir.path(), 1024);
        assert!(tool.side_effecting());

        tool.execute(serde_json::json!({"path": "main.py", "content": "main()\n"}))
            .await
            .unwrap();
        tool.execute(serde_json::json!({
            "path": "main.py",
            "mode": "substitute",
            "old_string": "    pass",
            "content": "    print('hi')"
        }))
        .await
        .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("main.py")).unwrap(),
            "def main():\n    print('hi')\nmain()\n"
        );

        let missing = tool
            .execute(serde_json::json!({"path": "nope.py", "content": "x"}))
            .await
            .unwrap_err();
        assert!(missing.contains("does not exist"));
        assert!(!dir.path().join("nope.py").exists());

        let bad_mode = tool
            .execute(serde_json::json!({"path": "main.py", "content": "x", "mode": "insert"}))
            .await
            .unwrap_err();
        assert!(bad_mode.contains("Invalid mode"));

        let too_big = tool
            .execute(serde_json::json!({"path": "main.py", "content": "x".repeat(2048), "mode": "replace"}))
            .await
            .unwrap_err();
        assert!(too_big.contains("too large"));
    }
}
