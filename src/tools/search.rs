//! 代码搜索工具：在工作区内按正则或子串搜索
//!
//! walkdir 递归遍历，跳过隐藏目录、target、node_modules 与超大文件；可用 glob 过滤文件名。

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{SafeFs, Tool};

pub struct SearchCodeTool {
    fs: SafeFs,
    max_results: usize,
    max_file_size: u64,
}

impl SearchCodeTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
            max_results: 50,
            max_file_size: 1024 * 1024,
        }
    }

    pub fn with_limits(mut self, max_results: usize, max_file_size: u64) -> Self {
        self.max_results = max_results;
        self.max_file_size = max_file_size;
        self
    }

    fn search(
        &self,
        dir: &Path,
        pattern: &str,
        include: Option<&str>,
        use_regex: bool,
    ) -> Result<Vec<String>, String> {
        let matcher: Box<dyn Fn(&str) -> bool> = if use_regex {
            let re = regex::Regex::new(pattern).map_err(|e| format!("Invalid regex pattern: {}", e))?;
            Box::new(move |line: &str| re.is_match(line))
        } else {
            let needle = pattern.to_string();
            Box::new(move |line: &str| line.contains(needle.as_str()))
        };
        let include = include
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|e| format!("Invalid include pattern: {}", e))?;

        let mut results = Vec::new();
        let walker = walkdir::WalkDir::new(dir)
            .max_depth(12)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                e.depth() == 0
                    || (!name.starts_with('.') && name != "target" && name != "node_modules")
            })
            .filter_map(|e| e.ok());

        for entry in walker {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.metadata().map(|m| m.len() > self.max_file_size).unwrap_or(true) {
                continue;
            }
            if let Some(p) = &include {
                let name = entry.file_name().to_string_lossy();
                if !p.matches(&name) {
                    continue;
                }
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            let rel = entry
                .path()
                .strip_prefix(self.fs.root())
                .unwrap_or(entry.path())
                .display()
                .to_string();
            for (no, line) in content.lines().enumerate() {
                if matcher(line) {
                    results.push(format!("{}:{}: {}", rel, no + 1, line.trim()));
                    if results.len() >= self.max_results {
                        return Ok(results);
                    }
                }
            }
        }
        Ok(results)
    }
}

#[async_trait]
impl Tool for SearchCodeTool {
    fn name(&self) -> &str {
        "search_code"
    }

    fn description(&self) -> &str {
        "Search workspace files for a pattern. Returns 'path:line: text' matches."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "Text or regex to search for"},
                "path": {"type": "string", "description": "Directory to search, default '.'"},
                "include": {"type": "string", "description": "Glob on file names, e.g. '*.rs'"},
                "regex": {"type": "boolean", "description": "Treat pattern as a regex (default false)"}
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let pattern = args
            .get("pattern")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or("Missing required parameter: pattern")?;
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let include = args.get("include").and_then(|v| v.as_str());
        let use_regex = args.get("regex").and_then(|v| v.as_bool()).unwrap_or(false);

        let dir = if path == "." || path.is_empty() {
            self.fs.root().to_path_buf()
        } else {
            self.fs.resolve(path)?
        };
        let results = self.search(&dir, pattern, include, use_regex)?;
        if results.is_empty() {
            Ok(format!("No matches for '{}'", pattern))
        } else {
            Ok(results.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_search_regex_with_include() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "fn a() {}\npub fn answer() -> u32 { 42 }\n").unwrap();
        std::fs::write(dir.path().join("notes.md"), "fn answer in docs\n").unwrap();
        let tool = SearchCodeTool::new(dir.path());
        let out = tool
            .execute(serde_json::json!({"pattern": "fn answer", "include": "*.rs"}))
            .await
            .unwrap();
        assert!(out.contains("src/lib.rs:2:"));
        assert!(!out.contains("notes.md"));

        let out = tool
            .execute(serde_json::json!({"pattern": r"-> u\d+", "regex": true}))
            .await
            .unwrap();
        assert!(out.contains("lib.rs"));
    }

    #[tokio::test]
    async fn test_invalid_regex() {
        let dir = TempDir::new().unwrap();
        let tool = SearchCodeTool::new(dir.path());
        let err = tool
            .execute(serde_json::json!({"pattern": "(", "regex": true}))
            .await
            .unwrap_err();
        assert!(err.contains("Invalid regex"));
    }
}
