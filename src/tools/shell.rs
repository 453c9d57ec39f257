//! Shell 执行器：白名单命令，禁止危险操作
//!
//! 仅允许配置中的命令名（首词，如 ls、cargo、python3）；禁止 rm -rf、wget、chmod 777 等子串；
//! 在工作区根目录下通过 sh -c / cmd /C 执行，带超时与可选 stdin 输入。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::tools::Tool;

/// 禁止的命令/子串（即使白名单中有同名，也不允许带这些参数）
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "rm -r",
    "wget ",
    "curl | sh",
    "chmod 777",
    "chmod +s",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    "git push",
    ":(){ :|:& };:", // fork bomb
];

/// 执行结果输出的最大字符数
const MAX_OUTPUT_CHARS: usize = 16_000;

/// 在 workdir 下运行一条命令，stdin 可选；非零退出码返回 Err（含 stderr）
pub(crate) async fn run_command(
    mut cmd: Command,
    workdir: &Path,
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<String, String> {
    cmd.current_dir(workdir)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| format!("Execution failed: {}", e))?;
    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes())
            .await
            .map_err(|e| format!("Failed to write stdin: {}", e))?;
    }

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| format!("Command timed out after {}s", timeout.as_secs()))?
        .map_err(|e| format!("Execution failed: {}", e))?;

    let stdout = truncate(&String::from_utf8_lossy(&output.stdout));
    let stderr = truncate(&String::from_utf8_lossy(&output.stderr));
    if !output.status.success() {
        return Err(format!(
            "Exit {}\nstdout: {}\nstderr: {}",
            output.status.code().map_or_else(|| "signal".to_string(), |c| c.to_string()),
            stdout.trim(),
            stderr.trim()
        ));
    }
    Ok(if stderr.trim().is_empty() {
        stdout
    } else {
        format!("{}\nstderr: {}", stdout.trim(), stderr.trim())
    })
}

fn truncate(s: &str) -> String {
    if s.chars().count() > MAX_OUTPUT_CHARS {
        let head: String = s.chars().take(MAX_OUTPUT_CHARS).collect();
        format!("{}\n... [truncated]", head)
    } else {
        s.to_string()
    }
}

/// Shell 工具：仅允许白名单内命令
pub struct ShellTool {
    workdir: PathBuf,
    allowed_commands: HashSet<String>,
    timeout_secs: u64,
}

impl ShellTool {
    pub fn new(workdir: impl AsRef<Path>, allowed_commands: Vec<String>, timeout_secs: u64) -> Self {
        let allowed_commands = allowed_commands
            .into_iter()
            .map(|s| s.to_lowercase())
            .collect();
        Self {
            workdir: workdir.as_ref().to_path_buf(),
            allowed_commands,
            timeout_secs,
        }
    }

    /// 只取第一个 token 作为命令名
    fn command_name(raw: &str) -> &str {
        raw.split_whitespace().next().unwrap_or("")
    }

    fn is_allowed(&self, raw: &str) -> Result<(), String> {
        let raw_lower = raw.to_lowercase();
        for forbidden in FORBIDDEN_SUBSTR {
            if raw_lower.contains(forbidden) {
                return Err(format!("Forbidden pattern: {}", forbidden));
            }
        }
        let name = Self::command_name(&raw_lower);
        if name.is_empty() {
            return Err("Empty command".to_string());
        }
        if self.allowed_commands.contains(name) {
            return Ok(());
        }
        Err(format!("Command '{}' not in allowlist", name))
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "run_shell_command"
    }

    fn description(&self) -> &str {
        "Execute an allow-listed shell command in the workspace root. Optional 'user_input' is fed to stdin."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "The shell command to run"},
                "user_input": {"type": "string", "description": "Text written to the command's stdin (e.g. 'y')"}
            },
            "required": ["command"]
        })
    }

    fn side_effecting(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        self.is_allowed(command)?;
        let user_input = args.get("user_input").and_then(|v| v.as_str());

        tracing::info!(command = %command, "shell tool execute");

        let cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        let stdin = user_input.map(|s| format!("{}\n", s));
        run_command(
            cmd,
            &self.workdir,
            stdin.as_deref(),
            Duration::from_secs(self.timeout_secs),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(dir: &Path) -> ShellTool {
        ShellTool::new(dir, vec!["echo".into(), "ls".into(), "sh".into(), "cat".into()], 5)
    }

    #[test]
    fn test_forbidden_and_allowlist() {
        let t = tool(Path::new("."));
        assert!(t.is_allowed("echo hi").is_ok());
        assert!(t.is_allowed("rm -rf /").unwrap_err().contains("Forbidden"));
        assert!(t.is_allowed("curl http://x").unwrap_err().contains("allowlist"));
        assert!(t.is_allowed("   ").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_in_workdir_and_reports_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let t = tool(dir.path());
        let out = t.execute(serde_json::json!({"command": "ls"})).await.unwrap();
        assert!(out.contains("marker.txt"));
        let err = t
            .execute(serde_json::json!({"command": "sh -c 'exit 3'"}))
            .await
            .unwrap_err();
        assert!(err.starts_with("Exit 3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_user_input_goes_to_stdin() {
        let dir = tempfile::TempDir::new().unwrap();
        let t = tool(dir.path());
        let out = t
            .execute(serde_json::json!({"command": "cat", "user_input": "y"}))
            .await
            .unwrap();
        assert_eq!(out.trim(), "y");
    }
}
