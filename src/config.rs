//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AI_IDE__*` 覆盖（双下划线表示嵌套，如 `AI_IDE__ORCHESTRATOR__MAX_REPLANS=3`）。
//! Gateway 的 endpoint / key / deployment 只从 `AZURE_OAI_ENDPOINT` / `AZURE_OAI_KEY` / `AZURE_OAI_DEPLOYMENT` 读取。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::CommitPolicy;
use crate::llm::{AzureSettings, DEFAULT_API_VERSION};

pub const ENV_ENDPOINT: &str = "AZURE_OAI_ENDPOINT";
pub const ENV_API_KEY: &str = "AZURE_OAI_KEY";
pub const ENV_DEPLOYMENT: &str = "AZURE_OAI_DEPLOYMENT";

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub orchestrator: OrchestratorSection,
    pub tools: ToolsSection,
}

/// [app] 段：工作区、会话日志目录、REPL 默认提交策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 工作区根目录，未设置时用当前目录
    pub workspace_root: Option<PathBuf>,
    /// 会话日志目录（JSONL），未设置时会话只保存在内存中
    pub session_dir: Option<PathBuf>,
    pub persist_sessions: bool,
    /// REPL 单模式默认提交策略
    pub repl_commit_policy: CommitPolicy,
    /// REPL 跨 run 保留的对话轮数
    pub max_context_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            workspace_root: None,
            session_dir: None,
            persist_sessions: true,
            repl_commit_policy: CommitPolicy::Ask,
            max_context_turns: 10,
        }
    }
}

/// [llm] 段：API 版本与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub api_version: String,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
    /// Gateway 额外重试次数（首次调用之外）
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            api_version: DEFAULT_API_VERSION.to_string(),
            request_timeout_secs: 60,
            max_retries: 2,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8_000,
        }
    }
}

impl LlmSection {
    pub fn retry_config(&self) -> crate::llm::RetryConfig {
        crate::llm::RetryConfig {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    /// 从环境变量读取 Gateway 连接参数；endpoint / key / deployment 任一缺失返回 None
    pub fn azure_settings_from_env(&self) -> Option<AzureSettings> {
        let get = |k: &str| std::env::var(k).ok().filter(|v| !v.trim().is_empty());
        Some(AzureSettings {
            endpoint: get(ENV_ENDPOINT)?,
            api_key: get(ENV_API_KEY)?,
            deployment: get(ENV_DEPLOYMENT)?,
            api_version: self.api_version.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        })
    }
}

/// [orchestrator] 段：重试 / 重新规划上限与并行开关
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// 修复循环上限（每个失败调用）
    pub max_tool_retries: u32,
    /// 重新规划上限
    pub max_replans: u32,
    /// MalformedOutput 的纠错重试次数
    pub corrective_retries: u32,
    /// Planner 标记为 independent 的相邻只读步骤并行分派
    pub parallel_independent_steps: bool,
    /// single 模式也启用 Verifier
    pub verify_single: bool,
    /// 单个 Step 内 Executor 最多提出的调用数（不含修复重试）
    pub max_step_calls: u32,
    /// prompt 中保留的最近尝试条数
    pub max_attempts_in_prompt: usize,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_tool_retries: 3,
            max_replans: 2,
            corrective_retries: 1,
            parallel_independent_steps: false,
            verify_single: false,
            max_step_calls: 8,
            max_attempts_in_prompt: 12,
        }
    }
}

/// [tools] 段：工具超时、Shell 白名单、文件大小上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub max_file_size: usize,
    pub shell: ShellSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 120,
            max_file_size: 10 * 1024 * 1024,
            shell: ShellSection::default(),
        }
    }
}

/// [tools.shell] 段：允许执行的命令名（仅首词）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub allowed_commands: Vec<String>,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            allowed_commands: [
                "ls", "cat", "head", "tail", "wc", "grep", "find", "echo", "mkdir", "touch",
                "python3", "python", "pip", "pytest", "bash", "node", "npm", "npx", "cargo",
                "rustc", "go", "make", "g++", "gcc", "git",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 AI_IDE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、.ai-ide/config.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（文件必须存在）
/// 3. 最后叠加环境变量 AI_IDE__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", ".ai-ide/config"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AI_IDE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.orchestrator.max_tool_retries, 3);
        assert_eq!(cfg.orchestrator.max_replans, 2);
        assert_eq!(cfg.orchestrator.corrective_retries, 1);
        assert_eq!(cfg.llm.max_retries, 2);
        assert_eq!(cfg.app.repl_commit_policy, CommitPolicy::Ask);
        assert!(cfg.tools.shell.allowed_commands.contains(&"cargo".to_string()));
    }

    #[test]
    fn test_load_explicit_file_overrides() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cfg.toml");
        std::fs::write(
            &path,
            "[orchestrator]\nmax_replans = 5\n\n[app]\nrepl_commit_policy = \"no-commit\"\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.orchestrator.max_replans, 5);
        assert_eq!(cfg.orchestrator.max_tool_retries, 3);
        assert_eq!(cfg.app.repl_commit_policy, CommitPolicy::NoCommit);
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cfg.toml");
        std::fs::write(&path, "[orchestrator]\nmax_step_calls = 4\n\n[app]\npersist_sessions = true\n").unwrap();
        std::env::set_var("AI_IDE__ORCHESTRATOR__MAX_STEP_CALLS", "6");
        std::env::set_var("AI_IDE__APP__PERSIST_SESSIONS", "false");
        let cfg = load_config(Some(path));
        std::env::remove_var("AI_IDE__ORCHESTRATOR__MAX_STEP_CALLS");
        std::env::remove_var("AI_IDE__APP__PERSIST_SESSIONS");

        let cfg = cfg.unwrap();
        assert_eq!(cfg.orchestrator.max_step_calls, 6);
        assert!(!cfg.app.persist_sessions);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        assert!(load_config(Some(PathBuf::from("/definitely/not/here.toml"))).is_err());
    }
}
