//! Orchestrator 构建器：统一的初始化逻辑
//!
//! CLI、REPL 与测试共用同一套组装方式：LLM 外包一层有界重试，工具默认注册全部内置工具，
//! 提交协作者默认为 git，会话按配置决定是否持久化。会话目录位于工作区内时，
//! 快照、回滚与 git 暂存都排除它，跨 run 的背景从会话日志重建。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::agents::{Executor, Planner, Verifier};
use crate::config::AppConfig;
use crate::core::{CommitApprover, FixedApprover, Orchestrator, RecoveryEngine};
use crate::llm::{AzureOpenAiClient, LlmClient, RetryingLlmClient};
use crate::memory::RunCarryover;
use crate::session::{SessionError, SessionStore};
use crate::tools::{builtin_registry, ToolExecutor, ToolRegistry};
use crate::vcs::{CommitCollaborator, GitCommitter};

/// 根据环境变量创建 Azure OpenAI 客户端；缺少 endpoint / key / deployment 时返回 None
pub fn create_llm_from_config(cfg: &AppConfig) -> Option<Arc<dyn LlmClient>> {
    let settings = cfg.llm.azure_settings_from_env()?;
    tracing::info!(deployment = %settings.deployment, "Using Azure OpenAI gateway");
    Some(Arc::new(AzureOpenAiClient::new(settings)))
}

/// 工作目录：命令行 > 配置 > 当前目录
pub fn resolve_workspace(cfg: &AppConfig, cli: Option<PathBuf>) -> PathBuf {
    let workspace = cli
        .or_else(|| cfg.app.workspace_root.clone())
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    workspace.canonicalize().unwrap_or(workspace)
}

/// 会话日志相对工作区的位置；不在工作区内时为空
fn session_excludes(workspace: &Path, session: &SessionStore) -> Vec<PathBuf> {
    let Some((dir, name)) = session.path().and_then(|p| Some((p.parent()?, p.file_name()?))) else {
        return Vec::new();
    };
    let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
    let (Ok(dir), Ok(workspace)) = (dir.canonicalize(), workspace.canonicalize()) else {
        return Vec::new();
    };
    match dir.strip_prefix(&workspace) {
        // 会话目录就是工作区根时只排除日志文件
        Ok(rel) if rel.as_os_str().is_empty() => vec![PathBuf::from(name)],
        Ok(rel) => vec![rel.to_path_buf()],
        Err(_) => Vec::new(),
    }
}

pub struct OrchestratorBuilder {
    config: AppConfig,
    workspace: PathBuf,
    llm: Arc<dyn LlmClient>,
    tools: Option<ToolRegistry>,
    committer: Option<Arc<dyn CommitCollaborator>>,
    approver: Option<Arc<dyn CommitApprover>>,
    session: Option<SessionStore>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig, workspace: impl AsRef<Path>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            config,
            workspace: workspace.as_ref().to_path_buf(),
            llm,
            tools: None,
            committer: None,
            approver: None,
            session: None,
        }
    }

    /// 替换默认的内置工具集
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_committer(mut self, committer: Arc<dyn CommitCollaborator>) -> Self {
        self.committer = Some(committer);
        self
    }

    pub fn with_approver(mut self, approver: Arc<dyn CommitApprover>) -> Self {
        self.approver = Some(approver);
        self
    }

    /// 使用已有会话（例如 SessionStore::resume 恢复的会话），之前的 run 作为背景
    pub fn with_session(mut self, session: SessionStore) -> Self {
        self.session = Some(session);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    fn build_session(&self) -> Result<SessionStore, SessionError> {
        match (&self.config.app.session_dir, self.config.app.persist_sessions) {
            (Some(dir), true) => {
                let store = SessionStore::persistent(dir)?;
                tracing::info!(session_id = %store.session_id(), dir = %dir.display(), "persisting session");
                Ok(store)
            }
            _ => Ok(SessionStore::in_memory()),
        }
    }

    pub fn build(mut self) -> Result<Orchestrator, SessionError> {
        let session = match self.session.take() {
            Some(s) => s,
            None => self.build_session()?,
        };
        let cfg = &self.config;
        let excludes = session_excludes(&self.workspace, &session);
        if !excludes.is_empty() {
            tracing::debug!(excludes = ?excludes, "session log excluded from snapshots and commits");
        }
        let carryover = RunCarryover::from_session(&session, cfg.app.max_context_turns);
        let recovery = RecoveryEngine::from_config(&cfg.orchestrator);
        let llm: Arc<dyn LlmClient> = Arc::new(RetryingLlmClient::new(self.llm.clone(), cfg.llm.retry_config()));

        let tools = self
            .tools
            .take()
            .unwrap_or_else(|| builtin_registry(&self.workspace, &cfg.tools));
        tracing::info!(tools = ?tools.tool_names(), "tool registry ready");
        let executor = Arc::new(ToolExecutor::new(tools, cfg.tools.tool_timeout_secs));

        let committer = self
            .committer
            .take()
            .unwrap_or_else(|| Arc::new(GitCommitter::new(&self.workspace).with_excludes(excludes.clone())));
        let approver = self
            .approver
            .take()
            .unwrap_or_else(|| Arc::new(FixedApprover(false)));

        Ok(Orchestrator::from_parts(
            Planner::new(llm.clone(), recovery),
            Executor::new(llm.clone(), recovery),
            Verifier::new(llm, recovery),
            executor,
            committer,
            approver,
            session,
            carryover,
            self.workspace.clone(),
            excludes,
            cfg.orchestrator.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[test]
    fn test_resolve_workspace_prefers_cli() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.app.workspace_root = Some(PathBuf::from("/nonexistent/config/root"));
        let ws = resolve_workspace(&cfg, Some(dir.path().to_path_buf()));
        assert_eq!(ws, dir.path().canonicalize().unwrap());
        assert_eq!(
            resolve_workspace(&cfg, None),
            PathBuf::from("/nonexistent/config/root")
        );
    }

    #[test]
    fn test_build_persistent_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.app.session_dir = Some(dir.path().join("sessions"));
        let orch = OrchestratorBuilder::new(cfg, dir.path(), Arc::new(MockLlmClient))
            .build()
            .unwrap();
        let session = orch.session();
        let path = session.try_lock().unwrap().path().map(|p| p.to_path_buf());
        assert!(path.unwrap().starts_with(dir.path().join("sessions")));
    }

    #[test]
    fn test_session_excludes_inside_workspace_only() {
        let ws = tempfile::tempdir().unwrap();
        let inside = SessionStore::persistent(&ws.path().join(".ai-ide/sessions")).unwrap();
        assert_eq!(session_excludes(ws.path(), &inside), vec![PathBuf::from(".ai-ide/sessions")]);

        let at_root = SessionStore::persistent(ws.path()).unwrap();
        let name = PathBuf::from(format!("{}.jsonl", at_root.session_id()));
        assert_eq!(session_excludes(ws.path(), &at_root), vec![name]);

        let elsewhere = tempfile::tempdir().unwrap();
        let outside = SessionStore::persistent(elsewhere.path()).unwrap();
        assert!(session_excludes(ws.path(), &outside).is_empty());
        assert!(session_excludes(ws.path(), &SessionStore::in_memory()).is_empty());
    }
}
