//! 版本控制提交协作者
//!
//! Orchestrator 只在最终化阶段按提交策略调用 commit；提交被视为原子且不可补偿的外部操作。
//! GitCommitter 通过 git 子进程执行 add + commit 并返回新 HEAD；RecordingCommitter 只记录调用（离线模式与测试）。

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitId(pub String);

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    #[error("nothing to commit")]
    NothingToCommit,

    #[error("git {step} failed: {stderr}")]
    Git { step: String, stderr: String },

    #[error("failed to spawn git: {0}")]
    Spawn(String),
}

#[async_trait]
pub trait CommitCollaborator: Send + Sync {
    async fn commit(&self, message: &str) -> Result<CommitId, CommitError>;
}

/// git 子进程实现：在 project_root 下 add -A 后 commit
pub struct GitCommitter {
    project_root: PathBuf,
    /// 不暂存的相对路径（例如位于工作区内的会话目录）
    excludes: Vec<PathBuf>,
}

impl GitCommitter {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
            excludes: Vec::new(),
        }
    }

    pub fn with_excludes(mut self, excludes: Vec<PathBuf>) -> Self {
        self.excludes = excludes.into_iter().filter(|x| !x.as_os_str().is_empty()).collect();
        self
    }

    fn add_args(&self) -> Vec<String> {
        let mut args = vec!["add".to_string(), "-A".to_string()];
        if !self.excludes.is_empty() {
            args.push("--".to_string());
            args.push(".".to_string());
            for x in &self.excludes {
                args.push(format!(":(exclude){}", x.display()));
            }
        }
        args
    }

    async fn git(&self, step: &str, args: &[&str]) -> Result<String, CommitError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.project_root)
            .output()
            .await
            .map_err(|e| CommitError::Spawn(e.to_string()))?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            return Ok(stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if stdout.contains("nothing to commit") || stderr.contains("nothing to commit") {
            return Err(CommitError::NothingToCommit);
        }
        Err(CommitError::Git {
            step: step.to_string(),
            stderr: stderr.trim().to_string(),
        })
    }
}

#[async_trait]
impl CommitCollaborator for GitCommitter {
    async fn commit(&self, message: &str) -> Result<CommitId, CommitError> {
        let add = self.add_args();
        self.git("add", &add.iter().map(String::as_str).collect::<Vec<_>>()).await?;
        self.git("commit", &["commit", "-m", message]).await?;
        let head = self.git("rev-parse", &["rev-parse", "HEAD"]).await?;
        let id = CommitId(head.trim().to_string());
        tracing::info!(commit = %id, "committed changes");
        Ok(id)
    }
}

/// 只记录提交消息的协作者
#[derive(Debug, Default)]
pub struct RecordingCommitter {
    messages: Mutex<Vec<String>>,
    fail_with: Option<CommitError>,
}

impl RecordingCommitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次 commit 都返回给定错误（仍会记录调用）
    pub fn failing(err: CommitError) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail_with: Some(err),
        }
    }

    pub fn invocations(&self) -> usize {
        self.messages.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CommitCollaborator for RecordingCommitter {
    async fn commit(&self, message: &str) -> Result<CommitId, CommitError> {
        let n = match self.messages.lock() {
            Ok(mut m) => {
                m.push(message.to_string());
                m.len()
            }
            Err(_) => 0,
        };
        match &self.fail_with {
            Some(e) => Err(e.clone()),
            None => Ok(CommitId(format!("recorded-{n}"))),
        }
    }
}
