//! Checkpoint 与回滚
//!
//! 一次 run 只有最早的 Checkpoint 保存工作区快照（根目录下的普通文件，跳过版本库、构建产物、
//! 依赖目录与调用方排除的路径）；之后的 Checkpoint 只记录 ExecutionState 作为标记。
//! 回滚把快照中的文件逐字节写回，删除快照之后新建的文件与空目录，结果写入 RollbackReport。

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::core::{ExecutionState, RollbackError, StepId};

/// 任意层级下都不进入快照的目录名
const SKIP_DIRS: &[&str] = &[".git", ".ai-ide", "target", "node_modules", ".venv", "__pycache__"];

fn is_skipped(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|n| SKIP_DIRS.contains(&n))
            .unwrap_or(false)
}

/// 工作区树的内存快照（相对路径 -> 内容）
#[derive(Debug, Clone, Default)]
pub struct WorkspaceSnapshot {
    root: PathBuf,
    /// 相对 root 的排除前缀，快照与回滚使用同一组
    excludes: Vec<PathBuf>,
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
}

/// 遍历工作区，返回 (文件, 目录) 的相对路径
fn walk(root: &Path, excludes: &[PathBuf]) -> Result<(Vec<PathBuf>, Vec<PathBuf>), walkdir::Error> {
    let excluded = |entry: &walkdir::DirEntry| {
        entry
            .path()
            .strip_prefix(root)
            .map(|rel| excludes.iter().any(|x| rel.starts_with(x)))
            .unwrap_or(false)
    };
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_skipped(e) && !excluded(e))
    {
        let entry = entry?;
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        if entry.file_type().is_dir() {
            dirs.push(rel.to_path_buf());
        } else if entry.file_type().is_file() {
            files.push(rel.to_path_buf());
        }
    }
    Ok((files, dirs))
}

impl WorkspaceSnapshot {
    pub fn capture(root: &Path) -> Result<Self, RollbackError> {
        Self::capture_excluding(root, &[])
    }

    /// excludes 为相对 root 的路径前缀（例如位于工作区内的会话目录）；空路径被忽略
    pub fn capture_excluding(root: &Path, excludes: &[PathBuf]) -> Result<Self, RollbackError> {
        let excludes: Vec<PathBuf> = excludes
            .iter()
            .filter(|x| !x.as_os_str().is_empty())
            .cloned()
            .collect();
        let (files, dirs) = walk(root, &excludes).map_err(|e| RollbackError::Capture(e.to_string()))?;
        let mut contents = BTreeMap::new();
        for rel in files {
            let bytes = std::fs::read(root.join(&rel))
                .map_err(|e| RollbackError::Capture(format!("{}: {}", rel.display(), e)))?;
            contents.insert(rel, bytes);
        }
        Ok(Self {
            root: root.to_path_buf(),
            excludes,
            files: contents,
            dirs: dirs.into_iter().collect(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn contains(&self, rel: &Path) -> bool {
        self.files.contains_key(rel)
    }

    /// 恢复到快照状态；遇到第一个错误即停止，已完成的部分仍记录在报告中
    pub fn restore(&self) -> RollbackReport {
        let mut report = RollbackReport {
            attempted: true,
            ..RollbackReport::default()
        };
        if let Err(e) = self.restore_into(&mut report) {
            tracing::error!(error = %e, "rollback failed");
            report.error = Some(e);
        }
        report
    }

    fn restore_into(&self, report: &mut RollbackReport) -> Result<(), RollbackError> {
        let (current_files, current_dirs) =
            walk(&self.root, &self.excludes).map_err(|e| RollbackError::Capture(e.to_string()))?;

        for rel in current_files.iter().filter(|p| !self.files.contains_key(*p)) {
            let path = self.root.join(rel);
            std::fs::remove_file(&path).map_err(|e| RollbackError::Remove {
                path: path.clone(),
                message: e.to_string(),
            })?;
            report.removed.push(rel.clone());
        }

        for (rel, bytes) in &self.files {
            let path = self.root.join(rel);
            if std::fs::read(&path).ok().as_deref() == Some(bytes.as_slice()) {
                continue;
            }
            let restore = |path: &Path| -> std::io::Result<()> {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, bytes)
            };
            restore(&path).map_err(|e| RollbackError::Restore {
                path: path.clone(),
                message: e.to_string(),
            })?;
            report.restored.push(rel.clone());
        }

        // 最深的目录先删；非空说明含有快照中的内容，保留
        let mut created: Vec<&PathBuf> = current_dirs.iter().filter(|d| !self.dirs.contains(*d)).collect();
        created.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
        for rel in created {
            let path = self.root.join(rel);
            let empty = std::fs::read_dir(&path)
                .map(|mut it| it.next().is_none())
                .unwrap_or(false);
            if empty {
                std::fs::remove_dir(&path).map_err(|e| RollbackError::Remove {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
                report.removed.push(rel.clone());
            }
        }
        Ok(())
    }
}

/// 回滚结果；attempted=false 表示无需回滚
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub attempted: bool,
    pub restored: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub error: Option<RollbackError>,
}

impl RollbackReport {
    pub fn succeeded(&self) -> bool {
        self.attempted && self.error.is_none()
    }
}

/// 有副作用调用之前的恢复点；只有 run 内第一个 Checkpoint 持有快照
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub id: u32,
    /// multi / e2e 模式下所属的 Step；single 模式为 None
    pub step_id: Option<StepId>,
    pub state: ExecutionState,
    pub taken_at: DateTime<Utc>,
    snapshot: Option<WorkspaceSnapshot>,
}

impl Checkpoint {
    pub fn new(id: u32, step_id: Option<StepId>, state: ExecutionState, snapshot: WorkspaceSnapshot) -> Self {
        Self {
            id,
            step_id,
            state,
            taken_at: Utc::now(),
            snapshot: Some(snapshot),
        }
    }

    /// 不带快照的标记：回滚总是回到最早的快照，后续 Checkpoint 无需再复制工作区
    pub fn marker(id: u32, step_id: Option<StepId>, state: ExecutionState) -> Self {
        Self {
            id,
            step_id,
            state,
            taken_at: Utc::now(),
            snapshot: None,
        }
    }

    pub fn snapshot(&self) -> Option<&WorkspaceSnapshot> {
        self.snapshot.as_ref()
    }

    /// 标记型 Checkpoint 返回 None
    pub fn rollback(&self) -> Option<RollbackReport> {
        let snapshot = self.snapshot.as_ref()?;
        tracing::info!(checkpoint = self.id, files = snapshot.file_count(), "rolling back workspace");
        Some(snapshot.restore())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        WorkspaceSnapshot::capture(root).unwrap().files
    }

    #[test]
    fn test_round_trip_restores_pre_state() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("a.txt"), "original").unwrap();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/lib.py"), "def f(): pass\n").unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join(".git/HEAD"), "ref").unwrap();

        let before = tree(root);
        let snap = WorkspaceSnapshot::capture(root).unwrap();
        assert!(!snap.contains(Path::new(".git/HEAD")));

        std::fs::write(root.join("a.txt"), "changed").unwrap();
        std::fs::remove_file(root.join("src/lib.py")).unwrap();
        std::fs::create_dir_all(root.join("new/deep")).unwrap();
        std::fs::write(root.join("new/deep/x.py"), "x").unwrap();
        std::fs::write(root.join(".git/HEAD"), "moved").unwrap();

        let report = snap.restore();
        assert!(report.succeeded(), "{report:?}");
        assert_eq!(tree(root), before);
        assert!(!root.join("new").exists());
        assert!(report.restored.contains(&PathBuf::from("a.txt")));
        assert!(report.removed.contains(&PathBuf::from("new/deep/x.py")));
        // .git 不参与快照与回滚
        assert_eq!(std::fs::read_to_string(root.join(".git/HEAD")).unwrap(), "moved");
    }

    #[test]
    fn test_restore_unchanged_tree_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "same").unwrap();
        let snap = WorkspaceSnapshot::capture(dir.path()).unwrap();
        let report = snap.restore();
        assert!(report.succeeded());
        assert!(report.restored.is_empty());
        assert!(report.removed.is_empty());
    }

    #[test]
    fn test_excluded_paths_survive_restore() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("a.txt"), "original").unwrap();
        std::fs::create_dir_all(root.join("logs/sessions")).unwrap();
        std::fs::write(root.join("logs/sessions/s.jsonl"), "{\"seq\":1}\n").unwrap();
        std::fs::create_dir_all(root.join("target/debug")).unwrap();
        std::fs::write(root.join("target/debug/app"), "bin").unwrap();

        let snap = WorkspaceSnapshot::capture_excluding(root, &[PathBuf::from("logs/sessions")]).unwrap();
        assert!(snap.contains(Path::new("a.txt")));
        assert!(!snap.contains(Path::new("logs/sessions/s.jsonl")));
        assert!(!snap.contains(Path::new("target/debug/app")));

        std::fs::write(root.join("a.txt"), "changed").unwrap();
        std::fs::write(root.join("logs/sessions/s.jsonl"), "{\"seq\":1}\n{\"seq\":2}\n").unwrap();
        std::fs::write(root.join("logs/sessions/other.jsonl"), "x").unwrap();
        std::fs::write(root.join("target/debug/app"), "rebuilt").unwrap();

        let report = snap.restore();
        assert!(report.succeeded(), "{report:?}");
        assert_eq!(report.restored, vec![PathBuf::from("a.txt")]);
        assert!(report.removed.is_empty());
        assert_eq!(
            std::fs::read_to_string(root.join("logs/sessions/s.jsonl")).unwrap(),
            "{\"seq\":1}\n{\"seq\":2}\n"
        );
        assert!(root.join("logs/sessions/other.jsonl").exists());
        assert_eq!(std::fs::read_to_string(root.join("target/debug/app")).unwrap(), "rebuilt");
    }

    #[test]
    fn test_marker_checkpoint_holds_no_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "v1").unwrap();
        let state = ExecutionState::new("r1");
        let first = Checkpoint::new(1, None, state.clone(), WorkspaceSnapshot::capture(dir.path()).unwrap());
        let later = Checkpoint::marker(2, Some(StepId("s2".into())), state);
        assert_eq!(first.snapshot().map(|s| s.file_count()), Some(1));
        assert!(later.snapshot().is_none());
        assert!(later.rollback().is_none());

        std::fs::write(dir.path().join("a.txt"), "v2").unwrap();
        assert!(first.rollback().unwrap().succeeded());
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "v1");
    }
}
