//! 跨 run 的背景：同一会话中已结束的 run（目标 + 结论）
//!
//! 只保留最近 max_runs 次；渲染为一问一答两条消息拼在角色请求之前。
//! `--resume` 时从会话日志重建，因此恢复后的会话与中断前看到相同的背景。

use std::collections::VecDeque;

use crate::core::RunStatus;
use crate::llm::Message;
use crate::session::{SessionEvent, SessionStore};

/// 一次已结束的 run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorRun {
    pub goal: String,
    pub status: RunStatus,
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct RunCarryover {
    runs: VecDeque<PriorRun>,
    max_runs: usize,
}

impl RunCarryover {
    pub fn new(max_runs: usize) -> Self {
        Self {
            runs: VecDeque::new(),
            max_runs,
        }
    }

    /// 按日志顺序收集已结束的 run；没有 RunFinished 的 run 不计入
    pub fn from_session(store: &SessionStore, max_runs: usize) -> Self {
        let mut carryover = Self::new(max_runs);
        let mut started: Vec<(String, String)> = Vec::new();
        for entry in store.history() {
            match &entry.event {
                SessionEvent::RunStarted { run_id, goal, .. } => started.push((run_id.clone(), goal.clone())),
                SessionEvent::RunFinished {
                    run_id,
                    status,
                    diagnostic,
                } => {
                    if let Some(pos) = started.iter().position(|(id, _)| id == run_id) {
                        let (_, goal) = started.remove(pos);
                        carryover.record(PriorRun {
                            goal,
                            status: *status,
                            summary: diagnostic.clone(),
                        });
                    }
                }
                _ => {}
            }
        }
        carryover
    }

    pub fn record(&mut self, run: PriorRun) {
        self.runs.push_back(run);
        while self.runs.len() > self.max_runs {
            self.runs.pop_front();
        }
    }

    pub fn runs(&self) -> impl Iterator<Item = &PriorRun> {
        self.runs.iter()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn to_messages(&self) -> Vec<Message> {
        self.runs
            .iter()
            .flat_map(|run| {
                let status = match run.status {
                    RunStatus::Succeeded => "succeeded",
                    RunStatus::Failed => "failed",
                };
                [
                    Message::user(run.goal.clone()),
                    Message::assistant(format!("[{status}] {}", run.summary)),
                ]
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CommitPolicy, RunMode};

    fn prior(goal: &str) -> PriorRun {
        PriorRun {
            goal: goal.into(),
            status: RunStatus::Succeeded,
            summary: "done".into(),
        }
    }

    #[test]
    fn test_keeps_latest_runs() {
        let mut c = RunCarryover::new(2);
        c.record(prior("a"));
        c.record(prior("b"));
        c.record(prior("c"));
        let goals: Vec<&str> = c.runs().map(|r| r.goal.as_str()).collect();
        assert_eq!(goals, vec!["b", "c"]);
        let messages = c.to_messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], Message::user("b"));
        assert_eq!(messages[1], Message::assistant("[succeeded] done"));
    }

    #[test]
    fn test_from_session_skips_unfinished_runs() {
        let mut store = SessionStore::in_memory();
        let start = |id: &str, goal: &str| SessionEvent::RunStarted {
            run_id: id.into(),
            goal: goal.into(),
            mode: RunMode::Single,
            commit_policy: CommitPolicy::NoCommit,
        };
        store.append(start("r1", "add tests")).unwrap();
        store
            .append(SessionEvent::RunFinished {
                run_id: "r1".into(),
                status: RunStatus::Failed,
                diagnostic: "step s1 failed".into(),
            })
            .unwrap();
        store.append(start("r2", "still running")).unwrap();

        let c = RunCarryover::from_session(&store, 10);
        assert_eq!(c.len(), 1);
        assert_eq!(
            c.runs().next(),
            Some(&PriorRun {
                goal: "add tests".into(),
                status: RunStatus::Failed,
                summary: "step s1 failed".into(),
            })
        );
        assert_eq!(c.to_messages()[1].content, "[failed] step s1 failed");
        assert!(RunCarryover::from_session(&SessionStore::in_memory(), 10).is_empty());
    }
}
