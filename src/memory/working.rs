//! 中期记忆：单次 run 内的目标、已尝试的工具调用与失败原因
//!
//! 由 Orchestrator 维护，拼入各角色的 prompt（Current Goal / What has been tried / Failures），
//! 修复循环与重新规划依赖 Failures 段落把失败上下文带给模型。

#[derive(Clone, Debug, Default)]
pub struct WorkingMemory {
    pub goal: Option<String>,
    pub attempts: Vec<String>,
    pub failures: Vec<String>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_goal(&mut self, goal: impl Into<String>) {
        self.goal = Some(goal.into());
    }

    pub fn add_attempt(&mut self, attempt: impl Into<String>) {
        self.attempts.push(attempt.into());
    }

    pub fn add_failure(&mut self, failure: impl Into<String>) {
        self.failures.push(failure.into());
    }

    /// 构建 prompt 片段；attempts 仅保留最近 `max_attempts` 条，避免上下文无限增长
    pub fn to_prompt_section(&self, max_attempts: usize) -> String {
        let mut s = String::new();
        if let Some(goal) = &self.goal {
            s.push_str(&format!("## Current Goal\n{}\n\n", goal));
        }
        if !self.attempts.is_empty() {
            s.push_str("## What has been tried\n");
            let skip = self.attempts.len().saturating_sub(max_attempts);
            for a in self.attempts.iter().skip(skip) {
                s.push_str(&format!("- {}\n", a));
            }
            s.push('\n');
        }
        if !self.failures.is_empty() {
            s.push_str("## Failures\n");
            for f in &self.failures {
                s.push_str(&format!("- {}\n", f));
            }
            s.push('\n');
        }
        s
    }
}
