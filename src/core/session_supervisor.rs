//! 会话监管：run 生命周期与中断
//!
//! 持有会话级 CancellationToken；每次 run 取一个子 token，Ctrl+C 只取消当前 run，REPL 本身继续。

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct SessionSupervisor {
    /// 退出 REPL 时触发，所有 run 随之取消
    cancel_token: CancellationToken,
    /// 当前 run 的子 token
    current: Mutex<Option<CancellationToken>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            current: Mutex::new(None),
        }
    }

    /// 为新 run 创建子 token
    pub fn begin_run(&self) -> CancellationToken {
        let token = self.cancel_token.child_token();
        if let Ok(mut current) = self.current.lock() {
            *current = Some(token.clone());
        }
        token
    }

    pub fn end_run(&self) {
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
    }

    /// 取消当前 run（用户 Ctrl+C）；没有进行中的 run 时返回 false
    pub fn cancel_run(&self) -> bool {
        match self.current.lock().ok().and_then(|c| c.clone()) {
            Some(token) => {
                tracing::warn!("cancelling current run");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// 取消整个会话
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_run_only_affects_current() {
        let sup = SessionSupervisor::new();
        assert!(!sup.cancel_run());
        let first = sup.begin_run();
        assert!(sup.cancel_run());
        assert!(first.is_cancelled());
        sup.end_run();

        let second = sup.begin_run();
        assert!(!second.is_cancelled());
        sup.cancel();
        assert!(second.is_cancelled());
    }
}
