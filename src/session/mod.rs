//! 会话层：只追加的事件日志、JSONL 持久化与恢复

pub mod store;

pub use store::{SessionEntry, SessionError, SessionEvent, SessionStore};
