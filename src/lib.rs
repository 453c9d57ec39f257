//! ai-ide：终端优先的 AI 编程助手
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 数据模型、编排器、恢复策略、执行状态、Checkpoint 与回滚、退出码
//! - **agents**: Planner / Executor / Verifier 角色与结构化输出
//! - **llm**: 对话消息、LLM Gateway 抽象、有界重试、Azure OpenAI 与 Mock 实现
//! - **tools**: 工具注册表、执行器与内置工具（文件、shell、代码运行、搜索）
//! - **session**: 只追加的会话事件日志与恢复
//! - **vcs**: 提交协作者（git）
//! - **memory**: 跨 run 的背景与单次 run 的工作记忆
//! - **repl**: 交互式命令行
//! - **observability**: 日志初始化

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod repl;
pub mod session;
pub mod tools;
pub mod vcs;

pub use crate::core::{Orchestrator, OrchestratorBuilder, RunOutcome};
