//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / side_effecting / execute），
//! ToolRegistry 按名注册，invoke 前用 jsonschema 校验参数；失败统一为 ToolError。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::{validator_for, Validator};
use serde_json::Value;
use thiserror::Error;

use crate::core::ToolFailureKind;

/// 工具调用失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("{tool} failed: {cause}")]
    ToolExecutionError { tool: String, cause: String },

    #[error("{0} timed out")]
    Timeout(String),
}

impl ToolError {
    pub fn kind(&self) -> ToolFailureKind {
        match self {
            ToolError::UnknownTool(_) => ToolFailureKind::UnknownTool,
            ToolError::InvalidArguments { .. } => ToolFailureKind::InvalidArguments,
            ToolError::ToolExecutionError { .. } => ToolFailureKind::Execution,
            ToolError::Timeout(_) => ToolFailureKind::Timeout,
        }
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、是否改动工作区、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认不限制
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 写文件、执行 shell、提交等会改动工作区的工具返回 true，Orchestrator 据此取 checkpoint
    fn side_effecting(&self) -> bool {
        false
    }

    async fn execute(&self, args: Value) -> Result<String, String>;
}

struct Registered {
    tool: Arc<dyn Tool>,
    validator: Option<Validator>,
}

/// 供 prompt 使用的工具目录条目
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub side_effecting: bool,
}

/// 工具注册表：按名称有序存储，保证 prompt 中的工具目录稳定
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Registered>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同名工具后注册者覆盖前者
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let validator = match validator_for(&tool.parameters_schema()) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "invalid parameters schema, argument validation disabled");
                None
            }
        };
        self.tools.insert(name, Registered { tool, validator });
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|r| r.tool.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// 工具是否有副作用；未注册返回 None
    pub fn is_side_effecting(&self, name: &str) -> Option<bool> {
        self.tools.get(name).map(|r| r.tool.side_effecting())
    }

    /// 只校验参数，不执行
    pub fn validate(&self, name: &str, args: &Value) -> Result<(), ToolError> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        if let Some(validator) = &entry.validator {
            if !validator.is_valid(args) {
                let reason = validator
                    .iter_errors(args)
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(ToolError::InvalidArguments {
                    tool: name.to_string(),
                    reason,
                });
            }
        }
        Ok(())
    }

    /// 校验并执行：未注册 -> UnknownTool，schema 不符 -> InvalidArguments，执行失败 -> ToolExecutionError
    pub async fn invoke(&self, name: &str, args: Value) -> Result<String, ToolError> {
        self.validate(name, &args)?;
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.execute(args)
            .await
            .map_err(|cause| ToolError::ToolExecutionError {
                tool: name.to_string(),
                cause,
            })
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|(name, r)| ToolDescriptor {
                name: name.clone(),
                description: r.tool.description().to_string(),
                parameters: r.tool.parameters_schema(),
                side_effecting: r.tool.side_effecting(),
            })
            .collect()
    }

    /// 工具目录 JSON（拼入角色 prompt）
    pub fn to_schema_json(&self) -> String {
        serde_json::to_string_pretty(&self.descriptors()).unwrap_or_else(|_| "[]".to_string())
    }
}
