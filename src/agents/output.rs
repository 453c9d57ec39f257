//! 角色输出：带 "type" 标签的 JSON 变体，在边界处解析并校验
//!
//! 模型回复可能包裹在 ```json 代码块中或夹杂说明文字，extract_json 取代码块内容或首个 `{` 到最后一个 `}`。
//! 解析失败即 MalformedOutput；之后系统内部只流转已校验的类型。

use std::collections::HashSet;

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

use crate::core::{Plan, ProposedCall, Step, StepId};

/// Plan 中的单个调用（线格式）
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct WireCall {
    /// 工具名，必须是已注册工具
    pub tool: String,
    /// 工具参数对象
    #[serde(default)]
    pub args: Value,
}

/// Plan 中的单个步骤（线格式）
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct WireStep {
    /// 步骤 id，省略时按顺序补为 s1, s2, ...
    #[serde(default)]
    pub id: String,
    pub intent: String,
    #[serde(default)]
    pub tool_calls: Vec<WireCall>,
    /// 与相邻步骤无依赖
    #[serde(default)]
    pub independent: bool,
}

/// 角色输出的全部合法形态
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentOutput {
    Plan {
        steps: Vec<WireStep>,
        #[serde(default)]
        rationale: Option<String>,
    },
    ToolCall {
        tool: String,
        #[serde(default)]
        args: Value,
    },
    FinalAnswer {
        text: String,
    },
    Verdict {
        pass: bool,
        #[serde(default)]
        rationale: String,
    },
}

impl AgentOutput {
    pub fn type_name(&self) -> &'static str {
        match self {
            AgentOutput::Plan { .. } => "plan",
            AgentOutput::ToolCall { .. } => "tool_call",
            AgentOutput::FinalAnswer { .. } => "final_answer",
            AgentOutput::Verdict { .. } => "verdict",
        }
    }
}

/// 输出格式的 JSON Schema，拼入 system prompt
pub fn agent_output_schema_json() -> String {
    let schema = schema_for!(AgentOutput);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 取出回复中的 JSON 文本
pub fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 解析为 AgentOutput；Err 为给模型看的纠错说明
pub fn parse_agent_output(output: &str) -> Result<AgentOutput, String> {
    let json = extract_json(output).ok_or_else(|| "no JSON object found in output".to_string())?;
    serde_json::from_str::<AgentOutput>(json).map_err(|e| format!("invalid output JSON: {e}"))
}

fn normalize_args(args: Value) -> Result<Value, String> {
    match args {
        Value::Null => Ok(Value::Object(serde_json::Map::new())),
        Value::Object(_) => Ok(args),
        other => Err(format!("tool args must be a JSON object, got {other}")),
    }
}

/// 校验 tool_call 并转换为 ProposedCall
pub fn validate_call(tool: String, args: Value) -> Result<ProposedCall, String> {
    if tool.trim().is_empty() {
        return Err("tool name must not be empty".to_string());
    }
    Ok(ProposedCall::new(tool.trim(), normalize_args(args)?))
}

/// 校验计划：至少一个步骤、id 唯一、intent 与工具名非空、args 为对象
pub fn validate_plan(
    steps: Vec<WireStep>,
    rationale: Option<String>,
    revision: u32,
) -> Result<Plan, String> {
    if steps.is_empty() {
        return Err("plan must contain at least one step".to_string());
    }
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(steps.len());
    for (i, step) in steps.into_iter().enumerate() {
        let id = if step.id.trim().is_empty() {
            format!("s{}", i + 1)
        } else {
            step.id.trim().to_string()
        };
        if !seen.insert(id.clone()) {
            return Err(format!("duplicate step id: {id}"));
        }
        if step.intent.trim().is_empty() {
            return Err(format!("step {id} has an empty intent"));
        }
        let calls = step
            .tool_calls
            .into_iter()
            .map(|c| validate_call(c.tool, c.args))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("step {id}: {e}"))?;
        out.push(Step {
            id: StepId(id),
            intent: step.intent.trim().to_string(),
            tool_calls: calls,
            independent: step.independent,
        });
    }
    Ok(Plan {
        revision,
        steps: out,
        rationale,
    })
}
