//! Tool contract between the orchestrator and reasoning collaborators.
//!
//! The only tool is `invoke_agent`. Requests and results are closed tagged
//! variants.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use bazaar_core::domain::agent::AgentId;
use bazaar_core::domain::step::StepId;
use bazaar_core::errors::FailureReason;

pub const INVOKE_AGENT_TOOL: &str = "invoke_agent";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error("invalid `{tool}` input: {message}")]
    InvalidInput { tool: &'static str, message: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeAgentCall {
    pub call_id: String,
    pub agent_skill: String,
    pub subtask: String,
    #[serde(default)]
    pub payload: Option<Value>,
    /// When set, a failure of this call stops the remaining calls of the turn.
    #[serde(default)]
    pub hard_dependency: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCallRequest {
    InvokeAgent(InvokeAgentCall),
}

impl ToolCallRequest {
    pub fn invoke_agent(
        call_id: impl Into<String>,
        agent_skill: impl Into<String>,
        subtask: impl Into<String>,
    ) -> Self {
        Self::InvokeAgent(InvokeAgentCall {
            call_id: call_id.into(),
            agent_skill: agent_skill.into(),
            subtask: subtask.into(),
            payload: None,
            hard_dependency: false,
        })
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        let Self::InvokeAgent(call) = &mut self;
        call.payload = Some(payload);
        self
    }

    pub fn as_hard_dependency(mut self) -> Self {
        let Self::InvokeAgent(call) = &mut self;
        call.hard_dependency = true;
        self
    }

    /// Decodes a named tool invocation as emitted by a language model.
    pub fn from_tool_use(name: &str, call_id: &str, input: &Value) -> Result<Self, ToolError> {
        if name != INVOKE_AGENT_TOOL {
            return Err(ToolError::UnknownTool(name.to_string()));
        }
        let invalid = |message: &str| ToolError::InvalidInput {
            tool: INVOKE_AGENT_TOOL,
            message: message.to_string(),
        };

        let object = input.as_object().ok_or_else(|| invalid("input must be an object"))?;
        let agent_skill = object
            .get("agent_skill")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|skill| !skill.is_empty())
            .ok_or_else(|| invalid("`agent_skill` is required"))?;
        let subtask = object.get("subtask").and_then(Value::as_str).unwrap_or_default();
        let payload = match object.get("payload") {
            None | Some(Value::Null) => None,
            Some(value @ Value::Object(_)) => Some(value.clone()),
            Some(_) => return Err(invalid("`payload` must be an object")),
        };
        let hard_dependency =
            object.get("hard_dependency").and_then(Value::as_bool).unwrap_or(false);

        Ok(Self::InvokeAgent(InvokeAgentCall {
            call_id: call_id.to_string(),
            agent_skill: agent_skill.to_string(),
            subtask: subtask.to_string(),
            payload,
            hard_dependency,
        }))
    }

    pub fn call_id(&self) -> &str {
        match self {
            Self::InvokeAgent(call) => &call.call_id,
        }
    }

    /// The tool input as the model originally emitted it.
    pub fn input(&self) -> Value {
        match self {
            Self::InvokeAgent(call) => {
                let mut input = Map::new();
                input.insert("agent_skill".into(), Value::String(call.agent_skill.clone()));
                input.insert("subtask".into(), Value::String(call.subtask.clone()));
                if let Some(payload) = &call.payload {
                    input.insert("payload".into(), payload.clone());
                }
                if call.hard_dependency {
                    input.insert("hard_dependency".into(), Value::Bool(true));
                }
                Value::Object(input)
            }
        }
    }
}

impl InvokeAgentCall {
    /// Body sent to the agent worker: the caller's payload with `task` set to
    /// the sub-task description unless the payload already carries one.
    pub fn worker_payload(&self) -> Value {
        let mut body = match &self.payload {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        body.entry("task").or_insert_with(|| Value::String(self.subtask.clone()));
        Value::Object(body)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolCallResult {
    Completed {
        call_id: String,
        step_id: StepId,
        agent_id: AgentId,
        output: String,
        cost: Decimal,
    },
    Failed {
        call_id: String,
        step_id: Option<StepId>,
        agent_id: Option<AgentId>,
        reason: FailureReason,
        message: String,
    },
}

impl ToolCallResult {
    pub fn call_id(&self) -> &str {
        match self {
            Self::Completed { call_id, .. } | Self::Failed { call_id, .. } => call_id,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::Completed { .. } => None,
            Self::Failed { reason, .. } => Some(*reason),
        }
    }

    /// Text handed back to the reasoning collaborator.
    pub fn content(&self) -> String {
        match self {
            Self::Completed { agent_id, output, cost, .. } => {
                format!("Agent {agent_id} completed successfully.\nResult: {output}\nCost: ${cost}")
            }
            Self::Failed { reason, message, .. } => {
                format!("Error ({}): {} {message}", reason.public_code(), reason.user_message())
            }
        }
    }
}

/// JSON schema advertised for `invoke_agent`.
pub fn invoke_agent_schema() -> Value {
    json!({
        "name": INVOKE_AGENT_TOOL,
        "description": "Delegate a sub-task to the best available marketplace agent offering \
            the given skill. The call is metered and charged against the task budget.",
        "input_schema": {
            "type": "object",
            "properties": {
                "agent_skill": {
                    "type": "string",
                    "description": "Skill tag to match, e.g. summarize, translate, search"
                },
                "subtask": {
                    "type": "string",
                    "description": "What the agent should do"
                },
                "payload": {
                    "type": "object",
                    "description": "Structured input for the agent"
                },
                "hard_dependency": {
                    "type": "boolean",
                    "description": "Stop the remaining calls if this one fails"
                }
            },
            "required": ["agent_skill", "subtask"]
        }
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use bazaar_core::domain::agent::AgentId;
    use bazaar_core::domain::step::StepId;
    use bazaar_core::errors::FailureReason;

    use super::{invoke_agent_schema, ToolCallRequest, ToolCallResult, ToolError};

    #[test]
    fn tool_use_input_decodes_into_request() {
        let request = ToolCallRequest::from_tool_use(
            "invoke_agent",
            "toolu_1",
            &json!({
                "agent_skill": " translate ",
                "subtask": "hello to spanish",
                "payload": {"text": "hello", "target_language": "es"},
                "hard_dependency": true
            }),
        )
        .expect("decode");

        let ToolCallRequest::InvokeAgent(call) = &request;
        assert_eq!(call.agent_skill, "translate");
        assert!(call.hard_dependency);
        assert_eq!(
            call.worker_payload(),
            json!({"text": "hello", "target_language": "es", "task": "hello to spanish"})
        );
        assert_eq!(request.call_id(), "toolu_1");
    }

    #[test]
    fn invalid_tool_use_is_rejected() {
        assert_eq!(
            ToolCallRequest::from_tool_use("search_web", "t", &json!({})),
            Err(ToolError::UnknownTool("search_web".to_string()))
        );
        assert!(matches!(
            ToolCallRequest::from_tool_use("invoke_agent", "t", &json!({"subtask": "x"})),
            Err(ToolError::InvalidInput { .. })
        ));
        assert!(matches!(
            ToolCallRequest::from_tool_use(
                "invoke_agent",
                "t",
                &json!({"agent_skill": "search", "payload": "text"})
            ),
            Err(ToolError::InvalidInput { .. })
        ));
    }

    #[test]
    fn payload_task_is_not_overwritten() {
        let request = ToolCallRequest::invoke_agent("c1", "summarize", "ignored")
            .with_payload(json!({"task": "explicit"}));
        let ToolCallRequest::InvokeAgent(call) = &request;
        assert_eq!(call.worker_payload(), json!({"task": "explicit"}));
    }

    #[test]
    fn failed_results_use_public_vocabulary() {
        let result = ToolCallResult::Failed {
            call_id: "c1".to_string(),
            step_id: Some(StepId("s1".to_string())),
            agent_id: Some(AgentId::new("search")),
            reason: FailureReason::AgentTimeout,
            message: "no response within 30000ms".to_string(),
        };
        assert!(result.is_error());
        assert!(result.content().starts_with("Error (agent_unavailable)"));

        let completed = ToolCallResult::Completed {
            call_id: "c2".to_string(),
            step_id: StepId("s2".to_string()),
            agent_id: AgentId::new("summarizer"),
            output: "short".to_string(),
            cost: Decimal::new(5, 2),
        };
        assert!(completed.content().contains("Cost: $0.05"));
        assert_eq!(invoke_agent_schema()["input_schema"]["required"], json!(["agent_skill", "subtask"]));
    }
}
