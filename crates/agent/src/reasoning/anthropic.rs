//! Anthropic Messages API client exposing the `invoke_agent` tool.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use bazaar_core::config::ReasoningConfig;
use bazaar_core::domain::turn::MessageRole;

use super::{ReasoningCollaborator, ReasoningError, ReasoningRequest, ReasoningResponse};
use crate::tools::{invoke_agent_schema, ToolCallRequest};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicReasoner {
    client: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicReasoner {
    pub fn from_config(config: &ReasoningConfig) -> Result<Self, ReasoningError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            ReasoningError::Configuration("reasoning.api_key is not set".to_string())
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| ReasoningError::Configuration(error.to_string()))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    fn request_body(&self, request: &ReasoningRequest) -> Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": request.system_context,
            "tools": [invoke_agent_schema()],
            "messages": build_messages(request),
        })
    }
}

#[async_trait]
impl ReasoningCollaborator for AnthropicReasoner {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn respond(
        &self,
        request: &ReasoningRequest,
    ) -> Result<ReasoningResponse, ReasoningError> {
        let url = format!("{}/v1/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|error| ReasoningError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ReasoningError::Api { status: status.as_u16(), message });
        }

        let body: MessagesResponse =
            response.json().await.map_err(|error| ReasoningError::Decode(error.to_string()))?;
        debug!(
            event_name = "reasoning.anthropic.responded",
            stop_reason = body.stop_reason.as_deref().unwrap_or("unknown"),
            block_count = body.content.len(),
            "reasoning response received"
        );
        parse_response(body)
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

fn parse_response(body: MessagesResponse) -> Result<ReasoningResponse, ReasoningError> {
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in body.content {
        match block {
            ContentBlock::Text { text } => texts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCallRequest::from_tool_use(&name, &id, &input)?);
            }
            ContentBlock::Other => {}
        }
    }

    let text = texts.join("\n").trim().to_string();
    // A text-only reply that ends in a question is waiting on the user.
    let awaiting_input = tool_calls.is_empty() && text.ends_with('?');
    Ok(ReasoningResponse { text, tool_calls, awaiting_input })
}

fn build_messages(request: &ReasoningRequest) -> Vec<Value> {
    let mut messages: Vec<Value> = request
        .history
        .iter()
        .map(|message| {
            let role = match message.role {
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
            };
            json!({ "role": role, "content": message.content })
        })
        .collect();
    messages.push(json!({ "role": "user", "content": request.utterance }));

    for exchange in &request.exchanges {
        let mut assistant_blocks = Vec::new();
        if !exchange.assistant_text.is_empty() {
            assistant_blocks.push(json!({ "type": "text", "text": exchange.assistant_text }));
        }
        for call in &exchange.calls {
            assistant_blocks.push(json!({
                "type": "tool_use",
                "id": call.call_id(),
                "name": crate::tools::INVOKE_AGENT_TOOL,
                "input": call.input(),
            }));
        }
        messages.push(json!({ "role": "assistant", "content": assistant_blocks }));

        let results: Vec<Value> = exchange
            .results
            .iter()
            .map(|result| {
                json!({
                    "type": "tool_result",
                    "tool_use_id": result.call_id(),
                    "content": result.content(),
                    "is_error": result.is_error(),
                })
            })
            .collect();
        messages.push(json!({ "role": "user", "content": results }));
    }

    messages
}
