//! Reasoning collaborators
//!
//! A collaborator turns conversation history, the new utterance and the tool
//! exchanges of the current turn into text plus zero or more tool calls.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use thiserror::Error;

use bazaar_core::config::{ReasoningConfig, ReasoningProvider};
use bazaar_core::domain::turn::ConversationMessage;

use crate::tools::{ToolCallRequest, ToolCallResult, ToolError};

pub mod anthropic;
pub mod keyword;

pub use anthropic::AnthropicReasoner;
pub use keyword::KeywordReasoner;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReasoningError {
    #[error("reasoning transport failure: {0}")]
    Transport(String),
    #[error("reasoning api returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("undecodable reasoning response: {0}")]
    Decode(String),
    /// A well-formed reply carrying a tool call the marketplace cannot run.
    #[error("malformed tool call: {0}")]
    Protocol(#[from] ToolError),
    #[error("reasoning configuration error: {0}")]
    Configuration(String),
}

/// One round of tool use within the current turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolExchange {
    pub assistant_text: String,
    pub calls: Vec<ToolCallRequest>,
    pub results: Vec<ToolCallResult>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReasoningRequest {
    pub system_context: String,
    pub history: Vec<ConversationMessage>,
    pub utterance: String,
    pub exchanges: Vec<ToolExchange>,
}

impl ReasoningError {
    /// Transient failures worth another attempt. A malformed tool call would
    /// come back the same way.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Protocol(_) | Self::Configuration(_))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReasoningResponse {
    pub text: String,
    /// In issuance order.
    pub tool_calls: Vec<ToolCallRequest>,
    pub awaiting_input: bool,
}

impl ReasoningResponse {
    pub fn is_done(&self) -> bool {
        self.tool_calls.is_empty() && !self.awaiting_input
    }
}

#[async_trait]
pub trait ReasoningCollaborator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn respond(&self, request: &ReasoningRequest)
        -> Result<ReasoningResponse, ReasoningError>;
}

pub fn build_reasoner(
    config: &ReasoningConfig,
) -> Result<Arc<dyn ReasoningCollaborator>, ReasoningError> {
    match config.provider {
        ReasoningProvider::Keyword => Ok(Arc::new(KeywordReasoner::new())),
        ReasoningProvider::Anthropic => {
            let api_key = config.api_key.as_ref().ok_or_else(|| {
                ReasoningError::Configuration(
                    "reasoning.api_key is required when provider = \"anthropic\"".to_string(),
                )
            })?;
            if api_key.expose_secret().trim().is_empty() {
                return Err(ReasoningError::Configuration(
                    "reasoning.api_key must not be empty".to_string(),
                ));
            }
            Ok(Arc::new(AnthropicReasoner::from_config(config)?))
        }
    }
}
