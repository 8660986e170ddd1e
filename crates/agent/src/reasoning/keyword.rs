use async_trait::async_trait;
use serde_json::json;

use super::{ReasoningCollaborator, ReasoningError, ReasoningRequest, ReasoningResponse};
use crate::tools::{ToolCallRequest, ToolCallResult};

/// Skill tag and the utterance fragments that imply it, in dispatch order.
const SKILL_KEYWORDS: &[(&str, &[&str])] = &[
    ("search", &["search", "look up", "lookup", "research", "find", "latest news"]),
    ("summarize", &["summarize", "summarise", "summary", "brief", "condense", "tl;dr"]),
    ("translate", &["translate", "translation", "convert to"]),
    ("premium", &["premium"]),
    ("negotiate", &["negotiate", "negotiation"]),
];

const CLARIFICATION: &str = "I can search the web, summarize text, or translate it. \
    What would you like me to do?";

/// Offline collaborator that maps utterance keywords to skills.
///
/// The first round issues one `invoke_agent` call per detected skill. Once
/// results are in, it composes them into the final answer.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeywordReasoner;

impl KeywordReasoner {
    pub fn new() -> Self {
        Self
    }

    pub fn detect_skills(utterance: &str) -> Vec<&'static str> {
        let lowered = utterance.to_lowercase();
        SKILL_KEYWORDS
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|keyword| lowered.contains(keyword)))
            .map(|(skill, _)| *skill)
            .collect()
    }
}

#[async_trait]
impl ReasoningCollaborator for KeywordReasoner {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn respond(
        &self,
        request: &ReasoningRequest,
    ) -> Result<ReasoningResponse, ReasoningError> {
        if let Some(last) = request.exchanges.last() {
            return Ok(ReasoningResponse {
                text: compose_answer(&last.results),
                tool_calls: Vec::new(),
                awaiting_input: false,
            });
        }

        let skills = Self::detect_skills(&request.utterance);
        if skills.is_empty() {
            return Ok(ReasoningResponse {
                text: CLARIFICATION.to_string(),
                tool_calls: Vec::new(),
                awaiting_input: true,
            });
        }

        let tool_calls = skills
            .iter()
            .enumerate()
            .map(|(index, skill)| {
                ToolCallRequest::invoke_agent(
                    format!("kw-{}", index + 1),
                    *skill,
                    request.utterance.clone(),
                )
                .with_payload(json!({ "text": request.utterance }))
            })
            .collect();

        Ok(ReasoningResponse {
            text: format!("Delegating to: {}.", skills.join(", ")),
            tool_calls,
            awaiting_input: false,
        })
    }
}

fn compose_answer(results: &[ToolCallResult]) -> String {
    if results.is_empty() {
        return "Nothing was executed.".to_string();
    }

    results
        .iter()
        .map(|result| match result {
            ToolCallResult::Completed { output, .. } => output.clone(),
            ToolCallResult::Failed { reason, .. } => reason.user_message().to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use bazaar_core::domain::agent::AgentId;
    use bazaar_core::domain::step::StepId;
    use bazaar_core::errors::FailureReason;

    use super::KeywordReasoner;
    use crate::reasoning::{ReasoningCollaborator, ReasoningRequest, ToolExchange};
    use crate::tools::{ToolCallRequest, ToolCallResult};

    fn request(utterance: &str) -> ReasoningRequest {
        ReasoningRequest {
            system_context: String::new(),
            history: Vec::new(),
            utterance: utterance.to_string(),
            exchanges: Vec::new(),
        }
    }

    #[test]
    fn detects_skills_in_dispatch_order() {
        assert_eq!(
            KeywordReasoner::detect_skills("Summarize this and then TRANSLATE it"),
            vec!["summarize", "translate"]
        );
        assert_eq!(
            KeywordReasoner::detect_skills("look up rust releases and give me a summary"),
            vec!["search", "summarize"]
        );
        assert!(KeywordReasoner::detect_skills("hello there").is_empty());
    }

    #[tokio::test]
    async fn unknown_intent_asks_for_clarification() {
        let response = KeywordReasoner::new().respond(&request("hello")).await.expect("respond");
        assert!(response.awaiting_input);
        assert!(response.tool_calls.is_empty());
        assert!(!response.is_done());
    }

    #[tokio::test]
    async fn first_round_issues_calls_and_second_round_finishes() {
        let reasoner = KeywordReasoner::new();
        let mut req = request("please translate good morning");

        let first = reasoner.respond(&req).await.expect("first round");
        assert_eq!(first.tool_calls.len(), 1);
        let ToolCallRequest::InvokeAgent(call) = &first.tool_calls[0];
        assert_eq!(call.agent_skill, "translate");

        req.exchanges.push(ToolExchange {
            assistant_text: first.text.clone(),
            calls: first.tool_calls.clone(),
            results: vec![
                ToolCallResult::Completed {
                    call_id: "kw-1".to_string(),
                    step_id: StepId("s1".to_string()),
                    agent_id: AgentId::new("translator"),
                    output: "buenos dias".to_string(),
                    cost: Decimal::new(10, 2),
                },
                ToolCallResult::Failed {
                    call_id: "kw-2".to_string(),
                    step_id: None,
                    agent_id: None,
                    reason: FailureReason::AgentNotFound,
                    message: String::new(),
                },
            ],
        });
        let second = reasoner.respond(&req).await.expect("second round");
        assert!(second.is_done());
        assert!(second.text.starts_with("buenos dias"));
        assert!(second.text.contains("No available agent"));
    }
}
