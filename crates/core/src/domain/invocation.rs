use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::FailureReason;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationFailureKind {
    Timeout,
    Unreachable,
    RejectedByAgent,
    ProtocolError,
}

impl InvocationFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unreachable => "unreachable",
            Self::RejectedByAgent => "rejected_by_agent",
            Self::ProtocolError => "protocol_error",
        }
    }

    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::Timeout => FailureReason::AgentTimeout,
            Self::Unreachable => FailureReason::AgentUnreachable,
            Self::RejectedByAgent => FailureReason::AgentRejected,
            Self::ProtocolError => FailureReason::ProtocolError,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationSuccess {
    pub output: String,
    pub declared_internal_cost: Decimal,
    pub requires_external_tool: bool,
    pub declared_external_cost: Decimal,
    pub duration_ms: u64,
}

impl InvocationSuccess {
    /// External cost counted toward the budget; zero unless the agent used an external tool.
    pub fn billable_external_cost(&self) -> Decimal {
        if self.requires_external_tool {
            self.declared_external_cost
        } else {
            Decimal::ZERO
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationFailure {
    pub kind: InvocationFailureKind,
    pub message: String,
    pub duration_ms: u64,
}

/// Normalized outcome of a single agent round trip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InvocationResult {
    Success(InvocationSuccess),
    Failure(InvocationFailure),
}

impl InvocationResult {
    pub fn failure(kind: InvocationFailureKind, message: impl Into<String>, duration_ms: u64) -> Self {
        Self::Failure(InvocationFailure { kind, message: message.into(), duration_ms })
    }

    pub fn duration_ms(&self) -> u64 {
        match self {
            Self::Success(success) => success.duration_ms,
            Self::Failure(failure) => failure.duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}
