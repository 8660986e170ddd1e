use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::step::StepStatus;
use crate::domain::task::TaskStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid task transition from {from:?} to {to:?}")]
    InvalidTaskTransition { from: TaskStatus, to: TaskStatus },
    #[error("invalid step transition from {from:?} to {to:?}")]
    InvalidStepTransition { from: StepStatus, to: StepStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested resource does not exist.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(DomainError::InvalidTaskTransition { .. })
            | ApplicationError::Domain(DomainError::InvalidStepTransition { .. })
            | ApplicationError::Domain(DomainError::InvariantViolation(_)) => Self::BadRequest {
                message: "domain validation failed".to_owned(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::NotFound(message) => {
                Self::NotFound { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

/// Failure taxonomy shared by tasks and turn results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    AgentNotFound,
    AgentUnreachable,
    AgentTimeout,
    AgentRejected,
    BudgetExceeded,
    ReasoningUnavailable,
    ProtocolError,
    DeadlineExceeded,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentNotFound => "agent_not_found",
            Self::AgentUnreachable => "agent_unreachable",
            Self::AgentTimeout => "agent_timeout",
            Self::AgentRejected => "agent_rejected",
            Self::BudgetExceeded => "budget_exceeded",
            Self::ReasoningUnavailable => "reasoning_unavailable",
            Self::ProtocolError => "protocol_error",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "agent_not_found" => Some(Self::AgentNotFound),
            "agent_unreachable" => Some(Self::AgentUnreachable),
            "agent_timeout" => Some(Self::AgentTimeout),
            "agent_rejected" => Some(Self::AgentRejected),
            "budget_exceeded" => Some(Self::BudgetExceeded),
            "reasoning_unavailable" => Some(Self::ReasoningUnavailable),
            "protocol_error" => Some(Self::ProtocolError),
            "deadline_exceeded" => Some(Self::DeadlineExceeded),
            _ => None,
        }
    }

    /// Stable public vocabulary surfaced to callers.
    pub fn public_code(&self) -> &'static str {
        match self {
            Self::AgentNotFound | Self::AgentUnreachable | Self::AgentTimeout => {
                "agent_unavailable"
            }
            Self::AgentRejected => "agent_declined",
            Self::BudgetExceeded => "budget_exceeded",
            Self::ReasoningUnavailable => "service_unavailable",
            Self::ProtocolError => "invalid_response",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AgentNotFound => "No available agent offers the requested skill.",
            Self::AgentUnreachable => "The selected agent could not be reached.",
            Self::AgentTimeout => "The selected agent did not respond in time.",
            Self::AgentRejected => "The selected agent declined the request.",
            Self::BudgetExceeded => "The task would exceed its budget and was stopped.",
            Self::ReasoningUnavailable => {
                "The planning service is temporarily unavailable. Please retry shortly."
            }
            Self::ProtocolError => "The selected agent returned an invalid response.",
            Self::DeadlineExceeded => "The request took too long and was stopped.",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DomainError, FailureReason, InterfaceError};

    #[test]
    fn domain_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(DomainError::InvariantViolation(
            "budget must be positive".to_owned(),
        ))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn not_found_keeps_message_and_correlation() {
        let interface =
            ApplicationError::NotFound("task t-404".to_owned()).into_interface("req-2");

        assert!(matches!(interface, InterfaceError::NotFound { ref message, .. } if message == "task t-404"));
        assert_eq!(interface.correlation_id(), "req-2");
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface =
            ApplicationError::Configuration("missing api key".to_owned()).into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn failure_reasons_collapse_to_stable_public_codes() {
        assert_eq!(FailureReason::AgentTimeout.public_code(), "agent_unavailable");
        assert_eq!(FailureReason::AgentUnreachable.public_code(), "agent_unavailable");
        assert_eq!(FailureReason::AgentNotFound.public_code(), "agent_unavailable");
        assert_eq!(FailureReason::AgentRejected.public_code(), "agent_declined");
        assert_eq!(FailureReason::BudgetExceeded.public_code(), "budget_exceeded");
        assert_eq!(FailureReason::ReasoningUnavailable.public_code(), "service_unavailable");
        assert_eq!(FailureReason::ProtocolError.public_code(), "invalid_response");
        assert_eq!(FailureReason::DeadlineExceeded.public_code(), "deadline_exceeded");
    }

    #[test]
    fn failure_reason_parse_accepts_storage_encoding() {
        assert_eq!(FailureReason::parse(" Budget_Exceeded "), Some(FailureReason::BudgetExceeded));
        assert_eq!(FailureReason::parse("unknown"), None);
    }
}
