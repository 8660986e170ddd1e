pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod ledger;
pub mod pricing;
pub mod settlement;

pub use audit::{
    AuditCategory, AuditCharge, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
};
pub use domain::agent::{Agent, AgentId, AgentStats};
pub use domain::invocation::{
    InvocationFailure, InvocationFailureKind, InvocationResult, InvocationSuccess,
};
pub use domain::step::{Step, StepFailureKind, StepId, StepStatus};
pub use domain::task::{Task, TaskId, TaskStatus};
pub use domain::turn::{ConversationMessage, ConversationTurn, MessageRole, TurnId};
pub use errors::{ApplicationError, DomainError, FailureReason, InterfaceError};
pub use ledger::{
    CostBreakdown, EntryType, LedgerEntry, LedgerEntryDraft, LedgerEntryId, LedgerSealer, Rail,
    VerificationResult,
};
pub use settlement::{
    BalanceLoadPlan, SettleOutcome, SettlementError, SettlementPlan, SettlementPlanner,
    SettlementPolicy,
};
