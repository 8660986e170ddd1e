//! Agent runtime for the Bazaar marketplace
//!
//! Everything that talks to the outside world during a turn:
//! - `registry` keeps the live agent catalog with per-agent load and pricing
//! - `gateway` invokes worker agents over HTTP and normalizes their replies
//! - `reasoning` wraps the collaborator that plans tool calls
//! - `settlement` commits charges onto the hash-chained ledger
//! - `locks` serializes turns and settlements per task
//! - `orchestrator` runs one conversational turn end to end
//!
//! The reasoning collaborator only proposes `invoke_agent` calls. Agent
//! selection, budget checks and charging are decided here, deterministically.

pub mod gateway;
pub mod locks;
pub mod orchestrator;
pub mod reasoning;
pub mod registry;
pub mod settlement;
pub mod tools;

pub use gateway::{GatewayError, HttpInvocationGateway, InvocationGateway};
pub use locks::{TaskLockGuard, TaskLocks};
pub use orchestrator::{
    OrchestratorError, OrchestratorSettings, TaskOrchestrator, TaskSummary, TurnRequest,
    TurnResult,
};
pub use reasoning::{
    build_reasoner, ReasoningCollaborator, ReasoningError, ReasoningRequest, ReasoningResponse,
};
pub use registry::{AgentRegistry, LoadGuard, RegistryError};
pub use settlement::{SettlementEngine, SettlementReceipt};
pub use tools::{InvokeAgentCall, ToolCallRequest, ToolCallResult, ToolError};
