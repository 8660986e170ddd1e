//! Task orchestrator
//!
//! Drives one conversational turn: relays history and the utterance to the
//! reasoning collaborator, resolves each `invoke_agent` call through the
//! registry, gateway and settlement engine in issuance order, and decides
//! whether the task continues, completes or fails.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use bazaar_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use bazaar_core::config::AppConfig;
use bazaar_core::domain::agent::Agent;
use bazaar_core::domain::invocation::{InvocationFailureKind, InvocationResult};
use bazaar_core::domain::step::Step;
use bazaar_core::domain::task::{Task, TaskId, TaskStatus};
use bazaar_core::domain::turn::{ConversationMessage, ConversationTurn};
use bazaar_core::errors::{ApplicationError, DomainError, FailureReason};
use bazaar_core::ledger::{CostBreakdown, LedgerEntry, Rail, VerificationResult};
use bazaar_core::settlement::{SettleOutcome, SettlementError};
use bazaar_db::repositories::RepositoryError;
use bazaar_db::MarketplaceStore;

use crate::gateway::InvocationGateway;
use crate::locks::TaskLocks;
use crate::reasoning::{
    ReasoningCollaborator, ReasoningError, ReasoningRequest, ReasoningResponse, ToolExchange,
};
use crate::registry::{AgentRegistry, RegistryError};
use crate::settlement::SettlementEngine;
use crate::tools::{InvokeAgentCall, ToolCallRequest, ToolCallResult};

const INTERRUPTED_STEP_MESSAGE: &str = "turn interrupted before the agent replied";
const DEADLINE_STEP_MESSAGE: &str = "turn deadline exceeded";
const CLOSING_STEP_MESSAGE: &str = "task closed before the agent replied";

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Settlement(#[from] SettlementError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl From<OrchestratorError> for ApplicationError {
    fn from(value: OrchestratorError) -> Self {
        match value {
            OrchestratorError::TaskNotFound(id) => Self::NotFound(format!("task {id}")),
            OrchestratorError::InvalidRequest(message) => {
                Self::Domain(DomainError::InvariantViolation(message))
            }
            OrchestratorError::Domain(error) => Self::Domain(error),
            OrchestratorError::Repository(error) => Self::Persistence(error.to_string()),
            OrchestratorError::Settlement(SettlementError::NotFound(message)) => {
                Self::NotFound(message)
            }
            OrchestratorError::Settlement(
                error @ (SettlementError::InvalidRefund(_)
                | SettlementError::InvalidBalanceLoad(_)
                | SettlementError::TaskClosed(_)),
            ) => Self::Domain(DomainError::InvariantViolation(error.to_string())),
            OrchestratorError::Settlement(error) => Self::Persistence(error.to_string()),
            OrchestratorError::Registry(RegistryError::AgentNotFound(id)) => {
                Self::NotFound(format!("agent {id}"))
            }
            OrchestratorError::Registry(error) => Self::Persistence(error.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub default_max_budget: Decimal,
    pub gateway_timeout: Duration,
    pub turn_deadline: Duration,
    pub max_rounds: u32,
    pub reasoning_retries: u32,
    pub reasoning_backoff: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            default_max_budget: config.settlement.default_max_budget,
            gateway_timeout: Duration::from_secs(config.gateway.timeout_secs),
            turn_deadline: Duration::from_secs(config.gateway.turn_deadline_secs),
            max_rounds: config.reasoning.max_rounds.max(1),
            reasoning_retries: config.reasoning.max_retries,
            reasoning_backoff: Duration::from_millis(config.reasoning.retry_backoff_ms),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRequest {
    /// Prior messages, oldest first. When empty and `task_id` is set, the
    /// stored turns of that task are used.
    #[serde(default)]
    pub history: Vec<ConversationMessage>,
    pub utterance: String,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub max_budget: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnResult {
    pub task_id: TaskId,
    pub final_text: String,
    pub cost_breakdown: CostBreakdown,
    pub steps_executed: Vec<Step>,
    pub status: TaskStatus,
    pub failure_reason: Option<FailureReason>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TaskSummary {
    pub task: Task,
    pub status: TaskStatus,
    pub steps: Vec<Step>,
    pub cost_breakdown: CostBreakdown,
    pub ledger_verified: bool,
    pub ledger_verification: VerificationResult,
}

/// How a turn ended, before it is applied to the task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TurnEnd {
    Completed,
    AwaitingInput,
    RoundLimit,
    Failed(FailureReason),
}

/// State accumulated while a turn runs. Survives deadline cancellation.
struct TurnProgress {
    steps: Vec<Step>,
    final_text: String,
    end: Option<TurnEnd>,
}

impl TurnProgress {
    fn record(&mut self, settled: Vec<Step>) {
        for step in settled {
            self.steps.retain(|seen| seen.id != step.id);
            self.steps.push(step);
        }
    }
}

/// Result of resolving one tool call.
struct CallOutcome {
    result: ToolCallResult,
    settle: SettleOutcome,
}

pub struct TaskOrchestrator {
    store: MarketplaceStore,
    registry: Arc<AgentRegistry>,
    gateway: Arc<dyn InvocationGateway>,
    settlement: Arc<SettlementEngine>,
    reasoner: Arc<dyn ReasoningCollaborator>,
    audit: Arc<dyn AuditSink>,
    settings: OrchestratorSettings,
    turn_locks: TaskLocks,
}

impl TaskOrchestrator {
    pub fn new(
        store: MarketplaceStore,
        registry: Arc<AgentRegistry>,
        gateway: Arc<dyn InvocationGateway>,
        settlement: Arc<SettlementEngine>,
        reasoner: Arc<dyn ReasoningCollaborator>,
        audit: Arc<dyn AuditSink>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            registry,
            gateway,
            settlement,
            reasoner,
            audit,
            settings,
            turn_locks: TaskLocks::new(),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Tasks with a turn running or waiting, plus those mid-settlement.
    pub fn active_task_locks(&self) -> usize {
        self.turn_locks.active() + self.settlement.active_task_locks()
    }

    pub async fn process_turn(&self, request: TurnRequest) -> Result<TurnResult, OrchestratorError> {
        let utterance = request.utterance.trim().to_string();
        if utterance.is_empty() {
            return Err(OrchestratorError::InvalidRequest("utterance must not be empty".into()));
        }
        if let Some(budget) = request.max_budget {
            if budget <= Decimal::ZERO {
                return Err(OrchestratorError::InvalidRequest(
                    "max_budget must be greater than zero".into(),
                ));
            }
        }

        let task_id = match &request.task_id {
            Some(id) => id.clone(),
            None => {
                let budget = request.max_budget.unwrap_or(self.settings.default_max_budget);
                let task = Task::new(utterance.clone(), budget);
                self.store.tasks.save(task.clone()).await?;
                info!(
                    event_name = "orchestrator.task_created",
                    task_id = %task.id,
                    max_budget = %task.max_budget,
                    "task created"
                );
                task.id
            }
        };

        let _turn_guard = self.turn_locks.lock(&task_id).await;

        let mut task = self.load_task(&task_id).await?;
        if task.status.is_terminal() {
            return Err(OrchestratorError::InvalidRequest(format!(
                "task {task_id} is {} and accepts no further turns",
                task.status.as_str()
            )));
        }

        // A turn dropped mid-invocation leaves its step open and uncharged.
        let interrupted = self.close_open_steps(&task_id, INTERRUPTED_STEP_MESSAGE).await?;
        if !interrupted.is_empty() {
            warn!(
                event_name = "orchestrator.interrupted_steps_closed",
                task_id = %task_id,
                step_count = interrupted.len(),
                "closed steps left open by an interrupted turn"
            );
        }

        let history = if request.history.is_empty() && request.task_id.is_some() {
            self.stored_history(&task_id).await?
        } else {
            request.history.clone()
        };

        let mut progress = TurnProgress { steps: Vec::new(), final_text: String::new(), end: None };
        let deadline = self.settings.turn_deadline;
        let run = tokio::time::timeout(
            deadline,
            self.run_turn(&mut task, &history, &utterance, &mut progress),
        )
        .await;

        match run {
            Ok(Ok(())) => {}
            Ok(Err(error)) => return Err(error),
            Err(_) => {
                warn!(
                    event_name = "orchestrator.turn_deadline_exceeded",
                    task_id = %task_id,
                    deadline_ms = deadline.as_millis() as u64,
                    "turn deadline exceeded"
                );
                let abandoned = self.close_open_steps(&task_id, DEADLINE_STEP_MESSAGE).await?;
                progress.record(abandoned);
                progress.end = Some(TurnEnd::Failed(FailureReason::DeadlineExceeded));
                progress.final_text = FailureReason::DeadlineExceeded.user_message().to_string();
                task = self.load_task(&task_id).await?;
            }
        }

        let end = progress.end.unwrap_or(TurnEnd::RoundLimit);
        if matches!(end, TurnEnd::Completed | TurnEnd::Failed(_)) {
            // A closed task never keeps open steps.
            let stragglers = self.close_open_steps(&task_id, CLOSING_STEP_MESSAGE).await?;
            progress.record(stragglers);
        }
        match end {
            TurnEnd::Completed => task.complete()?,
            TurnEnd::Failed(reason) => task.fail(reason)?,
            TurnEnd::AwaitingInput | TurnEnd::RoundLimit => {}
        }
        self.store.tasks.save(task.clone()).await?;

        let entries = self.store.ledger.list_for_task(&task_id).await?;
        let cost_breakdown = CostBreakdown::from_entries(&entries);
        let final_text = if progress.final_text.is_empty() {
            match end {
                TurnEnd::Failed(reason) => reason.user_message().to_string(),
                _ => "Done.".to_string(),
            }
        } else {
            progress.final_text.clone()
        };

        self.store
            .turns
            .append(ConversationTurn::new(
                task_id.clone(),
                utterance.clone(),
                final_text.clone(),
                task.status,
                cost_breakdown.clone(),
            ))
            .await?;

        let failure_reason = match end {
            TurnEnd::Failed(reason) => Some(reason),
            _ => None,
        };
        info!(
            event_name = "orchestrator.turn_processed",
            task_id = %task_id,
            status = task.status.as_str(),
            steps = progress.steps.len(),
            total_cost = %cost_breakdown.total,
            failure_reason = failure_reason.map(|reason| reason.as_str()).unwrap_or("none"),
            "turn processed"
        );
        let mut event = AuditEvent::new(
            "turn.processed",
            AuditCategory::Turn,
            self.reasoner.name(),
            if failure_reason.is_some() { AuditOutcome::Failed } else { AuditOutcome::Success },
        )
        .for_task(&task_id)
        .with_detail("status", task.status.as_str())
        .with_detail("steps_executed", progress.steps.len().to_string())
        .with_detail("total_cost", cost_breakdown.total.to_string());
        if let Some(reason) = failure_reason {
            event = event.with_detail("failure_reason", reason.as_str());
        }
        self.audit.emit(event);

        Ok(TurnResult {
            task_id,
            final_text,
            cost_breakdown,
            steps_executed: progress.steps,
            status: task.status,
            failure_reason,
        })
    }

    pub async fn get_task_summary(&self, task_id: &TaskId) -> Result<TaskSummary, OrchestratorError> {
        let task = self.load_task(task_id).await?;
        let steps = self.store.steps.list_for_task(task_id).await?;
        let entries = self.store.ledger.list_for_task(task_id).await?;
        let verification = self.settlement.sealer().verify_chain(task_id, &entries);

        Ok(TaskSummary {
            status: task.status,
            task,
            steps,
            cost_breakdown: CostBreakdown::from_entries(&entries),
            ledger_verified: verification.valid,
            ledger_verification: verification,
        })
    }

    pub async fn task_ledger(&self, task_id: &TaskId) -> Result<Vec<LedgerEntry>, OrchestratorError> {
        self.load_task(task_id).await?;
        Ok(self.store.ledger.list_for_task(task_id).await?)
    }

    /// Ledger entries on one rail across every task, newest first.
    pub async fn ledger_by_rail(
        &self,
        rail: Rail,
        limit: u32,
    ) -> Result<Vec<LedgerEntry>, OrchestratorError> {
        Ok(self.store.ledger.list_by_rail(rail, limit).await?)
    }

    /// Adds funds to an open task's budget.
    pub async fn load_balance(
        &self,
        task_id: &TaskId,
        amount: Decimal,
        memo: &str,
    ) -> Result<(Task, LedgerEntry), OrchestratorError> {
        self.load_task(task_id).await?;
        Ok(self.settlement.load_balance(task_id, amount, memo).await?)
    }

    pub async fn list_agents(&self) -> Vec<Agent> {
        self.registry.list().await
    }

    async fn run_turn(
        &self,
        task: &mut Task,
        history: &[ConversationMessage],
        utterance: &str,
        progress: &mut TurnProgress,
    ) -> Result<(), OrchestratorError> {
        let mut request = ReasoningRequest {
            system_context: self.system_context().await,
            history: history.to_vec(),
            utterance: utterance.to_string(),
            exchanges: Vec::new(),
        };

        for round in 0..self.settings.max_rounds {
            let response = match self.reason_with_retry(&request, &task.id).await {
                Ok(response) => response,
                Err(error) => {
                    let reason = match error {
                        ReasoningError::Protocol(_) => FailureReason::ProtocolError,
                        _ => FailureReason::ReasoningUnavailable,
                    };
                    progress.end = Some(TurnEnd::Failed(reason));
                    progress.final_text = reason.user_message().to_string();
                    return Ok(());
                }
            };
            progress.final_text = response.text.clone();

            if response.tool_calls.is_empty() {
                progress.end = Some(if response.awaiting_input {
                    TurnEnd::AwaitingInput
                } else {
                    TurnEnd::Completed
                });
                return Ok(());
            }

            task.start()?;
            for call in &response.tool_calls {
                let ToolCallRequest::InvokeAgent(call) = call;
                task.add_required_skill(&call.agent_skill);
            }
            self.store.tasks.save(task.clone()).await?;

            let single_agent = round == 0 && response.tool_calls.len() == 1;
            let mut results = Vec::with_capacity(response.tool_calls.len());
            for call in &response.tool_calls {
                let ToolCallRequest::InvokeAgent(invoke) = call;
                let outcome = self.execute_call(task, invoke, progress).await?;
                let halt = match (outcome.settle, outcome.result.failure_reason()) {
                    (SettleOutcome::Rejected, _) => Some(FailureReason::BudgetExceeded),
                    (SettleOutcome::NoCharge, Some(reason))
                        if single_agent || invoke.hard_dependency =>
                    {
                        Some(reason)
                    }
                    _ => None,
                };
                results.push(outcome.result);

                if let Some(reason) = halt {
                    info!(
                        event_name = "orchestrator.sequence_halted",
                        task_id = %task.id,
                        call_id = %invoke.call_id,
                        reason = reason.as_str(),
                        "remaining tool calls skipped"
                    );
                    progress.end = Some(TurnEnd::Failed(reason));
                    progress.final_text = halt_text(&response, &results, reason);
                    return Ok(());
                }
            }

            request.exchanges.push(ToolExchange {
                assistant_text: response.text,
                calls: response.tool_calls,
                results,
            });
        }

        progress.end = Some(TurnEnd::RoundLimit);
        Ok(())
    }

    async fn execute_call(
        &self,
        task: &Task,
        call: &InvokeAgentCall,
        progress: &mut TurnProgress,
    ) -> Result<CallOutcome, OrchestratorError> {
        let skills = vec![call.agent_skill.clone()];
        let Some(agent) = self.registry.select_candidates(&skills, None).await.into_iter().next()
        else {
            warn!(
                event_name = "orchestrator.no_candidate",
                task_id = %task.id,
                skill = %call.agent_skill,
                "no available agent offers skill"
            );
            return Ok(CallOutcome {
                result: ToolCallResult::Failed {
                    call_id: call.call_id.clone(),
                    step_id: None,
                    agent_id: None,
                    reason: FailureReason::AgentNotFound,
                    message: format!("no available agent offers `{}`", call.agent_skill),
                },
                settle: SettleOutcome::NoCharge,
            });
        };

        let payload = call.worker_payload();
        let mut step = Step::new(
            task.id.clone(),
            agent.id.clone(),
            call.agent_skill.clone(),
            call.subtask.clone(),
            payload.clone(),
        );
        self.store.steps.save(step.clone()).await?;

        let current = self.load_task(&task.id).await?;
        if !current.can_afford(agent.dynamic_price) {
            let receipt =
                self.settlement.reject_over_budget(&current, &step, agent.dynamic_price).await?;
            progress.steps.push(receipt.step.clone());
            return Ok(CallOutcome {
                result: failed_result(call, &receipt.step, FailureReason::BudgetExceeded),
                settle: receipt.outcome,
            });
        }

        step.start()?;
        self.store.steps.save(step.clone()).await?;
        info!(
            event_name = "orchestrator.step_started",
            task_id = %task.id,
            step_id = %step.id,
            agent_id = %agent.id,
            skill = %call.agent_skill,
            quoted_price = %agent.dynamic_price,
            "step started"
        );

        let result = {
            let _load = self.registry.acquire(&agent.id).await?;
            self.gateway.invoke(&agent, &payload, self.settings.gateway_timeout).await
        };

        let receipt = self.settlement.settle(&current, &step, &result).await?;
        progress.steps.push(receipt.step.clone());

        if receipt.outcome == SettleOutcome::Charged {
            if let Err(error) =
                self.registry.record_completion(&agent.id, result.duration_ms()).await
            {
                warn!(
                    event_name = "orchestrator.stats_update_failed",
                    agent_id = %agent.id,
                    error = %error,
                    "could not record agent completion"
                );
            }
        }

        let tool_result = match (&receipt.outcome, &result) {
            (SettleOutcome::Charged, InvocationResult::Success(success)) => {
                ToolCallResult::Completed {
                    call_id: call.call_id.clone(),
                    step_id: receipt.step.id.clone(),
                    agent_id: agent.id.clone(),
                    output: success.output.clone(),
                    cost: receipt.projected_cost,
                }
            }
            (SettleOutcome::Rejected, _) => {
                failed_result(call, &receipt.step, FailureReason::BudgetExceeded)
            }
            (_, InvocationResult::Failure(failure)) => {
                failed_result(call, &receipt.step, failure.kind.failure_reason())
            }
            (_, InvocationResult::Success(_)) => {
                failed_result(call, &receipt.step, FailureReason::ProtocolError)
            }
        };

        Ok(CallOutcome { result: tool_result, settle: receipt.outcome })
    }

    async fn reason_with_retry(
        &self,
        request: &ReasoningRequest,
        task_id: &TaskId,
    ) -> Result<ReasoningResponse, ReasoningError> {
        let attempts = self.settings.reasoning_retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.reasoner.respond(request).await {
                Ok(response) => return Ok(response),
                Err(error) if attempt < attempts && error.is_retryable() => {
                    warn!(
                        event_name = "orchestrator.reasoning_retry",
                        task_id = %task_id,
                        attempt,
                        error = %error,
                        "reasoning call failed, retrying"
                    );
                    tokio::time::sleep(self.settings.reasoning_backoff * attempt).await;
                }
                Err(error) => {
                    let event_type = match error {
                        ReasoningError::Protocol(_) => "reasoning.protocol_error",
                        _ => "reasoning.unavailable",
                    };
                    warn!(
                        event_name = "orchestrator.reasoning_failed",
                        task_id = %task_id,
                        attempt,
                        error = %error,
                        "reasoning collaborator gave no usable reply"
                    );
                    self.audit.emit(
                        AuditEvent::new(
                            event_type,
                            AuditCategory::Reasoning,
                            self.reasoner.name(),
                            AuditOutcome::Failed,
                        )
                        .for_task(task_id)
                        .with_detail("error", error.to_string()),
                    );
                    return Err(error);
                }
            }
        }
    }

    /// Fails every open step of the task as timed out. Nothing was charged
    /// for them.
    async fn close_open_steps(
        &self,
        task_id: &TaskId,
        message: &str,
    ) -> Result<Vec<Step>, OrchestratorError> {
        let task = self.load_task(task_id).await?;
        let mut closed = Vec::new();
        for step in self.store.steps.list_for_task(task_id).await? {
            if step.is_terminal() {
                continue;
            }
            let result = InvocationResult::failure(InvocationFailureKind::Timeout, message, 0);
            match self.settlement.settle(&task, &step, &result).await {
                Ok(receipt) => closed.push(receipt.step),
                // Settled concurrently by the turn that owned it.
                Err(SettlementError::DuplicateStep(_)) => {}
                Err(error) => return Err(error.into()),
            }
        }
        Ok(closed)
    }

    async fn system_context(&self) -> String {
        let agents = self.registry.list().await;
        let mut lines = vec![
            "You are the Bazaar orchestrator. Fulfil the user's request by delegating \
             sub-tasks with the invoke_agent tool, one skill per call, and summarize the \
             results with their cost."
                .to_string(),
            "Available agents:".to_string(),
        ];
        for agent in agents.iter().filter(|agent| agent.available) {
            lines.push(format!(
                "- {} ({}): skills [{}], ${} per call",
                agent.id,
                agent.name,
                agent.skills.join(", "),
                agent.dynamic_price
            ));
        }
        lines.join("\n")
    }

    async fn stored_history(
        &self,
        task_id: &TaskId,
    ) -> Result<Vec<ConversationMessage>, OrchestratorError> {
        let turns = self.store.turns.list_for_task(task_id).await?;
        Ok(turns.iter().flat_map(ConversationTurn::as_messages).collect())
    }

    async fn load_task(&self, task_id: &TaskId) -> Result<Task, OrchestratorError> {
        self.store
            .tasks
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.clone()))
    }
}

fn failed_result(call: &InvokeAgentCall, step: &Step, reason: FailureReason) -> ToolCallResult {
    ToolCallResult::Failed {
        call_id: call.call_id.clone(),
        step_id: Some(step.id.clone()),
        agent_id: Some(step.agent_id.clone()),
        reason,
        message: step.failure_message.clone().unwrap_or_default(),
    }
}

fn halt_text(response: &ReasoningResponse, results: &[ToolCallResult], reason: FailureReason) -> String {
    let completed: Vec<&str> = results
        .iter()
        .filter_map(|result| match result {
            ToolCallResult::Completed { output, .. } => Some(output.as_str()),
            ToolCallResult::Failed { .. } => None,
        })
        .collect();
    let skipped = response.tool_calls.len().saturating_sub(results.len());

    let mut text = reason.user_message().to_string();
    if !completed.is_empty() {
        text.push_str("\n\nCompleted before stopping:\n");
        text.push_str(&completed.join("\n"));
    }
    if skipped > 0 {
        text.push_str(&format!("\n\n{skipped} remaining step(s) were not started."));
    }
    text
}
