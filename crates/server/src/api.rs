//! Upward HTTP surface over the task orchestrator.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use bazaar_agent::orchestrator::{
    OrchestratorError, TaskOrchestrator, TaskSummary, TurnRequest, TurnResult,
};
use bazaar_core::domain::agent::Agent;
use bazaar_core::domain::task::{Task, TaskId};
use bazaar_core::domain::turn::ConversationMessage;
use bazaar_core::errors::{ApplicationError, InterfaceError};
use bazaar_core::ledger::{LedgerEntry, Rail};
use bazaar_core::settlement::SettlementError;

const DEFAULT_RAIL_LIMIT: u32 = 100;
const MAX_RAIL_LIMIT: u32 = 1_000;

#[derive(Clone)]
pub struct ApiState {
    orchestrator: Arc<TaskOrchestrator>,
}

#[derive(Debug, Deserialize)]
pub struct TurnBody {
    pub utterance: String,
    #[serde(default)]
    pub history: Vec<ConversationMessage>,
    pub task_id: Option<String>,
    pub max_budget: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct TurnResponse {
    #[serde(flatten)]
    pub result: TurnResult,
    /// Stable public code for `failure_reason`.
    pub failure_code: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    pub task_id: TaskId,
    pub entries: Vec<LedgerEntry>,
}

#[derive(Debug, Deserialize)]
pub struct RailQuery {
    pub rail: String,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct RailLedgerResponse {
    pub rail: Rail,
    pub entries: Vec<LedgerEntry>,
}

#[derive(Debug, Deserialize)]
pub struct BalanceBody {
    pub amount: Decimal,
    #[serde(default)]
    pub memo: String,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub task: Task,
    pub entry: LedgerEntry,
}

#[derive(Debug, Serialize)]
pub struct AgentsResponse {
    pub agents: Vec<Agent>,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: &'static str,
    pub message: String,
    pub correlation_id: String,
}

/// Interface error rendered with its HTTP status.
#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl From<OrchestratorError> for ApiError {
    fn from(value: OrchestratorError) -> Self {
        let correlation_id = Uuid::new_v4().to_string();
        let detail = value.to_string();
        let interface = match value {
            // Validation messages are returned verbatim.
            OrchestratorError::InvalidRequest(message) => {
                InterfaceError::BadRequest { message, correlation_id }
            }
            OrchestratorError::Settlement(
                error @ (SettlementError::InvalidBalanceLoad(_)
                | SettlementError::InvalidRefund(_)
                | SettlementError::TaskClosed(_)),
            ) => InterfaceError::BadRequest { message: error.to_string(), correlation_id },
            other => ApplicationError::from(other).into_interface(correlation_id),
        };
        match &interface {
            InterfaceError::BadRequest { .. } | InterfaceError::NotFound { .. } => warn!(
                event_name = "api.request_rejected",
                correlation_id = %interface.correlation_id(),
                error = %detail,
                "request rejected"
            ),
            _ => error!(
                event_name = "api.request_failed",
                correlation_id = %interface.correlation_id(),
                error = %detail,
                "request failed"
            ),
        }
        Self(interface)
    }
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        let interface = InterfaceError::BadRequest {
            message: message.into(),
            correlation_id: Uuid::new_v4().to_string(),
        };
        warn!(
            event_name = "api.request_rejected",
            correlation_id = %interface.correlation_id(),
            "request rejected"
        );
        Self(interface)
    }

    fn turn_aborted(join_error: tokio::task::JoinError) -> Self {
        let correlation_id = Uuid::new_v4().to_string();
        error!(
            event_name = "api.turn_aborted",
            correlation_id = %correlation_id,
            error = %join_error,
            "turn task ended without a result"
        );
        Self(InterfaceError::Internal { message: "turn processing aborted".to_owned(), correlation_id })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
            InterfaceError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            InterfaceError::ServiceUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
            }
            InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        let message = match &self.0 {
            InterfaceError::BadRequest { message, .. } | InterfaceError::NotFound { message, .. } => {
                message.clone()
            }
            other => other.user_message().to_string(),
        };
        let body = ApiErrorBody {
            error: code,
            message,
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(orchestrator: Arc<TaskOrchestrator>) -> Router {
    Router::new()
        .route("/api/turns", post(process_turn))
        .route("/api/tasks/{task_id}", get(task_summary))
        .route("/api/tasks/{task_id}/ledger", get(task_ledger))
        .route("/api/tasks/{task_id}/balance", post(load_balance))
        .route("/api/ledger", get(rail_ledger))
        .route("/api/agents", get(list_agents))
        .with_state(ApiState { orchestrator })
}

async fn process_turn(
    State(state): State<ApiState>,
    Json(body): Json<TurnBody>,
) -> Result<Json<TurnResponse>, ApiError> {
    let request = TurnRequest {
        history: body.history,
        utterance: body.utterance,
        task_id: body.task_id.filter(|id| !id.trim().is_empty()).map(TaskId),
        max_budget: body.max_budget,
    };
    // The turn runs detached from the request so a client disconnect cannot
    // cancel it between invocation and settlement.
    let orchestrator = Arc::clone(&state.orchestrator);
    let result = tokio::spawn(async move { orchestrator.process_turn(request).await })
        .await
        .map_err(ApiError::turn_aborted)??;
    info!(
        event_name = "api.turn_completed",
        task_id = %result.task_id,
        status = result.status.as_str(),
        "turn served"
    );

    Ok(Json(TurnResponse {
        failure_code: result.failure_reason.map(|reason| reason.public_code()),
        result,
    }))
}

async fn task_summary(
    Path(task_id): Path<String>,
    State(state): State<ApiState>,
) -> Result<Json<TaskSummary>, ApiError> {
    let summary = state.orchestrator.get_task_summary(&TaskId(task_id)).await?;
    Ok(Json(summary))
}

async fn task_ledger(
    Path(task_id): Path<String>,
    State(state): State<ApiState>,
) -> Result<Json<LedgerResponse>, ApiError> {
    let task_id = TaskId(task_id);
    let entries = state.orchestrator.task_ledger(&task_id).await?;
    Ok(Json(LedgerResponse { task_id, entries }))
}

async fn rail_ledger(
    Query(query): Query<RailQuery>,
    State(state): State<ApiState>,
) -> Result<Json<RailLedgerResponse>, ApiError> {
    let rail = Rail::parse(&query.rail).ok_or_else(|| {
        ApiError::bad_request(format!("unknown rail `{}`, expected internal or external", query.rail))
    })?;
    let limit = query.limit.unwrap_or(DEFAULT_RAIL_LIMIT).clamp(1, MAX_RAIL_LIMIT);
    let entries = state.orchestrator.ledger_by_rail(rail, limit).await?;
    Ok(Json(RailLedgerResponse { rail, entries }))
}

async fn load_balance(
    Path(task_id): Path<String>,
    State(state): State<ApiState>,
    Json(body): Json<BalanceBody>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let task_id = TaskId(task_id);
    let (task, entry) = state.orchestrator.load_balance(&task_id, body.amount, &body.memo).await?;
    info!(
        event_name = "api.balance_loaded",
        task_id = %task_id,
        amount = %entry.amount,
        "balance loaded"
    );
    Ok(Json(BalanceResponse { task, entry }))
}

async fn list_agents(State(state): State<ApiState>) -> Json<AgentsResponse> {
    Json(AgentsResponse { agents: state.orchestrator.list_agents().await })
}
