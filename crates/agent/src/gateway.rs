//! Invocation gateway
//!
//! One HTTP round trip per call to an agent worker's `POST /execute`, bounded
//! by a timeout and normalized into an [`InvocationResult`]. The gateway never
//! retries and never touches the ledger.

use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use bazaar_core::domain::agent::Agent;
use bazaar_core::domain::invocation::{InvocationFailureKind, InvocationResult, InvocationSuccess};

const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

#[async_trait]
pub trait InvocationGateway: Send + Sync {
    async fn invoke(&self, agent: &Agent, payload: &Value, timeout: Duration) -> InvocationResult;

    /// Liveness check against the agent's health endpoint.
    async fn probe(&self, agent: &Agent, timeout: Duration) -> bool;
}

#[derive(Clone)]
pub struct HttpInvocationGateway {
    client: Client,
}

impl HttpInvocationGateway {
    pub fn new() -> Result<Self, GatewayError> {
        let client = Client::builder().build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn round_trip(
        &self,
        url: &str,
        payload: &Value,
    ) -> Result<DecodedExecute, (InvocationFailureKind, String)> {
        let response =
            self.client.post(url).json(payload).send().await.map_err(transport_failure)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err((
                InvocationFailureKind::RejectedByAgent,
                format!("agent returned {status}: {}", truncate(&body)),
            ));
        }

        let body: Value = response.json().await.map_err(|error| {
            (InvocationFailureKind::ProtocolError, format!("undecodable response body: {error}"))
        })?;
        decode_execute_body(&body)
    }
}

#[async_trait]
impl InvocationGateway for HttpInvocationGateway {
    async fn invoke(&self, agent: &Agent, payload: &Value, timeout: Duration) -> InvocationResult {
        let url = endpoint_url(&agent.endpoint, "execute");
        let started = Instant::now();

        let outcome = tokio::time::timeout(timeout, self.round_trip(&url, payload)).await;
        let duration_ms = elapsed_ms(started);

        match outcome {
            Ok(Ok(decoded)) => {
                debug!(
                    event_name = "gateway.invoke.succeeded",
                    agent_id = %agent.id,
                    duration_ms,
                    "agent invocation succeeded"
                );
                InvocationResult::Success(InvocationSuccess {
                    output: decoded.output,
                    declared_internal_cost: decoded.cost,
                    requires_external_tool: decoded.requires_external_tool,
                    declared_external_cost: decoded.external_cost,
                    duration_ms,
                })
            }
            Ok(Err((kind, message))) => {
                warn!(
                    event_name = "gateway.invoke.failed",
                    agent_id = %agent.id,
                    failure_kind = kind.as_str(),
                    duration_ms,
                    error = %message,
                    "agent invocation failed"
                );
                InvocationResult::failure(kind, message, duration_ms)
            }
            Err(_) => {
                warn!(
                    event_name = "gateway.invoke.timed_out",
                    agent_id = %agent.id,
                    timeout_ms = timeout.as_millis() as u64,
                    "agent invocation timed out"
                );
                InvocationResult::failure(
                    InvocationFailureKind::Timeout,
                    format!("no response within {}ms", timeout.as_millis()),
                    duration_ms,
                )
            }
        }
    }

    async fn probe(&self, agent: &Agent, timeout: Duration) -> bool {
        let url = endpoint_url(&agent.endpoint, "health");
        match tokio::time::timeout(timeout, self.client.get(&url).send()).await {
            Ok(Ok(response)) => response.status().is_success(),
            Ok(Err(error)) => {
                debug!(
                    event_name = "gateway.probe.failed",
                    agent_id = %agent.id,
                    error = %error,
                    "agent health probe failed"
                );
                false
            }
            Err(_) => false,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct DecodedExecute {
    output: String,
    cost: Decimal,
    requires_external_tool: bool,
    external_cost: Decimal,
}

/// Decodes `{result, cost, requires_external_tool, external_cost}`.
fn decode_execute_body(body: &Value) -> Result<DecodedExecute, (InvocationFailureKind, String)> {
    let protocol = |message: String| (InvocationFailureKind::ProtocolError, message);

    let object = body.as_object().ok_or_else(|| protocol("response is not an object".into()))?;
    let output = match object.get("result") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => return Err(protocol("response has no `result`".into())),
        Some(other) => other.to_string(),
    };
    let cost = match object.get("cost") {
        Some(value) => decimal_field("cost", value).map_err(protocol)?,
        None => return Err(protocol("response has no `cost`".into())),
    };
    let requires_external_tool = match object.get("requires_external_tool") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Null) | None => false,
        Some(other) => {
            return Err(protocol(format!("`requires_external_tool` is not a boolean: {other}")))
        }
    };
    let external_cost = match object.get("external_cost") {
        Some(Value::Null) | None => Decimal::ZERO,
        Some(value) => decimal_field("external_cost", value).map_err(protocol)?,
    };

    Ok(DecodedExecute { output, cost, requires_external_tool, external_cost })
}

fn decimal_field(name: &str, value: &Value) -> Result<Decimal, String> {
    let raw = match value {
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.trim().to_string(),
        other => return Err(format!("`{name}` is not a number: {other}")),
    };
    let amount = Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|error| format!("`{name}` is not a decimal amount `{raw}`: {error}"))?;
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(format!("`{name}` must not be negative, got {amount}"));
    }
    Ok(amount)
}

fn transport_failure(error: reqwest::Error) -> (InvocationFailureKind, String) {
    let kind = if error.is_timeout() {
        InvocationFailureKind::Timeout
    } else if error.is_decode() {
        InvocationFailureKind::ProtocolError
    } else {
        InvocationFailureKind::Unreachable
    };
    (kind, error.to_string())
}

fn endpoint_url(endpoint: &str, path: &str) -> String {
    format!("{}/{path}", endpoint.trim_end_matches('/'))
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
