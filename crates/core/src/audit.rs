//! Audit trail
//!
//! Settlement and turn decisions are recorded as [`AuditEvent`]s. The task,
//! step and money an event concerns are typed fields, so a sink can filter
//! by step or total a rail without parsing strings. Anything else rides in
//! `detail`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::step::StepId;
use crate::domain::task::TaskId;
use crate::ledger::{EntryType, LedgerEntry, Rail};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Turn,
    Settlement,
    Ledger,
    Reasoning,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Turn => "turn",
            Self::Settlement => "settlement",
            Self::Ledger => "ledger",
            Self::Reasoning => "reasoning",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

/// One money movement an event recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditCharge {
    pub rail: Rail,
    pub entry_type: EntryType,
    pub amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub category: AuditCategory,
    pub outcome: AuditOutcome,
    pub actor: String,
    pub task_id: Option<TaskId>,
    pub step_id: Option<StepId>,
    pub charges: Vec<AuditCharge>,
    pub detail: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        event_type: impl Into<String>,
        category: AuditCategory,
        actor: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            category,
            outcome,
            actor: actor.into(),
            task_id: None,
            step_id: None,
            charges: Vec::new(),
            detail: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn for_task(mut self, task_id: &TaskId) -> Self {
        self.task_id = Some(task_id.clone());
        self
    }

    pub fn for_step(mut self, step_id: &StepId) -> Self {
        self.step_id = Some(step_id.clone());
        self
    }

    pub fn with_charge(mut self, rail: Rail, entry_type: EntryType, amount: Decimal) -> Self {
        self.charges.push(AuditCharge { rail, entry_type, amount });
        self
    }

    /// Records every committed entry as a charge.
    pub fn with_entries(self, entries: &[LedgerEntry]) -> Self {
        entries.iter().fold(self, |event, entry| {
            event.with_charge(entry.rail, entry.entry_type, entry.amount)
        })
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }

    /// Net signed amount this event moved on `rail`.
    pub fn rail_total(&self, rail: Rail) -> Decimal {
        self.charges
            .iter()
            .filter(|charge| charge.rail == rail)
            .map(|charge| match charge.entry_type {
                EntryType::Refund => -charge.amount,
                EntryType::BalanceLoad => Decimal::ZERO,
                _ => charge.amount,
            })
            .sum()
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn emit(&self, _event: AuditEvent) {}
}

/// Keeps events in memory for assertions.
#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<AuditEvent> {
        self.events().into_iter().filter(|event| event.event_type == event_type).collect()
    }

    pub fn events_for_step(&self, step_id: &StepId) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.step_id.as_ref() == Some(step_id))
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}
