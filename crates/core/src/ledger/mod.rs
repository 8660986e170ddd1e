//! Two-rail settlement ledger records and their tamper-evident seal.
//!
//! Entries are chained per task: each one carries the hash of its
//! predecessor, a hash over its own material, and an HMAC over that hash.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::step::StepId;
use crate::domain::task::TaskId;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerEntryId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rail {
    Internal,
    External,
}

impl Rail {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "internal" => Some(Self::Internal),
            "external" => Some(Self::External),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    AgentPayment,
    PlatformFee,
    Refund,
    CardSpend,
    BalanceLoad,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentPayment => "agent_payment",
            Self::PlatformFee => "platform_fee",
            Self::Refund => "refund",
            Self::CardSpend => "card_spend",
            Self::BalanceLoad => "balance_load",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "agent_payment" => Some(Self::AgentPayment),
            "platform_fee" => Some(Self::PlatformFee),
            "refund" => Some(Self::Refund),
            "card_spend" => Some(Self::CardSpend),
            "balance_load" => Some(Self::BalanceLoad),
            _ => None,
        }
    }
}

/// An entry that has been decided on but not yet sequenced or sealed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntryDraft {
    pub step_id: Option<StepId>,
    pub rail: Rail,
    pub entry_type: EntryType,
    pub amount: Decimal,
    pub counterparty: String,
    pub memo: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub task_id: TaskId,
    pub step_id: Option<StepId>,
    pub sequence: u32,
    pub rail: Rail,
    pub entry_type: EntryType,
    pub amount: Decimal,
    pub counterparty: String,
    pub memo: String,
    pub created_at: DateTime<Utc>,
    pub prev_hash: Option<String>,
    pub entry_hash: String,
    pub signature: String,
}

impl LedgerEntry {
    /// Amount as it counts toward cost: refunds are negative and balance
    /// loads fund the task without costing anything.
    pub fn signed_amount(&self) -> Decimal {
        match self.entry_type {
            EntryType::Refund => -self.amount,
            EntryType::BalanceLoad => Decimal::ZERO,
            _ => self.amount,
        }
    }
}

/// Per-rail cost totals recomputed from ledger entries.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub internal_total: Decimal,
    pub external_total: Decimal,
    pub total: Decimal,
}

impl CostBreakdown {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Self {
        let mut breakdown = Self::default();
        for entry in entries {
            match entry.rail {
                Rail::Internal => breakdown.internal_total += entry.signed_amount(),
                Rail::External => breakdown.external_total += entry.signed_amount(),
            }
        }
        breakdown.total = breakdown.internal_total + breakdown.external_total;
        breakdown
    }

    /// Net amount charged on `rail` for a single step.
    pub fn step_rail_total(entries: &[LedgerEntry], step_id: &StepId, rail: Rail) -> Decimal {
        entries
            .iter()
            .filter(|entry| entry.rail == rail && entry.step_id.as_ref() == Some(step_id))
            .map(LedgerEntry::signed_amount)
            .sum()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub task_id: TaskId,
    pub valid: bool,
    pub verified_entries: usize,
    pub latest_hash: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Clone)]
pub struct LedgerSealer {
    signing_key: Vec<u8>,
}

impl std::fmt::Debug for LedgerSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerSealer").field("signing_key", &"[redacted]").finish()
    }
}

impl LedgerSealer {
    pub fn new(signing_key: impl AsRef<[u8]>) -> Self {
        Self { signing_key: signing_key.as_ref().to_vec() }
    }

    /// Sequences and seals `drafts` so they extend the chain ending at `previous`.
    pub fn seal(
        &self,
        task_id: &TaskId,
        previous: Option<&LedgerEntry>,
        drafts: Vec<LedgerEntryDraft>,
    ) -> Vec<LedgerEntry> {
        let mut sequence = previous.map(|entry| entry.sequence).unwrap_or(0);
        let mut prev_hash = previous.map(|entry| entry.entry_hash.clone());
        let created_at = Utc::now();

        drafts
            .into_iter()
            .map(|draft| {
                sequence = sequence.saturating_add(1);
                let mut entry = LedgerEntry {
                    id: LedgerEntryId(Uuid::new_v4().to_string()),
                    task_id: task_id.clone(),
                    step_id: draft.step_id,
                    sequence,
                    rail: draft.rail,
                    entry_type: draft.entry_type,
                    amount: draft.amount,
                    counterparty: draft.counterparty,
                    memo: draft.memo,
                    created_at,
                    prev_hash: prev_hash.clone(),
                    entry_hash: String::new(),
                    signature: String::new(),
                };
                entry.entry_hash = hash_entry_material(&entry);
                entry.signature = hmac_hex(&self.signing_key, entry.entry_hash.as_bytes());
                prev_hash = Some(entry.entry_hash.clone());
                entry
            })
            .collect()
    }

    /// Walks a task's entries in sequence order and reports the first broken link.
    pub fn verify_chain(&self, task_id: &TaskId, entries: &[LedgerEntry]) -> VerificationResult {
        let mut previous_hash: Option<String> = None;
        for (index, entry) in entries.iter().enumerate() {
            let broken = |reason: String, latest_hash: Option<String>| VerificationResult {
                task_id: task_id.clone(),
                valid: false,
                verified_entries: index,
                latest_hash,
                failure_reason: Some(reason),
            };

            if entry.task_id != *task_id {
                return broken(
                    format!("entry {} belongs to task {}", entry.id.0, entry.task_id),
                    previous_hash,
                );
            }

            let expected_sequence = u32::try_from(index).unwrap_or(u32::MAX).saturating_add(1);
            if entry.sequence != expected_sequence {
                return broken(
                    format!(
                        "sequence mismatch at entry {}: expected {}, found {}",
                        entry.id.0, expected_sequence, entry.sequence
                    ),
                    previous_hash,
                );
            }

            if entry.prev_hash != previous_hash {
                return broken(format!("previous hash mismatch at entry {}", entry.id.0), previous_hash);
            }

            if hash_entry_material(entry) != entry.entry_hash {
                return broken(format!("entry hash mismatch at entry {}", entry.id.0), previous_hash);
            }

            if hmac_hex(&self.signing_key, entry.entry_hash.as_bytes()) != entry.signature {
                return broken(format!("signature mismatch at entry {}", entry.id.0), previous_hash);
            }

            previous_hash = Some(entry.entry_hash.clone());
        }

        VerificationResult {
            task_id: task_id.clone(),
            valid: true,
            verified_entries: entries.len(),
            latest_hash: previous_hash,
            failure_reason: None,
        }
    }
}

fn hash_entry_material(entry: &LedgerEntry) -> String {
    let material = format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
        entry.id.0,
        entry.task_id.0,
        entry.step_id.as_ref().map(|id| id.0.as_str()).unwrap_or(""),
        entry.sequence,
        entry.rail.as_str(),
        entry.entry_type.as_str(),
        entry.amount.normalize(),
        entry.counterparty,
        entry.memo,
        entry.created_at.to_rfc3339(),
        entry.prev_hash.as_deref().unwrap_or(""),
    );
    sha256_hex(material.as_bytes())
}

fn hmac_hex(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return sha256_hex(payload),
    };
    mac.update(payload);
    encode_hex(mac.finalize().into_bytes().as_slice())
}

fn sha256_hex(payload: &[u8]) -> String {
    encode_hex(Sha256::digest(payload).as_slice())
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{CostBreakdown, EntryType, LedgerEntryDraft, LedgerSealer, Rail};
    use crate::domain::step::StepId;
    use crate::domain::task::TaskId;

    fn draft(step: &str, rail: Rail, entry_type: EntryType, amount: Decimal) -> LedgerEntryDraft {
        LedgerEntryDraft {
            step_id: Some(StepId(step.to_owned())),
            rail,
            entry_type,
            amount,
            counterparty: "summarizer".to_owned(),
            memo: "summarize".to_owned(),
        }
    }

    #[test]
    fn seal_links_entries_and_continues_sequence() {
        let sealer = LedgerSealer::new("secret-key");
        let task_id = TaskId("task-ledger-1".to_owned());

        let first = sealer.seal(
            &task_id,
            None,
            vec![draft("s-1", Rail::Internal, EntryType::AgentPayment, Decimal::new(30, 2))],
        );
        let second = sealer.seal(
            &task_id,
            first.last(),
            vec![
                draft("s-2", Rail::Internal, EntryType::AgentPayment, Decimal::new(5, 2)),
                draft("s-2", Rail::External, EntryType::CardSpend, Decimal::new(5, 2)),
            ],
        );

        assert_eq!(first[0].sequence, 1);
        assert_eq!(first[0].prev_hash, None);
        assert_eq!(second[0].sequence, 2);
        assert_eq!(second[1].sequence, 3);
        assert_eq!(second[0].prev_hash.as_deref(), Some(first[0].entry_hash.as_str()));
        assert_eq!(second[1].prev_hash.as_deref(), Some(second[0].entry_hash.as_str()));

        let chain: Vec<_> = first.into_iter().chain(second).collect();
        let result = sealer.verify_chain(&task_id, &chain);
        assert!(result.valid, "{:?}", result.failure_reason);
        assert_eq!(result.verified_entries, 3);
    }

    #[test]
    fn verify_chain_accepts_empty_ledger() {
        let sealer = LedgerSealer::new("secret-key");
        let result = sealer.verify_chain(&TaskId("empty".to_owned()), &[]);
        assert!(result.valid);
        assert_eq!(result.verified_entries, 0);
    }

    #[test]
    fn verify_chain_detects_amount_tampering() {
        let sealer = LedgerSealer::new("secret-key");
        let task_id = TaskId("task-ledger-2".to_owned());
        let mut chain = sealer.seal(
            &task_id,
            None,
            vec![
                draft("s-1", Rail::Internal, EntryType::AgentPayment, Decimal::new(30, 2)),
                draft("s-2", Rail::Internal, EntryType::AgentPayment, Decimal::new(40, 2)),
            ],
        );
        chain[1].amount = Decimal::new(1, 2);

        let result = sealer.verify_chain(&task_id, &chain);
        assert!(!result.valid);
        assert_eq!(result.verified_entries, 1);
        assert!(result.failure_reason.unwrap_or_default().contains("entry hash mismatch"));
    }

    #[test]
    fn verify_chain_rejects_foreign_signing_key() {
        let task_id = TaskId("task-ledger-3".to_owned());
        let chain = LedgerSealer::new("secret-key").seal(
            &task_id,
            None,
            vec![draft("s-1", Rail::Internal, EntryType::AgentPayment, Decimal::ONE)],
        );

        let result = LedgerSealer::new("other-key").verify_chain(&task_id, &chain);
        assert!(!result.valid);
        assert!(result.failure_reason.unwrap_or_default().contains("signature mismatch"));
    }

    #[test]
    fn cost_breakdown_sums_rails_and_subtracts_refunds() {
        let sealer = LedgerSealer::new("k");
        let task_id = TaskId("task-ledger-4".to_owned());
        let entries = sealer.seal(
            &task_id,
            None,
            vec![
                draft("s-1", Rail::Internal, EntryType::AgentPayment, Decimal::new(5, 2)),
                draft("s-1", Rail::External, EntryType::CardSpend, Decimal::new(5, 2)),
                draft("s-1", Rail::Internal, EntryType::Refund, Decimal::new(2, 2)),
            ],
        );

        let breakdown = CostBreakdown::from_entries(&entries);
        assert_eq!(breakdown.internal_total, Decimal::new(3, 2));
        assert_eq!(breakdown.external_total, Decimal::new(5, 2));
        assert_eq!(breakdown.total, Decimal::new(8, 2));
        assert_eq!(
            CostBreakdown::step_rail_total(&entries, &StepId("s-1".to_owned()), Rail::Internal),
            Decimal::new(3, 2)
        );
    }

    #[test]
    fn balance_loads_do_not_count_as_cost() {
        let sealer = LedgerSealer::new("k");
        let task_id = TaskId("task-ledger-5".to_owned());
        let entries = sealer.seal(
            &task_id,
            None,
            vec![
                LedgerEntryDraft {
                    step_id: None,
                    rail: Rail::External,
                    entry_type: EntryType::BalanceLoad,
                    amount: Decimal::new(100, 0),
                    counterparty: "customer_wallet".to_owned(),
                    memo: "top up".to_owned(),
                },
                draft("s-1", Rail::External, EntryType::CardSpend, Decimal::new(5, 2)),
            ],
        );

        assert_eq!(entries[0].signed_amount(), Decimal::ZERO);
        let breakdown = CostBreakdown::from_entries(&entries);
        assert_eq!(breakdown.external_total, Decimal::new(5, 2));
        assert_eq!(breakdown.total, Decimal::new(5, 2));
    }
}
