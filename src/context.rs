//! Transaction record and the state derived from its audit trail.
//!
//! The approval status is never stored. It is replayed from the audit trail
//! against the chain resolved at request time, so a state change cannot exist
//! without the entry that caused it.
use chrono::Utc;
use serde::Serialize;

use super::audit::{AuditEventType, AuditLogEntry};
use super::entry::StockEntry;
use super::rules::ChainStep;
use super::types::{Actor, ApprovalStatus, DocStatus, TimeStamp};

pub const TRANSACTION_HRP: &str = "se_";

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Signature {
    #[n(0)]
    pub role: String,
    #[n(1)]
    #[serde(skip)]
    pub image: String,
    #[n(2)]
    pub digest: String,
    #[n(3)]
    pub timestamp: TimeStamp<Utc>,
    #[n(4)]
    pub user: String,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionRecord {
    #[n(0)]
    pub id: String, // uuid7, use bech32
    #[n(1)]
    pub owner: String,
    #[n(2)]
    pub entry: StockEntry,
    #[n(3)]
    pub chain: Vec<ChainStep>, // resolved on approval request
    #[n(4)]
    pub signatures: Vec<Signature>,
    #[n(5)]
    pub version: u64,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
}

impl TransactionRecord {
    pub fn new(id: String, owner: &str, entry: StockEntry) -> Self {
        Self {
            id,
            owner: owner.to_string(),
            entry,
            chain: vec![],
            signatures: vec![],
            version: 0,
            created_at: TimeStamp::new(),
        }
    }

    pub fn set_signature(&mut self, signature: Signature) {
        self.signatures.retain(|s| s.role != signature.role);
        self.signatures.push(signature);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionContext {
    pub record: TransactionRecord,
    pub trail: Vec<AuditLogEntry>, // sequence order
}

impl TransactionContext {
    pub fn new(record: TransactionRecord) -> Self {
        Self {
            record,
            trail: vec![],
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn version(&self) -> u64 {
        self.record.version
    }

    pub fn insert_entry(&mut self, entry: AuditLogEntry) {
        self.trail.push(entry);
    }

    pub fn next_sequence(&self) -> u64 {
        self.trail.last().map(|e| e.sequence + 1).unwrap_or(0)
    }

    pub fn total_levels(&self) -> u8 {
        self.record.chain.len() as u8
    }

    /// Replays the trail. Entries that do not fit the state at their point in
    /// the trail are ignored, and the first terminal state reached is final.
    pub fn current_state(&self) -> ApprovalStatus {
        self.replay().0
    }

    /// When the current pending level was entered.
    pub fn pending_since(&self) -> Option<TimeStamp<Utc>> {
        self.replay().1
    }

    fn replay(&self) -> (ApprovalStatus, Option<TimeStamp<Utc>>) {
        let total = self.total_levels();
        let mut state = ApprovalStatus::Draft;
        let mut since = None;

        for entry in &self.trail {
            if state.is_terminal() {
                break;
            }
            let next = match (entry.event_type, state) {
                (AuditEventType::ApprovalRequested, ApprovalStatus::Draft) if total > 0 => {
                    ApprovalStatus::Pending(1)
                }
                (AuditEventType::ApprovalGranted, ApprovalStatus::Pending(n)) if n >= total => {
                    ApprovalStatus::FullyApproved
                }
                (AuditEventType::ApprovalGranted, ApprovalStatus::Pending(n)) => ApprovalStatus::Pending(n + 1),
                (AuditEventType::ApprovalRejected, ApprovalStatus::Pending(_)) => ApprovalStatus::Rejected,
                _ => continue,
            };
            since = next.is_pending().then(|| entry.timestamp.clone());
            state = next;
        }

        (state, since)
    }

    pub fn doc_status(&self) -> DocStatus {
        let mut status = DocStatus::Draft;
        for entry in &self.trail {
            status = match (entry.event_type, status) {
                (AuditEventType::Submitted, DocStatus::Draft) => DocStatus::Submitted,
                (AuditEventType::Cancelled, DocStatus::Submitted) => DocStatus::Cancelled,
                _ => status,
            };
        }
        status
    }

    pub fn requires_approval(&self) -> bool {
        self.current_state().is_pending()
    }

    /// Step awaiting a decision, if the transaction is pending.
    pub fn current_step(&self) -> Option<&ChainStep> {
        let level = self.current_state().pending_level()?;
        self.record.chain.get(usize::from(level).checked_sub(1)?)
    }

    pub fn can_approve(&self, actor: &Actor) -> bool {
        self.current_step().is_some_and(|step| step.accepts(actor))
    }

    /// Any approver named in the chain may reject.
    pub fn can_reject(&self, actor: &Actor) -> bool {
        self.requires_approval() && self.record.chain.iter().any(|step| step.accepts(actor))
    }

    pub fn signature(&self, role: &str) -> Option<&Signature> {
        self.record.signatures.iter().find(|s| s.role == role)
    }

    /// Entries in sequence order, limited to approval events.
    pub fn view_history(&self) -> impl Iterator<Item = &AuditLogEntry> {
        self.trail.iter().filter(|e| e.event_type.is_approval_event())
    }
}
