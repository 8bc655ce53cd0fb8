//! Append-only audit trail, one sled tree keyed by `<transaction id>/<sequence>`
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::entry::FieldChange;
use super::error::WorkflowError;
use super::types::{Actor, ApprovalStatus, TimeStamp};

pub const AUDIT_TREE: &str = "audit";

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditEventType {
    #[n(0)]
    Created,
    #[n(1)]
    Modified,
    #[n(2)]
    Submitted,
    #[n(3)]
    Cancelled,
    #[n(4)]
    ApprovalRequested,
    #[n(5)]
    ApprovalGranted,
    #[n(6)]
    ApprovalRejected,
    #[n(7)]
    SignatureAdded,
    #[n(8)]
    Escalated,
    #[n(9)]
    CommentAdded,
}

impl AuditEventType {
    /// Events shown in an approval history.
    pub fn is_approval_event(&self) -> bool {
        matches!(
            self,
            Self::ApprovalRequested | Self::ApprovalGranted | Self::ApprovalRejected | Self::Escalated
        )
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Created => "Created",
            Self::Modified => "Modified",
            Self::Submitted => "Submitted",
            Self::Cancelled => "Cancelled",
            Self::ApprovalRequested => "Approval Requested",
            Self::ApprovalGranted => "Approval Granted",
            Self::ApprovalRejected => "Approval Rejected",
            Self::SignatureAdded => "Signature Added",
            Self::Escalated => "Escalated",
            Self::CommentAdded => "Comment Added",
        };
        f.write_str(label)
    }
}

impl Serialize for AuditEventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditLogEntry {
    #[n(0)]
    pub sequence: u64,
    #[n(1)]
    pub transaction_id: String,
    #[n(2)]
    pub timestamp: TimeStamp<Utc>,
    #[n(3)]
    pub event_type: AuditEventType,
    #[n(4)]
    pub user: String,
    #[n(5)]
    pub user_role: Option<String>,
    #[n(6)]
    pub approval_level: Option<u8>,
    #[n(7)]
    pub approval_status: Option<ApprovalStatus>,
    #[n(8)]
    pub field_changed: Option<String>,
    #[n(9)]
    pub previous_value: Option<String>,
    #[n(10)]
    pub new_value: Option<String>,
    #[n(11)]
    pub comments: Option<String>,
    #[n(12)]
    pub signature_digest: Option<String>,
}

impl AuditLogEntry {
    pub fn new(transaction_id: &str, event_type: AuditEventType, actor: &Actor) -> Self {
        Self {
            sequence: 0,
            transaction_id: transaction_id.to_string(),
            timestamp: TimeStamp::new(),
            event_type,
            user: actor.user.clone(),
            user_role: actor.primary_role(),
            approval_level: None,
            approval_status: None,
            field_changed: None,
            previous_value: None,
            new_value: None,
            comments: None,
            signature_digest: None,
        }
    }
    pub fn at(mut self, timestamp: TimeStamp<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
    pub fn level(mut self, level: u8) -> Self {
        self.approval_level = Some(level);
        self
    }
    pub fn status(mut self, status: ApprovalStatus) -> Self {
        self.approval_status = Some(status);
        self
    }
    pub fn change(mut self, change: FieldChange) -> Self {
        self.field_changed = Some(change.field.to_string());
        self.previous_value = change.previous;
        self.new_value = change.new;
        self
    }
    pub fn comments(mut self, comments: Option<&str>) -> Self {
        self.comments = comments
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        self
    }
    pub fn signature(mut self, digest: String) -> Self {
        self.signature_digest = Some(digest);
        self
    }

    pub fn key(&self) -> String {
        entry_key(&self.transaction_id, self.sequence)
    }
}

pub(crate) fn entry_key(transaction_id: &str, sequence: u64) -> String {
    format!("{transaction_id}/{sequence:020}")
}

fn prefix(transaction_id: &str) -> String {
    format!("{transaction_id}/")
}

pub struct AuditLog {
    tree: sled::Tree,
}

impl AuditLog {
    pub fn open(db: &sled::Db) -> Result<Self, WorkflowError> {
        Ok(Self {
            tree: db.open_tree(AUDIT_TREE)?,
        })
    }

    pub(crate) fn tree(&self) -> &sled::Tree {
        &self.tree
    }

    /// Sequence the next entry for a transaction will carry.
    pub fn next_sequence(&self, transaction_id: &str) -> Result<u64, WorkflowError> {
        match self.tree.scan_prefix(prefix(transaction_id)).next_back() {
            Some(item) => {
                let (_, value) = item?;
                let last: AuditLogEntry = minicbor::decode(&value)?;
                Ok(last.sequence + 1)
            }
            None => Ok(0),
        }
    }

    /// Inserts an entry under its sequence key. Appending the identical entry
    /// twice is harmless; a different entry under a taken key is a conflict.
    pub fn append(&self, entry: &AuditLogEntry) -> Result<(), WorkflowError> {
        let key = entry.key();
        let bytes = minicbor::to_vec(entry)?;
        match self.tree.compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(bytes.as_slice()))? {
            Ok(()) => Ok(()),
            Err(existing) if existing.current.as_deref() == Some(bytes.as_slice()) => Ok(()),
            Err(_) => Err(WorkflowError::Conflict {
                id: key,
                expected: entry.sequence,
                found: self.next_sequence(&entry.transaction_id)?,
            }),
        }
    }

    fn decode_all(&self, iter: sled::Iter) -> Result<Vec<AuditLogEntry>, WorkflowError> {
        iter.map(|item| -> Result<AuditLogEntry, WorkflowError> {
            let (_, value) = item?;
            Ok(minicbor::decode(&value)?)
        })
        .collect()
    }

    /// Entries in sequence order, the order they were committed in.
    pub fn trail(&self, transaction_id: &str) -> Result<Vec<AuditLogEntry>, WorkflowError> {
        self.decode_all(self.tree.scan_prefix(prefix(transaction_id)))
    }

    /// Entries ordered by timestamp, ties broken by sequence.
    pub fn query_by_transaction(&self, transaction_id: &str) -> Result<Vec<AuditLogEntry>, WorkflowError> {
        let mut entries = self.trail(transaction_id)?;
        entries.sort_by(|a, b| (&a.timestamp, a.sequence).cmp(&(&b.timestamp, b.sequence)));
        debug!(transaction_id, count = entries.len(), "audit trail queried");
        Ok(entries)
    }

    pub fn approval_history(&self, transaction_id: &str) -> Result<Vec<AuditLogEntry>, WorkflowError> {
        Ok(self
            .query_by_transaction(transaction_id)?
            .into_iter()
            .filter(|e| e.event_type.is_approval_event())
            .collect())
    }

    pub fn field_changes(
        &self,
        transaction_id: &str,
        field: Option<&str>,
    ) -> Result<Vec<AuditLogEntry>, WorkflowError> {
        Ok(self
            .query_by_transaction(transaction_id)?
            .into_iter()
            .filter(|e| e.event_type == AuditEventType::Modified)
            .filter(|e| field.is_none_or(|f| e.field_changed.as_deref() == Some(f)))
            .collect())
    }

    /// Every entry recorded by `user` across transactions, optionally limited
    /// to some event types. Newest first.
    pub fn by_user(&self, user: &str, events: &[AuditEventType]) -> Result<Vec<AuditLogEntry>, WorkflowError> {
        let mut entries: Vec<AuditLogEntry> = self
            .decode_all(self.tree.iter())?
            .into_iter()
            .filter(|e| e.user == user)
            .filter(|e| events.is_empty() || events.contains(&e.event_type))
            .collect();
        entries.sort_by(|a, b| (&b.timestamp, b.sequence).cmp(&(&a.timestamp, a.sequence)));
        Ok(entries)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Urgency {
    Low,
    Medium,
    High,
}

/// Days-pending thresholds. A request pending more than `high_after_days`
/// is High, more than `medium_after_days` is Medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UrgencyPolicy {
    pub medium_after_days: i64,
    pub high_after_days: i64,
}

impl Default for UrgencyPolicy {
    fn default() -> Self {
        Self {
            medium_after_days: 1,
            high_after_days: 3,
        }
    }
}

impl UrgencyPolicy {
    pub fn classify(&self, days_pending: i64) -> Urgency {
        if days_pending > self.high_after_days {
            Urgency::High
        } else if days_pending > self.medium_after_days {
            Urgency::Medium
        } else {
            Urgency::Low
        }
    }
}

/// Days since the most recent approval request in a trail.
pub fn days_pending(trail: &[AuditLogEntry], now: DateTime<Utc>) -> Option<i64> {
    trail
        .iter()
        .filter(|e| e.event_type == AuditEventType::ApprovalRequested)
        .max_by_key(|e| (e.timestamp.clone(), e.sequence))
        .map(|e| e.timestamp.days_until(now))
}
