//! Read-side queries for approvers and the overdue escalation sweep
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use tracing::{error, info};

use super::audit::{AuditEventType, AuditLogEntry, Urgency, days_pending};
use super::context::TransactionContext;
use super::error::WorkflowError;
use super::service::{ApprovalService, BulkFailure, Escalation};
use super::types::{Actor, TimeStamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingApproval {
    pub transaction_id: String,
    pub movement_type: Option<String>,
    pub purpose: Option<String>,
    pub owner: String,
    pub current_level: u8,
    pub total_levels: u8,
    pub approver_role: String,
    pub requested_at: Option<TimeStamp<Utc>>,
    pub days_pending: i64,
    pub urgency: Urgency,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApprovalStatistics {
    pub pending_count: usize,
    pub approved_this_month: usize,
    pub rejected_this_month: usize,
    pub overdue_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub escalated: Vec<Escalation>,
    pub failed: Vec<BulkFailure>,
}

fn requested_at(ctx: &TransactionContext) -> Option<TimeStamp<Utc>> {
    ctx.trail
        .iter()
        .filter(|e| e.event_type == AuditEventType::ApprovalRequested)
        .map(|e| e.timestamp.clone())
        .max()
}

impl ApprovalService {
    // a record that cannot be loaded is logged and skipped, not fatal
    fn pending_contexts(&self) -> Result<Vec<TransactionContext>, WorkflowError> {
        let mut pending = Vec::new();
        for id in self.store.ids()? {
            match self.store.load(&id) {
                Ok(ctx) if ctx.requires_approval() => pending.push(ctx),
                Ok(_) => {}
                Err(e) => error!(id = %id, error = %e, "skipping unreadable transaction"),
            }
        }
        Ok(pending)
    }

    /// Pending entries the actor can approve now, most recent request first.
    pub fn pending_for(
        &self,
        actor: &Actor,
        movement_type: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<PendingApproval>, WorkflowError> {
        let mut rows: Vec<PendingApproval> = self
            .pending_contexts()?
            .into_iter()
            .filter(|ctx| ctx.can_approve(actor))
            .filter(|ctx| movement_type.is_none_or(|code| ctx.record.entry.movement_type.as_deref() == Some(code)))
            .filter_map(|ctx| {
                let step = ctx.current_step()?.clone();
                let days = days_pending(&ctx.trail, now).unwrap_or(0);
                Some(PendingApproval {
                    transaction_id: ctx.record.id.clone(),
                    movement_type: ctx.record.entry.movement_type.clone(),
                    purpose: ctx.record.entry.purpose.clone(),
                    owner: ctx.record.owner.clone(),
                    current_level: step.level,
                    total_levels: ctx.total_levels(),
                    approver_role: step.approver_role,
                    requested_at: requested_at(&ctx),
                    days_pending: days,
                    urgency: self.urgency.classify(days),
                    version: ctx.version(),
                })
            })
            .collect();
        rows.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(rows)
    }

    pub fn statistics(&self, actor: &Actor, now: DateTime<Utc>) -> Result<ApprovalStatistics, WorkflowError> {
        let pending = self.pending_for(actor, None, now)?;
        let this_month = |e: &AuditLogEntry| {
            let at = e.timestamp.to_datetime_utc();
            at.year() == now.year() && at.month() == now.month()
        };
        let decisions = self.store.audit().by_user(
            &actor.user,
            &[AuditEventType::ApprovalGranted, AuditEventType::ApprovalRejected],
        )?;
        let count = |event: AuditEventType| {
            decisions
                .iter()
                .filter(|e| e.event_type == event && this_month(e))
                .count()
        };

        Ok(ApprovalStatistics {
            pending_count: pending.len(),
            approved_this_month: count(AuditEventType::ApprovalGranted),
            rejected_this_month: count(AuditEventType::ApprovalRejected),
            overdue_count: pending.iter().filter(|p| p.urgency == Urgency::High).count(),
        })
    }

    /// Approvals and rejections recorded by the actor, newest first.
    pub fn my_history(&self, actor: &Actor, limit: usize) -> Result<Vec<AuditLogEntry>, WorkflowError> {
        let mut entries = self.store.audit().by_user(
            &actor.user,
            &[AuditEventType::ApprovalGranted, AuditEventType::ApprovalRejected],
        )?;
        entries.truncate(limit);
        Ok(entries)
    }

    /// Escalates every pending entry whose current level has waited at least
    /// its rule's `escalation_days`. Each level is escalated once.
    pub fn escalate_overdue(&self, actor: &Actor, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let ids = match self.store.ids() {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "escalation sweep could not list transactions");
                return report;
            }
        };

        for id in ids {
            let ctx = match self.store.load(&id) {
                Ok(ctx) => ctx,
                Err(e) => {
                    error!(id = %id, error = %e, "escalation sweep could not load transaction");
                    report.failed.push(BulkFailure {
                        id,
                        code: e.error_code(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            let Some(step) = ctx.current_step() else {
                continue;
            };
            report.checked += 1;

            let (Some(limit), Some(since)) = (step.escalation_days, ctx.pending_since()) else {
                continue;
            };
            let already = ctx
                .trail
                .iter()
                .any(|e| e.event_type == AuditEventType::Escalated && e.approval_level == Some(step.level) && e.timestamp >= since);
            if already || since.days_until(now) < i64::from(limit) {
                continue;
            }

            let reason = format!("Pending at level {} for more than {limit} day(s)", step.level);
            match self.escalate(&id, actor, Some(&reason)) {
                Ok(escalation) => report.escalated.push(escalation),
                Err(e) => {
                    error!(id = %id, error = %e, "escalation failed");
                    report.failed.push(BulkFailure {
                        id,
                        code: e.error_code(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            checked = report.checked,
            escalated = report.escalated.len(),
            failed = report.failed.len(),
            "escalation sweep finished"
        );
        report
    }
}
