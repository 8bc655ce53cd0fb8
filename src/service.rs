//! Service layer API for stock entry approval operations
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::audit::{AuditEventType, AuditLogEntry, Urgency, UrgencyPolicy, days_pending};
use super::context::{Signature, TRANSACTION_HRP, TransactionContext, TransactionRecord};
use super::entry::StockEntry;
use super::error::{ConfigurationWarning, ValidationError, WorkflowError};
use super::material::{BomLine, MaterialAssessment, StockLevels, ZonePolicy, assess};
use super::movement::{MovementType, MovementTypeRegistry};
use super::rules::{ChainStep, PredicateFailure, RuleEngine};
use super::store::Store;
use super::types::{Actor, ApprovalStatus, DocStatus, TimeStamp};
use super::utils::{new_uuid_to_bech32, signature_digest};

const WAREHOUSE_SUPERVISOR: &str = "Warehouse Supervisor";
const KITTING_SUPERVISOR: &str = "Kitting Supervisor";
const SYSTEM_MANAGER: &str = "System Manager";

/// An approver's decision on the current level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decision {
    pub comments: Option<String>,
    /// Captured signature image, stored under the level's role.
    pub signature: Option<String>,
    /// Version the caller last observed, usually from `approval_summary`.
    pub expected_version: Option<u64>,
}

impl Decision {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn comments(mut self, comments: &str) -> Self {
        self.comments = Some(comments.to_string());
        self
    }
    pub fn signature(mut self, image: &str) -> Self {
        self.signature = Some(image.to_string());
        self
    }
    pub fn expect_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApprovalOutcome {
    NotRequired,
    Requested,
    Advanced,
    FullyApproved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionResult {
    pub success: bool,
    pub message: String,
    pub outcome: ApprovalOutcome,
    pub status: ApprovalStatus,
    pub version: u64,
    pub warnings: Vec<ConfigurationWarning>,
    pub failures: Vec<PredicateFailure>,
}

impl TransitionResult {
    fn new(outcome: ApprovalOutcome, message: String, ctx: &TransactionContext) -> Self {
        Self {
            success: outcome != ApprovalOutcome::NotRequired,
            message,
            outcome,
            status: ctx.current_state(),
            version: ctx.version(),
            warnings: vec![],
            failures: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Escalation {
    pub transaction_id: String,
    pub level: u8,
    /// Roles that should be told about the escalation.
    pub notify: Vec<String>,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalSummary {
    pub transaction_id: String,
    pub current_level: u8,
    pub total_levels: u8,
    pub current_status: ApprovalStatus,
    pub doc_status: DocStatus,
    pub can_approve: bool,
    pub approval_history: Vec<AuditLogEntry>,
    pub approval_rules: Vec<ChainStep>,
    pub version: u64,
    pub days_pending: Option<i64>,
    pub urgency: Option<Urgency>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkFailure {
    pub id: String,
    pub code: &'static str,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkApproval {
    pub succeeded: Vec<String>,
    pub failed: Vec<BulkFailure>,
}

pub struct ApprovalService {
    pub(crate) store: Store,
    pub(crate) registry: MovementTypeRegistry,
    pub(crate) rules: RuleEngine,
    pub(crate) urgency: UrgencyPolicy,
    pub(crate) zones: ZonePolicy,
}

impl ApprovalService {
    pub fn new(
        instance: Arc<sled::Db>,
        registry: MovementTypeRegistry,
        rules: RuleEngine,
    ) -> Result<Self, WorkflowError> {
        Ok(Self {
            store: Store::open(instance)?,
            registry,
            rules,
            urgency: UrgencyPolicy::default(),
            zones: ZonePolicy::default(),
        })
    }

    pub fn with_policies(mut self, urgency: UrgencyPolicy, zones: ZonePolicy) -> Self {
        self.urgency = urgency;
        self.zones = zones;
        self
    }

    pub fn registry(&self) -> &MovementTypeRegistry {
        &self.registry
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Load transaction context from database
    pub fn transaction(&self, id: &str) -> Result<TransactionContext, WorkflowError> {
        self.store.load(id)
    }

    // load, then reject stale callers before doing any work
    fn load_expecting(&self, id: &str, expected_version: Option<u64>) -> Result<TransactionContext, WorkflowError> {
        let ctx = self.store.load(id)?;
        match expected_version {
            Some(expected) if expected != ctx.version() => Err(WorkflowError::Conflict {
                id: id.to_string(),
                expected,
                found: ctx.version(),
            }),
            _ => Ok(ctx),
        }
    }

    // bump the version, sequence the entries and write them with the record
    fn commit(
        &self,
        mut ctx: TransactionContext,
        entries: Vec<AuditLogEntry>,
    ) -> Result<TransactionContext, WorkflowError> {
        ctx.record.version += 1;
        let mut sequenced = Vec::with_capacity(entries.len());
        for mut entry in entries {
            entry.sequence = ctx.next_sequence() + sequenced.len() as u64;
            sequenced.push(entry);
        }
        self.store.commit(&ctx.record, &sequenced)?;
        ctx.trail.extend(sequenced);
        Ok(ctx)
    }

    /// Creates a draft stock entry owned by `actor`.
    pub fn create_transaction(&self, entry: StockEntry, actor: &Actor) -> Result<TransactionContext, WorkflowError> {
        if let Some(code) = entry.movement_type.as_deref() {
            self.registry.lookup(code)?;
        }
        let id = new_uuid_to_bech32(TRANSACTION_HRP).map_err(|e| WorkflowError::Codec(e.to_string()))?;
        let ctx = TransactionContext::new(TransactionRecord::new(id.clone(), &actor.user, entry));

        let created = AuditLogEntry::new(&id, AuditEventType::Created, actor).status(ApprovalStatus::Draft);
        let ctx = self.commit(ctx, vec![created])?;
        info!(id = %ctx.id(), user = %actor.user, "stock entry created");
        Ok(ctx)
    }

    /// Replaces the draft's contents, recording one `Modified` entry per
    /// changed field.
    pub fn update_entry(
        &self,
        id: &str,
        entry: StockEntry,
        actor: &Actor,
        expected_version: Option<u64>,
    ) -> Result<TransactionContext, WorkflowError> {
        let mut ctx = self.load_expecting(id, expected_version)?;
        if ctx.doc_status() != DocStatus::Draft || ctx.current_state() != ApprovalStatus::Draft {
            return Err(ValidationError::NotEditable.into());
        }
        if entry.movement_type != ctx.record.entry.movement_type {
            if let Some(code) = entry.movement_type.as_deref() {
                self.registry.lookup(code)?;
            }
        }

        let changes = ctx.record.entry.diff(&entry);
        if changes.is_empty() {
            return Ok(ctx);
        }
        let entries = changes
            .into_iter()
            .map(|change| AuditLogEntry::new(id, AuditEventType::Modified, actor).change(change))
            .collect::<Vec<_>>();
        debug!(id, changed = entries.len(), "stock entry modified");

        ctx.record.entry = entry;
        self.commit(ctx, entries)
    }

    /// `Draft -> Pending(1)`. Short-circuits with `NotRequired` when the
    /// movement type does not need approval or no rule applies.
    pub fn request_approval(&self, id: &str, actor: &Actor) -> Result<TransitionResult, WorkflowError> {
        let mut ctx = self.store.load(id)?;
        if ctx.doc_status() != DocStatus::Draft {
            return Err(ValidationError::AlreadySubmitted.into());
        }
        let state = ctx.current_state();
        if state != ApprovalStatus::Draft {
            return Err(ValidationError::InvalidTransition {
                from: state,
                action: "request approval",
            }
            .into());
        }

        let entry = &ctx.record.entry;
        let code = entry.movement_code()?.to_string();
        let snapshot = entry.snapshot(&ctx.record.owner);
        let movement = self.registry.validate_for_transaction(&code, &snapshot)?;

        if !movement.requires_approval {
            info!(id, movement_type = %code, "approval not required");
            return Ok(TransitionResult::new(
                ApprovalOutcome::NotRequired,
                format!("Approval not required for movement type {code}"),
                &ctx,
            ));
        }

        let resolution = self.rules.resolve_chain(&code, &snapshot);
        if resolution.steps.is_empty() {
            info!(id, movement_type = %code, "no approval rule applies");
            let mut result = TransitionResult::new(
                ApprovalOutcome::NotRequired,
                format!("No approval rules apply to movement type {code}"),
                &ctx,
            );
            result.warnings = resolution.warnings;
            result.failures = resolution.failures;
            return Ok(result);
        }

        let total = resolution.total_levels();
        ctx.record.chain = resolution.steps;
        let requested = AuditLogEntry::new(id, AuditEventType::ApprovalRequested, actor)
            .level(1)
            .status(ApprovalStatus::Pending(1))
            .comments(Some(&format!("{total} approval level(s) required")));
        let ctx = self.commit(ctx, vec![requested])?;
        info!(id, movement_type = %code, total_levels = total, "approval requested");

        let mut result = TransitionResult::new(
            ApprovalOutcome::Requested,
            format!("Approval requested, {total} level(s) required"),
            &ctx,
        );
        result.warnings = resolution.warnings;
        result.failures = resolution.failures;
        Ok(result)
    }

    /// `Pending(n) -> Pending(n + 1) | FullyApproved`.
    pub fn approve(&self, id: &str, actor: &Actor, decision: Decision) -> Result<TransitionResult, WorkflowError> {
        let mut ctx = self.load_expecting(id, decision.expected_version)?;
        let state = ctx.current_state();
        let (Some(level), Some(step)) = (state.pending_level(), ctx.current_step().cloned()) else {
            return Err(ValidationError::InvalidTransition {
                from: state,
                action: "approve",
            }
            .into());
        };
        if !step.accepts(actor) {
            warn!(id, user = %actor.user, level, required = %step.approver_role, "approval denied");
            return Err(WorkflowError::AuthorizationDenied {
                user: actor.user.clone(),
                required_role: step.approver_role,
                level,
            });
        }

        let next = if level >= ctx.total_levels() {
            ApprovalStatus::FullyApproved
        } else {
            ApprovalStatus::Pending(level + 1)
        };

        let mut granted = AuditLogEntry::new(id, AuditEventType::ApprovalGranted, actor)
            .level(level)
            .status(next)
            .comments(decision.comments.as_deref());
        if let Some(image) = decision.signature.filter(|s| !s.trim().is_empty()) {
            let digest = signature_digest(&image);
            ctx.record.set_signature(Signature {
                role: step.approver_role.clone(),
                image,
                digest: digest.clone(),
                timestamp: TimeStamp::new(),
                user: actor.user.clone(),
            });
            granted = granted.signature(digest);
        }

        let ctx = self.commit(ctx, vec![granted])?;
        info!(id, user = %actor.user, level, status = %next, "approval granted");

        let (outcome, message) = match next {
            ApprovalStatus::FullyApproved => (ApprovalOutcome::FullyApproved, "Stock entry fully approved".to_string()),
            _ => (ApprovalOutcome::Advanced, format!("Level {level} approved, moved to {next}")),
        };
        Ok(TransitionResult::new(outcome, message, &ctx))
    }

    /// `Pending(n) -> Rejected`. Any approver named in the chain may reject.
    pub fn reject(
        &self,
        id: &str,
        actor: &Actor,
        reason: &str,
        expected_version: Option<u64>,
    ) -> Result<TransitionResult, WorkflowError> {
        let ctx = self.load_expecting(id, expected_version)?;
        let state = ctx.current_state();
        let Some(level) = state.pending_level() else {
            return Err(ValidationError::InvalidTransition {
                from: state,
                action: "reject",
            }
            .into());
        };
        if reason.trim().is_empty() {
            return Err(ValidationError::RejectionReasonRequired.into());
        }
        if !ctx.can_reject(actor) {
            let required_role = ctx
                .current_step()
                .map(|s| s.approver_role.clone())
                .unwrap_or_default();
            warn!(id, user = %actor.user, level, "rejection denied");
            return Err(WorkflowError::AuthorizationDenied {
                user: actor.user.clone(),
                required_role,
                level,
            });
        }

        let rejected = AuditLogEntry::new(id, AuditEventType::ApprovalRejected, actor)
            .level(level)
            .status(ApprovalStatus::Rejected)
            .comments(Some(reason));
        let ctx = self.commit(ctx, vec![rejected])?;
        info!(id, user = %actor.user, level, "approval rejected");

        Ok(TransitionResult::new(
            ApprovalOutcome::Rejected,
            format!("Rejected at level {level}"),
            &ctx,
        ))
    }

    /// Captures a signature for a role the actor holds.
    pub fn add_signature(
        &self,
        id: &str,
        actor: &Actor,
        role: &str,
        image: &str,
    ) -> Result<TransactionContext, WorkflowError> {
        let mut ctx = self.store.load(id)?;
        if ctx.doc_status() == DocStatus::Cancelled {
            return Err(ValidationError::NotEditable.into());
        }
        if image.trim().is_empty() {
            return Err(ValidationError::MissingSignature { role: role.to_string() }.into());
        }
        if !actor.has_role(role) {
            return Err(WorkflowError::AuthorizationDenied {
                user: actor.user.clone(),
                required_role: role.to_string(),
                level: ctx.current_state().pending_level().unwrap_or(0),
            });
        }

        let digest = signature_digest(image);
        ctx.record.set_signature(Signature {
            role: role.to_string(),
            image: image.to_string(),
            digest: digest.clone(),
            timestamp: TimeStamp::new(),
            user: actor.user.clone(),
        });
        let added = AuditLogEntry::new(id, AuditEventType::SignatureAdded, actor)
            .comments(Some(&format!("{role} signature")))
            .signature(digest);
        let ctx = self.commit(ctx, vec![added])?;
        info!(id, user = %actor.user, role, "signature added");
        Ok(ctx)
    }

    pub fn add_comment(&self, id: &str, actor: &Actor, text: &str) -> Result<TransactionContext, WorkflowError> {
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyComment.into());
        }
        let ctx = self.store.load(id)?;
        let status = ctx.current_state();
        let comment = AuditLogEntry::new(id, AuditEventType::CommentAdded, actor)
            .status(status)
            .comments(Some(text));
        self.commit(ctx, vec![comment])
    }

    /// Submits the stock entry once approval is complete (or not needed) and
    /// the signatures its movement type calls for are present.
    pub fn submit(&self, id: &str, actor: &Actor) -> Result<TransactionContext, WorkflowError> {
        let ctx = self.store.load(id)?;
        if ctx.doc_status() != DocStatus::Draft {
            return Err(ValidationError::AlreadySubmitted.into());
        }
        let code = ctx.record.entry.movement_code()?.to_string();
        let snapshot = ctx.record.entry.snapshot(&ctx.record.owner);
        let movement = self.registry.validate_for_transaction(&code, &snapshot)?;

        let state = ctx.current_state();
        let approval_needed = movement.requires_approval
            && (state != ApprovalStatus::Draft || !self.rules.resolve_chain(&code, &snapshot).steps.is_empty());
        if approval_needed && state != ApprovalStatus::FullyApproved {
            return Err(ValidationError::ApprovalIncomplete(state).into());
        }

        for role in required_signatures(&movement) {
            if ctx.signature(role).is_none() {
                return Err(ValidationError::MissingSignature { role: role.to_string() }.into());
            }
        }

        let allowed = movement.authorization_level.submitting_roles();
        if !allowed.is_empty() && !actor.has_any_role(allowed) {
            return Err(ValidationError::InsufficientAuthorization {
                code,
                level: movement.authorization_level.label().to_string(),
            }
            .into());
        }

        let submitted = AuditLogEntry::new(id, AuditEventType::Submitted, actor).status(state);
        let ctx = self.commit(ctx, vec![submitted])?;
        info!(id, user = %actor.user, "stock entry submitted");
        Ok(ctx)
    }

    pub fn cancel(&self, id: &str, actor: &Actor, reason: Option<&str>) -> Result<TransactionContext, WorkflowError> {
        let ctx = self.store.load(id)?;
        if ctx.doc_status() != DocStatus::Submitted {
            return Err(ValidationError::NotSubmitted.into());
        }
        let cancelled = AuditLogEntry::new(id, AuditEventType::Cancelled, actor)
            .status(ctx.current_state())
            .comments(reason);
        let ctx = self.commit(ctx, vec![cancelled])?;
        info!(id, user = %actor.user, "stock entry cancelled");
        Ok(ctx)
    }

    /// Records an escalation on a pending entry. The status does not change.
    pub fn escalate(&self, id: &str, actor: &Actor, reason: Option<&str>) -> Result<Escalation, WorkflowError> {
        let ctx = self.store.load(id)?;
        let state = ctx.current_state();
        let Some(level) = state.pending_level() else {
            return Err(ValidationError::InvalidTransition {
                from: state,
                action: "escalate",
            }
            .into());
        };

        let notify: Vec<String> = match ctx.record.chain.get(usize::from(level)) {
            Some(next) => next.roles().map(str::to_string).collect(),
            None => vec![SYSTEM_MANAGER.to_string()],
        };
        let escalated = AuditLogEntry::new(id, AuditEventType::Escalated, actor)
            .level(level)
            .status(state)
            .comments(reason.or(Some("Approval overdue")));
        let ctx = self.commit(ctx, vec![escalated])?;
        warn!(id, level, notify = ?notify, "approval escalated");

        Ok(Escalation {
            transaction_id: id.to_string(),
            level,
            notify,
            version: ctx.version(),
        })
    }

    pub fn approval_summary(&self, id: &str, actor: &Actor) -> Result<ApprovalSummary, WorkflowError> {
        let ctx = self.store.load(id)?;
        let state = ctx.current_state();
        let current_level = match state {
            ApprovalStatus::Pending(level) => level,
            ApprovalStatus::FullyApproved => ctx.total_levels(),
            _ => 0,
        };
        let days = state
            .is_pending()
            .then(|| days_pending(&ctx.trail, Utc::now()))
            .flatten();

        Ok(ApprovalSummary {
            transaction_id: id.to_string(),
            current_level,
            total_levels: ctx.total_levels(),
            current_status: state,
            doc_status: ctx.doc_status(),
            can_approve: ctx.can_approve(actor),
            approval_history: self.store.audit().approval_history(id)?,
            approval_rules: ctx.record.chain.clone(),
            version: ctx.version(),
            days_pending: days,
            urgency: days.map(|d| self.urgency.classify(d)),
        })
    }

    /// Approves each id independently; one failure never stops the rest.
    pub fn bulk_approve(&self, ids: &[String], actor: &Actor, comments: Option<&str>) -> BulkApproval {
        let mut result = BulkApproval::default();
        for id in ids {
            let decision = Decision {
                comments: comments.map(str::to_string),
                ..Default::default()
            };
            match self.approve(id, actor, decision) {
                Ok(_) => result.succeeded.push(id.clone()),
                Err(e) => {
                    warn!(id = %id, error = %e, "bulk approval item failed");
                    result.failed.push(BulkFailure {
                        id: id.clone(),
                        code: e.error_code(),
                        error: e.to_string(),
                    });
                }
            }
        }
        info!(
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            "bulk approval finished"
        );
        result
    }

    pub fn movement_type_details(&self, code: &str) -> Result<MovementType, WorkflowError> {
        self.registry.lookup(code)
    }

    pub fn movement_types_for_purpose(&self, purpose: &str) -> Vec<MovementType> {
        self.registry.suggest_by_purpose(purpose)
    }

    pub fn work_order_material_status(
        &self,
        work_order: &str,
        work_order_qty: u64,
        lines: &[BomLine],
        stock: &impl StockLevels,
    ) -> MaterialAssessment {
        assess(work_order, work_order_qty, lines, stock, &self.zones)
    }
}

fn required_signatures(movement: &MovementType) -> Vec<&'static str> {
    let mut roles = Vec::new();
    if movement.requires_approval {
        roles.push(WAREHOUSE_SUPERVISOR);
    }
    if movement.is_production_transfer() {
        roles.push(KITTING_SUPERVISOR);
    }
    roles
}
