//! Property-based tests for approval state derivation
//!
//! The approval status of a stock entry is never stored, it is replayed from
//! the audit trail against the chain resolved at request time. Bugs here would
//! let an entry skip levels or leave a terminal state, so these tests throw
//! arbitrary event sequences at the replay and check the invariants that must
//! hold for all of them.
//!
//! Persistence and authorization are covered by the scenario tests.

use proptest::prelude::*;
use stock_approval::{
    audit::{AuditEventType, AuditLogEntry},
    context::{TransactionContext, TransactionRecord},
    entry::StockEntry,
    rules::ChainStep,
    types::{Actor, ApprovalStatus, DocStatus},
};

const ID: &str = "se_1test";

fn event_strategy() -> impl Strategy<Value = AuditEventType> {
    prop_oneof![
        Just(AuditEventType::Created),
        Just(AuditEventType::Modified),
        Just(AuditEventType::Submitted),
        Just(AuditEventType::Cancelled),
        Just(AuditEventType::ApprovalRequested),
        Just(AuditEventType::ApprovalGranted),
        Just(AuditEventType::ApprovalGranted),
        Just(AuditEventType::ApprovalRejected),
        Just(AuditEventType::SignatureAdded),
        Just(AuditEventType::Escalated),
        Just(AuditEventType::CommentAdded),
    ]
}

fn chain(levels: u8) -> Vec<ChainStep> {
    (1..=levels)
        .map(|level| ChainStep {
            level,
            rule_level: level,
            approver_role: format!("Approver {level}"),
            alternative_roles: vec![],
            escalation_days: None,
        })
        .collect()
}

fn context(levels: u8, events: &[AuditEventType]) -> TransactionContext {
    let mut record = TransactionRecord::new(ID.to_string(), "clerk", StockEntry::new().set_movement_type("311"));
    record.chain = chain(levels);
    let mut ctx = TransactionContext::new(record);
    let actor = Actor::new("user", &["Approver 1"]);
    for event in events {
        let mut entry = AuditLogEntry::new(ID, *event, &actor);
        entry.sequence = ctx.next_sequence();
        ctx.insert_entry(entry);
    }
    ctx
}

fn workflow_strategy() -> impl Strategy<Value = (u8, Vec<AuditEventType>)> {
    (0u8..=5, prop::collection::vec(event_strategy(), 0..=20))
}

// allowed moves from one replayed state to the next
fn is_valid_step(from: ApprovalStatus, to: ApprovalStatus, total: u8) -> bool {
    match (from, to) {
        (a, b) if a == b => true,
        (ApprovalStatus::Draft, ApprovalStatus::Pending(1)) => total > 0,
        (ApprovalStatus::Pending(n), ApprovalStatus::Pending(m)) => m == n + 1 && m <= total,
        (ApprovalStatus::Pending(n), ApprovalStatus::FullyApproved) => n == total,
        (ApprovalStatus::Pending(_), ApprovalStatus::Rejected) => true,
        _ => false,
    }
}

proptest! {
    /// Deriving the state twice from the same trail gives the same answer
    #[test]
    fn state_derivation_is_idempotent((levels, events) in workflow_strategy()) {
        let ctx = context(levels, &events);
        prop_assert_eq!(ctx.current_state(), ctx.current_state());
        prop_assert_eq!(ctx.pending_since(), ctx.pending_since());
    }

    /// Every prefix of the trail moves the state by at most one legal step
    #[test]
    fn status_only_progresses_forward((levels, events) in workflow_strategy()) {
        let mut previous = ApprovalStatus::Draft;
        for end in 0..=events.len() {
            let state = context(levels, &events[..end]).current_state();
            prop_assert!(
                is_valid_step(previous, state, levels),
                "{:?} -> {:?} with {} levels after {:?}",
                previous, state, levels, &events[..end]
            );
            previous = state;
        }
    }

    /// Once terminal, no further entry changes the state
    #[test]
    fn terminal_states_are_stable(
        levels in 1u8..=5,
        reject_at in prop::option::of(0u8..5),
        tail in prop::collection::vec(event_strategy(), 1..=10),
    ) {
        let mut events = vec![AuditEventType::ApprovalRequested];
        let grants = reject_at.map(|r| r.min(levels - 1)).unwrap_or(levels);
        events.extend(std::iter::repeat_n(AuditEventType::ApprovalGranted, usize::from(grants)));
        if reject_at.is_some() {
            events.push(AuditEventType::ApprovalRejected);
        }

        let terminal = context(levels, &events).current_state();
        prop_assert!(terminal.is_terminal());

        events.extend(tail);
        prop_assert_eq!(context(levels, &events).current_state(), terminal);
    }

    /// A pending level never exceeds the chain length
    #[test]
    fn pending_level_is_within_chain((levels, events) in workflow_strategy()) {
        let ctx = context(levels, &events);
        if let Some(level) = ctx.current_state().pending_level() {
            prop_assert!(level >= 1 && level <= levels);
            prop_assert_eq!(ctx.current_step().map(|s| s.level), Some(level));
            prop_assert!(ctx.pending_since().is_some());
        } else {
            prop_assert!(ctx.current_step().is_none());
        }
        prop_assert_eq!(ctx.requires_approval(), ctx.current_state().is_pending());
    }

    /// Without a chain nothing can leave Draft
    #[test]
    fn empty_chain_stays_draft(events in prop::collection::vec(event_strategy(), 0..=20)) {
        prop_assert_eq!(context(0, &events).current_state(), ApprovalStatus::Draft);
    }

    /// Document status ignores approval events
    #[test]
    fn doc_status_follows_submit_and_cancel((levels, events) in workflow_strategy()) {
        let ctx = context(levels, &events);
        let submitted = events.iter().position(|e| *e == AuditEventType::Submitted);
        let expected = match submitted {
            None => DocStatus::Draft,
            Some(at) if events[at..].contains(&AuditEventType::Cancelled) => DocStatus::Cancelled,
            Some(_) => DocStatus::Submitted,
        };
        prop_assert_eq!(ctx.doc_status(), expected);
    }
}

#[test]
fn empty_trail_is_draft() {
    let ctx = context(3, &[]);
    assert_eq!(ctx.current_state(), ApprovalStatus::Draft);
    assert_eq!(ctx.doc_status(), DocStatus::Draft);
    assert_eq!(ctx.pending_since(), None);
    assert_eq!(ctx.view_history().count(), 0);
}

#[test]
fn approval_workflow_happy_path() {
    use AuditEventType::*;
    let ctx = context(2, &[Created, ApprovalRequested, CommentAdded, ApprovalGranted]);
    assert_eq!(ctx.current_state(), ApprovalStatus::Pending(2));
    assert_eq!(ctx.view_history().count(), 2);

    let ctx = context(2, &[Created, ApprovalRequested, ApprovalGranted, ApprovalGranted]);
    assert_eq!(ctx.current_state(), ApprovalStatus::FullyApproved);
    assert!(!ctx.requires_approval());
}
