//! Smoke Screen Unit tests for stock approval components
//!
//! These tests exercise the public API of each module in isolation from the
//! workflow scenarios. They are intended as smoke-screen and mostly test the
//! happy-path.
//!

use std::collections::HashMap;

use stock_approval::{
    audit::{Urgency, UrgencyPolicy},
    entry::{StockEntry, StockEntryItem},
    material::{BomLine, ZonePolicy, ZoneStatus, assess},
    movement::{AuthorizationLevel, MovementTypeRegistry, StaticMovementTypes, StockMovementType},
    predicate::{EvaluationLimits, Predicate, PredicateError},
    rules::{ApprovalRule, DuplicateRulePolicy, RuleEngine, StaticApprovalRules},
    types::{Actor, ApprovalStatus, TimeStamp},
    utils::{new_uuid_to_bech32, signature_digest},
};

// UTILS MODULE TESTS
#[cfg(test)]
mod utils_tests {
    use super::*;

    /// Identifiers are bech32 encoded under the given human readable prefix
    #[test]
    fn generates_valid_bech32_with_hrp() {
        let encoded = new_uuid_to_bech32("se_").unwrap();
        assert!(encoded.starts_with("se_1"));
        assert!(encoded.len() > 10);
    }

    #[test]
    fn handles_empty_hrp() {
        assert!(new_uuid_to_bech32("").is_err());
    }

    #[test]
    fn generates_unique_ids() {
        let id1 = new_uuid_to_bech32("se_").unwrap();
        let id2 = new_uuid_to_bech32("se_").unwrap();
        assert_ne!(id1, id2);
    }

    #[test]
    fn signature_digest_is_stable_hex() {
        let a = signature_digest("data:image/png;base64,AAAA");
        assert_eq!(a, signature_digest("data:image/png;base64,AAAA"));
        assert_ne!(a, signature_digest("data:image/png;base64,AAAB"));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

// TYPES MODULE TESTS
#[cfg(test)]
mod types_tests {
    use super::*;

    #[test]
    fn timestamps_order_chronologically() {
        let earlier = TimeStamp::new_with(2025, 1, 1, 8, 0, 0).unwrap();
        let later = TimeStamp::new_with(2025, 1, 1, 9, 0, 0).unwrap();
        assert!(earlier < later);
        assert_eq!(earlier.days_until(later.to_datetime_utc()), 0);
    }

    #[test]
    fn actor_role_checks() {
        let actor = Actor::new("ops@example.com", &["Stock User", "Warehouse Manager"]);
        assert!(actor.has_role("Stock User"));
        assert!(!actor.has_role("stock user"));
        assert!(actor.has_any_role(&["Director", "Warehouse Manager"]));
        assert_eq!(actor.primary_role().as_deref(), Some("Warehouse Manager"));
    }

    #[test]
    fn pending_status_reports_level() {
        assert!(ApprovalStatus::Pending(1).is_pending());
        assert!(!ApprovalStatus::Draft.is_terminal());
        assert_eq!(ApprovalStatus::Draft.pending_level(), None);
    }
}

// MOVEMENT MODULE TESTS
#[cfg(test)]
mod movement_tests {
    use super::*;

    #[test]
    fn default_codes_are_loaded() {
        let registry = MovementTypeRegistry::new(StaticMovementTypes::defaults()).unwrap();
        let codes: Vec<_> = registry.active(None).into_iter().map(|mt| mt.code).collect();
        assert_eq!(codes, vec!["101", "201", "261", "303", "311"]);
        assert!(registry.warnings().is_empty());
    }

    #[test]
    fn consumption_needs_no_approval() {
        let registry = MovementTypeRegistry::new(StaticMovementTypes::defaults()).unwrap();
        let mt = registry.lookup("261").unwrap();
        assert!(!mt.requires_approval);
        assert_eq!(mt.stock_movement_type, StockMovementType::Decrease);
        assert!(!mt.is_production_transfer());
    }

    #[test]
    fn authorization_levels_order() {
        assert!(AuthorizationLevel::User < AuthorizationLevel::Director);
        assert!(AuthorizationLevel::Supervisor.submitting_roles().is_empty());
        assert!(AuthorizationLevel::Director.submitting_roles().contains(&"Director"));
    }
}

// PREDICATE MODULE TESTS
#[cfg(test)]
mod predicate_tests {
    use super::*;

    fn entry() -> StockEntry {
        StockEntry::new()
            .set_movement_type("311")
            .set_purpose("Material Transfer for Manufacture")
            .set_from_warehouse("Stores - RND")
            .add_item(StockEntryItem::new("RM-1", 40).set_value(12_000))
            .add_item(StockEntryItem::new("RM-2", 10).set_value(500))
    }

    #[test]
    fn evaluates_against_entry_snapshot() {
        let snapshot = entry().snapshot("clerk@example.com");
        let limits = EvaluationLimits::default();
        let holds = |source: &str| Predicate::parse(source).unwrap().evaluate(&snapshot, &limits).unwrap();

        assert!(holds("stock_entry.total_value > 10000"));
        assert!(holds("total_qty == 50 and item_count == 2"));
        assert!(holds("purpose contains \"Manufacture\""));
        assert!(holds("to_warehouse == null"));
        assert!(!holds("not (from_warehouse == \"Stores - RND\")"));
        assert!(holds("owner == \"clerk@example.com\" || total_qty < 0"));
    }

    #[test]
    fn unknown_fields_do_not_parse() {
        let err = Predicate::parse("stock_entry.price > 1").unwrap_err();
        assert!(matches!(err, PredicateError::UnknownField(_)));
        assert_eq!(Predicate::parse("  total_qty > 1 ").unwrap().source(), "total_qty > 1");
    }
}

// RULES MODULE TESTS
#[cfg(test)]
mod rules_tests {
    use super::*;

    #[test]
    fn default_chain_for_kitting_transfer() {
        let engine = RuleEngine::new(
            StaticApprovalRules::defaults(),
            DuplicateRulePolicy::default(),
            EvaluationLimits::default(),
        )
        .unwrap();
        let snapshot = StockEntry::new().set_movement_type("311").snapshot("clerk");
        let resolution = engine.resolve_chain("311", &snapshot);

        let roles: Vec<_> = resolution.steps.iter().map(|s| s.approver_role.as_str()).collect();
        assert_eq!(roles, vec!["Warehouse Supervisor", "Kitting Supervisor"]);
        assert!(resolution.steps.iter().all(|s| s.escalation_days == Some(2)));
        assert!(engine.resolve_chain("261", &snapshot).steps.is_empty());
    }

    #[test]
    fn registration_rejects_bad_rules() {
        assert!(StaticApprovalRules::new(vec![ApprovalRule::new("201", 0, "Director")]).is_err());
        assert!(StaticApprovalRules::new(vec![ApprovalRule::new("201", 6, "Director")]).is_err());
        let err = StaticApprovalRules::new(vec![ApprovalRule::new("201", 1, "Director").when("total_value >")]);
        assert_eq!(err.err().map(|e| e.error_code()), Some("VALIDATION_FAILED"));
    }
}

// MATERIAL MODULE TESTS
#[cfg(test)]
mod material_tests {
    use super::*;

    fn bom() -> Vec<BomLine> {
        ["RM-1", "RM-2", "RM-3", "RM-4"]
            .into_iter()
            .map(|code| BomLine {
                item_code: code.to_string(),
                item_name: format!("{code} name"),
                qty_per_unit: 2,
                warehouse: "Stores - RND".to_string(),
            })
            .collect()
    }

    #[test]
    fn zone_follows_completion() {
        let mut stock: HashMap<(String, String), u64> = HashMap::new();
        stock.insert(("RM-1".into(), "Stores - RND".into()), 20);
        stock.insert(("RM-2".into(), "Stores - RND".into()), 20);
        stock.insert(("RM-3".into(), "Stores - RND".into()), 3);

        let assessment = assess("WO-1", 10, &bom(), &stock, &ZonePolicy::default());
        assert_eq!(assessment.completion_percentage, 50);
        assert_eq!(assessment.zone_status, ZoneStatus::Yellow);
        let missing: Vec<_> = assessment.missing().map(|i| (i.item_code.as_str(), i.shortage)).collect();
        assert_eq!(missing, vec![("RM-3", 17), ("RM-4", 20)]);

        let entry = StockEntry::new().apply_assessment(&assessment);
        assert_eq!(entry.work_order.as_deref(), Some("WO-1"));
        let snapshot = entry.snapshot("clerk");
        let yellow = Predicate::parse("zone_status == \"Yellow\" and completion_percentage >= 50").unwrap();
        assert!(yellow.evaluate(&snapshot, &EvaluationLimits::default()).unwrap());
    }

    #[test]
    fn empty_bom_is_red() {
        let stock: HashMap<(String, String), u64> = HashMap::new();
        let assessment = assess("WO-2", 1, &[], &stock, &ZonePolicy::default());
        assert_eq!(assessment.zone_status, ZoneStatus::Red);
        assert_eq!(assessment.completion_percentage, 0);
    }
}

// AUDIT MODULE TESTS
#[cfg(test)]
mod urgency_tests {
    use super::*;

    #[test]
    fn default_thresholds() {
        let policy = UrgencyPolicy::default();
        assert_eq!(policy.classify(0), Urgency::Low);
        assert_eq!(policy.classify(1), Urgency::Low);
        assert_eq!(policy.classify(2), Urgency::Medium);
        assert_eq!(policy.classify(3), Urgency::Medium);
        assert_eq!(policy.classify(4), Urgency::High);
    }
}
