//! Approval rule engine: resolves the ordered chain of approvers for a
//! movement type and transaction snapshot.
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::entry::TransactionSnapshot;
use super::error::{ConfigurationWarning, ValidationError, WorkflowError};
use super::predicate::{EvaluationLimits, Predicate, PredicateError};
use super::types::Actor;

pub const MAX_APPROVAL_LEVEL: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub movement_type: String,
    pub approval_level: u8,
    pub approver_role: String,
    #[serde(default)]
    pub conditional_logic: Option<String>,
    #[serde(default)]
    pub escalation_days: Option<u32>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl ApprovalRule {
    pub fn new(movement_type: &str, approval_level: u8, approver_role: &str) -> Self {
        Self {
            movement_type: movement_type.to_string(),
            approval_level,
            approver_role: approver_role.to_string(),
            conditional_logic: None,
            escalation_days: None,
            enabled: true,
        }
    }
    pub fn when(mut self, conditional_logic: &str) -> Self {
        self.conditional_logic = Some(conditional_logic.to_string());
        self
    }
    pub fn escalate_after(mut self, days: u32) -> Self {
        self.escalation_days = Some(days);
        self
    }
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn condition(&self) -> Option<&str> {
        self.conditional_logic
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Level range and predicate syntax, checked when a rule is registered.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=MAX_APPROVAL_LEVEL).contains(&self.approval_level) {
            return Err(ValidationError::ApprovalLevelOutOfRange(self.approval_level));
        }
        if let Some(source) = self.condition() {
            Predicate::parse(source).map_err(|e| ValidationError::MalformedPredicate {
                expression: source.to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}

/// One position in a resolved approval chain.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainStep {
    /// Position in the chain, starting at 1.
    #[n(0)]
    pub level: u8,
    /// Level configured on the rule that produced this step.
    #[n(1)]
    pub rule_level: u8,
    #[n(2)]
    pub approver_role: String,
    #[n(3)]
    pub alternative_roles: Vec<String>,
    #[n(4)]
    pub escalation_days: Option<u32>,
}

impl ChainStep {
    pub fn roles(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.approver_role.as_str()).chain(self.alternative_roles.iter().map(String::as_str))
    }

    pub fn accepts(&self, actor: &Actor) -> bool {
        self.roles().any(|role| actor.has_role(role))
    }
}

/// A condition that could not be evaluated. The level it guards was kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PredicateFailure {
    pub movement_type: String,
    pub rule_level: u8,
    pub expression: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChainResolution {
    pub steps: Vec<ChainStep>,
    pub warnings: Vec<ConfigurationWarning>,
    pub failures: Vec<PredicateFailure>,
}

impl ChainResolution {
    pub fn total_levels(&self) -> u8 {
        self.steps.len() as u8
    }
}

/// Which rule governs a level when more than one enabled rule shares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateRulePolicy {
    /// The rule registered first.
    #[default]
    FirstRegistered,
    /// Every duplicate applies; holding any of their roles is enough.
    StrictestRole,
}

pub trait ApprovalRuleSource: Send + Sync {
    fn load(&self) -> Result<Vec<ApprovalRule>, WorkflowError>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticApprovalRules(Vec<ApprovalRule>);

impl ApprovalRuleSource for StaticApprovalRules {
    fn load(&self) -> Result<Vec<ApprovalRule>, WorkflowError> {
        Ok(self.0.clone())
    }
}

impl StaticApprovalRules {
    /// Registers rules, rejecting any with an out of range level or a
    /// condition that does not parse.
    pub fn new(rules: Vec<ApprovalRule>) -> Result<Self, WorkflowError> {
        for rule in &rules {
            rule.validate()?;
        }
        Ok(Self(rules))
    }

    pub fn defaults() -> Self {
        Self(vec![
            ApprovalRule::new("201", 1, "Warehouse Supervisor"),
            ApprovalRule::new("201", 2, "Warehouse Manager").when("total_value > 10000"),
            ApprovalRule::new("303", 1, "Warehouse Supervisor"),
            ApprovalRule::new("311", 1, "Warehouse Supervisor").escalate_after(2),
            ApprovalRule::new("311", 2, "Kitting Supervisor").escalate_after(2),
        ])
    }
}

#[derive(Debug)]
struct CompiledRule {
    rule: ApprovalRule,
    predicate: Option<Result<Predicate, PredicateError>>,
}

pub struct RuleEngine {
    source: Box<dyn ApprovalRuleSource>,
    rules: RwLock<Arc<Vec<CompiledRule>>>,
    policy: DuplicateRulePolicy,
    limits: EvaluationLimits,
}

impl RuleEngine {
    pub fn new(
        source: impl ApprovalRuleSource + 'static,
        policy: DuplicateRulePolicy,
        limits: EvaluationLimits,
    ) -> Result<Self, WorkflowError> {
        let engine = Self {
            source: Box::new(source),
            rules: RwLock::new(Arc::default()),
            policy,
            limits,
        };
        engine.refresh()?;
        Ok(engine)
    }

    pub fn policy(&self) -> DuplicateRulePolicy {
        self.policy
    }

    /// Reloads rules. A condition that does not parse is kept and fails
    /// closed at resolution time.
    pub fn refresh(&self) -> Result<(), WorkflowError> {
        let mut compiled = Vec::new();
        for rule in self.source.load()? {
            if !(1..=MAX_APPROVAL_LEVEL).contains(&rule.approval_level) {
                return Err(ValidationError::ApprovalLevelOutOfRange(rule.approval_level).into());
            }
            let predicate = rule.condition().map(Predicate::parse);
            if let Some(Err(e)) = &predicate {
                warn!(
                    movement_type = %rule.movement_type,
                    level = rule.approval_level,
                    error = %e,
                    "approval rule condition does not parse"
                );
            }
            compiled.push(CompiledRule { rule, predicate });
        }
        info!(count = compiled.len(), "approval rules loaded");

        let compiled = Arc::new(compiled);
        match self.rules.write() {
            Ok(mut guard) => *guard = compiled,
            Err(poisoned) => *poisoned.into_inner() = compiled,
        }
        Ok(())
    }

    fn current(&self) -> Arc<Vec<CompiledRule>> {
        match self.rules.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Enabled rules for a movement type, as configured, ordered by level.
    pub fn rules_for(&self, movement_type: &str) -> Vec<ApprovalRule> {
        let mut rules: Vec<ApprovalRule> = self
            .current()
            .iter()
            .filter(|c| c.rule.enabled && c.rule.movement_type == movement_type)
            .map(|c| c.rule.clone())
            .collect();
        rules.sort_by_key(|r| r.approval_level);
        rules
    }

    /// Resolves the approval chain. Pure: the same rules and snapshot always
    /// give the same resolution.
    pub fn resolve_chain(&self, movement_type: &str, snapshot: &TransactionSnapshot) -> ChainResolution {
        let rules = self.current();
        let mut candidates: Vec<&CompiledRule> = rules
            .iter()
            .filter(|c| c.rule.enabled && c.rule.movement_type == movement_type)
            .collect();
        // stable, keeps registration order within a level
        candidates.sort_by_key(|c| c.rule.approval_level);

        let mut resolution = ChainResolution::default();

        for group in candidates.chunk_by(|a, b| a.rule.approval_level == b.rule.approval_level) {
            let rule_level = group[0].rule.approval_level;
            if group.len() > 1 {
                let warning = ConfigurationWarning::DuplicateRule {
                    movement_type: movement_type.to_string(),
                    level: rule_level,
                    roles: group.iter().map(|c| c.rule.approver_role.clone()).collect(),
                };
                warn!(%warning, "approval rule conflict");
                resolution.warnings.push(warning);
            }

            let governing = match self.policy {
                DuplicateRulePolicy::FirstRegistered => &group[..1],
                DuplicateRulePolicy::StrictestRole => group,
            };

            let mut roles: Vec<String> = Vec::new();
            let mut escalation_days = None;
            for compiled in governing {
                if self.applies(compiled, snapshot, &mut resolution.failures) {
                    if !roles.contains(&compiled.rule.approver_role) {
                        roles.push(compiled.rule.approver_role.clone());
                    }
                    escalation_days = escalation_days.or(compiled.rule.escalation_days);
                }
            }

            if let Some((approver_role, alternative_roles)) = roles.split_first() {
                resolution.steps.push(ChainStep {
                    level: resolution.steps.len() as u8 + 1,
                    rule_level,
                    approver_role: approver_role.clone(),
                    alternative_roles: alternative_roles.to_vec(),
                    escalation_days,
                });
            }
        }

        debug!(movement_type, levels = resolution.steps.len(), "approval chain resolved");
        resolution
    }

    // absent condition always applies; a failing one applies too
    fn applies(
        &self,
        compiled: &CompiledRule,
        snapshot: &TransactionSnapshot,
        failures: &mut Vec<PredicateFailure>,
    ) -> bool {
        let outcome = match &compiled.predicate {
            None => return true,
            Some(Ok(predicate)) => predicate.evaluate(snapshot, &self.limits),
            Some(Err(e)) => Err(e.clone()),
        };
        match outcome {
            Ok(applies) => applies,
            Err(e) => {
                let failure = PredicateFailure {
                    movement_type: compiled.rule.movement_type.clone(),
                    rule_level: compiled.rule.approval_level,
                    expression: compiled.rule.condition().unwrap_or_default().to_string(),
                    message: e.to_string(),
                };
                warn!(
                    movement_type = %failure.movement_type,
                    level = failure.rule_level,
                    error = %failure.message,
                    "approval condition failed, level kept"
                );
                failures.push(failure);
                true
            }
        }
    }

    /// The step after chain position `level`, if any.
    pub fn next_step(
        &self,
        movement_type: &str,
        level: u8,
        snapshot: &TransactionSnapshot,
    ) -> Option<ChainStep> {
        self.resolve_chain(movement_type, snapshot)
            .steps
            .into_iter()
            .find(|step| step.level == level + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(rules: Vec<ApprovalRule>, policy: DuplicateRulePolicy) -> RuleEngine {
        RuleEngine::new(StaticApprovalRules(rules), policy, EvaluationLimits::default()).unwrap()
    }

    fn snapshot(total_value: u64) -> TransactionSnapshot {
        TransactionSnapshot {
            movement_type: Some("201".into()),
            total_value,
            ..Default::default()
        }
    }

    fn roles(resolution: &ChainResolution) -> Vec<&str> {
        resolution.steps.iter().map(|s| s.approver_role.as_str()).collect()
    }

    #[test]
    fn conditional_level_is_included_only_when_true() {
        let engine = engine(StaticApprovalRules::defaults().0, DuplicateRulePolicy::default());

        let small = engine.resolve_chain("201", &snapshot(500));
        assert_eq!(roles(&small), vec!["Warehouse Supervisor"]);

        let large = engine.resolve_chain("201", &snapshot(50_000));
        assert_eq!(roles(&large), vec!["Warehouse Supervisor", "Warehouse Manager"]);
        assert_eq!(large.steps[1].level, 2);
        assert!(large.failures.is_empty());
    }

    #[test]
    fn skipped_levels_keep_positions_contiguous() {
        let engine = engine(
            vec![
                ApprovalRule::new("311", 1, "Warehouse Supervisor"),
                ApprovalRule::new("311", 2, "Warehouse Manager").when("total_qty > 1000"),
                ApprovalRule::new("311", 3, "Kitting Supervisor"),
            ],
            DuplicateRulePolicy::default(),
        );
        let chain = engine.resolve_chain("311", &TransactionSnapshot::default());
        let positions: Vec<_> = chain.steps.iter().map(|s| (s.level, s.rule_level)).collect();
        assert_eq!(positions, vec![(1, 1), (2, 3)]);

        let next = engine.next_step("311", 1, &TransactionSnapshot::default()).unwrap();
        assert_eq!(next.approver_role, "Kitting Supervisor");
        assert!(engine.next_step("311", 2, &TransactionSnapshot::default()).is_none());
    }

    #[test]
    fn broken_conditions_fail_closed() {
        let engine = engine(
            vec![
                ApprovalRule::new("201", 1, "Warehouse Supervisor").when("invalid python syntax !!!"),
                ApprovalRule::new("201", 2, "Warehouse Manager").when("purpose > 3"),
                ApprovalRule::new("201", 3, "Director").when("total_value > 1"),
            ],
            DuplicateRulePolicy::default(),
        );
        let chain = engine.resolve_chain("201", &snapshot(0));
        assert_eq!(roles(&chain), vec!["Warehouse Supervisor", "Warehouse Manager"]);
        assert_eq!(chain.failures.len(), 2);
        assert_eq!(chain.failures[0].rule_level, 1);
        assert_eq!(chain.failures[1].expression, "purpose > 3");
    }

    #[test]
    fn duplicates_are_reported_and_resolved_by_policy() {
        let rules = vec![
            ApprovalRule::new("303", 1, "Warehouse Supervisor"),
            ApprovalRule::new("303", 1, "Warehouse Manager"),
            ApprovalRule::new("303", 2, "Stock Manager"),
        ];

        let first = engine(rules.clone(), DuplicateRulePolicy::FirstRegistered);
        let chain = first.resolve_chain("303", &TransactionSnapshot::default());
        assert_eq!(chain.warnings.len(), 1);
        assert_eq!(roles(&chain), vec!["Warehouse Supervisor", "Stock Manager"]);
        assert!(chain.steps[0].alternative_roles.is_empty());

        let strict = engine(rules, DuplicateRulePolicy::StrictestRole);
        let chain = strict.resolve_chain("303", &TransactionSnapshot::default());
        assert_eq!(chain.warnings.len(), 1);
        assert_eq!(chain.steps[0].alternative_roles, vec!["Warehouse Manager"]);
        assert!(chain.steps[0].accepts(&Actor::new("m", &["Warehouse Manager"])));
        assert!(!chain.steps[0].accepts(&Actor::new("k", &["Kitting Supervisor"])));
    }

    #[test]
    fn disabled_and_foreign_rules_are_ignored() {
        let engine = engine(
            vec![
                ApprovalRule::new("303", 1, "Warehouse Supervisor").disabled(),
                ApprovalRule::new("311", 1, "Kitting Supervisor"),
            ],
            DuplicateRulePolicy::default(),
        );
        assert!(engine.resolve_chain("303", &TransactionSnapshot::default()).steps.is_empty());
        assert!(engine.rules_for("303").is_empty());
    }

    #[test]
    fn registration_validates_rules() {
        let err = StaticApprovalRules::new(vec![ApprovalRule::new("311", 6, "Director")]).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::ValidationFailed(ValidationError::ApprovalLevelOutOfRange(6))
        ));

        let err = StaticApprovalRules::new(vec![ApprovalRule::new("311", 1, "Director").when("total_value >")])
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::ValidationFailed(ValidationError::MalformedPredicate { .. })
        ));

        assert!(StaticApprovalRules::new(StaticApprovalRules::defaults().0).is_ok());
    }
}
