//! TOML configuration: storage location, engine limits, policies and
//! reference data. Every section is optional.
//!
//! ```toml
//! [storage]
//! path = "stock_approval.db"
//!
//! [engine]
//! evaluation_timeout_ms = 50
//! evaluation_step_budget = 1000
//! duplicate_rule_policy = "first_registered"
//!
//! [urgency]
//! medium_after_days = 1
//! high_after_days = 3
//!
//! [zones]
//! yellow_threshold = 50
//!
//! [[approval_rules]]
//! movement_type = "311"
//! approval_level = 1
//! approver_role = "Warehouse Supervisor"
//! escalation_days = 2
//! ```
//!
//! Without `[[movement_types]]` or `[[approval_rules]]` the built-in
//! defaults are used.
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::audit::UrgencyPolicy;
use super::error::WorkflowError;
use super::material::ZonePolicy;
use super::movement::{MovementType, MovementTypeRegistry, StaticMovementTypes};
use super::predicate::EvaluationLimits;
use super::rules::{ApprovalRule, DuplicateRulePolicy, RuleEngine, StaticApprovalRules};
use super::service::ApprovalService;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "STOCK_APPROVAL_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("stock_approval.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub evaluation_timeout_ms: u64,
    pub evaluation_step_budget: u32,
    pub duplicate_rule_policy: DuplicateRulePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let limits = EvaluationLimits::default();
        Self {
            evaluation_timeout_ms: limits.timeout.as_millis() as u64,
            evaluation_step_budget: limits.step_budget,
            duplicate_rule_policy: DuplicateRulePolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn limits(&self) -> EvaluationLimits {
        EvaluationLimits {
            step_budget: self.evaluation_step_budget,
            timeout: Duration::from_millis(self.evaluation_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub engine: EngineConfig,
    pub urgency: UrgencyPolicy,
    pub zones: ZonePolicy,
    pub movement_types: Vec<MovementType>,
    pub approval_rules: Vec<ApprovalRule>,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig, WorkflowError> {
    let path_ref = path.as_ref();
    tracing::debug!("Attempting to load configuration from: {:?}", path_ref);
    let contents = fs::read_to_string(path_ref)
        .map_err(|e| WorkflowError::Config(format!("Failed to read config file {:?}: {}", path_ref, e)))?;
    AppConfig::from_toml(&contents)
        .map_err(|e| WorkflowError::Config(format!("Failed to parse config file {:?}: {}", path_ref, e)))
}

impl AppConfig {
    pub fn from_toml(contents: &str) -> Result<Self, WorkflowError> {
        let config: AppConfig = toml::from_str(contents).map_err(|e| WorkflowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), WorkflowError> {
        if self.urgency.medium_after_days > self.urgency.high_after_days {
            return Err(WorkflowError::Config(format!(
                "urgency.medium_after_days ({}) exceeds urgency.high_after_days ({})",
                self.urgency.medium_after_days, self.urgency.high_after_days
            )));
        }
        if self.zones.yellow_threshold > 100 {
            return Err(WorkflowError::Config(format!(
                "zones.yellow_threshold ({}) must be at most 100",
                self.zones.yellow_threshold
            )));
        }
        if self.engine.evaluation_step_budget == 0 {
            return Err(WorkflowError::Config("engine.evaluation_step_budget must be positive".into()));
        }
        Ok(())
    }

    pub fn movement_source(&self) -> StaticMovementTypes {
        if self.movement_types.is_empty() {
            StaticMovementTypes::defaults()
        } else {
            StaticMovementTypes(self.movement_types.clone())
        }
    }

    pub fn rule_source(&self) -> Result<StaticApprovalRules, WorkflowError> {
        if self.approval_rules.is_empty() {
            Ok(StaticApprovalRules::defaults())
        } else {
            StaticApprovalRules::new(self.approval_rules.clone())
        }
    }

    /// Builds the service on an already opened database.
    pub fn build_service_with(&self, instance: Arc<sled::Db>) -> Result<ApprovalService, WorkflowError> {
        let registry = MovementTypeRegistry::new(self.movement_source())?;
        let rules = RuleEngine::new(
            self.rule_source()?,
            self.engine.duplicate_rule_policy,
            self.engine.limits(),
        )?;
        Ok(ApprovalService::new(instance, registry, rules)?.with_policies(self.urgency, self.zones))
    }

    pub fn build_service(&self) -> Result<ApprovalService, WorkflowError> {
        let instance = sled::open(&self.storage.path)?;
        self.build_service_with(Arc::new(instance))
    }
}
