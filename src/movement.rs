//! Movement type registry.
//!
//! Reference data is read through a [`MovementTypeSource`] and held as an
//! immutable snapshot. Callers see either the old or the new snapshot, never a
//! half-loaded one; [`MovementTypeRegistry::refresh`] is the only way to pick
//! up changes.
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::entry::TransactionSnapshot;
use super::error::{ConfigurationWarning, ValidationError, WorkflowError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StockMovementType {
    Increase,
    Decrease,
    Transfer,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum AuthorizationLevel {
    #[default]
    User,
    Supervisor,
    Manager,
    Director,
}

impl AuthorizationLevel {
    /// Roles allowed to submit entries of a movement type at this level.
    /// An empty slice means any user may submit.
    pub fn submitting_roles(&self) -> &'static [&'static str] {
        match self {
            Self::User | Self::Supervisor => &[],
            Self::Manager => &["Warehouse Manager", "Stock Manager", "System Manager"],
            Self::Director => &["Director", "System Manager"],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Supervisor => "Supervisor",
            Self::Manager => "Manager",
            Self::Director => "Director",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementType {
    pub code: String,
    pub description: String,
    pub category: String,
    pub stock_movement_type: StockMovementType,
    pub requires_approval: bool,
    pub authorization_level: AuthorizationLevel,
    pub requires_source_warehouse: bool,
    pub requires_target_warehouse: bool,
    /// Stock entry purpose this code maps to.
    pub purpose: Option<String>,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
    pub auto_create_gi_gt_slip: bool,
}

fn active_by_default() -> bool {
    true
}

impl MovementType {
    /// Requires kitting sign-off on submit.
    pub fn is_production_transfer(&self) -> bool {
        self.category == "Production" && self.stock_movement_type == StockMovementType::Transfer
    }

    // Transfer types always need both sides; category hints are reported only
    fn normalise(mut self) -> (Self, Vec<ConfigurationWarning>) {
        if self.stock_movement_type == StockMovementType::Transfer {
            self.requires_source_warehouse = true;
            self.requires_target_warehouse = true;
        }

        let expected = match self.category.as_str() {
            "Goods Receipt" => Some(StockMovementType::Increase),
            "Goods Issue" => Some(StockMovementType::Decrease),
            _ => None,
        };
        let warnings = expected
            .filter(|expected| *expected != self.stock_movement_type)
            .map(|expected| ConfigurationWarning::CategoryMismatch {
                code: self.code.clone(),
                category: self.category.clone(),
                expected: format!("{expected:?}"),
                actual: format!("{:?}", self.stock_movement_type),
            })
            .into_iter()
            .collect();

        (self, warnings)
    }
}

/// Where reference data is loaded from.
pub trait MovementTypeSource: Send + Sync {
    fn load(&self) -> Result<Vec<MovementType>, WorkflowError>;
}

/// In-memory source, used for configuration files and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticMovementTypes(pub Vec<MovementType>);

impl MovementTypeSource for StaticMovementTypes {
    fn load(&self) -> Result<Vec<MovementType>, WorkflowError> {
        Ok(self.0.clone())
    }
}

impl StaticMovementTypes {
    /// The codes shipped with a fresh installation.
    pub fn defaults() -> Self {
        let mt = |code: &str, description: &str, category: &str, kind: StockMovementType| MovementType {
            code: code.to_string(),
            description: description.to_string(),
            category: category.to_string(),
            stock_movement_type: kind,
            is_active: true,
            ..Default::default()
        };

        Self(vec![
            MovementType {
                requires_target_warehouse: true,
                purpose: Some("Material Receipt".into()),
                ..mt("101", "Goods receipt from vendor", "Goods Receipt", StockMovementType::Increase)
            },
            MovementType {
                requires_approval: true,
                authorization_level: AuthorizationLevel::Supervisor,
                requires_source_warehouse: true,
                purpose: Some("Material Issue".into()),
                ..mt("201", "Goods issue to cost center", "Goods Issue", StockMovementType::Decrease)
            },
            MovementType {
                requires_source_warehouse: true,
                purpose: Some("Material Issue".into()),
                ..mt(
                    "261",
                    "FrontFlush - Goods Issue for Production",
                    "Production",
                    StockMovementType::Decrease,
                )
            },
            MovementType {
                requires_approval: true,
                authorization_level: AuthorizationLevel::Supervisor,
                purpose: Some("Material Transfer".into()),
                ..mt(
                    "303",
                    "Transfer between storage locations",
                    "Transfer Posting",
                    StockMovementType::Transfer,
                )
            },
            MovementType {
                requires_approval: true,
                authorization_level: AuthorizationLevel::Supervisor,
                purpose: Some("Material Transfer for Manufacture".into()),
                auto_create_gi_gt_slip: true,
                ..mt(
                    "311",
                    "BackFlush - Transfer for Kitting",
                    "Production",
                    StockMovementType::Transfer,
                )
            },
        ])
    }
}

// purpose -> code, consulted after explicit purpose mappings
const PURPOSE_TABLE: [(&str, &str); 5] = [
    ("Material Consumption for Manufacture", "261"),
    ("Material Transfer for Manufacture", "311"),
    ("Material Issue", "201"),
    ("Material Receipt", "101"),
    ("Material Transfer", "303"),
];

#[derive(Debug, Default)]
struct Snapshot {
    types: BTreeMap<String, MovementType>,
    warnings: Vec<ConfigurationWarning>,
}

pub struct MovementTypeRegistry {
    source: Box<dyn MovementTypeSource>,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl MovementTypeRegistry {
    pub fn new(source: impl MovementTypeSource + 'static) -> Result<Self, WorkflowError> {
        let registry = Self {
            source: Box::new(source),
            snapshot: RwLock::new(Arc::default()),
        };
        registry.refresh()?;
        Ok(registry)
    }

    fn current(&self) -> Arc<Snapshot> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Reload from the source. On error the previous snapshot stays in place.
    pub fn refresh(&self) -> Result<Vec<ConfigurationWarning>, WorkflowError> {
        let mut types = BTreeMap::new();
        let mut warnings = Vec::new();

        for movement in self.source.load()? {
            let code = movement.code.trim().to_string();
            if code.is_empty() {
                return Err(ValidationError::MissingMovementType.into());
            }
            let (movement, found) = MovementType { code: code.clone(), ..movement }.normalise();
            warnings.extend(found);
            if types.insert(code.clone(), movement).is_some() {
                return Err(ValidationError::DuplicateMovementCode(code).into());
            }
        }

        for warning in &warnings {
            warn!(%warning, "movement type configuration");
        }
        info!(count = types.len(), "movement types loaded");

        let snapshot = Arc::new(Snapshot {
            types,
            warnings: warnings.clone(),
        });
        match self.snapshot.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
        Ok(warnings)
    }

    pub fn warnings(&self) -> Vec<ConfigurationWarning> {
        self.current().warnings.clone()
    }

    pub fn lookup(&self, code: &str) -> Result<MovementType, WorkflowError> {
        debug!(code, "movement type lookup");
        self.current()
            .types
            .get(code.trim())
            .cloned()
            .ok_or_else(|| WorkflowError::not_found("movement type", code))
    }

    /// Candidate movement types for a stock entry purpose, ordered by code.
    ///
    /// Collects explicit purpose mappings on the registered types, the
    /// built-in purpose table, and prefix or keyword matches on purpose and
    /// description. Inactive types are never returned.
    pub fn suggest_by_purpose(&self, purpose: &str) -> Vec<MovementType> {
        let snapshot = self.current();
        let purpose = purpose.trim();
        if purpose.is_empty() {
            return vec![];
        }
        let needle = purpose.to_lowercase();

        let tabled = PURPOSE_TABLE
            .iter()
            .filter(|(name, _)| *name == purpose)
            .map(|(_, code)| *code);

        let mut found: BTreeMap<&str, &MovementType> = BTreeMap::new();
        for code in tabled {
            if let Some(mt) = snapshot.types.get(code) {
                found.insert(code, mt);
            }
        }
        for mt in snapshot.types.values() {
            let by_purpose = mt
                .purpose
                .as_deref()
                .is_some_and(|p| p.to_lowercase().starts_with(&needle));
            if by_purpose || mt.description.to_lowercase().contains(&needle) {
                found.insert(&mt.code, mt);
            }
        }

        found
            .into_values()
            .filter(|mt| mt.is_active)
            .cloned()
            .collect()
    }

    pub fn active(&self, category: Option<&str>) -> Vec<MovementType> {
        self.current()
            .types
            .values()
            .filter(|mt| mt.is_active)
            .filter(|mt| category.is_none_or(|c| mt.category == c))
            .cloned()
            .collect()
    }

    /// Checks a movement type can be used for the given entry.
    pub fn validate_for_transaction(
        &self,
        code: &str,
        snapshot: &TransactionSnapshot,
    ) -> Result<MovementType, WorkflowError> {
        let movement = self.lookup(code)?;
        if !movement.is_active {
            return Err(ValidationError::InactiveMovementType { code: movement.code }.into());
        }
        let blank = |w: &Option<String>| w.as_deref().is_none_or(|w| w.trim().is_empty());
        if movement.requires_source_warehouse && blank(&snapshot.from_warehouse) {
            return Err(ValidationError::MissingWarehouse {
                code: movement.code,
                side: "source",
            }
            .into());
        }
        if movement.requires_target_warehouse && blank(&snapshot.to_warehouse) {
            return Err(ValidationError::MissingWarehouse {
                code: movement.code,
                side: "target",
            }
            .into());
        }
        Ok(movement)
    }
}
