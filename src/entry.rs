//! Stock entry document and the snapshot approval rules are evaluated against
use serde::Serialize;

use super::error::ValidationError;
use super::material::{MaterialAssessment, ZoneStatus};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StockEntryItem {
    #[n(0)]
    pub item_code: String,
    #[n(1)]
    pub qty: u64,
    #[n(2)]
    pub value: u64, // minor currency units
    #[n(3)]
    pub s_warehouse: Option<String>,
    #[n(4)]
    pub t_warehouse: Option<String>,
}

impl StockEntryItem {
    pub fn new(item_code: &str, qty: u64) -> Self {
        Self {
            item_code: item_code.to_string(),
            qty,
            ..Default::default()
        }
    }
    pub fn set_value(mut self, value: u64) -> Self {
        self.value = value;
        self
    }
    pub fn set_source(mut self, warehouse: &str) -> Self {
        self.s_warehouse = Some(warehouse.to_string());
        self
    }
    pub fn set_target(mut self, warehouse: &str) -> Self {
        self.t_warehouse = Some(warehouse.to_string());
        self
    }
}

// Also used for constructing drafts
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StockEntry {
    #[n(0)]
    pub movement_type: Option<String>,
    #[n(1)]
    pub purpose: Option<String>,
    #[n(2)]
    pub from_warehouse: Option<String>,
    #[n(3)]
    pub to_warehouse: Option<String>,
    #[n(4)]
    pub items: Vec<StockEntryItem>,
    #[n(5)]
    pub work_order: Option<String>,
    #[n(6)]
    pub zone_status: Option<ZoneStatus>,
    #[n(7)]
    pub completion_percentage: u8,
}

/// A single field difference between two revisions of a stock entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: &'static str,
    pub previous: Option<String>,
    pub new: Option<String>,
}

/// Flattened, strongly typed view of a stock entry for rule evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionSnapshot {
    pub purpose: Option<String>,
    pub movement_type: Option<String>,
    pub from_warehouse: Option<String>,
    pub to_warehouse: Option<String>,
    pub total_qty: u64,
    pub total_value: u64,
    pub item_count: u64,
    pub work_order: Option<String>,
    pub zone_status: Option<ZoneStatus>,
    pub completion_percentage: u8,
    pub owner: Option<String>,
}

impl StockEntry {
    /// Construct a new builder object, this becomes the basis for a draft
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_movement_type(mut self, code: &str) -> Self {
        self.movement_type = Some(code.to_string());
        self
    }
    pub fn set_purpose(mut self, purpose: &str) -> Self {
        self.purpose = Some(purpose.to_string());
        self
    }
    pub fn set_from_warehouse(mut self, warehouse: &str) -> Self {
        self.from_warehouse = Some(warehouse.to_string());
        self
    }
    pub fn set_to_warehouse(mut self, warehouse: &str) -> Self {
        self.to_warehouse = Some(warehouse.to_string());
        self
    }
    pub fn set_work_order(mut self, work_order: &str) -> Self {
        self.work_order = Some(work_order.to_string());
        self
    }
    pub fn add_item(mut self, item: StockEntryItem) -> Self {
        self.items.push(item);
        self
    }
    /// Copies zone readiness from a material assessment of the linked work order.
    pub fn apply_assessment(mut self, assessment: &MaterialAssessment) -> Self {
        self.work_order = Some(assessment.work_order.clone());
        self.zone_status = Some(assessment.zone_status);
        self.completion_percentage = assessment.completion_percentage.min(100);
        self
    }

    pub fn movement_code(&self) -> Result<&str, ValidationError> {
        self.movement_type
            .as_deref()
            .filter(|code| !code.trim().is_empty())
            .ok_or(ValidationError::MissingMovementType)
    }

    // header warehouse first, then any line level warehouse
    pub fn source_warehouse(&self) -> Option<&str> {
        self.from_warehouse
            .as_deref()
            .or_else(|| self.items.iter().find_map(|i| i.s_warehouse.as_deref()))
    }
    pub fn target_warehouse(&self) -> Option<&str> {
        self.to_warehouse
            .as_deref()
            .or_else(|| self.items.iter().find_map(|i| i.t_warehouse.as_deref()))
    }

    pub fn snapshot(&self, owner: &str) -> TransactionSnapshot {
        TransactionSnapshot {
            purpose: self.purpose.clone(),
            movement_type: self.movement_type.clone(),
            from_warehouse: self.source_warehouse().map(str::to_string),
            to_warehouse: self.target_warehouse().map(str::to_string),
            total_qty: self.items.iter().fold(0, |acc: u64, i| acc.saturating_add(i.qty)),
            total_value: self.items.iter().fold(0, |acc: u64, i| acc.saturating_add(i.value)),
            item_count: self.items.len() as u64,
            work_order: self.work_order.clone(),
            zone_status: self.zone_status,
            completion_percentage: self.completion_percentage,
            owner: Some(owner.to_string()),
        }
    }

    /// Header level differences, in a fixed field order.
    pub fn diff(&self, other: &StockEntry) -> Vec<FieldChange> {
        let zone = |e: &StockEntry| e.zone_status.map(|z| z.label().to_string());
        let items = |e: &StockEntry| {
            Some(
                e.items
                    .iter()
                    .map(|i| format!("{}x{}", i.item_code, i.qty))
                    .collect::<Vec<_>>()
                    .join(","),
            )
            .filter(|s| !s.is_empty())
        };
        let pct = |e: &StockEntry| Some(e.completion_percentage.to_string());

        let candidates = [
            ("movement_type", self.movement_type.clone(), other.movement_type.clone()),
            ("purpose", self.purpose.clone(), other.purpose.clone()),
            ("from_warehouse", self.from_warehouse.clone(), other.from_warehouse.clone()),
            ("to_warehouse", self.to_warehouse.clone(), other.to_warehouse.clone()),
            ("items", items(self), items(other)),
            ("work_order", self.work_order.clone(), other.work_order.clone()),
            ("zone_status", zone(self), zone(other)),
            ("completion_percentage", pct(self), pct(other)),
        ];

        candidates
            .into_iter()
            .filter(|(_, previous, new)| previous != new)
            .map(|(field, previous, new)| FieldChange {
                field,
                previous,
                new,
            })
            .collect()
    }
}
