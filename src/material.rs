//! Work order material availability and zone readiness
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub enum ZoneStatus {
    #[n(0)]
    Red,
    #[n(1)]
    Yellow,
    #[n(2)]
    Green,
}

impl ZoneStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Red => "Red Zone",
            Self::Yellow => "Yellow Zone",
            Self::Green => "Green Zone",
        }
    }
}

/// Completion percentage at which a work order counts as Yellow rather than Red.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ZonePolicy {
    pub yellow_threshold: u8,
}

impl Default for ZonePolicy {
    fn default() -> Self {
        Self {
            yellow_threshold: 50,
        }
    }
}

impl ZonePolicy {
    pub fn classify(&self, completion_percentage: u8) -> ZoneStatus {
        if completion_percentage >= 100 {
            ZoneStatus::Green
        } else if completion_percentage >= self.yellow_threshold {
            ZoneStatus::Yellow
        } else {
            ZoneStatus::Red
        }
    }
}

/// One bill-of-materials line of a work order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BomLine {
    pub item_code: String,
    pub item_name: String,
    pub qty_per_unit: u64,
    pub warehouse: String,
}

/// Stock on hand, queried per item and warehouse.
pub trait StockLevels {
    fn available_qty(&self, item_code: &str, warehouse: &str) -> u64;
}

impl StockLevels for HashMap<(String, String), u64> {
    fn available_qty(&self, item_code: &str, warehouse: &str) -> u64 {
        self.get(&(item_code.to_string(), warehouse.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Availability {
    Available,
    Shortage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemStatus {
    pub item_code: String,
    pub item_name: String,
    pub required_qty: u64,
    pub available_qty: u64,
    pub shortage: u64,
    pub warehouse: String,
    pub status: Availability,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterialAssessment {
    pub work_order: String,
    pub zone_status: ZoneStatus,
    pub completion_percentage: u8,
    pub per_item: Vec<ItemStatus>,
}

impl MaterialAssessment {
    pub fn missing(&self) -> impl Iterator<Item = &ItemStatus> {
        self.per_item
            .iter()
            .filter(|item| item.status == Availability::Shortage)
    }
}

pub fn assess(
    work_order: &str,
    work_order_qty: u64,
    lines: &[BomLine],
    stock: &impl StockLevels,
    policy: &ZonePolicy,
) -> MaterialAssessment {
    let per_item: Vec<ItemStatus> = lines
        .iter()
        .map(|line| {
            let required_qty = line.qty_per_unit.saturating_mul(work_order_qty);
            let available_qty = stock.available_qty(&line.item_code, &line.warehouse);
            let shortage = required_qty.saturating_sub(available_qty);
            ItemStatus {
                item_code: line.item_code.clone(),
                item_name: line.item_name.clone(),
                required_qty,
                available_qty,
                shortage,
                warehouse: line.warehouse.clone(),
                status: if shortage == 0 {
                    Availability::Available
                } else {
                    Availability::Shortage
                },
            }
        })
        .collect();

    let available = per_item
        .iter()
        .filter(|item| item.status == Availability::Available)
        .count();
    let completion_percentage = match per_item.len() {
        0 => 0,
        total => (available * 100 / total) as u8,
    };

    MaterialAssessment {
        work_order: work_order.to_string(),
        zone_status: policy.classify(completion_percentage),
        completion_percentage,
        per_item,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(code: &str, qty: u64) -> BomLine {
        BomLine {
            item_code: code.to_string(),
            item_name: format!("{code} name"),
            qty_per_unit: qty,
            warehouse: "Stores - RND".to_string(),
        }
    }

    fn stock(entries: &[(&str, u64)]) -> HashMap<(String, String), u64> {
        entries
            .iter()
            .map(|(code, qty)| ((code.to_string(), "Stores - RND".to_string()), *qty))
            .collect()
    }

    #[test]
    fn all_lines_available_is_green() {
        let result = assess(
            "WO-0001",
            10,
            &[line("RM-1", 2), line("RM-2", 1)],
            &stock(&[("RM-1", 20), ("RM-2", 50)]),
            &ZonePolicy::default(),
        );
        assert_eq!(result.zone_status, ZoneStatus::Green);
        assert_eq!(result.completion_percentage, 100);
        assert_eq!(result.missing().count(), 0);
    }

    #[test]
    fn partial_availability_uses_threshold() {
        let lines = [line("RM-1", 2), line("RM-2", 1), line("RM-3", 1), line("RM-4", 1)];
        let levels = stock(&[("RM-1", 20), ("RM-2", 10), ("RM-3", 3)]);

        let result = assess("WO-0002", 10, &lines, &levels, &ZonePolicy::default());
        assert_eq!(result.completion_percentage, 50);
        assert_eq!(result.zone_status, ZoneStatus::Yellow);

        let shortages: Vec<_> = result.missing().map(|i| (i.item_code.as_str(), i.shortage)).collect();
        assert_eq!(shortages, vec![("RM-3", 7), ("RM-4", 10)]);

        let strict = ZonePolicy {
            yellow_threshold: 75,
        };
        let result = assess("WO-0002", 10, &lines, &levels, &strict);
        assert_eq!(result.zone_status, ZoneStatus::Red);
    }

    #[test]
    fn empty_bom_is_red() {
        let result = assess("WO-0003", 5, &[], &stock(&[]), &ZonePolicy::default());
        assert_eq!(result.completion_percentage, 0);
        assert_eq!(result.zone_status, ZoneStatus::Red);
    }
}
