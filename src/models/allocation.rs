use serde::{Deserialize, Serialize};

/// A monetary amount attributed to one work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub work_item_id: String,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Allocation {
    pub fn new(work_item_id: impl Into<String>, amount: f64) -> Self {
        Self {
            work_item_id: work_item_id.into(),
            amount,
            notes: None,
        }
    }
}

/// Allocations plus the total they must reconcile to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationSet {
    pub allocations: Vec<Allocation>,
    pub target_total: f64,
}

impl AllocationSet {
    pub fn new(target_total: f64) -> Self {
        Self {
            allocations: Vec::new(),
            target_total,
        }
    }

    pub fn with_allocations(target_total: f64, allocations: Vec<Allocation>) -> Self {
        Self {
            allocations,
            target_total,
        }
    }

    pub fn get(&self, work_item_id: &str) -> Option<&Allocation> {
        self.allocations
            .iter()
            .find(|a| a.work_item_id == work_item_id)
    }

    pub fn amount_of(&self, work_item_id: &str) -> Option<f64> {
        self.get(work_item_id).map(|a| a.amount)
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }
}
