use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::rounding::Rounder;
use crate::models::AllocationSet;

/// A structural or reconciliation problem in an allocation set.
///
/// Returned as a list, never raised: a non-empty list blocks submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    MissingIdentifier { index: usize },
    DuplicateIdentifier { work_item_id: String },
    NegativeAmount { work_item_id: String, amount: f64 },
    NonFiniteAmount { work_item_id: String },
    NonFiniteTotal,
    /// `difference` is the signed remaining amount: positive means under-allocated.
    TotalMismatch {
        expected: f64,
        allocated: f64,
        difference: f64,
    },
}

impl ValidationIssue {
    pub fn message(&self) -> String {
        match self {
            Self::MissingIdentifier { index } => {
                format!("Allocation #{} has no work item", index + 1)
            }
            Self::DuplicateIdentifier { work_item_id } => {
                format!("Work item {work_item_id} is allocated more than once")
            }
            Self::NegativeAmount {
                work_item_id,
                amount,
            } => format!("Amount for {work_item_id} is negative ({amount})"),
            Self::NonFiniteAmount { work_item_id } => {
                format!("Amount for {work_item_id} is not a number")
            }
            Self::NonFiniteTotal => "Receipt total is not a number".into(),
            Self::TotalMismatch { difference, .. } if *difference > 0.0 => {
                format!("{difference} still needs to be allocated")
            }
            Self::TotalMismatch { difference, .. } => {
                format!("Allocations exceed the total by {}", -difference)
            }
        }
    }
}

/// Check a set against `total` at the rounder's precision.
///
/// The reconciliation rule: `round(Σ amounts) == round(total)`.
pub fn validate(set: &AllocationSet, total: f64, rounder: &Rounder) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut seen = HashSet::new();
    let mut all_finite = true;

    for (index, allocation) in set.allocations.iter().enumerate() {
        let id = allocation.work_item_id.trim();
        if id.is_empty() {
            issues.push(ValidationIssue::MissingIdentifier { index });
        } else if !seen.insert(id) {
            issues.push(ValidationIssue::DuplicateIdentifier {
                work_item_id: id.to_string(),
            });
        }

        if !allocation.amount.is_finite() {
            all_finite = false;
            issues.push(ValidationIssue::NonFiniteAmount {
                work_item_id: allocation.work_item_id.clone(),
            });
        } else if allocation.amount < 0.0 {
            issues.push(ValidationIssue::NegativeAmount {
                work_item_id: allocation.work_item_id.clone(),
                amount: allocation.amount,
            });
        }
    }

    let Some(total_units) = rounder.to_units(total) else {
        issues.push(ValidationIssue::NonFiniteTotal);
        return issues;
    };
    if !all_finite {
        return issues;
    }

    let allocated: f64 = set.allocations.iter().map(|a| a.amount).sum();
    let Some(allocated_units) = rounder.to_units(allocated) else {
        return issues;
    };

    if allocated_units != total_units {
        issues.push(ValidationIssue::TotalMismatch {
            expected: rounder.from_units(total_units),
            allocated: rounder.from_units(allocated_units),
            difference: rounder.from_units(total_units - allocated_units),
        });
    }

    issues
}
