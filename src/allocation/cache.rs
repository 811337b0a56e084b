use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::rounding::Rounder;
use crate::models::AllocationSet;

/// Entries kept before the cache starts over.
const MAX_ENTRIES: usize = 256;

/// Derived view of an allocation set against its total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationSummary {
    pub total: f64,
    pub total_allocated: f64,
    /// Signed: positive means still to allocate, negative means over-allocated.
    pub remaining: f64,
    pub is_balanced: bool,
    pub items: Vec<ItemShare>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemShare {
    pub work_item_id: String,
    pub amount: f64,
    /// Share of the total in percent, rounded to the same precision. 0 when the total is 0.
    pub percentage: f64,
}

/// Compute the summary without caching.
pub fn summarize(set: &AllocationSet, total: f64, rounder: &Rounder) -> AllocationSummary {
    let allocated_raw: f64 = set.allocations.iter().map(|a| a.amount).sum();
    let total_allocated = rounder.round(allocated_raw);
    let total_rounded = rounder.round(total);

    let (remaining, is_balanced) = match (rounder.to_units(total), rounder.to_units(allocated_raw)) {
        (Some(t), Some(a)) => (rounder.from_units(t - a), t == a),
        _ => (f64::NAN, false),
    };

    let items = set
        .allocations
        .iter()
        .map(|a| ItemShare {
            work_item_id: a.work_item_id.clone(),
            amount: a.amount,
            percentage: if total.is_finite() && total != 0.0 {
                rounder.round(a.amount / total * 100.0)
            } else {
                0.0
            },
        })
        .collect();

    AllocationSummary {
        total: total_rounded,
        total_allocated,
        remaining,
        is_balanced,
        items,
    }
}

/// Memoizes [`summarize`] keyed by a canonical encoding of `(allocations, total)`.
///
/// Amounts are keyed by their exact bit patterns, so NaN and infinity never
/// collide the way they would through JSON numbers.
#[derive(Debug, Default)]
pub struct SummaryCache {
    entries: HashMap<String, AllocationSummary>,
    hits: u64,
    misses: u64,
}

impl SummaryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_key(set: &AllocationSet, total: f64) -> String {
        let items: Vec<(&str, String)> = set
            .allocations
            .iter()
            .map(|a| (a.work_item_id.as_str(), format!("{:016x}", a.amount.to_bits())))
            .collect();
        let total = format!("{:016x}", total.to_bits());
        // Serializing &str/String tuples cannot fail
        serde_json::to_string(&(items, total)).unwrap_or_default()
    }

    pub fn get_or_compute(
        &mut self,
        set: &AllocationSet,
        total: f64,
        rounder: &Rounder,
    ) -> AllocationSummary {
        let key = Self::cache_key(set, total);
        if let Some(hit) = self.entries.get(&key) {
            self.hits += 1;
            return hit.clone();
        }

        self.misses += 1;
        let summary = summarize(set, total, rounder);
        if self.entries.len() >= MAX_ENTRIES {
            self.entries.clear();
        }
        self.entries.insert(key, summary.clone());
        summary
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}
