use super::cache::{AllocationSummary, SummaryCache};
use super::optimistic::{OptimisticUpdate, SpeculativeLog};
use super::rounding::Rounder;
use super::validation::{self, ValidationIssue};
use super::AllocationError;
use crate::config::CaptureConfig;
use crate::models::{Allocation, AllocationSet, RoundingMode};

// ═══════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════

/// Reconciles per-work-item amounts against a receipt total.
///
/// Edit operations are pure: they take a set and return a new one. The
/// speculative log and the summary cache are the only mutable state.
#[derive(Debug)]
pub struct AllocationEngine {
    rounder: Rounder,
    log: SpeculativeLog,
    cache: SummaryCache,
}

impl AllocationEngine {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            rounder: Rounder::new(config.precision, config.rounding),
            log: SpeculativeLog::new(config.speculative_log_capacity),
            cache: SummaryCache::new(),
        }
    }

    pub fn with_rounding(precision: u32, mode: RoundingMode) -> Self {
        Self {
            rounder: Rounder::new(precision, mode),
            log: SpeculativeLog::default(),
            cache: SummaryCache::new(),
        }
    }

    pub fn rounder(&self) -> &Rounder {
        &self.rounder
    }

    /// Set one item's amount. Other items are left alone.
    pub fn update_by_amount(
        &self,
        set: &AllocationSet,
        work_item_id: &str,
        amount: f64,
    ) -> Result<AllocationSet, AllocationError> {
        let mut next = set.clone();
        let item = next
            .allocations
            .iter_mut()
            .find(|a| a.work_item_id == work_item_id)
            .ok_or_else(|| AllocationError::UnknownItem(work_item_id.to_string()))?;
        // Non-finite input is kept as-is so validation can report it
        item.amount = self.rounder.round(amount);
        Ok(next)
    }

    /// Set one item's amount to `pct` percent of `total`.
    pub fn update_by_percentage(
        &self,
        set: &AllocationSet,
        work_item_id: &str,
        pct: f64,
        total: f64,
    ) -> Result<AllocationSet, AllocationError> {
        if !pct.is_finite() || !(0.0..=100.0).contains(&pct) {
            return Err(AllocationError::InvalidPercentage(pct));
        }
        if !total.is_finite() {
            return Err(AllocationError::NonFiniteTotal);
        }
        let amount = self.rounder.round(pct / 100.0 * total);
        self.update_by_amount(set, work_item_id, amount)
    }

    /// Spread `total - Σ amounts` across every item.
    ///
    /// Each item gets the truncated even share; whatever is left after the
    /// even division goes to the largest item (first one on ties). Empty sets
    /// and sets holding non-finite amounts come back unchanged.
    pub fn distribute_remainder(&self, set: &AllocationSet, total: f64) -> AllocationSet {
        let mut next = set.clone();
        next.target_total = total;
        if next.allocations.is_empty() {
            return next;
        }

        let Some(total_units) = self.rounder.to_units(total) else {
            tracing::debug!("Remainder not distributed: total is not finite");
            return next;
        };
        let units: Option<Vec<i64>> = next
            .allocations
            .iter()
            .map(|a| self.rounder.to_units(a.amount))
            .collect();
        let Some(mut units) = units else {
            tracing::debug!("Remainder not distributed: set holds non-finite amounts");
            return next;
        };

        let remainder = total_units - units.iter().sum::<i64>();
        if remainder == 0 {
            return next;
        }

        let n = units.len() as i64;
        let share = remainder / n;
        let leftover = remainder - share * n;

        let mut largest = 0;
        for (idx, u) in units.iter().enumerate() {
            if *u > units[largest] {
                largest = idx;
            }
        }
        for u in units.iter_mut() {
            *u += share;
        }
        units[largest] += leftover;

        for (allocation, u) in next.allocations.iter_mut().zip(units) {
            allocation.amount = self.rounder.from_units(u);
        }
        tracing::debug!(
            remainder = self.rounder.from_units(remainder),
            items = n,
            "Remainder distributed"
        );
        next
    }

    /// Split `total` evenly. Residual minor units go one each to the
    /// leading items, so amounts differ by at most one unit.
    pub fn split_evenly<S: AsRef<str>>(
        &self,
        work_item_ids: &[S],
        total: f64,
    ) -> Result<AllocationSet, AllocationError> {
        let total_units = self
            .rounder
            .to_units(total)
            .ok_or(AllocationError::NonFiniteTotal)?;
        if work_item_ids.is_empty() {
            return Ok(AllocationSet::new(total));
        }

        let n = work_item_ids.len() as i64;
        let base = total_units.div_euclid(n);
        let extra = total_units.rem_euclid(n) as usize;

        let allocations = work_item_ids
            .iter()
            .enumerate()
            .map(|(idx, id)| {
                let units = if idx < extra { base + 1 } else { base };
                Allocation::new(id.as_ref(), self.rounder.from_units(units))
            })
            .collect();
        Ok(AllocationSet::with_allocations(total, allocations))
    }

    /// Proportional split. Every item but the last is rounded; the last one
    /// takes whatever is left so the sum is exact.
    pub fn split_by_ratio<S: AsRef<str>>(
        &self,
        work_item_ids: &[S],
        ratios: &[f64],
        total: f64,
    ) -> Result<AllocationSet, AllocationError> {
        if work_item_ids.len() != ratios.len() {
            return Err(AllocationError::RatioLengthMismatch {
                items: work_item_ids.len(),
                ratios: ratios.len(),
            });
        }
        if let Some(bad) = ratios.iter().find(|r| !r.is_finite() || **r < 0.0) {
            return Err(AllocationError::InvalidRatios(format!(
                "ratio {bad} is not a non-negative number"
            )));
        }
        let total_units = self
            .rounder
            .to_units(total)
            .ok_or(AllocationError::NonFiniteTotal)?;
        if work_item_ids.is_empty() {
            return Ok(AllocationSet::new(total));
        }

        let ratio_sum: f64 = ratios.iter().sum();
        if ratio_sum <= 0.0 {
            return Err(AllocationError::InvalidRatios("ratios sum to zero".into()));
        }

        let last = work_item_ids.len() - 1;
        let mut assigned = 0i64;
        let mut allocations = Vec::with_capacity(work_item_ids.len());
        for (idx, (id, ratio)) in work_item_ids.iter().zip(ratios).enumerate() {
            let units = if idx == last {
                total_units - assigned
            } else {
                self.rounder
                    .to_units(total * ratio / ratio_sum)
                    .ok_or(AllocationError::NonFiniteTotal)?
            };
            assigned += units;
            allocations.push(Allocation::new(id.as_ref(), self.rounder.from_units(units)));
        }
        Ok(AllocationSet::with_allocations(total, allocations))
    }

    pub fn validate(&self, set: &AllocationSet, total: f64) -> Vec<ValidationIssue> {
        validation::validate(set, total, &self.rounder)
    }

    /// Summary of `set` against `total`, memoized.
    pub fn calculate_state(&mut self, set: &AllocationSet, total: f64) -> AllocationSummary {
        self.cache.get_or_compute(set, total, &self.rounder)
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cache(&self) -> &SummaryCache {
        &self.cache
    }

    // ── Speculative edits ───────────────────────────────────────

    pub fn begin_optimistic(
        &mut self,
        id: impl Into<String>,
        before: AllocationSet,
        after: AllocationSet,
        action: impl Into<String>,
    ) -> Option<OptimisticUpdate> {
        self.log.begin(id, before, after, action)
    }

    pub fn commit(&mut self, id: &str) -> Result<OptimisticUpdate, AllocationError> {
        self.log.commit(id)
    }

    pub fn rollback(&mut self, id: &str) -> Result<AllocationSet, AllocationError> {
        self.log.rollback(id)
    }

    pub fn speculative_log(&self) -> &SpeculativeLog {
        &self.log
    }

    /// Forget pending speculative edits and cached summaries.
    pub fn reset(&mut self) {
        self.log.clear();
        self.cache.clear();
    }
}

impl Default for AllocationEngine {
    fn default() -> Self {
        Self::new(&CaptureConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> AllocationEngine {
        AllocationEngine::default()
    }

    fn set(total: f64, items: &[(&str, f64)]) -> AllocationSet {
        AllocationSet::with_allocations(
            total,
            items.iter().map(|(id, a)| Allocation::new(*id, *a)).collect(),
        )
    }

    fn amounts(set: &AllocationSet) -> Vec<f64> {
        set.allocations.iter().map(|a| a.amount).collect()
    }

    fn units_sum(engine: &AllocationEngine, set: &AllocationSet) -> i64 {
        set.allocations
            .iter()
            .map(|a| engine.rounder().to_units(a.amount).unwrap())
            .sum()
    }

    #[test]
    fn split_evenly_three_ways() {
        let e = engine();
        let s = e.split_evenly(&["A", "B", "C"], 100.0).unwrap();
        assert_eq!(amounts(&s), vec![33.34, 33.33, 33.33]);
        assert_eq!(units_sum(&e, &s), 10_000);
        assert_eq!(s.target_total, 100.0);
    }

    #[test]
    fn split_evenly_is_fair_and_exact() {
        let e = engine();
        let ids: Vec<String> = (0..12).map(|i| format!("w{i}")).collect();
        for total in [0.01, 0.05, 1.0, 10.0, 99.99, 100.0, 123.45, 1000.07] {
            for n in 1..=ids.len() {
                let s = e.split_evenly(&ids[..n], total).unwrap();
                let units: Vec<i64> = s
                    .allocations
                    .iter()
                    .map(|a| e.rounder().to_units(a.amount).unwrap())
                    .collect();
                let max = units.iter().max().unwrap();
                let min = units.iter().min().unwrap();
                assert!(max - min <= 1, "total {total} n {n}: {units:?}");
                assert_eq!(units.iter().sum::<i64>(), e.rounder().to_units(total).unwrap());
            }
        }
    }

    #[test]
    fn distribute_remainder_goes_to_largest() {
        let e = engine();
        let s = e.distribute_remainder(&set(100.0, &[("A", 49.99), ("B", 50.0)]), 100.0);
        assert_eq!(amounts(&s), vec![49.99, 50.01]);
    }

    #[test]
    fn distribute_remainder_ties_go_to_first() {
        let e = engine();
        let s = e.distribute_remainder(&set(100.0, &[("A", 40.0), ("B", 40.0)]), 80.03);
        // share 1 unit each, leftover 1 unit to A
        assert_eq!(amounts(&s), vec![40.02, 40.01]);
    }

    #[test]
    fn distribute_remainder_handles_over_allocation() {
        let e = engine();
        let s = e.distribute_remainder(&set(90.0, &[("A", 30.0), ("B", 35.0), ("C", 35.0)]), 90.0);
        assert_eq!(units_sum(&e, &s), 9_000);
        // -10.00 over: -3.33 each, the extra unit off B
        assert_eq!(amounts(&s), vec![26.67, 31.66, 31.67]);
    }

    #[test]
    fn distribute_remainder_totality() {
        let e = engine();
        let cases = [
            (set(100.0, &[("A", 10.0), ("B", 20.0), ("C", 30.0)]), 100.0),
            (set(10.0, &[("A", 3.333), ("B", 3.333)]), 10.0),
            (set(0.0, &[("A", 5.0)]), 0.0),
            (set(50.0, &[("A", 0.0), ("B", 0.0), ("C", 0.0), ("D", 0.0)]), 50.01),
        ];
        for (s, total) in cases {
            let out = e.distribute_remainder(&s, total);
            assert_eq!(units_sum(&e, &out), e.rounder().to_units(total).unwrap());
            assert!(e.validate(&out, total).is_empty());
        }
    }

    #[test]
    fn distribute_remainder_on_balanced_set_is_noop() {
        let e = engine();
        let balanced = set(100.0, &[("A", 25.0), ("B", 75.0)]);
        assert_eq!(e.distribute_remainder(&balanced, 100.0), balanced);
    }

    #[test]
    fn distribute_remainder_on_empty_set_is_empty() {
        let e = engine();
        let out = e.distribute_remainder(&AllocationSet::new(0.0), 100.0);
        assert!(out.is_empty());
        assert_eq!(out.target_total, 100.0);
    }

    #[test]
    fn distribute_remainder_skips_non_finite() {
        let e = engine();
        let s = set(100.0, &[("A", f64::NAN), ("B", 50.0)]);
        let out = e.distribute_remainder(&s, 100.0);
        assert!(out.allocations[0].amount.is_nan());
        assert_eq!(out.allocations[1].amount, 50.0);
    }

    #[test]
    fn update_by_percentage_quarter_of_two_hundred() {
        let e = engine();
        let s = set(200.0, &[("X", 0.0), ("Y", 0.0)]);
        let out = e.update_by_percentage(&s, "X", 25.0, 200.0).unwrap();
        assert_eq!(out.amount_of("X"), Some(50.0));
        assert_eq!(out.amount_of("Y"), Some(0.0));
    }

    #[test]
    fn percentage_consistent_with_amount() {
        let e = engine();
        let s = set(0.0, &[("X", 0.0)]);
        for (pct, total) in [(33.333, 100.0), (12.5, 19.99), (100.0, 45.67), (0.0, 10.0), (7.0, 0.3)] {
            let by_pct = e.update_by_percentage(&s, "X", pct, total).unwrap();
            let direct = e
                .update_by_amount(&s, "X", e.rounder().round(pct / 100.0 * total))
                .unwrap();
            assert_eq!(by_pct, direct);
        }
    }

    #[test]
    fn update_rejects_unknown_item_and_bad_percentage() {
        let e = engine();
        let s = set(100.0, &[("A", 1.0)]);
        assert_eq!(
            e.update_by_amount(&s, "Z", 1.0),
            Err(AllocationError::UnknownItem("Z".into()))
        );
        assert_eq!(
            e.update_by_percentage(&s, "A", 120.0, 100.0),
            Err(AllocationError::InvalidPercentage(120.0))
        );
        assert_eq!(
            e.update_by_percentage(&s, "A", 10.0, f64::INFINITY),
            Err(AllocationError::NonFiniteTotal)
        );
    }

    #[test]
    fn update_by_amount_rounds() {
        let e = engine();
        let out = e
            .update_by_amount(&set(100.0, &[("A", 0.0)]), "A", 12.345)
            .unwrap();
        assert_eq!(out.amount_of("A"), Some(12.35));
    }

    #[test]
    fn split_by_ratio_last_absorbs_residual() {
        let e = engine();
        let s = e.split_by_ratio(&["A", "B", "C"], &[1.0, 1.0, 1.0], 100.0).unwrap();
        assert_eq!(amounts(&s), vec![33.33, 33.33, 33.34]);

        for (ratios, total) in [
            (vec![0.2, 0.3, 0.5], 45.67),
            (vec![1.0, 2.0, 3.0], 10.0),
            (vec![7.0, 0.0, 1.0], 0.07),
        ] {
            let s = e.split_by_ratio(&["A", "B", "C"], &ratios, total).unwrap();
            assert_eq!(units_sum(&e, &s), e.rounder().to_units(total).unwrap());
        }
    }

    #[test]
    fn split_by_ratio_rejects_bad_input() {
        let e = engine();
        assert_eq!(
            e.split_by_ratio(&["A", "B"], &[1.0], 10.0),
            Err(AllocationError::RatioLengthMismatch { items: 2, ratios: 1 })
        );
        assert!(matches!(
            e.split_by_ratio(&["A"], &[-1.0], 10.0),
            Err(AllocationError::InvalidRatios(_))
        ));
        assert!(matches!(
            e.split_by_ratio(&["A", "B"], &[0.0, 0.0], 10.0),
            Err(AllocationError::InvalidRatios(_))
        ));
        assert_eq!(
            e.split_by_ratio(&["A"], &[1.0], f64::NAN),
            Err(AllocationError::NonFiniteTotal)
        );
    }

    #[test]
    fn empty_splits_are_empty() {
        let e = engine();
        let none: [&str; 0] = [];
        assert!(e.split_evenly(&none, 100.0).unwrap().is_empty());
        assert!(e.split_by_ratio(&none, &[], 100.0).unwrap().is_empty());
    }

    #[test]
    fn zero_total_with_allocations_is_a_mismatch() {
        let e = engine();
        let issues = e.validate(&set(0.0, &[("A", 5.0)]), 0.0);
        assert!(matches!(
            issues.as_slice(),
            [ValidationIssue::TotalMismatch { difference, .. }] if *difference == -5.0
        ));
    }

    #[test]
    fn floor_mode_applies_everywhere() {
        let e = AllocationEngine::with_rounding(2, RoundingMode::Floor);
        let out = e
            .update_by_percentage(&set(10.0, &[("A", 0.0)]), "A", 33.0, 10.01)
            .unwrap();
        // 3.3033 floors to 3.30
        assert_eq!(out.amount_of("A"), Some(3.3));

        let s = e.split_evenly(&["A", "B", "C"], 10.0).unwrap();
        assert_eq!(units_sum(&e, &s), 1_000);
    }

    #[test]
    fn calculate_state_is_cached_until_cleared() {
        let mut e = engine();
        let s = set(100.0, &[("A", 25.0), ("B", 75.0)]);
        let first = e.calculate_state(&s, 100.0);
        let second = e.calculate_state(&s, 100.0);
        assert_eq!(first, second);
        assert!(first.is_balanced);
        assert_eq!(e.cache().hits(), 1);

        e.clear_cache();
        assert!(e.cache().is_empty());
    }

    #[test]
    fn optimistic_round_trip_through_engine() {
        let mut e = engine();
        let before = set(100.0, &[("A", 50.0), ("B", 50.0)]);
        let after = e.update_by_amount(&before, "A", 60.0).unwrap();

        let id = SpeculativeLog::new_correlation_id();
        e.begin_optimistic(id.clone(), before.clone(), after, "update_by_amount");
        assert_eq!(e.speculative_log().len(), 1);
        assert_eq!(e.rollback(&id).unwrap(), before);
        assert!(e.commit(&id).is_err());
    }
}
