use serde::{Deserialize, Serialize};

use crate::config::MAX_PRECISION;
use crate::models::RoundingMode;

/// Absorbs binary representation error before rounding
/// (`1.005 * 100` is `100.49999999999999` in f64).
const NUDGE: f64 = 1e-7;

/// Largest magnitude we convert to minor units without overflow risk.
const MAX_SCALED: f64 = (i64::MAX / 4) as f64;

/// Rounding at a fixed decimal precision, shared by every allocation operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rounder {
    precision: u32,
    mode: RoundingMode,
}

impl Rounder {
    pub fn new(precision: u32, mode: RoundingMode) -> Self {
        Self {
            precision: precision.min(MAX_PRECISION),
            mode,
        }
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    pub fn mode(&self) -> RoundingMode {
        self.mode
    }

    /// Minor units per whole unit (100 at precision 2).
    pub fn factor(&self) -> i64 {
        10i64.pow(self.precision)
    }

    /// Smallest representable amount, `10^-precision`.
    pub fn unit(&self) -> f64 {
        1.0 / self.factor() as f64
    }

    /// Convert an amount to minor units. `None` for NaN, infinities and
    /// magnitudes too large to represent.
    pub fn to_units(&self, value: f64) -> Option<i64> {
        if !value.is_finite() {
            return None;
        }
        let scaled = value * self.factor() as f64;
        if scaled.abs() >= MAX_SCALED {
            return None;
        }
        let rounded = match self.mode {
            RoundingMode::Round => (scaled + NUDGE.copysign(scaled)).round(),
            RoundingMode::Floor => (scaled + NUDGE).floor(),
            RoundingMode::Ceil => (scaled - NUDGE).ceil(),
        };
        Some(rounded as i64)
    }

    pub fn from_units(&self, units: i64) -> f64 {
        units as f64 / self.factor() as f64
    }

    /// Round an amount to precision. Non-finite values pass through untouched.
    pub fn round(&self, value: f64) -> f64 {
        self.to_units(value)
            .map(|u| self.from_units(u))
            .unwrap_or(value)
    }
}

impl Default for Rounder {
    fn default() -> Self {
        Self::new(2, RoundingMode::Round)
    }
}
