use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Structured fields recovered from one receipt image.
///
/// Replaced wholesale on retry, never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub vendor: String,
    pub total: f64,
    #[serde(default)]
    pub subtotal: Option<f64>,
    #[serde(default)]
    pub tax: Option<f64>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    /// Field name → confidence in [0, 1]. Opaque to this crate; no thresholding here.
    #[serde(default)]
    pub confidence: BTreeMap<String, f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit_price: Option<f64>,
    pub amount: f64,
}

impl ExtractionResult {
    /// Structural sanity check on a response from the extraction service.
    ///
    /// Returns a description of the first problem found.
    pub fn check_well_formed(&self) -> Result<(), String> {
        if !self.total.is_finite() || self.total < 0.0 {
            return Err(format!("total is not a valid amount: {}", self.total));
        }
        for (name, value) in [("subtotal", self.subtotal), ("tax", self.tax)] {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(format!("{name} is not finite"));
                }
            }
        }
        if let Some((idx, _)) = self
            .line_items
            .iter()
            .enumerate()
            .find(|(_, item)| !item.amount.is_finite())
        {
            return Err(format!("line item {idx} has a non-finite amount"));
        }
        if let Some((field, c)) = self
            .confidence
            .iter()
            .find(|(_, c)| !c.is_finite() || **c < 0.0 || **c > 1.0)
        {
            return Err(format!("confidence for '{field}' out of range: {c}"));
        }
        Ok(())
    }
}
