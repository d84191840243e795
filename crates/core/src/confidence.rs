//! Confidence scoring shared by `Product`, `Price` and `Group`.

use serde::{Deserialize, Serialize};

/// A 0–100 confidence score with an integer weight, combined by weighted
/// mean wherever two or more confidences must be fused (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    pub value: u8,
    pub weight: u32,
}

impl Confidence {
    pub fn new(value: f64, weight: u32) -> Self {
        Self {
            value: value.round().clamp(0.0, 100.0) as u8,
            weight: weight.max(1),
        }
    }

    /// Weighted average of a set of confidences: `Σ(value·weight) / Σweight`.
    /// Returns `None` for an empty slice.
    pub fn weighted_avg(items: &[Confidence]) -> Option<Confidence> {
        if items.is_empty() {
            return None;
        }
        let total_weight: u64 = items.iter().map(|c| c.weight as u64).sum();
        if total_weight == 0 {
            return None;
        }
        let sum: f64 = items
            .iter()
            .map(|c| c.value as f64 * c.weight as f64)
            .sum();
        Some(Confidence::new(sum / total_weight as f64, 1))
    }
}

/// Weights used by `Group::calculate_product_confidence` /
/// `calculate_price_confidence` (spec §4.4) and by position-to-group
/// combination (spec §4.2 step 6). Supplied by `Options`/`Tuning` in the
/// `receipt-fusion` crate so this module stays configuration-free.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceWeights {
    pub product_weight: u32,
    pub price_weight: u32,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self { product_weight: 1, price_weight: 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_avg_simple() {
        let items = [Confidence::new(100.0, 1), Confidence::new(0.0, 1)];
        let avg = Confidence::weighted_avg(&items).unwrap();
        assert_eq!(avg.value, 50);
    }

    #[test]
    fn weighted_avg_respects_weight() {
        let items = [Confidence::new(100.0, 3), Confidence::new(0.0, 1)];
        let avg = Confidence::weighted_avg(&items).unwrap();
        assert_eq!(avg.value, 75);
    }

    #[test]
    fn weighted_avg_empty_is_none() {
        assert!(Confidence::weighted_avg(&[]).is_none());
    }

    #[test]
    fn new_clamps_and_rounds() {
        assert_eq!(Confidence::new(150.0, 1).value, 100);
        assert_eq!(Confidence::new(-10.0, 1).value, 0);
        assert_eq!(Confidence::new(72.6, 1).value, 73);
    }
}
