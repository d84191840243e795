//! `Receipt` — a frame's parsed structure, or the optimizer's fused output
//! (spec §3).

use rust_decimal::Decimal;

use crate::date::UtcDate;
use crate::entity::RecognizedEntity;
use crate::geometry::Rect;
use crate::position::Position;
use crate::price::decimal_to_cents;

#[derive(Debug, Clone, Default)]
pub struct Receipt {
    pub positions: Vec<Position>,
    pub store: Option<String>,
    pub total_label: Option<String>,
    pub total: Option<Decimal>,
    pub purchase_date: Option<UtcDate>,
    pub bounds: Option<Rect>,
    /// Debug-only record of every entity the parser recognized, regardless
    /// of whether it ended up in `positions`/header fields.
    pub entities: Option<Vec<RecognizedEntity>>,
    pub timestamp: i64,
}

impl Receipt {
    pub fn empty(timestamp: i64) -> Self {
        Self { timestamp, ..Default::default() }
    }

    pub fn calculated_total(&self) -> Decimal {
        self.positions.iter().map(|p| p.price.value).sum()
    }

    pub fn is_valid(&self, tolerance: Decimal) -> bool {
        match self.total {
            Some(total) => (self.calculated_total() - total).abs() <= tolerance,
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() && self.total.is_none()
    }

    /// Deterministic string over positions and total used by the optimizer
    /// to detect convergence (spec §4.2 step 2, glossary "Fingerprint").
    pub fn fingerprint(&self) -> String {
        let items = self
            .positions
            .iter()
            .map(|p| format!("{}:{}", p.product.normalized_text, decimal_to_cents(p.price.value)))
            .collect::<Vec<_>>()
            .join("|");
        let total = self.total.map(decimal_to_cents).unwrap_or(i64::MIN);
        format!("{items}|{total}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::Product;
    use crate::price::Price;
    use rust_decimal_macros::dec;

    fn pos(text: &str, price: Decimal) -> Position {
        Position::new(Product::new(text, text.to_lowercase()), Price::new(price), 0)
    }

    #[test]
    fn empty_receipt_is_empty() {
        let r = Receipt::empty(0);
        assert!(r.is_empty());
        assert_eq!(r.calculated_total(), Decimal::ZERO);
    }

    #[test]
    fn calculated_total_sums_prices() {
        let mut r = Receipt::empty(0);
        r.positions.push(pos("Milch", dec!(1.99)));
        r.positions.push(pos("Brot", dec!(2.50)));
        assert_eq!(r.calculated_total(), dec!(4.49));
    }

    #[test]
    fn is_valid_requires_total_within_tolerance() {
        let mut r = Receipt::empty(0);
        r.positions.push(pos("Milch", dec!(1.99)));
        r.total = Some(dec!(1.99));
        assert!(r.is_valid(dec!(0.01)));

        r.total = Some(dec!(5.00));
        assert!(!r.is_valid(dec!(0.01)));
    }

    #[test]
    fn is_valid_false_without_total() {
        let mut r = Receipt::empty(0);
        r.positions.push(pos("Milch", dec!(1.99)));
        assert!(!r.is_valid(dec!(0.01)));
    }

    #[test]
    fn fingerprint_is_stable_for_identical_receipts() {
        let mut a = Receipt::empty(0);
        a.positions.push(pos("Milch", dec!(1.99)));
        a.total = Some(dec!(1.99));
        let mut b = Receipt::empty(1);
        b.positions.push(pos("Milch", dec!(1.99)));
        b.total = Some(dec!(1.99));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_differs_on_price_change() {
        let mut a = Receipt::empty(0);
        a.positions.push(pos("Milch", dec!(1.99)));
        let mut b = Receipt::empty(0);
        b.positions.push(pos("Milch", dec!(2.99)));
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
