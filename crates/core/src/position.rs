//! `Position` — one line item, product + price [+ unit] (spec §3).

use crate::confidence::Confidence;
use crate::geometry::Rect;
use crate::group::GroupId;
use crate::price::Price;
use crate::price::Unit;
use crate::product::Product;

/// What the optimizer did to this position in the current frame (spec §4.2
/// step 5–6: reset to `None`, then set to `Added` or `Updated`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    None,
    Added,
    Updated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub product: Product,
    pub price: Price,
    pub unit: Option<Unit>,
    /// Frame ingest time, milliseconds since an arbitrary epoch chosen by
    /// the caller — only relative ordering/age matters to this crate.
    pub timestamp: i64,
    pub operation: Operation,
    /// Lookup reference to the owning `Group`, never an ownership edge
    /// (spec §9 design note): the group itself owns its own copies of its
    /// member positions.
    pub group: Option<GroupId>,
    /// Product line's bounding rect, when the caller is geometry-aware
    /// (the parser always sets this; synthetic/test positions may not).
    /// Consumed by order learning (spec §4.5, `y = product.line.bbox.center_y`)
    /// and by the optimizer's geometry patch-through (spec §4.2 step 10).
    pub bbox: Option<Rect>,
}

impl Position {
    pub fn new(product: Product, price: Price, timestamp: i64) -> Self {
        Self {
            product,
            price,
            unit: None,
            timestamp,
            operation: Operation::None,
            group: None,
            bbox: None,
        }
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn with_bbox(mut self, bbox: Rect) -> Self {
        self.bbox = Some(bbox);
        self
    }

    /// `weighted_avg(product.confidence, price.confidence)`.
    pub fn confidence(&self) -> Option<Confidence> {
        let items: Vec<Confidence> = [self.product.confidence, self.price.confidence]
            .into_iter()
            .flatten()
            .collect();
        Confidence::weighted_avg(&items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pos() -> Position {
        Position::new(
            Product::new("Milch", "milch").with_confidence(Confidence::new(80.0, 1)),
            Price::new(dec!(1.99)).with_confidence(Confidence::new(100.0, 1)),
            0,
        )
    }

    #[test]
    fn confidence_combines_product_and_price() {
        let p = pos();
        let c = p.confidence().unwrap();
        assert_eq!(c.value, 90);
    }

    #[test]
    fn confidence_none_when_neither_set() {
        let p = Position::new(Product::new("x", "x"), Price::new(dec!(1.0)), 0);
        assert!(p.confidence().is_none());
    }

    #[test]
    fn new_position_has_no_group_and_no_operation() {
        let p = pos();
        assert_eq!(p.group, None);
        assert_eq!(p.operation, Operation::None);
    }
}
