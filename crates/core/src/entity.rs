//! Recognized frame-wide and per-line entities (spec §3).
//!
//! The original design models these as a class hierarchy dispatched on
//! `.runtimeType`; the Rust-idiomatic replacement (per spec §9's design
//! note) is a single tagged union matched exhaustively everywhere a caller
//! used to downcast.

use crate::date::UtcDate;
use crate::geometry::Rect;
use crate::textline::TextLine;
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq)]
pub enum EntityValue {
    /// Canonical store name.
    Store(String),
    /// Canonical total label (e.g. "Summe", "合計").
    TotalLabel(String),
    /// Numeric total.
    Total(Decimal),
    /// Numeric right-aligned amount candidate.
    Amount(Decimal),
    /// Left-aligned text candidate (product name or other).
    Unknown(String),
    PurchaseDate(UtcDate),
    /// Aggregate axis-aligned bounding rect of all lines in the frame.
    Bounds(Rect),
    /// Auxiliary per-unit price.
    UnitPrice(Decimal),
    /// Auxiliary unit count, always >= 1.
    UnitQuantity(u32),
}

impl EntityValue {
    pub fn kind(&self) -> &'static str {
        match self {
            EntityValue::Store(_) => "store",
            EntityValue::TotalLabel(_) => "total_label",
            EntityValue::Total(_) => "total",
            EntityValue::Amount(_) => "amount",
            EntityValue::Unknown(_) => "unknown",
            EntityValue::PurchaseDate(_) => "purchase_date",
            EntityValue::Bounds(_) => "bounds",
            EntityValue::UnitPrice(_) => "unit_price",
            EntityValue::UnitQuantity(_) => "unit_quantity",
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            EntityValue::Total(v) | EntityValue::Amount(v) | EntityValue::UnitPrice(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            EntityValue::Store(s) | EntityValue::TotalLabel(s) | EntityValue::Unknown(s) => {
                Some(s.as_str())
            }
            _ => None,
        }
    }
}

/// One recognized entity: a tag-carrying value plus the `TextLine` it was
/// read from (spec §3: "Every variant carries `line` ... and `value`").
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedEntity {
    pub line: TextLine,
    pub value: EntityValue,
}

impl RecognizedEntity {
    pub fn new(line: TextLine, value: EntityValue) -> Self {
        Self { line, value }
    }

    pub fn is_total_label(&self) -> bool {
        matches!(self.value, EntityValue::TotalLabel(_))
    }

    pub fn is_total(&self) -> bool {
        matches!(self.value, EntityValue::Total(_))
    }

    pub fn is_amount(&self) -> bool {
        matches!(self.value, EntityValue::Amount(_))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self.value, EntityValue::Unknown(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> TextLine {
        TextLine::new("x", Rect::new(0.0, 0.0, 1.0, 1.0))
    }

    #[test]
    fn kind_matches_variant() {
        let e = RecognizedEntity::new(line(), EntityValue::Total(Decimal::new(199, 2)));
        assert_eq!(e.value.kind(), "total");
        assert!(e.is_total());
        assert!(!e.is_amount());
    }

    #[test]
    fn as_decimal_only_for_numeric_variants() {
        let amount = EntityValue::Amount(Decimal::new(500, 2));
        assert_eq!(amount.as_decimal(), Some(Decimal::new(500, 2)));
        let store = EntityValue::Store("Aldi".into());
        assert_eq!(store.as_decimal(), None);
    }

    #[test]
    fn as_text_covers_string_variants() {
        assert_eq!(EntityValue::Store("Aldi".into()).as_text(), Some("Aldi"));
        assert_eq!(EntityValue::Unknown("Milch".into()).as_text(), Some("Milch"));
        assert_eq!(EntityValue::UnitQuantity(2).as_text(), None);
    }
}
