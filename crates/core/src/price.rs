//! `Price` and `Unit` (spec §3).

use crate::confidence::Confidence;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Price {
    /// Signed; negative for discounts.
    pub value: Decimal,
    pub confidence: Option<Confidence>,
}

impl Price {
    pub fn new(value: Decimal) -> Self {
        Self { value, confidence: None }
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Integer cents, rounded to the nearest cent.
    pub fn cents(&self) -> i64 {
        decimal_to_cents(self.value)
    }
}

pub fn decimal_to_cents(value: Decimal) -> i64 {
    use rust_decimal::prelude::ToPrimitive;
    (value * Decimal::from(100)).round().to_i64().unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Unit {
    pub quantity: u32,
    pub price: Decimal,
}

impl Unit {
    /// Constructed only when `quantity · price` approximates the position's
    /// total price within `tolerance` (spec §3).
    pub fn try_new(quantity: u32, price: Decimal, position_price: Decimal, tolerance: Decimal) -> Option<Self> {
        if quantity == 0 {
            return None;
        }
        let derived = Decimal::from(quantity) * price;
        if (derived - position_price).abs() < tolerance {
            Some(Self { quantity, price })
        } else {
            None
        }
    }
}
