//! `Group` — a capacity-bounded, cross-frame bag of observations of the
//! same line item (spec §3, §4.4).

use std::collections::VecDeque;

use crate::confidence::{Confidence, ConfidenceWeights};
use crate::position::Position;
use crate::price::{decimal_to_cents, Price};
use crate::product::Product;
use crate::text::token_set_ratio;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u32);

#[derive(Debug, Clone)]
pub struct Group {
    pub id: GroupId,
    members: VecDeque<Position>,
    capacity: usize,
}

impl Group {
    pub fn new(id: GroupId, capacity: usize) -> Self {
        Self { id, members: VecDeque::new(), capacity: capacity.max(1) }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> impl Iterator<Item = &Position> {
        self.members.iter()
    }

    pub fn members_mut(&mut self) -> impl Iterator<Item = &mut Position> {
        self.members.iter_mut()
    }

    /// Add `position` to the bag; evict the oldest *inserted* member (FIFO,
    /// not by timestamp) if at capacity, then recompute every remaining
    /// member's product/price confidence against the new bag (spec §3, §4.4).
    pub fn add(&mut self, mut position: Position, weights: ConfidenceWeights) {
        position.group = Some(self.id);
        if self.members.len() >= self.capacity {
            self.members.pop_front();
        }
        self.members.push_back(position);
        self.recompute_confidences(weights);
    }

    fn recompute_confidences(&mut self, weights: ConfidenceWeights) {
        let snapshot: Vec<Position> = self.members.iter().cloned().collect();
        for member in self.members.iter_mut() {
            let product_conf = calculate_product_confidence_against(
                &member.product,
                &snapshot,
                weights.product_weight,
            );
            let price_conf =
                calculate_price_confidence_against(&member.price, &snapshot, weights.price_weight);
            member.product.confidence = Some(product_conf);
            member.price.confidence = Some(price_conf);
        }
    }

    /// `Group.calculate_product_confidence(p)` (spec §4.4), evaluated
    /// against the group's current members.
    pub fn calculate_product_confidence(&self, p: &Product, weights: ConfidenceWeights) -> Confidence {
        let snapshot: Vec<Position> = self.members.iter().cloned().collect();
        calculate_product_confidence_against(p, &snapshot, weights.product_weight)
    }

    /// `Group.calculate_price_confidence(p)` (spec §4.4).
    pub fn calculate_price_confidence(&self, p: &Price, weights: ConfidenceWeights) -> Confidence {
        let snapshot: Vec<Position> = self.members.iter().cloned().collect();
        calculate_price_confidence_against(p, &snapshot, weights.price_weight)
    }

    /// Percentage of members agreeing on the normalized product text —
    /// the group's "stability" (spec §3, glossary).
    pub fn stability(&self) -> f64 {
        if self.members.is_empty() {
            return 0.0;
        }
        let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for m in &self.members {
            *counts.entry(m.product.normalized_text.as_str()).or_insert(0) += 1;
        }
        let max = counts.values().copied().max().unwrap_or(0);
        (max as f64 / self.members.len() as f64) * 100.0
    }

    /// Average of members' combined confidences.
    pub fn confidence(&self) -> Option<Confidence> {
        let items: Vec<Confidence> = self.members.iter().filter_map(|m| m.confidence()).collect();
        Confidence::weighted_avg(&items)
    }

    /// Max member timestamp.
    pub fn timestamp(&self) -> Option<i64> {
        self.members.iter().map(|m| m.timestamp).max()
    }
}

fn calculate_product_confidence_against(p: &Product, members: &[Position], weight: u32) -> Confidence {
    if members.is_empty() {
        return Confidence::new(0.0, weight);
    }
    let scores: Vec<f64> = members
        .iter()
        .map(|m| token_set_ratio(&p.text, &m.product.text) as f64)
        .collect();
    let avg = scores.iter().sum::<f64>() / scores.len() as f64;
    let variance = scores.iter().map(|s| (s - avg).powi(2)).sum::<f64>() / scores.len() as f64;
    let stddev = variance.max(0.0).sqrt();
    let consistency_weight = if stddev < 10.0 { 1.0 } else { (100.0 - stddev) / 100.0 };
    Confidence::new((avg * consistency_weight).clamp(0.0, 100.0), weight)
}

fn calculate_price_confidence_against(p: &Price, members: &[Position], weight: u32) -> Confidence {
    let any_match = members.iter().any(|m| decimal_to_cents(m.price.value) == decimal_to_cents(p.value));
    Confidence::new(if any_match { 100.0 } else { 0.0 }, weight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(text: &str, price: rust_decimal::Decimal, ts: i64) -> Position {
        Position::new(Product::new(text, text.to_lowercase()), Price::new(price), ts)
    }

    #[test]
    fn add_evicts_oldest_on_overflow() {
        let mut g = Group::new(GroupId(0), 2);
        let weights = ConfidenceWeights::default();
        g.add(position("Milch", dec!(1.99), 1), weights);
        g.add(position("Milch", dec!(1.99), 2), weights);
        g.add(position("Milch", dec!(1.99), 3), weights);
        assert_eq!(g.len(), 2);
        assert_eq!(g.members().map(|m| m.timestamp).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn stability_is_100_for_unanimous_bag() {
        let mut g = Group::new(GroupId(0), 20);
        let weights = ConfidenceWeights::default();
        g.add(position("Milch", dec!(1.99), 1), weights);
        g.add(position("Milch", dec!(1.99), 2), weights);
        assert_eq!(g.stability(), 100.0);
    }

    #[test]
    fn stability_reflects_disagreement() {
        let mut g = Group::new(GroupId(0), 20);
        let weights = ConfidenceWeights::default();
        g.add(position("Milch", dec!(1.99), 1), weights);
        g.add(position("Brot", dec!(1.99), 2), weights);
        assert_eq!(g.stability(), 50.0);
    }

    #[test]
    fn price_confidence_100_when_any_member_matches() {
        let mut g = Group::new(GroupId(0), 20);
        let weights = ConfidenceWeights::default();
        g.add(position("Milch", dec!(1.99), 1), weights);
        let c = g.calculate_price_confidence(&Price::new(dec!(1.99)), weights);
        assert_eq!(c.value, 100);
    }

    #[test]
    fn price_confidence_0_when_no_member_matches() {
        let mut g = Group::new(GroupId(0), 20);
        let weights = ConfidenceWeights::default();
        g.add(position("Milch", dec!(1.99), 1), weights);
        let c = g.calculate_price_confidence(&Price::new(dec!(3.50)), weights);
        assert_eq!(c.value, 0);
    }

    #[test]
    fn product_confidence_high_for_identical_text() {
        let mut g = Group::new(GroupId(0), 20);
        let weights = ConfidenceWeights::default();
        g.add(position("Milch", dec!(1.99), 1), weights);
        g.add(position("Milch", dec!(1.99), 2), weights);
        let c = g.calculate_product_confidence(&Product::new("Milch", "milch"), weights);
        assert_eq!(c.value, 100);
    }

    #[test]
    fn timestamp_is_max_across_members() {
        let mut g = Group::new(GroupId(0), 20);
        let weights = ConfidenceWeights::default();
        g.add(position("Milch", dec!(1.99), 5), weights);
        g.add(position("Milch", dec!(1.99), 9), weights);
        assert_eq!(g.timestamp(), Some(9));
    }
}
