//! Order learning (spec §4.5): EWMA-smoothed vertical position per group
//! plus pairwise "above" vote counts, combined into a total order over
//! groups for the merged receipt's position list.

use std::cmp::Ordering;
use std::collections::HashMap;

use receipt_fusion_core::GroupId;

#[derive(Debug, Clone)]
pub struct GroupOrderStats {
    pub order_y: f64,
    pub has_y: bool,
    pub first_seen: i64,
    pub above_counts: HashMap<GroupId, u32>,
}

impl GroupOrderStats {
    fn new(first_seen: i64) -> Self {
        Self { order_y: 0.0, has_y: false, first_seen, above_counts: HashMap::new() }
    }
}

/// Per-optimizer-instance order state (spec §4.2 state: "`order_stats`: map
/// Group → {order_y, has_y, first_seen, above_counts}").
#[derive(Debug, Clone, Default)]
pub struct OrderTracker {
    stats: HashMap<GroupId, GroupOrderStats>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// EWMA update for one (group, y) observation this frame (first
    /// observation for a group initializes rather than blends).
    pub fn observe(&mut self, group: GroupId, y: f64, timestamp: i64, alpha: f64) {
        let entry = self.stats.entry(group).or_insert_with(|| GroupOrderStats::new(timestamp));
        if entry.has_y {
            entry.order_y = (1.0 - alpha) * entry.order_y + alpha * y;
        } else {
            entry.order_y = y;
            entry.has_y = true;
        }
    }

    /// Record that `above` was observed vertically above `below` in this
    /// frame's scan.
    pub fn record_above(&mut self, above: GroupId, below: GroupId) {
        let entry = self.stats.entry(above).or_insert_with(|| GroupOrderStats::new(0));
        *entry.above_counts.entry(below).or_insert(0) += 1;
    }

    /// Halve every group's above-counts, floored at 1, once any group's
    /// total exceeds `decay_threshold` (spec §4.5 "soft aging").
    pub fn decay_if_needed(&mut self, decay_threshold: u32) {
        let any_over = self
            .stats
            .values()
            .any(|s| s.above_counts.values().sum::<u32>() > decay_threshold);
        if !any_over {
            return;
        }
        for stats in self.stats.values_mut() {
            for count in stats.above_counts.values_mut() {
                *count = (*count / 2).max(1);
            }
        }
    }

    /// Purge all trace of a removed group (spec §9 design note: "Removing
    /// a Group purges its entries from `order_stats.above_counts`").
    pub fn remove_group(&mut self, group: GroupId) {
        self.stats.remove(&group);
        for stats in self.stats.values_mut() {
            stats.above_counts.remove(&group);
        }
    }

    pub fn get(&self, group: GroupId) -> Option<&GroupOrderStats> {
        self.stats.get(&group)
    }

    fn above_count(&self, above: GroupId, below: GroupId) -> u32 {
        self.stats.get(&above).and_then(|s| s.above_counts.get(&below)).copied().unwrap_or(0)
    }
}

/// The comparator spec §4.5 defines, in priority order: EWMA order_y,
/// above-vote majority, first-seen, then two caller-supplied fallbacks
/// (median product y this frame, earliest member timestamp) for groups
/// this tracker has never placed relative to one another.
pub fn compare_groups(
    tracker: &OrderTracker,
    a: GroupId,
    b: GroupId,
    order_tolerance: f64,
    median_y: impl Fn(GroupId) -> Option<f64>,
    earliest_timestamp: impl Fn(GroupId) -> Option<i64>,
) -> Ordering {
    if let (Some(sa), Some(sb)) = (tracker.get(a), tracker.get(b)) {
        if sa.has_y && sb.has_y {
            let delta = sa.order_y - sb.order_y;
            if delta.abs() > order_tolerance {
                return sa.order_y.partial_cmp(&sb.order_y).unwrap_or(Ordering::Equal);
            }
        }
    }

    let a_above_b = tracker.above_count(a, b);
    let b_above_a = tracker.above_count(b, a);
    if a_above_b != b_above_a {
        return b_above_a.cmp(&a_above_b); // more "above" votes sorts first
    }

    if let (Some(sa), Some(sb)) = (tracker.get(a), tracker.get(b)) {
        if sa.first_seen != sb.first_seen {
            return sa.first_seen.cmp(&sb.first_seen);
        }
    }

    match (median_y(a), median_y(b)) {
        (Some(ya), Some(yb)) if ya != yb => return ya.partial_cmp(&yb).unwrap_or(Ordering::Equal),
        _ => {}
    }

    match (earliest_timestamp(a), earliest_timestamp(b)) {
        (Some(ta), Some(tb)) => ta.cmp(&tb),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smaller_order_y_sorts_first() {
        let mut t = OrderTracker::new();
        t.observe(GroupId(0), 10.0, 0, 0.3);
        t.observe(GroupId(1), 90.0, 0, 0.3);
        let ord = compare_groups(&t, GroupId(0), GroupId(1), 1.0, |_| None, |_| None);
        assert_eq!(ord, Ordering::Less);
    }

    #[test]
    fn ewma_blends_after_first_observation() {
        let mut t = OrderTracker::new();
        t.observe(GroupId(0), 10.0, 0, 0.5);
        t.observe(GroupId(0), 20.0, 1, 0.5);
        assert_eq!(t.get(GroupId(0)).unwrap().order_y, 15.0);
    }

    #[test]
    fn tie_break_by_above_count_majority() {
        let mut t = OrderTracker::new();
        t.observe(GroupId(0), 10.0, 0, 0.3);
        t.observe(GroupId(1), 10.1, 0, 0.3); // within tolerance of group 0
        for _ in 0..5 {
            t.record_above(GroupId(0), GroupId(1));
        }
        for _ in 0..2 {
            t.record_above(GroupId(1), GroupId(0));
        }
        let ord = compare_groups(&t, GroupId(0), GroupId(1), 1.0, |_| None, |_| None);
        assert_eq!(ord, Ordering::Less);
    }

    #[test]
    fn decay_halves_counts_with_floor_one() {
        let mut t = OrderTracker::new();
        for _ in 0..60 {
            t.record_above(GroupId(0), GroupId(1));
        }
        t.decay_if_needed(50);
        assert_eq!(t.above_count(GroupId(0), GroupId(1)), 30);
    }

    #[test]
    fn remove_group_purges_above_counts() {
        let mut t = OrderTracker::new();
        t.record_above(GroupId(0), GroupId(1));
        t.observe(GroupId(1), 5.0, 0, 0.3);
        t.remove_group(GroupId(1));
        assert!(t.get(GroupId(1)).is_none());
        assert_eq!(t.above_count(GroupId(0), GroupId(1)), 0);
    }

    #[test]
    fn falls_back_to_median_y_then_timestamp() {
        let t = OrderTracker::new();
        let ord = compare_groups(&t, GroupId(0), GroupId(1), 1.0, |g| {
            if g == GroupId(0) { Some(1.0) } else { Some(2.0) }
        }, |_| None);
        assert_eq!(ord, Ordering::Less);
    }
}
