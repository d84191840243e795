//! Skew estimator (spec §2 component I): weighted least-squares fit of a
//! product/price column's x-vs-y scatter to a single skew angle, consumed
//! by geometry helpers when a receipt's columns are not quite vertical.

use receipt_fusion_core::Point;

/// Weighted least-squares slope of `x` as a function of `y` (columns run
/// top-to-bottom, so `y` is the independent variable), converted to an
/// angle in degrees from vertical. `None` if fewer than two points or all
/// weights are zero.
pub fn estimate_skew_angle(points: &[(Point, f64)]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    let w_sum: f64 = points.iter().map(|(_, w)| w).sum();
    if w_sum <= 0.0 {
        return None;
    }

    let y_mean = points.iter().map(|(p, w)| p.y * w).sum::<f64>() / w_sum;
    let x_mean = points.iter().map(|(p, w)| p.x * w).sum::<f64>() / w_sum;

    let mut num = 0.0;
    let mut den = 0.0;
    for (p, w) in points {
        let dy = p.y - y_mean;
        let dx = p.x - x_mean;
        num += w * dy * dx;
        den += w * dy * dy;
    }
    if den == 0.0 {
        return Some(0.0);
    }
    let slope = num / den; // dx/dy
    Some(slope.atan().to_degrees())
}
