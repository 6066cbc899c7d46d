use std::cmp::Ordering;

use approx::{relative_eq, relative_ne};
use ordered_float::OrderedFloat;

use crate::model::primitive::point::Pt;

pub const EP: f64 = 1e-6;

pub fn pt_eq(a: Pt, b: Pt) -> bool {
    f64_eq(a.x, b.x) && f64_eq(a.y, b.y)
}

pub fn f64_eq(a: f64, b: f64) -> bool {
    relative_eq!(a, b, epsilon = EP)
}

pub fn f64_ne(a: f64, b: f64) -> bool {
    relative_ne!(a, b, epsilon = EP)
}

pub fn f64_gt(a: f64, b: f64) -> bool {
    f64_ne(a, b) && a > b
}

pub fn f64_ge(a: f64, b: f64) -> bool {
    f64_eq(a, b) || a > b
}

pub fn f64_lt(a: f64, b: f64) -> bool {
    f64_ne(a, b) && a < b
}

pub fn f64_le(a: f64, b: f64) -> bool {
    f64_eq(a, b) || a < b
}

pub fn f64_cmp(a: &f64, b: &f64) -> Ordering {
    OrderedFloat(*a).cmp(&OrderedFloat(*b))
}

// Twice the signed area of the triangle (o, a, b); positive when the turn
// o -> a -> b is counter-clockwise.
pub fn cross_at(o: Pt, a: Pt, b: Pt) -> f64 {
    (o - a).cross(o - b)
}

// Whether p lies strictly on the left of the directed line st -> en.
pub fn is_strictly_left_of(p: Pt, st: Pt, en: Pt) -> bool {
    f64_gt(cross_at(st, en, p), 0.0)
}

pub fn is_left_of(p: Pt, st: Pt, en: Pt) -> bool {
    f64_ge(cross_at(st, en, p), 0.0)
}

pub fn is_collinear(a: Pt, b: Pt, c: Pt) -> bool {
    f64_eq(cross_at(a, b, c), 0.0)
}

/// Orientation of c relative to the line a -> b: -1, 0 or +1.
pub fn orientation(a: Pt, b: Pt, c: Pt) -> i32 {
    let v = cross_at(a, b, c);
    if f64_eq(v, 0.0) {
        0
    } else if v > 0.0 {
        1
    } else {
        -1
    }
}

/// Length of the shortest 45-degree grid path between two points:
/// max(|dx|,|dy|) + (sqrt(2)-1)*min(|dx|,|dy|).
pub fn distance45(a: Pt, b: Pt) -> f64 {
    let dx = (b.x - a.x).abs();
    let dy = (b.y - a.y).abs();
    dx.max(dy) + (std::f64::consts::SQRT_2 - 1.0) * dx.min(dy)
}

pub fn squared(v: f64) -> f64 {
    v * v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::primitive::pt;

    #[test]
    fn test_distance45() {
        assert!(f64_eq(distance45(pt(0.0, 0.0), pt(3.0, 0.0)), 3.0));
        assert!(f64_eq(distance45(pt(0.0, 0.0), pt(0.0, 4.0)), 4.0));
        // Pure diagonal costs sqrt(2) per step.
        assert!(f64_eq(distance45(pt(0.0, 0.0), pt(2.0, 2.0)), 2.0 * std::f64::consts::SQRT_2));
        // L-shaped: 3 straight + 2 diagonal.
        assert!(f64_eq(
            distance45(pt(0.0, 0.0), pt(5.0, 2.0)),
            5.0 + (std::f64::consts::SQRT_2 - 1.0) * 2.0
        ));
    }

    #[test]
    fn test_orientation() {
        assert_eq!(orientation(pt(0.0, 0.0), pt(1.0, 0.0), pt(0.0, 1.0)), 1);
        assert_eq!(orientation(pt(0.0, 0.0), pt(1.0, 0.0), pt(0.0, -1.0)), -1);
        assert_eq!(orientation(pt(0.0, 0.0), pt(1.0, 0.0), pt(2.0, 0.0)), 0);
    }
}
