use crate::model::geom::intersects::seg_intersects_seg;
use crate::model::geom::math::f64_cmp;
use crate::model::primitive::circle::Circle;
use crate::model::primitive::point::Pt;
use crate::model::primitive::polygon::Poly;
use crate::model::primitive::rect::Rt;
use crate::model::primitive::segment::Seg;
use crate::model::primitive::shape::Shape;

// Every pairwise distance here collapses to 0 on touch, overlap or
// containment, so callers can read the result directly as clearance slack.

pub fn pt_seg_dist(a: &Pt, b: &Seg) -> f64 {
    let proj = b.project(*a);
    let mut d = a.dist(b.st()).min(a.dist(b.en()));
    // The foot of the perpendicular only counts when it lands between the
    // endpoints.
    if b.contains_collinear(proj) {
        d = d.min(a.dist(proj));
    }
    d
}

pub fn pt_rt_dist(a: &Pt, b: &Rt) -> f64 {
    // The componentwise clamp is the nearest point of the closed rect.
    a.dist(a.clamp(b))
}

pub fn pt_poly_dist(a: &Pt, b: &Poly) -> f64 {
    if b.contains(*a) {
        return 0.0;
    }
    b.edges().map(|s| pt_seg_dist(a, &s)).min_by(|x, y| f64_cmp(x, y)).unwrap_or(f64::INFINITY)
}

pub fn seg_seg_dist(a: &Seg, b: &Seg) -> f64 {
    // Zero on contact; for disjoint segments the minimum is realized at one
    // of the four endpoints against the opposite segment.
    if seg_intersects_seg(a, b) {
        return 0.0;
    }
    [
        pt_seg_dist(&a.st(), b),
        pt_seg_dist(&a.en(), b),
        pt_seg_dist(&b.st(), a),
        pt_seg_dist(&b.en(), a),
    ]
    .into_iter()
    .fold(f64::INFINITY, f64::min)
}

pub fn rt_seg_dist(a: &Rt, b: &Seg) -> f64 {
    if a.contains(b.st()) || a.contains(b.en()) {
        return 0.0;
    }
    a.segs().iter().map(|s| seg_seg_dist(s, b)).min_by(|x, y| f64_cmp(x, y)).unwrap_or(f64::INFINITY)
}

pub fn circ_circ_dist(a: &Circle, b: &Circle) -> f64 {
    (a.p().dist(b.p()) - a.r() - b.r()).max(0.0)
}

pub fn circ_rt_dist(a: &Circle, b: &Rt) -> f64 {
    (pt_rt_dist(&a.p(), b) - a.r()).max(0.0)
}

pub fn circ_seg_dist(a: &Circle, b: &Seg) -> f64 {
    (pt_seg_dist(&a.p(), b) - a.r()).max(0.0)
}

pub fn circ_poly_dist(a: &Circle, b: &Poly) -> f64 {
    (pt_poly_dist(&a.p(), b) - a.r()).max(0.0)
}

pub fn rt_rt_dist(a: &Rt, b: &Rt) -> f64 {
    if a.intersects(b) {
        return 0.0;
    }
    let dx = (b.l() - a.r()).max(a.l() - b.r()).max(0.0);
    let dy = (b.b() - a.t()).max(a.b() - b.t()).max(0.0);
    (dx * dx + dy * dy).sqrt()
}

pub fn seg_poly_dist(a: &Seg, b: &Poly) -> f64 {
    if b.contains(a.st()) || b.contains(a.en()) {
        return 0.0;
    }
    b.edges().map(|s| seg_seg_dist(a, &s)).min_by(|x, y| f64_cmp(x, y)).unwrap_or(f64::INFINITY)
}

pub fn rt_poly_dist(a: &Rt, b: &Poly) -> f64 {
    if b.pts().iter().any(|&p| a.contains(p)) {
        return 0.0;
    }
    a.segs()
        .iter()
        .map(|s| seg_poly_dist(s, b))
        .min_by(|x, y| f64_cmp(x, y))
        .unwrap_or(f64::INFINITY)
}

/// Planar distance between any two shapes, built up from the pairwise
/// primitives above. Layers are not considered.
pub fn shape_dist(a: &Shape, b: &Shape) -> f64 {
    use Shape::*;
    match (a, b) {
        (Circle(x), Circle(y)) => circ_circ_dist(x, y),
        (Circle(x), Rect(y)) | (Rect(y), Circle(x)) => circ_rt_dist(x, y),
        (Circle(x), Polygon(y)) | (Polygon(y), Circle(x)) => circ_poly_dist(x, y),
        (Circle(x), Seg(y)) | (Seg(y), Circle(x)) => {
            (circ_seg_dist(x, &y.s2()) - y.half_width()).max(0.0)
        }
        (Rect(x), Rect(y)) => rt_rt_dist(x, y),
        (Rect(x), Polygon(y)) | (Polygon(y), Rect(x)) => rt_poly_dist(x, y),
        (Rect(x), Seg(y)) | (Seg(y), Rect(x)) => (rt_seg_dist(x, &y.s2()) - y.half_width()).max(0.0),
        (Polygon(x), Polygon(y)) => x
            .edges()
            .map(|s| seg_poly_dist(&s, y))
            .min_by(|p, q| f64_cmp(p, q))
            .unwrap_or(f64::INFINITY),
        (Polygon(x), Seg(y)) | (Seg(y), Polygon(x)) => {
            (seg_poly_dist(&y.s2(), x) - y.half_width()).max(0.0)
        }
        (Seg(x), Seg(y)) => {
            (seg_seg_dist(&x.s2(), &y.s2()) - x.half_width() - y.half_width()).max(0.0)
        }
        (Path(x), o) | (o, Path(x)) => x
            .caps(0)
            .map(|c| shape_dist(&Shape::Seg(c), o))
            .min_by(|p, q| f64_cmp(p, q))
            .unwrap_or(f64::INFINITY),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::geom::math::f64_eq;
    use crate::model::primitive::{circ, poly, pt, rt, seg};

    #[test]
    fn test_pt_seg_dist() {
        let s = seg(pt(0.0, 0.0), pt(4.0, 0.0));
        assert!(f64_eq(pt_seg_dist(&pt(2.0, 3.0), &s), 3.0));
        assert!(f64_eq(pt_seg_dist(&pt(-3.0, 4.0), &s), 5.0));
        assert!(f64_eq(pt_seg_dist(&pt(2.0, 0.0), &s), 0.0));
    }

    #[test]
    fn test_seg_seg_dist() {
        // Crossing segments have distance 0.
        let a = seg(pt(0.0, 0.0), pt(2.0, 2.0));
        let b = seg(pt(0.0, 2.0), pt(2.0, 0.0));
        assert!(f64_eq(seg_seg_dist(&a, &b), 0.0));
        // Parallel horizontal segments.
        let c = seg(pt(0.0, 3.0), pt(2.0, 3.0));
        let d = seg(pt(0.0, 0.0), pt(2.0, 0.0));
        assert!(f64_eq(seg_seg_dist(&c, &d), 3.0));
    }

    #[test]
    fn test_shape_dist() {
        let a = Shape::Circle(circ(pt(0.0, 0.0), 1.0));
        let b = Shape::Circle(circ(pt(5.0, 0.0), 1.0));
        assert!(f64_eq(shape_dist(&a, &b), 3.0));

        let r = Shape::Rect(rt(2.0, -1.0, 4.0, 1.0));
        assert!(f64_eq(shape_dist(&a, &r), 1.0));

        let p = Shape::Polygon(poly(&[pt(2.0, -1.0), pt(4.0, -1.0), pt(4.0, 1.0), pt(2.0, 1.0)]));
        assert!(f64_eq(shape_dist(&a, &p), 1.0));
    }
}
