use crate::model::geom::distance::{circ_rt_dist, rt_seg_dist};
use crate::model::geom::math::{f64_le, is_left_of, is_strictly_left_of, orientation};
use crate::model::primitive::circle::Circle;
use crate::model::primitive::point::Pt;
use crate::model::primitive::polygon::Poly;
use crate::model::primitive::rect::Rt;
use crate::model::primitive::segment::{Seg, WideSeg25};
use crate::model::primitive::triangle::Tri;

pub fn cap_intersects_rt(a: &WideSeg25, b: &Rt) -> bool {
    // A capsule fully inside the rect has positive edge distance, so test
    // endpoint containment before falling back to the distance check.
    b.contains(a.st2())
        || b.contains(a.en2())
        || f64_le(rt_seg_dist(b, &a.s2()), a.half_width())
}

pub fn circ_intersects_rt(a: &Circle, b: &Rt) -> bool {
    // Covered when the centre sits inside the rect or the disc reaches its
    // boundary.
    b.contains(a.p()) || f64_le(circ_rt_dist(a, b), 0.0)
}

pub fn poly_intersects_rt(a: &Poly, b: &Rt) -> bool {
    if a.pts().iter().any(|&p| b.contains(p)) || b.pts().iter().any(|&p| a.contains(p)) {
        return true;
    }
    a.edges().any(|e| b.segs().iter().any(|s| seg_intersects_seg(&e, s)))
}

/// Whether the directed line st -> en has every point of `pts` strictly on
/// one of its sides.
fn edge_separates(st: Pt, en: Pt, pts: &[Pt]) -> bool {
    pts.iter().all(|&p| is_strictly_left_of(p, st, en))
        || pts.iter().all(|&p| !is_left_of(p, st, en))
}

/// Separating-axis test: two convex shapes are disjoint exactly when some
/// edge line of one has the entire other shape on its far side.
pub fn rt_intersects_tri(a: &Rt, b: &Tri) -> bool {
    let rt = a.pts();
    let tri = *b.pts();
    let any_separating = |edges: &[Pt], other: &[Pt]| {
        let n = edges.len();
        (0..n).any(|i| edge_separates(edges[i], edges[(i + 1) % n], other))
    };
    !any_separating(&tri, &rt) && !any_separating(&rt, &tri)
}

pub fn seg_intersects_seg(a: &Seg, b: &Seg) -> bool {
    let side_of = |s: &Seg, p: Pt| orientation(s.st(), s.en(), p);
    let (sa0, sa1) = (side_of(b, a.st()), side_of(b, a.en()));
    let (sb0, sb1) = (side_of(a, b.st()), side_of(a, b.en()));
    // An endpoint on the other segment's supporting line touches exactly
    // when it also falls inside that segment's extent; this covers the
    // T-junction, shared-endpoint, collinear-overlap and degenerate-point
    // configurations in one pass. The extent test works for horizontal and
    // vertical segments alike since it bounds both coordinates.
    let on_line = [(a.st(), sa0, b), (a.en(), sa1, b), (b.st(), sb0, a), (b.en(), sb1, a)];
    for (p, side, other) in on_line {
        if side == 0 && other.bounds().contains(p) {
            return true;
        }
    }
    // Otherwise the segments cross exactly when each one's endpoints take
    // different sides of the other.
    sa0 != sa1 && sb0 != sb1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::primitive::{circ, pt, seg, tri, wseg25};

    // Named segment pairs; each is checked under argument swap, endpoint
    // reversal, and mirroring through the y-axis.
    fn seg_cases() -> Vec<(&'static str, Seg, Seg, bool)> {
        vec![
            (
                "proper crossing",
                seg(pt(-2.0, 0.0), pt(2.0, 0.0)),
                seg(pt(0.0, -1.0), pt(0.0, 3.0)),
                true,
            ),
            (
                "t-junction onto the interior",
                seg(pt(0.0, 0.0), pt(6.0, 0.0)),
                seg(pt(3.0, 0.0), pt(3.0, 2.0)),
                true,
            ),
            (
                "shared endpoint with a bend",
                seg(pt(0.0, 0.0), pt(2.0, 2.0)),
                seg(pt(2.0, 2.0), pt(5.0, 1.0)),
                true,
            ),
            (
                "collinear, partial overlap",
                seg(pt(0.0, 1.0), pt(4.0, 1.0)),
                seg(pt(3.0, 1.0), pt(7.0, 1.0)),
                true,
            ),
            (
                "collinear, one contains the other",
                seg(pt(0.0, 2.0), pt(8.0, 2.0)),
                seg(pt(2.0, 2.0), pt(5.0, 2.0)),
                true,
            ),
            (
                "collinear with a gap",
                seg(pt(0.0, 0.0), pt(1.0, 1.0)),
                seg(pt(2.0, 2.0), pt(3.0, 3.0)),
                false,
            ),
            (
                "parallel diagonals",
                seg(pt(0.0, 0.0), pt(3.0, 3.0)),
                seg(pt(1.0, 0.0), pt(4.0, 3.0)),
                false,
            ),
            (
                "near miss past the far end",
                seg(pt(0.0, 0.0), pt(0.0, 4.0)),
                seg(pt(1.0, 5.0), pt(4.0, 5.0)),
                false,
            ),
            (
                "degenerate point on the interior",
                seg(pt(0.0, 0.0), pt(4.0, 4.0)),
                seg(pt(2.0, 2.0), pt(2.0, 2.0)),
                true,
            ),
            (
                "degenerate point on an endpoint",
                seg(pt(0.0, 0.0), pt(4.0, 4.0)),
                seg(pt(4.0, 4.0), pt(4.0, 4.0)),
                true,
            ),
            (
                "degenerate point beside the segment",
                seg(pt(0.0, 0.0), pt(4.0, 4.0)),
                seg(pt(3.0, 1.0), pt(3.0, 1.0)),
                false,
            ),
            (
                "two coincident points",
                seg(pt(1.0, 2.0), pt(1.0, 2.0)),
                seg(pt(1.0, 2.0), pt(1.0, 2.0)),
                true,
            ),
            (
                "two distinct points",
                seg(pt(1.0, 2.0), pt(1.0, 2.0)),
                seg(pt(2.0, 1.0), pt(2.0, 1.0)),
                false,
            ),
        ]
    }

    fn mirrored(s: &Seg) -> Seg {
        seg(pt(-s.st().x, s.st().y), pt(-s.en().x, s.en().y))
    }

    #[test]
    fn test_seg_seg() {
        for (name, a, b, expected) in seg_cases() {
            let variants = [
                (a, b),
                (b, a),
                (seg(a.en(), a.st()), seg(b.en(), b.st())),
                (mirrored(&a), mirrored(&b)),
            ];
            for (x, y) in variants {
                assert_eq!(seg_intersects_seg(&x, &y), expected, "{name}: {x} vs {y}");
            }
        }
    }

    #[test]
    fn test_rt_tri() {
        let t = tri(pt(0.0, 0.0), pt(4.0, 0.0), pt(0.0, 4.0));
        // Rect inside the triangle.
        assert!(rt_intersects_tri(&Rt::new(1.0, 1.0, 2.0, 2.0), &t));
        // Rect straddling the hypotenuse.
        assert!(rt_intersects_tri(&Rt::new(1.5, 1.5, 5.0, 5.0), &t));
        // Rect beyond the hypotenuse.
        assert!(!rt_intersects_tri(&Rt::new(3.5, 3.5, 5.0, 5.0), &t));
        // Rect containing the whole triangle.
        assert!(rt_intersects_tri(&Rt::new(-1.0, -1.0, 5.0, 5.0), &t));
    }

    #[test]
    fn test_cap_rt() {
        let r = Rt::new(0.0, 0.0, 4.0, 4.0);
        // Capsule entirely inside.
        assert!(cap_intersects_rt(&wseg25(pt(1.0, 1.0), pt(3.0, 1.0), 0, 0.5), &r));
        // Mid-line outside, but the width reaches in.
        assert!(cap_intersects_rt(&wseg25(pt(-1.0, 4.4), pt(5.0, 4.4), 0, 0.5), &r));
        assert!(!cap_intersects_rt(&wseg25(pt(-1.0, 6.0), pt(5.0, 6.0), 0, 0.5), &r));
    }

    #[test]
    fn test_circ_rt() {
        let r = Rt::new(0.0, 0.0, 4.0, 4.0);
        assert!(circ_intersects_rt(&circ(pt(2.0, 2.0), 0.5), &r));
        // Centre outside, rim overlapping.
        assert!(circ_intersects_rt(&circ(pt(5.0, 2.0), 1.5), &r));
        assert!(!circ_intersects_rt(&circ(pt(6.0, 2.0), 1.5), &r));
    }
}
