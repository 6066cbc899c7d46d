use serde::{Deserialize, Serialize};

use crate::model::geom::math::{f64_eq, f64_le};
use crate::model::primitive::point::Pt;
use crate::model::primitive::rect::Rt;
use crate::model::primitive::segment::Seg;
use crate::model::primitive::seg;

/// Simple polygon given by its vertex loop (implicitly closed).
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poly {
    pts: Vec<Pt>,
}

impl Poly {
    pub fn new(pts: &[Pt]) -> Self {
        Self { pts: pts.to_vec() }
    }

    pub fn pts(&self) -> &[Pt] {
        &self.pts
    }

    pub fn edges(&self) -> impl Iterator<Item = Seg> + '_ {
        let n = self.pts.len();
        (0..n).map(move |i| seg(self.pts[i], self.pts[(i + 1) % n]))
    }

    /// Twice the signed area; positive for counter-clockwise winding.
    pub fn signed_area2(&self) -> f64 {
        let mut a = 0.0;
        for s in self.edges() {
            a += s.st().cross(s.en());
        }
        a
    }

    pub fn bounds(&self) -> Rt {
        self.pts.iter().fold(Rt::empty(), |r, &p| r.union_pt(p))
    }

    /// Closed-set containment: boundary points are inside.
    pub fn contains(&self, p: Pt) -> bool {
        for s in self.edges() {
            let proj = s.project(p);
            if s.contains_collinear(proj) && f64_eq(proj.dist(p), 0.0) {
                return true;
            }
        }
        // Crossing number against a ray in +x.
        let mut crossings = 0;
        for s in self.edges() {
            let (a, b) = (s.st(), s.en());
            if (a.y > p.y) != (b.y > p.y) {
                let t = (p.y - a.y) / (b.y - a.y);
                let x = a.x + t * (b.x - a.x);
                if x > p.x {
                    crossings += 1;
                }
            }
        }
        crossings % 2 == 1
    }

    pub fn has_on_unbounded_side(&self, p: Pt) -> bool {
        !self.contains(p)
    }

    /// Dilate by `d` with mitered corners. Each edge is pushed outward along
    /// its normal and consecutive offset edge lines are intersected.
    pub fn grow(&self, d: f64) -> Poly {
        let n = self.pts.len();
        if n < 3 || f64_le(d, 0.0) {
            return self.clone();
        }
        // Outward is to the right of the edge direction for ccw polygons.
        let out = if self.signed_area2() >= 0.0 { -1.0 } else { 1.0 };
        let mut grown = Vec::with_capacity(n);
        for i in 0..n {
            let prev = self.pts[(i + n - 1) % n];
            let cur = self.pts[i];
            let next = self.pts[(i + 1) % n];
            let n0 = (cur - prev).perp() * out;
            let n1 = (next - cur).perp() * out;
            let a0 = prev + n0 * d;
            let a1 = cur + n1 * d;
            // Intersect the two offset lines; parallel edges share the offset point.
            let d0 = cur - prev;
            let d1 = next - cur;
            let denom = d0.cross(d1);
            if f64_eq(denom, 0.0) {
                grown.push(cur + n0 * d);
            } else {
                let t = (a1 - a0).cross(d1) / denom;
                grown.push(a0 + d0 * t);
            }
        }
        Poly { pts: grown }
    }
}
