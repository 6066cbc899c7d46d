use serde::{Deserialize, Serialize};

use crate::model::geom::math::{f64_ge, f64_le};
use crate::model::primitive::point::Pt;
use crate::model::primitive::segment::Seg;
use crate::model::primitive::seg;

/// Axis-aligned rectangle. Kept in min/max form; an empty rectangle has
/// inverted bounds so unions start from nothing.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rt {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
}

impl Default for Rt {
    fn default() -> Self {
        Self::empty()
    }
}

impl Rt {
    pub const fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub const fn empty() -> Self {
        Self { x0: f64::INFINITY, y0: f64::INFINITY, x1: f64::NEG_INFINITY, y1: f64::NEG_INFINITY }
    }

    pub fn enclosing(a: Pt, b: Pt) -> Self {
        Self::new(a.x.min(b.x), a.y.min(b.y), a.x.max(b.x), a.y.max(b.y))
    }

    pub fn is_empty(&self) -> bool {
        self.x0 > self.x1 || self.y0 > self.y1
    }

    pub fn l(&self) -> f64 {
        self.x0
    }

    pub fn b(&self) -> f64 {
        self.y0
    }

    pub fn r(&self) -> f64 {
        self.x1
    }

    pub fn t(&self) -> f64 {
        self.y1
    }

    pub fn w(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn h(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> f64 {
        if self.is_empty() { 0.0 } else { self.w() * self.h() }
    }

    pub fn diag(&self) -> f64 {
        (self.w() * self.w() + self.h() * self.h()).sqrt()
    }

    pub fn center(&self) -> Pt {
        Pt::new((self.x0 + self.x1) * 0.5, (self.y0 + self.y1) * 0.5)
    }

    pub fn bl(&self) -> Pt {
        Pt::new(self.x0, self.y0)
    }

    pub fn br(&self) -> Pt {
        Pt::new(self.x1, self.y0)
    }

    pub fn tl(&self) -> Pt {
        Pt::new(self.x0, self.y1)
    }

    pub fn tr(&self) -> Pt {
        Pt::new(self.x1, self.y1)
    }

    pub fn pts(&self) -> [Pt; 4] {
        [self.bl(), self.br(), self.tr(), self.tl()]
    }

    pub fn segs(&self) -> [Seg; 4] {
        let [a, b, c, d] = self.pts();
        [seg(a, b), seg(b, c), seg(c, d), seg(d, a)]
    }

    pub fn contains(&self, p: Pt) -> bool {
        f64_ge(p.x, self.x0) && f64_le(p.x, self.x1) && f64_ge(p.y, self.y0) && f64_le(p.y, self.y1)
    }

    pub fn contains_rt(&self, r: &Rt) -> bool {
        self.contains(r.bl()) && self.contains(r.tr())
    }

    pub fn intersects(&self, r: &Rt) -> bool {
        f64_le(self.x0, r.x1) && f64_ge(self.x1, r.x0) && f64_le(self.y0, r.y1) && f64_ge(self.y1, r.y0)
    }

    /// Grow (or shrink, for negative `d`) by an absolute amount on each side.
    pub fn expand(&self, d: f64) -> Rt {
        Rt::new(self.x0 - d, self.y0 - d, self.x1 + d, self.y1 + d)
    }

    pub fn union(&self, r: &Rt) -> Rt {
        if self.is_empty() {
            return *r;
        }
        if r.is_empty() {
            return *self;
        }
        Rt::new(self.x0.min(r.x0), self.y0.min(r.y0), self.x1.max(r.x1), self.y1.max(r.y1))
    }

    pub fn union_pt(&self, p: Pt) -> Rt {
        self.union(&Rt::new(p.x, p.y, p.x, p.y))
    }
}
