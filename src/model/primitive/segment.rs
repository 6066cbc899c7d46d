use serde::{Deserialize, Serialize};

use crate::model::geom::math::{f64_eq, f64_le};
use crate::model::primitive::circle::Circle;
use crate::model::primitive::point::{Pt, Pt25};
use crate::model::primitive::rect::Rt;

/// 2D segment.
#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seg {
    st: Pt,
    en: Pt,
}

impl Seg {
    pub const fn new(st: Pt, en: Pt) -> Self {
        Self { st, en }
    }

    pub fn st(&self) -> Pt {
        self.st
    }

    pub fn en(&self) -> Pt {
        self.en
    }

    pub fn dir(&self) -> Pt {
        self.en - self.st
    }

    pub fn length(&self) -> f64 {
        self.st.dist(self.en)
    }

    pub fn length2(&self) -> f64 {
        self.st.dist2(self.en)
    }

    pub fn is_horizontal(&self) -> bool {
        self.st.y == self.en.y
    }

    pub fn is_vertical(&self) -> bool {
        self.st.x == self.en.x
    }

    /// Project onto the supporting line (unbounded).
    pub fn project(&self, p: Pt) -> Pt {
        let d = self.dir();
        let len2 = d.dot(d);
        if f64_eq(len2, 0.0) {
            return self.st;
        }
        self.st + d * ((p - self.st).dot(d) / len2)
    }

    /// Whether a point known to be on the supporting line lies within the segment.
    pub fn contains_collinear(&self, p: Pt) -> bool {
        Rt::enclosing(self.st, self.en).contains(p)
    }

    /// Maximum of the coordinate extents; the 45-degree-path cell count.
    pub fn max_norm(&self) -> f64 {
        (self.en.x - self.st.x).abs().max((self.en.y - self.st.y).abs())
    }

    pub fn bounds(&self) -> Rt {
        Rt::enclosing(self.st, self.en)
    }

    pub fn reversed(&self) -> Seg {
        Seg::new(self.en, self.st)
    }
}

impl std::fmt::Display for Seg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} -> {}]", self.st, self.en)
    }
}

/// Segment on a single layer.
#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seg25 {
    seg: Seg,
    z: i32,
}

impl Seg25 {
    pub const fn new(seg: Seg, z: i32) -> Self {
        Self { seg, z }
    }

    pub fn s2(&self) -> Seg {
        self.seg
    }

    pub fn z(&self) -> i32 {
        self.z
    }

    pub fn st(&self) -> Pt25 {
        self.seg.st().with_z(self.z)
    }

    pub fn en(&self) -> Pt25 {
        self.seg.en().with_z(self.z)
    }

    pub fn length(&self) -> f64 {
        self.seg.length()
    }

    pub fn length2(&self) -> f64 {
        self.seg.length2()
    }
}

/// A wide segment (capsule) on a single layer: the track primitive.
#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct WideSeg25 {
    base: Seg25,
    half_width: f64,
}

impl WideSeg25 {
    pub const fn new(base: Seg25, half_width: f64) -> Self {
        Self { base, half_width }
    }

    pub fn from_pts(st: Pt, en: Pt, z: i32, half_width: f64) -> Self {
        Self::new(Seg25::new(Seg::new(st, en), z), half_width)
    }

    pub fn base(&self) -> Seg25 {
        self.base
    }

    pub fn s2(&self) -> Seg {
        self.base.s2()
    }

    pub fn z(&self) -> i32 {
        self.base.z()
    }

    pub fn st(&self) -> Pt25 {
        self.base.st()
    }

    pub fn en(&self) -> Pt25 {
        self.base.en()
    }

    pub fn st2(&self) -> Pt {
        self.base.s2().st()
    }

    pub fn en2(&self) -> Pt {
        self.base.s2().en()
    }

    pub fn half_width(&self) -> f64 {
        self.half_width
    }

    pub fn width(&self) -> f64 {
        self.half_width * 2.0
    }

    pub fn set_base(&mut self, base: Seg25) {
        self.base = base;
    }

    pub fn source_cap(&self) -> Circle {
        Circle::new(self.st2(), self.half_width)
    }

    pub fn target_cap(&self) -> Circle {
        Circle::new(self.en2(), self.half_width)
    }

    pub fn reversed(&self) -> WideSeg25 {
        WideSeg25::new(Seg25::new(self.base.s2().reversed(), self.z()), self.half_width)
    }

    /// Perpendicular vector from the mid-line to the side, of length half-width.
    pub fn half_width_span(&self) -> Pt {
        self.s2().dir().perp() * self.half_width
    }

    pub fn wider_than_base_len(&self) -> bool {
        self.half_width > self.s2().length() * 0.5
    }

    /// Exchange the roles of length and width: the returned capsule covers
    /// roughly the same area but runs along the original perpendicular.
    /// Used so the scan-line fill sees a segment longer than it is wide.
    pub fn swap_wl(&self, len_add: f64, width_add: f64) -> WideSeg25 {
        let c = (self.st2() + self.en2()) * 0.5;
        let span = self.half_width_span();
        let hl = self.s2().length() * 0.5;
        let m = span.mag();
        let dir = if f64_eq(m, 0.0) { Pt::new(0.0, 1.0) } else { span * (1.0 / m) };
        let h = self.half_width + len_add;
        WideSeg25::from_pts(c - dir * h, c + dir * h, self.z(), hl + width_add * 0.5)
    }

    /// Flip so the segment runs upward in y.
    pub fn ordered_y(&self) -> WideSeg25 {
        if self.st2().y > self.en2().y { self.reversed() } else { *self }
    }

    pub fn bounds(&self) -> Rt {
        self.s2().bounds().expand(self.half_width)
    }

    pub fn dist2(&self, s: &Seg) -> f64 {
        crate::model::geom::distance::seg_seg_dist(&self.s2(), s).powi(2)
    }

    /// Planar overlap ignoring layers.
    pub fn intersects_2d(&self, o: &WideSeg25) -> bool {
        let d = crate::model::geom::distance::seg_seg_dist(&self.s2(), &o.s2());
        f64_le(d, self.half_width + o.half_width)
    }

    pub fn intersects(&self, o: &WideSeg25) -> bool {
        self.z() == o.z() && self.intersects_2d(o)
    }

    pub fn intersects_circle(&self, c: &Circle) -> bool {
        let d = crate::model::geom::distance::pt_seg_dist(&c.p(), &self.s2());
        f64_le(d, self.half_width + c.r())
    }

    pub fn intersects_rt(&self, r: &Rt) -> bool {
        let d = crate::model::geom::distance::rt_seg_dist(r, &self.s2());
        f64_le(d, self.half_width) || r.contains(self.st2()) || r.contains(self.en2())
    }

    /// Whether the other capsule comes within `clearance`, layers ignored.
    pub fn violates_clearance_2d(&self, o: &WideSeg25, clearance: f64) -> bool {
        let d = crate::model::geom::distance::seg_seg_dist(&self.s2(), &o.s2());
        d < self.half_width + o.half_width + clearance
    }

    pub fn violates_clearance(&self, o: &WideSeg25, clearance: f64) -> bool {
        self.z() == o.z() && self.violates_clearance_2d(o, clearance)
    }
}

impl std::fmt::Display for WideSeg25 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} -> {} z{} w{}]", self.st2(), self.en2(), self.z(), self.width())
    }
}
