use auto_ops::impl_op_ex;
use serde::{Deserialize, Serialize};

use crate::model::geom::math::{f64_eq, pt_eq};
use crate::model::primitive::rect::Rt;

/// 2D point, also used as a vector.
#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pt {
    pub x: f64,
    pub y: f64,
}

impl_op_ex!(+ |a: &Pt, b: &Pt| -> Pt { Pt::new(a.x + b.x, a.y + b.y) });
impl_op_ex!(-|a: &Pt, b: &Pt| -> Pt { Pt::new(a.x - b.x, a.y - b.y) });
impl_op_ex!(*|a: &Pt, s: &f64| -> Pt { Pt::new(a.x * s, a.y * s) });
impl_op_ex!(-|a: &Pt| -> Pt { Pt::new(-a.x, -a.y) });

impl Pt {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub const fn zero() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn cross(&self, p: Pt) -> f64 {
        self.x * p.y - self.y * p.x
    }

    pub fn dot(&self, p: Pt) -> f64 {
        self.x * p.x + self.y * p.y
    }

    pub fn dist(&self, p: Pt) -> f64 {
        self.dist2(p).sqrt()
    }

    pub fn dist2(&self, p: Pt) -> f64 {
        let d = *self - p;
        d.dot(d)
    }

    pub fn mag(&self) -> f64 {
        self.dot(*self).sqrt()
    }

    /// Unit-length perpendicular, rotated 90 degrees counter-clockwise.
    pub fn perp(&self) -> Pt {
        let m = self.mag();
        if f64_eq(m, 0.0) { Pt::zero() } else { Pt::new(-self.y / m, self.x / m) }
    }

    /// Project onto the rectangle (componentwise clamp).
    pub fn clamp(&self, r: &Rt) -> Pt {
        Pt::new(self.x.clamp(r.l(), r.r()), self.y.clamp(r.b(), r.t()))
    }

    pub fn near(&self, p: Pt) -> bool {
        pt_eq(*self, p)
    }

    pub fn with_z(&self, z: i32) -> Pt25 {
        Pt25::new(self.x, self.y, z)
    }
}

impl std::fmt::Display for Pt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// 2.5D point: planar coordinates plus an integer layer.
#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pt25 {
    pub x: f64,
    pub y: f64,
    pub z: i32,
}

impl Pt25 {
    pub const fn new(x: f64, y: f64, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn xy(&self) -> Pt {
        Pt::new(self.x, self.y)
    }

    pub fn with_z(&self, z: i32) -> Pt25 {
        Pt25::new(self.x, self.y, z)
    }

    /// Totally-ordered key for use in sorted containers.
    pub fn key(&self) -> PtKey {
        (ordered_float::OrderedFloat(self.x), ordered_float::OrderedFloat(self.y), self.z)
    }
}

pub type PtKey = (ordered_float::OrderedFloat<f64>, ordered_float::OrderedFloat<f64>, i32);

impl std::fmt::Display for Pt25 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}
