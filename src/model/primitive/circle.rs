use serde::{Deserialize, Serialize};

use crate::model::geom::math::f64_le;
use crate::model::primitive::point::Pt;
use crate::model::primitive::rect::Rt;

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    p: Pt,
    r: f64,
}

impl Circle {
    pub const fn new(p: Pt, r: f64) -> Self {
        Self { p, r }
    }

    pub fn p(&self) -> Pt {
        self.p
    }

    pub fn r(&self) -> f64 {
        self.r
    }

    pub fn contains(&self, v: Pt) -> bool {
        f64_le(self.p.dist2(v), self.r * self.r)
    }

    pub fn bounds(&self) -> Rt {
        Rt::new(self.p.x - self.r, self.p.y - self.r, self.p.x + self.r, self.p.y + self.r)
    }
}
