use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::model::primitive::point::Pt;
use crate::model::primitive::rect::Rt;
use crate::model::primitive::segment::WideSeg25;

/// 2D polyline stroked with an aperture width, e.g. a routed pad shape.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    pts: Vec<Pt>,
    width: f64,
}

impl Path {
    pub fn new(pts: &[Pt], width: f64) -> Self {
        Self { pts: pts.to_vec(), width }
    }

    pub fn pts(&self) -> &[Pt] {
        &self.pts
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn half_width(&self) -> f64 {
        self.width * 0.5
    }

    /// The stroked capsules making up the path, on the given layer.
    pub fn caps(&self, z: i32) -> impl Iterator<Item = WideSeg25> + '_ {
        let hw = self.half_width();
        self.pts.iter().tuple_windows().map(move |(&a, &b)| WideSeg25::from_pts(a, b, z, hw))
    }

    pub fn bounds(&self) -> Rt {
        let r = self.pts.iter().fold(Rt::empty(), |r, &p| r.union_pt(p));
        r.expand(self.half_width())
    }
}
