use serde::{Deserialize, Serialize};

use crate::model::geom::distance::{pt_seg_dist, shape_dist};
use crate::model::geom::math::f64_le;
use crate::model::primitive::circle::Circle;
use crate::model::primitive::path_shape::Path;
use crate::model::primitive::point::Pt;
use crate::model::primitive::polygon::Poly;
use crate::model::primitive::rect::Rt;
use crate::model::primitive::segment::WideSeg25;

/// Tagged shape union: footprints, pads, keepouts. The rasterizer and the
/// clearance predicates dispatch on the tag; adding a shape is adding an arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    Circle(Circle),
    Rect(Rt),
    Seg(WideSeg25),
    Polygon(Poly),
    Path(Path),
}

impl Shape {
    pub fn bounds(&self) -> Rt {
        match self {
            Shape::Circle(s) => s.bounds(),
            Shape::Rect(s) => *s,
            Shape::Seg(s) => s.bounds(),
            Shape::Polygon(s) => s.bounds(),
            Shape::Path(s) => s.bounds(),
        }
    }

    /// Closed-set planar containment.
    pub fn contains(&self, p: Pt) -> bool {
        match self {
            Shape::Circle(s) => s.contains(p),
            Shape::Rect(s) => s.contains(p),
            Shape::Seg(s) => f64_le(pt_seg_dist(&p, &s.s2()), s.half_width()),
            Shape::Polygon(s) => s.contains(p),
            Shape::Path(s) => s.caps(0).any(|c| f64_le(pt_seg_dist(&p, &c.s2()), c.half_width())),
        }
    }

    /// Smallest distance between two shapes; zero when they touch or overlap.
    pub fn dist(&self, o: &Shape) -> f64 {
        shape_dist(self, o)
    }

    pub fn intersects(&self, o: &Shape) -> bool {
        f64_le(self.dist(o), 0.0)
    }

    pub fn translated(&self, d: Pt) -> Shape {
        match self {
            Shape::Circle(s) => Shape::Circle(Circle::new(s.p() + d, s.r())),
            Shape::Rect(s) => {
                Shape::Rect(Rt::new(s.l() + d.x, s.b() + d.y, s.r() + d.x, s.t() + d.y))
            }
            Shape::Seg(s) => {
                Shape::Seg(WideSeg25::from_pts(s.st2() + d, s.en2() + d, s.z(), s.half_width()))
            }
            Shape::Polygon(s) => {
                Shape::Polygon(Poly::new(&s.pts().iter().map(|&p| p + d).collect::<Vec<_>>()))
            }
            Shape::Path(s) => Shape::Path(Path::new(
                &s.pts().iter().map(|&p| p + d).collect::<Vec<_>>(),
                s.width(),
            )),
        }
    }
}
