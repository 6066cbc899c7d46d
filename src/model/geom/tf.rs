use crate::model::geom::math::f64_eq;
use crate::model::primitive::circle::Circle;
use crate::model::primitive::path_shape::Path;
use crate::model::primitive::point::Pt;
use crate::model::primitive::polygon::Poly;
use crate::model::primitive::segment::WideSeg25;
use crate::model::primitive::shape::Shape;

/// Rigid planar transform: rotation about the origin followed by translation.
/// Used to place component footprints and pads.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Tf {
    cos: f64,
    sin: f64,
    offset: Pt,
}

impl Tf {
    pub fn identity() -> Self {
        Self { cos: 1.0, sin: 0.0, offset: Pt::zero() }
    }

    pub fn translate(offset: Pt) -> Self {
        Self { cos: 1.0, sin: 0.0, offset }
    }

    pub fn rotate_deg(deg: f64) -> Self {
        let r = deg.to_radians();
        Self { cos: r.cos(), sin: r.sin(), offset: Pt::zero() }
    }

    pub fn place(offset: Pt, deg: f64) -> Self {
        let mut tf = Self::rotate_deg(deg);
        tf.offset = offset;
        tf
    }

    pub fn is_axis_aligned(&self) -> bool {
        f64_eq(self.sin, 0.0) || f64_eq(self.cos, 0.0)
    }

    pub fn pt(&self, p: Pt) -> Pt {
        Pt::new(p.x * self.cos - p.y * self.sin, p.x * self.sin + p.y * self.cos) + self.offset
    }

    /// Transform a shape. Rectangles stay rectangles only under axis-aligned
    /// rotations; otherwise they become polygons.
    pub fn shape(&self, s: &Shape) -> Shape {
        match s {
            Shape::Circle(c) => Shape::Circle(Circle::new(self.pt(c.p()), c.r())),
            Shape::Rect(r) => {
                if self.is_axis_aligned() {
                    let a = self.pt(r.bl());
                    let b = self.pt(r.tr());
                    Shape::Rect(crate::model::primitive::rect::Rt::enclosing(a, b))
                } else {
                    Shape::Polygon(Poly::new(&r.pts().map(|p| self.pt(p))))
                }
            }
            Shape::Seg(w) => Shape::Seg(WideSeg25::from_pts(
                self.pt(w.st2()),
                self.pt(w.en2()),
                w.z(),
                w.half_width(),
            )),
            Shape::Polygon(g) => {
                Shape::Polygon(Poly::new(&g.pts().iter().map(|&p| self.pt(p)).collect::<Vec<_>>()))
            }
            Shape::Path(p) => Shape::Path(Path::new(
                &p.pts().iter().map(|&v| self.pt(v)).collect::<Vec<_>>(),
                p.width(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::geom::math::pt_eq;
    use crate::model::primitive::pt;

    #[test]
    fn test_place() {
        let tf = Tf::place(pt(10.0, 0.0), 90.0);
        assert!(pt_eq(tf.pt(pt(1.0, 0.0)), pt(10.0, 1.0)));
        assert!(pt_eq(tf.pt(pt(0.0, 1.0)), pt(9.0, 0.0)));
    }
}
