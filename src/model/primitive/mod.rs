pub mod circle;
pub mod path_shape;
pub mod point;
pub mod polygon;
pub mod rect;
pub mod segment;
pub mod shape;
pub mod triangle;

use crate::model::primitive::circle::Circle;
use crate::model::primitive::point::{Pt, Pt25};
use crate::model::primitive::polygon::Poly;
use crate::model::primitive::rect::Rt;
use crate::model::primitive::segment::{Seg, Seg25, WideSeg25};
use crate::model::primitive::triangle::Tri;

pub const fn pt(x: f64, y: f64) -> Pt {
    Pt::new(x, y)
}

pub const fn pt25(x: f64, y: f64, z: i32) -> Pt25 {
    Pt25::new(x, y, z)
}

pub const fn seg(st: Pt, en: Pt) -> Seg {
    Seg::new(st, en)
}

pub const fn seg25(st: Pt, en: Pt, z: i32) -> Seg25 {
    Seg25::new(Seg::new(st, en), z)
}

pub const fn wseg25(st: Pt, en: Pt, z: i32, half_width: f64) -> WideSeg25 {
    WideSeg25::new(Seg25::new(Seg::new(st, en), z), half_width)
}

pub const fn circ(p: Pt, r: f64) -> Circle {
    Circle::new(p, r)
}

pub const fn rt(x0: f64, y0: f64, x1: f64, y1: f64) -> Rt {
    Rt::new(x0, y0, x1, y1)
}

pub const fn tri(a: Pt, b: Pt, c: Pt) -> Tri {
    Tri::new([a, b, c])
}

pub fn poly(pts: &[Pt]) -> Poly {
    Poly::new(pts)
}
