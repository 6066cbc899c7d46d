use log::warn;

use crate::model::primitive::circle::Circle;
use crate::model::primitive::point::Pt;
use crate::model::primitive::polygon::Poly;
use crate::model::primitive::rect::Rt;
use crate::model::primitive::segment::{Seg, WideSeg25};
use crate::model::primitive::shape::Shape;
use crate::model::primitive::triangle::Tri;
use crate::model::pcb::track::Track;
use crate::route::grid::GridGeom;

// Per-segment cap selection.
pub const CAPS_SOURCE: u8 = 0x1;
pub const CAPS_TARGET: u8 = 0x2;
pub const CAPS_BOTH: u8 = CAPS_SOURCE | CAPS_TARGET;

// Track item selection.
pub const RASTER_SEGMENTS: u8 = 0x1;
pub const RASTER_VIAS: u8 = 0x2;
pub const RASTER_CAPS: u8 = 0x4;
pub const RASTER_JUNCTIONS: u8 = 0x8;
pub const RASTER_CAPS_AND_JUNCTIONS: u8 = RASTER_CAPS | RASTER_JUNCTIONS;
pub const RASTER_SEGMENTS_WITH_CAPS: u8 = RASTER_SEGMENTS | RASTER_CAPS_AND_JUNCTIONS;
pub const RASTER_ALL: u8 = 0xf;

/// Receives the axis-aligned cell-index ranges a shape covers. Implementors
/// stamp flags, bump keep-out counters, count matching cells, or record the
/// ranges; the write epoch carried by the operator keeps one rasterization
/// from double-writing a cell. An inverted range is empty and must be
/// ignored (boundary-exact scanlines produce them).
pub trait RasterOp {
    fn write_range(&mut self, z0: u32, z1: u32, y0: u32, y1: u32, x0: u32, x1: u32);

    fn write_row(&mut self, z0: u32, z1: u32, y: u32, x0: u32, x1: u32) {
        if x0 <= x1 {
            self.write_range(z0, z1, y, y, x0, x1);
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IndexRange {
    pub z0: u32,
    pub z1: u32,
    pub y0: u32,
    pub y1: u32,
    pub x0: u32,
    pub x1: u32,
}

impl IndexRange {
    pub fn count(&self) -> u32 {
        (self.x1 - self.x0 + 1) * (self.y1 - self.y0 + 1) * (self.z1 - self.z0 + 1)
    }
}

/// Operator that just records the emitted ranges.
#[derive(Debug, Default)]
pub struct RecordRangesOp {
    pub ranges: Vec<IndexRange>,
}

impl RasterOp for RecordRangesOp {
    fn write_range(&mut self, z0: u32, z1: u32, y0: u32, y1: u32, x0: u32, x1: u32) {
        if x0 <= x1 && y0 <= y1 && z0 <= z1 {
            self.ranges.push(IndexRange { z0, z1, y0, y1, x0, x1 });
        }
    }
}

/// Maps shapes to the grid cells they cover.
///
/// Rules:
/// * All shapes except segments are closed sets (boundaries included).
/// * Fill uses the midpoint rule except when a shape covers no cell center,
///   in which case the single enclosing cell is drawn.
/// * Segments are open sets on the sides and closed sets on the caps.
#[derive(Debug, Copy, Clone)]
pub struct Rasterizer {
    geom: GridGeom,
    expansion: f64,
    tolerance: f64,
}

impl Rasterizer {
    pub fn new(geom: GridGeom) -> Self {
        Self { geom, expansion: 0.0, tolerance: geom.edge / 1024.0 }
    }

    pub fn with_expansion(mut self, e: f64) -> Self {
        self.expansion = e;
        self
    }

    fn clamp_z(&self, z0: i32, z1: i32) -> Option<(u32, u32)> {
        let d = self.geom.size[2] as i32;
        let z0 = z0.max(0);
        let z1 = z1.min(d - 1);
        if z0 > z1 { None } else { Some((z0 as u32, z1 as u32)) }
    }

    pub fn fill_rect(&self, op: &mut impl RasterOp, r: &Rt, z0: i32, z1: i32) {
        let Some((z0, z1)) = self.clamp_z(z0, z1) else { return };
        let g = &self.geom;
        let ex = self.expansion - g.edge05 - self.tolerance;
        let eh = ex.max(r.l() - r.r());
        let ev = ex.max(r.b() - r.t());
        let x0 = g.x_index_bounded(r.l(), -eh);
        let x1 = g.x_index_bounded(r.r(), eh);
        let y0 = g.y_index_bounded(r.b(), -ev);
        let y1 = g.y_index_bounded(r.t(), ev);
        op.write_range(z0, z1, y0, y1, x0, x1);
    }

    /// Outline of a rectangle, one cell thick.
    pub fn line_rect(&self, op: &mut impl RasterOp, r: &Rt, z0: i32, z1: i32) {
        let Some((z0, z1)) = self.clamp_z(z0, z1) else { return };
        let g = &self.geom;
        let ex = self.expansion - g.edge05 - self.tolerance;
        let eh = ex.max(r.l() - r.r());
        let ev = ex.max(r.b() - r.t());
        let x0 = g.x_index_bounded(r.l(), -eh);
        let x1 = g.x_index_bounded(r.r(), eh);
        let y0 = g.y_index_bounded(r.b(), -ev);
        let y1 = g.y_index_bounded(r.t(), ev);
        op.write_row(z0, z1, y0, x0, x1);
        if y1 == y0 {
            return;
        }
        op.write_row(z0, z1, y1, x0, x1);
        if y1 == y0 + 1 {
            return;
        }
        op.write_range(z0, z1, y0 + 1, y1 - 1, x0, x0);
        if x0 != x1 {
            op.write_range(z0, z1, y0 + 1, y1 - 1, x1, x1);
        }
    }

    /// Scanline circle fill: each row emits the x-range whose cell centers
    /// satisfy cx <= sqrt(r^2 - cy^2).
    pub fn fill_circle(&self, op: &mut impl RasterOp, c: &Circle, z0: i32, z1: i32) {
        let Some((z0, z1)) = self.clamp_z(z0, z1) else { return };
        let g = &self.geom;
        let o = c.p();
        let r = c.r() + self.expansion;
        let r2 = r * r;
        let ex = (g.edge05 + self.tolerance).min(r); // ensure y0 <= y1
        let y0 = g.y_index_bounded(o.y - r, ex);
        let y1 = g.y_index_bounded(o.y + r, -ex);
        let mut cy = g.mid_y(y0) - o.y;
        debug_assert!(y0 <= y1);
        for y in y0..=y1 {
            let cx = (r2 - cy * cy).max(0.0).sqrt();
            let x0 = g.x_index_bounded(o.x - cx, ex);
            let x1 = g.x_index_bounded(o.x + cx, -ex);
            op.write_row(z0, z1, y, x0, x1);
            cy += g.edge;
        }
    }

    /// Wide segment fill: round caps per the mask, then the body.
    pub fn fill_wseg(&self, op: &mut impl RasterOp, s: &WideSeg25, caps_mask: u8, z0: i32, z1: i32) {
        if caps_mask & CAPS_SOURCE != 0 {
            self.fill_circle(op, &s.source_cap(), z0, z1);
        }
        if caps_mask & CAPS_TARGET != 0 {
            self.fill_circle(op, &s.target_cap(), z0, z1);
        }
        let ex = s.half_width() + self.expansion;
        let s2 = s.s2();
        if s2.is_horizontal() {
            self.fill_hseg(op, &s2, z0, z1, ex);
        } else if s2.is_vertical() {
            self.fill_vseg(op, &s2, z0, z1, ex);
        } else {
            self.fill_dseg(op, &s2, z0, z1, ex);
        }
    }

    /// Zero-width segment fill (the expansion still widens it).
    pub fn fill_seg(&self, op: &mut impl RasterOp, s: &Seg, z0: i32, z1: i32) {
        if s.is_horizontal() {
            self.fill_hseg(op, s, z0, z1, self.expansion);
        } else if s.is_vertical() {
            self.fill_vseg(op, s, z0, z1, self.expansion);
        } else {
            self.fill_dseg(op, s, z0, z1, self.expansion);
        }
    }

    /// Cells along the segment's mid-line, one per scanline.
    pub fn line_seg(&self, op: &mut impl RasterOp, s: &Seg, z0: i32, z1: i32) {
        let Some((z0, z1)) = self.clamp_z(z0, z1) else { return };
        if s.is_horizontal() {
            self.fill_hseg_clamped(op, s, z0, z1, 0.0);
        } else if s.is_vertical() {
            self.fill_vseg_clamped(op, s, z0, z1, 0.0);
        } else {
            self.line_dseg(op, s, z0, z1);
        }
    }

    fn fill_hseg(&self, op: &mut impl RasterOp, s: &Seg, z0: i32, z1: i32, ex: f64) {
        let Some((z0, z1)) = self.clamp_z(z0, z1) else { return };
        self.fill_hseg_clamped(op, s, z0, z1, ex);
    }

    // Midpoint rasterization:
    // 0.5 to 1.5 with shifting by 0.5 becomes 1 to 1 but we want to draw both
    // 0 and 1 so we subtract tolerance on the left.
    // 0.5 to 1.4 becomes 1-TOL to 0.9 so we correctly only draw on 0.
    // 0.0 to 0.4 becomes 0.2-TOL to 0.2, but we draw on 0 anyway because we
    // always draw at least 1 cell.
    // Tolerance also absorbs float drift like 0.99999999999994 on the right.
    fn fill_hseg_clamped(&self, op: &mut impl RasterOp, s: &Seg, z0: u32, z1: u32, ex: f64) {
        debug_assert!(s.st().y == s.en().y);
        let g = &self.geom;
        let x0 = s.st().x.min(s.en().x);
        let x1 = s.st().x.max(s.en().x);
        let hex = (g.edge05 - self.tolerance).min((x1 - x0) * 0.5);
        let vex = (g.edge05 + self.tolerance - ex).min(0.0);
        let xi0 = g.x_index_bounded(x0, hex);
        let xi1 = g.x_index_bounded(x1, -hex);
        let yi0 = g.y_index_bounded(s.st().y, vex);
        let yi1 = g.y_index_bounded(s.st().y, -vex);
        op.write_range(z0, z1, yi0, yi1, xi0, xi1);
    }

    fn fill_vseg(&self, op: &mut impl RasterOp, s: &Seg, z0: i32, z1: i32, ex: f64) {
        let Some((z0, z1)) = self.clamp_z(z0, z1) else { return };
        self.fill_vseg_clamped(op, s, z0, z1, ex);
    }

    fn fill_vseg_clamped(&self, op: &mut impl RasterOp, s: &Seg, z0: u32, z1: u32, ex: f64) {
        debug_assert!(s.st().x == s.en().x);
        let g = &self.geom;
        let y0 = s.st().y.min(s.en().y);
        let y1 = s.st().y.max(s.en().y);
        let vex = (g.edge05 - self.tolerance).min((y1 - y0) * 0.5);
        let hex = (g.edge05 + self.tolerance - ex).min(0.0);
        let xi0 = g.x_index_bounded(s.st().x, hex);
        let xi1 = g.x_index_bounded(s.st().x, -hex);
        let yi0 = g.y_index_bounded(y0, vex);
        let yi1 = g.y_index_bounded(y1, -vex);
        op.write_range(z0, z1, yi0, yi1, xi0, xi1);
    }

    /// Diagonal wide segment: scanline between the two offset boundary
    /// lines, with the end-cap rows tested against the two corner triangles.
    fn fill_dseg(&self, op: &mut impl RasterOp, s2: &Seg, z0: i32, z1: i32, ex: f64) {
        let Some((zc0, zc1)) = self.clamp_z(z0, z1) else { return };
        let g = &self.geom;
        let mut s = WideSeg25::new(
            crate::model::primitive::segment::Seg25::new(*s2, z0),
            ex,
        );
        if s.wider_than_base_len() {
            // Exchange length and width so the scan always progresses; widen
            // slightly so the original endpoints stay covered.
            s = s.swap_wl(self.tolerance, -2.0 * self.tolerance);
        }
        let s = s.ordered_y();
        let dir = s.s2().dir();
        if dir.y.abs() < 0.0078125 {
            // Nearly horizontal diagonals break the scanline formulation;
            // fall back to a conservative bounding-box fill.
            warn!("rasterizing nearly horizontal segment as its bounding box");
            self.fill_rect(op, &s.s2().bounds().expand(s.half_width()), z0, z1);
            return;
        }
        let ex_cell = g.edge05;
        let ut = s.half_width_span();
        let vt = if ut.x < 0.0 { -ut } else { ut }; // half-width vector with dx >= 0
        let sl = Seg::new(s.st2() - vt, s.en2() - vt); // left track boundary
        let sr = Seg::new(s.st2() + vt, s.en2() + vt); // right track boundary
        // Triangulation of the capsule body; sl and sr share endpoint order
        // so the edges fit.
        let al = Tri::new([sl.st(), sl.en(), sr.st()]);
        let ar = Tri::new([sr.st(), sr.en(), sl.en()]);
        let y0 = sl.st().y.min(sr.st().y);
        let y1 = sl.en().y.max(sr.en().y);
        let ya0 = sl.st().y.max(sr.st().y); // y-range delimited by the boundary lines alone
        let ya1 = sl.en().y.min(sr.en().y);
        let yi0 = g.y_index_bounded(y0, ex_cell - self.tolerance);
        let yi1 = g.y_index_bounded(y1, -ex_cell);
        let x_at_y = |b: &Seg, y: f64| b.st().x + (y - b.st().y) * dir.x / dir.y;
        let mut y = g.mid_y(yi0);
        for yi in yi0..=yi1 {
            let mut x0 = g.x_index_bounded(x_at_y(&sl, y), ex_cell - self.tolerance) as i64;
            let mut x1 = g.x_index_bounded(x_at_y(&sr, y), -ex_cell) as i64;
            if y < ya0 || y > ya1 {
                let mut m = Pt::new(g.mid_x(x0 as u32), y);
                while x0 < x1 && al.has_on_unbounded_side(m) && ar.has_on_unbounded_side(m) {
                    x0 += 1;
                    m.x += g.edge;
                }
                if x0 != x1 {
                    m = Pt::new(g.mid_x(x1 as u32), y);
                }
                while x1 >= x0 && al.has_on_unbounded_side(m) && ar.has_on_unbounded_side(m) {
                    x1 -= 1;
                    m.x -= g.edge;
                }
            }
            if x0 <= x1 {
                op.write_row(zc0, zc1, yi, x0 as u32, x1 as u32);
            }
            y += g.edge;
        }
    }

    /// One cell per scanline along a diagonal mid-line.
    fn line_dseg(&self, op: &mut impl RasterOp, s: &Seg, z0: u32, z1: u32) {
        let g = &self.geom;
        let ex = self.tolerance + g.edge05;
        let sx0 = s.st().x.min(s.en().x);
        let sx1 = s.st().x.max(s.en().x);
        let sy0 = s.st().y.min(s.en().y);
        let sy1 = s.st().y.max(s.en().y);
        let x0 = g.xf_index(sx0, ex);
        let y0 = g.yf_index(sy0, ex);
        let x1 = g.xf_index(sx1, -ex).max(x0); // equal if within tolerance
        let y1 = g.yf_index(sy1, -ex).max(y0);
        let xr = (g.size[0] as i64 - 1).min(x1 as i64); // don't overshoot ...
        let xl = 0i64.max(x0 as i64); // or undershoot on nearly horizontal lines
        if xl > xr {
            return;
        }
        let xrev = (s.st().x > s.en().x) != (s.st().y > s.en().y);
        let dxdy = (s.en().x - s.st().x) / (s.en().y - s.st().y);
        let mut x = if xrev { x1 } else { x0 };
        let mut y = y0;
        while y <= y1 {
            let yi = y as i64;
            if yi >= 0 && yi < g.size[1] as i64 {
                let xa = (x as i64).clamp(xl, xr);
                let xb = ((x + dxdy) as i64).clamp(xl, xr);
                op.write_row(z0, z1, yi as u32, xa.min(xb) as u32, xa.max(xb) as u32);
            }
            y += 1.0;
            x += dxdy;
        }
    }

    /// Triangle fill: walk inward from both x-extremes on each scanline.
    pub fn fill_tri(&self, op: &mut impl RasterOp, t: &Tri, z0: i32, z1: i32) {
        let Some((z0, z1)) = self.clamp_z(z0, z1) else { return };
        debug_assert!(self.expansion == 0.0, "triangle rasterization with dilation unsupported");
        let g = &self.geom;
        let ex = g.edge05 + self.tolerance;
        let bounds = t.bounds();
        let xl = g.x_index_bounded(bounds.l(), ex);
        let xr = g.x_index_bounded(bounds.r(), -ex);
        let y0 = g.y_index_bounded(bounds.b(), ex);
        let y1 = g.y_index_bounded(bounds.t(), -ex);
        let mut y = g.mid_y(y0);
        for yi in y0..=y1 {
            let mut x0 = xl;
            let mut v = Pt::new(g.mid_x(xl), y);
            while x0 <= xr && t.has_on_unbounded_side(v) {
                x0 += 1;
                v.x += g.edge;
            }
            if x0 > xr {
                y += g.edge;
                continue;
            }
            let mut x1 = xr;
            v = Pt::new(g.mid_x(xr), y);
            while x1 > x0 && t.has_on_unbounded_side(v) {
                x1 -= 1;
                v.x -= g.edge;
            }
            op.write_row(z0, z1, yi, x0, x1);
            y += g.edge;
        }
    }

    /// Polygon fill; the expansion dilates the polygon first.
    pub fn fill_poly(&self, op: &mut impl RasterOp, poly: &Poly, z0: i32, z1: i32) {
        let Some((z0, z1)) = self.clamp_z(z0, z1) else { return };
        let grown;
        let poly = if self.expansion > 0.0 {
            grown = poly.grow(self.expansion);
            &grown
        } else {
            poly
        };
        let g = &self.geom;
        let ex = g.edge05 + self.tolerance;
        let bounds = poly.bounds();
        let xl = g.x_index_bounded(bounds.l(), ex);
        let xr = g.x_index_bounded(bounds.r(), -ex);
        let y0 = g.y_index_bounded(bounds.b(), ex);
        let y1 = g.y_index_bounded(bounds.t(), -ex);
        let mut y = g.mid_y(y0);
        for yi in y0..=y1 {
            let mut x0 = xl;
            let mut v = Pt::new(g.mid_x(xl), y);
            while x0 <= xr && poly.has_on_unbounded_side(v) {
                x0 += 1;
                v.x += g.edge;
            }
            if x0 > xr {
                y += g.edge;
                continue;
            }
            let mut x1 = xr;
            v = Pt::new(g.mid_x(xr), y);
            while x1 > x0 && poly.has_on_unbounded_side(v) {
                x1 -= 1;
                v.x -= g.edge;
            }
            op.write_row(z0, z1, yi, x0, x1);
            y += g.edge;
        }
    }

    pub fn fill_shape(&self, op: &mut impl RasterOp, shape: &Shape, z0: i32, z1: i32) {
        match shape {
            Shape::Rect(r) => self.fill_rect(op, r, z0, z1),
            Shape::Circle(c) => self.fill_circle(op, c, z0, z1),
            Shape::Polygon(g) => self.fill_poly(op, g, z0, z1),
            Shape::Seg(s) => self.fill_wseg(op, s, CAPS_BOTH, z0, z1),
            Shape::Path(p) => {
                for cap in p.caps(z0) {
                    self.fill_wseg(op, &cap, CAPS_BOTH, z0, z1);
                }
            }
        }
    }

    /// Rasterize a track's items. Interior joints draw the cap on the wider
    /// side only and suppress the following source cap; a segment ending in
    /// a via suppresses the next source cap as well.
    pub fn fill_track(&self, op: &mut impl RasterOp, t: &Track, items_mask: u8) {
        if items_mask & RASTER_VIAS != 0 {
            for v in t.vias() {
                self.fill_circle(op, &v.circle(), v.zmin(), v.zmax());
            }
        }
        if !t.has_segments() || items_mask & RASTER_SEGMENTS == 0 {
            return;
        }
        if items_mask & RASTER_CAPS_AND_JUNCTIONS == 0 || !t.has_segment_joints() {
            // Simpler when no caps have to be drawn at all.
            for s in t.segments() {
                self.fill_wseg(op, s, 0x0, s.z(), s.z());
            }
            return;
        }
        let segs = t.segments();
        let mut mask = if t.has_start_cap() && !t.starts_on_via() { 0x0 } else { CAPS_TARGET };
        for i in 0..segs.len() - 1 {
            let s = &segs[i];
            let nxt = &segs[i + 1];
            mask = if mask & CAPS_TARGET != 0 { 0x0 } else { CAPS_SOURCE };
            // If the next segment is narrower on the same layer, rasterize
            // the target cap here and skip the next source cap.
            if s.half_width() > nxt.half_width() && s.z() == nxt.z() {
                mask |= CAPS_TARGET;
            }
            self.fill_wseg(op, s, mask, s.z(), s.z());
            if s.z() != nxt.z() {
                mask |= CAPS_TARGET; // s ends in a via, so skip the next source cap
            }
        }
        // Last segment.
        let last = segs.last().unwrap();
        mask = if mask & CAPS_TARGET != 0 { 0x0 } else { CAPS_SOURCE };
        if t.has_end_cap() && !t.ends_on_via() {
            mask |= CAPS_TARGET;
        }
        self.fill_wseg(op, last, mask, last.z(), last.z());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::primitive::{circ, pt, rt, wseg25};

    fn geom10() -> GridGeom {
        GridGeom::new(pt(0.0, 0.0), 1.0, [10, 10, 1])
    }

    fn cells(op: &RecordRangesOp) -> Vec<(u32, u32)> {
        let mut v = Vec::new();
        for r in &op.ranges {
            for y in r.y0..=r.y1 {
                for x in r.x0..=r.x1 {
                    v.push((x, y));
                }
            }
        }
        v.sort_unstable();
        v.dedup();
        v
    }

    #[test]
    fn test_fill_rect_midpoint() {
        let r = Rasterizer::new(geom10());
        let mut op = RecordRangesOp::default();
        // Covers centers of cells 1..=3 in x, 2..=2 in y.
        r.fill_rect(&mut op, &rt(1.0, 2.0, 4.0, 3.0), 0, 0);
        assert_eq!(op.ranges.len(), 1);
        let ir = op.ranges[0];
        assert_eq!((ir.x0, ir.x1, ir.y0, ir.y1), (1, 3, 2, 2));
    }

    #[test]
    fn test_fill_rect_subcell_never_vanishes() {
        let r = Rasterizer::new(geom10());
        let mut op = RecordRangesOp::default();
        // Smaller than a cell and missing the center: still one cell.
        r.fill_rect(&mut op, &rt(3.1, 3.1, 3.3, 3.3), 0, 0);
        assert_eq!(cells(&op), vec![(3, 3)]);
    }

    #[test]
    fn test_fill_circle() {
        let r = Rasterizer::new(geom10());
        let mut op = RecordRangesOp::default();
        // Slightly over unit radius at a cell center: a plus shape.
        r.fill_circle(&mut op, &circ(pt(4.5, 4.5), 1.1), 0, 0);
        assert_eq!(cells(&op), vec![(3, 4), (4, 3), (4, 4), (4, 5), (5, 4)]);
    }

    #[test]
    fn test_fill_circle_small() {
        let r = Rasterizer::new(geom10());
        let mut op = RecordRangesOp::default();
        r.fill_circle(&mut op, &circ(pt(2.5, 2.5), 0.2), 0, 0);
        assert_eq!(cells(&op), vec![(2, 2)]);
    }

    #[test]
    fn test_fill_hseg_row() {
        let r = Rasterizer::new(geom10());
        let mut op = RecordRangesOp::default();
        let s = wseg25(pt(0.5, 0.5), pt(9.5, 0.5), 0, 0.5);
        r.fill_wseg(&mut op, &s, 0x0, 0, 0);
        let c = cells(&op);
        assert_eq!(c, (0..10).map(|x| (x, 0)).collect::<Vec<_>>());
    }

    #[test]
    fn test_fill_subcell_seg_one_cell() {
        let r = Rasterizer::new(geom10());
        let mut op = RecordRangesOp::default();
        let s = wseg25(pt(2.1, 2.5), pt(2.4, 2.5), 0, 0.1);
        r.fill_wseg(&mut op, &s, 0x0, 0, 0);
        assert_eq!(cells(&op), vec![(2, 2)]);
    }

    #[test]
    fn test_fill_diag_seg() {
        let r = Rasterizer::new(geom10());
        let mut op = RecordRangesOp::default();
        let s = wseg25(pt(1.5, 1.5), pt(5.5, 5.5), 0, 0.5);
        r.fill_wseg(&mut op, &s, 0x0, 0, 0);
        let c = cells(&op);
        // The diagonal staircase is covered.
        for i in 1..=5 {
            assert!(c.contains(&(i, i)), "missing diagonal cell {i}");
        }
        // Far corners are not.
        assert!(!c.contains(&(1, 5)));
        assert!(!c.contains(&(5, 1)));
    }

    #[test]
    fn test_line_rect_ring() {
        let r = Rasterizer::new(geom10());
        let mut op = RecordRangesOp::default();
        r.line_rect(&mut op, &rt(0.0, 0.0, 10.0, 10.0), 0, 0);
        let c = cells(&op);
        assert_eq!(c.len(), 36); // 10x10 ring
        assert!(c.contains(&(0, 0)) && c.contains(&(9, 9)) && c.contains(&(0, 5)));
        assert!(!c.contains(&(5, 5)));
    }

    #[test]
    fn test_fill_poly_square() {
        let r = Rasterizer::new(geom10());
        let mut op = RecordRangesOp::default();
        let g = crate::model::primitive::poly(&[
            pt(2.0, 2.0),
            pt(6.0, 2.0),
            pt(6.0, 6.0),
            pt(2.0, 6.0),
        ]);
        r.fill_poly(&mut op, &g, 0, 0);
        let c = cells(&op);
        assert_eq!(c.len(), 16);
        assert!(c.contains(&(2, 2)) && c.contains(&(5, 5)));
        assert!(!c.contains(&(1, 2)) && !c.contains(&(6, 6)));
    }
}
