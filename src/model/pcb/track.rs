use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{invariant_err, Result};
use crate::model::geom::math::{f64_le, pt_eq, squared};
use crate::model::pcb::layer::ranges_overlap;
use crate::model::pcb::pin::Pin;
use crate::model::primitive::circle::Circle;
use crate::model::primitive::point::{Pt, Pt25};
use crate::model::primitive::rect::Rt;
use crate::model::primitive::segment::{Seg25, WideSeg25};
use crate::model::primitive::{seg, wseg25};

/// A plated hole connecting the layer range [zmin, zmax].
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Via {
    p: Pt,
    zmin: i32,
    zmax: i32,
    r: f64,
}

impl Via {
    pub fn new(p: Pt, z0: i32, z1: i32, r: f64) -> Self {
        Self { p, zmin: z0.min(z1), zmax: z0.max(z1), r }
    }

    pub fn location(&self) -> Pt {
        self.p
    }

    pub fn zmin(&self) -> i32 {
        self.zmin
    }

    pub fn zmax(&self) -> i32 {
        self.zmax
    }

    pub fn radius(&self) -> f64 {
        self.r
    }

    pub fn diameter(&self) -> f64 {
        self.r * 2.0
    }

    pub fn circle(&self) -> Circle {
        Circle::new(self.p, self.r)
    }

    pub fn on_layer(&self, z: i32) -> bool {
        self.zmin <= z && z <= self.zmax
    }

    pub fn contains(&self, v: Pt25) -> bool {
        pt_eq(self.p, v.xy()) && self.on_layer(v.z)
    }

    /// The z at the opposite end of the via from the given layer.
    pub fn other_end_z(&self, z: i32) -> i32 {
        if z == self.zmin { self.zmax } else { self.zmin }
    }

    pub fn other_end(&self, v: Pt25) -> Pt25 {
        self.p.with_z(self.other_end_z(v.z))
    }

    pub fn extend_to(&mut self, z: i32) {
        self.zmin = self.zmin.min(z);
        self.zmax = self.zmax.max(z);
    }

    pub fn set_range(&mut self, z0: i32, z1: i32) {
        self.zmin = z0.min(z1);
        self.zmax = z0.max(z1);
    }

    pub fn merge(&mut self, o: &Via) {
        self.extend_to(o.zmin);
        self.extend_to(o.zmax);
    }

    pub fn overlaps_seg(&self, s: &WideSeg25, clearance: f64) -> bool {
        if !self.on_layer(s.z()) {
            return false;
        }
        let d = crate::model::geom::distance::pt_seg_dist(&self.p, &s.s2());
        d < self.r + s.half_width() + clearance
    }

    pub fn overlaps_via(&self, o: &Via, clearance: f64) -> bool {
        if !ranges_overlap(self.zmin, self.zmax, o.zmin, o.zmax) {
            return false;
        }
        self.p.dist(o.p) < self.r + o.r + clearance
    }

    pub fn bounds(&self) -> Rt {
        self.circle().bounds()
    }
}

/// How two tracks can join end-to-end.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ContactType {
    None,
    EndToStart,
    EndToEnd,
    StartToEnd,
    StartToStart,
}

pub const CAP_START: u8 = 0x1;
pub const CAP_END: u8 = 0x2;
pub const CAP_JOINTS: u8 = 0x4;
pub const CAP_ALL: u8 = 0x7;

/// A contiguous run of wide segments and vias realizing (part of) a
/// connection. Consecutive segments share endpoints; layer changes happen
/// at vias whose centers sit on the adjoining segment endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    segments: Vec<WideSeg25>,
    vias: Vec<Via>,
    start: Pt25,
    end: Pt25,
    width: f64,
    via_diameter: f64,
    length: f64,
    caps_mask: u8,
    #[serde(skip)]
    rasterized: i32,
}

impl Track {
    pub fn new(start: Pt25) -> Self {
        Self {
            segments: Vec::new(),
            vias: Vec::new(),
            start,
            end: start,
            width: 0.0,
            via_diameter: 0.0,
            length: 0.0,
            caps_mask: CAP_ALL,
            rasterized: 0,
        }
    }

    pub fn start(&self) -> Pt25 {
        self.start
    }

    pub fn end(&self) -> Pt25 {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.vias.is_empty()
    }

    pub fn segments(&self) -> &[WideSeg25] {
        &self.segments
    }

    pub fn vias(&self) -> &[Via] {
        &self.vias
    }

    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    pub fn num_vias(&self) -> usize {
        self.vias.len()
    }

    pub fn has_segments(&self) -> bool {
        !self.segments.is_empty()
    }

    pub fn has_vias(&self) -> bool {
        !self.vias.is_empty()
    }

    pub fn default_width(&self) -> f64 {
        self.width
    }

    pub fn default_via_diameter(&self) -> f64 {
        self.via_diameter
    }

    pub fn default_via_radius(&self) -> f64 {
        self.via_diameter * 0.5
    }

    pub fn set_default_width(&mut self, w: f64) {
        self.width = w;
    }

    pub fn set_default_via_diameter(&mut self, d: f64) {
        self.via_diameter = d;
    }

    /// Length is maintained by all operations except `raw_append`.
    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn compute_length(&mut self) {
        self.length = self.segments.iter().map(|s| s.base().length()).sum();
    }

    pub fn set_caps_mask(&mut self, m: u8) {
        self.caps_mask = m;
    }

    pub fn has_start_cap(&self) -> bool {
        self.caps_mask & CAP_START != 0
    }

    pub fn has_end_cap(&self) -> bool {
        self.caps_mask & CAP_END != 0
    }

    pub fn has_segment_joints(&self) -> bool {
        self.caps_mask & CAP_JOINTS != 0
    }

    pub fn starts_on_via_center(&self) -> bool {
        if !self.has_vias() {
            return false;
        }
        if !self.has_segments() {
            return true;
        }
        pt_eq(self.vias[0].location(), self.segments[0].st2())
            && self.vias[0].on_layer(self.segments[0].z())
    }

    pub fn ends_on_via_center(&self) -> bool {
        if !self.has_vias() {
            return false;
        }
        if !self.has_segments() {
            return true;
        }
        let v = self.vias.last().unwrap();
        let s = self.segments.last().unwrap();
        pt_eq(v.location(), s.en2()) && v.on_layer(s.z())
    }

    pub fn starts_on_via(&self) -> bool {
        if let Some(s) = self.segments.first() { self.start.z != s.z() } else { self.has_vias() }
    }

    pub fn ends_on_via(&self) -> bool {
        if let Some(s) = self.segments.last() { self.end.z != s.z() } else { self.has_vias() }
    }

    pub fn clear(&mut self) {
        if self.rasterized > 0 {
            warn!("clearing track that is marked as rasterized");
        }
        self.segments.clear();
        self.vias.clear();
        self.end = self.start;
        self.length = 0.0;
    }

    pub fn set_start(&mut self, v: Pt25) -> Result<()> {
        if let Some(s) = self.segments.first() {
            if !pt_eq(s.st2(), v.xy()) {
                return invariant_err("start location for track does not match its path");
            }
            if s.z() != v.z && !(self.has_vias() && self.vias[0].contains(v)) {
                return invariant_err("start layer for track does not match its path");
            }
        } else if self.has_vias() && !self.vias[0].contains(v) {
            return invariant_err("start location for track does not match source via");
        }
        self.start = v;
        Ok(())
    }

    pub fn set_end(&mut self, v: Pt25) -> Result<()> {
        if let Some(s) = self.segments.last() {
            if !pt_eq(s.en2(), v.xy()) {
                return invariant_err("end location for track does not match its path");
            }
            if s.z() != v.z && !(self.has_vias() && self.vias.last().unwrap().contains(v)) {
                return invariant_err("end layer for track does not match its path");
            }
        } else if self.has_vias() && !self.vias.last().unwrap().contains(v) {
            return invariant_err("end location for track does not match final via");
        }
        self.end = v;
        Ok(())
    }

    /// Set the end without validation; used during reconstruction.
    pub fn raw_set_end(&mut self, v: Pt25) {
        self.end = v;
    }

    pub fn raw_set_end_layer(&mut self, z: i32) {
        self.end = self.end.with_z(z);
    }

    pub fn move_start_to(&mut self, v: Pt25) -> Result<()> {
        let Some(s) = self.segments.first_mut() else {
            return invariant_err("cannot move start point without segments");
        };
        if s.z() != v.z {
            return invariant_err("cannot move start point to different layer");
        }
        s.set_base(Seg25::new(seg(v.xy(), s.en2()), v.z));
        self.start = v;
        Ok(())
    }

    pub fn move_end_to(&mut self, v: Pt25) -> Result<()> {
        let Some(s) = self.segments.last_mut() else {
            return invariant_err("cannot move end point without segments");
        };
        if s.z() != v.z {
            return invariant_err("cannot move end point to different layer");
        }
        s.set_base(Seg25::new(seg(s.st2(), v.xy()), v.z));
        self.end = v;
        Ok(())
    }

    pub fn set_segments(&mut self, segs: Vec<WideSeg25>) -> Result<()> {
        if let Some(s) = segs.first() {
            if !pt_eq(self.start.xy(), s.st2()) {
                return invariant_err("new segments don't match start point");
            }
        }
        if self.has_vias() {
            return invariant_err("must not replace segments while vias are present");
        }
        self.clear();
        self.segments = segs;
        self.compute_length();
        if let Some(s) = self.segments.last() {
            self.end = s.en();
        }
        Ok(())
    }

    pub fn raw_append(&mut self, s: WideSeg25) {
        self.segments.push(s);
    }

    pub fn raw_append_via(&mut self, c: Pt, z0: i32, z1: i32, r: f64) {
        self.vias.push(Via::new(c, z0, z1, r));
    }

    pub fn append_seg(&mut self, s: WideSeg25) -> Result<()> {
        if !pt_eq(self.end.xy(), s.st2()) || self.end.z != s.z() {
            return invariant_err("tried to append a discontiguous segment");
        }
        self.end = s.en();
        self.length += s.base().length();
        self.segments.push(s);
        Ok(())
    }

    pub fn append_via(&mut self, c: Pt, z0: i32, z1: i32, r: f64) -> Result<()> {
        let r = if r.is_nan() { self.default_via_radius() } else { r };
        if self.ends_on_via() {
            return invariant_err("tried to append a via to a track that already ends with a via");
        }
        if !pt_eq(self.end.xy(), c) {
            if self.end.xy().dist2(c) > squared(r) {
                return invariant_err("tried to append via at discontiguous location");
            }
            warn!("appending via at inexact location");
        }
        self.vias.push(Via::new(c, z0, z1, r));
        self.end = self.vias.last().unwrap().other_end(self.end);
        Ok(())
    }

    pub fn append(&mut self, t: &Track) -> Result<()> {
        if t.is_empty() {
            return Ok(());
        }
        if !self.touches(self.end, t.start) {
            return invariant_err("tried to append a discontiguous track");
        }
        let mut via_touch = None;
        if self.ends_on_via() && t.starts_on_via() {
            via_touch = Some((self.vias.len() - 1, self.pop_via()?));
        }
        self.end = t.end;
        self.segments.extend_from_slice(&t.segments);
        self.vias.extend_from_slice(&t.vias);
        self.length += t.length;
        if let Some((i, v)) = via_touch {
            self.vias[i].merge(&v);
        }
        Ok(())
    }

    fn touches(&self, a: Pt25, b: Pt25) -> bool {
        pt_eq(a.xy(), b.xy()) && a.z == b.z
    }

    pub fn pop_via(&mut self) -> Result<Via> {
        if !self.ends_on_via() {
            return invariant_err("track does not end on a via");
        }
        let Some(via) = self.vias.pop() else {
            return invariant_err("track end and via list are inconsistent");
        };
        self.end = if let Some(s) = self.segments.last() { s.en() } else { self.start };
        Ok(via)
    }

    pub fn pop_segment(&mut self) -> Result<WideSeg25> {
        if !self.has_segments() || self.ends_on_via() {
            return invariant_err("track does not end on a segment");
        }
        let s = self.segments.pop().unwrap();
        self.infer_end();
        self.length -= s.base().length();
        Ok(s)
    }

    pub fn pop_safe(&mut self) {
        if self.ends_on_via() {
            let _ = self.pop_via();
        } else if self.has_segments() {
            let _ = self.pop_segment();
        }
    }

    pub fn extend_to_layer(&mut self, z: i32) {
        if self.end.z == z {
            return;
        }
        if self.ends_on_via() {
            self.vias.last_mut().unwrap().extend_to(z);
        } else {
            let (ez, exy) = (self.end.z, self.end.xy());
            self.vias.push(Via::new(exy, ez, z, self.default_via_radius()));
        }
        self.raw_set_end_layer(z);
    }

    fn raw_extend_to(&mut self, v: Pt25) -> Result<()> {
        if v == self.end {
            return Ok(());
        }
        if self.end.z != v.z {
            return invariant_err("cannot extend track to new point without a via");
        }
        self.length += self.end.xy().dist(v.xy());
        if self.segments.is_empty() {
            self.segments.push(wseg25(self.start.xy(), v.xy(), v.z, self.width * 0.5));
        } else {
            let s = *self.segments.last().unwrap();
            // Extend the last segment if the new point continues its ray.
            let along = crate::model::geom::math::is_collinear(s.st2(), s.en2(), v.xy())
                && (v.xy() - s.st2()).dot(s.s2().dir()) >= 0.0;
            if along {
                *self.segments.last_mut().unwrap() =
                    wseg25(s.st2(), v.xy(), s.z(), s.half_width());
            } else {
                self.segments.push(wseg25(s.en2(), v.xy(), v.z, s.half_width()));
            }
        }
        self.end = v;
        Ok(())
    }

    /// Extend the track to a new point; `via_location` 0 places the layer
    /// change before the planar move, 1 after it, anything else forbids one.
    pub fn extend_to(&mut self, v: Pt25, via_location: u32) -> Result<()> {
        if via_location == 0 {
            self.extend_to_layer(v.z);
        }
        let target = if via_location == 0 { v } else { v.with_z(self.end.z) };
        self.raw_extend_to(target)?;
        if via_location == 1 {
            self.extend_to_layer(v.z);
        }
        Ok(())
    }

    /// Stitch vias at every layer change left in the segment list, plus the
    /// start/end layers. Expects no pre-existing vias.
    pub fn autocreate_vias(&mut self, end: Pt25) -> Result<()> {
        if !self.vias.is_empty() {
            return invariant_err("tried to create vias from segments when vias already exist");
        }
        if self.segments.is_empty() {
            if !pt_eq(self.start.xy(), end.xy()) {
                return invariant_err("tried to create via between differing xy coordinates");
            }
            let (sxy, sz) = (self.start.xy(), self.start.z);
            self.raw_append_via(sxy, sz, end.z, self.default_via_radius());
            self.raw_set_end_layer(end.z);
            return Ok(());
        }
        if !pt_eq(end.xy(), self.end.xy()) {
            return invariant_err("declared end point xy location does not match the segments");
        }
        if self.start.z != self.segments[0].z() {
            let (sxy, sz, fz) = (self.start.xy(), self.start.z, self.segments[0].z());
            self.raw_append_via(sxy, sz, fz, self.default_via_radius());
        }
        let mut z = self.segments[0].z();
        let joints: Vec<(Pt, i32, i32)> = self
            .segments
            .iter()
            .filter_map(|s| {
                if s.z() == z {
                    None
                } else {
                    let j = (s.st2(), z, s.z());
                    z = s.z();
                    Some(j)
                }
            })
            .collect();
        for (p, z0, z1) in joints {
            self.raw_append_via(p, z0, z1, self.default_via_radius());
        }
        let z_back = self.segments.last().unwrap().z();
        if z_back != end.z {
            let exy = self.end.xy();
            self.raw_append_via(exy, z_back, end.z, self.default_via_radius());
            self.raw_set_end_layer(end.z);
        }
        Ok(())
    }

    pub fn is_contiguous(&self) -> bool {
        self.segments.windows(2).all(|w| pt_eq(w[1].st2(), w[0].en2()))
    }

    /// Check that start/end agree with the segment and via lists.
    pub fn has_valid_ends(&self) -> bool {
        if self.is_empty() {
            return self.start == self.end;
        }
        if !self.has_vias() {
            return self.has_segments()
                && self.start == self.segments.first().unwrap().st()
                && self.end == self.segments.last().unwrap().en();
        }
        if !self.has_segments() {
            return self.num_vias() == 1
                && self.start.z != self.end.z
                && pt_eq(self.vias[0].location(), self.start.xy())
                && pt_eq(self.vias[0].location(), self.end.xy())
                && self.vias[0].on_layer(self.start.z)
                && self.vias[0].on_layer(self.end.z);
        }
        let first = self.segments.first().unwrap();
        let last = self.segments.last().unwrap();
        let vfront = self.vias.first().unwrap();
        let vback = self.vias.last().unwrap();
        let start_ok = pt_eq(self.start.xy(), first.st2())
            && if pt_eq(self.start.xy(), vfront.location()) && self.start.z != first.z() {
                vfront.on_layer(self.start.z) && vfront.on_layer(first.z())
            } else {
                self.start.z == first.z()
            };
        let end_ok = pt_eq(self.end.xy(), last.en2())
            && if pt_eq(self.end.xy(), vback.location()) && self.end.z != last.z() {
                vback.on_layer(self.end.z) && vback.on_layer(last.z())
            } else {
                self.end.z == last.z()
            };
        start_ok && end_ok
    }

    pub fn reverse(&mut self) {
        self.vias.reverse();
        let mut rev = Vec::with_capacity(self.segments.len());
        for s in self.segments.iter().rev() {
            rev.push(s.reversed());
        }
        self.segments = rev;
        std::mem::swap(&mut self.start, &mut self.end);
    }

    fn end_range(&self, start: bool) -> (i32, i32) {
        let (on_via, via, v) = if start {
            (self.starts_on_via(), self.vias.first(), self.start)
        } else {
            (self.ends_on_via(), self.vias.last(), self.end)
        };
        match (on_via, via) {
            (true, Some(via)) => (via.zmin(), via.zmax()),
            _ => (v.z, v.z),
        }
    }

    pub fn touches_start_to_start(&self, t: &Track) -> bool {
        if !pt_eq(self.start.xy(), t.start.xy()) {
            return false;
        }
        let (a0, a1) = self.end_range(true);
        let (b0, b1) = t.end_range(true);
        ranges_overlap(a0, a1, b0, b1)
    }

    pub fn touches_start_to_end(&self, t: &Track) -> bool {
        if !pt_eq(self.start.xy(), t.end.xy()) {
            return false;
        }
        let (a0, a1) = self.end_range(true);
        let (b0, b1) = t.end_range(false);
        ranges_overlap(a0, a1, b0, b1)
    }

    pub fn touches_end_to_start(&self, t: &Track) -> bool {
        if !pt_eq(self.end.xy(), t.start.xy()) {
            return false;
        }
        let (a0, a1) = self.end_range(false);
        let (b0, b1) = t.end_range(true);
        ranges_overlap(a0, a1, b0, b1)
    }

    pub fn touches_end_to_end(&self, t: &Track) -> bool {
        if !pt_eq(self.end.xy(), t.end.xy()) {
            return false;
        }
        let (a0, a1) = self.end_range(false);
        let (b0, b1) = t.end_range(false);
        ranges_overlap(a0, a1, b0, b1)
    }

    pub fn can_attach(&self, t: &Track) -> ContactType {
        if self.touches_end_to_start(t) {
            ContactType::EndToStart
        } else if self.touches_end_to_end(t) {
            ContactType::EndToEnd
        } else if self.touches_start_to_end(t) {
            ContactType::StartToEnd
        } else if self.touches_start_to_start(t) {
            ContactType::StartToStart
        } else {
            ContactType::None
        }
    }

    pub fn infer_start(&mut self) {
        if self.starts_on_via_center() {
            let v = self.vias[0];
            let z = if let Some(s) = self.segments.first() { s.z() } else { v.zmax() };
            self.start = v.location().with_z(v.other_end_z(z));
        } else if let Some(s) = self.segments.first() {
            self.start = s.st();
        }
    }

    pub fn infer_end(&mut self) {
        if self.ends_on_via_center() {
            let v = *self.vias.last().unwrap();
            let z = if let Some(s) = self.segments.last() { s.z() } else { self.start.z };
            self.end = v.location().with_z(v.other_end_z(z));
        } else if let Some(s) = self.segments.last() {
            self.end = s.en();
        } else {
            self.end = self.start;
        }
    }

    pub fn infer_endpoints(&mut self) {
        self.infer_start();
        self.infer_end();
    }

    /// Bounding box over segments and vias, expanded by `clearance`.
    /// `z` restricts to one layer; `None` spans all layers.
    pub fn bbox(&self, clearance: f64, z: Option<i32>) -> Rt {
        let mut r = Rt::empty();
        for s in &self.segments {
            if z.is_none() || Some(s.z()) == z {
                r = r.union(&s.bounds());
            }
        }
        for v in &self.vias {
            if z.map_or(true, |z| v.on_layer(z)) {
                r = r.union(&v.bounds());
            }
        }
        r.expand(clearance)
    }

    pub fn snap_to_start(&self, v: Pt25, max_distance: f64) -> Option<Pt25> {
        let mut d = self.segments.first().map_or(0.0, |s| s.half_width());
        if self.starts_on_via() {
            d = d.max(self.vias[0].radius());
        }
        if self.start.xy().dist2(v.xy()) > squared(d + max_distance) {
            return None;
        }
        Some(self.start)
    }

    pub fn snap_to_end(&self, v: Pt25, max_distance: f64) -> Option<Pt25> {
        let mut d = self.segments.last().map_or(0.0, |s| s.half_width());
        if self.ends_on_via() {
            d = d.max(self.vias.last().unwrap().radius());
        }
        if self.end.xy().dist2(v.xy()) > squared(d + max_distance) {
            return None;
        }
        Some(self.end)
    }

    pub fn snap_to_endpoint(&self, v: Pt25, max_distance: f64) -> Option<Pt25> {
        self.snap_to_end(v, max_distance).or_else(|| self.snap_to_start(v, max_distance))
    }

    pub fn violates_clearance_seg(&self, s: &WideSeg25, clearance: f64) -> bool {
        self.segments.iter().any(|x| x.violates_clearance(s, clearance))
            || self.vias.iter().any(|v| v.overlaps_seg(s, clearance))
    }

    pub fn violates_clearance_via(&self, via: &Via, clearance: f64) -> bool {
        self.segments.iter().any(|s| via.overlaps_seg(s, clearance))
            || self.vias.iter().any(|v| via.overlaps_via(v, clearance))
    }

    pub fn violates_clearance_pin(&self, pin: &Pin, clearance: f64) -> bool {
        let seg_hit = self.segments.iter().any(|s| {
            pin.is_on_layer(s.z())
                && f64_le(
                    pin.shape.dist(&crate::model::primitive::shape::Shape::Seg(*s)),
                    clearance,
                )
        });
        let via_hit = self.vias.iter().any(|v| {
            ranges_overlap(v.zmin(), v.zmax(), pin.zmin, pin.zmax)
                && f64_le(
                    pin.shape.dist(&crate::model::primitive::shape::Shape::Circle(v.circle())),
                    clearance,
                )
        });
        seg_hit || via_hit
    }

    pub fn violates_clearance(&self, that: &Track, clearance: f64) -> bool {
        if !self.bbox(clearance, None).intersects(&that.bbox(clearance, None)) {
            return false;
        }
        self.segments.iter().any(|s| that.violates_clearance_seg(s, clearance))
            || self.vias.iter().any(|v| that.violates_clearance_via(v, clearance))
    }

    pub fn intersects(&self, bbox: &Rt, z0: i32, z1: i32) -> bool {
        for s in &self.segments {
            if s.z() >= z0 && s.z() <= z1 && s.intersects_rt(bbox) {
                return true;
            }
        }
        for v in &self.vias {
            if v.zmin() <= z1
                && v.zmax() >= z0
                && crate::model::geom::intersects::circ_intersects_rt(&v.circle(), bbox)
            {
                return true;
            }
        }
        false
    }

    /// Grid rasterization count: 0 or 1; anything else is an inconsistency.
    pub fn is_rasterized(&self) -> bool {
        self.rasterized > 0
    }

    pub fn reset_rasterized(&mut self) {
        self.rasterized = 0;
    }

    pub fn add_rasterized(&mut self, count: i32) {
        self.rasterized += count;
        if !(0..=1).contains(&self.rasterized) {
            warn!("track rasterization count is {}", self.rasterized);
        }
        debug_assert!((0..=1).contains(&self.rasterized));
    }

    /// The track as a 2.5D polyline, layer changes included.
    pub fn to_path(&self) -> Vec<Pt25> {
        let mut path = vec![self.start];
        for s in &self.segments {
            if s.z() != path.last().unwrap().z {
                path.push(s.st());
            }
            path.push(s.en());
        }
        if *path.last().unwrap() != self.end {
            path.push(self.end);
        }
        path
    }
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "{{}}");
        }
        let mut v = 0;
        write!(f, "START{}", self.start)?;
        for s in &self.segments {
            while v < self.vias.len() && pt_eq(self.vias[v].location(), s.st2()) {
                write!(f, " O({},{})", self.vias[v].zmin(), self.vias[v].zmax())?;
                v += 1;
            }
            write!(f, " S{}", s.en())?;
        }
        for via in &self.vias[v..] {
            write!(f, " O({},{})", via.zmin(), via.zmax())?;
        }
        write!(f, " END{}", self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::primitive::{pt, pt25};

    fn track_with(width: f64, via_d: f64) -> Track {
        let mut t = Track::new(pt25(0.0, 0.0, 0));
        t.set_default_width(width);
        t.set_default_via_diameter(via_d);
        t
    }

    #[test]
    fn test_empty_track_ends() {
        let t = track_with(1.0, 1.0);
        assert!(t.has_valid_ends());
        assert!(t.is_contiguous());
        assert_eq!(t.start(), t.end());
    }

    #[test]
    fn test_append_and_ends() {
        let mut t = track_with(1.0, 1.0);
        t.append_seg(wseg25(pt(0.0, 0.0), pt(4.0, 0.0), 0, 0.5)).unwrap();
        t.append_seg(wseg25(pt(4.0, 0.0), pt(4.0, 3.0), 0, 0.5)).unwrap();
        assert!(t.has_valid_ends());
        assert!(t.is_contiguous());
        assert_eq!(t.end(), pt25(4.0, 3.0, 0));
        assert!((t.length() - 7.0).abs() < 1e-9);

        assert!(t.append_seg(wseg25(pt(9.0, 9.0), pt(10.0, 9.0), 0, 0.5)).is_err());
    }

    #[test]
    fn test_via_only_track() {
        let mut t = track_with(1.0, 1.0);
        t.append_via(pt(0.0, 0.0), 0, 1, 0.5).unwrap();
        assert_eq!(t.end(), pt25(0.0, 0.0, 1));
        assert!(t.has_valid_ends());
        assert!(t.ends_on_via());
        assert!(t.starts_on_via());
    }

    #[test]
    fn test_autocreate_vias() {
        let mut t = track_with(1.0, 1.0);
        t.raw_append(wseg25(pt(0.0, 0.0), pt(2.0, 0.0), 0, 0.5));
        t.raw_append(wseg25(pt(2.0, 0.0), pt(2.0, 2.0), 1, 0.5));
        t.raw_set_end(pt25(2.0, 2.0, 1));
        t.autocreate_vias(pt25(2.0, 2.0, 1)).unwrap();
        assert_eq!(t.num_vias(), 1);
        let v = t.vias()[0];
        assert_eq!((v.zmin(), v.zmax()), (0, 1));
        assert!(pt_eq(v.location(), pt(2.0, 0.0)));
        assert!(t.has_valid_ends());
    }

    #[test]
    fn test_autocreate_vias_layer_extension() {
        // Track reconstructed entirely on layer 1 while its endpoints were
        // declared on layer 0 (multi-layer pins): vias appear at both ends.
        let mut t = track_with(1.0, 1.0);
        t.raw_append(wseg25(pt(0.0, 0.0), pt(3.0, 0.0), 1, 0.5));
        t.raw_set_end(pt25(3.0, 0.0, 1));
        t.autocreate_vias(pt25(3.0, 0.0, 0)).unwrap();
        // Start stays declared; one via stitches the end back to layer 0.
        assert_eq!(t.num_vias(), 2);
        assert_eq!(t.end().z, 0);
    }

    #[test]
    fn test_pop_and_reverse() {
        let mut t = track_with(1.0, 1.0);
        t.append_seg(wseg25(pt(0.0, 0.0), pt(2.0, 0.0), 0, 0.5)).unwrap();
        t.append_via(pt(2.0, 0.0), 0, 1, 0.5).unwrap();
        t.append_seg(wseg25(pt(2.0, 0.0), pt(2.0, 2.0), 1, 0.5)).unwrap();
        assert!(t.has_valid_ends());

        let mut r = t.clone();
        r.reverse();
        assert_eq!(r.start(), pt25(2.0, 2.0, 1));
        assert_eq!(r.end(), pt25(0.0, 0.0, 0));
        assert!(r.has_valid_ends());

        let s = t.pop_segment().unwrap();
        assert_eq!(s.en2(), pt(2.0, 2.0));
        assert!(t.ends_on_via());
        let v = t.pop_via().unwrap();
        assert_eq!((v.zmin(), v.zmax()), (0, 1));
        assert_eq!(t.end(), pt25(2.0, 0.0, 0));
    }

    #[test]
    fn test_merge_attach() {
        let mut a = track_with(1.0, 1.0);
        a.append_seg(wseg25(pt(0.0, 0.0), pt(2.0, 0.0), 0, 0.5)).unwrap();
        let mut b = Track::new(pt25(2.0, 0.0, 0));
        b.set_default_width(1.0);
        b.append_seg(wseg25(pt(2.0, 0.0), pt(4.0, 0.0), 0, 0.5)).unwrap();
        assert_eq!(a.can_attach(&b), ContactType::EndToStart);
        a.append(&b).unwrap();
        assert_eq!(a.end(), pt25(4.0, 0.0, 0));
        assert_eq!(a.num_segments(), 2);
        assert!(a.has_valid_ends());
    }
}
