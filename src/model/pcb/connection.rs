use std::collections::BTreeSet;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{invariant_err, Result, RouteError};
use crate::model::geom::math::{distance45, pt_eq};
use crate::model::pcb::pin::{Pin, PinRef};
use crate::model::pcb::rules::DesignRules;
use crate::model::pcb::track::{ContactType, Track};
use crate::model::primitive::point::{Pt, Pt25};
use crate::model::primitive::rect::Rt;
use crate::model::primitive::segment::Seg;
use crate::model::primitive::{seg, seg25, wseg25};
use crate::model::primitive::segment::Seg25;

/// A two-terminal routing demand between two pins (or pin-less points).
///
/// Invariant: when routed there is exactly one track whose start matches
/// `source.xy()` on a source-pin-legal layer, and likewise for the end.
/// Several tracks may exist during partial construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: i32,
    source: Pt25,
    target: Pt25,
    source_pin: Option<PinRef>,
    target_pin: Option<PinRef>,
    tracks: Vec<Track>,
    rules: DesignRules,
    layer_mask: u32,
    routed: bool,
    pub locked: bool,
    reference_len: f32,
    pub color: Option<[u8; 4]>,
}

impl Connection {
    pub fn new(
        source: Pt25,
        source_pin: Option<PinRef>,
        target: Pt25,
        target_pin: Option<PinRef>,
    ) -> Self {
        if source == target {
            warn!("connection endpoints are the same");
        }
        Self {
            id: -1,
            source,
            target,
            source_pin,
            target_pin,
            tracks: Vec::new(),
            rules: DesignRules::default(),
            layer_mask: u32::MAX,
            routed: false,
            locked: false,
            reference_len: 0.0,
            color: None,
        }
    }

    pub fn source(&self) -> Pt25 {
        self.source
    }

    pub fn target(&self) -> Pt25 {
        self.target
    }

    pub fn source_pin(&self) -> Option<&PinRef> {
        self.source_pin.as_ref()
    }

    pub fn target_pin(&self) -> Option<&PinRef> {
        self.target_pin.as_ref()
    }

    pub fn name(&self) -> String {
        let s = self.source_pin.as_ref().map_or_else(|| self.source.to_string(), |p| p.to_string());
        let t = self.target_pin.as_ref().map_or_else(|| self.target.to_string(), |p| p.to_string());
        format!("({s},{t})")
    }

    pub fn vector2(&self) -> Pt {
        self.target.xy() - self.source.xy()
    }

    pub fn segment2(&self) -> Seg {
        seg(self.source.xy(), self.target.xy())
    }

    pub fn distance2(&self) -> f64 {
        self.source.xy().dist2(self.target.xy())
    }

    pub fn distance(&self) -> f64 {
        self.distance2().sqrt()
    }

    pub fn distance45(&self) -> f64 {
        distance45(self.source.xy(), self.target.xy())
    }

    pub fn rules(&self) -> &DesignRules {
        &self.rules
    }

    pub fn clearance(&self) -> f64 {
        self.rules.clearance
    }

    pub fn default_trace_width(&self) -> f64 {
        self.rules.trace_width
    }

    pub fn default_via_diameter(&self) -> f64 {
        self.rules.via_diameter
    }

    pub fn default_via_radius(&self) -> f64 {
        self.rules.via_radius()
    }

    pub fn set_rules_default(&mut self, rules: DesignRules) {
        self.rules = rules;
    }

    pub fn set_rules_min(&mut self, rules: &DesignRules) {
        self.rules = self.rules.max(rules);
    }

    pub fn set_parameters_from(&mut self, x: &Connection) {
        self.rules = x.rules;
        self.layer_mask = x.layer_mask;
    }

    pub fn reference_len(&self) -> f32 {
        self.reference_len
    }

    pub fn set_reference_len(&mut self, v: f32) {
        debug_assert!(self.reference_len == 0.0 && v > 0.0);
        self.reference_len = v;
    }

    pub fn can_route_on_layer(&self, z: i32) -> bool {
        (0..32).contains(&z) && self.layer_mask & (1 << z) != 0
    }

    pub fn layer_mask(&self) -> u32 {
        self.layer_mask
    }

    pub fn is_routed(&self) -> bool {
        self.routed
    }

    pub fn set_routed(&mut self, b: bool) {
        self.routed = b;
    }

    pub fn is_ordered_x_major(&self) -> bool {
        let (s, t) = (self.source, self.target);
        (s.x < t.x)
            || (s.x == t.x && s.y < t.y)
            || (s.x == t.x && s.y == t.y && s.z < t.z)
    }

    pub fn reverse(&mut self) {
        std::mem::swap(&mut self.source, &mut self.target);
        std::mem::swap(&mut self.source_pin, &mut self.target_pin);
        for t in &mut self.tracks {
            if t.start() == self.target || t.end() == self.source {
                t.reverse();
            }
        }
    }

    // Track management.

    pub fn has_tracks(&self) -> bool {
        !self.tracks.is_empty()
    }

    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn tracks_mut(&mut self) -> &mut [Track] {
        &mut self.tracks
    }

    pub fn track(&self, i: usize) -> &Track {
        &self.tracks[i]
    }

    pub fn track_at(&self, v: Pt25) -> Option<usize> {
        self.tracks.iter().position(|t| t.start() == v || t.end() == v)
    }

    /// The track whose end is closest to `v` on the same layer, within
    /// a maximum-norm tolerance.
    pub fn track_ending_near(&self, v: Pt25, tolerance: f64) -> Option<usize> {
        let mut best = f64::INFINITY;
        let mut r = None;
        for (i, t) in self.tracks.iter().enumerate() {
            if t.end().z != v.z {
                continue;
            }
            let d = (v.x - t.end().x).abs().max((v.y - t.end().y).abs());
            if d < best {
                best = d;
                r = Some(i);
            }
        }
        if best <= tolerance { r } else { None }
    }

    pub fn new_track(&mut self, start: Pt25) -> Result<&mut Track> {
        if self.track_at(start).is_some() {
            return invariant_err("tried to create a new track when one can be extended");
        }
        let mut t = Track::new(start);
        t.set_default_width(self.default_trace_width());
        t.set_default_via_diameter(self.default_via_diameter());
        self.tracks.push(t);
        Ok(self.tracks.last_mut().unwrap())
    }

    pub fn pop_track(&mut self, i: usize) -> Track {
        self.routed = false;
        self.tracks.remove(i)
    }

    pub fn clear_tracks(&mut self) {
        self.routed = false;
        self.tracks.clear();
    }

    pub fn set_track(&mut self, t: Track) {
        self.clear_tracks();
        self.tracks.push(t);
    }

    /// Whether the tracks uniformly are or are not rasterized into the grid.
    pub fn is_rasterized_all_or_none(&self) -> Result<bool> {
        let Some(first) = self.tracks.first() else { return Ok(false) };
        let r = first.is_rasterized();
        if self.tracks.iter().any(|t| t.is_rasterized() != r) {
            return invariant_err("expected all or none of the tracks to be rasterized");
        }
        Ok(r)
    }

    pub fn tracks_bbox(&self) -> Rt {
        self.tracks.iter().fold(Rt::empty(), |r, t| r.union(&t.bbox(0.0, None)))
    }

    pub fn bbox(&self) -> Rt {
        Rt::enclosing(self.source.xy(), self.target.xy())
    }

    /// Whether the single track realizes the connection, given the resolved
    /// endpoint pins.
    pub fn realizes_route(&self, src_pin: Option<&Pin>, dst_pin: Option<&Pin>) -> bool {
        if self.tracks.len() != 1 {
            return false;
        }
        let a = self.tracks[0].start();
        let b = self.tracks[0].end();
        if !pt_eq(a.xy(), self.source.xy()) || !pt_eq(b.xy(), self.target.xy()) {
            return false;
        }
        (a.z == self.source.z || src_pin.map_or(false, |p| p.is_on_layer(a.z)))
            && (b.z == self.target.z || dst_pin.map_or(false, |p| p.is_on_layer(b.z)))
    }

    pub fn check_routed(&mut self, src_pin: Option<&Pin>, dst_pin: Option<&Pin>) -> bool {
        self.routed = self.realizes_route(src_pin, dst_pin);
        self.routed
    }

    /// Snap the single track's endpoints onto the declared endpoints and mark
    /// the connection routed. The track end may be off by up to one unit
    /// (A* reconstruction ends on the cell the endpoint falls into); a larger
    /// gap is an error. Thru-pin layer extension is honored.
    pub fn force_routed(&mut self, src_pin: Option<&Pin>, dst_pin: Option<&Pin>) -> Result<()> {
        if self.tracks.len() != 1 {
            return invariant_err("force_routed requires a single track");
        }
        let (source, target) = (self.source, self.target);
        let t = &mut self.tracks[0];
        let mut zs = source.z;
        let mut zt = target.z;
        if t.start().z != zs && src_pin.map_or(false, |p| p.is_on_layer(t.start().z)) {
            zs = t.start().z;
        }
        if t.end().z != zt && dst_pin.map_or(false, |p| p.is_on_layer(t.end().z)) {
            zt = t.end().z;
        }
        let end_on_pad = dst_pin.map_or(false, |p| p.contains_3d(t.end()));
        if t.end().xy().dist2(target.xy()) > 1.0 && !end_on_pad {
            return invariant_err("track end is too far from connection target");
        }
        if t.start() != source.with_z(zs) {
            t.move_start_to(source.xy().with_z(zs))?;
        }
        if t.end() != target.with_z(zt) {
            t.move_end_to(target.xy().with_z(zt))?;
        }
        self.routed = true;
        Ok(())
    }

    fn delete_empty_tracks(&mut self) {
        self.tracks.retain(|t| !t.is_empty());
    }

    /// Append a track and merge it into any tracks it touches.
    pub fn append_track(
        &mut self,
        t: Track,
        src_pin: Option<&Pin>,
        dst_pin: Option<&Pin>,
    ) -> Result<()> {
        if self.is_routed() {
            return invariant_err("cannot append track to routed connection");
        }
        self.tracks.push(t);
        self.merge_last_track()?;
        self.delete_empty_tracks();
        self.check_routed(src_pin, dst_pin);
        Ok(())
    }

    fn take_track(&mut self, i: usize) -> Track {
        let start = self.tracks[i].start();
        std::mem::replace(&mut self.tracks[i], Track::new(start))
    }

    fn merge_last_track(&mut self) -> Result<()> {
        let mut ti = self.tracks.len() - 1;
        if self.tracks[ti].end() == self.source {
            self.tracks[ti].reverse();
        }
        loop {
            let mut merged = false;
            for k in 0..self.tracks.len() {
                if k == ti || self.tracks[k].is_empty() || self.tracks[ti].is_empty() {
                    continue;
                }
                match self.tracks[k].can_attach(&self.tracks[ti]) {
                    ContactType::EndToStart => {
                        let t = self.take_track(ti);
                        self.tracks[k].append(&t)?;
                        ti = k;
                    }
                    ContactType::StartToEnd => {
                        let t = self.take_track(k);
                        self.tracks[ti].append(&t)?;
                    }
                    ContactType::EndToEnd => {
                        if self.tracks[ti].start() != self.source {
                            self.tracks.swap(ti, k);
                        }
                        let mut t = self.take_track(k);
                        t.reverse();
                        self.tracks[ti].append(&t)?;
                    }
                    ContactType::StartToStart => {
                        return invariant_err("did not expect tracks to have same starting point");
                    }
                    ContactType::None => continue,
                }
                debug_assert!(self.tracks[ti].has_valid_ends());
                merged = true;
                break;
            }
            if !merged {
                break;
            }
        }
        debug!("merge_track: now have {} tracks", self.tracks.len());
        Ok(())
    }

    /// Direct track without considering obstacles: an optional via at the
    /// source (0) or target (1), one straight segment.
    pub fn make_direct_track(&mut self, min_len2: f64, via_location: u32) -> Result<()> {
        let via_location =
            if self.source.z == self.target.z { 2 } else { via_location };
        if self.has_tracks() {
            return invariant_err("requested a direct track but a track already exists");
        }
        let z = if via_location == 0 { self.target.z } else { self.source.z };
        let s = seg25(self.source.xy(), self.target.xy(), z);
        let (source, target) = (self.source, self.target);
        let hw = self.default_trace_width() * 0.5;
        let via_r = self.default_via_radius();
        let t = self.new_track(source)?;
        if via_location == 0 {
            t.append_via(source.xy(), source.z, target.z, via_r)?;
        }
        if s.length2() >= min_len2 {
            t.append_seg(widen(s, hw))?;
        }
        if via_location == 1 {
            t.append_via(target.xy(), source.z, target.z, via_r)?;
        }
        Ok(())
    }

    /// Direct track with a 45-degree bend: straight run, diagonal run,
    /// straight run. `bend_location` slides the bend from source (0) to
    /// target (1); `via_location` indexes the run after which the layer
    /// changes (0..=2), anything larger means no via.
    pub fn make_direct_track45(
        &mut self,
        min_len2: f64,
        via_location: u32,
        bend_location: f64,
    ) -> Result<()> {
        if !(0.0..=1.0).contains(&bend_location) {
            return invariant_err("must have 0 <= bend_location <= 1");
        }
        if via_location > 3 {
            return invariant_err("via_location must be <= 3");
        }
        if self.has_tracks() {
            return invariant_err("requested a direct track but a track already exists");
        }

        let d = self.vector2();
        let (lx, ly) = (d.x.abs(), d.y.abs());
        let mx = if d.x < 0.0 { -1.0 } else { 1.0 };
        let my = if d.y < 0.0 { -1.0 } else { 1.0 };
        let ds = if lx > ly { Pt::new((lx - ly) * mx, 0.0) } else { Pt::new(0.0, (ly - lx) * my) };
        let dd = Pt::new(lx.min(ly) * mx, lx.min(ly) * my);

        let (source, target) = (self.source, self.target);
        let mut v = source.xy();
        let mut z = source.z;
        let mut runs = [Seg25::default(); 3];
        // 1. Straight up to the bend.
        v = v + ds * bend_location;
        if via_location == 0 {
            z = target.z;
        }
        runs[0] = seg25(source.xy(), v, z);
        // 2. Diagonal.
        v = v + dd;
        if via_location == 1 {
            z = target.z;
        }
        runs[1] = seg25(runs[0].en().xy(), v, z);
        // 3. Straight to the target.
        if via_location == 2 {
            z = target.z;
        }
        runs[2] = seg25(runs[1].en().xy(), target.xy(), z);

        // Stop at the first tiny run.
        let hw = self.default_trace_width() * 0.5;
        let t = self.new_track(source)?;
        for s in runs {
            if s.length2() < min_len2 {
                break;
            }
            if s.length2() > 0.0 {
                t.raw_append(widen(s, hw));
            }
        }
        t.infer_end();
        t.compute_length();
        // Caller must make sure there are no pins at source and target.
        t.autocreate_vias(target)?;
        Ok(())
    }

    /// Pins the endpoints to cell midpoints; only valid before any tracks.
    pub fn force_endpoints_to_grid(
        &mut self,
        snap: impl Fn(Pt25) -> Pt25,
    ) -> Result<()> {
        if self.has_tracks() {
            return invariant_err("cannot change endpoints when tracks are present");
        }
        self.source = snap(self.source);
        self.target = snap(self.target);
        Ok(())
    }

    pub fn num_necessary_vias(&self, src_pin: Option<&Pin>, dst_pin: Option<&Pin>) -> u32 {
        if self.source.z == self.target.z {
            return 0;
        }
        match (src_pin, dst_pin) {
            (Some(s), Some(d)) => u32::from(!s.shares_layer(d)),
            (Some(s), None) => u32::from(!s.is_on_layer(self.target.z)),
            (None, Some(d)) => u32::from(!d.is_on_layer(self.source.z)),
            (None, None) => 1,
        }
    }

    /// Pairs of disconnected track endpoints, nearest pairs first, each
    /// point used at most once. The unrouted connection's rat is the
    /// source-target segment itself.
    pub fn rats_nest(&self) -> Vec<(Pt25, Pt25)> {
        if !self.has_tracks() {
            return vec![(self.source, self.target)];
        }
        struct Rat {
            a: Pt25,
            b: Pt25,
            d2: f64,
        }
        let mut rats: Vec<Rat> = Vec::new();
        let mut loose_source = true;
        let mut loose_target = true;
        for t1 in &self.tracks {
            if pt_eq(t1.start().xy(), self.source.xy()) || pt_eq(t1.end().xy(), self.source.xy()) {
                loose_source = false;
            }
            if pt_eq(t1.start().xy(), self.target.xy()) || pt_eq(t1.end().xy(), self.target.xy()) {
                loose_target = false;
            }
            for t2 in &self.tracks {
                if std::ptr::eq(t1, t2) {
                    continue;
                }
                for (a, b) in [
                    (t1.start(), t2.start()),
                    (t1.start(), t2.end()),
                    (t2.start(), t1.end()),
                    (t1.end(), t2.end()),
                ] {
                    rats.push(Rat { a, b, d2: a.xy().dist2(b.xy()) });
                }
            }
        }
        if loose_source || loose_target {
            for t in &self.tracks {
                if loose_source {
                    rats.push(Rat {
                        a: self.source,
                        b: t.start(),
                        d2: self.source.xy().dist2(t.start().xy()),
                    });
                    rats.push(Rat {
                        a: self.source,
                        b: t.end(),
                        d2: self.source.xy().dist2(t.end().xy()),
                    });
                }
                if loose_target {
                    rats.push(Rat {
                        a: self.target,
                        b: t.start(),
                        d2: self.target.xy().dist2(t.start().xy()),
                    });
                    rats.push(Rat {
                        a: self.target,
                        b: t.end(),
                        d2: self.target.xy().dist2(t.end().xy()),
                    });
                }
            }
        }
        rats.sort_by(|p, q| crate::model::geom::math::f64_cmp(&p.d2, &q.d2));
        let mut connected = BTreeSet::new();
        let mut out = Vec::new();
        for rat in &rats {
            if connected.insert(rat.a.key()) && connected.insert(rat.b.key()) && rat.d2 > 0.0 {
                out.push((rat.a, rat.b));
            }
        }
        out
    }

    /// Update the layer mask; endpoints landing on a masked layer move to
    /// their pin's first legal layer, or the change is rejected.
    pub fn set_layer_mask(
        &mut self,
        mask: u32,
        src_pin: Option<&Pin>,
        dst_pin: Option<&Pin>,
    ) -> Result<()> {
        self.layer_mask = mask;
        self.update_endpoint_for_layer_mask(false, src_pin)?;
        self.update_endpoint_for_layer_mask(true, dst_pin)?;
        Ok(())
    }

    fn update_endpoint_for_layer_mask(&mut self, target: bool, pin: Option<&Pin>) -> Result<()> {
        let v = if target { self.target } else { self.source };
        if self.can_route_on_layer(v.z) {
            return Ok(());
        }
        if let Some(p) = pin {
            if let Some(z1) = p.start_layer_for(self.layer_mask) {
                if z1 != v.z {
                    debug!("layer mask: moved connection endpoint from z{} to z{}", v.z, z1);
                    let moved = v.with_z(z1);
                    if target {
                        self.target = moved;
                    } else {
                        self.source = moved;
                    }
                }
                if self.can_route_on_layer(z1) {
                    return Ok(());
                }
            }
        }
        Err(RouteError::Rule { legal_area: true, legal_rules: false })
    }
}

fn widen(s: Seg25, hw: f64) -> crate::model::primitive::segment::WideSeg25 {
    wseg25(s.st().xy(), s.en().xy(), s.z(), hw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::primitive::{pt25, shape::Shape, circ, pt};

    fn conn(src: Pt25, dst: Pt25) -> Connection {
        let mut x = Connection::new(src, None, dst, None);
        x.set_rules_default(DesignRules::new(0.0, 1.0, 1.0));
        x
    }

    fn pin_at(x: f64, y: f64, zmin: i32, zmax: i32) -> Pin {
        Pin {
            name: "1".to_owned(),
            shape: Shape::Circle(circ(pt(x, y), 0.5)),
            center: pt(x, y),
            zmin,
            zmax,
            clearance: 0.0,
            net: None,
            can_route_inside: false,
        }
    }

    #[test]
    fn test_direct_track45_bend_at_source() {
        let mut x = conn(pt25(0.0, 0.0, 0), pt25(5.0, 2.0, 0));
        x.make_direct_track45(1e-12, 3, 1.0).unwrap();
        // Bend at 1.0: straight run first, then diagonal.
        let t = x.track(0);
        assert_eq!(t.num_segments(), 2);
        assert_eq!(t.segments()[0].en2(), pt(3.0, 0.0));
        assert_eq!(t.end(), pt25(5.0, 2.0, 0));
        assert!(t.has_valid_ends());
        assert!(t.is_contiguous());
    }

    #[test]
    fn test_direct_track_with_via() {
        let mut x = conn(pt25(0.0, 0.0, 0), pt25(4.0, 0.0, 1));
        x.make_direct_track(1e-12, 0).unwrap();
        let t = x.track(0);
        assert_eq!(t.num_vias(), 1);
        assert_eq!(t.segments()[0].z(), 1);
        assert_eq!(t.end(), pt25(4.0, 0.0, 1));
    }

    #[test]
    fn test_layer_mask_moves_endpoint() {
        // S6: endpoint at z=1 on a pin spanning 0..=2; masking layer 1 out
        // moves the endpoint to the pin's first legal layer, z=0.
        let mut x = conn(pt25(1.0, 1.0, 1), pt25(8.0, 8.0, 0));
        let p = pin_at(1.0, 1.0, 0, 2);
        x.set_layer_mask(0b101, Some(&p), None).unwrap();
        assert_eq!(x.source().z, 0);
    }

    #[test]
    fn test_layer_mask_error_without_pin() {
        let mut x = conn(pt25(1.0, 1.0, 1), pt25(8.0, 8.0, 0));
        assert!(x.set_layer_mask(0b101, None, None).is_err());
    }

    #[test]
    fn test_append_track_merges() {
        let mut x = conn(pt25(0.0, 0.0, 0), pt25(6.0, 0.0, 0));
        let mut a = Track::new(pt25(0.0, 0.0, 0));
        a.set_default_width(1.0);
        a.append_seg(wseg25(pt(0.0, 0.0), pt(3.0, 0.0), 0, 0.5)).unwrap();
        let mut b = Track::new(pt25(3.0, 0.0, 0));
        b.set_default_width(1.0);
        b.append_seg(wseg25(pt(3.0, 0.0), pt(6.0, 0.0), 0, 0.5)).unwrap();
        x.append_track(a, None, None).unwrap();
        assert!(!x.is_routed());
        x.append_track(b, None, None).unwrap();
        assert_eq!(x.num_tracks(), 1);
        assert!(x.is_routed());
    }

    #[test]
    fn test_rats_nest_unrouted() {
        let x = conn(pt25(0.0, 0.0, 0), pt25(6.0, 0.0, 0));
        let rats = x.rats_nest();
        assert_eq!(rats, vec![(pt25(0.0, 0.0, 0), pt25(6.0, 0.0, 0))]);
    }

    #[test]
    fn test_num_necessary_vias() {
        let x = conn(pt25(0.0, 0.0, 0), pt25(6.0, 0.0, 1));
        assert_eq!(x.num_necessary_vias(None, None), 1);
        let p = pin_at(0.0, 0.0, 0, 2);
        assert_eq!(x.num_necessary_vias(Some(&p), None), 0);
        let x2 = conn(pt25(0.0, 0.0, 0), pt25(6.0, 0.0, 0));
        assert_eq!(x2.num_necessary_vias(None, None), 0);
    }
}
