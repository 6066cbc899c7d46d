use log::debug;
use petgraph::unionfind::UnionFind;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{input_err, invariant_err, Result};
use crate::model::geom::math::{f64_cmp, squared};
use crate::model::pcb::connection::Connection;
use crate::model::pcb::layer::{Layer, SignalKind, SignalType};
use crate::model::pcb::pin::{Pin, PinRef};
use crate::model::pcb::rules::DesignRules;
use crate::model::pcb::track::Track;
use crate::model::primitive::point::Pt25;
use crate::model::primitive::rect::Rt;
use crate::model::primitive::shape::Shape;

/// Name patterns for inferring a net's signal type. Tunable configuration,
/// matched case-insensitively against the lowercased net name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalPatterns {
    pub ground: Vec<String>,
    pub power: Vec<String>,
}

impl Default for SignalPatterns {
    fn default() -> Self {
        Self {
            ground: vec!["^gnd$".into(), "^gnda$".into()],
            power: vec![
                "^vin$".into(),
                "vcc".into(),
                r"^\+\d+(\.\d+)?v.*".into(),
                r"^/?\d+(\.\d+)?v_.*".into(),
            ],
        }
    }
}

impl SignalPatterns {
    pub fn classify(&self, name: &str) -> Result<SignalType> {
        let name = name.to_lowercase();
        for p in &self.ground {
            let re = Regex::new(p).map_err(|e| {
                crate::error::RouteError::Input(format!("invalid signal pattern {p}: {e}"))
            })?;
            if re.is_match(&name) {
                return Ok(SignalKind::Ground.into());
            }
        }
        for p in &self.power {
            let re = Regex::new(p).map_err(|e| {
                crate::error::RouteError::Input(format!("invalid signal pattern {p}: {e}"))
            })?;
            if re.is_match(&name) {
                return Ok(SignalKind::Power.into());
            }
        }
        Ok(SignalKind::Signal.into())
    }
}

/// Routable region of the board: the grid covers its bounding box, and a
/// polygonal outline may further restrict it.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutArea {
    pub bounds: Rt,
    pub poly: Option<crate::model::primitive::polygon::Poly>,
}

impl LayoutArea {
    pub fn rect(bounds: Rt) -> Self {
        Self { bounds, poly: None }
    }

    pub fn contains(&self, p: crate::model::primitive::point::Pt) -> bool {
        self.bounds.contains(p) && self.poly.as_ref().map_or(true, |g| g.contains(p))
    }

    pub fn contains_25(&self, p: Pt25) -> bool {
        self.contains(p.xy())
    }
}

/// Bitmask result of validating a track against net rules (`legal_rules`)
/// and the layout area (`legal_area`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TrackValidity {
    pub legal_area: bool,
    pub legal_rules: bool,
}

impl TrackValidity {
    pub fn ok(&self) -> bool {
        self.legal_area && self.legal_rules
    }
}

/// A set of pins that must be electrically connected, together with the
/// two-terminal connections chosen to realize it. The net owns its
/// connections; pins are referenced by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Net {
    pub id: u32,
    pub name: String,
    pub signal: SignalType,
    pub pins: Vec<PinRef>,
    connections: Vec<Connection>,
    rules: DesignRules,
    layer_mask: u32,
}

impl Net {
    pub fn new(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_owned(),
            signal: SignalKind::Signal.into(),
            pins: Vec::new(),
            connections: Vec::new(),
            rules: DesignRules::default(),
            layer_mask: u32::MAX,
        }
    }

    pub fn rules(&self) -> &DesignRules {
        &self.rules
    }

    pub fn min_trace_width(&self) -> f64 {
        self.rules.trace_width
    }

    pub fn min_clearance(&self) -> f64 {
        self.rules.clearance
    }

    pub fn via_diameter(&self) -> f64 {
        self.rules.via_diameter
    }

    pub fn layer_mask(&self) -> u32 {
        self.layer_mask
    }

    pub fn set_raw_layer_mask(&mut self, m: u32) {
        self.layer_mask = m;
    }

    pub fn is_ground_or_power(&self) -> bool {
        !self.signal.is_disjoint(SignalKind::Power | SignalKind::Ground)
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn connections_mut(&mut self) -> &mut [Connection] {
        &mut self.connections
    }

    pub fn connection(&self, i: usize) -> &Connection {
        &self.connections[i]
    }

    pub fn connection_mut(&mut self, i: usize) -> &mut Connection {
        &mut self.connections[i]
    }

    pub fn num_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn contains_pin(&self, p: &PinRef) -> bool {
        self.pins.contains(p)
    }

    pub fn insert_pin(&mut self, p: PinRef) {
        if !self.pins.contains(&p) {
            self.pins.push(p);
        }
    }

    /// Set the net id; connection ids become `(net id << 16) | (index + 1)`.
    pub fn set_id(&mut self, id: u32) -> Result<()> {
        if id > 0x7fff {
            return invariant_err("net id must be <= 0x7fff");
        }
        self.id = id;
        for (i, x) in self.connections.iter_mut().enumerate() {
            x.id = ((id << 16) | (i as u32 + 1)) as i32;
        }
        Ok(())
    }

    pub fn set_rules(&mut self, rules: DesignRules) {
        self.rules = rules;
        for x in &mut self.connections {
            x.set_rules_min(&rules);
        }
    }

    pub fn set_rules_min(&mut self, rules: &DesignRules) {
        self.rules = self.rules.max(rules);
        for x in &mut self.connections {
            x.set_rules_min(rules);
        }
    }

    /// Layers whose type overlaps the net's signal type.
    pub fn layer_mask_from_signal_type(&self, layers: &[Layer]) -> u32 {
        let mut mask = 0;
        for l in layers {
            if l.has_type(self.signal) && (0..32).contains(&l.index) {
                mask |= 1 << l.index;
            }
        }
        mask
    }

    /// Check a track against the net's rules and the layout area.
    pub fn validate_track(&self, t: &Track, layout: &LayoutArea) -> TrackValidity {
        let mut v = TrackValidity { legal_area: true, legal_rules: true };
        for s in t.segments() {
            if v.legal_area && !(layout.contains(s.st2()) && layout.contains(s.en2())) {
                v.legal_area = false;
            }
            if v.legal_rules {
                let legal_layer = (0..32).contains(&s.z()) && self.layer_mask & (1 << s.z()) != 0;
                if !legal_layer || s.width() < self.min_trace_width() {
                    v.legal_rules = false;
                }
            }
            if !v.legal_area && !v.legal_rules {
                return v;
            }
        }
        for via in t.vias() {
            if v.legal_area && !layout.contains(via.location()) {
                v.legal_area = false;
            }
            if v.legal_rules {
                let zs_ok = [via.zmin(), via.zmax()]
                    .iter()
                    .all(|&z| (0..32).contains(&z) && self.layer_mask & (1 << z) != 0);
                if !zs_ok || via.diameter() < self.via_diameter() {
                    v.legal_rules = false;
                }
            }
            if !v.legal_area && !v.legal_rules {
                return v;
            }
        }
        v
    }

    pub fn add_connection(
        &mut self,
        source_pin: Option<PinRef>,
        source: Pt25,
        target_pin: Option<PinRef>,
        target: Pt25,
    ) -> Result<&mut Connection> {
        for p in [&source_pin, &target_pin].into_iter().flatten() {
            if !self.contains_pin(p) {
                return invariant_err("pin for new connection not part of the net");
            }
        }
        if self.min_clearance() < 0.0 || self.via_diameter() <= 0.0 || self.min_trace_width() <= 0.0
        {
            return input_err("connection must have positive track dimensions");
        }
        let mut x = Connection::new(source, source_pin, target, target_pin);
        x.id = ((self.id << 16) | (self.connections.len() as u32 + 1)) as i32;
        x.set_rules_default(self.rules);
        // Layer-mask endpoint fixes happen at the board level where pins
        // resolve; a fresh connection takes the raw mask.
        let _ = x.set_layer_mask(self.layer_mask, None, None);
        self.connections.push(x);
        Ok(self.connections.last_mut().unwrap())
    }

    pub fn connection_between(&self, a: &PinRef, b: &PinRef) -> Option<usize> {
        self.connections.iter().position(|x| {
            (x.source_pin() == Some(a) && x.target_pin() == Some(b))
                || (x.source_pin() == Some(b) && x.target_pin() == Some(a))
        })
    }

    /// Create two-pin connections joining all of the net's pins with a
    /// minimum spanning tree (Kruskal). Pin groups already linked by
    /// existing connections, overlapping pads, or track geometry are merged
    /// before the tree edges are chosen. `pins` resolves `self.pins` in
    /// order.
    pub fn autocreate_connections(&mut self, pins: &[(PinRef, Pin)]) -> Result<()> {
        debug!("autoconnecting net {} with {} pins", self.name, pins.len());
        let n = pins.len();
        if n < 2 {
            return Ok(());
        }
        let mut uf: UnionFind<usize> = UnionFind::new(n);
        let index_of = |r: &PinRef| pins.iter().position(|(pr, _)| pr == r);

        // Existing connections join their endpoint pins.
        for x in &self.connections {
            if let (Some(a), Some(b)) = (x.source_pin(), x.target_pin()) {
                if let (Some(i), Some(j)) = (index_of(a), index_of(b)) {
                    uf.union(i, j);
                }
            }
            // Track geometry joins any pin it touches to the connection's pins.
            let anchor = x.source_pin().or(x.target_pin()).and_then(|r| index_of(r));
            if let Some(ai) = anchor {
                for t in x.tracks() {
                    for (i, (_, p)) in pins.iter().enumerate() {
                        let seg_touch = t.segments().iter().any(|s| {
                            p.is_on_layer(s.z()) && p.shape.intersects(&Shape::Seg(*s))
                        });
                        let via_touch = t.vias().iter().any(|v| {
                            crate::model::pcb::layer::ranges_overlap(
                                v.zmin(),
                                v.zmax(),
                                p.zmin,
                                p.zmax,
                            ) && p.shape.intersects(&Shape::Circle(v.circle()))
                        });
                        if seg_touch || via_touch {
                            uf.union(ai, i);
                        }
                    }
                }
            }
        }

        // Overlapping pads are electrically one node.
        for i in 0..n {
            for j in (i + 1)..n {
                if pins[i].1.intersects(&pins[j].1) {
                    uf.union(i, j);
                }
            }
        }

        // Kruskal: all cross-group pairs by squared shape distance, with a
        // penalty when the pins share no layer (a via will be needed).
        let mut pairs = Vec::new();
        for i in 0..n {
            for j in (i + 1)..n {
                if uf.find(i) == uf.find(j) {
                    continue;
                }
                let mut d2 = pins[i].1.shape.dist(&pins[j].1.shape).powi(2);
                if !pins[i].1.shares_layer(&pins[j].1) {
                    d2 = squared(d2.sqrt() + 4.0 * self.via_diameter());
                }
                pairs.push((d2, i, j));
            }
        }
        pairs.sort_by(|a, b| f64_cmp(&a.0, &b.0));

        for (_, i, j) in pairs {
            if uf.find(i) == uf.find(j) {
                continue;
            }
            if !pins[i].1.intersects(&pins[j].1) {
                let (ri, pi) = &pins[i];
                let (rj, pj) = &pins[j];
                let x = self.add_connection(
                    Some(ri.clone()),
                    pi.center25(),
                    Some(rj.clone()),
                    pj.center25(),
                )?;
                if !x.is_ordered_x_major() {
                    x.reverse();
                }
            }
            uf.union(i, j);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::primitive::{circ, pt, pt25};

    fn pin(name: &str, x: f64, y: f64) -> (PinRef, Pin) {
        (
            PinRef::new("U1", name),
            Pin {
                name: name.to_owned(),
                shape: Shape::Circle(circ(pt(x, y), 0.5)),
                center: pt(x, y),
                zmin: 0,
                zmax: 0,
                clearance: 0.0,
                net: Some(0),
                can_route_inside: false,
            },
        )
    }

    #[test]
    fn test_signal_patterns() {
        let p = SignalPatterns::default();
        assert_eq!(p.classify("GND").unwrap(), SignalType::from(SignalKind::Ground));
        assert_eq!(p.classify("VCC3").unwrap(), SignalType::from(SignalKind::Power));
        assert_eq!(p.classify("+3V3").unwrap(), SignalType::from(SignalKind::Power));
        assert_eq!(p.classify("DATA0").unwrap(), SignalType::from(SignalKind::Signal));
    }

    #[test]
    fn test_autocreate_is_spanning_tree() {
        let mut net = Net::new("N1");
        net.set_rules(DesignRules::new(0.1, 0.5, 0.8));
        let pins = vec![pin("1", 0.0, 0.0), pin("2", 10.0, 0.0), pin("3", 0.0, 3.0)];
        for (r, _) in &pins {
            net.insert_pin(r.clone());
        }
        net.autocreate_connections(&pins).unwrap();
        // Spanning tree of 3 pins: 2 connections, nearest pair joined first.
        assert_eq!(net.num_connections(), 2);
        let x = net.connection(0);
        assert_eq!(x.source(), pt25(0.0, 0.0, 0));
        assert_eq!(x.target(), pt25(0.0, 3.0, 0));
    }

    #[test]
    fn test_validate_track() {
        let mut net = Net::new("N1");
        net.set_rules(DesignRules::new(0.1, 1.0, 1.0));
        net.set_raw_layer_mask(0b1);
        let layout = LayoutArea::rect(Rt::new(0.0, 0.0, 10.0, 10.0));

        let mut t = Track::new(pt25(1.0, 1.0, 0));
        t.set_default_width(1.0);
        t.append_seg(crate::model::primitive::wseg25(pt(1.0, 1.0), pt(5.0, 1.0), 0, 0.5)).unwrap();
        assert!(net.validate_track(&t, &layout).ok());

        // Too narrow.
        let mut narrow = Track::new(pt25(1.0, 1.0, 0));
        narrow.append_seg(crate::model::primitive::wseg25(pt(1.0, 1.0), pt(5.0, 1.0), 0, 0.2)).unwrap();
        let v = net.validate_track(&narrow, &layout);
        assert!(v.legal_area && !v.legal_rules);

        // Off the board.
        let mut outside = Track::new(pt25(1.0, 1.0, 0));
        outside.set_default_width(1.0);
        outside
            .append_seg(crate::model::primitive::wseg25(pt(1.0, 1.0), pt(15.0, 1.0), 0, 0.5))
            .unwrap();
        let v = net.validate_track(&outside, &layout);
        assert!(!v.legal_area && v.legal_rules);

        // Masked layer.
        let mut masked = Track::new(pt25(1.0, 1.0, 1));
        masked.set_default_width(1.0);
        masked
            .append_seg(crate::model::primitive::wseg25(pt(1.0, 1.0), pt(5.0, 1.0), 1, 0.5))
            .unwrap();
        let v = net.validate_track(&masked, &layout);
        assert!(!v.legal_rules);
    }
}
