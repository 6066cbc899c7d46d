use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{input_err, invariant_err, Result};
use crate::model::pcb::component::Component;
use crate::model::pcb::connection::Connection;
use crate::model::pcb::layer::Layer;
use crate::model::pcb::net::{LayoutArea, Net, SignalPatterns};
use crate::model::pcb::pin::{Pin, PinRef};
use crate::model::primitive::point::Pt25;
use crate::route::astar::{AstarCosts, RouteSpec};
use crate::route::grid::{NavGrid, NavSpacings};

/// Address of a connection within the board's net arena.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnRef {
    pub net: usize,
    pub conn: usize,
}

impl ConnRef {
    pub const fn new(net: usize, conn: usize) -> Self {
        Self { net, conn }
    }
}

/// The board: layers, layout area, placed components, nets and the
/// navigation grid. Owns everything; nets own their connections, which own
/// their tracks. All grid-and-model mutation funnels through here so the
/// keep-out bookkeeping stays consistent.
#[derive(Debug, Default, Clone)]
pub struct Board {
    pub name: String,
    pub layers: Vec<Layer>,
    pub layout_area: LayoutArea,
    pub components: Vec<Component>,
    pub nets: Vec<Net>,
    pub grid: NavGrid,
    pub costs: AstarCosts,
    pub signal_patterns: SignalPatterns,
    route_guard: Vec<Pt25>,
}

impl Board {
    pub fn new(name: &str, layers: Vec<Layer>, layout_area: LayoutArea) -> Self {
        Self { name: name.to_owned(), layers, layout_area, ..Default::default() }
    }

    pub fn num_layers(&self) -> u32 {
        self.layers.len() as u32
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn pin_ref(&self, r: &PinRef) -> Result<(&Component, &Pin)> {
        let c = self
            .component(&r.component)
            .ok_or_else(|| crate::error::RouteError::Input(format!("unknown component {}", r.component)))?;
        let p = c
            .pin(&r.pin)
            .ok_or_else(|| crate::error::RouteError::Input(format!("unknown pin {r}")))?;
        Ok((c, p))
    }

    pub fn pin(&self, r: &PinRef) -> Result<&Pin> {
        Ok(self.pin_ref(r)?.1)
    }

    pub fn conn(&self, x: ConnRef) -> Result<&Connection> {
        self.nets
            .get(x.net)
            .and_then(|n| n.connections().get(x.conn))
            .ok_or_else(|| crate::error::RouteError::Invariant("dangling connection ref".into()))
    }

    pub fn conn_mut(&mut self, x: ConnRef) -> Result<&mut Connection> {
        self.nets
            .get_mut(x.net)
            .and_then(|n| n.connections_mut().get_mut(x.conn))
            .ok_or_else(|| crate::error::RouteError::Invariant("dangling connection ref".into()))
    }

    pub fn all_conn_refs(&self) -> Vec<ConnRef> {
        let mut v = Vec::new();
        for (ni, net) in self.nets.iter().enumerate() {
            for ci in 0..net.num_connections() {
                v.push(ConnRef::new(ni, ci));
            }
        }
        v
    }

    /// Resolved endpoint pins of a connection, cloned out of the component
    /// arena so callers can hold them across mutation.
    pub fn conn_pins(&self, x: ConnRef) -> Result<(Option<Pin>, Option<Pin>)> {
        let conn = self.conn(x)?;
        let sp = match conn.source_pin() {
            Some(r) => Some(self.pin(r)?.clone()),
            None => None,
        };
        let tp = match conn.target_pin() {
            Some(r) => Some(self.pin(r)?.clone()),
            None => None,
        };
        Ok((sp, tp))
    }

    /// Semantic checks on the board description. With `strict_pins`, pins
    /// whose shapes leave the layout area are rejected.
    pub fn validate(&self, strict_pins: bool) -> Result<()> {
        if self.layers.is_empty() {
            return input_err("board must have at least one layer");
        }
        for (i, l) in self.layers.iter().enumerate() {
            if l.index != i as i32 {
                return input_err("layer indices must be contiguous from zero");
            }
        }
        if self.layout_area.bounds.is_empty()
            || self.layout_area.bounds.w() <= 0.0
            || self.layout_area.bounds.h() <= 0.0
        {
            return input_err("layout area must have a non-empty bounding box");
        }
        for net in &self.nets {
            let r = net.rules();
            if r.clearance < 0.0 || r.trace_width <= 0.0 || r.via_diameter <= 0.0 {
                return Err(crate::error::RouteError::Input(format!(
                    "net {} must have non-negative clearance and positive track dimensions",
                    net.name
                )));
            }
            for p in &net.pins {
                self.pin_ref(p)?;
            }
        }
        for c in &self.components {
            for p in &c.pins {
                if p.zmin > p.zmax || p.zmax >= self.num_layers() as i32 {
                    return Err(crate::error::RouteError::Input(format!(
                        "pin {}.{} has an invalid layer range",
                        c.name, p.name
                    )));
                }
                if strict_pins && !self.layout_area.contains(p.center) {
                    return Err(crate::error::RouteError::Input(format!(
                        "pin {}.{} lies outside the layout area",
                        c.name, p.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Build the navigation grid sized to the layout bounding box, mark all
    /// already-present tracks as rasterized, and prime the spacings from any
    /// routed connection.
    pub fn build_grid(&mut self, edge: f64) -> Result<()> {
        self.grid = NavGrid::build(&self.layout_area, edge, self.num_layers(), &self.components)?;
        for net in &mut self.nets {
            for x in net.connections_mut() {
                for t in x.tracks_mut() {
                    t.add_rasterized(1);
                }
            }
        }
        self.init_spacings_for_any_routed_track()?;
        debug!("nav grid built");
        Ok(())
    }

    pub fn init_spacings_for_any_routed_track(&mut self) -> Result<()> {
        let sp = self.nets.iter().flat_map(Net::connections).find(|x| x.is_routed()).map(
            NavSpacings::from_connection,
        );
        if let Some(sp) = sp {
            self.set_spacings(sp)?;
        }
        Ok(())
    }

    /// Adopt the spacings of the connection about to be routed. A change
    /// re-rasterizes every clearance area.
    pub fn set_spacings(&mut self, sp: NavSpacings) -> Result<bool> {
        if !self.grid.set_spacings_raw(sp) {
            return Ok(false);
        }
        self.rasterize_clearance_areas()?;
        Ok(true)
    }

    /// Rebuild all keep-out counters: non-routable pin pads, rasterized
    /// connection tracks, and the layout-area border.
    pub fn rasterize_clearance_areas(&mut self) -> Result<()> {
        let Self { components, nets, grid, layout_area, .. } = self;
        grid.reset_keepout_counts();
        for c in components.iter() {
            for pin in &c.pins {
                if pin.can_route_inside {
                    continue;
                }
                grid.rasterize_pin_keepout(pin, 1);
            }
        }
        for net in nets.iter() {
            for x in net.connections() {
                if x.is_rasterized_all_or_none()? {
                    grid.rasterize_connection_keepout(x, 1)?;
                }
            }
        }
        grid.rasterize_border_keepout(layout_area, 1);
        Ok(())
    }

    /// Add a connection's tracks to the keep-out state.
    pub fn rasterize_tracks(&mut self, x: ConnRef) -> Result<()> {
        let Self { nets, grid, .. } = self;
        let conn = nets
            .get_mut(x.net)
            .and_then(|n| n.connections_mut().get_mut(x.conn))
            .ok_or_else(|| crate::error::RouteError::Invariant("dangling connection ref".into()))?;
        if conn.is_rasterized_all_or_none()? {
            return invariant_err("connection tracks are already rasterized");
        }
        grid.rasterize_connection_keepout(conn, 1)?;
        for t in conn.tracks_mut() {
            t.add_rasterized(1);
        }
        Ok(())
    }

    /// Remove a connection's tracks from the keep-out state, leaving the
    /// tracks themselves in place.
    pub fn unrasterize_tracks(&mut self, x: ConnRef) -> Result<()> {
        let Self { nets, grid, .. } = self;
        let conn = nets
            .get_mut(x.net)
            .and_then(|n| n.connections_mut().get_mut(x.conn))
            .ok_or_else(|| crate::error::RouteError::Invariant("dangling connection ref".into()))?;
        if !conn.has_tracks() || !conn.is_rasterized_all_or_none()? {
            return Ok(());
        }
        grid.rasterize_connection_keepout(conn, -1)?;
        for t in conn.tracks_mut() {
            t.add_rasterized(-1);
        }
        Ok(())
    }

    /// Unroute: decrement the rasterization and drop the tracks.
    pub fn erase_tracks(&mut self, x: ConnRef) -> Result<()> {
        self.unrasterize_tracks(x)?;
        self.conn_mut(x)?.clear_tracks();
        Ok(())
    }

    /// What the pathfinder needs to know to route this connection.
    pub fn route_spec(&self, x: ConnRef) -> Result<RouteSpec> {
        let conn = self.conn(x)?;
        let net = &self.nets[x.net];
        let (sp, tp) = self.conn_pins(x)?;
        let (source, target) = (conn.source(), conn.target());
        let source_z = sp.as_ref().map_or((source.z, source.z), |p| (p.zmin, p.zmax));
        let target_z = tp.as_ref().map_or((target.z, target.z), |p| (p.zmin, p.zmax));
        Ok(RouteSpec {
            source,
            target,
            source_z,
            target_z,
            source_budget: self.blockage_search_budget(sp.as_ref()),
            source_shape: sp.map(|p| p.shape),
            target_shape: tp.map(|p| p.shape),
            layer_mask: conn.layer_mask() & net.layer_mask(),
            rules: *conn.rules(),
        })
    }

    /// Route spec for a connection that is not stored on the board, e.g. a
    /// temporary point-to-point demand. The connection's own layer mask
    /// applies as-is.
    pub fn route_spec_for(&self, conn: &Connection) -> Result<RouteSpec> {
        let sp = match conn.source_pin() {
            Some(r) => Some(self.pin(r)?.clone()),
            None => None,
        };
        let tp = match conn.target_pin() {
            Some(r) => Some(self.pin(r)?.clone()),
            None => None,
        };
        let (source, target) = (conn.source(), conn.target());
        let source_z = sp.as_ref().map_or((source.z, source.z), |p| (p.zmin, p.zmax));
        let target_z = tp.as_ref().map_or((target.z, target.z), |p| (p.zmin, p.zmax));
        Ok(RouteSpec {
            source,
            target,
            source_z,
            target_z,
            source_budget: self.blockage_search_budget(sp.as_ref()),
            source_shape: sp.map(|p| p.shape),
            target_shape: tp.map(|p| p.shape),
            layer_mask: conn.layer_mask(),
            rules: *conn.rules(),
        })
    }

    /// Node budget for the quick trap-detection pass: scaled to the pin's
    /// footprint in cells.
    fn blockage_search_budget(&self, pin: Option<&Pin>) -> i64 {
        let e = self.grid.geom().edge;
        let Some(pin) = pin else { return 384 };
        let bb = pin.bbox();
        let nx = ((bb.w() + e) / e) as i64;
        let ny = ((bb.h() + e) / e) as i64;
        384.max((nx * ny * 8).min(1024))
    }

    pub fn check_routed(&mut self, x: ConnRef) -> Result<bool> {
        let (sp, tp) = self.conn_pins(x)?;
        Ok(self.conn_mut(x)?.check_routed(sp.as_ref(), tp.as_ref()))
    }

    pub fn force_routed(&mut self, x: ConnRef) -> Result<()> {
        let (sp, tp) = self.conn_pins(x)?;
        self.conn_mut(x)?.force_routed(sp.as_ref(), tp.as_ref())
    }

    pub fn append_track(&mut self, x: ConnRef, t: crate::model::pcb::track::Track) -> Result<()> {
        let (sp, tp) = self.conn_pins(x)?;
        self.conn_mut(x)?.append_track(t, sp.as_ref(), tp.as_ref())
    }

    /// Total grid area (in cells) where the given connection's bare copper
    /// overlaps clearance regions. Zeroes the spacings as a side effect; the
    /// next routing call restores them.
    pub fn sum_violation_area(&mut self, y: &Connection) -> Result<f64> {
        self.set_spacings(NavSpacings::default())?;
        Ok(self.grid.count_violation_cells(y) as f64)
    }

    /// A temporary connection between two points, inheriting the original's
    /// rules, mask, and whichever endpoint pins contain the new points.
    pub fn derive_connection(&self, x: ConnRef, p0: Pt25, p1: Pt25) -> Result<Connection> {
        if p0 == p1 {
            return invariant_err("connection endpoints are the same");
        }
        let conn = self.conn(x)?;
        let mut spin = None;
        let mut tpin = None;
        if let Some(r) = conn.source_pin() {
            let p = self.pin(r)?;
            if p.contains_3d(p0) {
                spin = Some(r.clone());
            } else if p.contains_3d(p1) {
                tpin = Some(r.clone());
            }
        }
        if let Some(r) = conn.target_pin() {
            let p = self.pin(r)?;
            if tpin.is_none() && p.contains_3d(p1) {
                tpin = Some(r.clone());
            } else if spin.is_none() && p.contains_3d(p0) {
                spin = Some(r.clone());
            }
        }
        let mut y = Connection::new(p0, spin, p1, tpin);
        y.set_parameters_from(conn);
        Ok(y)
    }

    /// Update a net's layer mask and cascade to its connections, moving
    /// pinned endpoints to their pin's first remaining legal layer.
    pub fn set_layer_mask(&mut self, net: usize, mask: u32) -> Result<()> {
        if net >= self.nets.len() {
            return invariant_err("unknown net index");
        }
        let refs: Vec<ConnRef> =
            (0..self.nets[net].num_connections()).map(|i| ConnRef::new(net, i)).collect();
        self.nets[net].set_raw_layer_mask(mask);
        for x in refs {
            let (sp, tp) = self.conn_pins(x)?;
            self.conn_mut(x)?.set_layer_mask(mask, sp.as_ref(), tp.as_ref())?;
        }
        Ok(())
    }

    /// Pin all unrouted connection endpoints to cell midpoints so endpoint
    /// comparisons are exact.
    pub fn force_connections_to_grid(&mut self) -> Result<()> {
        let geom = *self.grid.geom();
        for net in &mut self.nets {
            for x in net.connections_mut() {
                if !x.has_tracks() {
                    x.force_endpoints_to_grid(|v| geom.snap_to_mid(v))?;
                }
            }
        }
        Ok(())
    }

    /// Create connections for every net that has pins but no connections.
    pub fn autocreate_connections(&mut self) -> Result<()> {
        let Self { components, nets, .. } = self;
        for net in nets.iter_mut() {
            if net.num_connections() > 0 || net.pins.len() < 2 {
                continue;
            }
            let mut pins = Vec::with_capacity(net.pins.len());
            for r in &net.pins {
                let c = components
                    .iter()
                    .find(|c| c.name == r.component)
                    .ok_or_else(|| crate::error::RouteError::Input(format!("unknown component {}", r.component)))?;
                let p = c
                    .pin(&r.pin)
                    .ok_or_else(|| crate::error::RouteError::Input(format!("unknown pin {r}")))?;
                pins.push((r.clone(), p.clone()));
            }
            net.autocreate_connections(&pins)?;
        }
        Ok(())
    }

    /// Replace the route guard polyline; guarded cells get the given cost.
    pub fn set_route_guard(&mut self, path: Option<&[Pt25]>, guard_cost: f32) {
        if !self.route_guard.is_empty() {
            let old = std::mem::take(&mut self.route_guard);
            self.grid.rasterize_guard(&old, false, 1.0);
        }
        if let Some(path) = path {
            self.route_guard = path.to_vec();
            self.grid.rasterize_guard(path, true, guard_cost);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::pcb::rules::DesignRules;
    use crate::model::primitive::{circ, pt, pt25};
    use crate::model::primitive::shape::Shape;
    use crate::testutil::{board_base, finish_board};

    fn pinned_component(name: &str, x: f64, y: f64, zmin: i32, zmax: i32) -> Component {
        Component {
            name: name.to_owned(),
            ref_point: pt(x, y),
            layer: 0,
            angle_deg: 0.0,
            footprint: Shape::Rect(crate::model::primitive::rt(x - 1.0, y - 1.0, x + 1.0, y + 1.0)),
            clearance: 0.0,
            can_route_inside: true,
            can_place_vias_inside: true,
            pins: vec![Pin {
                name: "1".to_owned(),
                shape: Shape::Circle(circ(pt(x, y), 0.4)),
                center: pt(x, y),
                zmin,
                zmax,
                clearance: 0.0,
                net: Some(0),
                can_route_inside: false,
            }],
        }
    }

    fn pinned_board() -> (Board, ConnRef) {
        let mut board = board_base(12.0, 12.0, 3);
        board.components.push(pinned_component("U1", 1.5, 1.5, 0, 2));
        board.components.push(pinned_component("U2", 10.5, 10.5, 0, 2));
        let mut net = Net::new("N1");
        net.set_rules(DesignRules::new(0.0, 1.0, 1.0));
        net.insert_pin(PinRef::new("U1", "1"));
        net.insert_pin(PinRef::new("U2", "1"));
        net.add_connection(
            Some(PinRef::new("U1", "1")),
            pt25(1.5, 1.5, 1),
            Some(PinRef::new("U2", "1")),
            pt25(10.5, 10.5, 0),
        )
        .unwrap();
        board.nets.push(net);
        let board = finish_board(board, 1.0);
        (board, ConnRef::new(0, 0))
    }

    #[test]
    fn test_pin_resolution() {
        let (board, x) = pinned_board();
        let (c, p) = board.pin_ref(&PinRef::new("U1", "1")).unwrap();
        assert_eq!(c.name, "U1");
        assert_eq!(p.name, "1");
        assert!(board.pin_ref(&PinRef::new("U9", "1")).is_err());
        let (sp, tp) = board.conn_pins(x).unwrap();
        assert!(sp.is_some() && tp.is_some());
    }

    #[test]
    fn test_layer_mask_moves_pinned_endpoint() {
        // The source endpoint starts at z=1; masking layer 1 out moves it to
        // the pin's first remaining legal layer, z=0, without error.
        let (mut board, x) = pinned_board();
        board.set_layer_mask(0, 0b101).unwrap();
        assert_eq!(board.conn(x).unwrap().source().z, 0);
        assert_eq!(board.nets[0].layer_mask(), 0b101);
        assert_eq!(board.conn(x).unwrap().layer_mask(), 0b101);
    }

    #[test]
    fn test_validate_rejects_bad_boards() {
        let (mut board, _) = pinned_board();
        assert!(board.validate(false).is_ok());
        board.nets[0].set_rules(DesignRules::new(-1.0, 1.0, 1.0));
        assert!(matches!(board.validate(false), Err(crate::error::RouteError::Input(_))));

        let (mut board, _) = pinned_board();
        board.components[0].pins[0].zmax = 99;
        assert!(board.validate(false).is_err());
    }

    #[test]
    fn test_route_spec_uses_pin_ranges() {
        let (board, x) = pinned_board();
        let spec = board.route_spec(x).unwrap();
        assert_eq!(spec.source_z, (0, 2));
        assert_eq!(spec.target_z, (0, 2));
        assert!(spec.source_shape.is_some());
        assert!(spec.source_budget >= 384);
    }

    #[test]
    fn test_routed_pinned_connection() {
        let (mut board, x) = pinned_board();
        let ok = crate::route::actions::astar_connect(
            &mut board,
            x,
            None,
            crate::route::astar::SearchCtl::default(),
        )
        .unwrap();
        assert!(ok);
        let conn = board.conn(x).unwrap();
        assert!(conn.is_routed());
        assert!(conn.track(0).has_valid_ends());
        assert!(conn.track(0).is_contiguous());
    }
}
