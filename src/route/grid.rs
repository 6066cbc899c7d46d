use enumset::{enum_set, EnumSet, EnumSetType};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{input_err, Result};
use crate::model::pcb::component::Component;
use crate::model::pcb::connection::Connection;
use crate::model::pcb::net::LayoutArea;
use crate::model::pcb::pin::Pin;
use crate::model::pcb::rules::DesignRules;
use crate::model::pcb::track::Track;
use crate::model::primitive::point::{Pt, Pt25};
use crate::model::primitive::rect::Rt;
use crate::model::primitive::shape::Shape;
use crate::route::dir::{Dir, DirSet, DIRS, HEND, VEND};
use crate::route::raster::{RasterOp, Rasterizer, RASTER_SEGMENTS_WITH_CAPS, RASTER_VIAS};

/// Per-cell state flags.
#[derive(EnumSetType, Debug, Hash)]
pub enum NavFlag {
    BlockedTemporary,
    NoVias,
    InsidePin,
    InsideComponent,
    PinTrackClearance,
    PinViaClearance,
    RouteTrackClearance,
    RouteViaClearance,
    BlockedPermanent,
    Source,
    Target,
    RouteGuard,
}

pub type NavFlags = EnumSet<NavFlag>;

pub const FLAGS_TRACK_CLEARANCE: NavFlags =
    enum_set!(NavFlag::PinTrackClearance | NavFlag::RouteTrackClearance);
pub const FLAGS_VIA_CLEARANCE: NavFlags =
    enum_set!(NavFlag::PinViaClearance | NavFlag::RouteViaClearance);
pub const FLAGS_CLEARANCE: NavFlags = enum_set!(
    NavFlag::PinTrackClearance
        | NavFlag::RouteTrackClearance
        | NavFlag::PinViaClearance
        | NavFlag::RouteViaClearance
);
/// A cell with any of these set cannot carry a track of the current net.
pub const FLAGS_TRACKS_BLOCKED: NavFlags = enum_set!(
    NavFlag::BlockedPermanent | NavFlag::BlockedTemporary | NavFlag::PinTrackClearance
);
/// A cell with any of these set cannot host a via of the current net.
pub const FLAGS_VIAS_BLOCKED: NavFlags = enum_set!(
    NavFlag::BlockedPermanent
        | NavFlag::BlockedTemporary
        | NavFlag::NoVias
        | NavFlag::PinViaClearance
        | NavFlag::RouteViaClearance
);

/// Keep-out reference counts per cell. Pin/route track and via counters are
/// maintained by the clearance rasterization; the two user counters belong
/// to the rip-up-and-reroute agent (overlap and history cost).
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct KoCounts {
    pub pin_tracks: u16,
    pub pin_vias: u16,
    pub route_tracks: u16,
    pub route_vias: u16,
    pub user: [u16; 2],
}

/// Signed counter deltas applied by one rasterization pass.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct KoDelta {
    pub pin_tracks: i32,
    pub pin_vias: i32,
    pub route_tracks: i32,
    pub route_vias: i32,
}

impl KoDelta {
    pub fn pin(sign: i32, vias: i32) -> Self {
        Self { pin_tracks: sign, pin_vias: vias, ..Default::default() }
    }

    pub fn route(sign: i32, vias: i32) -> Self {
        Self { route_tracks: sign, route_vias: vias, ..Default::default() }
    }

    pub fn route_vias_only(sign: i32) -> Self {
        Self { route_vias: sign, ..Default::default() }
    }

    pub fn pin_vias_only(sign: i32) -> Self {
        Self { pin_vias: sign, ..Default::default() }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Parameters of one rasterization pass over the navigation grid.
#[derive(Debug, Default, Copy, Clone)]
pub struct RasterParams {
    pub flags_or: NavFlags,
    pub flags_clear: NavFlags,
    pub ko: KoDelta,
    pub expansion: f64,
    pub write_seq: u16,
}

fn add_sat(c: u16, d: i32) -> u16 {
    let v = c as i32 + d;
    debug_assert!(v >= 0, "keep-out counter underflow (spacings changed while rasterized?)");
    v.clamp(0, u16::MAX as i32) as u16
}

/// One cell of the navigation grid. Neighbour addresses are computed from
/// grid strides; cells store only a ten-bit edge-availability mask.
#[derive(Debug, Clone, PartialEq)]
pub struct NavPoint {
    pub flags: NavFlags,
    saved: NavFlags,
    pub ko: KoCounts,
    pub cost: f32,
    pub score: f32,
    pub back: Option<Dir>,
    pub edges: DirSet,
    open_seq: u16,
    done_seq: u16,
    write_seq: u16,
    pub x: u16,
    pub y: u16,
    pub z: u16,
}

impl Default for NavPoint {
    fn default() -> Self {
        Self {
            flags: NavFlags::empty(),
            saved: NavFlags::empty(),
            ko: KoCounts::default(),
            cost: 1.0,
            score: 0.0,
            back: None,
            edges: DirSet::empty(),
            open_seq: 0,
            done_seq: 0,
            write_seq: 0,
            x: 0,
            y: 0,
            z: 0,
        }
    }
}

impl NavPoint {
    pub fn has(&self, f: NavFlag) -> bool {
        self.flags.contains(f)
    }

    pub fn has_any(&self, m: NavFlags) -> bool {
        !self.flags.is_disjoint(m)
    }

    pub fn save_flags(&mut self) {
        self.saved = self.flags;
    }

    pub fn restore_flags(&mut self) {
        self.flags = self.saved;
    }

    pub fn can_route(&self, route_mask: NavFlags) -> bool {
        self.flags.is_disjoint(route_mask)
    }

    pub fn can_place_via(&self) -> bool {
        self.flags.is_disjoint(FLAGS_VIAS_BLOCKED)
    }

    pub fn can_add_via(&self, dst: &NavPoint) -> bool {
        dst.can_place_via()
    }

    pub fn can_place_via_ever(&self) -> bool {
        self.flags.is_disjoint(NavFlag::NoVias | NavFlag::BlockedPermanent)
    }

    pub fn layer(&self) -> i32 {
        self.z as i32
    }

    pub fn write_seq(&self) -> u16 {
        self.write_seq
    }

    pub fn set_write_seq(&mut self, s: u16) {
        self.write_seq = s;
    }

    /// Apply one rasterization write; the epoch keeps a single pass from
    /// touching the same cell twice.
    pub fn write(&mut self, params: &RasterParams) {
        if self.write_seq == params.write_seq {
            return;
        }
        self.write_seq = params.write_seq;
        self.flags |= params.flags_or;
        self.flags -= params.flags_clear;
        if !params.ko.is_zero() {
            self.ko.pin_tracks = add_sat(self.ko.pin_tracks, params.ko.pin_tracks);
            self.ko.pin_vias = add_sat(self.ko.pin_vias, params.ko.pin_vias);
            self.ko.route_tracks = add_sat(self.ko.route_tracks, params.ko.route_tracks);
            self.ko.route_vias = add_sat(self.ko.route_vias, params.ko.route_vias);
            self.sync_clearance_flags();
        }
    }

    /// Clearance flags mirror the keep-out counters.
    pub fn sync_clearance_flags(&mut self) {
        for (f, n) in [
            (NavFlag::PinTrackClearance, self.ko.pin_tracks),
            (NavFlag::PinViaClearance, self.ko.pin_vias),
            (NavFlag::RouteTrackClearance, self.ko.route_tracks),
            (NavFlag::RouteViaClearance, self.ko.route_vias),
        ] {
            if n > 0 {
                self.flags |= f;
            } else {
                self.flags -= f;
            }
        }
    }

    pub fn reset_ko(&mut self) {
        self.ko.pin_tracks = 0;
        self.ko.pin_vias = 0;
        self.ko.route_tracks = 0;
        self.ko.route_vias = 0;
        self.sync_clearance_flags();
    }

    // A* visit epochs: a 15-bit sequence with the high bit flagging "open".

    pub fn set_open(&mut self, seq: u16) {
        self.open_seq = seq | 0x8000;
    }

    pub fn is_open(&self, seq: u16) -> bool {
        self.open_seq == (seq | 0x8000)
    }

    pub fn set_done(&mut self, seq: u16) {
        self.open_seq = seq;
        self.done_seq = seq;
    }

    pub fn is_seen(&self, seq: u16) -> bool {
        (self.open_seq & 0x7fff) == seq || self.done_seq == seq
    }

    pub fn reset_visits(&mut self) {
        self.open_seq = 0;
        self.done_seq = 0;
    }
}

/// Integer grid coordinate, used by the cost-map API.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IPt3 {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl IPt3 {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IBox3 {
    pub min: IPt3,
    pub max: IPt3,
}

impl IBox3 {
    pub fn valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    pub fn volume(&self) -> usize {
        ((self.max.x - self.min.x + 1)
            * (self.max.y - self.min.y + 1)
            * (self.max.z - self.min.z + 1)) as usize
    }
}

/// Geometry of the uniform 2.5D grid: world mapping and index math.
/// Cell (i, j, k) has its center at (xmin + (i+0.5)e, ymin + (j+0.5)e, k).
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct GridGeom {
    pub origin: Pt,
    pub edge: f64,
    pub edge05: f64,
    pub size: [u32; 3],
}

impl GridGeom {
    pub fn new(origin: Pt, edge: f64, size: [u32; 3]) -> Self {
        Self { origin, edge, edge05: edge * 0.5, size }
    }

    pub fn num_points(&self) -> usize {
        self.stride_z() * self.size[2] as usize
    }

    pub fn stride_y(&self) -> usize {
        self.size[0] as usize
    }

    pub fn stride_z(&self) -> usize {
        self.size[0] as usize * self.size[1] as usize
    }

    pub fn linear_index(&self, x: u32, y: u32, z: u32) -> usize {
        self.stride_z() * z as usize + self.stride_y() * y as usize + x as usize
    }

    pub fn inside(&self, x: i32, y: i32, z: i32) -> bool {
        x >= 0
            && y >= 0
            && z >= 0
            && (x as u32) < self.size[0]
            && (y as u32) < self.size[1]
            && (z as u32) < self.size[2]
    }

    pub fn xf_index(&self, v: f64, shift: f64) -> f64 {
        ((v + shift - self.origin.x) / self.edge).floor()
    }

    pub fn yf_index(&self, v: f64, shift: f64) -> f64 {
        ((v + shift - self.origin.y) / self.edge).floor()
    }

    pub fn x_index_bounded(&self, v: f64, shift: f64) -> u32 {
        (self.xf_index(v, shift) as i64).clamp(0, self.size[0] as i64 - 1) as u32
    }

    pub fn y_index_bounded(&self, v: f64, shift: f64) -> u32 {
        (self.yf_index(v, shift) as i64).clamp(0, self.size[1] as i64 - 1) as u32
    }

    pub fn mid_x(&self, i: u32) -> f64 {
        self.origin.x + (i as f64 + 0.5) * self.edge
    }

    pub fn mid_y(&self, j: u32) -> f64 {
        self.origin.y + (j as f64 + 0.5) * self.edge
    }

    pub fn cell_center(&self, x: u32, y: u32) -> Pt {
        Pt::new(self.mid_x(x), self.mid_y(y))
    }

    /// Center of the cell containing the point, layer preserved.
    pub fn snap_to_mid(&self, v: Pt25) -> Pt25 {
        let x = self.x_index_bounded(v.x, 0.0);
        let y = self.y_index_bounded(v.y, 0.0);
        Pt25::new(self.mid_x(x), self.mid_y(y), v.z)
    }

    pub fn cell_of(&self, v: Pt, z: i32) -> Option<usize> {
        let x = self.xf_index(v.x, 0.0) as i64;
        let y = self.yf_index(v.y, 0.0) as i64;
        if x < 0 || y < 0 || !self.inside(x as i32, y as i32, z) {
            return None;
        }
        Some(self.linear_index(x as u32, y as u32, z as u32))
    }

    pub fn bbox(&self) -> Rt {
        Rt::new(
            self.origin.x,
            self.origin.y,
            self.origin.x + self.size[0] as f64 * self.edge,
            self.origin.y + self.size[1] as f64 * self.edge,
        )
    }
}

/// Spacing requirements the grid is currently prepared for: the clearance,
/// half track width, and via radius of the net being routed. Obstacles are
/// expanded by `max(clearance, obstacle clearance) + half-width` so a cell
/// is free exactly when a track centered on it violates nothing.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct NavSpacings {
    pub clearance: f64,
    pub track_width_half: f64,
    pub via_radius: f64,
}

impl NavSpacings {
    pub fn from_rules(r: &DesignRules) -> Self {
        Self {
            clearance: r.clearance,
            track_width_half: r.trace_width * 0.5,
            via_radius: r.via_radius(),
        }
    }

    pub fn from_connection(x: &Connection) -> Self {
        Self {
            clearance: x.clearance(),
            track_width_half: 0.5 * x.default_trace_width(),
            via_radius: x.default_via_radius(),
        }
    }

    /// How much to expand an obstacle with the given own clearance so that
    /// illegal track centers are covered.
    pub fn expansion_for_tracks(&self, clearance: f64) -> f64 {
        self.clearance.max(clearance) + self.track_width_half
    }

    pub fn expansion_for_vias(&self, clearance: f64) -> f64 {
        self.clearance.max(clearance) + self.via_radius
    }
}

/// Rasterization write operator targeting the navigation grid cells.
pub struct NavWriteOp<'a> {
    geom: GridGeom,
    points: &'a mut [NavPoint],
    pub params: RasterParams,
}

impl<'a> RasterOp for NavWriteOp<'a> {
    fn write_range(&mut self, z0: u32, z1: u32, y0: u32, y1: u32, x0: u32, x1: u32) {
        if x0 > x1 || y0 > y1 || z0 > z1 {
            return;
        }
        for z in z0..=z1 {
            for y in y0..=y1 {
                let i0 = self.geom.linear_index(x0, y, z);
                let i1 = i0 + (x1 - x0) as usize;
                for p in &mut self.points[i0..=i1] {
                    p.write(&self.params);
                }
            }
        }
    }
}

/// Counts cells whose flags intersect a mask; used for violation areas.
struct CountOp<'a> {
    geom: GridGeom,
    points: &'a [NavPoint],
    mask: NavFlags,
    count: u32,
}

impl<'a> RasterOp for CountOp<'a> {
    fn write_range(&mut self, z0: u32, z1: u32, y0: u32, y1: u32, x0: u32, x1: u32) {
        if x0 > x1 || y0 > y1 || z0 > z1 {
            return;
        }
        for z in z0..=z1 {
            for y in y0..=y1 {
                let i0 = self.geom.linear_index(x0, y, z);
                let i1 = i0 + (x1 - x0) as usize;
                for p in &self.points[i0..=i1] {
                    if !p.flags.is_disjoint(self.mask) {
                        self.count += 1;
                    }
                }
            }
        }
    }
}

/// Saves or restores endpoint cell flags around an A* search.
struct EndpointOp<'a> {
    geom: GridGeom,
    points: &'a mut [NavPoint],
    add: NavFlags,
    clear: NavFlags,
    save: bool,
    restore: bool,
    write_seq: u16,
}

impl<'a> RasterOp for EndpointOp<'a> {
    fn write_range(&mut self, z0: u32, z1: u32, y0: u32, y1: u32, x0: u32, x1: u32) {
        if x0 > x1 || y0 > y1 || z0 > z1 {
            return;
        }
        for z in z0..=z1 {
            for y in y0..=y1 {
                let i0 = self.geom.linear_index(x0, y, z);
                let i1 = i0 + (x1 - x0) as usize;
                for p in &mut self.points[i0..=i1] {
                    if p.write_seq == self.write_seq {
                        continue;
                    }
                    p.set_write_seq(self.write_seq);
                    if self.restore {
                        p.restore_flags();
                    } else {
                        if self.save {
                            p.save_flags();
                        }
                        p.flags |= self.add;
                        p.flags -= self.clear;
                    }
                }
            }
        }
    }
}

/// The 3D navigation grid: a dense vector of cells plus the spacing state
/// and the two epoch counters that avoid O(N) per-operation resets.
#[derive(Debug, Default, Clone)]
pub struct NavGrid {
    geom: GridGeom,
    points: Vec<NavPoint>,
    spacings: NavSpacings,
    search_seq: u16,
    raster_seq: u16,
}

impl NavGrid {
    /// Allocate and prepare the grid: permanent outside-area blocks, then
    /// component/pin footprints, then the precomputed edge masks.
    pub fn build(
        layout: &LayoutArea,
        edge: f64,
        num_layers: u32,
        components: &[Component],
    ) -> Result<NavGrid> {
        if edge <= 0.0 {
            return input_err("grid edge length must be positive");
        }
        let w = (layout.bounds.w() / edge).ceil() as u32;
        let h = (layout.bounds.h() / edge).ceil() as u32;
        if w == 0 || h == 0 || num_layers == 0 {
            return input_err("layout area must have a non-empty bounding box");
        }
        let geom = GridGeom::new(layout.bounds.bl(), edge, [w, h, num_layers]);
        debug!("building nav grid of size {}x{}x{}", w, h, num_layers);

        let mut points = vec![NavPoint::default(); geom.num_points()];
        let mut i = 0;
        for z in 0..num_layers {
            for y in 0..h {
                for x in 0..w {
                    let p = &mut points[i];
                    p.x = x as u16;
                    p.y = y as u16;
                    p.z = z as u16;
                    i += 1;
                }
            }
        }
        // A polygonal layout area blocks cells whose centers fall outside.
        if let Some(poly) = &layout.poly {
            for p in &mut points {
                if poly.has_on_unbounded_side(geom.cell_center(p.x as u32, p.y as u32)) {
                    p.flags |= NavFlag::BlockedPermanent;
                }
            }
        }

        let mut grid = NavGrid { geom, points, ..Default::default() };
        grid.rasterize_footprints(components);
        grid.init_edges();
        Ok(grid)
    }

    pub fn geom(&self) -> &GridGeom {
        &self.geom
    }

    pub fn spacings(&self) -> &NavSpacings {
        &self.spacings
    }

    pub fn points(&self) -> &[NavPoint] {
        &self.points
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn point(&self, i: usize) -> &NavPoint {
        &self.points[i]
    }

    pub fn point_mut(&mut self, i: usize) -> &mut NavPoint {
        &mut self.points[i]
    }

    pub fn points_mut(&mut self) -> &mut [NavPoint] {
        &mut self.points
    }

    /// Geometry plus mutable cells, for write operators owned by callers.
    pub fn split_for_raster(&mut self) -> (GridGeom, &mut [NavPoint]) {
        (self.geom, &mut self.points)
    }

    pub fn point_at(&self, x: u32, y: u32, z: u32) -> &NavPoint {
        &self.points[self.geom.linear_index(x, y, z)]
    }

    pub fn cell_of(&self, v: Pt25) -> Option<usize> {
        self.geom.cell_of(v.xy(), v.z)
    }

    /// World center of a cell.
    pub fn ref_point(&self, i: usize) -> Pt {
        let p = &self.points[i];
        self.geom.cell_center(p.x as u32, p.y as u32)
    }

    pub fn ref_point25(&self, i: usize) -> Pt25 {
        let p = &self.points[i];
        self.geom.cell_center(p.x as u32, p.y as u32).with_z(p.z as i32)
    }

    /// Neighbour index in the given direction, when the edge exists.
    pub fn edge(&self, i: usize, d: Dir) -> Option<usize> {
        if !self.points[i].edges.contains(d) {
            return None;
        }
        Some(self.stride_index(i, d))
    }

    /// Predecessor cell along the back-direction, for path reconstruction.
    pub fn back_index(&self, i: usize) -> Option<usize> {
        self.points[i].back.map(|d| self.stride_index(i, d))
    }

    fn stride_index(&self, i: usize, d: Dir) -> usize {
        let (dx, dy, dz) = d.offset();
        (i as i64
            + dx as i64
            + dy as i64 * self.geom.stride_y() as i64
            + dz as i64 * self.geom.stride_z() as i64) as usize
    }

    // 16-bit monotonic epochs; overflow triggers a one-shot full reset.

    pub fn next_raster_seq(&mut self) -> u16 {
        if self.raster_seq == u16::MAX {
            self.raster_seq = 0;
            for p in &mut self.points {
                p.set_write_seq(0);
            }
        }
        self.raster_seq += 1;
        self.raster_seq
    }

    /// A* sequences use 15 bits; the high bit marks "on the open list".
    pub fn next_search_seq(&mut self) -> u16 {
        if self.search_seq == 0x7fff {
            self.search_seq = 0;
            for p in &mut self.points {
                p.reset_visits();
            }
        }
        self.search_seq += 1;
        self.search_seq
    }

    /// Adopt new spacings. Returns whether they changed, in which case the
    /// caller must re-rasterize all clearance areas.
    pub fn set_spacings_raw(&mut self, mut sp: NavSpacings) -> bool {
        if self.geom.size[2] == 1 {
            sp.via_radius = 0.0; // no vias on single layer boards
        }
        if self.spacings == sp {
            return false;
        }
        debug!(
            "grid spacings changed: clearance {} -> {}, halfwidth {} -> {}, via radius {} -> {}",
            self.spacings.clearance,
            sp.clearance,
            self.spacings.track_width_half,
            sp.track_width_half,
            self.spacings.via_radius,
            sp.via_radius
        );
        self.spacings = sp;
        true
    }

    pub fn reset_keepout_counts(&mut self) {
        for p in &mut self.points {
            p.reset_ko();
        }
    }

    pub fn reset_user_keepout(&mut self, idx: usize) {
        for p in &mut self.points {
            p.ko.user[idx] = 0;
        }
    }

    pub fn reset_user_keepouts(&mut self) {
        for p in &mut self.points {
            p.ko.user = [0, 0];
        }
    }

    fn rasterize_footprints(&mut self, components: &[Component]) {
        for c in components {
            let mut flags: NavFlags = NavFlag::InsideComponent.into();
            if !c.can_route_inside {
                flags |= NavFlag::BlockedTemporary;
            }
            if !c.can_place_vias_inside {
                flags |= NavFlag::NoVias;
            }
            self.rasterize_shape_flags(&c.footprint, c.layer, c.layer, flags, NavFlags::empty());
        }
        for c in components {
            for pin in &c.pins {
                self.rasterize_shape_flags(
                    &pin.shape,
                    pin.zmin,
                    pin.zmax,
                    NavFlag::InsidePin.into(),
                    NavFlag::BlockedTemporary | NavFlag::NoVias,
                );
            }
        }
    }

    /// Precompute each cell's reachable-neighbour mask. Permanently blocked
    /// cells get and grant no edges; vertical edges additionally require
    /// both cells to ever allow vias.
    fn init_edges(&mut self) {
        let geom = self.geom;
        for i in 0..self.points.len() {
            if self.points[i].has(NavFlag::BlockedPermanent) {
                continue;
            }
            let (x, y, z) =
                (self.points[i].x as i32, self.points[i].y as i32, self.points[i].z as i32);
            let dir_end = if self.points[i].can_place_via_ever() { VEND } else { HEND };
            let mut edges = DirSet::empty();
            for d in &DIRS[..dir_end] {
                let (dx, dy, dz) = d.offset();
                if !geom.inside(x + dx, y + dy, z + dz) {
                    continue;
                }
                let n = &self.points[geom.linear_index(
                    (x + dx) as u32,
                    (y + dy) as u32,
                    (z + dz) as u32,
                )];
                if d.is_vertical() && !n.can_place_via_ever() {
                    continue;
                }
                if n.has(NavFlag::BlockedPermanent) {
                    continue;
                }
                edges |= *d;
            }
            self.points[i].edges = edges;
        }
    }

    pub fn rasterize_shape_flags(
        &mut self,
        shape: &Shape,
        z0: i32,
        z1: i32,
        flags_or: NavFlags,
        flags_clear: NavFlags,
    ) {
        let params = RasterParams {
            flags_or,
            flags_clear,
            write_seq: self.next_raster_seq(),
            ..Default::default()
        };
        self.rasterize_shape(shape, z0, z1, params);
    }

    pub fn rasterize_shape(&mut self, shape: &Shape, z0: i32, z1: i32, params: RasterParams) {
        let r = Rasterizer::new(self.geom).with_expansion(params.expansion);
        let mut op = NavWriteOp { geom: self.geom, points: &mut self.points, params };
        r.fill_shape(&mut op, shape, z0, z1);
    }

    /// Keep-out pass for a non-routable pin: its shape dilated for tracks,
    /// and, when the via radius exceeds the half-width, a second pass
    /// dilated for vias.
    pub fn rasterize_pin_keepout(&mut self, pin: &Pin, sign: i32) {
        let two_pass = self.spacings.via_radius > self.spacings.track_width_half;
        let params = RasterParams {
            ko: KoDelta::pin(sign, if two_pass { 0 } else { sign }),
            expansion: self.spacings.expansion_for_tracks(pin.clearance),
            write_seq: self.next_raster_seq(),
            ..Default::default()
        };
        self.rasterize_shape(&pin.shape, pin.zmin, pin.zmax, params);
        if two_pass {
            let params = RasterParams {
                ko: KoDelta::pin_vias_only(sign),
                expansion: self.spacings.expansion_for_vias(pin.clearance),
                write_seq: self.next_raster_seq(),
                ..Default::default()
            };
            self.rasterize_shape(&pin.shape, pin.zmin, pin.zmax, params);
        }
    }

    /// Keep-out passes for a connection's tracks. Vias are rasterized in a
    /// separate write epoch from segments so erasing a via cannot erase
    /// overlapping segment cells.
    pub fn rasterize_connection_keepout(&mut self, x: &Connection, sign: i32) -> Result<()> {
        if !x.has_tracks() {
            return crate::error::invariant_err("tried to rasterize a connection without tracks");
        }
        let two_pass = self.spacings.via_radius > self.spacings.track_width_half;
        let exp_tracks = self.spacings.expansion_for_tracks(x.clearance());
        let exp_vias = self.spacings.expansion_for_vias(x.clearance());
        debug_assert!(exp_tracks >= 0.0);

        let seq = self.next_raster_seq();
        for t in x.tracks() {
            let p1 = RasterParams {
                ko: KoDelta::route(sign, if two_pass { 0 } else { sign }),
                expansion: exp_tracks,
                write_seq: seq,
                ..Default::default()
            };
            self.rasterize_track(t, p1, RASTER_VIAS);
            if two_pass {
                let p2 = RasterParams {
                    ko: KoDelta::route_vias_only(sign),
                    expansion: exp_vias,
                    write_seq: seq,
                    ..Default::default()
                };
                self.rasterize_track(t, p2, RASTER_VIAS);
            }
        }

        let seq = self.next_raster_seq();
        for t in x.tracks() {
            let p1 = RasterParams {
                ko: KoDelta::route(sign, if two_pass { 0 } else { sign }),
                expansion: exp_tracks,
                write_seq: seq,
                ..Default::default()
            };
            self.rasterize_track(t, p1, RASTER_SEGMENTS_WITH_CAPS);
            if two_pass {
                let p2 = RasterParams {
                    ko: KoDelta::route_vias_only(sign),
                    expansion: exp_vias,
                    write_seq: seq,
                    ..Default::default()
                };
                self.rasterize_track(t, p2, RASTER_SEGMENTS_WITH_CAPS);
            }
        }
        Ok(())
    }

    pub fn rasterize_track(&mut self, t: &Track, params: RasterParams, items_mask: u8) {
        let r = Rasterizer::new(self.geom).with_expansion(params.expansion);
        let mut op = NavWriteOp { geom: self.geom, points: &mut self.points, params };
        r.fill_track(&mut op, t, items_mask);
    }

    /// Block the layout-area border so searches cannot leave the board: a
    /// closed-box outline with the usual two-pass via policy.
    pub fn rasterize_border_keepout(&mut self, layout: &LayoutArea, sign: i32) {
        // Copper that exactly touches the border is still inside the layout
        // area, so only a strictly positive overhang blocks anything.
        let ex = self.spacings.track_width_half - 0.5 * self.geom.edge;
        if ex <= 0.0 {
            return;
        }
        let two_pass = self.spacings.via_radius > self.spacings.track_width_half;
        let zmax = self.geom.size[2] as i32 - 1;
        let params = RasterParams {
            ko: KoDelta::pin(sign, if two_pass { 0 } else { sign }),
            expansion: ex,
            write_seq: self.next_raster_seq(),
            ..Default::default()
        };
        let r = Rasterizer::new(self.geom).with_expansion(ex);
        let mut op = NavWriteOp { geom: self.geom, points: &mut self.points, params };
        r.line_rect(&mut op, &layout.bounds, 0, zmax);
        if two_pass {
            let ex2 = self.spacings.via_radius;
            let params = RasterParams {
                ko: KoDelta::pin_vias_only(sign),
                expansion: ex2,
                write_seq: self.next_raster_seq(),
                ..Default::default()
            };
            let r = Rasterizer::new(self.geom).with_expansion(ex2);
            let mut op = NavWriteOp { geom: self.geom, points: &mut self.points, params };
            r.line_rect(&mut op, &layout.bounds, 0, zmax);
        }
    }

    /// Count the cells under the connection's copper that carry clearance
    /// flags; used to gate manually placed segments. Expects the spacings to
    /// have been zeroed so the copper is not self-expanded.
    pub fn count_violation_cells(&mut self, x: &Connection) -> u32 {
        let r = Rasterizer::new(self.geom);
        let mut op = CountOp {
            geom: self.geom,
            points: &self.points,
            mask: FLAGS_VIA_CLEARANCE,
            count: 0,
        };
        for t in x.tracks() {
            for v in t.vias() {
                r.fill_circle(&mut op, &v.circle(), v.zmin(), v.zmax());
            }
        }
        op.mask = FLAGS_TRACK_CLEARANCE;
        for t in x.tracks() {
            let mut z = i32::MIN;
            for s in t.segments() {
                let caps = if s.z() != z { 0x1 } else { 0x0 };
                r.fill_wseg(&mut op, s, caps, s.z(), s.z());
                z = s.z();
            }
        }
        op.count
    }

    /// Mark the endpoint area for an A* search. When the endpoint has a pin,
    /// every cell of the pin's shape across its layer range is marked;
    /// otherwise the single cell under the point. `save` snapshots the flag
    /// state the first time so the search can restore it.
    pub fn mark_endpoint(
        &mut self,
        v: Pt,
        shape: Option<&Shape>,
        z0: i32,
        z1: i32,
        target: bool,
        save: bool,
    ) {
        let set: NavFlags = if target { NavFlag::Target.into() } else { NavFlag::Source.into() };
        let other: NavFlags = if target { NavFlag::Source.into() } else { NavFlag::Target.into() };
        // A multi-layer endpoint is a thru pin where vertical movement is
        // free, so via clearance is lifted as well. Leaving the pin is still
        // gated by the via checks.
        let clearance = if z0 == z1 { FLAGS_TRACK_CLEARANCE } else { FLAGS_CLEARANCE };
        let clear = NavFlag::BlockedTemporary | clearance | other;
        self.endpoint_pass(v, shape, z0, z1, set, clear, save, false);
    }

    pub fn restore_endpoint(&mut self, v: Pt, shape: Option<&Shape>, z0: i32, z1: i32) {
        self.endpoint_pass(v, shape, z0, z1, NavFlags::empty(), NavFlags::empty(), false, true);
    }

    #[allow(clippy::too_many_arguments)]
    fn endpoint_pass(
        &mut self,
        v: Pt,
        shape: Option<&Shape>,
        z0: i32,
        z1: i32,
        add: NavFlags,
        clear: NavFlags,
        save: bool,
        restore: bool,
    ) {
        let seq = self.next_raster_seq();
        let r = Rasterizer::new(self.geom);
        let cell_xy = match shape {
            Some(_) => None,
            None => self
                .geom
                .cell_of(v, z0)
                .map(|i| (self.points[i].x as u32, self.points[i].y as u32)),
        };
        let mut op = EndpointOp {
            geom: self.geom,
            points: &mut self.points,
            add,
            clear,
            save,
            restore,
            write_seq: seq,
        };
        match shape {
            Some(s) => r.fill_shape(&mut op, s, z0, z1),
            None => {
                if let Some((x, y)) = cell_xy {
                    op.write_range(z0 as u32, z1 as u32, y, y, x, x);
                }
            }
        }
    }

    /// Set or clear the route-guard corridor along a 2.5D polyline. Guarded
    /// cells carry the flag and a cost override, which is how the guard
    /// influences the search.
    pub fn rasterize_guard(&mut self, path: &[Pt25], set: bool, guard_cost: f32) {
        let seq = self.next_raster_seq();
        let r = Rasterizer::new(self.geom);
        let params = RasterParams {
            flags_or: if set { NavFlag::RouteGuard.into() } else { NavFlags::empty() },
            flags_clear: if set { NavFlags::empty() } else { NavFlag::RouteGuard.into() },
            write_seq: seq,
            ..Default::default()
        };
        let mut op = NavWriteOp { geom: self.geom, points: &mut self.points, params };
        for w in path.windows(2) {
            if w[0].z != w[1].z {
                continue;
            }
            r.line_seg(&mut op, &crate::model::primitive::seg(w[0].xy(), w[1].xy()), w[0].z, w[0].z);
        }
        let cost = if set { guard_cost } else { 1.0 };
        for p in &mut self.points {
            if p.write_seq() == seq {
                p.cost = cost;
            }
        }
    }

    // Cost map overlays.

    pub fn costs(&self) -> Vec<f32> {
        self.points.iter().map(|p| p.cost).collect()
    }

    pub fn set_costs(&mut self, v: f32) {
        for p in &mut self.points {
            p.cost = v;
        }
    }

    pub fn set_costs_array(&mut self, data: &[f32], base: f32) -> Result<()> {
        if data.len() != self.points.len() {
            return input_err("cost array must match the grid size");
        }
        for (p, &d) in self.points.iter_mut().zip(data) {
            p.cost = base + d;
        }
        Ok(())
    }

    pub fn set_costs_box(&mut self, b: &IBox3, v: f32) -> Result<()> {
        self.check_box(b)?;
        for z in b.min.z..=b.max.z {
            for y in b.min.y..=b.max.y {
                for x in b.min.x..=b.max.x {
                    let i = self.geom.linear_index(x as u32, y as u32, z as u32);
                    self.points[i].cost = v;
                }
            }
        }
        Ok(())
    }

    pub fn set_costs_box_array(&mut self, b: &IBox3, data: &[f32], base: f32) -> Result<()> {
        self.check_box(b)?;
        if data.len() != b.volume() {
            return input_err("cost array must match the bounding box volume");
        }
        let mut i = 0;
        for z in b.min.z..=b.max.z {
            for y in b.min.y..=b.max.y {
                for x in b.min.x..=b.max.x {
                    let k = self.geom.linear_index(x as u32, y as u32, z as u32);
                    self.points[k].cost = base + data[i];
                    i += 1;
                }
            }
        }
        Ok(())
    }

    fn check_box(&self, b: &IBox3) -> Result<()> {
        if !b.valid() {
            return input_err("bounding box must have min <= max");
        }
        if !self.geom.inside(b.min.x, b.min.y, b.min.z)
            || !self.geom.inside(b.max.x, b.max.y, b.max.z)
        {
            return input_err("bounding box exceeds grid");
        }
        Ok(())
    }

    /// Whether a rasterized track's endpoint cells indeed carry route
    /// keep-outs; a cheap consistency probe.
    pub fn check_track_rasterization(&self, t: &Track) -> bool {
        if !t.is_rasterized() {
            return false;
        }
        for v in [t.start(), t.end()] {
            match self.cell_of(v) {
                Some(i) => {
                    if self.points[i].ko.route_tracks < 1 {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }

    /// Observable keep-out state: flags, counters and costs of every cell.
    /// Search scratch fields (score, visit epochs) are excluded.
    pub fn keepout_snapshot(&self) -> Vec<(NavFlags, KoCounts, f32)> {
        self.points.iter().map(|p| (p.flags, p.ko, p.cost)).collect()
    }

    /// Direct cell mutation used by tests and by board-construction code to
    /// model arbitrary blockages.
    pub fn block_cell(&mut self, x: u32, y: u32, z: u32) {
        let i = self.geom.linear_index(x, y, z);
        self.points[i].flags |= NavFlag::BlockedPermanent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::primitive::{pt, pt25, wseg25};
    use crate::testutil::{empty_board, p25, point_net, unit_rules};

    fn track_l_shape() -> crate::model::pcb::track::Track {
        let mut t = crate::model::pcb::track::Track::new(pt25(1.5, 1.5, 0));
        t.set_default_width(1.0);
        t.set_default_via_diameter(1.0);
        t.append_seg(wseg25(pt(1.5, 1.5), pt(5.5, 1.5), 0, 0.5)).unwrap();
        t.append_seg(wseg25(pt(5.5, 1.5), pt(5.5, 4.5), 0, 0.5)).unwrap();
        t.append_via(pt(5.5, 4.5), 0, 1, 0.5).unwrap();
        t.append_seg(wseg25(pt(5.5, 4.5), pt(7.5, 4.5), 1, 0.5)).unwrap();
        t
    }

    #[test]
    fn test_rasterize_erase_symmetry() {
        let mut board = empty_board(10.0, 10.0, 2, 1.0);
        let refs =
            point_net(&mut board, "N1", unit_rules(), &[(p25(1.5, 1.5, 0), p25(7.5, 4.5, 1))]);
        board.conn_mut(refs[0]).unwrap().set_track(track_l_shape());
        let sp = NavSpacings::from_connection(board.conn(refs[0]).unwrap());
        board.set_spacings(sp).unwrap();

        let before = board.grid.keepout_snapshot();
        board.rasterize_tracks(refs[0]).unwrap();
        let during = board.grid.keepout_snapshot();
        assert_ne!(before, during, "rasterization must change keep-out state");
        board.unrasterize_tracks(refs[0]).unwrap();
        assert_eq!(before, board.grid.keepout_snapshot());
    }

    #[test]
    fn test_epoch_isolation_single_increment() {
        // A straight track's body and caps overlap, but one rasterization
        // writes each cell at most once.
        let mut board = empty_board(10.0, 10.0, 1, 1.0);
        let refs =
            point_net(&mut board, "N1", unit_rules(), &[(p25(1.5, 1.5, 0), p25(8.5, 1.5, 0))]);
        let mut t = crate::model::pcb::track::Track::new(pt25(1.5, 1.5, 0));
        t.set_default_width(1.0);
        t.append_seg(wseg25(pt(1.5, 1.5), pt(8.5, 1.5), 0, 0.5)).unwrap();
        board.conn_mut(refs[0]).unwrap().set_track(t);
        let sp = NavSpacings::from_connection(board.conn(refs[0]).unwrap());
        board.set_spacings(sp).unwrap();
        board.rasterize_tracks(refs[0]).unwrap();
        for p in board.grid.points() {
            assert!(p.ko.route_tracks <= 1, "cell written more than once in one pass");
        }
    }

    #[test]
    fn test_via_and_segment_separate_epochs() {
        // Cells under both a via and a segment count twice, so erasing the
        // via cannot free cells the segment still covers.
        let mut board = empty_board(10.0, 10.0, 2, 1.0);
        let refs =
            point_net(&mut board, "N1", unit_rules(), &[(p25(1.5, 1.5, 0), p25(7.5, 4.5, 1))]);
        board.conn_mut(refs[0]).unwrap().set_track(track_l_shape());
        let sp = NavSpacings::from_connection(board.conn(refs[0]).unwrap());
        board.set_spacings(sp).unwrap();
        board.rasterize_tracks(refs[0]).unwrap();
        // The via center cell on layer 0 carries the via count and the
        // segment count.
        let i = board.grid.cell_of(p25(5.5, 4.5, 0)).unwrap();
        assert!(board.grid.point(i).ko.route_tracks >= 2);
        // The via spans both layers.
        let i1 = board.grid.cell_of(p25(5.5, 4.5, 1)).unwrap();
        assert!(board.grid.point(i1).ko.route_tracks >= 1);
    }

    #[test]
    fn test_spacings_change_rebuilds_clearance() {
        let mut board = empty_board(10.0, 10.0, 1, 1.0);
        let refs =
            point_net(&mut board, "N1", unit_rules(), &[(p25(1.5, 1.5, 0), p25(8.5, 1.5, 0))]);
        let mut t = crate::model::pcb::track::Track::new(pt25(1.5, 1.5, 0));
        t.set_default_width(1.0);
        t.append_seg(wseg25(pt(1.5, 1.5), pt(8.5, 1.5), 0, 0.5)).unwrap();
        board.conn_mut(refs[0]).unwrap().set_track(t);
        let sp = NavSpacings::from_connection(board.conn(refs[0]).unwrap());
        board.set_spacings(sp).unwrap();
        board.rasterize_tracks(refs[0]).unwrap();

        // Wider spacings expand the keep-out band around the same track.
        let narrow: usize =
            board.grid.points().iter().filter(|p| p.ko.route_tracks > 0).count();
        let wide_sp = NavSpacings { clearance: 1.0, track_width_half: 0.5, via_radius: 0.5 };
        board.set_spacings(wide_sp).unwrap();
        let wide: usize = board.grid.points().iter().filter(|p| p.ko.route_tracks > 0).count();
        assert!(wide > narrow);

        // And shrinking them restores the original coverage.
        let back_sp = NavSpacings { clearance: 0.0, track_width_half: 0.5, via_radius: 0.0 };
        board.set_spacings(back_sp).unwrap();
        let narrow2: usize =
            board.grid.points().iter().filter(|p| p.ko.route_tracks > 0).count();
        assert_eq!(narrow, narrow2);
    }

    #[test]
    fn test_cost_map_overlays() {
        let mut grid = empty_board(4.0, 4.0, 2, 1.0).grid;
        grid.set_costs(2.0);
        assert!(grid.points().iter().all(|p| p.cost == 2.0));

        let b = IBox3 { min: IPt3::new(1, 1, 0), max: IPt3::new(2, 2, 1) };
        grid.set_costs_box(&b, 5.0).unwrap();
        assert_eq!(grid.point_at(1, 1, 0).cost, 5.0);
        assert_eq!(grid.point_at(2, 2, 1).cost, 5.0);
        assert_eq!(grid.point_at(0, 0, 0).cost, 2.0);

        let bad = IBox3 { min: IPt3::new(0, 0, 0), max: IPt3::new(9, 9, 0) };
        assert!(grid.set_costs_box(&bad, 1.0).is_err());

        let data = vec![0.5f32; grid.num_points()];
        grid.set_costs_array(&data, 1.0).unwrap();
        assert!(grid.points().iter().all(|p| p.cost == 1.5));
    }

    #[test]
    fn test_route_guard_sets_and_clears() {
        let mut board = empty_board(8.0, 8.0, 1, 1.0);
        let path = [p25(0.5, 0.5, 0), p25(5.5, 0.5, 0)];
        board.set_route_guard(Some(&path), 0.25);
        let guarded: Vec<usize> = board
            .grid
            .points()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.has(NavFlag::RouteGuard))
            .map(|(i, _)| i)
            .collect();
        assert!(!guarded.is_empty());
        for &i in &guarded {
            assert_eq!(board.grid.point(i).cost, 0.25);
        }
        board.set_route_guard(None, 0.25);
        assert!(board.grid.points().iter().all(|p| !p.has(NavFlag::RouteGuard)));
        assert!(board.grid.points().iter().all(|p| p.cost == 1.0));
    }

    #[test]
    fn test_endpoint_save_restore() {
        let mut board = empty_board(6.0, 6.0, 1, 1.0);
        let before = board.grid.keepout_snapshot();
        board.grid.mark_endpoint(pt(2.5, 2.5), None, 0, 0, false, true);
        let i = board.grid.cell_of(p25(2.5, 2.5, 0)).unwrap();
        assert!(board.grid.point(i).has(NavFlag::Source));
        board.grid.restore_endpoint(pt(2.5, 2.5), None, 0, 0);
        assert_eq!(before, board.grid.keepout_snapshot());
    }
}
