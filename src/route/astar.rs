use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use log::debug;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RouteError};
use crate::model::geom::math::distance45;
use crate::model::pcb::rules::DesignRules;
use crate::model::pcb::track::Track;
use crate::model::primitive::point::{Pt, Pt25};
use crate::model::primitive::shape::Shape;
use crate::model::primitive::wseg25;
use crate::route::dir::{Dir, DirSet, DIRS, HEND, VEND};
use crate::route::grid::{NavFlag, NavFlags, NavGrid, FLAGS_TRACKS_BLOCKED};
use crate::route::lock::StepLock;

/// Whether diagonal moves may cross a corner whose two orthogonal
/// neighbours are blocked. Keeping this off preserves the no-corner-cutting
/// assumption the planar-optimality tests rely on.
const ASTAR_ALLOW_XOVER: bool = false;

/// How many node pops between deadline polls.
const DEADLINE_POLL_MASK: u64 = 0x3ff;

/// Search cost parameters. `preferred_directions` holds one character per
/// layer: 'x' or 'y' for the cheap axis, '0' for none preferred, anything
/// else for all directions preferred.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstarCosts {
    pub masked_layer: f32,
    pub via: f32,
    pub violation: f32,
    pub turn_per_45: f32,
    pub wrong_direction: f32,
    pub preferred_directions: String,
}

impl Default for AstarCosts {
    fn default() -> Self {
        Self {
            masked_layer: 4.0,
            via: 1.0,
            violation: f32::INFINITY,
            turn_per_45: 1.0 / 1024.0,
            wrong_direction: 1.0,
            preferred_directions: String::new(),
        }
    }
}

impl AstarCosts {
    pub fn set_violation_inf(&mut self) {
        self.violation = f32::INFINITY;
    }

    pub fn valid(&self) -> bool {
        self.masked_layer >= 0.0
            && self.via >= 0.0
            && self.violation >= 1.0
            && self.wrong_direction >= 1.0
    }
}

/// What the pathfinder needs to know about the connection being routed.
/// Layer ranges come from the endpoint pins where present; shapes widen the
/// endpoint marking from a single cell to the whole pad.
#[derive(Debug, Clone)]
pub struct RouteSpec {
    pub source: Pt25,
    pub target: Pt25,
    pub source_z: (i32, i32),
    pub target_z: (i32, i32),
    pub source_shape: Option<Shape>,
    pub target_shape: Option<Shape>,
    pub source_budget: i64,
    pub layer_mask: u32,
    pub rules: DesignRules,
}

/// External controls for a running search: a hard deadline and the optional
/// UI step lock, polled between node pops.
#[derive(Default, Copy, Clone)]
pub struct SearchCtl<'a> {
    pub deadline: Option<Instant>,
    pub step: Option<&'a StepLock>,
}

#[derive(Debug)]
pub struct AstarResult {
    pub track: Track,
    pub violations: Vec<Pt25>,
}

/// Open-list entry. The heuristic is not consistent and costs change
/// dynamically, so a cell can be re-discovered with a better score after
/// being closed; cells are then re-inserted and stale entries are filtered
/// at pop time via the open-epoch check.
#[derive(Copy, Clone, PartialEq, Eq)]
struct NavRef {
    key: OrderedFloat<f32>,
    idx: u32,
}

impl Ord for NavRef {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the binary heap pops the lowest f-score first.
        other.key.cmp(&self.key)
    }
}

impl PartialOrd for NavRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

enum SearchOutcome {
    Found(usize),
    BudgetOut,
    Exhausted,
}

/// 10-direction A* over the navigation grid. The search runs in reverse,
/// target to source, so the reconstructed track reads source to target.
pub struct Astar<'g> {
    grid: &'g mut NavGrid,
    costs: AstarCosts,
    route_mask: NavFlags,
    via_cost: f32,
    wrong_diag: f32,
    violation_cost: f32,
    layer_mask: u32,
    preferred: Vec<DirSet>,
    target_xy: Pt,
    target_z: (i32, i32),
}

impl<'g> Astar<'g> {
    pub fn new(grid: &'g mut NavGrid, costs: AstarCosts) -> Self {
        Self {
            grid,
            costs,
            route_mask: FLAGS_TRACKS_BLOCKED,
            via_cost: 0.0,
            wrong_diag: std::f32::consts::SQRT_2,
            violation_cost: f32::INFINITY,
            layer_mask: u32::MAX,
            preferred: Vec::new(),
            target_xy: Pt::zero(),
            target_z: (0, 0),
        }
    }

    /// Search for a minimum-cost path realizing the spec. Returns `None`
    /// when no path exists (callers treat that as a recoverable
    /// `Unroutable`); `Err(Timeout)` when the deadline passes, with all
    /// endpoint flags restored either way.
    pub fn search(&mut self, spec: &RouteSpec, ctl: SearchCtl<'_>) -> Result<Option<AstarResult>> {
        debug!("A* from {} to {}", spec.source, spec.target);
        debug_assert!(self.costs.valid());

        let Some(src_cell) = self.grid.cell_of(spec.source) else { return Ok(None) };
        let Some(dst_cell) = self.grid.cell_of(spec.target) else { return Ok(None) };
        if src_cell == dst_cell {
            return Ok(None);
        }
        self.init_costs(spec);

        // First probe the reverse direction with a small node budget to
        // detect a trap right around the endpoint; only then run the full
        // search. Reconstruction must happen while the endpoint flags are
        // still in place; they are restored on every path out.
        self.mark(spec, false, true);
        let res = match self.search_guarded(spec, src_cell, dst_cell, ctl) {
            Ok(Some(found)) => self.reconstruct(found, spec).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        self.restore(spec);
        res
    }

    fn search_guarded(
        &mut self,
        spec: &RouteSpec,
        src_cell: usize,
        dst_cell: usize,
        ctl: SearchCtl<'_>,
    ) -> Result<Option<usize>> {
        // Quick pass: conn.source is SOURCE, conn.target is TARGET.
        self.target_xy = spec.target.xy();
        self.target_z = spec.target_z;
        let rv = self.search_inner(src_cell, spec.source_budget, ctl)?;
        if matches!(rv, SearchOutcome::Exhausted) {
            debug!("A* endpoint blocked off");
            return Ok(None);
        }

        // Full pass with the roles swapped: start at conn.target, finish on
        // the SOURCE-side cells, so back-pointers read source to target.
        self.mark(spec, true, false);
        self.target_xy = spec.source.xy();
        self.target_z = spec.source_z;
        match self.search_inner(dst_cell, i64::MAX, ctl)? {
            SearchOutcome::Found(i) => Ok(Some(i)),
            _ => Ok(None),
        }
    }

    /// Mark the endpoint areas. In the quick pass (`swapped == false`) the
    /// connection source carries SOURCE; in the full pass the roles flip.
    fn mark(&mut self, spec: &RouteSpec, swapped: bool, save: bool) {
        let (sz, tz) = (spec.source_z, spec.target_z);
        self.grid.mark_endpoint(
            spec.source.xy(),
            spec.source_shape.as_ref(),
            sz.0,
            sz.1,
            swapped,
            save,
        );
        self.grid.mark_endpoint(
            spec.target.xy(),
            spec.target_shape.as_ref(),
            tz.0,
            tz.1,
            !swapped,
            save,
        );
    }

    fn restore(&mut self, spec: &RouteSpec) {
        let (sz, tz) = (spec.source_z, spec.target_z);
        self.grid.restore_endpoint(spec.source.xy(), spec.source_shape.as_ref(), sz.0, sz.1);
        self.grid.restore_endpoint(spec.target.xy(), spec.target_shape.as_ref(), tz.0, tz.1);
    }

    fn init_costs(&mut self, spec: &RouteSpec) {
        self.layer_mask = spec.layer_mask;
        let num_layers = self.grid.geom().size[2] as usize;
        self.preferred = vec![DirSet::all() - Dir::A - Dir::V; num_layers];
        for (z, c) in self.costs.preferred_directions.chars().take(num_layers).enumerate() {
            self.preferred[z] = match c {
                'x' => Dir::R | Dir::L,
                'y' => Dir::U | Dir::D,
                '0' => DirSet::empty(),
                _ => self.preferred[z],
            };
        }
        self.wrong_diag = std::f32::consts::SQRT_2 + (self.costs.wrong_direction - 1.0);
        self.via_cost = self.costs.via * spec.rules.via_diameter as f32;
        self.violation_cost = self.costs.violation;
        self.route_mask = FLAGS_TRACKS_BLOCKED;
        if self.costs.violation.is_infinite() {
            self.route_mask |= NavFlag::RouteTrackClearance;
        }
    }

    fn heuristic(&self, i: usize) -> f32 {
        let p = self.grid.point(i);
        let mut d = distance45(self.grid.ref_point(i), self.target_xy) as f32;
        let layer = p.layer();
        let dz = if layer < self.target_z.0 {
            self.target_z.0 - layer
        } else if layer > self.target_z.1 {
            layer - self.target_z.1
        } else {
            0
        };
        if dz > 0 {
            // A planar arrival additionally has to turn into a via.
            let dz = dz + i32::from(!p.back.map_or(false, |b| b.is_vertical()));
            d += self.via_cost * 0.5 * dz as f32;
        }
        d
    }

    fn check_h_edge(&self, i: usize, d: Dir) -> Option<usize> {
        let n = self.grid.edge(i, d)?;
        if self.grid.point(n).can_route(self.route_mask) { Some(n) } else { None }
    }

    fn check_v_edge(&self, i: usize, d: Dir) -> Option<usize> {
        if !self.grid.point(i).can_place_via() {
            return None;
        }
        let n = self.grid.edge(i, d)?;
        if self.grid.point(n).can_place_via() { Some(n) } else { None }
    }

    fn compute_cost(&self, cur: usize, dst: usize, d: Dir) -> f32 {
        let back = self.grid.point(cur).back;
        let p = self.grid.point(dst);
        let mut move_cost = p.cost;

        if d.is_vertical() {
            move_cost *= self.via_cost;
            // Extending the same via costs less, but never zero or the
            // search would explore the whole layer stack for free.
            if back.map_or(false, |d| d.is_vertical()) {
                move_cost *= 0.5;
            }
        } else {
            let non_pref = !self.preferred[p.z as usize].contains(d);
            if d.is_diagonal() {
                move_cost *= if non_pref { self.wrong_diag } else { std::f32::consts::SQRT_2 };
            } else if non_pref {
                move_cost *= self.costs.wrong_direction;
            }
            if (0..32).contains(&p.layer()) && self.layer_mask & (1 << p.layer()) == 0 {
                move_cost *= self.costs.masked_layer;
            }
            if p.has(NavFlag::RouteTrackClearance) {
                move_cost *= self.violation_cost;
            }
            let steps = back.map_or(0, |b| d.opposite().steps45_between(b));
            move_cost += self.costs.turn_per_45 * (steps * steps) as f32;
        }
        // Moving through the source area is cheaper, so the search enters
        // the source cell cleanly.
        if p.has(NavFlag::Source) {
            move_cost *= 0.125;
        }
        move_cost
    }

    fn search_inner(
        &mut self,
        start: usize,
        mut max_visits: i64,
        ctl: SearchCtl<'_>,
    ) -> Result<SearchOutcome> {
        let seq = self.grid.next_search_seq();
        {
            let p = self.grid.point_mut(start);
            p.score = 0.0;
            p.back = None;
            p.set_open(seq);
        }
        let mut open = BinaryHeap::new();
        open.push(NavRef { key: OrderedFloat(self.heuristic(start)), idx: start as u32 });
        let mut pops: u64 = 0;

        while let Some(entry) = open.pop() {
            let cur = entry.idx as usize;
            if !self.grid.point(cur).is_open(seq) {
                continue; // stale duplicate, a better entry came first
            }
            if self.grid.point(cur).has(NavFlag::Target) {
                return Ok(SearchOutcome::Found(cur));
            }
            max_visits -= 1;
            if max_visits == 0 {
                return Ok(SearchOutcome::BudgetOut);
            }
            pops += 1;
            if pops & DEADLINE_POLL_MASK == 0 {
                if let Some(deadline) = ctl.deadline {
                    if Instant::now() >= deadline {
                        return Err(RouteError::Timeout);
                    }
                }
            }
            self.grid.point_mut(cur).set_done(seq);

            let mut edges: [Option<usize>; 10] = [None; 10];
            edges[Dir::U.n()] = self.check_h_edge(cur, Dir::U);
            edges[Dir::D.n()] = self.check_h_edge(cur, Dir::D);
            edges[Dir::L.n()] = self.check_h_edge(cur, Dir::L);
            edges[Dir::R.n()] = self.check_h_edge(cur, Dir::R);
            for (diag, orth) in [
                (Dir::UR, (Dir::U, Dir::R)),
                (Dir::DR, (Dir::D, Dir::R)),
                (Dir::DL, (Dir::D, Dir::L)),
                (Dir::UL, (Dir::U, Dir::L)),
            ] {
                let both_open = edges[orth.0.n()].is_some() && edges[orth.1.n()].is_some();
                edges[diag.n()] =
                    if both_open || ASTAR_ALLOW_XOVER { self.check_h_edge(cur, diag) } else { None };
            }
            edges[Dir::A.n()] = self.check_v_edge(cur, Dir::A);
            edges[Dir::V.n()] = self.check_v_edge(cur, Dir::V);

            // Never go straight back; the 45-degree neighbours of the back
            // direction cannot improve either since costs are non-negative.
            if let Some(backd) = self.grid.point(cur).back {
                edges[backd.n()] = None;
                if backd.is_planar() {
                    edges[backd.rotated_ccw45().n()] = None;
                    edges[backd.rotated_cw45().n()] = None;
                }
            }

            let dir_end = if self.grid.point(cur).can_place_via() { VEND } else { HEND };
            let cur_score = self.grid.point(cur).score;
            for d in &DIRS[..dir_end] {
                let Some(node) = edges[d.n()] else { continue };
                let score = cur_score + self.compute_cost(cur, node, *d);
                {
                    let p = self.grid.point(node);
                    if p.is_seen(seq) && score >= p.score {
                        continue;
                    }
                }
                let p = self.grid.point_mut(node);
                p.back = Some(d.opposite());
                p.score = score;
                p.set_open(seq);
                let key = OrderedFloat(score + self.heuristic(node));
                open.push(NavRef { key, idx: node as u32 });
            }

            if let Some(step) = ctl.step {
                step.wait(1);
            }
        }
        Ok(SearchOutcome::Exhausted)
    }

    /// Follow the back-pointers from the found cell, compressing collinear
    /// same-layer runs into wide segments. Layer changes emit no segment;
    /// `autocreate_vias` stitches them afterwards.
    fn reconstruct(&mut self, found: usize, spec: &RouteSpec) -> Result<AstarResult> {
        let grid = &*self.grid;
        let mut head = found;
        while let Some(next) = grid.back_index(head) {
            if !grid.point(next).has(NavFlag::Target) {
                break;
            }
            head = next;
        }

        let mut track = Track::new(grid.ref_point25(head));
        track.set_default_width(spec.rules.trace_width);
        track.set_default_via_diameter(spec.rules.via_diameter);
        let hw = spec.rules.trace_width * 0.5;

        let mut violations: Vec<Pt25> = Vec::new();
        let violation_mask = FLAGS_TRACKS_BLOCKED | NavFlag::RouteTrackClearance;
        let mut node = head;
        let mut d = grid.point(head).back;
        while !grid.point(node).has(NavFlag::Source) {
            node = grid
                .back_index(node)
                .ok_or_else(|| RouteError::Invariant("broken back-pointer chain".to_owned()))?;
            let p = grid.point(node);
            if p.has_any(violation_mask) {
                let v = grid.ref_point25(node);
                let far = violations.last().map_or(true, |last| {
                    last.z != v.z || last.xy().dist2(v.xy()) > hw * hw
                });
                if far {
                    violations.push(v);
                }
            }
            if p.back == d && p.z == grid.point(head).z && !p.has(NavFlag::Source) {
                continue;
            }
            if let Some(dd) = d {
                if !dd.is_vertical() {
                    let a = grid.ref_point(head);
                    let b = grid.ref_point(node);
                    track.raw_append(wseg25(a, b, grid.point(head).layer(), hw));
                }
            }
            head = node;
            d = grid.point(node).back;
        }
        track.raw_set_end(grid.ref_point25(node));
        track.compute_length();
        Ok(AstarResult { track, violations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::geom::math::f64_eq;
    use crate::route::actions;
    use crate::route::grid::NavSpacings;
    use crate::testutil::{blocker, board_base, empty_board, finish_board, p25, point_net, unit_rules};

    #[test]
    fn test_single_segment_route() {
        // 10x10x1 empty board, straight shot along the bottom row.
        let mut board = empty_board(10.0, 10.0, 1, 1.0);
        let refs =
            point_net(&mut board, "N1", unit_rules(), &[(p25(0.5, 0.5, 0), p25(9.5, 0.5, 0))]);
        let ok = actions::astar_connect(&mut board, refs[0], None, SearchCtl::default()).unwrap();
        assert!(ok);

        let conn = board.conn(refs[0]).unwrap();
        assert!(conn.is_routed());
        assert_eq!(conn.num_tracks(), 1);
        let t = conn.track(0);
        assert_eq!(t.num_segments(), 1);
        assert_eq!(t.num_vias(), 0);
        assert_eq!(t.start(), p25(0.5, 0.5, 0));
        assert_eq!(t.end(), p25(9.5, 0.5, 0));
        assert!(f64_eq(t.length(), 9.0));
        assert!(t.has_valid_ends());
        assert!(t.is_contiguous());
    }

    #[test]
    fn test_single_via_route() {
        // 4x4x2 board; same planar cell on two layers yields a bare via.
        let mut board = empty_board(4.0, 4.0, 2, 1.0);
        let refs =
            point_net(&mut board, "N1", unit_rules(), &[(p25(1.5, 1.5, 0), p25(1.5, 1.5, 1))]);
        let ok = actions::astar_connect(&mut board, refs[0], None, SearchCtl::default()).unwrap();
        assert!(ok);

        let t = board.conn(refs[0]).unwrap().track(0);
        assert_eq!(t.num_segments(), 0);
        assert_eq!(t.num_vias(), 1);
        let v = t.vias()[0];
        assert!(crate::model::geom::math::pt_eq(v.location(), crate::model::primitive::pt(1.5, 1.5)));
        assert_eq!((v.zmin(), v.zmax()), (0, 1));
        assert!(t.has_valid_ends());
    }

    #[test]
    fn test_route_around_component() {
        // 11x11x1 with a blocking component in the middle.
        let mut board = board_base(11.0, 11.0, 1);
        board.components.push(blocker("U1", crate::model::primitive::rt(4.0, 4.0, 6.0, 6.0), 0));
        let mut board = finish_board(board, 1.0);
        board.costs.preferred_directions = "x".to_owned();
        let refs =
            point_net(&mut board, "N1", unit_rules(), &[(p25(0.5, 0.5, 0), p25(10.5, 10.5, 0))]);
        let ok = actions::astar_connect(&mut board, refs[0], None, SearchCtl::default()).unwrap();
        assert!(ok);

        let conn = board.conn(refs[0]).unwrap();
        let t = conn.track(0);
        // At least the unobstructed 45-metric distance.
        assert!(t.length() >= conn.distance45() - 1e-6);
        // No segment's mid-line passes through a component cell.
        let r = crate::route::raster::Rasterizer::new(*board.grid.geom());
        let mut op = crate::route::raster::RecordRangesOp::default();
        for s in t.segments() {
            r.line_seg(&mut op, &s.s2(), s.z(), s.z());
        }
        for range in &op.ranges {
            for y in range.y0..=range.y1 {
                for x in range.x0..=range.x1 {
                    let p = board.grid.point_at(x, y, 0);
                    assert!(
                        !p.has(NavFlag::InsideComponent),
                        "segment passes through component cell ({x},{y})"
                    );
                }
            }
        }
    }

    #[test]
    fn test_unroutable_island_leaves_grid_untouched() {
        // 5x5x1; the target cell is enclosed by a one-cell permanent wall.
        let mut board = empty_board(5.0, 5.0, 1, 1.0);
        for x in 1..=3u32 {
            for y in 1..=3u32 {
                if (x, y) != (2, 2) {
                    board.grid.block_cell(x, y, 0);
                }
            }
        }
        let refs =
            point_net(&mut board, "N1", unit_rules(), &[(p25(0.5, 0.5, 0), p25(2.5, 2.5, 0))]);
        // Prime the spacings so the routing attempt itself changes nothing.
        let sp = NavSpacings::from_connection(board.conn(refs[0]).unwrap());
        board.set_spacings(sp).unwrap();

        let before = board.grid.keepout_snapshot();
        let ok = actions::astar_connect(&mut board, refs[0], None, SearchCtl::default()).unwrap();
        assert!(!ok);
        let conn = board.conn(refs[0]).unwrap();
        assert!(!conn.is_routed());
        assert!(!conn.has_tracks());
        assert_eq!(before, board.grid.keepout_snapshot());
    }

    #[test]
    fn test_planar_heuristic_is_exact_shortest_path() {
        // With unit costs, all layers preferred, and no vias, the heuristic
        // equals the true 45-metric cost: the track length must match it.
        let mut board = empty_board(12.0, 12.0, 1, 1.0);
        let refs =
            point_net(&mut board, "N1", unit_rules(), &[(p25(1.5, 2.5, 0), p25(9.5, 6.5, 0))]);
        let ok = actions::astar_connect(&mut board, refs[0], None, SearchCtl::default()).unwrap();
        assert!(ok);
        let conn = board.conn(refs[0]).unwrap();
        assert!(f64_eq(conn.track(0).length(), conn.distance45()));
    }

    #[test]
    fn test_layer_mask_compliance() {
        // Mask out layer 0; the route must climb to layer 1 for its planar
        // moves even though both endpoints sit on layer 0.
        let mut board = empty_board(8.0, 8.0, 2, 1.0);
        let refs =
            point_net(&mut board, "N1", unit_rules(), &[(p25(0.5, 0.5, 0), p25(6.5, 0.5, 0))]);
        let mut costs = AstarCosts { masked_layer: 100.0, ..Default::default() };
        costs.set_violation_inf();
        board.nets[0].set_raw_layer_mask(0b10);
        let ok = actions::astar_connect(&mut board, refs[0], Some(&costs), SearchCtl::default())
            .unwrap();
        assert!(ok);
        let t = board.conn(refs[0]).unwrap().track(0);
        // The long horizontal run stays on the unmasked layer.
        let on_masked: f64 = t
            .segments()
            .iter()
            .filter(|s| s.z() == 0)
            .map(|s| s.base().length())
            .sum();
        let total: f64 = t.segments().iter().map(|s| s.base().length()).sum();
        assert!(on_masked < total * 0.5, "route should prefer the unmasked layer");
    }
}
