use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{invariant_err, Result, RouteError};
use crate::model::pcb::board::{Board, ConnRef};
use crate::model::pcb::track::Track;
use crate::route::actions;
use crate::route::astar::{Astar, AstarCosts, SearchCtl};
use crate::route::grid::{GridGeom, NavPoint, NavSpacings};
use crate::route::lock::StepLock;
use crate::route::raster::{RasterOp, Rasterizer, RASTER_ALL};

/// Parameters of the negotiated-congestion loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RrrConfig {
    pub min_iterations: u32,
    pub max_iterations: u32,
    pub max_iterations_stagnant: u32,
    pub tidy_iterations: u32,
    pub history_cost_decay: f32,
    pub history_cost_increment: f32,
    pub history_cost_max: u16,
    pub randomize_order: bool,
    pub seed: u64,
    #[serde(default)]
    pub timeout_us: Option<u64>,
    /// Count stagnant iterations even before the first full success.
    #[serde(default)]
    pub check_stagnation_before_success: bool,
}

impl Default for RrrConfig {
    fn default() -> Self {
        Self {
            min_iterations: 1,
            max_iterations: 64,
            max_iterations_stagnant: 8,
            tidy_iterations: 2,
            history_cost_decay: 0.9,
            history_cost_increment: 0.5,
            history_cost_max: 0xfffe,
            randomize_order: true,
            seed: 0,
            timeout_us: None,
            check_stagnation_before_success: false,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthScale {
    Unit,
    Dist,
    Dist45,
}

/// Reward shaping for scoring one routing state: a bonus per routed
/// connection less its normalized length, via and disconnect penalties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardCfg {
    pub per_routed: f32,
    pub per_via: f32,
    pub per_unrouted: f32,
    pub any_unrouted: f32,
    pub ignore_necessary_vias: bool,
    pub scale_length: LengthScale,
}

impl Default for RewardCfg {
    fn default() -> Self {
        Self {
            per_routed: 1.0,
            per_via: 0.0,
            per_unrouted: -1.0,
            any_unrouted: 0.0,
            ignore_necessary_vias: true,
            scale_length: LengthScale::Dist45,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Score {
    pub success: bool,
    pub r: f32,
}

impl Score {
    const MIN: Score = Score { success: false, r: f32::NEG_INFINITY };

    fn better_than(&self, o: &Score) -> bool {
        if self.success != o.success {
            return self.success;
        }
        self.r > o.r
    }
}

/// Write operator for the agent's own track rasterization: maintains the
/// overlap counter (`user[0]`), accrues quantized history cost (`user[1]`)
/// on still-contested cells, and folds both into the cell cost the
/// pathfinder reads.
struct RrrOp<'a> {
    geom: GridGeom,
    points: &'a mut [NavPoint],
    write_seq: u16,
    value: i32,
    hist_increment_size: f32,
    hist_num_increments: i32,
    hist_max: i32,
    overlap_count: u32,
}

impl<'a> RasterOp for RrrOp<'a> {
    fn write_range(&mut self, z0: u32, z1: u32, y0: u32, y1: u32, x0: u32, x1: u32) {
        if x0 > x1 || y0 > y1 || z0 > z1 {
            return;
        }
        let seq = self.write_seq;
        let value = self.value;
        let inc_size = self.hist_increment_size;
        let num_inc = self.hist_num_increments;
        let max_inc = self.hist_max;
        let mut overlap = 0;
        for z in z0..=z1 {
            for y in y0..=y1 {
                let i0 = self.geom.linear_index(x0, y, z);
                let i1 = i0 + (x1 - x0) as usize;
                for p in &mut self.points[i0..=i1] {
                    if p.write_seq() == seq {
                        continue;
                    }
                    p.set_write_seq(seq);
                    debug_assert!(
                        p.ko.user[0] as i32 + value >= 0,
                        "probable inconsistency after spacings change"
                    );
                    let user0 = (p.ko.user[0] as i32 + value).max(0) as u16;
                    p.ko.user[0] = user0;
                    if user0 > 1 {
                        overlap += 1;
                    }
                    let mut h = p.ko.user[1] as i32;
                    if value > 0 && user0 > 1 && num_inc != 0 {
                        h = (h + num_inc).min(max_inc);
                        p.ko.user[1] = h as u16;
                    }
                    p.cost = (1.0 + h as f32 * inc_size) * (user0 + 1) as f32;
                }
            }
        }
        self.overlap_count += overlap;
    }
}

/// Pathfinder-style rip-up-and-reroute: connections route through each
/// other at a cost, contested cells accumulate history, and the best
/// conflict-free snapshot seen is kept.
pub struct RrrAgent {
    conns: Vec<ConnRef>,
    order: Vec<usize>,
    cfg: RrrConfig,
    reward: RewardCfg,
    costs: AstarCosts,
    rng: SmallRng,
    step: Arc<StepLock>,
    deadline: Option<Instant>,
    best: Vec<Option<Track>>,
    best_score: Score,
    stagnant: u32,
    postroute_stage: bool,
}

impl RrrAgent {
    pub fn new(conns: Vec<ConnRef>, cfg: RrrConfig, reward: RewardCfg, costs: AstarCosts) -> Self {
        let rng = SmallRng::seed_from_u64(cfg.seed);
        Self {
            conns,
            order: Vec::new(),
            cfg,
            reward,
            costs,
            rng,
            step: Arc::new(StepLock::default()),
            deadline: None,
            best: Vec::new(),
            best_score: Score::MIN,
            stagnant: 0,
            postroute_stage: false,
        }
    }

    /// The lock a UI thread may use to single-step the agent.
    pub fn step_lock(&self) -> Arc<StepLock> {
        Arc::clone(&self.step)
    }

    pub fn best_score(&self) -> Score {
        self.best_score
    }

    /// One full negotiation run. Returns whether every managed connection
    /// ended up routed.
    pub fn run(&mut self, board: &mut Board) -> Result<bool> {
        if self.conns.is_empty() {
            return Ok(true);
        }
        self.init(board)?;
        let mut timed_out = false;
        for iteration in 0..self.cfg.max_iterations {
            if self.expired() {
                timed_out = true;
                break;
            }
            debug!("RRR iteration {iteration}");
            match self.reroute_history_all(board) {
                Ok(_) => {}
                Err(RouteError::Timeout) => {
                    timed_out = true;
                    break;
                }
                Err(RouteError::Unroutable) => {
                    warn!("route cannot be realized in reroute stage");
                    break;
                }
                Err(e) => return Err(e),
            }
            let score = match self.check_routing(board) {
                Ok(s) => s,
                Err(RouteError::Timeout) => {
                    timed_out = true;
                    break;
                }
                Err(e) => return Err(e),
            };
            info!("iteration {iteration}: score {} success={}", score.r, score.success);
            if self.best_score.success || self.cfg.check_stagnation_before_success {
                self.stagnant += 1;
            }
            if score.better_than(&self.best_score) {
                self.best_score = score;
                self.stagnant = 0;
            }
            if iteration + 1 >= self.cfg.min_iterations
                && self.stagnant >= self.cfg.max_iterations_stagnant
            {
                break;
            }
        }
        let success = self.postroute(board)?;
        if timed_out {
            info!("RRR stopped on deadline; best completed state restored");
        }
        Ok(success)
    }

    fn init(&mut self, board: &mut Board) -> Result<()> {
        self.deadline = self.cfg.timeout_us.map(|us| Instant::now() + Duration::from_micros(us));
        self.postroute_stage = false;
        self.stagnant = 0;
        self.best_score = Score::MIN;
        self.best = vec![None; self.conns.len()];
        board.grid.set_costs(1.0);
        board.grid.reset_user_keepouts();

        let first = board.conn(self.conns[0])?;
        let (w, c, v) =
            (first.default_trace_width(), first.clearance(), first.default_via_diameter());
        self.order.clear();
        for (i, &x) in self.conns.iter().enumerate() {
            self.order.push(i);
            let conn = board.conn(x)?;
            if conn.default_trace_width() != w
                || conn.clearance() != c
                || conn.default_via_diameter() != v
            {
                warn!(
                    "RRR expects uniform track widths, clearances and via diameters across \
                     managed connections"
                );
            }
        }
        self.order.shuffle(&mut self.rng);
        Ok(())
    }

    fn expired(&self) -> bool {
        self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    fn ctl(&self) -> SearchCtl<'_> {
        SearchCtl { deadline: self.deadline, step: Some(self.step.as_ref()) }
    }

    /// One negotiation sweep: decay history, then rip up and re-route every
    /// connection in (possibly shuffled) order with overlap allowed.
    fn reroute_history_all(&mut self, board: &mut Board) -> Result<bool> {
        self.decay_history_costs(board, self.cfg.history_cost_decay);
        if self.cfg.randomize_order {
            self.order.shuffle(&mut self.rng);
        }
        let order = self.order.clone();
        let mut ok = true;
        for i in order {
            let x = self.conns[i];
            self.unroute_history(board, x)?;
            if !self.route_history(board, x)? {
                ok = false;
            }
        }
        Ok(ok)
    }

    /// Route with history costs, ignoring overlap with other routes; the
    /// result is rasterized through the overlap counters. Returns whether
    /// the new route is conflict-free.
    fn route_history(&mut self, board: &mut Board, x: ConnRef) -> Result<bool> {
        self.step.wait(1);
        self.update_spacings(board, x)?;
        let spec = board.route_spec(x)?;
        let res = Astar::new(&mut board.grid, self.costs.clone()).search(&spec, self.ctl())?;
        let Some(res) = res else { return Err(RouteError::Unroutable) };
        actions::attach_routed_track(board, x, res.track)?;
        let overlap = self.rasterize(board, x, 1, true)?;
        Ok(overlap == 0)
    }

    fn unroute_history(&mut self, board: &mut Board, x: ConnRef) -> Result<()> {
        self.step.wait(1);
        if board.conn(x)?.has_tracks() {
            self.rasterize(board, x, -1, false)?;
        }
        board.conn_mut(x)?.clear_tracks();
        Ok(())
    }

    fn unroute_history_all(&mut self, board: &mut Board) -> Result<()> {
        let conns = self.conns.clone();
        for x in conns {
            if board.conn(x)?.is_routed() {
                self.unroute_history(board, x)?;
            }
        }
        Ok(())
    }

    /// Rasterize a connection's tracks through the overlap/history write
    /// operator. Returns the number of cells left with more than one user.
    fn rasterize(&mut self, board: &mut Board, x: ConnRef, value: i32, hist: bool) -> Result<u32> {
        let seq = board.grid.next_raster_seq();
        let clearance = board.conn(x)?.clearance();
        let expansion = board.grid.spacings().expansion_for_tracks(clearance);
        let Board { nets, grid, .. } = board;
        let conn = nets
            .get(x.net)
            .and_then(|n| n.connections().get(x.conn))
            .ok_or_else(|| RouteError::Invariant("dangling connection ref".into()))?;
        let (geom, points) = grid.split_for_raster();
        let mut op = RrrOp {
            geom,
            points,
            write_seq: seq,
            value,
            hist_increment_size: self.cfg.history_cost_increment,
            hist_num_increments: i32::from(hist),
            hist_max: self.cfg.history_cost_max as i32,
            overlap_count: 0,
        };
        let r = Rasterizer::new(geom).with_expansion(expansion);
        for t in conn.tracks() {
            r.fill_track(&mut op, t, RASTER_ALL);
        }
        Ok(op.overlap_count)
    }

    /// Spacings follow the connection being routed; a change wipes the
    /// overlap counters, which are then rebuilt from the present tracks.
    fn update_spacings(&mut self, board: &mut Board, x: ConnRef) -> Result<()> {
        let sp = NavSpacings::from_connection(board.conn(x)?);
        if !board.set_spacings(sp)? {
            return Ok(());
        }
        board.grid.reset_user_keepout(0);
        if self.postroute_stage {
            return Ok(());
        }
        let conns = self.conns.clone();
        for y in conns {
            if board.conn(y)?.has_tracks() {
                self.rasterize(board, y, 1, false)?;
            }
        }
        Ok(())
    }

    fn decay_history_costs(&mut self, board: &mut Board, f: f32) {
        if f == 1.0 {
            return;
        }
        for p in board.grid.points_mut() {
            p.ko.user[1] = (p.ko.user[1] as f32 * f).ceil() as u16;
        }
    }

    fn save_tracks(conns: &[ConnRef], board: &Board) -> Result<Vec<Option<Track>>> {
        let mut out = Vec::with_capacity(conns.len());
        for &x in conns {
            let conn = board.conn(x)?;
            out.push(if conn.has_tracks() { Some(conn.track(0).clone()) } else { None });
        }
        Ok(out)
    }

    fn restore_track(&mut self, board: &mut Board, i: usize, t: Option<Track>) -> Result<()> {
        self.step.wait(1);
        let x = self.conns[i];
        if board.conn(x)?.is_routed() {
            return invariant_err("cannot restore tracks for routed connection");
        }
        let Some(mut t) = t else {
            debug!("no track to restore for connection {i}");
            return Ok(());
        };
        if t.is_empty() {
            return Ok(());
        }
        t.reset_rasterized();
        board.conn_mut(x)?.set_track(t);
        board.check_routed(x)?;
        if self.postroute_stage {
            board.rasterize_tracks(x)?;
        } else {
            self.rasterize(board, x, 1, false)?;
        }
        Ok(())
    }

    fn restore_tracks(&mut self, board: &mut Board, tracks: Vec<Option<Track>>) -> Result<()> {
        for (i, t) in tracks.into_iter().enumerate() {
            self.restore_track(board, i, t)?;
        }
        Ok(())
    }

    /// Try a clean reroute of everything without overlap, score it, keep the
    /// snapshot if it beats the best so far, then put the overlapping state
    /// back and continue negotiating.
    fn check_routing(&mut self, board: &mut Board) -> Result<Score> {
        debug!("RRR: checking routes");
        let saved = Self::save_tracks(&self.conns, board)?;
        let costs = self.costs.clone();

        let mut ok = true;
        let conns = self.conns.clone();
        for x in conns {
            self.unroute_history(board, x)?;
            if ok && !actions::astar_connect(board, x, Some(&costs), self.ctl())? {
                ok = false;
            }
        }
        let score = self.evaluate(board)?;
        if score.better_than(&self.best_score) {
            self.best = Self::save_tracks(&self.conns, board)?;
        }
        let conns = self.conns.clone();
        for x in conns {
            if board.conn(x)?.is_routed() {
                board.erase_tracks(x)?;
            }
        }
        self.restore_tracks(board, saved)?;
        Ok(score)
    }

    /// Restore the best-ever snapshot with real keep-outs and polish each
    /// connection in place; a tidy pass that breaks a connection is undone.
    fn postroute(&mut self, board: &mut Board) -> Result<bool> {
        self.postroute_stage = true;
        self.unroute_history_all(board)?;
        board.grid.set_costs(1.0);
        board.grid.reset_user_keepouts();

        info!(
            "RRR: restoring best routing with success={} score={}",
            self.best_score.success, self.best_score.r
        );
        let best = std::mem::take(&mut self.best);
        self.restore_tracks(board, best.clone())?;
        self.best = best;

        info!("RRR: tidying up");
        let costs = self.costs.clone();
        'tidy: for _ in 0..self.cfg.tidy_iterations {
            for i in 0..self.conns.len() {
                let x = self.conns[i];
                if board.conn(x)?.locked {
                    continue;
                }
                board.erase_tracks(x)?;
                let ok = match actions::astar_connect(board, x, Some(&costs), self.ctl()) {
                    Ok(ok) => ok,
                    Err(RouteError::Timeout) => false,
                    Err(e) => return Err(e),
                };
                if !ok && self.best_score.success {
                    let t = self.best[i].clone();
                    self.restore_track(board, i, t)?;
                }
                if self.expired() {
                    break 'tidy;
                }
            }
        }
        let score = self.evaluate(board)?;
        Ok(score.success)
    }

    /// Reward over all managed connections.
    fn evaluate(&self, board: &Board) -> Result<Score> {
        let mut r = 0.0f32;
        let mut unrouted = 0u32;
        for &x in &self.conns {
            let conn = board.conn(x)?;
            if !conn.is_routed() {
                unrouted += 1;
                r += self.reward.per_unrouted;
                continue;
            }
            let scale = (match self.reward.scale_length {
                LengthScale::Unit => 1.0,
                LengthScale::Dist => conn.distance(),
                LengthScale::Dist45 => conn.distance45(),
            })
            .max(1e-9) as f32;
            let len: f64 = conn.tracks().iter().map(Track::length).sum();
            let mut vias: i32 = conn.tracks().iter().map(|t| t.num_vias() as i32).sum();
            if self.reward.ignore_necessary_vias {
                let (sp, tp) = board.conn_pins(x)?;
                vias -= conn.num_necessary_vias(sp.as_ref(), tp.as_ref()) as i32;
            }
            r += self.reward.per_routed - (len as f32 / scale) + vias as f32 * self.reward.per_via;
        }
        if unrouted > 0 {
            r += self.reward.any_unrouted;
        }
        Ok(Score { success: unrouted == 0, r })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{empty_board, p25, point_net, unit_rules};

    fn crossing_board() -> (crate::model::pcb::board::Board, Vec<ConnRef>) {
        // Two connections that must cross: one horizontal, one vertical,
        // both on layer 0 of a two-layer board.
        let mut board = empty_board(10.0, 10.0, 2, 1.0);
        board.costs.preferred_directions = "xy".to_owned();
        let mut refs = point_net(
            &mut board,
            "A",
            unit_rules(),
            &[(p25(0.5, 4.5, 0), p25(9.5, 4.5, 0))],
        );
        refs.extend(point_net(
            &mut board,
            "B",
            unit_rules(),
            &[(p25(4.5, 0.5, 0), p25(4.5, 9.5, 0))],
        ));
        (board, refs)
    }

    fn cfg(seed: u64) -> RrrConfig {
        RrrConfig { max_iterations: 8, seed, ..Default::default() }
    }

    #[test]
    fn test_rrr_resolves_crossing() {
        let (mut board, refs) = crossing_board();
        let mut agent =
            RrrAgent::new(refs.clone(), cfg(1), RewardCfg::default(), board.costs.clone());
        let ok = agent.run(&mut board).unwrap();
        assert!(ok);
        for &x in &refs {
            assert!(board.conn(x).unwrap().is_routed(), "connection {x:?} not routed");
        }
        // Conflict-free: the finished tracks keep their clearance.
        let ta = board.conn(refs[0]).unwrap().track(0).clone();
        let tb = board.conn(refs[1]).unwrap().track(0).clone();
        assert!(!ta.violates_clearance(&tb, 0.0));
        // Crossing nets on one layer force at least one via.
        assert!(ta.num_vias() + tb.num_vias() >= 1);
        // Best-score snapshot is what was restored.
        assert!(agent.best_score().success);
    }

    #[test]
    fn test_rrr_deterministic_with_seed() {
        let run = |seed| {
            let (mut board, refs) = crossing_board();
            let mut agent =
                RrrAgent::new(refs, cfg(seed), RewardCfg::default(), board.costs.clone());
            agent.run(&mut board).unwrap();
            crate::io::routes_to_json(&board).unwrap()
        };
        assert_eq!(run(7), run(7));
    }

    #[test]
    fn test_rrr_no_overlap_counters_left() {
        let (mut board, refs) = crossing_board();
        let mut agent = RrrAgent::new(refs, cfg(2), RewardCfg::default(), board.costs.clone());
        agent.run(&mut board).unwrap();
        // Postroute replaces user keep-outs with real route keep-outs.
        assert!(board.grid.points().iter().all(|p| p.ko.user[0] == 0));
    }

    #[test]
    fn test_best_score_monotone() {
        // The saved best score never decreases across iterations; observable
        // here as: a second run seeded identically cannot end with a lower
        // best score than its own first iteration produced.
        let (mut board, refs) = crossing_board();
        let mut one_iter = cfg(3);
        one_iter.max_iterations = 1;
        let mut agent =
            RrrAgent::new(refs.clone(), one_iter, RewardCfg::default(), board.costs.clone());
        agent.run(&mut board).unwrap();
        let first = agent.best_score();

        let (mut board2, refs2) = crossing_board();
        let mut agent2 =
            RrrAgent::new(refs2, cfg(3), RewardCfg::default(), board2.costs.clone());
        agent2.run(&mut board2).unwrap();
        let last = agent2.best_score();
        assert!(last.better_than(&first) || last == first);
    }

    #[test]
    fn test_reward_defaults() {
        let (mut board, refs) = crossing_board();
        let mut agent =
            RrrAgent::new(refs.clone(), cfg(4), RewardCfg::default(), board.costs.clone());
        agent.run(&mut board).unwrap();
        let score = agent.evaluate(&board).unwrap();
        // Every routed connection contributes 1 - length/d45 <= 1.
        assert!(score.success);
        assert!(score.r <= refs.len() as f32);
    }
}
