use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Result, RouteError};
use crate::model::pcb::board::{Board, ConnRef};
use crate::model::pcb::track::Track;
use crate::model::primitive::point::Pt25;
use crate::route::actions::{self, ViaLocation};
use crate::route::astar::{AstarCosts, SearchCtl};
use crate::route::grid::IBox3;
use crate::route::rrr::{RewardCfg, RrrAgent, RrrConfig};

/// Thread-safe facade over the board: one router worker mutates under the
/// write lock while UI/client threads read board state under the read lock.
/// Rasterization and searches are serialized here; the navigation grid is
/// not safe for concurrent mutation.
#[derive(Debug)]
pub struct Router {
    board: RwLock<Board>,
}

impl Router {
    pub fn new(board: Board) -> Self {
        Self { board: RwLock::new(board) }
    }

    pub fn into_board(self) -> Result<Board> {
        self.board.into_inner().map_err(|_| poisoned())
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, Board>> {
        self.board.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Board>> {
        self.board.write().map_err(|_| poisoned())
    }

    /// Route one connection with A*; previously routed state is ripped up
    /// first. Returns whether the connection is routed afterwards.
    pub fn route_connection(&self, x: ConnRef, costs: Option<&AstarCosts>) -> Result<bool> {
        let mut board = self.write()?;
        actions::astar_connect(&mut board, x, costs, SearchCtl::default())
    }

    pub fn unroute_connection(&self, x: ConnRef) -> Result<()> {
        let mut board = self.write()?;
        actions::unroute(&mut board, x)
    }

    /// Route between two points and append the result to the connection's
    /// partial tracks.
    pub fn route_to(
        &self,
        x: ConnRef,
        p0: Pt25,
        p1: Pt25,
        costs: Option<&AstarCosts>,
    ) -> Result<bool> {
        let mut board = self.write()?;
        actions::astar_to_point(&mut board, x, p0, p1, costs, SearchCtl::default())
    }

    /// Place a direct (optionally bent) segment; kept only when violation
    /// free.
    pub fn segment_to(
        &self,
        x: ConnRef,
        p0: Pt25,
        p1: Pt25,
        bend_location: f64,
        via: ViaLocation,
    ) -> Result<bool> {
        let mut board = self.write()?;
        actions::segment_to_point(&mut board, x, p0, p1, bend_location, via)
    }

    pub fn unroute_segment(&self, x: ConnRef, endpoint: Pt25) -> Result<bool> {
        let mut board = self.write()?;
        actions::unroute_segment(&mut board, x, endpoint)
    }

    /// Validate and install a hand-built track.
    pub fn set_track(&self, x: ConnRef, t: Track) -> Result<bool> {
        let mut board = self.write()?;
        actions::set_track(&mut board, x, t)
    }

    pub fn set_layer_mask(&self, net: usize, mask: u32) -> Result<()> {
        self.write()?.set_layer_mask(net, mask)
    }

    /// Overlay a uniform cost on the whole grid or a 3D box of it.
    pub fn set_cost_map_value(&self, region: Option<IBox3>, v: f32) -> Result<()> {
        let mut board = self.write()?;
        match region {
            Some(b) => board.grid.set_costs_box(&b, v),
            None => {
                board.grid.set_costs(v);
                Ok(())
            }
        }
    }

    /// Overlay a cost field from a dense array (whole grid or a 3D box).
    pub fn set_cost_map_array(
        &self,
        region: Option<IBox3>,
        data: &[f32],
        base: f32,
    ) -> Result<()> {
        let mut board = self.write()?;
        match region {
            Some(b) => board.grid.set_costs_box_array(&b, data, base),
            None => board.grid.set_costs_array(data, base),
        }
    }

    /// Set (or clear, with `None`) the route-guard corridor.
    pub fn set_route_guard(&self, path: Option<&[Pt25]>, guard_cost: f32) -> Result<()> {
        self.write()?.set_route_guard(path, guard_cost);
        Ok(())
    }

    /// Run the rip-up-and-reroute agent over the given connections.
    pub fn run_rrr(
        &self,
        conns: Vec<ConnRef>,
        cfg: RrrConfig,
        reward: RewardCfg,
        costs: Option<AstarCosts>,
    ) -> Result<bool> {
        let mut board = self.write()?;
        let costs = costs.unwrap_or_else(|| board.costs.clone());
        let mut agent = RrrAgent::new(conns, cfg, reward, costs);
        agent.run(&mut board)
    }

    /// Straight-line hints between the currently disconnected terminals of
    /// every connection.
    pub fn rats_nest(&self) -> Result<Vec<(Pt25, Pt25)>> {
        let board = self.read()?;
        let mut rats = Vec::new();
        for net in &board.nets {
            for x in net.connections() {
                if !x.is_routed() {
                    rats.extend(x.rats_nest());
                }
            }
        }
        Ok(rats)
    }
}

fn poisoned() -> RouteError {
    RouteError::Invariant("board lock poisoned".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{empty_board, p25, point_net, unit_rules};

    #[test]
    fn test_router_facade() {
        let mut board = empty_board(10.0, 10.0, 2, 1.0);
        let refs = point_net(
            &mut board,
            "N1",
            unit_rules(),
            &[(p25(0.5, 0.5, 0), p25(8.5, 0.5, 0)), (p25(0.5, 8.5, 0), p25(8.5, 8.5, 0))],
        );
        let router = Router::new(board);

        assert_eq!(router.rats_nest().unwrap().len(), 2);
        assert!(router.route_connection(refs[0], None).unwrap());
        assert_eq!(router.rats_nest().unwrap().len(), 1);
        assert!(router.read().unwrap().conn(refs[0]).unwrap().is_routed());

        router.unroute_connection(refs[0]).unwrap();
        assert_eq!(router.rats_nest().unwrap().len(), 2);

        assert!(router.run_rrr(refs, RrrConfig::default(), RewardCfg::default(), None).unwrap());
    }

    #[test]
    fn test_router_cost_map() {
        let mut board = empty_board(6.0, 6.0, 1, 1.0);
        point_net(&mut board, "N1", unit_rules(), &[(p25(0.5, 0.5, 0), p25(4.5, 0.5, 0))]);
        let router = Router::new(board);
        router.set_cost_map_value(None, 3.0).unwrap();
        assert!(router.read().unwrap().grid.points().iter().all(|p| p.cost == 3.0));
        router.set_cost_map_value(None, 1.0).unwrap();
    }
}
