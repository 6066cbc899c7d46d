//! Grid-based PCB autorouter.
//!
//! Boards come in as layers, placed components with pins, and nets with
//! design rules; tracks and vias come out. Routing happens on a dense 2.5D
//! navigation grid: shapes are rasterized into per-cell keep-out counters
//! under the midpoint rule, a 10-direction A* searches the grid for each
//! two-terminal connection, and a rip-up-and-reroute agent negotiates
//! congestion with history costs until the board is conflict free.

pub mod error;
pub mod io;
pub mod model;
pub mod route;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{Result, RouteError};
pub use model::pcb::{Board, ConnRef, DesignRules, Net, Track, Via};
pub use route::astar::AstarCosts;
pub use route::router::Router;
pub use route::rrr::{RewardCfg, RrrConfig};
