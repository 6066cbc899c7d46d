//! Shared board builders for tests.

use crate::model::pcb::board::{Board, ConnRef};
use crate::model::pcb::component::Component;
use crate::model::pcb::layer::{Layer, Side, SignalType};
use crate::model::pcb::net::{LayoutArea, Net};
use crate::model::pcb::rules::DesignRules;
use crate::model::primitive::point::Pt25;
use crate::model::primitive::rect::Rt;
use crate::model::primitive::shape::Shape;

pub fn layers(n: u32) -> Vec<Layer> {
    (0..n).map(|i| Layer::new(i as i32, SignalType::all(), Side::Inner)).collect()
}

/// An empty board over `[0,w] x [0,h]` with `n` layers; the grid is built
/// only after `components` (for footprint blockages) via `finish_board`.
pub fn board_base(w: f64, h: f64, n: u32) -> Board {
    Board::new("test", layers(n), LayoutArea::rect(Rt::new(0.0, 0.0, w, h)))
}

pub fn finish_board(mut board: Board, edge: f64) -> Board {
    board.build_grid(edge).unwrap();
    board
}

pub fn empty_board(w: f64, h: f64, n: u32, edge: f64) -> Board {
    finish_board(board_base(w, h, n), edge)
}

/// A blocking component: no routing and no vias inside its footprint.
pub fn blocker(name: &str, footprint: Rt, z: i32) -> Component {
    Component {
        name: name.to_owned(),
        ref_point: footprint.center(),
        layer: z,
        angle_deg: 0.0,
        footprint: Shape::Rect(footprint),
        clearance: 0.0,
        can_route_inside: false,
        can_place_vias_inside: false,
        pins: Vec::new(),
    }
}

/// Add a net of pin-less point-to-point connections; returns the refs.
pub fn point_net(
    board: &mut Board,
    name: &str,
    rules: DesignRules,
    endpoints: &[(Pt25, Pt25)],
) -> Vec<ConnRef> {
    let mut net = Net::new(name);
    net.set_rules(rules);
    let ni = board.nets.len();
    net.set_id(ni as u32).unwrap();
    for &(s, t) in endpoints {
        net.add_connection(None, s, None, t).unwrap();
    }
    board.nets.push(net);
    (0..endpoints.len()).map(|ci| ConnRef::new(ni, ci)).collect()
}

pub fn unit_rules() -> DesignRules {
    DesignRules::new(0.0, 1.0, 1.0)
}

pub fn p25(x: f64, y: f64, z: i32) -> Pt25 {
    Pt25::new(x, y, z)
}
