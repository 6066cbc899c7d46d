use serde::{Deserialize, Serialize};

use crate::model::pcb::pin::Pin;
use crate::model::primitive::point::Pt;
use crate::model::primitive::rect::Rt;
use crate::model::primitive::shape::Shape;

/// A placed circuit component: a footprint on a single layer plus its pins.
/// Footprint and pin shapes are kept in board coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub ref_point: Pt,
    pub layer: i32,
    pub angle_deg: f64,
    pub footprint: Shape,
    pub clearance: f64,
    pub can_route_inside: bool,
    pub can_place_vias_inside: bool,
    pub pins: Vec<Pin>,
}

impl Component {
    pub fn pin(&self, name: &str) -> Option<&Pin> {
        self.pins.iter().find(|p| p.name == name)
    }

    pub fn pin_mut(&mut self, name: &str) -> Option<&mut Pin> {
        self.pins.iter_mut().find(|p| p.name == name)
    }

    pub fn bbox(&self) -> Rt {
        self.pins.iter().fold(self.footprint.bounds(), |r, p| r.union(&p.bbox()))
    }
}
