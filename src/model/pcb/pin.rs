use serde::{Deserialize, Serialize};

use crate::model::pcb::layer::ranges_overlap;
use crate::model::primitive::point::{Pt, Pt25};
use crate::model::primitive::rect::Rt;
use crate::model::primitive::shape::Shape;

/// Reference to a pin by component and pin name. Connections and nets refer
/// to pins through these; the board resolves them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PinRef {
    pub component: String,
    pub pin: String,
}

impl PinRef {
    pub fn new(component: &str, pin: &str) -> Self {
        Self { component: component.to_owned(), pin: pin.to_owned() }
    }
}

impl std::fmt::Display for PinRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.component, self.pin)
    }
}

/// A pad: a metal region spanning a layer range, attached to at most one net.
/// The shape is stored in board coordinates (placement already applied).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    pub name: String,
    pub shape: Shape,
    pub center: Pt,
    pub zmin: i32,
    pub zmax: i32,
    pub clearance: f64,
    pub net: Option<u32>,
    /// Tracks of the pin's own net may enter; such pins get no keep-out.
    pub can_route_inside: bool,
}

impl Pin {
    pub fn is_on_layer(&self, z: i32) -> bool {
        self.zmin <= z && z <= self.zmax
    }

    pub fn shares_layer(&self, o: &Pin) -> bool {
        ranges_overlap(self.zmin, self.zmax, o.zmin, o.zmax)
    }

    pub fn contains_3d(&self, v: Pt25) -> bool {
        self.is_on_layer(v.z) && self.shape.contains(v.xy())
    }

    pub fn center25(&self) -> Pt25 {
        self.center.with_z(self.zmin)
    }

    pub fn bbox(&self) -> Rt {
        self.shape.bounds()
    }

    /// First layer of the pin's range that the mask allows, if any.
    pub fn start_layer_for(&self, layer_mask: u32) -> Option<i32> {
        (self.zmin..=self.zmax).find(|&z| (0..32).contains(&z) && layer_mask & (1 << z) != 0)
    }

    pub fn intersects(&self, o: &Pin) -> bool {
        self.shares_layer(o) && self.shape.intersects(&o.shape)
    }
}
