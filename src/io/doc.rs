use serde::{Deserialize, Serialize};

use crate::model::pcb::layer::Side;

/// Top-level board description document; mirrors the data model so a board
/// round-trips through JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardDoc {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_grid_edge")]
    pub grid_edge: f64,
    pub layers: Vec<LayerDoc>,
    pub layout_area: LayoutAreaDoc,
    #[serde(default)]
    pub components: Vec<ComponentDoc>,
    #[serde(default)]
    pub nets: Vec<NetDoc>,
}

fn default_grid_edge() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerDoc {
    pub index: i32,
    #[serde(default = "LayerKindDoc::any")]
    pub kind: LayerKindDoc,
    #[serde(default = "default_side")]
    pub side: Side,
}

fn default_side() -> Side {
    Side::Inner
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKindDoc {
    Signal,
    Power,
    Ground,
    Mixed,
    Any,
}

impl LayerKindDoc {
    fn any() -> Self {
        LayerKindDoc::Any
    }
}

/// Either a bounding rectangle `[x0, y0, x1, y1]` or a polygon outline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LayoutAreaDoc {
    Rect([f64; 4]),
    Polygon(Vec<[f64; 2]>),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlaceDoc {
    pub x: f64,
    pub y: f64,
    pub z: i32,
    #[serde(default)]
    pub angle_deg: f64,
}

/// Pad and footprint geometry. Circles and rectangles are centered on
/// their owner's reference point; segments, polygons and paths carry their
/// own coordinates in the component frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ShapeDoc {
    Circle { r: f64 },
    Rect { w: f64, h: f64 },
    Seg { x0: f64, y0: f64, x1: f64, y1: f64, width: f64 },
    Polygon { pts: Vec<[f64; 2]> },
    Path { pts: Vec<[f64; 2]>, width: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentDoc {
    pub name: String,
    pub place: PlaceDoc,
    pub footprint: ShapeDoc,
    #[serde(default)]
    pub clearance: f64,
    #[serde(default = "default_true")]
    pub can_route_inside: bool,
    #[serde(default = "default_true")]
    pub can_place_vias_inside: bool,
    #[serde(default)]
    pub pins: Vec<PinDoc>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinDoc {
    pub name: String,
    pub shape: ShapeDoc,
    pub at: [f64; 2],
    #[serde(default)]
    pub layers: [i32; 2],
    #[serde(default)]
    pub clearance: f64,
    #[serde(default)]
    pub can_route_inside: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RulesDoc {
    pub trace_width: f64,
    pub via_diameter: f64,
    #[serde(default)]
    pub clearance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetDoc {
    pub name: String,
    /// signal | power | ground | user; inferred from the name when absent.
    #[serde(default)]
    pub signal: Option<String>,
    pub pins: Vec<String>,
    pub rules: RulesDoc,
    #[serde(default)]
    pub layer_mask: Option<u32>,
    /// Two-terminal demands; built as a minimum spanning tree when absent.
    #[serde(default)]
    pub connections: Vec<ConnectionDoc>,
}

/// A pin name `"COMP.PIN"` or a bare 2.5D point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EndpointDoc {
    Pin(String),
    Point([f64; 3]),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDoc {
    pub source: EndpointDoc,
    pub target: EndpointDoc,
    #[serde(default)]
    pub locked: bool,
}

// Routed output.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackDoc {
    pub start: [f64; 3],
    pub end: [f64; 3],
    pub width: f64,
    pub via_diameter: f64,
    pub length: f64,
    /// One `(x0, y0, x1, y1, z, w)` row per wide segment.
    pub segments: Vec<[f64; 6]>,
    /// One `(x, y, zmin, zmax, r)` row per via.
    pub vias: Vec<[f64; 5]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionOut {
    pub net: String,
    pub source: EndpointDoc,
    pub target: EndpointDoc,
    pub is_routed: bool,
    pub locked: bool,
    pub layer_mask: u32,
    pub rules: RulesDoc,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<[u8; 4]>,
    pub tracks: Vec<TrackDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutesDoc {
    pub connections: Vec<ConnectionOut>,
}
