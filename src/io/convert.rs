use std::collections::HashMap;

use crate::error::{input_err, Result, RouteError};
use crate::io::doc::{
    BoardDoc, ConnectionDoc, ConnectionOut, EndpointDoc, LayerKindDoc, LayoutAreaDoc, NetDoc,
    PinDoc, RoutesDoc, RulesDoc, ShapeDoc, TrackDoc,
};
use crate::model::geom::tf::Tf;
use crate::model::pcb::board::Board;
use crate::model::pcb::component::Component;
use crate::model::pcb::connection::Connection;
use crate::model::pcb::layer::{Layer, SignalKind, SignalType};
use crate::model::pcb::net::{LayoutArea, Net, SignalPatterns};
use crate::model::pcb::pin::{Pin, PinRef};
use crate::model::pcb::rules::DesignRules;
use crate::model::pcb::track::Track;
use crate::model::primitive::point::{Pt, Pt25};
use crate::model::primitive::polygon::Poly;
use crate::model::primitive::rect::Rt;
use crate::model::primitive::shape::Shape;
use crate::model::primitive::{circ, pt, wseg25};

/// Builds a validated board from a description document, in the order the
/// model wants it: layers, layout area, placed components with pins, nets
/// with rules and connections, then the navigation grid.
pub struct Converter {
    doc: BoardDoc,
    patterns: SignalPatterns,
}

impl Converter {
    pub fn new(doc: BoardDoc) -> Self {
        Self { doc, patterns: SignalPatterns::default() }
    }

    pub fn with_patterns(mut self, patterns: SignalPatterns) -> Self {
        self.patterns = patterns;
        self
    }

    pub fn convert(self) -> Result<Board> {
        let layers = self.layers()?;
        let layout_area = self.layout_area()?;
        let mut board = Board::new(&self.doc.name, layers, layout_area);
        board.signal_patterns = self.patterns.clone();

        let mut seen = HashMap::new();
        for c in &self.doc.components {
            if seen.insert(c.name.clone(), ()).is_some() {
                return Err(RouteError::Input(format!("duplicate component {}", c.name)));
            }
            board.components.push(self.component(c)?);
        }
        for (i, n) in self.doc.nets.iter().enumerate() {
            let net = self.net(n, i as u32, &mut board)?;
            board.nets.push(net);
        }

        board.validate(false)?;
        board.build_grid(self.doc.grid_edge)?;
        board.autocreate_connections()?;
        board.force_connections_to_grid()?;
        Ok(board)
    }

    fn layers(&self) -> Result<Vec<Layer>> {
        let mut layers: Vec<Layer> = self
            .doc
            .layers
            .iter()
            .map(|l| Layer::new(l.index, signal_type_of(l.kind), l.side))
            .collect();
        layers.sort_by_key(|l| l.index);
        if layers.is_empty() {
            return input_err("board must have at least one layer");
        }
        Ok(layers)
    }

    fn layout_area(&self) -> Result<LayoutArea> {
        Ok(match &self.doc.layout_area {
            LayoutAreaDoc::Rect([x0, y0, x1, y1]) => {
                LayoutArea::rect(Rt::new(*x0, *y0, *x1, *y1))
            }
            LayoutAreaDoc::Polygon(pts) => {
                if pts.len() < 3 {
                    return input_err("layout polygon needs at least three vertices");
                }
                let poly = Poly::new(&pts.iter().map(|&[x, y]| pt(x, y)).collect::<Vec<_>>());
                LayoutArea { bounds: poly.bounds(), poly: Some(poly) }
            }
        })
    }

    /// A shape in its owner's frame, centered on `center` for the centered
    /// variants, then placed onto the board.
    fn shape(&self, s: &ShapeDoc, center: Pt, tf: &Tf, z: i32) -> Shape {
        let local = match s {
            ShapeDoc::Circle { r } => Shape::Circle(circ(center, *r)),
            ShapeDoc::Rect { w, h } => Shape::Rect(Rt::new(
                center.x - w * 0.5,
                center.y - h * 0.5,
                center.x + w * 0.5,
                center.y + h * 0.5,
            )),
            ShapeDoc::Seg { x0, y0, x1, y1, width } => {
                Shape::Seg(wseg25(pt(*x0, *y0), pt(*x1, *y1), z, width * 0.5))
            }
            ShapeDoc::Polygon { pts } => {
                Shape::Polygon(Poly::new(&pts.iter().map(|&[x, y]| pt(x, y)).collect::<Vec<_>>()))
            }
            ShapeDoc::Path { pts, width } => {
                Shape::Path(crate::model::primitive::path_shape::Path::new(
                    &pts.iter().map(|&[x, y]| pt(x, y)).collect::<Vec<_>>(),
                    *width,
                ))
            }
        };
        tf.shape(&local)
    }

    fn pin(&self, p: &PinDoc, tf: &Tf) -> Pin {
        let center = tf.pt(pt(p.at[0], p.at[1]));
        let (zmin, zmax) = (p.layers[0].min(p.layers[1]), p.layers[0].max(p.layers[1]));
        Pin {
            name: p.name.clone(),
            shape: self.shape(&p.shape, pt(p.at[0], p.at[1]), tf, zmin),
            center,
            zmin,
            zmax,
            clearance: p.clearance,
            net: None,
            can_route_inside: p.can_route_inside,
        }
    }

    fn component(&self, c: &crate::io::doc::ComponentDoc) -> Result<Component> {
        let tf = Tf::place(pt(c.place.x, c.place.y), c.place.angle_deg);
        let mut pins = Vec::with_capacity(c.pins.len());
        let mut names = HashMap::new();
        for p in &c.pins {
            if names.insert(p.name.clone(), ()).is_some() {
                return Err(RouteError::Input(format!("duplicate pin {}.{}", c.name, p.name)));
            }
            pins.push(self.pin(p, &tf));
        }
        Ok(Component {
            name: c.name.clone(),
            ref_point: pt(c.place.x, c.place.y),
            layer: c.place.z,
            angle_deg: c.place.angle_deg,
            footprint: self.shape(&c.footprint, Pt::zero(), &tf, c.place.z),
            clearance: c.clearance,
            can_route_inside: c.can_route_inside,
            can_place_vias_inside: c.can_place_vias_inside,
            pins,
        })
    }

    fn pin_ref(name: &str) -> Result<PinRef> {
        match name.split_once('.') {
            Some((c, p)) if !c.is_empty() && !p.is_empty() => Ok(PinRef::new(c, p)),
            _ => Err(RouteError::Input(format!("pin reference {name} must be COMPONENT.PIN"))),
        }
    }

    fn endpoint(&self, e: &EndpointDoc, board: &Board) -> Result<(Pt25, Option<PinRef>)> {
        Ok(match e {
            EndpointDoc::Pin(name) => {
                let r = Self::pin_ref(name)?;
                let p = board.pin(&r)?;
                (p.center25(), Some(r))
            }
            EndpointDoc::Point([x, y, z]) => (Pt25::new(*x, *y, *z as i32), None),
        })
    }

    fn net(&self, n: &NetDoc, id: u32, board: &mut Board) -> Result<Net> {
        let mut net = Net::new(&n.name);
        net.signal = match n.signal.as_deref() {
            Some(s) => parse_signal(s)?,
            None => self.patterns.classify(&n.name)?,
        };
        net.set_rules(DesignRules::new(
            n.rules.clearance,
            n.rules.trace_width,
            n.rules.via_diameter,
        ));
        net.set_raw_layer_mask(match n.layer_mask {
            Some(m) => m,
            None => {
                let m = net.layer_mask_from_signal_type(&board.layers);
                if m == 0 { u32::MAX } else { m }
            }
        });
        for p in &n.pins {
            let r = Self::pin_ref(p)?;
            // Attach the pin to its net; a pin belongs to at most one.
            let c = board
                .components
                .iter_mut()
                .find(|c| c.name == r.component)
                .ok_or_else(|| RouteError::Input(format!("unknown component {}", r.component)))?;
            let pin = c
                .pin_mut(&r.pin)
                .ok_or_else(|| RouteError::Input(format!("unknown pin {r}")))?;
            if pin.net.is_some() {
                return Err(RouteError::Input(format!("pin {r} already belongs to a net")));
            }
            pin.net = Some(id);
            net.insert_pin(r);
        }
        net.set_id(id)?;
        for x in &n.connections {
            self.connection(x, &mut net, board)?;
        }
        Ok(net)
    }

    fn connection(&self, x: &ConnectionDoc, net: &mut Net, board: &Board) -> Result<()> {
        let (source, spin) = self.endpoint(&x.source, board)?;
        let (target, tpin) = self.endpoint(&x.target, board)?;
        let conn = net.add_connection(spin, source, tpin, target)?;
        conn.locked = x.locked;
        Ok(())
    }
}

fn signal_type_of(kind: LayerKindDoc) -> SignalType {
    match kind {
        LayerKindDoc::Signal => SignalKind::Signal.into(),
        LayerKindDoc::Power => SignalKind::Power.into(),
        LayerKindDoc::Ground => SignalKind::Ground.into(),
        LayerKindDoc::Mixed => SignalKind::Signal | SignalKind::Power | SignalKind::Ground,
        LayerKindDoc::Any => SignalType::all(),
    }
}

fn parse_signal(s: &str) -> Result<SignalType> {
    Ok(match s {
        "signal" => SignalKind::Signal.into(),
        "power" => SignalKind::Power.into(),
        "ground" => SignalKind::Ground.into(),
        "user" => SignalKind::User.into(),
        "any" => SignalType::all(),
        _ => return Err(RouteError::Input(format!("unknown signal type {s}"))),
    })
}

/// Parse a board from its JSON description.
pub fn board_from_json(json: &str) -> Result<Board> {
    let doc: BoardDoc =
        serde_json::from_str(json).map_err(|e| RouteError::Input(format!("bad board json: {e}")))?;
    Converter::new(doc).convert()
}

fn endpoint_out(v: Pt25, pin: Option<&PinRef>) -> EndpointDoc {
    match pin {
        Some(r) => EndpointDoc::Pin(r.to_string()),
        None => EndpointDoc::Point([v.x, v.y, v.z as f64]),
    }
}

fn track_out(t: &Track) -> TrackDoc {
    TrackDoc {
        start: [t.start().x, t.start().y, t.start().z as f64],
        end: [t.end().x, t.end().y, t.end().z as f64],
        width: t.default_width(),
        via_diameter: t.default_via_diameter(),
        length: t.length(),
        segments: t
            .segments()
            .iter()
            .map(|s| [s.st2().x, s.st2().y, s.en2().x, s.en2().y, s.z() as f64, s.width()])
            .collect(),
        vias: t
            .vias()
            .iter()
            .map(|v| {
                [v.location().x, v.location().y, v.zmin() as f64, v.zmax() as f64, v.radius()]
            })
            .collect(),
    }
}

fn connection_out(net: &Net, x: &Connection) -> ConnectionOut {
    ConnectionOut {
        net: net.name.clone(),
        source: endpoint_out(x.source(), x.source_pin()),
        target: endpoint_out(x.target(), x.target_pin()),
        is_routed: x.is_routed(),
        locked: x.locked,
        layer_mask: x.layer_mask(),
        rules: RulesDoc {
            trace_width: x.rules().trace_width,
            via_diameter: x.rules().via_diameter,
            clearance: x.rules().clearance,
        },
        color: x.color,
        tracks: x.tracks().iter().map(track_out).collect(),
    }
}

/// Serialize every connection's routing state for persistence.
pub fn routes_to_doc(board: &Board) -> RoutesDoc {
    let mut connections = Vec::new();
    for net in &board.nets {
        for x in net.connections() {
            connections.push(connection_out(net, x));
        }
    }
    RoutesDoc { connections }
}

pub fn routes_to_json(board: &Board) -> Result<String> {
    serde_json::to_string_pretty(&routes_to_doc(board))
        .map_err(|e| RouteError::Invariant(format!("route serialization failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOARD_JSON: &str = r#"{
        "name": "t1",
        "grid_edge": 1.0,
        "layers": [
            {"index": 0, "kind": "signal", "side": "top"},
            {"index": 1, "kind": "mixed", "side": "bottom"}
        ],
        "layout_area": [0.0, 0.0, 16.0, 16.0],
        "components": [
            {
                "name": "U1",
                "place": {"x": 2.5, "y": 2.5, "z": 0},
                "footprint": {"kind": "rect", "w": 3.0, "h": 3.0},
                "pins": [
                    {"name": "1", "shape": {"kind": "circle", "r": 0.4}, "at": [0.0, 0.0], "layers": [0, 1]}
                ]
            },
            {
                "name": "U2",
                "place": {"x": 12.5, "y": 12.5, "z": 0},
                "footprint": {"kind": "rect", "w": 3.0, "h": 3.0},
                "pins": [
                    {"name": "1", "shape": {"kind": "circle", "r": 0.4}, "at": [0.0, 0.0], "layers": [0, 1]}
                ]
            }
        ],
        "nets": [
            {
                "name": "GND",
                "pins": ["U1.1", "U2.1"],
                "rules": {"trace_width": 1.0, "via_diameter": 1.0, "clearance": 0.0}
            }
        ]
    }"#;

    #[test]
    fn test_board_from_json() {
        let board = board_from_json(BOARD_JSON).unwrap();
        assert_eq!(board.layers.len(), 2);
        assert_eq!(board.components.len(), 2);
        assert_eq!(board.nets.len(), 1);
        // Signal type inferred from the name.
        assert!(board.nets[0].is_ground_or_power());
        // Connections were auto-created as a spanning tree of the two pins.
        assert_eq!(board.nets[0].num_connections(), 1);
        let x = board.nets[0].connection(0);
        assert!(x.source_pin().is_some() && x.target_pin().is_some());
        assert_eq!(board.grid.geom().size, [16, 16, 2]);
    }

    #[test]
    fn test_routes_round_trip() {
        let board = board_from_json(BOARD_JSON).unwrap();
        let json = routes_to_json(&board).unwrap();
        let doc: RoutesDoc = serde_json::from_str(&json).unwrap();
        assert_eq!(doc.connections.len(), 1);
        assert!(!doc.connections[0].is_routed);
    }

    #[test]
    fn test_rejects_negative_rules() {
        let bad = BOARD_JSON.replace("\"clearance\": 0.0", "\"clearance\": -1.0");
        assert!(matches!(board_from_json(&bad), Err(RouteError::Input(_))));
    }
}
