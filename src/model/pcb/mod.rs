pub mod board;
pub mod component;
pub mod connection;
pub mod layer;
pub mod net;
pub mod pin;
pub mod rules;
pub mod track;

pub use board::{Board, ConnRef};
pub use component::Component;
pub use connection::Connection;
pub use layer::{Layer, Side, SignalKind, SignalType};
pub use net::{LayoutArea, Net, SignalPatterns, TrackValidity};
pub use pin::{Pin, PinRef};
pub use rules::DesignRules;
pub use track::{ContactType, Track, Via};
