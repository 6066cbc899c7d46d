use enumset::{EnumSet, EnumSetType};
use serde::{Deserialize, Serialize};
use strum::Display;

/// Electrical role of a net or a layer. A layer may serve several roles,
/// hence the set type.
#[derive(EnumSetType, Debug, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SignalKind {
    Signal,
    Power,
    Ground,
    User,
}

pub type SignalType = EnumSet<SignalKind>;

#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Side {
    Top,
    Bottom,
    Inner,
}

/// One copper layer of the stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub index: i32,
    pub kind: SignalType,
    pub side: Side,
}

impl Layer {
    pub fn new(index: i32, kind: SignalType, side: Side) -> Self {
        Self { index, kind, side }
    }

    pub fn has_type(&self, t: SignalType) -> bool {
        !self.kind.is_disjoint(t)
    }
}

pub fn ranges_overlap(z0: i32, z1: i32, w0: i32, w1: i32) -> bool {
    z1 >= w0 && z0 <= w1
}
