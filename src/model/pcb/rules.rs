use serde::{Deserialize, Serialize};

/// Net design rules: clearance to other-net copper, default trace width
/// and via drill diameter.
#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignRules {
    pub clearance: f64,
    pub trace_width: f64,
    pub via_diameter: f64,
}

impl DesignRules {
    pub const fn new(clearance: f64, trace_width: f64, via_diameter: f64) -> Self {
        Self { clearance, trace_width, via_diameter }
    }

    pub fn via_radius(&self) -> f64 {
        self.via_diameter * 0.5
    }

    pub fn max(&self, rules: &DesignRules) -> DesignRules {
        DesignRules {
            clearance: self.clearance.max(rules.clearance),
            trace_width: self.trace_width.max(rules.trace_width),
            via_diameter: self.via_diameter.max(rules.via_diameter),
        }
    }
}
