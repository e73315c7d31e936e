//! Search-box and search-parameter value objects.
//!
//! Both are stored as JSON text columns; `encode`/`decode` are the only
//! conversion points at the storage boundary.

use serde::{Deserialize, Serialize};

use crate::error::{DockingError, Result};

pub const MIN_BOX_SIZE: f64 = 10.0;
pub const MAX_BOX_SIZE: f64 = 50.0;
pub const DEFAULT_BOX_SIZE: f64 = 25.0;

/// Clamp one box edge (Å) into the range the engine searches efficiently.
pub fn clamp_box_size(size: f64) -> f64 {
    if size.is_nan() {
        return DEFAULT_BOX_SIZE;
    }
    size.clamp(MIN_BOX_SIZE, MAX_BOX_SIZE)
}

/// Round to two decimals, the precision used for every box coordinate.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Grid box
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridBoxParams {
    pub center_x: f64,
    pub center_y: f64,
    pub center_z: f64,
    pub size_x: f64,
    pub size_y: f64,
    pub size_z: f64,
}

impl GridBoxParams {
    /// Build a box, clamping every edge into `[MIN_BOX_SIZE, MAX_BOX_SIZE]`.
    pub fn new(center: [f64; 3], size: [f64; 3]) -> Self {
        Self {
            center_x: center[0],
            center_y: center[1],
            center_z: center[2],
            size_x: clamp_box_size(size[0]),
            size_y: clamp_box_size(size[1]),
            size_z: clamp_box_size(size[2]),
        }
    }

    pub fn cube(center: [f64; 3], edge: f64) -> Self {
        Self::new(center, [edge, edge, edge])
    }

    pub fn center(&self) -> [f64; 3] {
        [self.center_x, self.center_y, self.center_z]
    }

    pub fn size(&self) -> [f64; 3] {
        [self.size_x, self.size_y, self.size_z]
    }

    /// Reject NaN or infinite coordinates. They cannot be stored as JSON
    /// numbers and the engine would reject them anyway.
    pub fn validate(&self) -> Result<()> {
        let finite = self.center().iter().chain(self.size().iter()).all(|v| v.is_finite());
        if !finite {
            return Err(DockingError::Validation(format!(
                "grid box values must be finite, got center {:?} size {:?}",
                self.center(),
                self.size()
            )));
        }
        Ok(())
    }

    /// Re-apply the size clamp, e.g. after deserialising client input.
    pub fn clamped(self) -> Self {
        Self::new(self.center(), self.size())
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

// ---------------------------------------------------------------------------
// Docking search parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockingParams {
    #[serde(default = "default_exhaustiveness")]
    pub exhaustiveness: u32,
    #[serde(default = "default_num_modes")]
    pub num_modes: u32,
    #[serde(default = "default_energy_range")]
    pub energy_range: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

fn default_exhaustiveness() -> u32 { 8 }
fn default_num_modes()      -> u32 { 9 }
fn default_energy_range()   -> f64 { 3.0 }

impl Default for DockingParams {
    fn default() -> Self {
        Self {
            exhaustiveness: default_exhaustiveness(),
            num_modes: default_num_modes(),
            energy_range: default_energy_range(),
            cpu: None,
            seed: None,
        }
    }
}

impl DockingParams {
    /// Reject parameter sets the engine would refuse or run for days on.
    pub fn validate(&self) -> Result<()> {
        if !(1..=64).contains(&self.exhaustiveness) {
            return Err(DockingError::Validation(format!(
                "exhaustiveness must be between 1 and 64, got {}",
                self.exhaustiveness
            )));
        }
        if !(1..=50).contains(&self.num_modes) {
            return Err(DockingError::Validation(format!(
                "num_modes must be between 1 and 50, got {}",
                self.num_modes
            )));
        }
        if !self.energy_range.is_finite() || self.energy_range <= 0.0 {
            return Err(DockingError::Validation(format!(
                "energy_range must be positive, got {}",
                self.energy_range
            )));
        }
        if self.cpu == Some(0) {
            return Err(DockingError::Validation("cpu must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
