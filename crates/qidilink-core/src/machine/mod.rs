//! Printer machine parameters
//!
//! The printer reports its axis resolutions and build volume in response to
//! the step-parameter query (`M4001`). Values are kept as the exact tokens the
//! printer sent, since downstream tooling passes them back verbatim.

mod parser;

pub use parser::parse_step_parameters;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum travel per axis, in the printer's own formatting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisTravel {
    /// X axis travel (mm)
    pub x: String,
    /// Y axis travel (mm)
    pub y: String,
    /// Z axis travel (mm)
    pub z: String,
}

/// Machine configuration read from the printer
///
/// X, Y and Z resolutions are always present; a response lacking any of them
/// is rejected by [`parse_step_parameters`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// X axis distance per step (mm)
    pub x_mm_per_step: String,
    /// Y axis distance per step (mm)
    pub y_mm_per_step: String,
    /// Z axis distance per step (mm)
    pub z_mm_per_step: String,
    /// Extruder distance per step (mm)
    pub e_mm_per_step: Option<String>,
    /// Machine type identifier (e.g. "L4")
    pub machine_type: Option<String>,
    /// Build volume
    pub max_travel: Option<AxisTravel>,
    /// Encoding used for file names on the printer's storage
    pub file_encoding: Option<String>,
}

impl MachineConfig {
    /// Resolution for an axis letter (`X`, `Y`, `Z` or `E`)
    pub fn resolution(&self, axis: char) -> Option<&str> {
        match axis.to_ascii_uppercase() {
            'X' => Some(&self.x_mm_per_step),
            'Y' => Some(&self.y_mm_per_step),
            'Z' => Some(&self.z_mm_per_step),
            'E' => self.e_mm_per_step.as_deref(),
            _ => None,
        }
    }

    /// Resolution for an axis as a number, when it parses as one
    pub fn resolution_f64(&self, axis: char) -> Option<f64> {
        self.resolution(axis).and_then(|v| v.parse().ok())
    }
}

impl fmt::Display for MachineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type={} steps(X={} Y={} Z={} E={})",
            self.machine_type.as_deref().unwrap_or("?"),
            self.x_mm_per_step,
            self.y_mm_per_step,
            self.z_mm_per_step,
            self.e_mm_per_step.as_deref().unwrap_or("?"),
        )?;
        if let Some(travel) = &self.max_travel {
            write!(f, " volume={}x{}x{}", travel.x, travel.y, travel.z)?;
        }
        if let Some(encoding) = &self.file_encoding {
            write!(f, " encoding={}", encoding)?;
        }
        Ok(())
    }
}
