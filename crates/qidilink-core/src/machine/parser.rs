//! Step-parameter response parser
//!
//! The `M4001` response is a single line of space-separated `KEY:VALUE`
//! tokens, for example:
//!
//! ```text
//! X:0.0125 Y:0.0125 Z:0.0025 E:0.0083 T:L4/220/220/250/0 U:'UTF8'
//! ```
//!
//! - `X`, `Y`, `Z`, `E`: distance per step for each axis
//! - `T`: `type/x_max/y_max/z_max/<unused>`
//! - `U`: quoted file name encoding
//!
//! Unknown keys are ignored.

use super::{AxisTravel, MachineConfig};
use crate::protocol::ProtocolError;

/// Parse the printer's step-parameter report
pub fn parse_step_parameters(raw: &str) -> Result<MachineConfig, ProtocolError> {
    let line: String = raw.chars().filter(|c| *c != '\r' && *c != '\n').collect();

    let mut x = None;
    let mut y = None;
    let mut z = None;
    let mut e = None;
    let mut machine_type = None;
    let mut max_travel = None;
    let mut file_encoding = None;

    for token in line.split(' ').filter(|t| !t.is_empty()) {
        let Some((key, value)) = token.split_once(':') else {
            continue;
        };

        match key {
            "X" => x = Some(value.to_string()),
            "Y" => y = Some(value.to_string()),
            "Z" => z = Some(value.to_string()),
            "E" => e = Some(value.to_string()),
            "T" => {
                let fields: Vec<&str> = value.split('/').collect();
                if fields.len() < 4 {
                    return Err(ProtocolError::MalformedResponse(format!(
                        "machine geometry '{}' has {} fields, expected at least 4",
                        value,
                        fields.len()
                    )));
                }
                machine_type = Some(fields[0].to_string());
                max_travel = Some(AxisTravel {
                    x: fields[1].to_string(),
                    y: fields[2].to_string(),
                    z: fields[3].to_string(),
                });
            }
            "U" => {
                file_encoding = Some(value.trim_matches(|c| c == '\'' || c == '"').to_string());
            }
            _ => {}
        }
    }

    match (x, y, z) {
        (Some(x), Some(y), Some(z)) => Ok(MachineConfig {
            x_mm_per_step: x,
            y_mm_per_step: y,
            z_mm_per_step: z,
            e_mm_per_step: e,
            machine_type,
            max_travel,
            file_encoding,
        }),
        (x, y, z) => {
            let missing: Vec<&str> = [("X", x.is_none()), ("Y", y.is_none()), ("Z", z.is_none())]
                .iter()
                .filter(|(_, absent)| *absent)
                .map(|(axis, _)| *axis)
                .collect();
            Err(ProtocolError::MalformedResponse(format!(
                "step parameters missing {} in '{}'",
                missing.join("/"),
                line.trim()
            )))
        }
    }
}
