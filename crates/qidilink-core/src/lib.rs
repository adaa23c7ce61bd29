//! # qidilink Core Library
//!
//! Core functionality for talking to QIDI 3D printers over the network.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - UDP request/response transport with short-read message framing
//! - The printer's command catalog
//! - Machine parameter parsing
//! - Chunked, checksummed file upload to printer storage
//!
//! Compressing G-code into the printer's upload format is done by an external
//! tool; this crate transfers the resulting file verbatim.
//!
//! ## Example
//!
//! ```rust,no_run
//! use qidilink_core::protocol::{Session, SessionConfig};
//! use std::fs::File;
//!
//! # fn main() -> Result<(), qidilink_core::protocol::ProtocolError> {
//! let mut session = Session::connect(SessionConfig::new("192.168.1.50"))?;
//!
//! // Axis resolutions must be known before uploading
//! let machine = session.query_step_parameters()?;
//! println!("{}", machine);
//!
//! let job = File::open("benchy.gcode.tz")?;
//! session.send_file(job, "benchy.gcode.tz")?;
//! session.start_print("benchy.gcode.tz")?;
//! # Ok(())
//! # }
//! ```

pub mod machine;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::machine::{AxisTravel, MachineConfig};
    pub use crate::protocol::{
        Command, ProtocolError, Session, SessionConfig, UploadProgress, UploadState,
        UploadSummary,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
