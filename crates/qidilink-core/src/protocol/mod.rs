//! Printer Network Protocol
//!
//! Implements the UDP command protocol spoken by QIDI printers' network module.
//!
//! Text commands are G-code style lines (`M4001`, `M28 name`); file uploads are
//! binary frames carrying 1 KiB of payload, its offset and an XOR checksum.

pub mod commands;
mod error;
mod frame;
pub mod session;
pub mod transport;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

pub use commands::Command;
pub use error::ProtocolError;
pub use frame::{xor_checksum, Frame, FRAME_OVERHEAD};
pub use session::{Session, SessionConfig};
pub use transport::{DatagramSocket, Transport};
pub use upload::{Upload, UploadJob, UploadProgress, UploadState, UploadStep, UploadSummary};

/// Default UDP port of the printer's network module
pub const DEFAULT_PORT: u16 = 3000;

/// Default timeout for responses in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default wait after begin-write before streaming, in milliseconds
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 3000;

/// Size of each receive; a shorter read ends a response
pub const RX_BUFFER_SIZE: usize = 256;

/// Payload bytes per upload frame
pub const CHUNK_SIZE: usize = 1024;

/// Last byte of every upload frame
pub const FRAME_TERMINATOR: u8 = 0x83;
