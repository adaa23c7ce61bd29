//! Protocol errors

use thiserror::Error;

use super::upload::{UploadState, UploadStep};

/// Errors that can occur while talking to the printer
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Socket could not be opened or connected
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The transport has been closed
    #[error("Not connected to printer")]
    NotConnected,

    /// No (further) response before the read timeout
    #[error("Timed out waiting for response ({received} bytes received)")]
    Timeout {
        /// Bytes accumulated before the timeout
        received: usize,
    },

    /// Response missing required data or reporting an error
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Zero-length upload chunk
    #[error("Refusing to encode an empty chunk")]
    EmptyChunk,

    /// Chunk offset beyond the 32-bit wire field
    #[error("File offset {0} does not fit in 32 bits")]
    OffsetOverflow(u64),

    /// Chunk frame or chunk sequence is not well formed
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Frame checksum does not match its contents
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// Checksum computed over the frame
        expected: u8,
        /// Checksum carried by the frame
        actual: u8,
    },

    /// Upload attempted before the step parameters were read
    #[error("Machine configuration has not been read from the printer")]
    NotConfigured,

    /// Upload operation called in the wrong state
    #[error("Cannot {operation} while upload is {state}")]
    InvalidState {
        /// Operation that was refused
        operation: &'static str,
        /// State the upload was in
        state: UploadState,
    },

    /// Upload aborted; the transfer must restart from offset zero
    #[error("Upload failed during {step} after {bytes_sent} bytes: {source}")]
    UploadFailed {
        /// Step that failed
        step: UploadStep,
        /// Payload bytes acknowledged before the failure
        bytes_sent: u64,
        /// Underlying error
        #[source]
        source: Box<ProtocolError>,
    },

    /// Upload stopped by the caller's progress callback
    #[error("Upload cancelled after {bytes_sent} bytes")]
    Cancelled {
        /// Payload bytes acknowledged before cancelling
        bytes_sent: u64,
    },

    /// Session configuration or argument rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Socket or upload source I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the error is a receive timeout that a caller may choose to retry
    pub fn is_timeout(&self) -> bool {
        match self {
            ProtocolError::Timeout { .. } => true,
            ProtocolError::UploadFailed { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}
