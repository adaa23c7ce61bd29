//! Chunked upload state machine
//!
//! Drives one file transfer into the printer's storage:
//!
//! ```text
//! Idle -> AwaitingBeginAck -> Streaming -> AwaitingEndAck -> Idle
//!   \___________________\___________\______________\______> Failed
//! ```
//!
//! The printer acknowledges every command and every chunk, but has no explicit
//! success code: any response that arrives before the timeout and does not
//! report an error counts as an acknowledgment. A failed upload cannot be
//! resumed; the caller must start again from offset zero.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::{
    commands::{begin_write, end_write},
    transport::{DatagramSocket, Transport},
    Frame, ProtocolError, CHUNK_SIZE,
};

/// Upload state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadState {
    /// No transfer in progress
    Idle,
    /// Begin-write sent, waiting for the printer
    AwaitingBeginAck,
    /// Storage file open, chunks may be sent
    Streaming,
    /// End-write sent, waiting for the printer
    AwaitingEndAck,
    /// Transfer aborted by an error
    Failed,
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadState::Idle => "idle",
            UploadState::AwaitingBeginAck => "awaiting begin acknowledgment",
            UploadState::Streaming => "streaming",
            UploadState::AwaitingEndAck => "awaiting end acknowledgment",
            UploadState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Step of the upload sequence, used to report where a transfer failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStep {
    /// Opening the storage file (`M28`)
    Begin,
    /// Sending a data chunk
    Stream,
    /// Closing the storage file (`M29`)
    End,
}

impl fmt::Display for UploadStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadStep::Begin => "begin-write",
            UploadStep::Stream => "chunk transfer",
            UploadStep::End => "end-write",
        };
        f.write_str(name)
    }
}

/// Bookkeeping for the transfer in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadJob {
    /// Target file name on the printer
    pub file_name: String,
    /// Offset the next chunk is expected at
    pub next_offset: u64,
    /// Payload bytes acknowledged so far
    pub bytes_sent: u64,
    /// Chunks acknowledged so far
    pub chunks: u32,
}

/// Progress snapshot reported after every acknowledged chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    /// Payload bytes acknowledged so far
    pub bytes_sent: u64,
    /// Chunks acknowledged so far
    pub chunks: u32,
}

/// Result of a completed upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSummary {
    /// File name on the printer's storage
    pub file_name: String,
    /// Total payload bytes transferred
    pub bytes_sent: u64,
    /// Number of chunks transferred
    pub chunks: u32,
}

/// Reject responses in which the printer reports an error
fn check_ack(response: &[u8]) -> Result<(), ProtocolError> {
    let text = String::from_utf8_lossy(response);
    let text = text.trim();
    if text
        .get(..5)
        .is_some_and(|head| head.eq_ignore_ascii_case("error"))
    {
        return Err(ProtocolError::MalformedResponse(text.to_string()));
    }
    Ok(())
}

/// Upload state machine over a borrowed transport
pub struct Upload<'t, S: DatagramSocket> {
    transport: &'t mut Transport<S>,
    state: UploadState,
    job: Option<UploadJob>,
    settle_delay: Duration,
}

impl<'t, S: DatagramSocket> Upload<'t, S> {
    /// Create an idle upload. `settle_delay` is waited after the printer
    /// accepts begin-write, before the first chunk is sent.
    pub fn new(transport: &'t mut Transport<S>, settle_delay: Duration) -> Self {
        Self {
            transport,
            state: UploadState::Idle,
            job: None,
            settle_delay,
        }
    }

    /// Get current upload state
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// The transfer in flight, if any
    pub fn job(&self) -> Option<&UploadJob> {
        self.job.as_ref()
    }

    /// Payload bytes acknowledged so far
    pub fn bytes_sent(&self) -> u64 {
        self.job.as_ref().map(|j| j.bytes_sent).unwrap_or(0)
    }

    /// Progress of the transfer in flight
    pub fn progress(&self) -> UploadProgress {
        UploadProgress {
            bytes_sent: self.bytes_sent(),
            chunks: self.job.as_ref().map(|j| j.chunks).unwrap_or(0),
        }
    }

    fn require(&self, operation: &'static str, state: UploadState) -> Result<(), ProtocolError> {
        if self.state != state {
            return Err(ProtocolError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    fn fail(&mut self, step: UploadStep, source: ProtocolError) -> ProtocolError {
        let bytes_sent = self.bytes_sent();
        tracing::warn!(%step, bytes_sent, "upload failed: {}", source);
        self.state = UploadState::Failed;
        ProtocolError::UploadFailed {
            step,
            bytes_sent,
            source: Box::new(source),
        }
    }

    /// Open `file_name` for writing on the printer's storage
    pub fn begin(&mut self, file_name: &str) -> Result<(), ProtocolError> {
        self.require("begin upload", UploadState::Idle)?;

        self.state = UploadState::AwaitingBeginAck;
        self.job = Some(UploadJob {
            file_name: file_name.to_string(),
            next_offset: 0,
            bytes_sent: 0,
            chunks: 0,
        });

        let line = begin_write(file_name);
        let ack = self
            .transport
            .send_and_receive(line.as_bytes(), true)
            .and_then(|response| check_ack(&response));
        if let Err(e) = ack {
            return Err(self.fail(UploadStep::Begin, e));
        }

        self.state = UploadState::Streaming;
        tracing::info!(file = file_name, "printer accepted begin-write");

        // The printer gives no ready signal after opening the file
        if !self.settle_delay.is_zero() {
            tracing::debug!(
                delay_ms = self.settle_delay.as_millis() as u64,
                "waiting for printer to open file"
            );
            std::thread::sleep(self.settle_delay);
        }
        Ok(())
    }

    /// Send one chunk of the file located at `offset`
    ///
    /// Chunks must arrive in order: `offset` has to equal the end of the
    /// previous chunk and be a multiple of [`CHUNK_SIZE`], so only the last
    /// chunk of a file may be short.
    ///
    /// Usage errors (empty or oversized chunk, offset beyond 32 bits, offset
    /// out of sequence) are rejected before anything is sent and leave the
    /// state unchanged.
    pub fn stream_chunk(&mut self, chunk: &[u8], offset: u64) -> Result<(), ProtocolError> {
        self.require("stream chunk", UploadState::Streaming)?;

        if chunk.len() > CHUNK_SIZE {
            return Err(ProtocolError::InvalidFrame(format!(
                "chunk of {} bytes exceeds {} byte limit",
                chunk.len(),
                CHUNK_SIZE
            )));
        }
        let wire_offset = u32::try_from(offset).map_err(|_| ProtocolError::OffsetOverflow(offset))?;

        let expected = self.job.as_ref().map(|j| j.next_offset).unwrap_or(0);
        if offset != expected || offset % CHUNK_SIZE as u64 != 0 {
            return Err(ProtocolError::InvalidFrame(format!(
                "chunk offset {} out of sequence, expected {}{}",
                offset,
                expected,
                if expected % CHUNK_SIZE as u64 != 0 {
                    " after a short final chunk"
                } else {
                    ""
                }
            )));
        }

        let frame = Frame::encode(chunk, wire_offset)?;

        let ack = self
            .transport
            .send_and_receive(frame.as_bytes(), true)
            .and_then(|response| check_ack(&response));
        if let Err(e) = ack {
            return Err(self.fail(UploadStep::Stream, e));
        }

        if let Some(job) = self.job.as_mut() {
            job.bytes_sent += chunk.len() as u64;
            job.next_offset = offset + chunk.len() as u64;
            job.chunks += 1;
            tracing::trace!(offset, len = chunk.len(), total = job.bytes_sent, "chunk acknowledged");
        }
        Ok(())
    }

    /// Close the storage file, completing the transfer
    pub fn end(&mut self) -> Result<UploadSummary, ProtocolError> {
        self.require("end upload", UploadState::Streaming)?;

        let job = self.job.clone().ok_or(ProtocolError::InvalidState {
            operation: "end upload",
            state: self.state,
        })?;

        self.state = UploadState::AwaitingEndAck;
        let line = end_write(&job.file_name);
        let ack = self
            .transport
            .send_and_receive(line.as_bytes(), true)
            .and_then(|response| check_ack(&response));
        if let Err(e) = ack {
            return Err(self.fail(UploadStep::End, e));
        }

        self.state = UploadState::Idle;
        self.job = None;
        tracing::info!(
            file = %job.file_name,
            bytes = job.bytes_sent,
            chunks = job.chunks,
            "upload complete"
        );

        Ok(UploadSummary {
            file_name: job.file_name,
            bytes_sent: job.bytes_sent,
            chunks: job.chunks,
        })
    }
}
