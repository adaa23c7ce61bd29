//! Upload frame encoding
//!
//! Every chunk of an upload travels as one datagram:
//! - N bytes: Payload (1..=1024)
//! - 4 bytes: File offset of the payload (little-endian)
//! - 1 byte: XOR of all payload and offset bytes
//! - 1 byte: Terminator (0x83)

use byteorder::{ByteOrder, LittleEndian};

use super::{ProtocolError, FRAME_TERMINATOR};

/// Bytes added around the payload: offset, checksum and terminator
pub const FRAME_OVERHEAD: usize = 6;

/// An encoded upload frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Encode a chunk of file data located at `offset`
    pub fn encode(chunk: &[u8], offset: u32) -> Result<Self, ProtocolError> {
        if chunk.is_empty() {
            return Err(ProtocolError::EmptyChunk);
        }

        let mut bytes = Vec::with_capacity(chunk.len() + FRAME_OVERHEAD);
        bytes.extend_from_slice(chunk);

        let mut offset_bytes = [0u8; 4];
        LittleEndian::write_u32(&mut offset_bytes, offset);
        bytes.extend_from_slice(&offset_bytes);

        let checksum = xor_checksum(&bytes);
        bytes.push(checksum);
        bytes.push(FRAME_TERMINATOR);

        Ok(Self { bytes })
    }

    /// Check a received frame and return its payload and offset
    pub fn verify(data: &[u8]) -> Result<(&[u8], u32), ProtocolError> {
        if data.len() <= FRAME_OVERHEAD {
            return Err(ProtocolError::InvalidFrame(format!(
                "{} bytes is too short for a frame",
                data.len()
            )));
        }

        let (body, trailer) = data.split_at(data.len() - 2);
        if trailer[1] != FRAME_TERMINATOR {
            return Err(ProtocolError::InvalidFrame(format!(
                "bad terminator {:#04x}",
                trailer[1]
            )));
        }

        let expected = xor_checksum(body);
        if trailer[0] != expected {
            return Err(ProtocolError::ChecksumMismatch {
                expected,
                actual: trailer[0],
            });
        }

        let (payload, offset_bytes) = body.split_at(body.len() - 4);
        Ok((payload, LittleEndian::read_u32(offset_bytes)))
    }

    /// The datagram bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length of the chunk carried by this frame
    pub fn payload_len(&self) -> usize {
        self.bytes.len() - FRAME_OVERHEAD
    }

    /// The checksum byte
    pub fn checksum(&self) -> u8 {
        self.bytes[self.bytes.len() - 2]
    }

    /// Consume the frame, returning the datagram bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// XOR-fold of every byte
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ b)
}
