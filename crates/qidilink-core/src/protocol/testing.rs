//! Scripted socket for unit tests

use std::collections::VecDeque;
use std::io;

use super::DatagramSocket;

/// Replays canned receives and records every datagram sent
#[derive(Debug, Default)]
pub(crate) struct ScriptedSocket {
    reads: VecDeque<io::Result<Vec<u8>>>,
    sent: Vec<Vec<u8>>,
}

impl ScriptedSocket {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue one datagram to be received
    pub(crate) fn reply(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.reads.push_back(Ok(data.into()));
        self
    }

    /// Queue a read timeout
    pub(crate) fn timeout(mut self) -> Self {
        self.reads
            .push_back(Err(io::Error::new(io::ErrorKind::WouldBlock, "timed out")));
        self
    }

    pub(crate) fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }
}

impl DatagramSocket for ScriptedSocket {
    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        self.sent.push(data.to_vec());
        Ok(data.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // An exhausted script behaves like a silent peer
        match self.reads.pop_front() {
            Some(Ok(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => Err(io::Error::new(io::ErrorKind::WouldBlock, "timed out")),
        }
    }
}
