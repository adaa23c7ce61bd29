//! Datagram transport
//!
//! Send-one, receive-all exchanges with a single printer over UDP.
//!
//! Responses carry no length header. A response is complete when a receive
//! returns fewer than [`RX_BUFFER_SIZE`] bytes; a response that is an exact
//! multiple of the buffer size therefore ends in a receive that only the read
//! timeout can finish, and that surfaces as [`ProtocolError::Timeout`].

use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::Duration;

use super::{ProtocolError, RX_BUFFER_SIZE};

/// A connected, message-oriented socket
pub trait DatagramSocket {
    /// Send one datagram to the connected peer
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Receive one datagram into `buf`, blocking until data or the read timeout
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl DatagramSocket for UdpSocket {
    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        UdpSocket::send(self, data)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        UdpSocket::recv(self, buf)
    }
}

/// Whether an I/O error is the socket's read timeout expiring
fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Short printable preview of a datagram for logs
fn preview(data: &[u8]) -> String {
    const MAX_PREVIEW: usize = 64;
    let shown = &data[..data.len().min(MAX_PREVIEW)];
    if shown.iter().all(|b| b.is_ascii_graphic() || b.is_ascii_whitespace()) {
        String::from_utf8_lossy(shown).trim_end().to_string()
    } else {
        format!("<{} binary bytes>", data.len())
    }
}

/// Request/response transport bound to one peer
pub struct Transport<S = UdpSocket> {
    /// Socket handle, `None` once disconnected
    socket: Option<S>,
    /// Peer address, when known
    peer: Option<SocketAddr>,
    /// Metrics: cumulative bytes/datagrams sent & received
    tx_bytes: u64,
    rx_bytes: u64,
    tx_datagrams: u64,
    rx_datagrams: u64,
}

impl Transport<UdpSocket> {
    /// Open a UDP endpoint connected to `host:port`
    ///
    /// Broadcast is enabled so that subnet broadcast addresses work for
    /// discovery-style queries, and every receive is bounded by `timeout`.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, ProtocolError> {
        let ip: IpAddr = host
            .trim()
            .parse()
            .map_err(|_| ProtocolError::ConnectionFailed(format!("invalid IP address '{}'", host)))?;
        let peer = SocketAddr::new(ip, port);

        let bind_addr: SocketAddr = match ip {
            IpAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
            IpAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
        };

        let socket = UdpSocket::bind(bind_addr).map_err(|e| {
            ProtocolError::ConnectionFailed(format!("failed to bind UDP socket: {}", e))
        })?;
        socket
            .set_broadcast(true)
            .map_err(|e| ProtocolError::ConnectionFailed(format!("failed to enable broadcast: {}", e)))?;
        socket
            .set_read_timeout(Some(timeout))
            .map_err(|e| ProtocolError::ConnectionFailed(format!("failed to set timeout: {}", e)))?;
        socket
            .connect(peer)
            .map_err(|e| ProtocolError::ConnectionFailed(format!("failed to connect to {}: {}", peer, e)))?;

        tracing::info!(%peer, timeout_ms = timeout.as_millis() as u64, "UDP transport connected");

        let mut transport = Self::from_socket(socket);
        transport.peer = Some(peer);
        Ok(transport)
    }
}

impl<S: DatagramSocket> Transport<S> {
    /// Wrap an already connected socket
    pub fn from_socket(socket: S) -> Self {
        Self {
            socket: Some(socket),
            peer: None,
            tx_bytes: 0,
            rx_bytes: 0,
            tx_datagrams: 0,
            rx_datagrams: 0,
        }
    }

    /// Close the socket. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if self.socket.take().is_some() {
            tracing::info!(peer = ?self.peer, "UDP transport disconnected");
        }
    }

    /// Check whether the socket is still open
    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// Peer address, if the transport was opened with [`Transport::connect`]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Borrow the underlying socket
    pub fn socket(&self) -> Option<&S> {
        self.socket.as_ref()
    }

    /// Get cumulative tx/rx bytes and datagram counters
    pub fn get_counters(&self) -> (u64, u64, u64, u64) {
        (
            self.tx_bytes,
            self.rx_bytes,
            self.tx_datagrams,
            self.rx_datagrams,
        )
    }

    /// Send `payload` and, if `expect_response`, collect the whole response
    ///
    /// Returns an empty vector when no response is expected.
    pub fn send_and_receive(
        &mut self,
        payload: &[u8],
        expect_response: bool,
    ) -> Result<Vec<u8>, ProtocolError> {
        let socket = self.socket.as_mut().ok_or(ProtocolError::NotConnected)?;

        tracing::debug!(bytes = payload.len(), "send {}", preview(payload));
        socket.send(payload)?;
        self.tx_bytes = self.tx_bytes.saturating_add(payload.len() as u64);
        self.tx_datagrams = self.tx_datagrams.saturating_add(1);

        if !expect_response {
            return Ok(Vec::new());
        }

        let mut response = Vec::new();
        let mut buffer = [0u8; RX_BUFFER_SIZE];
        loop {
            let n = match socket.recv(&mut buffer) {
                Ok(n) => n,
                Err(e) if is_timeout(&e) => {
                    tracing::warn!(received = response.len(), "receive timed out");
                    return Err(ProtocolError::Timeout {
                        received: response.len(),
                    });
                }
                Err(e) => return Err(ProtocolError::IoError(e)),
            };

            response.extend_from_slice(&buffer[..n]);
            self.rx_datagrams = self.rx_datagrams.saturating_add(1);
            self.rx_bytes = self.rx_bytes.saturating_add(n as u64);

            // A short read ends the message
            if n < RX_BUFFER_SIZE {
                break;
            }
        }

        tracing::debug!(bytes = response.len(), "receive {}", preview(&response));
        Ok(response)
    }

    /// Send a text command and decode the response as lossy UTF-8
    pub fn send_text(&mut self, line: &str, expect_response: bool) -> Result<String, ProtocolError> {
        let response = self.send_and_receive(line.as_bytes(), expect_response)?;
        Ok(String::from_utf8_lossy(&response).into_owned())
    }
}
