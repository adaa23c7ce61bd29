//! Session management
//!
//! Owns the transport and the machine configuration, and exposes the
//! operations a caller performs against one printer.

use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use std::net::{IpAddr, UdpSocket};
use std::ops::ControlFlow;
use std::path::Path;
use std::time::Duration;

use super::{
    commands::{self, Command},
    transport::{DatagramSocket, Transport},
    upload::{Upload, UploadProgress, UploadStep, UploadSummary},
    ProtocolError, CHUNK_SIZE, DEFAULT_PORT, DEFAULT_SETTLE_DELAY_MS, DEFAULT_TIMEOUT_MS,
};
use crate::machine::{parse_step_parameters, MachineConfig};

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Printer IP address
    pub host: String,
    /// Printer UDP port
    pub port: u16,
    /// Response timeout in milliseconds
    pub timeout_ms: u64,
    /// Wait after begin-write before the first chunk, in milliseconds.
    /// Device and firmware dependent.
    pub settle_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
        }
    }
}

impl SessionConfig {
    /// Configuration for `host` with default port and timings
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        let config: SessionConfig = serde_json::from_str(json)
            .map_err(|e| ProtocolError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn load(path: &Path) -> Result<Self, ProtocolError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Check the configuration before opening a socket
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.host.trim().is_empty() {
            return Err(ProtocolError::InvalidConfig("host is empty".to_string()));
        }
        if self.host.trim().parse::<IpAddr>().is_err() {
            return Err(ProtocolError::InvalidConfig(format!(
                "host '{}' is not an IP address",
                self.host
            )));
        }
        if self.timeout_ms == 0 {
            return Err(ProtocolError::InvalidConfig(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Response timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Settling delay after begin-write
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Fill `buf` from `source`, stopping early only at end of input
fn read_chunk<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Close the storage file after a chunk could not be sent
///
/// Errors already reported as `UploadFailed` pass through unchanged. Anything
/// else (a chunk the upload refused before sending) leaves the printer with
/// an open file, so it is closed and the error wrapped with the bytes sent.
fn abort_stream<S: DatagramSocket>(
    upload: &mut Upload<'_, S>,
    error: ProtocolError,
) -> ProtocolError {
    if matches!(error, ProtocolError::UploadFailed { .. }) {
        return error;
    }

    let bytes_sent = upload.bytes_sent();
    tracing::warn!(bytes_sent, "chunk rejected: {}", error);
    if let Err(close_err) = upload.end() {
        tracing::warn!("closing storage file failed: {}", close_err);
    }
    ProtocolError::UploadFailed {
        step: UploadStep::Stream,
        bytes_sent,
        source: Box::new(error),
    }
}

/// A conversation with one printer
pub struct Session<S: DatagramSocket = UdpSocket> {
    /// Request/response transport
    transport: Transport<S>,
    /// Session configuration
    config: SessionConfig,
    /// Machine parameters, once read from the printer
    machine: Option<MachineConfig>,
}

impl Session<UdpSocket> {
    /// Open a UDP session to the configured printer
    pub fn connect(config: SessionConfig) -> Result<Self, ProtocolError> {
        config.validate()?;
        let transport = Transport::connect(&config.host, config.port, config.timeout())?;
        Ok(Self::with_transport(transport, config))
    }
}

impl<S: DatagramSocket> Session<S> {
    /// Build a session over an existing transport
    pub fn with_transport(transport: Transport<S>, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            machine: None,
        }
    }

    /// Close the transport. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        self.transport.disconnect();
    }

    /// Check whether the transport is still open
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Borrow the underlying transport
    pub fn transport(&self) -> &Transport<S> {
        &self.transport
    }

    /// Machine parameters, if [`Session::query_step_parameters`] has succeeded
    pub fn machine_config(&self) -> Option<&MachineConfig> {
        self.machine.as_ref()
    }

    /// Machine parameters, or `NotConfigured`
    pub fn require_machine_config(&self) -> Result<&MachineConfig, ProtocolError> {
        self.machine.as_ref().ok_or(ProtocolError::NotConfigured)
    }

    /// Send a bare command and return the response text
    pub fn query(&mut self, command: Command) -> Result<String, ProtocolError> {
        self.transport
            .send_text(command.code(), command.expects_response())
    }

    /// Device identification and firmware banner (`M115`)
    pub fn query_device_info(&mut self) -> Result<String, ProtocolError> {
        self.query(Command::DeviceInfo)
    }

    /// Firmware version (`M4002`)
    pub fn query_firmware(&mut self) -> Result<String, ProtocolError> {
        self.query(Command::Firmware)
    }

    /// Build plate information (`M4000`)
    pub fn query_bed_info(&mut self) -> Result<String, ProtocolError> {
        self.query(Command::BedInfo)
    }

    /// Nozzle and bed temperatures (`M105`)
    pub fn query_temperature(&mut self) -> Result<String, ProtocolError> {
        self.query(Command::Temperature)
    }

    /// Network settings (`M99999`)
    pub fn query_wifi_info(&mut self) -> Result<String, ProtocolError> {
        self.query(Command::WifiInfo)
    }

    /// Progress of the current print (`M27`)
    pub fn query_printing_status(&mut self) -> Result<String, ProtocolError> {
        self.query(Command::PrintingStatus)
    }

    /// Endstop and machine status (`M119`)
    pub fn query_machine_status(&mut self) -> Result<String, ProtocolError> {
        self.query(Command::MachineStatus)
    }

    /// Current head position (`M114`)
    pub fn query_position(&mut self) -> Result<String, ProtocolError> {
        self.query(Command::CurrentPosition)
    }

    /// Files on the printer's storage (`M20`), as raw text
    pub fn list_files(&mut self) -> Result<String, ProtocolError> {
        self.query(Command::ListFiles)
    }

    /// Read axis resolutions and build volume, storing them in the session
    pub fn query_step_parameters(&mut self) -> Result<&MachineConfig, ProtocolError> {
        let raw = self.query(Command::StepParameters)?;
        let machine = parse_step_parameters(&raw)?;
        tracing::info!("machine configuration: {}", machine);
        Ok(&*self.machine.insert(machine))
    }

    /// Remove a file from the printer's storage
    pub fn delete_file(&mut self, device_file_name: &str) -> Result<String, ProtocolError> {
        self.transport
            .send_text(&commands::delete_file(device_file_name), true)
    }

    /// Print a file already stored on the printer
    pub fn start_print(&mut self, device_file_name: &str) -> Result<String, ProtocolError> {
        tracing::info!(file = device_file_name, "starting print");
        self.transport
            .send_text(&commands::start_print(device_file_name), true)
    }

    /// Power the printer off. No response is awaited.
    pub fn power_off(&mut self) -> Result<(), ProtocolError> {
        tracing::info!("powering printer off");
        self.query(Command::PowerOff).map(|_| ())
    }

    /// Upload `source` to the printer's storage as `device_file_name`
    pub fn send_file<R: Read>(
        &mut self,
        source: R,
        device_file_name: &str,
    ) -> Result<UploadSummary, ProtocolError> {
        self.send_file_with_progress(source, device_file_name, |_| ControlFlow::Continue(()))
    }

    /// Upload `source`, reporting progress after every acknowledged chunk
    ///
    /// Returning `ControlFlow::Break` from `on_progress` stops the transfer
    /// between chunks; the storage file is closed and `Cancelled` returned.
    pub fn send_file_with_progress<R, F>(
        &mut self,
        mut source: R,
        device_file_name: &str,
        mut on_progress: F,
    ) -> Result<UploadSummary, ProtocolError>
    where
        R: Read,
        F: FnMut(UploadProgress) -> ControlFlow<()>,
    {
        self.require_machine_config()?;
        if !self.transport.is_connected() {
            return Err(ProtocolError::NotConnected);
        }
        if device_file_name.trim().is_empty() {
            return Err(ProtocolError::InvalidConfig(
                "device file name is empty".to_string(),
            ));
        }

        tracing::info!(file = device_file_name, "starting upload");
        let mut upload = Upload::new(&mut self.transport, self.config.settle_delay());
        upload.begin(device_file_name)?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut offset: u64 = 0;
        loop {
            let n = match read_chunk(&mut source, &mut buffer) {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!("reading upload source failed: {}", e);
                    // Leave the printer with a closed file rather than an open one
                    if let Err(close_err) = upload.end() {
                        tracing::warn!("closing storage file failed: {}", close_err);
                    }
                    return Err(ProtocolError::IoError(e));
                }
            };
            if n == 0 {
                break;
            }

            if let Err(e) = upload.stream_chunk(&buffer[..n], offset) {
                return Err(abort_stream(&mut upload, e));
            }
            offset += n as u64;

            if on_progress(upload.progress()).is_break() {
                let bytes_sent = upload.bytes_sent();
                tracing::warn!(bytes_sent, "upload cancelled by caller");
                upload.end()?;
                return Err(ProtocolError::Cancelled { bytes_sent });
            }

            if n < CHUNK_SIZE {
                break;
            }
        }

        upload.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::testing::ScriptedSocket;
    use crate::protocol::Frame;
    use pretty_assertions::assert_eq;

    const REPORT: &str = "X:0.0125 Y:0.0125 Z:0.0025 E:0.0083 T:L4/220/220/250/0 U:'UTF8'\r\n";

    fn session(socket: ScriptedSocket) -> Session<ScriptedSocket> {
        let config = SessionConfig {
            settle_delay_ms: 0,
            ..SessionConfig::new("192.168.1.50")
        };
        Session::with_transport(Transport::from_socket(socket), config)
    }

    fn acks(socket: ScriptedSocket, count: usize) -> ScriptedSocket {
        (0..count).fold(socket, |s, _| s.reply("ok"))
    }

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.settle_delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_config_from_json_fills_defaults() {
        let config = SessionConfig::from_json_str(r#"{ "host": "10.0.0.7", "settle_delay_ms": 500 }"#)
            .unwrap();
        assert_eq!(config.host, "10.0.0.7");
        assert_eq!(config.port, 3000);
        assert_eq!(config.settle_delay_ms, 500);
    }

    #[test]
    fn test_config_validation() {
        assert!(SessionConfig::default().validate().is_err());
        assert!(SessionConfig::new("printer.local").validate().is_err());
        let zero_timeout = SessionConfig {
            timeout_ms: 0,
            ..SessionConfig::new("10.0.0.7")
        };
        assert!(matches!(
            zero_timeout.validate(),
            Err(ProtocolError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_send_file_requires_machine_config() {
        let mut session = session(ScriptedSocket::new());
        let result = session.send_file(&b"G28"[..], "a.gcode");
        assert!(matches!(result, Err(ProtocolError::NotConfigured)));
        assert!(session.transport().socket().unwrap().sent().is_empty());
    }

    #[test]
    fn test_query_step_parameters_stores_config() {
        let mut session = session(ScriptedSocket::new().reply(REPORT));
        let machine = session.query_step_parameters().unwrap();
        assert_eq!(machine.machine_type.as_deref(), Some("L4"));
        assert!(session.machine_config().is_some());
        assert_eq!(
            session.transport().socket().unwrap().sent(),
            &[b"M4001".to_vec()]
        );
    }

    #[test]
    fn test_bad_step_parameters_leave_session_unconfigured() {
        let mut session = session(ScriptedSocket::new().reply("Error:unknown command"));
        assert!(matches!(
            session.query_step_parameters(),
            Err(ProtocolError::MalformedResponse(_))
        ));
        assert!(session.machine_config().is_none());
    }

    #[test]
    fn test_send_file_chunks_2500_bytes() {
        // step params, begin, 3 chunks, end
        let socket = acks(ScriptedSocket::new().reply(REPORT), 5);
        let mut session = session(socket);
        session.query_step_parameters().unwrap();

        let source: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
        let summary = session.send_file(&source[..], "part.gcode.tz").unwrap();
        assert_eq!(summary.bytes_sent, 2500);
        assert_eq!(summary.chunks, 3);

        let sent = session.transport().socket().unwrap().sent();
        assert_eq!(sent[1], b"M28 part.gcode.tz".to_vec());
        assert_eq!(sent[5], b"M29 part.gcode.tz".to_vec());

        let chunks: Vec<(usize, u32)> = sent[2..5]
            .iter()
            .map(|d| {
                let (payload, offset) = Frame::verify(d).unwrap();
                (payload.len(), offset)
            })
            .collect();
        assert_eq!(chunks, vec![(1024, 0), (1024, 1024), (452, 2048)]);

        let (payload, _) = Frame::verify(&sent[4]).unwrap();
        assert_eq!(payload, &source[2048..]);
    }

    #[test]
    fn test_send_file_exact_multiple_of_chunk() {
        let socket = acks(ScriptedSocket::new().reply(REPORT), 4);
        let mut session = session(socket);
        session.query_step_parameters().unwrap();

        let summary = session.send_file(&[0u8; 2048][..], "a.gcode").unwrap();
        assert_eq!(summary.chunks, 2);
        assert_eq!(session.transport().socket().unwrap().sent().len(), 5);
    }

    #[test]
    fn test_cancel_between_chunks_closes_file() {
        // step params, begin, 1 chunk, end
        let socket = acks(ScriptedSocket::new().reply(REPORT), 3);
        let mut session = session(socket);
        session.query_step_parameters().unwrap();

        let result = session.send_file_with_progress(&[1u8; 4096][..], "a.gcode", |p| {
            if p.chunks >= 1 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert!(matches!(
            result,
            Err(ProtocolError::Cancelled { bytes_sent: 1024 })
        ));

        let sent = session.transport().socket().unwrap().sent();
        assert_eq!(sent.last().unwrap(), &b"M29 a.gcode".to_vec());
    }

    #[test]
    fn test_rejected_chunk_closes_file_and_reports_failure() {
        // begin, one chunk, end
        let mut transport = Transport::from_socket(acks(ScriptedSocket::new(), 3));
        let mut upload = Upload::new(&mut transport, Duration::ZERO);
        upload.begin("big.gcode").unwrap();
        upload.stream_chunk(&[7; 1024], 0).unwrap();

        let offset = u64::from(u32::MAX) + 1;
        let rejected = upload.stream_chunk(&[7; 1024], offset).unwrap_err();
        match abort_stream(&mut upload, rejected) {
            ProtocolError::UploadFailed {
                step,
                bytes_sent,
                source,
            } => {
                assert_eq!(step, UploadStep::Stream);
                assert_eq!(bytes_sent, 1024);
                assert!(matches!(*source, ProtocolError::OffsetOverflow(o) if o == offset));
            }
            other => panic!("Expected upload failure, got {:?}", other),
        }
        drop(upload);

        let sent = transport.socket().unwrap().sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[2], b"M29 big.gcode".to_vec());
    }

    #[test]
    fn test_failed_chunk_is_not_wrapped_twice() {
        let mut transport = Transport::from_socket(acks(ScriptedSocket::new(), 1).timeout());
        let mut upload = Upload::new(&mut transport, Duration::ZERO);
        upload.begin("a.gcode").unwrap();

        let failed = upload.stream_chunk(&[1; 16], 0).unwrap_err();
        match abort_stream(&mut upload, failed) {
            ProtocolError::UploadFailed { source, .. } => {
                assert!(matches!(*source, ProtocolError::Timeout { received: 0 }));
            }
            other => panic!("Expected upload failure, got {:?}", other),
        }
        drop(upload);

        // no end-write attempted on a failed upload
        assert_eq!(transport.socket().unwrap().sent().len(), 2);
    }

    #[test]
    fn test_start_print_and_delete() {
        let socket = ScriptedSocket::new().reply("ok").reply("File deleted:a.gcode");
        let mut session = session(socket);
        session.start_print("a.gcode").unwrap();
        assert_eq!(session.delete_file("a.gcode").unwrap(), "File deleted:a.gcode");

        let sent = session.transport().socket().unwrap().sent();
        assert_eq!(sent[0], b"M6030\":a.gcode\" I1".to_vec());
        assert_eq!(sent[1], b"M30 a.gcode".to_vec());
    }

    #[test]
    fn test_power_off_does_not_wait() {
        let mut session = session(ScriptedSocket::new());
        session.power_off().unwrap();
        assert_eq!(
            session.transport().socket().unwrap().sent(),
            &[b"M4003".to_vec()]
        );
    }

    #[test]
    fn test_queries_use_catalog_codes() {
        let socket = (0..9).fold(ScriptedSocket::new(), |s, _| s.reply("ok"));
        let mut session = session(socket);
        session.query_device_info().unwrap();
        session.query_firmware().unwrap();
        session.query_bed_info().unwrap();
        session.query_temperature().unwrap();
        session.query_wifi_info().unwrap();
        session.query_printing_status().unwrap();
        session.query_machine_status().unwrap();
        session.query_position().unwrap();
        session.list_files().unwrap();

        let sent: Vec<String> = session
            .transport()
            .socket()
            .unwrap()
            .sent()
            .iter()
            .map(|d| String::from_utf8(d.clone()).unwrap())
            .collect();
        assert_eq!(
            sent,
            vec!["M115", "M4002", "M4000", "M105", "M99999", "M27", "M119", "M114", "M20"]
        );
    }

    #[test]
    fn test_disconnected_session() {
        let mut session = session(ScriptedSocket::new());
        session.disconnect();
        session.disconnect();
        assert!(!session.is_connected());
        assert!(matches!(
            session.query_temperature(),
            Err(ProtocolError::NotConnected)
        ));
    }
}
