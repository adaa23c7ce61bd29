use qidilink_core::protocol::{
    xor_checksum, DatagramSocket, Frame, ProtocolError, Session, SessionConfig, Transport, Upload,
    UploadState, FRAME_TERMINATOR,
};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock datagram socket for testing
struct MockSocket {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    reads: VecDeque<Option<Vec<u8>>>,
    fail_on_send: bool,
}

impl MockSocket {
    fn new() -> (Self, Arc<Mutex<Vec<Vec<u8>>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mock = Self {
            sent: Arc::clone(&sent),
            reads: VecDeque::new(),
            fail_on_send: false,
        };
        (mock, sent)
    }

    fn with_reads(reads: Vec<Option<Vec<u8>>>) -> (Self, Arc<Mutex<Vec<Vec<u8>>>>) {
        let (mut mock, sent) = Self::new();
        mock.reads = reads.into();
        (mock, sent)
    }
}

impl DatagramSocket for MockSocket {
    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.fail_on_send {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "send failed"));
        }
        self.sent.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reads.pop_front().flatten() {
            Some(data) => {
                buf[..data.len()].copy_from_slice(&data);
                Ok(data.len())
            }
            None => Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
        }
    }
}

fn quiet_config() -> SessionConfig {
    SessionConfig {
        settle_delay_ms: 0,
        ..SessionConfig::new("127.0.0.1")
    }
}

#[test]
fn test_response_of_612_bytes() {
    let (mock, _) = MockSocket::with_reads(vec![
        Some(vec![1; 256]),
        Some(vec![2; 256]),
        Some(vec![3; 100]),
    ]);
    let mut transport = Transport::from_socket(mock);
    let response = transport.send_and_receive(b"M20", true).unwrap();
    assert_eq!(response.len(), 612);
}

#[test]
fn test_response_of_512_bytes_then_silence_is_timeout() {
    let (mock, _) = MockSocket::with_reads(vec![Some(vec![1; 256]), Some(vec![2; 256]), None]);
    let mut transport = Transport::from_socket(mock);
    let err = transport.send_and_receive(b"M20", true).unwrap_err();
    assert!(err.is_timeout());
    assert!(matches!(err, ProtocolError::Timeout { received: 512 }));
}

#[test]
fn test_send_failure_is_io_error() {
    let (mut mock, sent) = MockSocket::new();
    mock.fail_on_send = true;
    let mut transport = Transport::from_socket(mock);
    let result = transport.send_text("M105", true);
    assert!(matches!(result, Err(ProtocolError::IoError(_))));
    assert!(sent.lock().unwrap().is_empty());
}

#[test]
fn test_upload_rejects_chunk_before_begin() {
    let (mock, sent) = MockSocket::new();
    let mut transport = Transport::from_socket(mock);
    let mut upload = Upload::new(&mut transport, Duration::ZERO);
    assert!(matches!(
        upload.stream_chunk(b"data", 0),
        Err(ProtocolError::InvalidState { .. })
    ));
    assert_eq!(upload.state(), UploadState::Idle);
    assert!(sent.lock().unwrap().is_empty());
}

#[test]
fn test_frame_trailer() {
    let frame = Frame::encode(b"M104 S200", 4096).unwrap();
    let bytes = frame.as_bytes();
    assert_eq!(bytes[bytes.len() - 1], FRAME_TERMINATOR);
    assert_eq!(bytes[bytes.len() - 2], xor_checksum(&bytes[..bytes.len() - 2]));
}

#[test]
fn test_session_upload_with_mock() {
    let report = b"X:0.0125 Y:0.0125 Z:0.0025 E:0.0083 T:L4/220/220/250/0 U:'UTF8'\r\n".to_vec();
    let mut reads = vec![Some(report)];
    reads.extend((0..5).map(|_| Some(b"ok".to_vec())));
    let (mock, sent) = MockSocket::with_reads(reads);

    let mut session = Session::with_transport(Transport::from_socket(mock), quiet_config());
    session.query_step_parameters().unwrap();
    let summary = session.send_file(&vec![0x5Au8; 2500][..], "job.gcode.tz").unwrap();
    assert_eq!(summary.chunks, 3);

    let sent = sent.lock().unwrap();
    let lengths: Vec<usize> = sent[2..5].iter().map(|f| f.len() - 6).collect();
    assert_eq!(lengths, vec![1024, 1024, 452]);
    let offsets: Vec<u32> = sent[2..5]
        .iter()
        .map(|f| Frame::verify(f).unwrap().1)
        .collect();
    assert_eq!(offsets, vec![0, 1024, 2048]);
}

#[test]
fn test_upload_failure_mid_transfer() {
    let report = b"X:1 Y:1 Z:1".to_vec();
    // step params, begin ack, first chunk ack, then silence
    let reads = vec![Some(report), Some(b"ok".to_vec()), Some(b"ok".to_vec()), None];
    let (mock, _) = MockSocket::with_reads(reads);

    let mut session = Session::with_transport(Transport::from_socket(mock), quiet_config());
    session.query_step_parameters().unwrap();
    let err = session
        .send_file(&vec![0u8; 3000][..], "job.gcode.tz")
        .unwrap_err();

    match err {
        ProtocolError::UploadFailed {
            bytes_sent, source, ..
        } => {
            assert_eq!(bytes_sent, 1024);
            assert!(source.is_timeout());
        }
        other => panic!("Expected upload failure, got {:?}", other),
    }
}

#[test]
fn test_protocol_error_display() {
    let err = ProtocolError::Timeout { received: 0 };
    assert!(!err.to_string().is_empty());
    assert!(ProtocolError::NotConfigured.to_string().contains("Machine configuration"));
}
