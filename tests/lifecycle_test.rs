//! Instrument Lifecycle Integration Test
//!
//! Verifies the connection state machine of the base instrument:
//! - I/O is refused before connect and after disconnect
//! - connect failures leave the instrument in `Error` and retryable
//! - a failed I/O moves to `Error` without retrying
//! - a command rejected before sending keeps the session
//! - queries are a single backend round trip
//! - dropping the instrument releases the backend

use lab_control::adapters::frame_adapter::{ByteStream, StreamOpener};
use lab_control::adapters::{FrameAdapter, FrameCommand, FrameField, MockCall, MockTransport};
use lab_control::{ConnectionState, Instrument, InstrumentError, TransportError};
use std::io::{Cursor, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn instrument(mock: &MockTransport) -> Instrument {
    Instrument::new("dut", "mock::dut", Box::new(mock.clone()))
}

#[test]
fn test_io_before_connect_is_refused() {
    let mock = MockTransport::new();
    let wire = mock.handle();
    let mut dut = instrument(&mock);

    assert_eq!(dut.state(), ConnectionState::Uninitialized);
    let err = dut.write("*RST").unwrap_err();
    assert!(matches!(
        err,
        InstrumentError::NotConnected { ref instrument, ref command } if instrument == "dut" && command == "*RST"
    ));
    assert!(dut.query("*IDN?").is_err());
    assert!(dut.read().is_err());
    assert!(wire.calls().is_empty(), "nothing reaches the backend");
}

#[test]
fn test_connect_disconnect_round_trip() {
    let mock = MockTransport::new().with_response("*IDN?", "ACME,DUT,1,1.0");
    let wire = mock.handle();
    let mut dut = instrument(&mock);

    dut.connect().unwrap();
    assert_eq!(dut.state(), ConnectionState::Connected);
    assert_eq!(wire.address().as_deref(), Some("mock::dut"));

    // Second connect is a no-op
    dut.connect().unwrap();
    assert_eq!(
        wire.calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Connect(_)))
            .count(),
        1
    );

    assert_eq!(dut.query("*IDN?").unwrap(), "ACME,DUT,1,1.0");

    dut.disconnect();
    dut.disconnect();
    assert_eq!(dut.state(), ConnectionState::Disconnected);
    assert!(!wire.is_connected());
    assert!(matches!(
        dut.write("*CLS"),
        Err(InstrumentError::NotConnected { .. })
    ));
}

#[test]
fn test_connect_failure_then_retry() {
    let mock = MockTransport::new();
    let wire = mock.handle();
    let mut dut = instrument(&mock);

    wire.fail_next_connect("no route to host");
    let err = dut.connect().unwrap_err();
    assert!(matches!(
        err,
        InstrumentError::Transport { ref command, source: TransportError::ConnectFailed { .. }, .. } if command == "connect"
    ));
    assert_eq!(dut.state(), ConnectionState::Error);

    wire.refuse_next_connect();
    assert!(dut.connect().is_err());
    assert_eq!(dut.state(), ConnectionState::Error);

    dut.connect().unwrap();
    assert_eq!(dut.state(), ConnectionState::Connected);
}

#[test]
fn test_io_failure_is_not_retried() {
    let mock = MockTransport::new();
    let wire = mock.handle();
    let mut dut = instrument(&mock);
    dut.connect().unwrap();
    wire.clear();

    wire.fail_next_io("connection reset");
    let err = dut.write(":OUTP ON").unwrap_err();
    assert!(matches!(
        err,
        InstrumentError::Transport { ref instrument, ref command, source: TransportError::Io(_) }
            if instrument == "dut" && command == ":OUTP ON"
    ));
    assert_eq!(dut.state(), ConnectionState::Error);
    assert_eq!(wire.writes(), vec![":OUTP ON"], "sent exactly once");

    // Errored instruments refuse I/O until reconnected
    assert!(matches!(
        dut.write(":OUTP ON"),
        Err(InstrumentError::NotConnected { .. })
    ));
    dut.connect().unwrap();
    dut.write(":OUTP ON").unwrap();
}

#[test]
fn test_lost_session_is_detected() {
    let mock = MockTransport::new();
    let wire = mock.handle();
    let mut dut = instrument(&mock);
    dut.connect().unwrap();

    wire.drop_session();
    assert!(!dut.is_connected());
    assert!(matches!(
        dut.query("MEAS?"),
        Err(InstrumentError::NotConnected { .. })
    ));
    assert_eq!(dut.state(), ConnectionState::Error);
}

#[test]
fn test_query_is_one_round_trip() {
    let mock = MockTransport::new()
        .with_response("MEAS:VOLT?", "1.0")
        .with_latency(Duration::from_millis(5));
    let wire = mock.handle();
    let mut dut = instrument(&mock);
    dut.connect().unwrap();
    wire.clear();

    dut.query("MEAS:VOLT?").unwrap();
    assert_eq!(wire.calls(), vec![MockCall::Query("MEAS:VOLT?".into())]);
}

#[test]
fn test_drop_releases_backend() {
    let mock = MockTransport::new();
    let wire = mock.handle();
    {
        let mut dut = instrument(&mock);
        dut.connect().unwrap();
        assert!(wire.is_connected());
    }
    assert!(!wire.is_connected());
    assert_eq!(wire.calls().last(), Some(&MockCall::Disconnect));
}

#[test]
fn test_wait_blocks() {
    let dut = instrument(&MockTransport::new());
    let start = Instant::now();
    dut.wait(Duration::from_millis(30));
    assert!(start.elapsed() >= Duration::from_millis(30));

    let start = Instant::now();
    dut.wait_seconds(-1.0);
    assert!(start.elapsed() < Duration::from_millis(30));
}

// =============================================================================
// Rejected commands
// =============================================================================

const POSITION_TABLE: &[FrameCommand] = &[FrameCommand {
    code: "gpos",
    request: &[],
    response: &[FrameField::I32],
}];

/// Controller that answers every request from a fixed byte script.
struct ScriptedController {
    replies: Cursor<Vec<u8>>,
    sent: Arc<Mutex<Vec<u8>>>,
}

impl Read for ScriptedController {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.replies.read(buf)
    }
}

impl Write for ScriptedController {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.sent.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_rejected_command_keeps_session() {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&sent);
    let opener: StreamOpener = Box::new(move |_, _| {
        Ok(Box::new(ScriptedController {
            replies: Cursor::new(1500i32.to_le_bytes().to_vec()),
            sent: Arc::clone(&captured),
        }) as Box<dyn ByteStream>)
    });
    let backend = FrameAdapter::with_opener(POSITION_TABLE, opener);
    let mut stage = Instrument::new("stage", "loopback", Box::new(backend));
    stage.connect().unwrap();

    let err = stage.query("zzzz").unwrap_err();
    assert!(matches!(
        err,
        InstrumentError::Transport { source: TransportError::InvalidCommand(_), .. }
    ));
    assert!(stage.query("gpos 5").is_err());
    assert_eq!(stage.state(), ConnectionState::Connected);
    assert!(sent.lock().unwrap().is_empty(), "nothing reaches the wire");

    assert_eq!(stage.query("gpos").unwrap(), "1500");
    assert_eq!(sent.lock().unwrap().as_slice(), b"gpos");
}
