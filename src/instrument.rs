//! Base instrument: one owned backend plus a connection state machine.
//!
//! ```text
//! Uninitialized ──connect ok──▶ Connected ──disconnect──▶ Disconnected
//!       │                          │                          │
//!       └──connect failed──▶ Error ◀──I/O failure─────────────┘ (connect failed)
//! ```
//!
//! Every `write`/`read`/`query` checks the state before anything reaches the
//! backend, so a call on a disconnected instrument never produces partial
//! traffic. Backend failures move the instrument to [`ConnectionState::Error`]
//! and are returned as-is; nothing here retries.
//!
//! With tracing enabled, the exact text exchanged is emitted at `debug` on the
//! `lab_control::wire` target.

use crate::adapters::Transport;
use crate::error::{InstrumentError, Result, TransportError};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Target of the per-instrument wire trace.
pub const WIRE_TARGET: &str = "lab_control::wire";

/// Lifecycle state of an [`Instrument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, never connected
    Uninitialized,
    /// Session open
    Connected,
    /// Session closed by `disconnect`
    Disconnected,
    /// Last connect or I/O failed; `connect` may be retried
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionState::Uninitialized => "uninitialized",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        };
        f.write_str(text)
    }
}

/// An addressed instrument owning exactly one transport backend.
pub struct Instrument {
    name: String,
    address: String,
    backend: Box<dyn Transport>,
    state: ConnectionState,
    trace: bool,
}

impl Instrument {
    /// Create an instrument that will reach `address` through `backend`.
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        backend: Box<dyn Transport>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            backend,
            state: ConnectionState::Uninitialized,
            trace: false,
        }
    }

    /// Enable or disable the wire trace
    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.trace = enabled;
        self
    }

    /// Toggle the wire trace on a live instrument.
    pub fn set_trace(&mut self, enabled: bool) {
        self.trace = enabled;
    }

    /// Whether wire tracing is on.
    pub fn trace_enabled(&self) -> bool {
        self.trace
    }

    /// Instrument name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address handed to the backend on connect.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Backend identifier, e.g. `"tcp"`.
    pub fn backend_type(&self) -> &str {
        self.backend.adapter_type()
    }

    /// Backend description.
    pub fn backend_info(&self) -> String {
        self.backend.info()
    }

    /// True only while the state is `Connected` and the backend agrees.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.backend.is_connected()
    }

    /// Open the session. A no-op when already connected.
    ///
    /// On failure the instrument moves to [`ConnectionState::Error`] and stays
    /// usable; calling `connect` again retries from scratch.
    pub fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        match self.backend.connect(&self.address) {
            Ok(true) => {
                self.state = ConnectionState::Connected;
                info!(
                    instrument = %self.name,
                    backend = self.backend.adapter_type(),
                    "Connected to {}",
                    self.address
                );
                Ok(())
            }
            Ok(false) => {
                self.backend.disconnect();
                self.state = ConnectionState::Error;
                warn!(instrument = %self.name, "Backend refused connection to {}", self.address);
                Err(self.transport_error(
                    "connect",
                    TransportError::connect_failed(&self.address, "backend refused the connection"),
                ))
            }
            Err(source) => {
                self.state = ConnectionState::Error;
                warn!(instrument = %self.name, "Connect to {} failed: {}", self.address, source);
                Err(self.transport_error("connect", source))
            }
        }
    }

    /// Close the session. Always succeeds; calling it twice is harmless.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Uninitialized && !self.backend.is_connected() {
            return;
        }
        self.backend.disconnect();
        if self.state != ConnectionState::Disconnected {
            info!(instrument = %self.name, "Disconnected");
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Send one command.
    pub fn write(&mut self, command: &str) -> Result<()> {
        self.ensure_connected(command)?;
        self.wire("> WRITE", command);
        self.backend
            .write(command)
            .map_err(|source| self.io_failed(command, source))
    }

    /// Read one response.
    pub fn read(&mut self) -> Result<String> {
        self.ensure_connected("<read>")?;
        self.wire("> READ", "");
        let response = self
            .backend
            .read()
            .map_err(|source| self.io_failed("<read>", source))?;
        self.wire("< RECV", &response);
        Ok(response)
    }

    /// Send `command` and return its response in one backend round trip.
    pub fn query(&mut self, command: &str) -> Result<String> {
        self.ensure_connected(command)?;
        self.wire("> QUERY", command);
        let response = self
            .backend
            .query(command)
            .map_err(|source| self.io_failed(command, source))?;
        self.wire("< RECV", &response);
        Ok(response)
    }

    /// Block the calling thread for `duration`.
    pub fn wait(&self, duration: Duration) {
        if self.trace {
            debug!(target: WIRE_TARGET, instrument = %self.name, "> WAIT {:?}", duration);
        }
        std::thread::sleep(duration);
    }

    /// [`Instrument::wait`] taking seconds. Negative or non-finite values do not sleep.
    pub fn wait_seconds(&self, seconds: f64) {
        if let Ok(duration) = Duration::try_from_secs_f64(seconds) {
            self.wait(duration);
        }
    }

    fn ensure_connected(&mut self, command: &str) -> Result<()> {
        if self.state == ConnectionState::Connected && !self.backend.is_connected() {
            warn!(instrument = %self.name, "Backend lost its session");
            self.state = ConnectionState::Error;
        }
        if self.is_connected() {
            Ok(())
        } else {
            Err(InstrumentError::NotConnected {
                instrument: self.name.clone(),
                command: command.to_string(),
            })
        }
    }

    fn io_failed(&mut self, command: &str, source: TransportError) -> InstrumentError {
        if source.breaks_session() {
            self.state = ConnectionState::Error;
            warn!(instrument = %self.name, command, "I/O failed: {}", source);
        } else {
            warn!(instrument = %self.name, command, "Command rejected: {}", source);
        }
        self.transport_error(command, source)
    }

    fn transport_error(&self, command: &str, source: TransportError) -> InstrumentError {
        InstrumentError::Transport {
            instrument: self.name.clone(),
            command: command.to_string(),
            source,
        }
    }

    fn wire(&self, direction: &str, text: &str) {
        if self.trace {
            debug!(target: WIRE_TARGET, instrument = %self.name, "{} {:?}", direction, text);
        }
    }
}

impl fmt::Debug for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrument")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("backend", &self.backend.info())
            .field("state", &self.state)
            .field("trace", &self.trace)
            .finish()
    }
}

impl Drop for Instrument {
    fn drop(&mut self) {
        if self.backend.is_connected() {
            debug!(instrument = %self.name, "Releasing backend on drop");
            self.backend.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockCall, MockHandle, MockTransport};
    use tracing_test::traced_test;

    fn mock_instrument(mock: MockTransport) -> (Instrument, MockHandle) {
        let handle = mock.handle();
        (Instrument::new("smu", "mock::smu", Box::new(mock)), handle)
    }

    #[test]
    fn test_starts_uninitialized() {
        let (inst, _) = mock_instrument(MockTransport::new());
        assert_eq!(inst.state(), ConnectionState::Uninitialized);
        assert!(!inst.is_connected());
        assert_eq!(inst.backend_type(), "mock");
    }

    #[test]
    fn test_write_before_connect_is_not_connected() {
        let (mut inst, handle) = mock_instrument(MockTransport::new());
        let err = inst.write(":OUTP ON").unwrap_err();
        assert!(matches!(
            err,
            InstrumentError::NotConnected { ref instrument, ref command }
                if instrument == "smu" && command == ":OUTP ON"
        ));
        assert!(handle.calls().is_empty());
    }

    #[test]
    fn test_connect_and_disconnect_are_idempotent() {
        let (mut inst, handle) = mock_instrument(MockTransport::new());
        inst.connect().unwrap();
        inst.connect().unwrap();
        assert_eq!(inst.state(), ConnectionState::Connected);

        inst.disconnect();
        inst.disconnect();
        assert_eq!(inst.state(), ConnectionState::Disconnected);

        let connects = handle
            .calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Connect(_)))
            .count();
        assert_eq!(connects, 1);
        assert!(matches!(
            inst.write("*RST"),
            Err(InstrumentError::NotConnected { .. })
        ));
    }

    #[test]
    fn test_failed_connect_is_retriable() {
        let (mut inst, handle) = mock_instrument(MockTransport::new());
        handle.fail_next_connect("timeout");

        assert!(matches!(
            inst.connect(),
            Err(InstrumentError::Transport { ref command, .. }) if command == "connect"
        ));
        assert_eq!(inst.state(), ConnectionState::Error);

        inst.connect().unwrap();
        assert_eq!(inst.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_refused_connect_moves_to_error() {
        let (mut inst, handle) = mock_instrument(MockTransport::new());
        handle.refuse_next_connect();
        assert!(inst.connect().is_err());
        assert_eq!(inst.state(), ConnectionState::Error);
    }

    #[test]
    fn test_io_failure_moves_to_error_without_retry() {
        let (mut inst, handle) = mock_instrument(MockTransport::new());
        inst.connect().unwrap();
        handle.fail_next_io("cable pulled");

        let err = inst.query(":MEAS:VOLT?").unwrap_err();
        assert!(matches!(err, InstrumentError::Transport { .. }));
        assert_eq!(inst.state(), ConnectionState::Error);
        assert_eq!(handle.queries(), vec![":MEAS:VOLT?"]);

        assert!(matches!(
            inst.write("*RST"),
            Err(InstrumentError::NotConnected { .. })
        ));
        inst.connect().unwrap();
        inst.write("*RST").unwrap();
    }

    #[test]
    fn test_lost_session_is_detected_before_sending() {
        let (mut inst, handle) = mock_instrument(MockTransport::new());
        inst.connect().unwrap();
        handle.drop_session();

        assert!(matches!(
            inst.write("*CLS"),
            Err(InstrumentError::NotConnected { .. })
        ));
        assert_eq!(inst.state(), ConnectionState::Error);
    }

    #[test]
    fn test_query_is_single_backend_operation() {
        let (mut inst, handle) =
            mock_instrument(MockTransport::new().with_response("*IDN?", "ACME,1,2,3"));
        inst.connect().unwrap();
        handle.clear();

        assert_eq!(inst.query("*IDN?").unwrap(), "ACME,1,2,3");
        assert_eq!(handle.calls(), vec![MockCall::Query("*IDN?".into())]);
    }

    #[test]
    fn test_drop_releases_connected_backend() {
        let (mut inst, handle) = mock_instrument(MockTransport::new());
        inst.connect().unwrap();
        drop(inst);
        assert!(!handle.is_connected());
        assert_eq!(handle.calls().last(), Some(&MockCall::Disconnect));
    }

    #[test]
    fn test_wait_blocks_for_duration() {
        let (inst, _) = mock_instrument(MockTransport::new());
        let start = std::time::Instant::now();
        inst.wait(Duration::from_millis(20));
        assert!(start.elapsed() >= Duration::from_millis(20));
        inst.wait_seconds(-1.0);
    }

    #[test]
    #[traced_test]
    fn test_trace_records_exact_text() {
        let (inst, _) = mock_instrument(MockTransport::new().with_response(":MEAS:VOLT?", "1.5"));
        let mut inst = inst.with_trace(true);
        inst.connect().unwrap();
        inst.write(":SOUR:VOLT 1.5").unwrap();
        inst.query(":MEAS:VOLT?").unwrap();

        assert!(logs_contain("> WRITE \":SOUR:VOLT 1.5\""));
        assert!(logs_contain("> QUERY \":MEAS:VOLT?\""));
        assert!(logs_contain("< RECV \"1.5\""));
    }

    #[test]
    #[traced_test]
    fn test_trace_is_off_by_default() {
        let (mut inst, _) = mock_instrument(MockTransport::new());
        inst.connect().unwrap();
        inst.write(":OUTP OFF").unwrap();
        assert!(!logs_contain("> WRITE"));
    }
}
