//! Mock transport for testing
//!
//! Implements [`Transport`] without any hardware behind it. It provides:
//! - Scripted responses per command, with a fallback default
//! - One-shot failure injection for connect and I/O
//! - A call log for test verification
//!
//! The transport and its [`MockHandle`] share state, so a test can hand the
//! transport to an instrument and keep inspecting what went over the "wire".

use super::Transport;
use crate::error::TransportError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// One operation observed by a [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `connect(address)`
    Connect(String),
    /// `disconnect()`
    Disconnect,
    /// `write(command)`
    Write(String),
    /// `read()`
    Read,
    /// `query(command)`, logged once for the whole round trip
    Query(String),
}

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    address: Option<String>,
    log: Vec<MockCall>,
    responses: HashMap<String, VecDeque<String>>,
    default_response: String,
    read_queue: VecDeque<String>,
    fail_next_connect: Option<String>,
    refuse_next_connect: bool,
    fail_next_io: Option<String>,
}

impl MockState {
    fn take_io_failure(&mut self) -> Result<(), TransportError> {
        match self.fail_next_io.take() {
            Some(message) => Err(TransportError::Io(std::io::Error::other(message))),
            None => Ok(()),
        }
    }

    fn require_connected(&self) -> Result<(), TransportError> {
        if self.connected {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn response_for(&mut self, command: &str) -> String {
        if let Some(queue) = self.responses.get_mut(command) {
            // The last scripted response repeats once the queue is drained.
            if queue.len() > 1 {
                if let Some(next) = queue.pop_front() {
                    return next;
                }
            }
            if let Some(last) = queue.front() {
                return last.clone();
            }
        }
        self.default_response.clone()
    }
}

/// Scripted in-memory transport
///
/// # Example
///
/// ```
/// use lab_control::adapters::{MockCall, MockTransport, Transport};
///
/// let mut mock = MockTransport::new().with_response("*IDN?", "ACME,M1,42,1.0");
/// let handle = mock.handle();
///
/// mock.connect("mock::smu").unwrap();
/// assert_eq!(mock.query("*IDN?").unwrap(), "ACME,M1,42,1.0");
/// assert_eq!(handle.calls()[1], MockCall::Query("*IDN?".into()));
/// ```
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    latency: Duration,
}

/// Shared view into a [`MockTransport`]'s state.
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    /// Create a new mock transport with an empty script
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            latency: Duration::ZERO,
        }
    }

    /// Script the response for `command`. Repeated calls queue further responses.
    pub fn with_response(self, command: impl Into<String>, response: impl Into<String>) -> Self {
        self.handle().push_response(command, response);
        self
    }

    /// Response returned for commands with no script entry
    pub fn with_default_response(self, response: impl Into<String>) -> Self {
        lock(&self.state).default_response = response.into();
        self
    }

    /// Set simulated latency per operation
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Handle sharing this transport's state
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn pause(&self) {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandle {
    /// Copy of the call log
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.state).log.clone()
    }

    /// Commands sent through `write`, in order
    pub fn writes(&self) -> Vec<String> {
        lock(&self.state)
            .log
            .iter()
            .filter_map(|call| match call {
                MockCall::Write(cmd) => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    /// Commands sent through `query`, in order
    pub fn queries(&self) -> Vec<String> {
        lock(&self.state)
            .log
            .iter()
            .filter_map(|call| match call {
                MockCall::Query(cmd) => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every command that reached the wire, writes and queries interleaved
    pub fn sent(&self) -> Vec<String> {
        lock(&self.state)
            .log
            .iter()
            .filter_map(|call| match call {
                MockCall::Write(cmd) | MockCall::Query(cmd) => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    /// Clear the call log
    pub fn clear(&self) {
        lock(&self.state).log.clear();
    }

    /// Queue a response for `command`
    pub fn push_response(&self, command: impl Into<String>, response: impl Into<String>) {
        lock(&self.state)
            .responses
            .entry(command.into())
            .or_default()
            .push_back(response.into());
    }

    /// Queue a line for the next bare `read`
    pub fn push_read(&self, response: impl Into<String>) {
        lock(&self.state).read_queue.push_back(response.into());
    }

    /// Make the next `connect` fail with an error
    pub fn fail_next_connect(&self, reason: impl Into<String>) {
        lock(&self.state).fail_next_connect = Some(reason.into());
    }

    /// Make the next `connect` report `false` without an error
    pub fn refuse_next_connect(&self) {
        lock(&self.state).refuse_next_connect = true;
    }

    /// Make the next write, read or query fail with an I/O error
    pub fn fail_next_io(&self, reason: impl Into<String>) {
        lock(&self.state).fail_next_io = Some(reason.into());
    }

    /// Simulate the peer dropping the session
    pub fn drop_session(&self) {
        lock(&self.state).connected = false;
    }

    /// Whether the transport currently reports a session
    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    /// Address of the most recent successful connect
    pub fn address(&self) -> Option<String> {
        lock(&self.state).address.clone()
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, address: &str) -> Result<bool, TransportError> {
        self.pause();
        let mut state = lock(&self.state);
        state.log.push(MockCall::Connect(address.to_string()));
        state.connected = false;

        if let Some(reason) = state.fail_next_connect.take() {
            return Err(TransportError::connect_failed(address, reason));
        }
        if std::mem::take(&mut state.refuse_next_connect) {
            return Ok(false);
        }

        state.connected = true;
        state.address = Some(address.to_string());
        debug!("MockTransport connected to {}", address);
        Ok(true)
    }

    fn disconnect(&mut self) {
        let mut state = lock(&self.state);
        state.log.push(MockCall::Disconnect);
        state.connected = false;
    }

    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        self.pause();
        let mut state = lock(&self.state);
        state.require_connected()?;
        state.log.push(MockCall::Write(command.to_string()));
        state.take_io_failure()
    }

    fn read(&mut self) -> Result<String, TransportError> {
        self.pause();
        let mut state = lock(&self.state);
        state.require_connected()?;
        state.log.push(MockCall::Read);
        state.take_io_failure()?;
        let line = match state.read_queue.pop_front() {
            Some(line) => line,
            None => state.default_response.clone(),
        };
        Ok(line)
    }

    fn query(&mut self, command: &str) -> Result<String, TransportError> {
        self.pause();
        let mut state = lock(&self.state);
        state.require_connected()?;
        state.log.push(MockCall::Query(command.to_string()));
        state.take_io_failure()?;
        Ok(state.response_for(command))
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    fn adapter_type(&self) -> &str {
        "mock"
    }

    fn info(&self) -> String {
        format!("MockTransport (latency: {}ms)", self.latency.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_connection() {
        let mut mock = MockTransport::new();
        assert!(!mock.is_connected());

        assert!(mock.connect("mock").unwrap());
        assert!(mock.is_connected());

        mock.disconnect();
        assert!(!mock.is_connected());
    }

    #[test]
    fn test_connect_failure_is_one_shot() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();

        handle.fail_next_connect("no route to host");
        assert!(mock.connect("mock").is_err());
        assert!(!mock.is_connected());

        assert!(mock.connect("mock").unwrap());
        assert!(mock.is_connected());
    }

    #[test]
    fn test_refused_connect_reports_false() {
        let mut mock = MockTransport::new();
        mock.handle().refuse_next_connect();
        assert!(!mock.connect("mock").unwrap());
        assert!(!mock.is_connected());
    }

    #[test]
    fn test_io_requires_connection() {
        let mut mock = MockTransport::new();
        assert!(matches!(mock.write("*RST"), Err(TransportError::NotConnected)));
        assert!(matches!(mock.query("*IDN?"), Err(TransportError::NotConnected)));
        assert!(mock.handle().calls().is_empty());
    }

    #[test]
    fn test_scripted_responses_queue_then_repeat() {
        let mut mock = MockTransport::new()
            .with_response(":MEAS:VOLT?", "1.0")
            .with_response(":MEAS:VOLT?", "2.0")
            .with_default_response("0");
        mock.connect("mock").unwrap();

        assert_eq!(mock.query(":MEAS:VOLT?").unwrap(), "1.0");
        assert_eq!(mock.query(":MEAS:VOLT?").unwrap(), "2.0");
        assert_eq!(mock.query(":MEAS:VOLT?").unwrap(), "2.0");
        assert_eq!(mock.query(":MEAS:CURR?").unwrap(), "0");
    }

    #[test]
    fn test_call_log_records_query_once() {
        let mut mock = MockTransport::new().with_response("*IDN?", "ACME");
        let handle = mock.handle();

        mock.connect("mock").unwrap();
        mock.write("*RST").unwrap();
        mock.query("*IDN?").unwrap();
        mock.disconnect();

        assert_eq!(
            handle.calls(),
            vec![
                MockCall::Connect("mock".into()),
                MockCall::Write("*RST".into()),
                MockCall::Query("*IDN?".into()),
                MockCall::Disconnect,
            ]
        );
        assert_eq!(handle.sent(), vec!["*RST", "*IDN?"]);
    }

    #[test]
    fn test_io_failure_is_one_shot() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.connect("mock").unwrap();

        handle.fail_next_io("cable unplugged");
        assert!(matches!(mock.write(":OUTP ON"), Err(TransportError::Io(_))));
        assert!(mock.write(":OUTP ON").is_ok());
    }

    #[test]
    fn test_bare_read_uses_read_queue() {
        let mut mock = MockTransport::new().with_default_response("idle");
        let handle = mock.handle();
        mock.connect("mock").unwrap();

        handle.push_read("+1.0E+00");
        assert_eq!(mock.read().unwrap(), "+1.0E+00");
        assert_eq!(mock.read().unwrap(), "idle");
    }

    #[test]
    fn test_concurrent_handles_are_safe() {
        let mut mock = MockTransport::new();
        mock.connect("mock").unwrap();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let handle = mock.handle();
                std::thread::spawn(move || handle.push_response(format!("CMD{i}?"), "1"))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for i in 0..8 {
            assert_eq!(mock.query(&format!("CMD{i}?")).unwrap(), "1");
        }
    }
}
