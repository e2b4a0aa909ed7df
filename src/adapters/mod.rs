//! Transport backends.
//!
//! A backend moves bytes for exactly one physical or logical connection type.
//! Every backend implements [`Transport`]; the [`crate::instrument::Instrument`]
//! owning it adds connection-state checks, tracing and error context on top.
//!
//! | Backend | Address forms | Notes |
//! |---|---|---|
//! | [`TcpAdapter`] | `TCPIP0::host::5025::SOCKET`, `TCPIP0::host::INSTR`, `host:port` | default, line oriented |
//! | [`SerialAdapter`] | `/dev/ttyUSB0`, `COM3`, `ASRL/dev/ttyUSB0::INSTR` | feature `instrument_serial` |
//! | [`VisaAdapter`] | any VISA resource string | feature `instrument_visa` |
//! | [`FrameAdapter`] | `host:port` | binary command frames, all work done in `query` |
//! | [`MockTransport`] | anything | scripted responses for tests |

use crate::error::TransportError;
use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

pub mod frame_adapter;
pub mod mock_adapter;
#[cfg(feature = "instrument_serial")]
pub mod serial_adapter;
pub mod tcp_adapter;
#[cfg(feature = "instrument_visa")]
pub mod visa_adapter;

pub use frame_adapter::{FrameAdapter, FrameCommand, FrameField};
pub use mock_adapter::{MockCall, MockHandle, MockTransport};
#[cfg(feature = "instrument_serial")]
pub use serial_adapter::SerialAdapter;
pub use tcp_adapter::TcpAdapter;
#[cfg(feature = "instrument_visa")]
pub use visa_adapter::VisaAdapter;

/// Default time a backend waits for a response line.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Connection object for one physical protocol.
///
/// # Contract
/// - `connect` establishes the session. It returns `Ok(false)` or an error on
///   failure; either way the backend is left disconnected.
/// - `disconnect` is idempotent and always succeeds.
/// - `write` is fire-and-forget and fails if the backend is not connected.
/// - `read` blocks until a response arrives or the backend's timeout fires.
/// - `query` is one write-then-read turnaround. It takes `&mut self` for the
///   whole round trip, so nothing can interleave between the two halves.
/// - `is_connected` reflects the live session, it is never a cached guess.
pub trait Transport: Send {
    /// Opens the session to `address`.
    fn connect(&mut self, address: &str) -> Result<bool, TransportError>;

    /// Releases the session. Safe to call when already disconnected.
    fn disconnect(&mut self);

    /// Sends one command.
    fn write(&mut self, command: &str) -> Result<(), TransportError>;

    /// Reads one response.
    fn read(&mut self) -> Result<String, TransportError>;

    /// Sends `command` and reads its response as a single operation.
    fn query(&mut self, command: &str) -> Result<String, TransportError>;

    /// Whether a session is currently open.
    fn is_connected(&self) -> bool;

    /// Short backend identifier, e.g. `"tcp"`.
    fn adapter_type(&self) -> &str;

    /// Human readable description used in logs.
    fn info(&self) -> String;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self, address: &str) -> Result<bool, TransportError> {
        (**self).connect(address)
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        (**self).write(command)
    }

    fn read(&mut self) -> Result<String, TransportError> {
        (**self).read()
    }

    fn query(&mut self, command: &str) -> Result<String, TransportError> {
        (**self).query(command)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn adapter_type(&self) -> &str {
        (**self).adapter_type()
    }

    fn info(&self) -> String {
        (**self).info()
    }
}

/// Reads from `reader` until `terminator` is seen or `timeout` elapses.
///
/// Bytes received after the terminator stay in `pending` for the next call.
/// The returned line has the terminator removed and surrounding whitespace
/// trimmed. Short per-read timeouts on the underlying port are retried until
/// the overall deadline.
pub(crate) fn read_line<R: Read + ?Sized>(
    reader: &mut R,
    pending: &mut Vec<u8>,
    terminator: &[u8],
    timeout: Duration,
) -> Result<String, TransportError> {
    let deadline = Instant::now() + timeout;
    let mut chunk = [0u8; 256];

    loop {
        if let Some(pos) = find_subsequence(pending, terminator) {
            let line: Vec<u8> = pending.drain(..pos + terminator.len()).collect();
            let text = String::from_utf8_lossy(&line[..pos]);
            return Ok(text.trim().to_string());
        }

        if Instant::now() >= deadline {
            return Err(TransportError::Timeout(timeout));
        }

        match reader.read(&mut chunk) {
            Ok(0) => {
                return Err(TransportError::Io(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                )))
            }
            Ok(n) => pending.extend_from_slice(&chunk[..n]),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => return Err(TransportError::Io(e)),
        }
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
