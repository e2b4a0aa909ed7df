//! Raw-socket SCPI adapter for LAN instruments
//!
//! Provides the default line-oriented backend. Most LXI instruments accept SCPI
//! on a raw TCP socket (port 5025 by convention), so a plain `TcpStream` gives
//! the request/response semantics of a VISA session without a VISA runtime.

use super::{read_line, Transport, DEFAULT_TIMEOUT};
use crate::error::TransportError;
use std::io::Write;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

/// Conventional raw SCPI socket port.
pub const SCPI_SOCKET_PORT: u16 = 5025;

/// Line-oriented TCP adapter.
///
/// Supports addresses like:
/// - `"TCPIP0::192.168.1.100::5025::SOCKET"` (explicit socket resource)
/// - `"TCPIP0::192.168.1.100::INSTR"` (mapped to port 5025)
/// - `"192.168.1.100:5025"` or `"scope.lab.local"`
pub struct TcpAdapter {
    /// Read/connect timeout
    timeout: Duration,

    /// Line terminator appended to commands (typically "\n" for SCPI)
    line_terminator: String,

    /// Terminator that ends a response line
    response_terminator: String,

    stream: Option<TcpStream>,
    peer: Option<String>,
    pending: Vec<u8>,
}

impl TcpAdapter {
    /// Create a new adapter with default settings.
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            line_terminator: "\n".to_string(),
            response_terminator: "\n".to_string(),
            stream: None,
            peer: None,
            pending: Vec::new(),
        }
    }

    /// Set read/connect timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set line terminator for commands
    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    /// Set the terminator that ends a response
    pub fn with_response_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.response_terminator = terminator.into();
        self
    }

    fn stream(&mut self) -> Result<&mut TcpStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }
}

impl Default for TcpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits an address into host and port.
pub fn parse_tcp_address(address: &str) -> Result<(String, u16), TransportError> {
    let address = address.trim();
    let invalid = |reason: &str| TransportError::connect_failed(address, reason);

    if address.to_ascii_uppercase().starts_with("TCPIP") {
        let parts: Vec<&str> = address.split("::").collect();
        if parts.len() < 3 {
            return Err(invalid("expected TCPIP[n]::host::...::INSTR|SOCKET"));
        }
        let host = parts[1].to_string();
        let suffix = parts[parts.len() - 1].to_ascii_uppercase();
        let port = match suffix.as_str() {
            "SOCKET" if parts.len() >= 4 => parts[2]
                .parse::<u16>()
                .map_err(|_| invalid("socket port is not a number"))?,
            "SOCKET" => return Err(invalid("SOCKET resource needs a port")),
            "INSTR" => SCPI_SOCKET_PORT,
            _ => return Err(invalid("resource class must be INSTR or SOCKET")),
        };
        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        return Ok((host, port));
    }

    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse::<u16>()
                .map_err(|_| invalid("port is not a number"))?;
            Ok((host.to_string(), port))
        }
        Some(_) => Err(invalid("empty host")),
        None if !address.is_empty() => Ok((address.to_string(), SCPI_SOCKET_PORT)),
        None => Err(invalid("empty address")),
    }
}

impl Transport for TcpAdapter {
    fn connect(&mut self, address: &str) -> Result<bool, TransportError> {
        self.disconnect();

        let (host, port) = parse_tcp_address(address)?;
        let socket_addr = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| TransportError::connect_failed(address, e))?
            .next()
            .ok_or_else(|| TransportError::connect_failed(address, "host did not resolve"))?;

        let stream = TcpStream::connect_timeout(&socket_addr, self.timeout)
            .map_err(|e| TransportError::connect_failed(address, e))?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.set_nodelay(true)?;

        debug!("TCP session opened to {}", socket_addr);
        self.stream = Some(stream);
        self.peer = Some(socket_addr.to_string());
        Ok(true)
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!("TCP session to {:?} closed", self.peer);
        }
        self.pending.clear();
    }

    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        let line = format!("{}{}", command, self.line_terminator);
        let stream = self.stream()?;
        stream.write_all(line.as_bytes())?;
        stream.flush()?;
        Ok(())
    }

    fn read(&mut self) -> Result<String, TransportError> {
        let timeout = self.timeout;
        let terminator = self.response_terminator.clone().into_bytes();
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        read_line(stream, &mut self.pending, &terminator, timeout)
    }

    fn query(&mut self, command: &str) -> Result<String, TransportError> {
        self.write(command)?;
        self.read()
    }

    fn is_connected(&self) -> bool {
        // A peer that closed the socket shows up as an error on the next
        // operation; `peer_addr` fails once the socket itself is gone.
        self.stream
            .as_ref()
            .map(|s| s.peer_addr().is_ok())
            .unwrap_or(false)
    }

    fn adapter_type(&self) -> &str {
        "tcp"
    }

    fn info(&self) -> String {
        format!(
            "TcpAdapter({} @ {}ms timeout)",
            self.peer.as_deref().unwrap_or("unconnected"),
            self.timeout.as_millis()
        )
    }
}
