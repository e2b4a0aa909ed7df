//! Serial Hardware Adapter for RS-232/USB-Serial instruments
//!
//! Provides a [`Transport`] implementation for serial communication, supporting
//! SCPI instruments behind USB-serial bridges as well as legacy RS-232 gear.

use super::{read_line, Transport, DEFAULT_TIMEOUT};
use crate::error::TransportError;
use serialport::SerialPort;
use std::io::Write;
use std::time::Duration;
use tracing::debug;

/// Serial adapter for RS-232 communication
///
/// This adapter wraps the serialport crate. Reads use a short internal port
/// timeout and loop until the configured overall timeout expires.
pub struct SerialAdapter {
    /// Baud rate (e.g., 9600, 115200)
    baud_rate: u32,

    /// Read timeout
    timeout: Duration,

    /// Line terminator for commands (e.g., "\r\n")
    line_terminator: String,

    /// Response line ending (e.g., "\n")
    response_delimiter: String,

    port_name: Option<String>,
    port: Option<Box<dyn SerialPort>>,
    pending: Vec<u8>,
}

impl SerialAdapter {
    /// Create a new serial adapter with default settings
    ///
    /// # Arguments
    /// * `baud_rate` - Communication speed (e.g., 9600, 115200)
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            timeout: DEFAULT_TIMEOUT,
            line_terminator: "\r\n".to_string(),
            response_delimiter: "\n".to_string(),
            port_name: None,
            port: None,
            pending: Vec::new(),
        }
    }

    /// Set read timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set line terminator for commands
    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    /// Set response delimiter
    pub fn with_response_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.response_delimiter = delimiter.into();
        self
    }
}

impl Default for SerialAdapter {
    fn default() -> Self {
        Self::new(9600)
    }
}

/// Extracts the OS port path from a plain path or an `ASRL<path>::INSTR` resource.
pub fn parse_serial_address(address: &str) -> Result<String, TransportError> {
    let address = address.trim();
    let upper = address.to_ascii_uppercase();
    let path = if upper.starts_with("ASRL") {
        let rest = &address[4..];
        let rest = rest
            .strip_suffix("::INSTR")
            .or_else(|| rest.strip_suffix("::instr"))
            .unwrap_or(rest);
        if rest.chars().all(|c| c.is_ascii_digit()) {
            return Err(TransportError::connect_failed(
                address,
                "numeric ASRL board numbers are not supported, pass the port path",
            ));
        }
        rest
    } else {
        address
    };

    if path.is_empty() {
        return Err(TransportError::connect_failed(address, "empty port name"));
    }
    Ok(path.to_string())
}

impl Transport for SerialAdapter {
    fn connect(&mut self, address: &str) -> Result<bool, TransportError> {
        self.disconnect();
        let port_name = parse_serial_address(address)?;

        let port = serialport::new(&port_name, self.baud_rate)
            .timeout(Duration::from_millis(100)) // Internal read timeout
            .open()
            .map_err(|e| {
                TransportError::connect_failed(
                    address,
                    format!("failed to open serial port at {} baud: {}", self.baud_rate, e),
                )
            })?;

        debug!("Serial port '{}' opened at {} baud", port_name, self.baud_rate);
        self.port = Some(port);
        self.port_name = Some(port_name);
        Ok(true)
    }

    fn disconnect(&mut self) {
        if self.port.take().is_some() {
            debug!("Serial port '{:?}' closed", self.port_name);
        }
        self.pending.clear();
    }

    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        let line = format!("{}{}", command, self.line_terminator);
        let port = self.port.as_mut().ok_or(TransportError::NotConnected)?;
        port.write_all(line.as_bytes())?;
        port.flush()?;
        Ok(())
    }

    fn read(&mut self) -> Result<String, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotConnected)?;
        read_line(
            port.as_mut(),
            &mut self.pending,
            self.response_delimiter.as_bytes(),
            self.timeout,
        )
    }

    fn query(&mut self, command: &str) -> Result<String, TransportError> {
        self.write(command)?;
        self.read()
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn adapter_type(&self) -> &str {
        "serial"
    }

    fn info(&self) -> String {
        format!(
            "SerialAdapter({} @ {} baud)",
            self.port_name.as_deref().unwrap_or("unopened"),
            self.baud_rate
        )
    }
}
