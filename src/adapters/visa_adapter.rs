//! VISA Hardware Adapter for GPIB/USB/Ethernet instruments
//!
//! Provides a [`Transport`] implementation over a VISA session, supporting
//! instruments via GPIB, VXI-11, USBTMC, HiSLIP, etc. Requires a VISA runtime
//! installed on the host.

use super::{read_line, Transport, DEFAULT_TIMEOUT};
use crate::error::TransportError;
use std::ffi::CString;
use std::io::Write;
use std::time::Duration;
use tracing::debug;
use visa_rs::prelude::*;

/// VISA adapter for instrument communication
///
/// Supports resource strings like:
/// - "GPIB0::1::INSTR" (GPIB interface)
/// - "USB0::0x1234::0x5678::SERIAL::INSTR" (USB)
/// - "TCPIP0::192.168.1.100::INSTR" (Ethernet/LXI)
pub struct VisaAdapter {
    /// Read/write timeout
    timeout: Duration,

    /// Line terminator for commands (typically "\n" for SCPI)
    line_terminator: String,

    resource_string: Option<String>,
    // Field order matters: the session closes before its resource manager.
    session: Option<Instrument>,
    manager: Option<DefaultRM>,
    pending: Vec<u8>,
}

impl VisaAdapter {
    /// Create a new VISA adapter with default settings
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            line_terminator: "\n".to_string(),
            resource_string: None,
            session: None,
            manager: None,
            pending: Vec::new(),
        }
    }

    /// Set read/write timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set line terminator for commands
    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }
}

impl Default for VisaAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for VisaAdapter {
    fn connect(&mut self, address: &str) -> Result<bool, TransportError> {
        self.disconnect();

        let manager = DefaultRM::new()
            .map_err(|e| TransportError::connect_failed(address, format!("{e:?}")))?;
        let resource = CString::new(address)
            .map_err(|_| TransportError::connect_failed(address, "address contains NUL"))?;
        let session = manager
            .open(&resource.into(), AccessMode::NO_LOCK, self.timeout)
            .map_err(|e| TransportError::connect_failed(address, format!("{e:?}")))?;

        debug!("VISA session opened to {}", address);
        self.session = Some(session);
        self.manager = Some(manager);
        self.resource_string = Some(address.to_string());
        Ok(true)
    }

    fn disconnect(&mut self) {
        if self.session.take().is_some() {
            debug!("VISA session to {:?} closed", self.resource_string);
        }
        self.manager = None;
        self.pending.clear();
    }

    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        let session = self.session.as_ref().ok_or(TransportError::NotConnected)?;
        let line = format!("{}{}", command, self.line_terminator);
        let mut writer = session;
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    fn read(&mut self) -> Result<String, TransportError> {
        let session = self.session.as_ref().ok_or(TransportError::NotConnected)?;
        let mut reader = session;
        read_line(&mut reader, &mut self.pending, b"\n", self.timeout)
    }

    fn query(&mut self, command: &str) -> Result<String, TransportError> {
        self.write(command)?;
        self.read()
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn adapter_type(&self) -> &str {
        "visa"
    }

    fn info(&self) -> String {
        format!(
            "VisaAdapter({} @ {}ms timeout)",
            self.resource_string.as_deref().unwrap_or("unopened"),
            self.timeout.as_millis()
        )
    }
}
