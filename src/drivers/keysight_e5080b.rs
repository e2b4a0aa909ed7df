//! Keysight E5080B ENA vector network analyzer driver
//!
//! Sweep configuration and measurement setup live in the `keysight_e5080b`
//! resource. This module adds what a template cannot express: reading the
//! stimulus axis and the complex trace in ASCII form and pairing them up.
//!
//! Data format (`FORM:DATA ASCII,0`):
//! - `CALC1:MEAS1:X?` returns `f1,f2,...,fN`
//! - `CALC1:DATA? SDATA` returns `re1,im1,re2,im2,...,reN,imN`

use crate::capabilities::{SParameterTrace, Vna};
use crate::dispatch::{Driver, InstrumentBuilder, ScpiInstrument};
use crate::error::{InstrumentError, Result};
use crate::proxy::Reply;
use crate::registry::CallArgs;
use num_complex::Complex64;
use tracing::debug;

/// Method resource the driver loads.
pub const RESOURCE: &str = "keysight_e5080b";

const REQUIRED: &[&str] = &[
    "setup_sweep",
    "define_measurement",
    "single_sweep",
    "read_frequencies",
    "read_trace",
];

/// Highest port number on the four-port model.
pub const MAX_PORT: u8 = 4;

/// Driver for the Keysight E5080B.
#[derive(Debug)]
pub struct KeysightE5080B {
    core: ScpiInstrument,
}

impl KeysightE5080B {
    /// Driver on the default TCP backend with the bundled resource.
    pub fn new(name: &str, address: &str) -> Result<Self> {
        Self::from_builder(ScpiInstrument::builder(name, address))
    }

    /// Driver from a builder, using the bundled resource unless it names one.
    pub fn from_builder(builder: InstrumentBuilder) -> Result<Self> {
        let core = builder
            .default_resource(RESOURCE)
            .require_methods(REQUIRED)
            .build()?;
        Ok(Self { core })
    }

    /// Stimulus frequencies of the current sweep, in Hz.
    pub fn frequencies(&mut self) -> Result<Vec<f64>> {
        let text = self.text_of("read_frequencies")?;
        parse_ascii_list(&text).ok_or_else(|| self.unexpected("CALC1:MEAS1:X?", text))
    }

    /// Complex data of the selected trace.
    pub fn trace_data(&mut self) -> Result<Vec<Complex64>> {
        let text = self.text_of("read_trace")?;
        parse_complex_pairs(&text).ok_or_else(|| self.unexpected("CALC1:DATA? SDATA", text))
    }

    fn text_of(&mut self, method: &str) -> Result<String> {
        match self.core.call_registry(method, &CallArgs::new())? {
            Reply::Text(text) => Ok(text),
            other => Ok(other.to_string()),
        }
    }

    fn unexpected(&self, command: &str, response: String) -> InstrumentError {
        InstrumentError::UnexpectedResponse {
            instrument: self.core.name().to_string(),
            command: command.to_string(),
            response,
        }
    }
}

impl Driver for KeysightE5080B {
    fn core(&self) -> &ScpiInstrument {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ScpiInstrument {
        &mut self.core
    }
}

impl Vna for KeysightE5080B {
    fn setup_sweep(&mut self, start_hz: f64, stop_hz: f64, points: u32) -> Result<()> {
        let args = CallArgs::new()
            .kwarg("start", start_hz)
            .kwarg("stop", stop_hz)
            .kwarg("points", points);
        self.core.call_registry("setup_sweep", &args).map(|_| ())
    }

    fn measure_s_parameters(&mut self, ports: (u8, u8)) -> Result<SParameterTrace> {
        let (out_port, in_port) = ports;
        for port in [out_port, in_port] {
            if !(1..=MAX_PORT).contains(&port) {
                return Err(InstrumentError::Validation {
                    instrument: self.core.name().to_string(),
                    method: "measure_s_parameters".to_string(),
                    parameter: "ports".to_string(),
                    expected: format!("port numbers 1 to {MAX_PORT}"),
                    found: format!("({out_port}, {in_port})"),
                });
            }
        }

        let parameter = format!("S{out_port}{in_port}");
        let measurement = CallArgs::new()
            .kwarg("name", format!("meas_{parameter}"))
            .kwarg("parameter", parameter.as_str());
        self.core.call_registry("define_measurement", &measurement)?;
        self.core.call_registry("single_sweep", &CallArgs::new())?;

        let frequencies = self.frequencies()?;
        let data = self.trace_data()?;
        if frequencies.len() != data.len() {
            return Err(self.unexpected(
                "CALC1:DATA? SDATA",
                format!("{} points for {} frequencies", data.len(), frequencies.len()),
            ));
        }
        debug!(
            instrument = self.core.name(),
            "Read {} with {} points", parameter, data.len()
        );
        Ok(SParameterTrace {
            parameter,
            frequencies,
            data,
        })
    }
}

/// Parses `v1,v2,...`. Empty input is an empty list.
pub fn parse_ascii_list(text: &str) -> Option<Vec<f64>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(Vec::new());
    }
    trimmed
        .split(',')
        .map(|v| v.trim().parse::<f64>().ok())
        .collect()
}

/// Parses interleaved `re,im` pairs. An odd count is rejected.
pub fn parse_complex_pairs(text: &str) -> Option<Vec<Complex64>> {
    let values = parse_ascii_list(text)?;
    if values.len() % 2 != 0 {
        return None;
    }
    Some(
        values
            .chunks_exact(2)
            .map(|pair| Complex64::new(pair[0], pair[1]))
            .collect(),
    )
}
