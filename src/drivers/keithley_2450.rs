//! Keithley 2450 SourceMeter driver
//!
//! Reference: Keithley 2450 Reference Manual, SCPI command set
//!
//! Protocol Overview:
//! - Format: SCPI over LAN (raw socket 5025) or VISA
//! - Terminator: LF (\n)
//! - Readings: `:READ?` returns one value in scientific notation
//!
//! Methods come from three places:
//! - hand-written here (`initialize`, `enable_source`, `set_average_count`,
//!   `measure_voltage`, `measure_current`, `reset`)
//! - the `keithley_2450` resource (`source_voltage`, `source_current`,
//!   `read_measurement`, `set_resistance`, `meas_resistance`, ...)
//! - any other name is sent as a command path, e.g. `call("syst.beep", ..)`
//!
//! The resource also defines `initialize`; the hand-written one wins.
//!
//! # Example
//!
//! ```no_run
//! use lab_control::capabilities::Smu;
//! use lab_control::dispatch::Driver;
//! use lab_control::drivers::Keithley2450;
//!
//! # fn main() -> lab_control::error::Result<()> {
//! let mut smu = Keithley2450::new("smu", "TCPIP0::192.168.0.95::INSTR")?;
//! smu.connect()?;
//! smu.initialize()?;
//! smu.source_voltage(1.5, 0.01)?;
//! smu.enable_source(true)?;
//! let amps = smu.measure_current()?;
//! println!("I = {amps:e} A");
//! # Ok(())
//! # }
//! ```

use super::{expect_number, ArgReader};
use crate::capabilities::Smu;
use crate::dispatch::{Driver, InstrumentBuilder, NativeMethod, ScpiInstrument};
use crate::error::{InstrumentError, Result};
use crate::proxy::Reply;
use crate::registry::{CallArgs, Value};
use tracing::info;

/// Method resource the driver loads.
pub const RESOURCE: &str = "keithley_2450";

/// Registry methods the hand-written code depends on.
const REQUIRED: &[&str] = &["source_voltage", "source_current", "read_measurement"];

/// Level sourced by `measure_voltage` / `measure_current` when none is given.
pub const DEFAULT_PROBE_LEVEL: f64 = 1e-3;

const AVERAGE_FUNCTIONS: &[&str] = &["VOLT", "CURR", "RES"];

const NATIVE: &[(&str, NativeMethod<Keithley2450>)] = &[
    ("initialize", Keithley2450::native_initialize),
    ("enable_source", Keithley2450::native_enable_source),
    ("set_average_count", Keithley2450::native_set_average_count),
    ("measure_voltage", Keithley2450::native_measure_voltage),
    ("measure_current", Keithley2450::native_measure_current),
    ("reset", Keithley2450::native_reset),
];

/// Driver for the Keithley 2450 SourceMeter.
#[derive(Debug)]
pub struct Keithley2450 {
    core: ScpiInstrument,
}

impl Keithley2450 {
    /// Driver on the default TCP backend with the bundled resource.
    ///
    /// # Errors
    /// `ConfigLoad` if the resource is missing or lacks a required method.
    pub fn new(name: &str, address: &str) -> Result<Self> {
        Self::from_builder(ScpiInstrument::builder(name, address))
    }

    /// Driver from a pre-configured builder (custom backend, settings, trace).
    pub fn from_builder(builder: InstrumentBuilder) -> Result<Self> {
        let core = builder
            .resource(RESOURCE)
            .require_methods(REQUIRED)
            .build()?;
        Ok(Self { core })
    }

    /// Reset, clear status and select the front terminals.
    pub fn initialize(&mut self) -> Result<()> {
        self.core.reset()?;
        self.core.clear_status()?;
        self.core
            .at("rout.term")
            .call(&[Value::Mnemonic("FRON".into())])?;
        info!(instrument = self.core.name(), "Keithley 2450 initialized");
        Ok(())
    }

    /// Output on or off, through the `OUTP` command path.
    pub fn enable_source(&mut self, state: bool) -> Result<()> {
        let mnemonic = if state { "ON" } else { "OFF" };
        self.core.at("outp").call(&[Value::Mnemonic(mnemonic.into())])?;
        Ok(())
    }

    /// Average `count` readings (1 to 100) of `function` (`VOLT`, `CURR` or `RES`).
    pub fn set_average_count(&mut self, function: &str, count: u32) -> Result<()> {
        let func = function.trim().to_ascii_uppercase();
        if !AVERAGE_FUNCTIONS.contains(&func.as_str()) {
            return Err(self.invalid("set_average_count", "function", "one of VOLT, CURR, RES", function));
        }
        if !(1..=100).contains(&count) {
            return Err(self.invalid(
                "set_average_count",
                "count",
                "1 to 100",
                &count.to_string(),
            ));
        }

        let average = self.core.proxy().child("sens").child(&func).child("aver");
        self.core.invoke(&average.child("coun"), &[Value::from(count)])?;
        self.core
            .invoke(&average.child("stat"), &[Value::Mnemonic("ON".into())])?;
        info!(
            instrument = self.core.name(),
            "Set averaging for {} to {} readings", func, count
        );
        Ok(())
    }

    /// Source `current` amperes and read back the voltage.
    pub fn measure_voltage_at(&mut self, current: f64) -> Result<f64> {
        self.core
            .call_registry("source_current", &CallArgs::new().kwarg("current", current))?;
        self.read_measurement()
    }

    /// Source `voltage` volts and read back the current.
    pub fn measure_current_at(&mut self, voltage: f64) -> Result<f64> {
        self.core
            .call_registry("source_voltage", &CallArgs::new().kwarg("voltage", voltage))?;
        self.read_measurement()
    }

    /// Averaged four-wire resistance in ohms.
    pub fn measure_resistance(&mut self, current: f64, voltage_compliance: f64, count: u32) -> Result<f64> {
        let args = CallArgs::new()
            .kwarg("current", current)
            .kwarg("voltage_compliance", voltage_compliance)
            .kwarg("count", count);
        let reply = self.core.call_registry("meas_resistance", &args)?;
        expect_number(self.core.name(), ":READ?", reply)
    }

    /// `*RST`
    pub fn reset(&mut self) -> Result<()> {
        self.core.reset()?;
        info!(instrument = self.core.name(), "Instrument reset to default state");
        Ok(())
    }

    fn read_measurement(&mut self) -> Result<f64> {
        let reply = self.core.call_registry("read_measurement", &CallArgs::new())?;
        expect_number(self.core.name(), ":READ?", reply)
    }

    fn invalid(&self, method: &str, parameter: &str, expected: &str, found: &str) -> InstrumentError {
        InstrumentError::Validation {
            instrument: self.core.name().to_string(),
            method: method.to_string(),
            parameter: parameter.to_string(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    fn native_initialize(&mut self, _args: &CallArgs) -> Result<Reply> {
        self.initialize().map(|()| Reply::Empty)
    }

    fn native_enable_source(&mut self, args: &CallArgs) -> Result<Reply> {
        let state = ArgReader::new(self.core.name(), "enable_source", args).bool_or("state", 0, true)?;
        self.enable_source(state).map(|()| Reply::Empty)
    }

    fn native_set_average_count(&mut self, args: &CallArgs) -> Result<Reply> {
        let reader = ArgReader::new(self.core.name(), "set_average_count", args);
        let function = reader.string("function", 0)?;
        let count = reader.int("count", 1)?;
        let count = u32::try_from(count)
            .map_err(|_| self.invalid("set_average_count", "count", "1 to 100", &count.to_string()))?;
        self.set_average_count(&function, count).map(|()| Reply::Empty)
    }

    fn native_measure_voltage(&mut self, args: &CallArgs) -> Result<Reply> {
        let current = ArgReader::new(self.core.name(), "measure_voltage", args)
            .f64_or("current", 0, DEFAULT_PROBE_LEVEL)?;
        self.measure_voltage_at(current).map(Reply::Float)
    }

    fn native_measure_current(&mut self, args: &CallArgs) -> Result<Reply> {
        let voltage = ArgReader::new(self.core.name(), "measure_current", args)
            .f64_or("voltage", 0, DEFAULT_PROBE_LEVEL)?;
        self.measure_current_at(voltage).map(Reply::Float)
    }

    fn native_reset(&mut self, _args: &CallArgs) -> Result<Reply> {
        self.reset().map(|()| Reply::Empty)
    }
}

impl Driver for Keithley2450 {
    fn core(&self) -> &ScpiInstrument {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ScpiInstrument {
        &mut self.core
    }

    fn native_methods() -> &'static [(&'static str, NativeMethod<Self>)] {
        NATIVE
    }
}

impl Smu for Keithley2450 {
    fn source_voltage(&mut self, voltage: f64, current_compliance: f64) -> Result<()> {
        let args = CallArgs::new()
            .kwarg("voltage", voltage)
            .kwarg("current_compliance", current_compliance);
        self.core.call_registry("source_voltage", &args).map(|_| ())
    }

    fn source_current(&mut self, current: f64, voltage_compliance: f64) -> Result<()> {
        let args = CallArgs::new()
            .kwarg("current", current)
            .kwarg("voltage_compliance", voltage_compliance);
        self.core.call_registry("source_current", &args).map(|_| ())
    }

    fn measure_voltage(&mut self) -> Result<f64> {
        self.measure_voltage_at(DEFAULT_PROBE_LEVEL)
    }

    fn measure_current(&mut self) -> Result<f64> {
        self.measure_current_at(DEFAULT_PROBE_LEVEL)
    }

    fn enable_source(&mut self, state: bool) -> Result<()> {
        Keithley2450::enable_source(self, state)
    }
}
