//! Standa 8SMC4-USB stepper controller driver
//!
//! Protocol Overview:
//! - Format: binary frames, not SCPI
//! - Request: 4-byte ASCII command code, then little-endian packed arguments
//! - Response: fixed-length little-endian payload, no terminator
//!
//! The [`FrameAdapter`] owns framing; this driver sends textual commands such
//! as `"move 1000"` and parses the comma-separated fields it gets back.
//!
//! | Code | Request | Response | Meaning |
//! |------|---------|----------|---------|
//! | `gpos` | | `i32` | position |
//! | `gets` | | `i32` | position from status |
//! | `move` | `i32` | | absolute move |
//! | `movr` | `i32` | | relative move |
//! | `sels` | `i32` | | speed, microsteps/s |
//! | `stop` | | | stop now |
//! | `home` | | | homing sequence |
//! | `geng` | | `u32,u32` | steps per revolution, microsteps per step |
//! | `gent` | | `u8` | motor type |
//!
//! The controller drives a single axis; any axis other than 0 is rejected.

use crate::adapters::{FrameAdapter, FrameCommand, FrameField, Transport};
use crate::capabilities::MotorStage;
use crate::error::{InstrumentError, Result};
use crate::instrument::Instrument;
use serde::Serialize;
use tracing::debug;

/// Command table of the 8SMC4.
pub const COMMANDS: &[FrameCommand] = &[
    FrameCommand {
        code: "gpos",
        request: &[],
        response: &[FrameField::I32],
    },
    FrameCommand {
        code: "gets",
        request: &[],
        response: &[FrameField::I32],
    },
    FrameCommand {
        code: "move",
        request: &[FrameField::I32],
        response: &[],
    },
    FrameCommand {
        code: "movr",
        request: &[FrameField::I32],
        response: &[],
    },
    FrameCommand {
        code: "sels",
        request: &[FrameField::I32],
        response: &[],
    },
    FrameCommand {
        code: "stop",
        request: &[],
        response: &[],
    },
    FrameCommand {
        code: "home",
        request: &[],
        response: &[],
    },
    FrameCommand {
        code: "geng",
        request: &[],
        response: &[FrameField::U32, FrameField::U32],
    },
    FrameCommand {
        code: "gent",
        request: &[],
        response: &[FrameField::U8],
    },
];

/// Stepper calibration reported by `geng`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepperCalibration {
    /// Full steps per revolution
    pub steps_per_rev: u32,
    /// Microsteps per full step
    pub usteps_per_step: u32,
}

/// Motor type reported by `gent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MotorType {
    /// No motor configured
    None,
    /// DC motor
    Dc,
    /// Stepper motor
    Step,
    /// Brushless motor
    Brushless,
    /// Code this driver does not know
    Unknown(u8),
}

impl From<u8> for MotorType {
    fn from(code: u8) -> Self {
        match code {
            0x00 => MotorType::None,
            0x01 => MotorType::Dc,
            0x03 => MotorType::Step,
            0x05 => MotorType::Brushless,
            other => MotorType::Unknown(other),
        }
    }
}

/// Driver for Standa 8SMC4 controllers.
#[derive(Debug)]
pub struct Standa8Smc4 {
    instrument: Instrument,
}

impl Standa8Smc4 {
    /// Driver talking binary frames over TCP (e.g. a serial-to-LAN bridge).
    pub fn new(name: &str, address: &str) -> Self {
        Self::with_backend(name, address, FrameAdapter::new(COMMANDS))
    }

    /// Driver over any backend accepting the textual frame commands.
    pub fn with_backend(name: &str, address: &str, backend: impl Transport + 'static) -> Self {
        Self {
            instrument: Instrument::new(name, address, Box::new(backend)),
        }
    }

    /// The base instrument.
    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    /// Mutable base instrument, e.g. to toggle the wire trace.
    pub fn instrument_mut(&mut self) -> &mut Instrument {
        &mut self.instrument
    }

    /// Open the session.
    pub fn connect(&mut self) -> Result<()> {
        self.instrument.connect()
    }

    /// Close the session.
    pub fn disconnect(&mut self) {
        self.instrument.disconnect()
    }

    /// Stepper calibration data.
    pub fn stepper_calibration(&mut self) -> Result<StepperCalibration> {
        let fields = self.query_fields("geng", 2)?;
        let steps_per_rev = self.field_u32("geng", &fields, 0)?;
        let usteps_per_step = self.field_u32("geng", &fields, 1)?;
        Ok(StepperCalibration {
            steps_per_rev,
            usteps_per_step,
        })
    }

    /// Configured motor type.
    pub fn motor_type(&mut self) -> Result<MotorType> {
        let fields = self.query_fields("gent", 1)?;
        let code = fields[0]
            .parse::<u8>()
            .map_err(|_| self.unexpected("gent", fields.join(",")))?;
        Ok(MotorType::from(code))
    }

    fn check_axis(&self, method: &str, axis: u32) -> Result<()> {
        if axis == 0 {
            return Ok(());
        }
        Err(self.invalid(method, "axis", "0", axis.to_string()))
    }

    fn steps(&self, method: &str, parameter: &str, value: f64) -> Result<i32> {
        let rounded = value.round();
        if rounded.is_finite() && rounded >= f64::from(i32::MIN) && rounded <= f64::from(i32::MAX) {
            Ok(rounded as i32)
        } else {
            Err(self.invalid(method, parameter, "a 32-bit step count", value.to_string()))
        }
    }

    fn send(&mut self, command: String) -> Result<()> {
        debug!(instrument = self.instrument.name(), "Frame command {}", command);
        self.instrument.write(&command)
    }

    fn query_fields(&mut self, code: &str, count: usize) -> Result<Vec<String>> {
        let response = self.instrument.query(code)?;
        let fields: Vec<String> = response.split(',').map(|f| f.trim().to_string()).collect();
        if fields.len() != count || fields.iter().any(String::is_empty) {
            return Err(self.unexpected(code, response));
        }
        Ok(fields)
    }

    fn field_u32(&self, code: &str, fields: &[String], index: usize) -> Result<u32> {
        fields[index]
            .parse::<u32>()
            .map_err(|_| self.unexpected(code, fields.join(",")))
    }

    fn invalid(&self, method: &str, parameter: &str, expected: &str, found: String) -> InstrumentError {
        InstrumentError::Validation {
            instrument: self.instrument.name().to_string(),
            method: method.to_string(),
            parameter: parameter.to_string(),
            expected: expected.to_string(),
            found,
        }
    }

    fn unexpected(&self, command: &str, response: String) -> InstrumentError {
        InstrumentError::UnexpectedResponse {
            instrument: self.instrument.name().to_string(),
            command: command.to_string(),
            response,
        }
    }
}

impl MotorStage for Standa8Smc4 {
    fn get_position(&mut self, axis: u32) -> Result<f64> {
        self.check_axis("get_position", axis)?;
        let fields = self.query_fields("gets", 1)?;
        fields[0]
            .parse::<i32>()
            .map(f64::from)
            .map_err(|_| self.unexpected("gets", fields.join(",")))
    }

    fn move_to(&mut self, position: f64, axis: u32) -> Result<()> {
        self.check_axis("move_to", axis)?;
        let steps = self.steps("move_to", "position", position)?;
        self.send(format!("move {steps}"))
    }

    fn move_by(&mut self, distance: f64, axis: u32) -> Result<()> {
        self.check_axis("move_by", axis)?;
        let steps = self.steps("move_by", "distance", distance)?;
        self.send(format!("movr {steps}"))
    }

    fn set_speed(&mut self, speed: f64, axis: u32) -> Result<()> {
        self.check_axis("set_speed", axis)?;
        let steps = self.steps("set_speed", "speed", speed)?;
        if steps <= 0 {
            return Err(self.invalid("set_speed", "speed", "a positive speed", speed.to_string()));
        }
        self.send(format!("sels {steps}"))
    }

    fn stop(&mut self, axis: u32) -> Result<()> {
        self.check_axis("stop", axis)?;
        self.send("stop".to_string())
    }

    fn home(&mut self, axis: u32) -> Result<()> {
        self.check_axis("home", axis)?;
        self.send("home".to_string())
    }
}
