//! Bundled instrument drivers.
//!
//! | Driver | Capability | Backend | Methods |
//! |--------|------------|---------|---------|
//! | [`Keithley2450`] | [`Smu`](crate::capabilities::Smu) | TCP / VISA | hand-written + `keithley_2450` resource |
//! | [`GenericSmu`] | [`Smu`](crate::capabilities::Smu) | any line backend | `generic_smu` resource only |
//! | [`KeysightE5080B`] | [`Vna`](crate::capabilities::Vna) | TCP / VISA | `keysight_e5080b` resource + trace parsing |
//! | [`Standa8Smc4`] | [`MotorStage`](crate::capabilities::MotorStage) | binary frames | hand-written |

pub mod generic_smu;
pub mod keithley_2450;
pub mod keysight_e5080b;
pub mod standa_8smc4;

pub use generic_smu::GenericSmu;
pub use keithley_2450::Keithley2450;
pub use keysight_e5080b::KeysightE5080B;
pub use standa_8smc4::{MotorType, Standa8Smc4, StepperCalibration};

use crate::error::{InstrumentError, Result};
use crate::proxy::Reply;
use crate::registry::{CallArgs, ParamType, Value};

/// Typed lookup of a hand-written method argument, by name or position.
pub(crate) struct ArgReader<'a> {
    instrument: &'a str,
    method: &'a str,
    args: &'a CallArgs,
}

impl<'a> ArgReader<'a> {
    pub(crate) fn new(instrument: &'a str, method: &'a str, args: &'a CallArgs) -> Self {
        Self {
            instrument,
            method,
            args,
        }
    }

    fn typed(&self, name: &str, index: usize, kind: ParamType) -> Result<Option<Value>> {
        let Some(value) = self.args.get_or_positional(name, index) else {
            return Ok(None);
        };
        kind.coerce(value)
            .map(Some)
            .ok_or_else(|| InstrumentError::Validation {
                instrument: self.instrument.to_string(),
                method: self.method.to_string(),
                parameter: name.to_string(),
                expected: kind.to_string(),
                found: format!("{} {}", value.kind(), value),
            })
    }

    fn missing(&self, name: &str) -> InstrumentError {
        InstrumentError::ConfigBinding {
            instrument: self.instrument.to_string(),
            method: self.method.to_string(),
            message: format!("missing required argument '{name}'"),
        }
    }

    pub(crate) fn f64_or(&self, name: &str, index: usize, default: f64) -> Result<f64> {
        Ok(self
            .typed(name, index, ParamType::Float)?
            .and_then(|v| v.as_f64())
            .unwrap_or(default))
    }

    pub(crate) fn bool_or(&self, name: &str, index: usize, default: bool) -> Result<bool> {
        match self.typed(name, index, ParamType::Bool)? {
            Some(Value::Bool(b)) => Ok(b),
            _ => Ok(default),
        }
    }

    pub(crate) fn int(&self, name: &str, index: usize) -> Result<i64> {
        match self.typed(name, index, ParamType::Int)? {
            Some(Value::Int(i)) => Ok(i),
            _ => Err(self.missing(name)),
        }
    }

    pub(crate) fn string(&self, name: &str, index: usize) -> Result<String> {
        match self.typed(name, index, ParamType::String)? {
            Some(Value::Str(s) | Value::Mnemonic(s)) => Ok(s),
            _ => Err(self.missing(name)),
        }
    }
}

/// Reads a numeric reply, failing with `UnexpectedResponse` otherwise.
pub(crate) fn expect_number(instrument: &str, command: &str, reply: Reply) -> Result<f64> {
    reply
        .to_f64()
        .ok_or_else(|| InstrumentError::UnexpectedResponse {
            instrument: instrument.to_string(),
            command: command.to_string(),
            response: reply.to_string(),
        })
}
