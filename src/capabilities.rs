//! Instrument capability traits.
//!
//! Hardware-agnostic interfaces that concrete drivers implement. Client code
//! written against [`Smu`], [`Vna`] or [`MotorStage`] runs unchanged on any
//! driver that satisfies the trait.

use crate::error::Result;
use num_complex::Complex64;
use serde::Serialize;

/// Source-measure unit.
pub trait Smu {
    /// Source `voltage` volts, limiting current to `current_compliance` amperes.
    fn source_voltage(&mut self, voltage: f64, current_compliance: f64) -> Result<()>;

    /// Source `current` amperes, limiting voltage to `voltage_compliance` volts.
    fn source_current(&mut self, current: f64, voltage_compliance: f64) -> Result<()>;

    /// Measured voltage in volts.
    fn measure_voltage(&mut self) -> Result<f64>;

    /// Measured current in amperes.
    fn measure_current(&mut self) -> Result<f64>;

    /// Switch the output on or off.
    fn enable_source(&mut self, state: bool) -> Result<()>;
}

/// Vector network analyzer.
pub trait Vna {
    /// Configure a linear frequency sweep.
    fn setup_sweep(&mut self, start_hz: f64, stop_hz: f64, points: u32) -> Result<()>;

    /// Measure `S<out><in>`, e.g. `(2, 1)` for S21.
    fn measure_s_parameters(&mut self, ports: (u8, u8)) -> Result<SParameterTrace>;
}

/// One measured S-parameter over a sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SParameterTrace {
    /// Parameter name, e.g. `S21`
    pub parameter: String,
    /// Stimulus frequencies in Hz
    pub frequencies: Vec<f64>,
    /// Complex response, one per frequency
    #[serde(serialize_with = "serialize_complex")]
    pub data: Vec<Complex64>,
}

impl SParameterTrace {
    /// Number of sweep points.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the trace holds no points.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Magnitude of each point in dB.
    pub fn magnitude_db(&self) -> Vec<f64> {
        self.data.iter().map(|z| 20.0 * z.norm().log10()).collect()
    }

    /// Phase of each point in degrees.
    pub fn phase_deg(&self) -> Vec<f64> {
        self.data.iter().map(|z| z.arg().to_degrees()).collect()
    }
}

fn serialize_complex<S>(data: &[Complex64], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeSeq;
    let mut seq = serializer.serialize_seq(Some(data.len()))?;
    for z in data {
        seq.serialize_element(&[z.re, z.im])?;
    }
    seq.end()
}

/// Motorised positioning stage.
///
/// Positions, distances and speeds are in device units (steps, microsteps, mm).
pub trait MotorStage {
    /// Current position of `axis`.
    fn get_position(&mut self, axis: u32) -> Result<f64>;

    /// Move `axis` to an absolute position.
    fn move_to(&mut self, position: f64, axis: u32) -> Result<()>;

    /// Move `axis` by a relative distance.
    fn move_by(&mut self, distance: f64, axis: u32) -> Result<()>;

    /// Set movement speed of `axis`.
    fn set_speed(&mut self, speed: f64, axis: u32) -> Result<()>;

    /// Stop `axis` immediately.
    fn stop(&mut self, axis: u32) -> Result<()>;

    /// Run the homing sequence of `axis`.
    fn home(&mut self, axis: u32) -> Result<()>;
}
