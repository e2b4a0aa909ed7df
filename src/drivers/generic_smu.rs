//! Generic SCPI source-measure unit.
//!
//! Every operation comes from the `generic_smu` resource; the driver only maps
//! the [`Smu`] trait onto registry calls. Point it at another resource with the
//! same method names to drive an SMU this crate does not ship a driver for.

use super::expect_number;
use crate::capabilities::Smu;
use crate::dispatch::{Driver, InstrumentBuilder, ScpiInstrument};
use crate::error::Result;
use crate::registry::CallArgs;

/// Bundled resource used by [`GenericSmu::new`].
pub const RESOURCE: &str = "generic_smu";

const REQUIRED: &[&str] = &[
    "source_voltage",
    "source_current",
    "measure_voltage",
    "measure_current",
    "enable_source",
];

/// Resource-only SMU driver.
#[derive(Debug)]
pub struct GenericSmu {
    core: ScpiInstrument,
}

impl GenericSmu {
    /// Driver on the default TCP backend with the bundled resource.
    pub fn new(name: &str, address: &str) -> Result<Self> {
        Self::from_builder(ScpiInstrument::builder(name, address).resource(RESOURCE))
    }

    /// Driver from a builder. The builder must name a resource that defines
    /// the five SMU methods; the bundled one is used when it names none.
    pub fn from_builder(builder: InstrumentBuilder) -> Result<Self> {
        let core = builder.default_resource(RESOURCE).require_methods(REQUIRED).build()?;
        Ok(Self { core })
    }

    fn reading(&mut self, method: &str) -> Result<f64> {
        let reply = self.core.call_registry(method, &CallArgs::new())?;
        expect_number(self.core.name(), method, reply)
    }
}

impl Driver for GenericSmu {
    fn core(&self) -> &ScpiInstrument {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ScpiInstrument {
        &mut self.core
    }
}

impl Smu for GenericSmu {
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
        self.reading("measure_voltage")
    }

    fn measure_current(&mut self) -> Result<f64> {
        self.reading("measure_current")
    }

    fn enable_source(&mut self, state: bool) -> Result<()> {
        self.core
            .call_registry("enable_source", &CallArgs::new().kwarg("state", state))
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;
    use crate::error::InstrumentError;
    use crate::registry::{BoolFormat, MethodRegistry};

    #[test]
    fn test_smu_trait_over_resource() {
        let mock = MockTransport::new()
            .with_response("MEAS:VOLT?", "+1.000000E+00")
            .with_response("MEAS:CURR?", "-2.0E-3");
        let handle = mock.handle();
        let mut smu = GenericSmu::from_builder(ScpiInstrument::builder("smu", "mock").backend(mock)).unwrap();
        smu.connect().unwrap();

        smu.source_voltage(0.5, 0.02).unwrap();
        smu.enable_source(true).unwrap();
        assert_eq!(smu.measure_voltage().unwrap(), 1.0);
        assert_eq!(smu.measure_current().unwrap(), -0.002);
        assert_eq!(
            handle.sent(),
            vec![
                "SOUR:FUNC VOLT",
                "SOUR:VOLT 0.5",
                "SENS:CURR:PROT 0.02",
                "OUTP ON",
                "MEAS:VOLT?",
                "MEAS:CURR?",
            ]
        );
    }

    #[test]
    fn test_default_bool_format_applies_to_undeclared_resource() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let mut smu = GenericSmu::from_builder(
            ScpiInstrument::builder("smu", "mock")
                .backend(mock)
                .bool_format(BoolFormat::OneZero),
        )
        .unwrap();
        smu.connect().unwrap();
        smu.enable_source(false).unwrap();
        assert_eq!(handle.writes(), vec!["OUTP 0"]);
    }

    #[test]
    fn test_incomplete_resource_is_rejected() {
        let registry = MethodRegistry::from_yaml_str(
            "partial",
            "methods:\n  - name: measure_voltage\n    commands: [\"MEAS:VOLT?\"]\n",
        )
        .unwrap();
        let err = GenericSmu::from_builder(
            ScpiInstrument::builder("smu", "mock")
                .backend(MockTransport::new())
                .registry(registry),
        )
        .unwrap_err();
        assert!(matches!(err, InstrumentError::ConfigLoad { ref message, .. } if message.contains("enable_source")));
    }

    #[test]
    fn test_non_numeric_reading() {
        let mock = MockTransport::new().with_response("MEAS:VOLT?", "OVLD");
        let mut smu = GenericSmu::from_builder(ScpiInstrument::builder("smu", "mock").backend(mock)).unwrap();
        smu.connect().unwrap();
        assert!(matches!(
            smu.measure_voltage(),
            Err(InstrumentError::UnexpectedResponse { .. })
        ));
    }
}
