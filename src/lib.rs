//! # lab_control
//!
//! Hybrid command dispatch for laboratory instruments.
//!
//! One instrument object answers to three kinds of calls, resolved in a fixed
//! order: hand-written driver methods, methods declared in a YAML resource,
//! and ad-hoc hierarchical SCPI command paths that are declared nowhere.
//!
//! ## Crate Structure
//!
//! - **`adapters`**: transport backends (TCP, serial, VISA, binary frames, mock)
//!   behind the [`adapters::Transport`] trait.
//! - **`instrument`**: the base [`instrument::Instrument`], which owns one
//!   backend and manages the connection lifecycle and wire trace.
//! - **`registry`**: YAML method resources, parameter binding and command
//!   template rendering.
//! - **`proxy`**: immutable command paths (`sour.volt` → `SOUR:VOLT`) and
//!   response coercion.
//! - **`dispatch`**: the [`dispatch::ScpiInstrument`] facade, the
//!   [`dispatch::Driver`] precedence chain and the instrument builder.
//! - **`capabilities`**: `Smu`, `Vna` and `MotorStage` traits.
//! - **`drivers`**: bundled drivers implementing those traits.
//! - **`config`** / **`logging`**: figment settings and tracing setup.
//! - **`error`**: the [`error::InstrumentError`] taxonomy.
//!
//! ## Example
//!
//! ```
//! use lab_control::adapters::MockTransport;
//! use lab_control::dispatch::{Driver, ScpiInstrument};
//! use lab_control::registry::{CallArgs, MethodRegistry};
//!
//! let registry = MethodRegistry::from_yaml_str(
//!     "smu",
//!     "methods:\n  - name: enable_source\n    parameters: [{name: state, type: bool}]\n    commands: [':OUTP {state}']\n",
//! )
//! .unwrap();
//! let mock = MockTransport::new();
//! let wire = mock.handle();
//!
//! let mut smu = ScpiInstrument::builder("smu", "mock::smu")
//!     .backend(mock)
//!     .registry(registry)
//!     .build()
//!     .unwrap();
//! smu.connect().unwrap();
//! smu.call("enable_source", &CallArgs::new().kwarg("state", true)).unwrap();
//! smu.call("syst.beep", &CallArgs::new().arg(false)).unwrap();
//! assert_eq!(wire.sent(), vec![":OUTP ON", "SYST:BEEP OFF"]);
//! ```

pub mod adapters;
pub mod capabilities;
pub mod config;
pub mod dispatch;
pub mod drivers;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod proxy;
pub mod registry;

pub use dispatch::{Driver, InstrumentBuilder, ScpiInstrument};
pub use error::{InstrumentError, Result, TransportError};
pub use instrument::{ConnectionState, Instrument};
pub use proxy::{CommandPath, Reply};
pub use registry::{CallArgs, MethodRegistry, Value};
