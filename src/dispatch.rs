//! Instrument facade and call dispatch.
//!
//! A name called on a driver resolves in a fixed order:
//!
//! 1. a hand-written method the driver lists in [`Driver::native_methods`],
//! 2. a method of the driver's [`MethodRegistry`],
//! 3. otherwise a [`CommandPath`] built from the (dotted) name.
//!
//! [`ScpiInstrument`] is the facade drivers wrap. It owns the [`Instrument`]
//! and the registry, implements tiers 2 and 3, and carries the IEEE-488.2
//! common commands every SCPI device understands.

use crate::adapters::{TcpAdapter, Transport, DEFAULT_TIMEOUT};
use crate::config::Settings;
use crate::error::{InstrumentError, Result};
use crate::instrument::{ConnectionState, Instrument};
use crate::proxy::{CommandPath, ProxyCommand, Reply};
use crate::registry::{BoolFormat, CallArgs, MethodRegistry, ResourceLocator, Value};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Hand-written driver method callable by name.
pub type NativeMethod<D> = fn(&mut D, &CallArgs) -> Result<Reply>;

/// A concrete instrument driver.
///
/// Implementors expose their facade and, optionally, a table of hand-written
/// methods. [`Driver::call`] applies the dispatch precedence.
///
/// # Example
///
/// ```
/// use lab_control::dispatch::{Driver, NativeMethod, ScpiInstrument};
/// use lab_control::error::Result;
/// use lab_control::proxy::Reply;
/// use lab_control::registry::CallArgs;
///
/// struct Dmm {
///     core: ScpiInstrument,
/// }
///
/// impl Dmm {
///     fn beep(&mut self, _args: &CallArgs) -> Result<Reply> {
///         self.core.write("SYST:BEEP")?;
///         Ok(Reply::Empty)
///     }
/// }
///
/// const DMM_METHODS: &[(&str, NativeMethod<Dmm>)] = &[("beep", Dmm::beep)];
///
/// impl Driver for Dmm {
///     fn core(&self) -> &ScpiInstrument { &self.core }
///     fn core_mut(&mut self) -> &mut ScpiInstrument { &mut self.core }
///     fn native_methods() -> &'static [(&'static str, NativeMethod<Self>)] { DMM_METHODS }
/// }
/// ```
pub trait Driver: Sized + 'static {
    /// The facade this driver is built on.
    fn core(&self) -> &ScpiInstrument;

    /// Mutable access to the facade.
    fn core_mut(&mut self) -> &mut ScpiInstrument;

    /// Hand-written methods, highest dispatch priority.
    fn native_methods() -> &'static [(&'static str, NativeMethod<Self>)] {
        &[]
    }

    /// Open the session.
    fn connect(&mut self) -> Result<()> {
        self.core_mut().connect()
    }

    /// Close the session.
    fn disconnect(&mut self) {
        self.core_mut().disconnect()
    }

    /// Calls `name` through the dispatch precedence.
    fn call(&mut self, name: &str, args: &CallArgs) -> Result<Reply> {
        if let Some((_, method)) = Self::native_methods().iter().find(|(n, _)| *n == name) {
            debug!(instrument = self.core().name(), "Dispatching '{}' to native method", name);
            return method(self, args);
        }
        self.core_mut().dispatch(name, args)
    }

    /// Names resolvable through tiers 1 and 2.
    fn available_methods(&self) -> AvailableMethods {
        let mut native: Vec<String> = Self::native_methods()
            .iter()
            .map(|(n, _)| n.to_string())
            .collect();
        native.sort();
        let registry: Vec<String> = self
            .core()
            .registry()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut combined: Vec<String> = native.iter().chain(registry.iter()).cloned().collect();
        combined.sort();
        combined.dedup();
        AvailableMethods {
            native,
            registry,
            combined,
        }
    }
}

/// Method names known to a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableMethods {
    /// Hand-written methods
    pub native: Vec<String>,
    /// Registry methods
    pub registry: Vec<String>,
    /// Union of both, sorted
    pub combined: Vec<String>,
}

/// Parsed `*IDN?` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// Manufacturer
    pub vendor: String,
    /// Model
    pub model: String,
    /// Serial number, may be `0`
    pub serial: String,
    /// Firmware revision
    pub firmware: String,
}

impl Identity {
    /// Splits `vendor,model,serial,firmware`. Missing trailing fields are empty.
    pub fn parse(response: &str) -> Option<Identity> {
        let mut fields = response.trim().splitn(4, ',').map(|f| f.trim().to_string());
        let vendor = fields.next().filter(|v| !v.is_empty())?;
        let model = fields.next().filter(|m| !m.is_empty())?;
        Some(Identity {
            vendor,
            model,
            serial: fields.next().unwrap_or_default(),
            firmware: fields.next().unwrap_or_default(),
        })
    }
}

/// The instrument facade: base instrument plus method registry.
#[derive(Debug)]
pub struct ScpiInstrument {
    instrument: Instrument,
    registry: MethodRegistry,
}

impl ScpiInstrument {
    /// Wrap an instrument and a registry.
    pub fn new(instrument: Instrument, registry: MethodRegistry) -> Self {
        Self {
            instrument,
            registry,
        }
    }

    /// Start building a facade for `name` at `address`.
    pub fn builder(name: impl Into<String>, address: impl Into<String>) -> InstrumentBuilder {
        InstrumentBuilder::new(name, address)
    }

    /// Instrument name.
    pub fn name(&self) -> &str {
        self.instrument.name()
    }

    /// The base instrument.
    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    /// Mutable base instrument.
    pub fn instrument_mut(&mut self) -> &mut Instrument {
        &mut self.instrument
    }

    /// The loaded registry.
    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    /// Open the session.
    pub fn connect(&mut self) -> Result<()> {
        self.instrument.connect()
    }

    /// Close the session.
    pub fn disconnect(&mut self) {
        self.instrument.disconnect()
    }

    /// Whether a session is open.
    pub fn is_connected(&self) -> bool {
        self.instrument.is_connected()
    }

    /// Lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.instrument.state()
    }

    /// Raw write.
    pub fn write(&mut self, command: &str) -> Result<()> {
        self.instrument.write(command)
    }

    /// Raw read.
    pub fn read(&mut self) -> Result<String> {
        self.instrument.read()
    }

    /// Raw query.
    pub fn query(&mut self, command: &str) -> Result<String> {
        self.instrument.query(command)
    }

    /// Settle delay.
    pub fn wait(&self, duration: Duration) {
        self.instrument.wait(duration)
    }

    /// Resolves `name` through the registry, falling back to a command path.
    ///
    /// Named arguments are only meaningful for registry methods; a command path
    /// given named arguments is a usage error.
    pub fn dispatch(&mut self, name: &str, args: &CallArgs) -> Result<Reply> {
        if self.registry.contains(name) {
            return self.call_registry(name, args);
        }

        let path = CommandPath::parse(name);
        if !args.named().is_empty() {
            return Err(InstrumentError::ProxyUsage {
                instrument: self.name().to_string(),
                path: path.to_string(),
                message: "command paths take positional arguments only".to_string(),
            });
        }
        debug!(instrument = self.name(), "Dispatching '{}' as command path", name);
        self.invoke(&path, args.positional())
    }

    /// Runs a registry method. Errors with `UnknownMethod` when it is not defined.
    pub fn call_registry(&mut self, method: &str, args: &CallArgs) -> Result<Reply> {
        let response = self.registry.execute(&mut self.instrument, method, args)?;
        Ok(Reply::from_response(response))
    }

    /// Root of a fresh command chain.
    pub fn proxy(&self) -> CommandPath {
        CommandPath::root()
    }

    /// Command chain bound to this instrument, starting at the dotted `path`.
    pub fn at(&mut self, path: &str) -> ProxyCall<'_> {
        ProxyCall {
            path: CommandPath::parse(path),
            target: self,
        }
    }

    /// Invokes a command path: query without arguments, write with them.
    pub fn invoke(&mut self, path: &CommandPath, args: &[Value]) -> Result<Reply> {
        match path.command(self.name(), args, self.registry.bool_format())? {
            ProxyCommand::Query(cmd) => Ok(Reply::coerce(&self.instrument.query(&cmd)?)),
            ProxyCommand::Write(cmd) => {
                self.instrument.write(&cmd)?;
                Ok(Reply::Empty)
            }
        }
    }

    /// Queries a command path with arguments: `<PATH>? <args>`.
    pub fn invoke_query(&mut self, path: &CommandPath, args: &[Value]) -> Result<Reply> {
        let cmd = path.query_command(self.name(), args, self.registry.bool_format())?;
        Ok(Reply::coerce(&self.instrument.query(&cmd)?))
    }

    /// `*IDN?`
    pub fn identify(&mut self) -> Result<Identity> {
        let response = self.instrument.query("*IDN?")?;
        Identity::parse(&response).ok_or_else(|| self.unexpected("*IDN?", response))
    }

    /// `*RST`
    pub fn reset(&mut self) -> Result<()> {
        self.instrument.write("*RST")
    }

    /// `*CLS`
    pub fn clear_status(&mut self) -> Result<()> {
        self.instrument.write("*CLS")
    }

    /// `*WAI`
    pub fn wait_for_op_complete(&mut self) -> Result<()> {
        self.instrument.write("*WAI")
    }

    /// `*STB?`
    pub fn status_byte(&mut self) -> Result<u8> {
        let response = self.instrument.query("*STB?")?;
        response
            .trim()
            .trim_start_matches('+')
            .parse::<u8>()
            .map_err(|_| self.unexpected("*STB?", response))
    }

    /// `*OPC?`, true once pending operations are complete.
    pub fn operation_complete(&mut self) -> Result<bool> {
        let response = self.instrument.query("*OPC?")?;
        match response.trim().trim_start_matches('+') {
            "1" => Ok(true),
            "0" => Ok(false),
            _ => Err(self.unexpected("*OPC?", response)),
        }
    }

    fn unexpected(&self, command: &str, response: String) -> InstrumentError {
        InstrumentError::UnexpectedResponse {
            instrument: self.name().to_string(),
            command: command.to_string(),
            response,
        }
    }
}

impl Driver for ScpiInstrument {
    fn core(&self) -> &ScpiInstrument {
        self
    }

    fn core_mut(&mut self) -> &mut ScpiInstrument {
        self
    }
}

/// Command chain bound to an instrument.
///
/// ```
/// use lab_control::adapters::MockTransport;
/// use lab_control::dispatch::ScpiInstrument;
///
/// let mock = MockTransport::new().with_response("SYST:ERR?", "0,\"No error\"");
/// let mut dmm = ScpiInstrument::builder("dmm", "mock").backend(mock).build().unwrap();
/// dmm.connect().unwrap();
/// let reply = dmm.at("syst").child("err").query().unwrap();
/// assert_eq!(reply.as_text(), Some("0,\"No error\""));
/// ```
pub struct ProxyCall<'a> {
    target: &'a mut ScpiInstrument,
    path: CommandPath,
}

impl<'a> ProxyCall<'a> {
    /// Append a segment
    #[must_use]
    pub fn child(self, segment: &str) -> Self {
        Self {
            path: self.path.child(segment),
            target: self.target,
        }
    }

    /// Append an index to the last segment
    #[must_use]
    pub fn index(self, n: u32) -> Self {
        Self {
            path: self.path.index(n),
            target: self.target,
        }
    }

    /// Path built so far.
    pub fn path(&self) -> &CommandPath {
        &self.path
    }

    /// Invoke: query without arguments, write with them.
    pub fn call(self, args: &[Value]) -> Result<Reply> {
        self.target.invoke(&self.path, args)
    }

    /// Invoke as a query.
    pub fn query(self) -> Result<Reply> {
        self.call(&[])
    }

    /// Query with arguments.
    pub fn query_with(self, args: &[Value]) -> Result<Reply> {
        self.target.invoke_query(&self.path, args)
    }
}

/// Builds a [`ScpiInstrument`].
///
/// Everything is resolved in [`InstrumentBuilder::build`]; a resource that
/// fails to load means no instrument is returned.
pub struct InstrumentBuilder {
    name: String,
    address: String,
    backend: Option<Box<dyn Transport>>,
    resource: Option<String>,
    registry: Option<MethodRegistry>,
    locator: ResourceLocator,
    trace: bool,
    bool_format: Option<BoolFormat>,
    timeout: Duration,
    required: Vec<String>,
}

impl InstrumentBuilder {
    /// Builder with the default TCP backend and no registry.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            backend: None,
            resource: None,
            registry: None,
            locator: ResourceLocator::new(),
            trace: false,
            bool_format: None,
            timeout: DEFAULT_TIMEOUT,
            required: Vec::new(),
        }
    }

    /// Use `backend` instead of the default TCP backend
    pub fn backend(mut self, backend: impl Transport + 'static) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    /// Use an already boxed backend
    pub fn boxed_backend(mut self, backend: Box<dyn Transport>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Load methods from the resource called `name`
    pub fn resource(mut self, name: impl Into<String>) -> Self {
        self.resource = Some(name.into());
        self
    }

    /// Resource used when neither a resource nor a registry was given
    pub fn default_resource(mut self, name: impl Into<String>) -> Self {
        if self.resource.is_none() && self.registry.is_none() {
            self.resource = Some(name.into());
        }
        self
    }

    /// Use an already loaded registry
    pub fn registry(mut self, registry: MethodRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Add a resource search path
    pub fn search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.locator.add_search_path(path);
        self
    }

    /// Replace the resource locator
    pub fn locator(mut self, locator: ResourceLocator) -> Self {
        self.locator = locator;
        self
    }

    /// Enable the wire trace
    pub fn trace(mut self, enabled: bool) -> Self {
        self.trace = enabled;
        self
    }

    /// Boolean convention for resources that declare none
    pub fn bool_format(mut self, format: BoolFormat) -> Self {
        self.bool_format = Some(format);
        self
    }

    /// Timeout of the default TCP backend
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fail the build unless the registry defines `methods`
    pub fn require_methods(mut self, methods: &[&str]) -> Self {
        self.required
            .extend(methods.iter().map(|m| m.to_string()));
        self
    }

    /// Apply trace flag, search paths, bool format and timeout from `settings`
    pub fn settings(mut self, settings: &Settings) -> Self {
        self.trace = settings.debug_stream;
        for path in &settings.resource_paths {
            self.locator.add_search_path(path.clone());
        }
        self.bool_format = Some(settings.bool_format);
        self.timeout = settings.timeout();
        self
    }

    /// Loads the registry and assembles the facade.
    pub fn build(self) -> Result<ScpiInstrument> {
        let mut registry = match (self.registry, &self.resource) {
            (Some(registry), _) => registry,
            (None, Some(resource)) => MethodRegistry::load_with(&self.locator, resource)?,
            (None, None) => MethodRegistry::empty(&self.name),
        };
        let required: Vec<&str> = self.required.iter().map(String::as_str).collect();
        registry.require(&required)?;
        if let Some(format) = self.bool_format {
            registry.apply_default_bool_format(format);
        }

        let timeout = self.timeout;
        let backend = self
            .backend
            .unwrap_or_else(|| Box::new(TcpAdapter::new().with_timeout(timeout)));
        let instrument = Instrument::new(self.name, self.address, backend).with_trace(self.trace);

        info!(
            instrument = instrument.name(),
            backend = instrument.backend_type(),
            "Built instrument with {} registry method(s) from {}",
            registry.len(),
            registry.origin()
        );
        Ok(ScpiInstrument::new(instrument, registry))
    }
}
