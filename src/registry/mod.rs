//! Method registry: named command sequences compiled from a YAML resource.
//!
//! A resource is loaded once when a driver is built. Loading parses the YAML,
//! validates it and compiles every method into a [`MethodSpec`]; any problem
//! aborts with [`InstrumentError::ConfigLoad`], so a driver never exists with a
//! half-valid registry.
//!
//! Calling a method happens in two phases:
//!
//! 1. **Render.** Arguments are bound to parameters (positional first, then
//!    named), type-checked, defaulted and substituted into every template,
//!    including those of nested `call` steps. Any mismatch fails here, before
//!    anything is sent.
//! 2. **Send.** Rendered commands go out through [`Instrument::write`] in order.
//!    A trailing query goes through [`Instrument::query`] and its response is the
//!    method's only return value.

pub mod resource;
pub mod schema;
pub mod template;
pub mod value;

pub use resource::{ResourceLocator, ResourceText};
pub use schema::{ResourceDocument, StepKind, ValidationIssue};
pub use template::Template;
pub use value::{format_number, BoolFormat, CallArgs, ParamType, Value};

use crate::error::{InstrumentError, Result};
use crate::instrument::Instrument;
use schema::{validate_document, MethodDocument, StepDocument};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, warn};

/// A declared method parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Parameter name, also its placeholder name
    pub name: String,
    /// Declared type
    pub kind: ParamType,
    /// Whether callers must supply it when there is no default
    pub required: bool,
    /// Value used when the caller omits it
    pub default: Option<Value>,
}

/// Argument passed to a nested method call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    /// Fixed value from the resource
    Literal(Value),
    /// The caller's parameter of this name, passed through with its type
    Forward(String),
    /// Text rendered from the caller's parameters
    Template(Template),
}

/// One compiled step of a method.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Send a rendered command
    Command {
        /// Command text
        template: Template,
        /// Write or query
        kind: StepKind,
        /// Settle delay after sending
        wait: Duration,
    },
    /// Run another method of the same registry
    Call {
        /// Target method
        method: String,
        /// Named arguments for the target
        args: Vec<(String, CallArg)>,
    },
}

/// A fully validated method.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSpec {
    name: String,
    description: String,
    parameters: Vec<Parameter>,
    steps: Vec<Step>,
    returns_value: bool,
}

impl MethodSpec {
    /// Method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Free-text description from the resource.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Parameters in declared order.
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Parameter lookup by name.
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Compiled steps in order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Whether a call yields the response of a trailing query.
    pub fn returns_value(&self) -> bool {
        self.returns_value
    }

    /// Human-readable signature, e.g. `source_voltage(voltage: float, limit: float = 0.1)`.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|p| match (&p.default, p.required) {
                (Some(d), _) => format!("{}: {} = {}", p.name, p.kind, d),
                (None, true) => format!("{}: {}", p.name, p.kind),
                (None, false) => format!("[{}: {}]", p.name, p.kind),
            })
            .collect();
        let arrow = if self.returns_value { " -> reply" } else { "" };
        format!("{}({}){}", self.name, params.join(", "), arrow)
    }
}

/// A command ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderedStep {
    /// Send through `write`
    Write(String),
    /// Send through `query`; always last
    Query(String),
    /// Settle delay
    Wait(Duration),
}

impl RenderedStep {
    /// Command text, if this step sends one.
    pub fn command(&self) -> Option<&str> {
        match self {
            RenderedStep::Write(cmd) | RenderedStep::Query(cmd) => Some(cmd.as_str()),
            RenderedStep::Wait(_) => None,
        }
    }
}

/// Introspection record for one method.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodSummary {
    /// Method name
    pub name: String,
    /// See [`MethodSpec::signature`]
    pub signature: String,
    /// Description from the resource
    pub description: String,
    /// Whether the method returns a reply
    pub returns_value: bool,
}

/// Table of methods loaded from one resource.
#[derive(Debug, Clone)]
pub struct MethodRegistry {
    name: String,
    description: String,
    origin: String,
    bool_format: BoolFormat,
    bool_format_declared: bool,
    methods: HashMap<String, MethodSpec>,
}

impl MethodRegistry {
    /// A registry with no methods, for drivers without a resource.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            origin: "none".to_string(),
            bool_format: BoolFormat::default(),
            bool_format_declared: false,
            methods: HashMap::new(),
        }
    }

    /// Loads `resource` through the default [`ResourceLocator`].
    pub fn load(resource: &str) -> Result<Self> {
        Self::load_with(&ResourceLocator::new(), resource)
    }

    /// Loads `resource` through `locator`.
    pub fn load_with(locator: &ResourceLocator, resource: &str) -> Result<Self> {
        let found = locator.locate(resource)?;
        let mut registry = Self::from_yaml_str(resource, &found.text)?;
        registry.origin = found.origin;
        Ok(registry)
    }

    /// Parses and compiles YAML text. `resource` names it in errors.
    pub fn from_yaml_str(resource: &str, text: &str) -> Result<Self> {
        let doc: ResourceDocument = serde_yaml::from_str(text)
            .map_err(|e| InstrumentError::config_load(resource, format!("malformed YAML: {e}")))?;
        Self::from_document(resource, doc)
    }

    /// Validates and compiles a parsed document.
    pub fn from_document(resource: &str, doc: ResourceDocument) -> Result<Self> {
        let mut issues = validate_document(&doc);

        let mut methods = HashMap::new();
        for (i, method) in doc.methods.iter().enumerate() {
            let spec = compile_method(i, method, &mut issues);
            methods.entry(spec.name.clone()).or_insert(spec);
        }
        if issues.is_empty() {
            check_call_graph(&doc.methods, &mut methods, &mut issues);
        }

        if !issues.is_empty() {
            let details: Vec<String> = issues.iter().map(ToString::to_string).collect();
            return Err(InstrumentError::config_load(resource, details.join("; ")));
        }

        let name = doc.name.unwrap_or_else(|| resource.to_string());
        debug!("Compiled {} method(s) from resource '{}'", methods.len(), name);
        Ok(Self {
            name,
            description: doc.description,
            origin: "inline".to_string(),
            bool_format: doc.bool_format.unwrap_or_default(),
            bool_format_declared: doc.bool_format.is_some(),
            methods,
        })
    }

    /// Resource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resource description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// File path or `embedded:<name>` the registry came from.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Boolean convention in effect.
    pub fn bool_format(&self) -> BoolFormat {
        self.bool_format
    }

    /// Applies `format` unless the resource declared its own.
    pub fn apply_default_bool_format(&mut self, format: BoolFormat) {
        if !self.bool_format_declared {
            self.bool_format = format;
        }
    }

    /// Method lookup.
    pub fn get(&self, name: &str) -> Option<&MethodSpec> {
        self.methods.get(name)
    }

    /// Whether `name` is defined.
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Method names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// True when no methods are defined.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Signatures and descriptions of every method, sorted by name.
    pub fn describe(&self) -> Vec<MethodSummary> {
        self.names()
            .into_iter()
            .filter_map(|name| self.get(name))
            .map(|spec| MethodSummary {
                name: spec.name.clone(),
                signature: spec.signature(),
                description: spec.description.clone(),
                returns_value: spec.returns_value,
            })
            .collect()
    }

    /// Fails with `ConfigLoad` unless every method in `required` is defined.
    pub fn require(&self, required: &[&str]) -> Result<()> {
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|name| !self.contains(name))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(InstrumentError::config_load(
                &self.name,
                format!("missing required method(s): {}", missing.join(", ")),
            ))
        }
    }

    /// Binds `args` and renders every command `method` would send.
    ///
    /// `instrument` is only used for error context.
    pub fn render(&self, instrument: &str, method: &str, args: &CallArgs) -> Result<Vec<RenderedStep>> {
        let spec = self.get(method).ok_or_else(|| InstrumentError::UnknownMethod {
            instrument: instrument.to_string(),
            method: method.to_string(),
        })?;
        let mut out = Vec::new();
        self.render_into(instrument, spec, args, &mut out)?;

        // Nested calls can leave queries mid-sequence; only the last command is read back
        let last_command = out
            .iter()
            .rposition(|step| !matches!(step, RenderedStep::Wait(_)));
        for (i, step) in out.iter_mut().enumerate() {
            if Some(i) == last_command {
                continue;
            }
            if let RenderedStep::Query(cmd) = step {
                *step = RenderedStep::Write(std::mem::take(cmd));
            }
        }
        Ok(out)
    }

    /// Renders `method` and sends it through `instrument`.
    ///
    /// Returns the response of a trailing query, or `None`.
    pub fn execute(
        &self,
        instrument: &mut Instrument,
        method: &str,
        args: &CallArgs,
    ) -> Result<Option<String>> {
        let steps = self.render(instrument.name(), method, args)?;
        debug!(
            instrument = instrument.name(),
            "Executing registry method '{}' ({} step(s))",
            method,
            steps.len()
        );

        let mut reply = None;
        for step in steps {
            match step {
                RenderedStep::Write(cmd) => instrument.write(&cmd)?,
                RenderedStep::Query(cmd) => reply = Some(instrument.query(&cmd)?),
                RenderedStep::Wait(delay) => instrument.wait(delay),
            }
        }
        Ok(reply)
    }

    fn render_into(
        &self,
        instrument: &str,
        spec: &MethodSpec,
        args: &CallArgs,
        out: &mut Vec<RenderedStep>,
    ) -> Result<()> {
        let bound = bind(instrument, spec, args)?;
        let text: HashMap<String, String> = bound
            .iter()
            .map(|(k, v)| (k.clone(), v.render(self.bool_format)))
            .collect();
        let unbound = |missing: String| InstrumentError::ConfigBinding {
            instrument: instrument.to_string(),
            method: spec.name.clone(),
            message: format!("no value for placeholder {{{missing}}}"),
        };

        for step in &spec.steps {
            match step {
                Step::Command {
                    template,
                    kind,
                    wait,
                } => {
                    let command = template.render(&text).map_err(unbound)?;
                    out.push(match kind {
                        StepKind::Write => RenderedStep::Write(command),
                        StepKind::Query => RenderedStep::Query(command),
                    });
                    if !wait.is_zero() {
                        out.push(RenderedStep::Wait(*wait));
                    }
                }
                Step::Call { method, args } => {
                    let callee = self.get(method).ok_or_else(|| InstrumentError::UnknownMethod {
                        instrument: instrument.to_string(),
                        method: method.clone(),
                    })?;
                    let mut nested = CallArgs::new();
                    for (name, arg) in args {
                        let value = match arg {
                            CallArg::Literal(value) => value.clone(),
                            // An omitted optional argument falls through to the callee's default.
                            CallArg::Forward(param) => match bound.get(param) {
                                Some(value) => value.clone(),
                                None => continue,
                            },
                            CallArg::Template(t) => Value::Str(t.render(&text).map_err(unbound)?),
                        };
                        nested.insert(name.clone(), value);
                    }
                    self.render_into(instrument, callee, &nested, out)?;
                }
            }
        }
        Ok(())
    }
}

/// Binds call arguments to parameters, type-checks them and fills defaults.
fn bind(instrument: &str, spec: &MethodSpec, args: &CallArgs) -> Result<HashMap<String, Value>> {
    let binding_error = |message: String| InstrumentError::ConfigBinding {
        instrument: instrument.to_string(),
        method: spec.name.clone(),
        message,
    };

    if args.positional().len() > spec.parameters.len() {
        return Err(binding_error(format!(
            "takes {} argument(s) but {} positional were given",
            spec.parameters.len(),
            args.positional().len()
        )));
    }

    let mut supplied: HashMap<&str, &Value> = spec
        .parameters
        .iter()
        .zip(args.positional())
        .map(|(p, v)| (p.name.as_str(), v))
        .collect();
    for (name, value) in args.named() {
        if spec.parameter(name).is_none() {
            return Err(binding_error(format!("unexpected argument '{name}'")));
        }
        if supplied.insert(name.as_str(), value).is_some() {
            return Err(binding_error(format!("multiple values for argument '{name}'")));
        }
    }

    let mut bound = HashMap::with_capacity(spec.parameters.len());
    for param in &spec.parameters {
        if let Some(value) = supplied.get(param.name.as_str()) {
            let typed = param.kind.coerce(value).ok_or_else(|| InstrumentError::Validation {
                instrument: instrument.to_string(),
                method: spec.name.clone(),
                parameter: param.name.clone(),
                expected: param.kind.to_string(),
                found: format!("{} {}", value.kind(), value),
            })?;
            bound.insert(param.name.clone(), typed);
        }
    }

    for param in &spec.parameters {
        if bound.contains_key(&param.name) {
            continue;
        }
        match &param.default {
            Some(default) => {
                bound.insert(param.name.clone(), default.clone());
            }
            None if param.required => {
                return Err(binding_error(format!(
                    "missing required argument '{}'",
                    param.name
                )));
            }
            None => {}
        }
    }

    Ok(bound)
}

fn issue(issues: &mut Vec<ValidationIssue>, path: String, message: String) {
    issues.push(ValidationIssue { path, message });
}

/// Compiles one method. Problems are appended to `issues`.
fn compile_method(index: usize, doc: &MethodDocument, issues: &mut Vec<ValidationIssue>) -> MethodSpec {
    let path = format!("methods[{index}]");

    let parameters: Vec<Parameter> = doc
        .parameters
        .iter()
        .map(|p| Parameter {
            name: p.name.clone(),
            kind: p.kind,
            required: p.required,
            default: p
                .default
                .as_ref()
                .and_then(Value::from_yaml)
                .and_then(|v| p.kind.coerce(&v)),
        })
        .collect();
    let declared = |name: &str| parameters.iter().any(|p| p.name == name);

    let mut steps = Vec::with_capacity(doc.commands.len());
    for (j, step) in doc.commands.iter().enumerate() {
        let spath = format!("{path}.commands[{j}]");
        let is_last = j + 1 == doc.commands.len();

        match step {
            StepDocument::Plain(text)
            | StepDocument::Command { cmd: text, .. } => {
                let (explicit, wait_ms) = match step {
                    StepDocument::Command { kind, wait_ms, .. } => (*kind, *wait_ms),
                    _ => (None, 0),
                };
                let template = match Template::parse(text) {
                    Ok(t) => t,
                    Err(message) => {
                        issue(issues, spath, message);
                        continue;
                    }
                };
                for name in template.placeholders() {
                    if !declared(name) {
                        issue(
                            issues,
                            spath.clone(),
                            format!(
                                "placeholder {{{name}}} in '{}' does not match any declared parameter",
                                doc.name
                            ),
                        );
                    }
                }
                let kind = explicit.unwrap_or(if template.is_query() {
                    StepKind::Query
                } else {
                    StepKind::Write
                });
                // Only a trailing query is read back
                let kind = if kind == StepKind::Query && !is_last {
                    warn!(
                        "{}: query \"{}\" is not the last command of '{}', sending it as a write",
                        spath,
                        template.source(),
                        doc.name
                    );
                    StepKind::Write
                } else {
                    kind
                };
                steps.push(Step::Command {
                    template,
                    kind,
                    wait: Duration::from_millis(wait_ms),
                });
            }
            StepDocument::Call { call, args } => {
                let mut compiled = Vec::with_capacity(args.len());
                for (name, raw) in args {
                    match compile_call_arg(raw) {
                        Ok(arg) => {
                            let referenced: Vec<&String> = match &arg {
                                CallArg::Forward(p) => vec![p],
                                CallArg::Template(t) => t.placeholders().iter().collect(),
                                CallArg::Literal(_) => Vec::new(),
                            };
                            for p in referenced {
                                if !declared(p) {
                                    issue(
                                        issues,
                                        format!("{spath}.args.{name}"),
                                        format!("placeholder {{{p}}} does not match any declared parameter"),
                                    );
                                }
                            }
                            compiled.push((name.clone(), arg));
                        }
                        Err(message) => issue(issues, format!("{spath}.args.{name}"), message),
                    }
                }
                steps.push(Step::Call {
                    method: call.clone(),
                    args: compiled,
                });
            }
        }
    }

    MethodSpec {
        name: doc.name.clone(),
        description: doc.description.clone(),
        parameters,
        steps,
        returns_value: false,
    }
}

fn compile_call_arg(raw: &serde_yaml::Value) -> std::result::Result<CallArg, String> {
    if let serde_yaml::Value::String(text) = raw {
        let template = Template::parse(text)?;
        if let Some(param) = template.single_placeholder() {
            return Ok(CallArg::Forward(param.to_string()));
        }
        if template.placeholders().is_empty() {
            return Ok(CallArg::Literal(Value::Str(template.render(&HashMap::new())?)));
        }
        return Ok(CallArg::Template(template));
    }
    Value::from_yaml(raw)
        .map(CallArg::Literal)
        .ok_or_else(|| format!("argument must be a scalar, got {raw:?}"))
}

#[derive(Clone, Copy)]
enum Mark {
    Visiting,
    Done(bool),
}

/// Checks call targets, argument names and acyclicity, then records which
/// methods return a value.
fn check_call_graph(
    docs: &[MethodDocument],
    methods: &mut HashMap<String, MethodSpec>,
    issues: &mut Vec<ValidationIssue>,
) {
    for (i, doc) in docs.iter().enumerate() {
        let Some(spec) = methods.get(&doc.name) else { continue };
        for (j, step) in spec.steps.iter().enumerate() {
            let Step::Call { method, args } = step else { continue };
            let path = format!("methods[{i}].commands[{j}]");
            match methods.get(method) {
                None => issue(issues, path, format!("call to undefined method '{method}'")),
                Some(target) => {
                    for (name, _) in args {
                        if target.parameter(name).is_none() {
                            issue(
                                issues,
                                path.clone(),
                                format!("method '{method}' has no parameter '{name}'"),
                            );
                        }
                    }
                }
            }
        }
    }
    if !issues.is_empty() {
        return;
    }

    let returns = match return_values(methods) {
        Ok(returns) => returns,
        Err(cycle) => {
            issue(issues, "methods".to_string(), cycle);
            return;
        }
    };

    for (i, doc) in docs.iter().enumerate() {
        let Some(spec) = methods.get(&doc.name) else { continue };
        let last = spec.steps.len().saturating_sub(1);
        for (j, step) in spec.steps.iter().enumerate() {
            if let Step::Call { method, .. } = step {
                if j != last && returns.get(method).copied().unwrap_or(false) {
                    warn!(
                        "methods[{}].commands[{}]: reply of '{}' is discarded, its query is sent as a write",
                        i, j, method
                    );
                }
            }
        }
    }

    for spec in methods.values_mut() {
        spec.returns_value = returns.get(&spec.name).copied().unwrap_or(false);
    }
}

/// Walks the call graph depth-first. Fails on the first cycle found.
fn return_values(
    methods: &HashMap<String, MethodSpec>,
) -> std::result::Result<HashMap<String, bool>, String> {
    let graph: BTreeMap<&str, Vec<&str>> = methods
        .values()
        .map(|spec| {
            let callees = spec
                .steps
                .iter()
                .filter_map(|s| match s {
                    Step::Call { method, .. } => Some(method.as_str()),
                    Step::Command { .. } => None,
                })
                .collect();
            (spec.name.as_str(), callees)
        })
        .collect();
    let tails: HashMap<&str, Option<&Step>> = methods
        .values()
        .map(|spec| (spec.name.as_str(), spec.steps.last()))
        .collect();

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut stack: Vec<&str> = Vec::new();
    for &name in graph.keys() {
        visit(name, &graph, &tails, &mut marks, &mut stack)?;
    }

    Ok(marks
        .into_iter()
        .filter_map(|(name, mark)| match mark {
            Mark::Done(r) => Some((name.to_string(), r)),
            Mark::Visiting => None,
        })
        .collect())
}

fn visit<'a>(
    name: &'a str,
    graph: &BTreeMap<&'a str, Vec<&'a str>>,
    tails: &HashMap<&'a str, Option<&Step>>,
    marks: &mut HashMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
) -> std::result::Result<bool, String> {
    match marks.get(name) {
        Some(Mark::Done(returns)) => return Ok(*returns),
        Some(Mark::Visiting) => {
            let start = stack.iter().position(|n| *n == name).unwrap_or(0);
            let mut cycle: Vec<&str> = stack[start..].to_vec();
            cycle.push(name);
            return Err(format!("call cycle {}", cycle.join(" -> ")));
        }
        None => {}
    }

    marks.insert(name, Mark::Visiting);
    stack.push(name);
    if let Some(callees) = graph.get(name) {
        for &callee in callees {
            visit(callee, graph, tails, marks, stack)?;
        }
    }
    stack.pop();

    let returns = match tails.get(name).copied().flatten() {
        Some(Step::Command { kind, .. }) => *kind == StepKind::Query,
        Some(Step::Call { method, .. }) => {
            matches!(marks.get(method.as_str()), Some(Mark::Done(true)))
        }
        None => false,
    };
    marks.insert(name, Mark::Done(returns));
    Ok(returns)
}
