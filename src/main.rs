//! `labctl`: command-line access to lab instruments.
//!
//! # Usage
//!
//! List the methods of a resource:
//! ```bash
//! labctl methods keithley_2450
//! labctl methods ./my_smu.yaml --json
//! ```
//!
//! Show what a call would send, without hardware:
//! ```bash
//! labctl render keithley_2450 source_voltage voltage=1.5
//! ```
//!
//! Talk to an instrument:
//! ```bash
//! labctl send --address TCPIP0::192.168.0.95::INSTR "*IDN?"
//! labctl call --address TCPIP0::192.168.0.95::INSTR --resource keithley_2450 enable_source state=true
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lab_control::adapters::{MockTransport, TcpAdapter, Transport};
use lab_control::config::Settings;
use lab_control::dispatch::{Driver, InstrumentBuilder, ScpiInstrument};
use lab_control::drivers::Keithley2450;
use lab_control::logging;
use lab_control::registry::{CallArgs, MethodRegistry, RenderedStep, ResourceLocator};
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser)]
#[command(name = "labctl")]
#[command(about = "Drive lab instruments through hand-written, YAML-defined or ad-hoc SCPI methods", long_about = None)]
struct Cli {
    /// Settings file (TOML). `LABCTL_*` environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Extra resource search directory (repeatable)
    #[arg(long = "resource-path", global = true)]
    resource_paths: Vec<PathBuf>,

    /// Trace every command sent and response received
    #[arg(long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the methods a resource defines
    Methods {
        /// Resource name or path
        resource: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the commands a call would send, without hardware
    Render {
        /// Resource name or path
        resource: String,

        /// Method name or dotted command path
        method: String,

        /// Arguments: `name=value` or positional `value`
        args: Vec<String>,
    },

    /// Send one raw command; commands ending in `?` are queried
    Send {
        #[command(flatten)]
        target: Target,

        /// Command text
        command: String,
    },

    /// Call a method through the full dispatch chain
    Call {
        #[command(flatten)]
        target: Target,

        /// Method resource
        #[arg(long)]
        resource: Option<String>,

        /// Driver providing hand-written methods
        #[arg(long, value_enum, default_value_t = DriverKind::Scpi)]
        driver: DriverKind,

        /// Method name or dotted command path
        method: String,

        /// Arguments: `name=value` or positional `value`
        args: Vec<String>,
    },
}

#[derive(clap::Args)]
struct Target {
    /// Instrument address
    #[arg(long)]
    address: String,

    /// Backend used to reach it
    #[arg(long, value_enum, default_value_t = BackendKind::Tcp)]
    backend: BackendKind,

    /// Baud rate for the serial backend
    #[arg(long, default_value_t = 9600)]
    baud: u32,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendKind {
    Tcp,
    Serial,
    Visa,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DriverKind {
    /// Registry and command paths only
    Scpi,
    /// Keithley 2450 hand-written methods first
    Keithley2450,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    settings.resource_paths.extend(cli.resource_paths.iter().cloned());
    settings.debug_stream |= cli.trace;
    settings.validate().map_err(anyhow::Error::msg)?;
    logging::init_from_settings(&settings).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Methods { resource, json } => list_methods(&settings, &resource, json),
        Commands::Render {
            resource,
            method,
            args,
        } => render(&settings, &resource, &method, &args),
        Commands::Send { target, command } => send(&settings, &target, &command),
        Commands::Call {
            target,
            resource,
            driver,
            method,
            args,
        } => call(&settings, &target, resource, driver, &method, &args),
    }
}

fn locator(settings: &Settings) -> ResourceLocator {
    settings
        .resource_paths
        .iter()
        .fold(ResourceLocator::new(), |locator, path| locator.with_search_path(path))
}

fn list_methods(settings: &Settings, resource: &str, json: bool) -> Result<()> {
    let registry = MethodRegistry::load_with(&locator(settings), resource)?;
    let summaries = registry.describe();

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    println!("{} ({})", registry.name(), registry.origin());
    if !registry.description().is_empty() {
        println!("  {}", registry.description());
    }
    for summary in summaries {
        if summary.description.is_empty() {
            println!("  {}", summary.signature);
        } else {
            println!("  {:<60} {}", summary.signature, summary.description);
        }
    }
    Ok(())
}

fn render(settings: &Settings, resource: &str, method: &str, args: &[String]) -> Result<()> {
    let args = CallArgs::from_pairs(args);
    let mut registry = MethodRegistry::load_with(&locator(settings), resource)?;
    registry.apply_default_bool_format(settings.bool_format);

    if registry.contains(method) {
        for step in registry.render("labctl", method, &args)? {
            match step {
                RenderedStep::Write(cmd) => println!("{cmd}"),
                RenderedStep::Query(cmd) => println!("{cmd}    # query"),
                RenderedStep::Wait(delay) => println!("# wait {}ms", delay.as_millis()),
            }
        }
        return Ok(());
    }

    // Not in the registry: show what the command-path fallback would send
    let mock = MockTransport::new();
    let wire = mock.handle();
    let mut instrument = ScpiInstrument::builder("labctl", "mock::render")
        .backend(mock)
        .registry(registry)
        .build()?;
    instrument.connect()?;
    instrument.call(method, &args)?;
    for cmd in wire.sent() {
        println!("{cmd}");
    }
    Ok(())
}

fn backend(settings: &Settings, target: &Target) -> Result<Box<dyn Transport>> {
    let backend: Box<dyn Transport> = match target.backend {
        BackendKind::Tcp => Box::new(TcpAdapter::new().with_timeout(settings.timeout())),
        BackendKind::Serial => serial_backend(settings, target.baud)?,
        BackendKind::Visa => visa_backend(settings)?,
    };
    debug!("Using {} backend for {}", backend.adapter_type(), target.address);
    Ok(backend)
}

#[cfg(feature = "instrument_serial")]
fn serial_backend(settings: &Settings, baud: u32) -> Result<Box<dyn Transport>> {
    Ok(Box::new(
        lab_control::adapters::SerialAdapter::new(baud).with_timeout(settings.timeout()),
    ))
}

#[cfg(not(feature = "instrument_serial"))]
fn serial_backend(_settings: &Settings, _baud: u32) -> Result<Box<dyn Transport>> {
    bail!("labctl was built without the instrument_serial feature")
}

#[cfg(feature = "instrument_visa")]
fn visa_backend(settings: &Settings) -> Result<Box<dyn Transport>> {
    Ok(Box::new(
        lab_control::adapters::VisaAdapter::new().with_timeout(settings.timeout()),
    ))
}

#[cfg(not(feature = "instrument_visa"))]
fn visa_backend(_settings: &Settings) -> Result<Box<dyn Transport>> {
    bail!("labctl was built without the instrument_visa feature")
}

fn builder(settings: &Settings, target: &Target) -> Result<InstrumentBuilder> {
    Ok(ScpiInstrument::builder("labctl", target.address.as_str())
        .boxed_backend(backend(settings, target)?)
        .settings(settings))
}

fn send(settings: &Settings, target: &Target, command: &str) -> Result<()> {
    let mut instrument = builder(settings, target)?.build()?;
    instrument.connect()?;
    if command.trim_end().ends_with('?') {
        println!("{}", instrument.query(command)?);
    } else {
        instrument.write(command)?;
    }
    instrument.disconnect();
    Ok(())
}

fn call(
    settings: &Settings,
    target: &Target,
    resource: Option<String>,
    driver: DriverKind,
    method: &str,
    args: &[String],
) -> Result<()> {
    let args = CallArgs::from_pairs(args);
    let mut builder = builder(settings, target)?;
    if let Some(resource) = resource {
        if driver == DriverKind::Keithley2450 {
            bail!("--resource cannot be combined with --driver keithley2450");
        }
        builder = builder.resource(resource);
    }

    let reply = match driver {
        DriverKind::Scpi => {
            let mut instrument = builder.build()?;
            instrument.connect()?;
            instrument.call(method, &args)?
        }
        DriverKind::Keithley2450 => {
            let mut smu = Keithley2450::from_builder(builder)?;
            smu.connect()?;
            smu.call(method, &args)?
        }
    };

    if !reply.is_empty() {
        println!("{reply}");
    }
    Ok(())
}
