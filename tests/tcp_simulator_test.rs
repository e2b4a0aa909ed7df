//! Raw-Socket SCPI Integration Test
//!
//! Runs a line-oriented SCPI simulator on a loopback socket and drives it
//! through the default TCP backend:
//! - resource methods render onto the wire in order
//! - queries are answered on the same session
//! - a silent instrument times out and leaves the driver in `Error`

use anyhow::Result;
use lab_control::adapters::TcpAdapter;
use lab_control::capabilities::Smu;
use lab_control::dispatch::{Driver, ScpiInstrument};
use lab_control::drivers::GenericSmu;
use lab_control::registry::CallArgs;
use lab_control::{ConnectionState, InstrumentError, TransportError};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

// =============================================================================
// Simulator
// =============================================================================

/// Accepts one session, records every received line and answers the queries
/// it knows. Unknown queries get no reply.
struct Simulator {
    address: String,
    received: Arc<Mutex<Vec<String>>>,
    worker: JoinHandle<()>,
}

impl Simulator {
    fn start(answers: &[(&str, &str)]) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let address = listener.local_addr()?.to_string();
        let answers: HashMap<String, String> = answers
            .iter()
            .map(|(q, a)| (q.to_string(), a.to_string()))
            .collect();
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);

        let worker = thread::spawn(move || {
            let Ok((stream, _)) = listener.accept() else {
                return;
            };
            let Ok(mut writer) = stream.try_clone() else {
                return;
            };
            for line in BufReader::new(stream).lines() {
                let Ok(line) = line else { break };
                let line = line.trim().to_string();
                log.lock().unwrap().push(line.clone());
                if let Some(answer) = answers.get(&line) {
                    if writeln!(writer, "{answer}").is_err() {
                        break;
                    }
                }
            }
        });

        Ok(Self {
            address,
            received,
            worker,
        })
    }

    fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Waits for the client to hang up, then returns everything received.
    fn finish(self) -> Vec<String> {
        self.worker.join().unwrap();
        let received = self.received.lock().unwrap().clone();
        received
    }
}

fn smu(address: &str, timeout: Duration) -> Result<GenericSmu> {
    let builder = ScpiInstrument::builder("smu", address).timeout(timeout);
    Ok(GenericSmu::from_builder(builder)?)
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_resource_methods_over_socket() -> Result<()> {
    let sim = Simulator::start(&[
        ("*IDN?", "KEITHLEY INSTRUMENTS,MODEL 2400,4103526,C33"),
        ("MEAS:CURR?", "+1.000000E-03"),
    ])?;
    let mut smu = smu(&sim.address, Duration::from_secs(2))?;
    smu.connect()?;

    let id = smu.core_mut().identify()?;
    assert_eq!(id.vendor, "KEITHLEY INSTRUMENTS");
    assert_eq!(id.model, "MODEL 2400");

    smu.source_voltage(0.5, 0.02)?;
    smu.enable_source(true)?;
    let amps = smu.measure_current()?;
    assert!((amps - 1e-3).abs() < 1e-12);

    smu.disconnect();
    assert_eq!(
        sim.finish(),
        vec![
            "*IDN?",
            "SOUR:FUNC VOLT",
            "SOUR:VOLT 0.5",
            "SENS:CURR:PROT 0.02",
            "OUTP ON",
            "MEAS:CURR?",
        ]
    );
    Ok(())
}

#[test]
fn test_command_path_fallback_over_socket() -> Result<()> {
    let sim = Simulator::start(&[("SYST:BEEP?", "0")])?;
    let mut smu = smu(&sim.address, Duration::from_secs(2))?;
    smu.connect()?;

    smu.call("syst.beep", &CallArgs::new().arg(true))?;
    let reply = smu.call("syst.beep", &CallArgs::new())?;
    assert_eq!(reply.to_bool(), Some(false));

    smu.disconnect();
    assert_eq!(sim.finish(), vec!["SYST:BEEP ON", "SYST:BEEP?"]);
    Ok(())
}

#[test]
fn test_silent_instrument_times_out() -> Result<()> {
    let sim = Simulator::start(&[])?;
    let mut smu = smu(&sim.address, Duration::from_millis(200))?;
    smu.connect()?;

    let err = smu.measure_voltage().unwrap_err();
    assert!(
        matches!(
            err,
            InstrumentError::Transport { ref command, source: TransportError::Timeout(_), .. }
                if command == "MEAS:VOLT?"
        ),
        "unexpected error: {err}"
    );
    assert_eq!(smu.core().state(), ConnectionState::Error);
    assert_eq!(sim.received(), vec!["MEAS:VOLT?"], "query sent once, not retried");

    smu.disconnect();
    sim.finish();
    Ok(())
}

#[test]
fn test_unreachable_address_fails_connect() -> Result<()> {
    // Bind then drop to get a port nothing listens on
    let port = TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
    let backend = TcpAdapter::new().with_timeout(Duration::from_millis(200));
    let mut dut = ScpiInstrument::builder("dut", format!("127.0.0.1:{port}"))
        .backend(backend)
        .build()?;

    let err = dut.connect().unwrap_err();
    assert!(matches!(
        err,
        InstrumentError::Transport { source: TransportError::ConnectFailed { .. }, .. }
    ));
    assert_eq!(dut.state(), ConnectionState::Error);
    Ok(())
}
