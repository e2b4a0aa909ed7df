//! Binary Frame Protocol Integration Test
//!
//! Drives the Standa 8SMC4 driver against a loopback controller simulator
//! that decodes 4-byte command codes with little-endian arguments:
//! - absolute and relative moves update the simulated position
//! - fixed-length responses are decoded into typed values
//! - frames are sent exactly as the controller expects them

use anyhow::Result;
use lab_control::capabilities::MotorStage;
use lab_control::drivers::{MotorType, Standa8Smc4, StepperCalibration};
use lab_control::{ConnectionState, InstrumentError};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Frame as received: code plus raw argument
#[derive(Debug, Clone, PartialEq)]
struct Frame {
    code: String,
    arg: Option<i32>,
}

struct Controller {
    address: String,
    frames: Arc<Mutex<Vec<Frame>>>,
    worker: JoinHandle<()>,
}

impl Controller {
    fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let address = listener.local_addr()?.to_string();
        let frames = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&frames);

        let worker = thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                serve(stream, &log);
            }
        });

        Ok(Self {
            address,
            frames,
            worker,
        })
    }

    fn finish(self) -> Vec<Frame> {
        self.worker.join().unwrap();
        let frames = self.frames.lock().unwrap().clone();
        frames
    }
}

fn read_i32(stream: &mut TcpStream) -> Option<i32> {
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).ok()?;
    Some(i32::from_le_bytes(buf))
}

fn serve(mut stream: TcpStream, log: &Mutex<Vec<Frame>>) {
    let mut position: i32 = 0;
    let mut code = [0u8; 4];

    while stream.read_exact(&mut code).is_ok() {
        let code = String::from_utf8_lossy(&code).to_string();
        let arg = match code.as_str() {
            "move" | "movr" | "sels" => match read_i32(&mut stream) {
                Some(v) => Some(v),
                None => break,
            },
            _ => None,
        };
        log.lock().unwrap().push(Frame {
            code: code.clone(),
            arg,
        });

        let reply: Vec<u8> = match (code.as_str(), arg) {
            ("move", Some(v)) => {
                position = v;
                Vec::new()
            }
            ("movr", Some(v)) => {
                position += v;
                Vec::new()
            }
            ("home", _) => {
                position = 0;
                Vec::new()
            }
            ("gpos" | "gets", _) => position.to_le_bytes().to_vec(),
            ("geng", _) => {
                let mut bytes = 200u32.to_le_bytes().to_vec();
                bytes.extend_from_slice(&256u32.to_le_bytes());
                bytes
            }
            ("gent", _) => vec![0x03],
            _ => Vec::new(),
        };
        if !reply.is_empty() && stream.write_all(&reply).is_err() {
            break;
        }
    }
}

fn frame(code: &str, arg: Option<i32>) -> Frame {
    Frame {
        code: code.to_string(),
        arg,
    }
}

#[test]
fn test_moves_track_position() -> Result<()> {
    let controller = Controller::start()?;
    let mut stage = Standa8Smc4::new("stage", &controller.address);
    stage.connect()?;
    assert_eq!(stage.instrument().state(), ConnectionState::Connected);

    stage.set_speed(2000.0, 0)?;
    stage.move_to(1500.0, 0)?;
    stage.move_by(-500.0, 0)?;
    assert_eq!(stage.get_position(0)?, 1000.0);

    stage.home(0)?;
    assert_eq!(stage.get_position(0)?, 0.0);
    stage.stop(0)?;

    stage.disconnect();
    assert_eq!(
        controller.finish(),
        vec![
            frame("sels", Some(2000)),
            frame("move", Some(1500)),
            frame("movr", Some(-500)),
            frame("gets", None),
            frame("home", None),
            frame("gets", None),
            frame("stop", None),
        ]
    );
    Ok(())
}

#[test]
fn test_multi_field_responses() -> Result<()> {
    let controller = Controller::start()?;
    let mut stage = Standa8Smc4::new("stage", &controller.address);
    stage.connect()?;

    assert_eq!(
        stage.stepper_calibration()?,
        StepperCalibration {
            steps_per_rev: 200,
            usteps_per_step: 256,
        }
    );
    assert_eq!(stage.motor_type()?, MotorType::Step);

    stage.disconnect();
    controller.finish();
    Ok(())
}

#[test]
fn test_rejected_moves_send_no_frames() -> Result<()> {
    let controller = Controller::start()?;
    let mut stage = Standa8Smc4::new("stage", &controller.address);
    stage.connect()?;

    assert!(matches!(
        stage.move_to(10.0, 2),
        Err(InstrumentError::Validation { .. })
    ));
    assert!(stage.move_by(f64::INFINITY, 0).is_err());
    assert!(stage.set_speed(-5.0, 0).is_err());

    stage.disconnect();
    assert!(controller.finish().is_empty());
    Ok(())
}
