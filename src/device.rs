//! Device command collaborator
//!
//! The engine talks to the robot only through the `Device` trait. Commands are
//! fire-and-poll: `send` returns a request id and the issuing trail polls it on
//! later ticks until the device reports completion.
//!
//! `SimulatedDevice` is the in-process implementation used by the CLI and the
//! tests. It records every command with the clock tick it was issued on.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::executor::Val;

pub type RequestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let rgb = match name {
            "black" | "off" => (0, 0, 0),
            "white" => (255, 255, 255),
            "red" => (255, 0, 0),
            "green" => (0, 255, 0),
            "blue" => (0, 0, 255),
            "yellow" => (255, 255, 0),
            "cyan" => (0, 255, 255),
            "magenta" => (255, 0, 255),
            "orange" => (255, 128, 0),
            _ => return None,
        };
        Some(Color::new(rgb.0, rgb.1, rgb.2))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dir {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensor {
    Location,
    Velocity,
    Yaw,
}

impl Sensor {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "location" => Some(Sensor::Location),
            "velocity" => Some(Sensor::Velocity),
            "yaw" => Some(Sensor::Yaw),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Command {
    SetMainLed { color: Color },
    SetBackLed { brightness: u8 },
    Roll { speed: u8, heading: u16, dir: Dir },
    StopRoll,
    ResetHeading,
    SetLocatorFlags { flags: u8 },
    StartStreaming { frequency: u32, sensors: Vec<Sensor> },
    StopStreaming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Done,
    Failed(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device rejected {command}: {reason}")]
    Rejected { command: String, reason: String },
    #[error("device is not connected")]
    Disconnected,
}

/// One streamed sensor reading
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sample {
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
    pub vx: f64,
    pub vy: f64,
}

impl Sample {
    /// Object value exposing the fields of the requested sensors
    pub fn to_val(&self, sensors: &[Sensor]) -> Val {
        let mut fields = BTreeMap::new();
        for sensor in sensors {
            match sensor {
                Sensor::Location => {
                    fields.insert("x".to_string(), Val::Num(self.x));
                    fields.insert("y".to_string(), Val::Num(self.y));
                }
                Sensor::Velocity => {
                    fields.insert("vx".to_string(), Val::Num(self.vx));
                    fields.insert("vy".to_string(), Val::Num(self.vy));
                }
                Sensor::Yaw => {
                    fields.insert("yaw".to_string(), Val::Num(self.yaw));
                }
            }
        }
        Val::Obj(fields)
    }
}

pub trait Device: Send {
    fn send(&mut self, command: Command) -> Result<RequestId, DeviceError>;

    fn poll(&mut self, request: RequestId) -> RequestStatus;

    /// Most recent streamed sample, if streaming
    fn latest_sample(&self) -> Option<Sample>;

    /// Called once per clock tick before the engine reacts
    fn advance(&mut self, _clock: u64) {}
}

/* ===================== Robot Profiles ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSelector {
    AnyRvr,
    AnyMini,
    #[default]
    Simulated,
}

/// Physical constants of a robot model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobotProfile {
    pub name: &'static str,
    /// Ground speed at roll speed 255
    pub max_speed_mps: f64,
}

impl DeviceSelector {
    pub fn profile(self) -> RobotProfile {
        match self {
            DeviceSelector::AnyRvr => RobotProfile {
                name: "RVR",
                max_speed_mps: 1.5,
            },
            DeviceSelector::AnyMini => RobotProfile {
                name: "Mini",
                max_speed_mps: 1.0,
            },
            DeviceSelector::Simulated => RobotProfile {
                name: "Simulated",
                max_speed_mps: 1.0,
            },
        }
    }
}

/* ===================== Simulated Device ===================== */

#[derive(Debug, Clone, PartialEq)]
pub struct IssuedCommand {
    pub clock: u64,
    pub command: Command,
}

#[derive(Debug)]
struct SimState {
    profile: RobotProfile,
    tick_frequency: f64,
    latency_ticks: u64,
    clock: u64,
    next_request: RequestId,
    /// Request id -> clock tick at which it completes
    pending: BTreeMap<RequestId, u64>,
    fail_next: VecDeque<String>,
    issued: Vec<IssuedCommand>,
    main_led: Color,
    back_led: u8,
    motion: Option<(u8, u16, Dir)>,
    streaming: Option<Vec<Sensor>>,
    sample: Sample,
}

/// Shared handle to an in-process robot model
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedDevice {
    pub fn new(selector: DeviceSelector, tick_frequency: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                profile: selector.profile(),
                tick_frequency: f64::from(tick_frequency.max(1)),
                latency_ticks: 0,
                clock: 0,
                next_request: 1,
                pending: BTreeMap::new(),
                fail_next: VecDeque::new(),
                issued: Vec::new(),
                main_led: Color::BLACK,
                back_led: 0,
                motion: None,
                streaming: None,
                sample: Sample::default(),
            })),
        }
    }

    /// Commands complete `ticks` clock ticks after they are sent
    pub fn with_latency(self, ticks: u64) -> Self {
        self.state.lock().latency_ticks = ticks;
        self
    }

    /// Make the next `send` fail with `reason`
    pub fn fail_next_send(&self, reason: impl Into<String>) {
        self.state.lock().fail_next.push_back(reason.into());
    }

    pub fn issued(&self) -> Vec<IssuedCommand> {
        self.state.lock().issued.clone()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.state.lock().issued.iter().map(|i| i.command.clone()).collect()
    }

    pub fn main_led(&self) -> Color {
        self.state.lock().main_led
    }

    pub fn back_led(&self) -> u8 {
        self.state.lock().back_led
    }

    pub fn is_rolling(&self) -> bool {
        self.state.lock().motion.is_some()
    }

    pub fn is_streaming(&self) -> bool {
        self.state.lock().streaming.is_some()
    }

    pub fn position(&self) -> (f64, f64) {
        let state = self.state.lock();
        (state.sample.x, state.sample.y)
    }
}

impl SimState {
    fn apply(&mut self, command: &Command) {
        match command {
            Command::SetMainLed { color } => self.main_led = *color,
            Command::SetBackLed { brightness } => self.back_led = *brightness,
            Command::Roll { speed, heading, dir } => {
                self.motion = (*speed > 0).then_some((*speed, *heading, *dir));
                self.sample.yaw = f64::from(*heading);
            }
            Command::StopRoll => self.motion = None,
            Command::ResetHeading => self.sample.yaw = 0.0,
            Command::SetLocatorFlags { .. } => {}
            Command::StartStreaming { sensors, .. } => self.streaming = Some(sensors.clone()),
            Command::StopStreaming => self.streaming = None,
        }
    }

    fn integrate(&mut self) {
        let dt = 1.0 / self.tick_frequency;
        let (vx, vy) = match self.motion {
            Some((speed, heading, dir)) => {
                let sign = if dir == Dir::Forward { 1.0 } else { -1.0 };
                let v = sign * f64::from(speed) / 255.0 * self.profile.max_speed_mps;
                let rad = f64::from(heading).to_radians();
                (v * rad.sin(), v * rad.cos())
            }
            None => (0.0, 0.0),
        };
        self.sample.vx = vx;
        self.sample.vy = vy;
        self.sample.x += vx * dt;
        self.sample.y += vy * dt;
    }
}

impl Device for SimulatedDevice {
    fn send(&mut self, command: Command) -> Result<RequestId, DeviceError> {
        let mut state = self.state.lock();
        if let Some(reason) = state.fail_next.pop_front() {
            return Err(DeviceError::Rejected {
                command: format!("{:?}", command),
                reason,
            });
        }
        state.apply(&command);
        let clock = state.clock;
        state.issued.push(IssuedCommand { clock, command });

        let id = state.next_request;
        state.next_request += 1;
        let due = clock + state.latency_ticks;
        state.pending.insert(id, due);
        Ok(id)
    }

    fn poll(&mut self, request: RequestId) -> RequestStatus {
        let mut state = self.state.lock();
        match state.pending.get(&request).copied() {
            Some(due) if due <= state.clock => {
                state.pending.remove(&request);
                RequestStatus::Done
            }
            Some(_) => RequestStatus::Pending,
            None => RequestStatus::Failed(format!("unknown request {}", request)),
        }
    }

    fn latest_sample(&self) -> Option<Sample> {
        let state = self.state.lock();
        state.streaming.as_ref().map(|_| state.sample)
    }

    fn advance(&mut self, clock: u64) {
        let mut state = self.state.lock();
        if clock > state.clock {
            for _ in state.clock..clock {
                state.integrate();
            }
            state.clock = clock;
        }
    }
}
