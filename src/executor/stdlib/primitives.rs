//! Device primitives
//!
//! Built-in activities callable with `run`. Each one is a small state machine:
//! `start` issues the first command, `poll` advances it once per reaction, and
//! `cancel` runs when an enclosing construct tears the primitive down.

use serde::{Deserialize, Serialize};

use crate::device::{Color, Command, Device, Dir, RequestId, RequestStatus, Sensor};
use crate::executor::errors::{self, ErrorInfo};
use crate::executor::scope::SlotRef;
use crate::executor::types::Val;
use crate::logging::{LogLevel, LogSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Primitive {
    SetMainLed,
    SetBackLed,
    Roll,
    RollForSeconds,
    StopRoll,
    ResetHeading,
    SetLocatorFlags,
    WaitTicks,
    WaitSeconds,
    SensorStreamer,
}

impl Primitive {
    pub const ALL: [Primitive; 10] = [
        Primitive::SetMainLed,
        Primitive::SetBackLed,
        Primitive::Roll,
        Primitive::RollForSeconds,
        Primitive::StopRoll,
        Primitive::ResetHeading,
        Primitive::SetLocatorFlags,
        Primitive::WaitTicks,
        Primitive::WaitSeconds,
        Primitive::SensorStreamer,
    ];

    /// Name used in programs
    pub fn name(self) -> &'static str {
        match self {
            Primitive::SetMainLed => "SetMainLED",
            Primitive::SetBackLed => "SetBackLED",
            Primitive::Roll => "Roll",
            Primitive::RollForSeconds => "RollForSeconds",
            Primitive::StopRoll => "StopRoll",
            Primitive::ResetHeading => "ResetHeading",
            Primitive::SetLocatorFlags => "SetLocatorFlags",
            Primitive::WaitTicks => "WaitTicks",
            Primitive::WaitSeconds => "WaitSeconds",
            Primitive::SensorStreamer => "SensorStreamer",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    /// (input params, location params)
    pub fn arity(self) -> (usize, usize) {
        match self {
            Primitive::StopRoll | Primitive::ResetHeading => (0, 0),
            Primitive::SetMainLed
            | Primitive::SetBackLed
            | Primitive::SetLocatorFlags
            | Primitive::WaitTicks
            | Primitive::WaitSeconds => (1, 0),
            Primitive::Roll => (3, 0),
            Primitive::RollForSeconds => (4, 0),
            Primitive::SensorStreamer => (2, 1),
        }
    }

    /// Primitives that map to exactly one device command
    pub fn is_command(self) -> bool {
        matches!(
            self,
            Primitive::SetMainLed
                | Primitive::SetBackLed
                | Primitive::Roll
                | Primitive::StopRoll
                | Primitive::ResetHeading
                | Primitive::SetLocatorFlags
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollPhase {
    Starting,
    Rolling,
    Stopping,
}

/// Suspended primitive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum PrimitiveState {
    Command {
        request: RequestId,
    },
    Wait {
        until: u64,
    },
    RollFor {
        phase: RollPhase,
        request: RequestId,
        until: u64,
    },
    Stream {
        sensors: Vec<Sensor>,
        out: SlotRef,
    },
}

pub enum Started {
    Done(Val),
    Pending(PrimitiveState),
}

pub enum Progress {
    Done(Val),
    Pending,
}

/// What a primitive may touch while it runs
pub struct DeviceCtx<'a> {
    pub device: &'a mut dyn Device,
    pub log: &'a dyn LogSink,
    pub clock: u64,
    pub tick_frequency: f64,
    /// Failures raised this reaction, visible as `device.error` next reaction
    pub failures: &'a mut Vec<String>,
}

impl DeviceCtx<'_> {
    fn report(&mut self, message: String) {
        tracing::warn!(clock = self.clock, "device failure: {}", message);
        self.log.log(LogLevel::Error, &message);
        self.failures.push(message);
    }

    fn send(&mut self, command: Command) -> Sent {
        let label = format!("{:?}", command);
        match self.device.send(command) {
            Ok(request) => match self.poll_request(request) {
                RequestOutcome::Pending => Sent::Pending(request),
                RequestOutcome::Settled => Sent::Settled,
                RequestOutcome::Failed => Sent::Failed,
            },
            Err(e) => {
                self.report(format!("{} failed: {}", label, e));
                Sent::Failed
            }
        }
    }

    fn poll_request(&mut self, request: RequestId) -> RequestOutcome {
        match self.device.poll(request) {
            RequestStatus::Pending => RequestOutcome::Pending,
            RequestStatus::Done => RequestOutcome::Settled,
            RequestStatus::Failed(reason) => {
                self.report(format!("request {} failed: {}", request, reason));
                RequestOutcome::Failed
            }
        }
    }
}

enum Sent {
    Pending(RequestId),
    Settled,
    Failed,
}

impl Sent {
    fn into_started(self) -> Started {
        match self {
            Sent::Pending(request) => Started::Pending(PrimitiveState::Command { request }),
            Sent::Settled | Sent::Failed => Started::Done(Val::Null),
        }
    }
}

enum RequestOutcome {
    Pending,
    Settled,
    Failed,
}

impl RequestOutcome {
    fn progress(self) -> Progress {
        match self {
            RequestOutcome::Pending => Progress::Pending,
            RequestOutcome::Settled | RequestOutcome::Failed => Progress::Done(Val::Null),
        }
    }
}

/* ===================== Argument Conversion ===================== */

fn expect_args(primitive: Primitive, args: &[Val]) -> Result<(), ErrorInfo> {
    let (params, _) = primitive.arity();
    if args.len() != params {
        return Err(ErrorInfo::new(
            errors::WRONG_ARG_COUNT,
            format!(
                "{} expects {} argument(s), got {}",
                primitive.name(),
                params,
                args.len()
            ),
        ));
    }
    Ok(())
}

fn wrong_type(primitive: Primitive, what: &str, got: &Val) -> ErrorInfo {
    ErrorInfo::new(
        errors::WRONG_ARG_TYPE,
        format!(
            "{}: {} must be {}, got {}",
            primitive.name(),
            what,
            match what {
                "color" => "a color name or rgb()",
                "dir" => "\"forward\" or \"backward\"",
                "sensors" => "a list of sensor names",
                _ => "a number",
            },
            got.type_name()
        ),
    )
}

fn num(primitive: Primitive, what: &str, v: &Val) -> Result<f64, ErrorInfo> {
    v.as_num().ok_or_else(|| wrong_type(primitive, what, v))
}

fn byte(primitive: Primitive, what: &str, v: &Val) -> Result<u8, ErrorInfo> {
    Ok(num(primitive, what, v)?.round().clamp(0.0, 255.0) as u8)
}

fn color(primitive: Primitive, v: &Val) -> Result<Color, ErrorInfo> {
    match v {
        Val::Str(name) => Color::from_name(name).ok_or_else(|| {
            ErrorInfo::new(
                errors::WRONG_ARG_TYPE,
                format!("{}: unknown color '{}'", primitive.name(), name),
            )
        }),
        Val::Obj(fields) => {
            let channel = |k: &str| {
                fields
                    .get(k)
                    .ok_or_else(|| wrong_type(primitive, "color", v))
                    .and_then(|c| byte(primitive, "color", c))
            };
            Ok(Color::new(channel("r")?, channel("g")?, channel("b")?))
        }
        other => Err(wrong_type(primitive, "color", other)),
    }
}

fn heading(primitive: Primitive, v: &Val) -> Result<u16, ErrorInfo> {
    Ok(num(primitive, "heading", v)?.round().rem_euclid(360.0) as u16)
}

fn dir(primitive: Primitive, v: &Val) -> Result<Dir, ErrorInfo> {
    match v.as_str() {
        Some("forward") => Ok(Dir::Forward),
        Some("backward") => Ok(Dir::Backward),
        _ => Err(wrong_type(primitive, "dir", v)),
    }
}

fn sensors(primitive: Primitive, v: &Val) -> Result<Vec<Sensor>, ErrorInfo> {
    let Val::List(items) = v else {
        return Err(wrong_type(primitive, "sensors", v));
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let sensor = item
            .as_str()
            .and_then(Sensor::from_name)
            .ok_or_else(|| wrong_type(primitive, "sensors", item))?;
        if !out.contains(&sensor) {
            out.push(sensor);
        }
    }
    Ok(out)
}

fn ticks_for(ctx: &DeviceCtx<'_>, seconds: f64) -> u64 {
    (seconds.max(0.0) * ctx.tick_frequency).round() as u64
}

/// Device command for a single-command primitive
pub fn command_for(primitive: Primitive, args: &[Val]) -> Result<Command, ErrorInfo> {
    expect_args(primitive, args)?;
    let command = match primitive {
        Primitive::SetMainLed => Command::SetMainLed {
            color: color(primitive, &args[0])?,
        },
        Primitive::SetBackLed => Command::SetBackLed {
            brightness: byte(primitive, "brightness", &args[0])?,
        },
        Primitive::Roll | Primitive::RollForSeconds => Command::Roll {
            speed: byte(primitive, "speed", &args[0])?,
            heading: heading(primitive, &args[1])?,
            dir: dir(primitive, &args[2])?,
        },
        Primitive::StopRoll => Command::StopRoll,
        Primitive::ResetHeading => Command::ResetHeading,
        Primitive::SetLocatorFlags => Command::SetLocatorFlags {
            flags: byte(primitive, "flags", &args[0])?,
        },
        Primitive::WaitTicks | Primitive::WaitSeconds | Primitive::SensorStreamer => {
            return Err(ErrorInfo::new(
                errors::NOT_INSTANTANEOUS,
                format!("{} is not a single device command", primitive.name()),
            ))
        }
    };
    Ok(command)
}

/* ===================== Lifecycle ===================== */

pub fn start(
    primitive: Primitive,
    args: &[Val],
    outs: &[SlotRef],
    ctx: &mut DeviceCtx<'_>,
) -> Result<Started, ErrorInfo> {
    expect_args(primitive, args)?;
    match primitive {
        Primitive::WaitTicks => {
            let n = num(primitive, "ticks", &args[0])?.max(0.0).round() as u64;
            Ok(wait(ctx.clock + n, ctx.clock))
        }
        Primitive::WaitSeconds => {
            let n = ticks_for(ctx, num(primitive, "seconds", &args[0])?);
            Ok(wait(ctx.clock + n, ctx.clock))
        }
        Primitive::RollForSeconds => {
            let until = ctx.clock + ticks_for(ctx, num(primitive, "seconds", &args[3])?);
            let command = command_for(Primitive::Roll, &args[..3])?;
            let (phase, request) = match ctx.send(command) {
                Sent::Failed => return Ok(Started::Done(Val::Null)),
                Sent::Pending(request) => (RollPhase::Starting, request),
                Sent::Settled => (RollPhase::Rolling, 0),
            };
            let mut state = PrimitiveState::RollFor {
                phase,
                request,
                until,
            };
            match poll(&mut state, ctx)? {
                Progress::Done(v) => Ok(Started::Done(v)),
                Progress::Pending => Ok(Started::Pending(state)),
            }
        }
        Primitive::SensorStreamer => {
            let frequency = num(primitive, "frequency", &args[0])?.max(1.0).round() as u32;
            let sensors = sensors(primitive, &args[1])?;
            let out = *outs.first().ok_or_else(|| {
                ErrorInfo::new(
                    errors::WRONG_ARG_COUNT,
                    "SensorStreamer needs one location for the sample",
                )
            })?;
            // The stream keeps running even if the start request is still pending
            let _ = ctx.send(Command::StartStreaming {
                frequency,
                sensors: sensors.clone(),
            });
            Ok(Started::Pending(PrimitiveState::Stream { sensors, out }))
        }
        _ => {
            let command = command_for(primitive, args)?;
            Ok(ctx.send(command).into_started())
        }
    }
}

fn wait(until: u64, clock: u64) -> Started {
    if clock >= until {
        Started::Done(Val::Null)
    } else {
        Started::Pending(PrimitiveState::Wait { until })
    }
}

pub fn poll(state: &mut PrimitiveState, ctx: &mut DeviceCtx<'_>) -> Result<Progress, ErrorInfo> {
    match state {
        PrimitiveState::Command { request } => Ok(ctx.poll_request(*request).progress()),
        PrimitiveState::Wait { until } => Ok(if ctx.clock >= *until {
            Progress::Done(Val::Null)
        } else {
            Progress::Pending
        }),
        PrimitiveState::RollFor {
            phase,
            request,
            until,
        } => loop {
            match phase {
                RollPhase::Starting => match ctx.poll_request(*request) {
                    RequestOutcome::Pending => return Ok(Progress::Pending),
                    RequestOutcome::Failed => return Ok(Progress::Done(Val::Null)),
                    RequestOutcome::Settled => *phase = RollPhase::Rolling,
                },
                RollPhase::Rolling => {
                    if ctx.clock < *until {
                        return Ok(Progress::Pending);
                    }
                    match ctx.send(Command::StopRoll) {
                        Sent::Pending(stop) => {
                            *phase = RollPhase::Stopping;
                            *request = stop;
                            return Ok(Progress::Pending);
                        }
                        Sent::Settled | Sent::Failed => return Ok(Progress::Done(Val::Null)),
                    }
                }
                RollPhase::Stopping => return Ok(ctx.poll_request(*request).progress()),
            }
        },
        // Streams never finish on their own; the caller copies samples out
        PrimitiveState::Stream { .. } => Ok(Progress::Pending),
    }
}

/// Stop semantics when an enclosing construct tears the primitive down
pub fn cancel(state: &PrimitiveState, ctx: &mut DeviceCtx<'_>) {
    let command = match state {
        PrimitiveState::RollFor {
            phase: RollPhase::Starting | RollPhase::Rolling,
            ..
        } => Command::StopRoll,
        PrimitiveState::Stream { .. } => Command::StopStreaming,
        _ => return,
    };
    let _ = ctx.send(command);
}

/// Fire-and-forget issue used inside `defer` bodies
pub fn issue(primitive: Primitive, args: &[Val], ctx: &mut DeviceCtx<'_>) -> Result<(), ErrorInfo> {
    let command = command_for(primitive, args)?;
    let _ = ctx.send(command);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceSelector, SimulatedDevice};
    use crate::logging::MemoryLog;

    fn ctx<'a>(
        device: &'a mut SimulatedDevice,
        log: &'a MemoryLog,
        failures: &'a mut Vec<String>,
        clock: u64,
    ) -> DeviceCtx<'a> {
        DeviceCtx {
            device,
            log,
            clock,
            tick_frequency: 10.0,
            failures,
        }
    }

    #[test]
    fn test_names_round_trip() {
        for p in Primitive::ALL {
            assert_eq!(Primitive::from_name(p.name()), Some(p));
        }
        assert_eq!(Primitive::from_name("SetMainLed"), None);
    }

    #[test]
    fn test_roll_clamps_speed_and_wraps_heading() {
        let cmd = command_for(
            Primitive::Roll,
            &[Val::Num(400.0), Val::Num(-90.0), Val::from("backward")],
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::Roll {
                speed: 255,
                heading: 270,
                dir: Dir::Backward
            }
        );
    }

    #[test]
    fn test_bad_color_is_type_error() {
        let err = command_for(Primitive::SetMainLed, &[Val::from("mauve")]).unwrap_err();
        assert_eq!(err.code, errors::WRONG_ARG_TYPE);
        let err = command_for(Primitive::SetMainLed, &[]).unwrap_err();
        assert_eq!(err.code, errors::WRONG_ARG_COUNT);
    }

    #[test]
    fn test_wait_seconds_uses_tick_frequency() {
        let mut device = SimulatedDevice::new(DeviceSelector::Simulated, 10);
        let log = MemoryLog::new();
        let mut failures = Vec::new();
        let mut c = ctx(&mut device, &log, &mut failures, 3);
        match start(Primitive::WaitSeconds, &[Val::Num(1.5)], &[], &mut c).unwrap() {
            Started::Pending(PrimitiveState::Wait { until }) => assert_eq!(until, 18),
            _ => panic!("expected a pending wait"),
        }
        assert!(matches!(
            start(Primitive::WaitTicks, &[Val::Num(0.0)], &[], &mut c).unwrap(),
            Started::Done(Val::Null)
        ));
    }

    #[test]
    fn test_failed_send_is_logged_and_terminates() {
        let mut device = SimulatedDevice::new(DeviceSelector::Simulated, 10);
        device.fail_next_send("link lost");
        let log = MemoryLog::new();
        let mut failures = Vec::new();
        let mut c = ctx(&mut device, &log, &mut failures, 0);
        let started = start(Primitive::StopRoll, &[], &[], &mut c).unwrap();
        assert!(matches!(started, Started::Done(Val::Null)));
        assert_eq!(failures.len(), 1);
        assert_eq!(log.messages_at(LogLevel::Error).len(), 1);
    }

    #[test]
    fn test_cancel_roll_for_seconds_stops() {
        let device = SimulatedDevice::new(DeviceSelector::Simulated, 10);
        let log = MemoryLog::new();
        let mut failures = Vec::new();
        let mut handle = device.clone();
        let mut c = ctx(&mut handle, &log, &mut failures, 0);
        let args = [
            Val::Num(100.0),
            Val::Num(0.0),
            Val::from("forward"),
            Val::Num(2.0),
        ];
        let Started::Pending(state) = start(Primitive::RollForSeconds, &args, &[], &mut c).unwrap() else {
            panic!("expected rolling state");
        };
        assert!(device.is_rolling());
        cancel(&state, &mut c);
        assert!(!device.is_rolling());
        assert_eq!(device.commands().last(), Some(&Command::StopRoll));
    }
}
