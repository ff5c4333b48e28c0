//! Controller façade
//!
//! The handle a host application holds. It links a [`Program`], owns the engine
//! and the device, and exposes `start`, `tick`, `trigger` and `stop`. A
//! `Controller` is cheap to clone; every clone drives the same program.
//!
//! Reactions never overlap: a `tick()` or `trigger()` issued while another
//! reaction is running (for example from inside a log sink) is rejected with
//! [`ControllerError::Reentrant`]. `stop()` is the exception and may be called
//! from anywhere; during a reaction it interrupts it at the next trail turn.
//!
//! ```rust,ignore
//! let controller = ControllerBuilder::new(program)
//!     .device(device.clone())
//!     .on_did_tick(|clock| tracing::trace!(clock, "tick"))
//!     .build();
//! controller.start()?;
//! while controller.state().is_running() {
//!     controller.tick()?;
//! }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::device::{Device, DeviceSelector, SimulatedDevice};
use crate::executor::{
    DefinitionError, ErrorInfo, ReactionKind, Registry, Status, Val, VmOptions, VM,
};
use crate::input::Input;
use crate::logging::{LogLevel, LogSink, TracingSink};
use crate::program::{LoadError, Program};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("a reaction is already in progress")]
    Reentrant,

    #[error("program is already running")]
    AlreadyStarted,

    #[error("program has not been started")]
    NotStarted,

    #[error("tick frequency must be a positive number, got {0}")]
    TickFrequency(f64),

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Lifecycle of the program a controller runs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ControllerState {
    Idle,
    Running,
    /// Entry activity terminated with this value
    Finished { result: Val },
    /// A runtime error tore the program down
    Failed { error: ErrorInfo },
    Stopped,
}

impl ControllerState {
    pub fn is_running(&self) -> bool {
        matches!(self, ControllerState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ControllerState::Finished { .. } | ControllerState::Failed { .. } | ControllerState::Stopped
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Module holding the entry activity; the first module when unset
    pub main_module: Option<String>,
    pub entry: String,
    /// Clock ticks per second
    pub tick_frequency: f64,
    pub max_call_depth: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let options = VmOptions::default();
        Self {
            main_module: None,
            entry: "Main".to_string(),
            tick_frequency: options.tick_frequency,
            max_call_depth: options.max_call_depth,
        }
    }
}

impl ControllerConfig {
    /// Checks what `Settings::validate` checks for configs built in code
    pub fn validate(&self) -> Result<(), ControllerError> {
        if !self.tick_frequency.is_finite() || self.tick_frequency <= 0.0 {
            return Err(ControllerError::TickFrequency(self.tick_frequency));
        }
        Ok(())
    }

    fn vm_options(&self) -> VmOptions {
        VmOptions {
            tick_frequency: self.tick_frequency,
            max_call_depth: self.max_call_depth,
        }
    }
}

type TickCallback = Box<dyn Fn(u64) + Send + Sync>;
type StateCallback = Box<dyn Fn(&ControllerState) + Send + Sync>;

/* ===================== Builder ===================== */

pub struct ControllerBuilder {
    program: Box<dyn Program>,
    config: ControllerConfig,
    input: Option<Input>,
    device: Option<Box<dyn Device>>,
    log: Option<Arc<dyn LogSink>>,
    did_tick: Option<TickCallback>,
    on_state_change: Option<StateCallback>,
}

impl ControllerBuilder {
    pub fn new(program: impl Program + 'static) -> Self {
        Self {
            program: Box::new(program),
            config: ControllerConfig::default(),
            input: None,
            device: None,
            log: None,
            did_tick: None,
            on_state_change: None,
        }
    }

    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Shared input handle; the host presses keys on its own clone
    pub fn input(mut self, input: Input) -> Self {
        self.input = Some(input);
        self
    }

    pub fn device(mut self, device: impl Device + 'static) -> Self {
        self.device = Some(Box::new(device));
        self
    }

    pub fn log_sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.log = Some(Arc::new(sink));
        self
    }

    /// Called with the clock after every reaction
    pub fn on_did_tick(mut self, callback: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.did_tick = Some(Box::new(callback));
        self
    }

    pub fn on_state_change(
        mut self,
        callback: impl Fn(&ControllerState) + Send + Sync + 'static,
    ) -> Self {
        self.on_state_change = Some(Box::new(callback));
        self
    }

    pub fn build(self) -> Controller {
        let frequency = self.config.tick_frequency.round().max(1.0) as u32;
        let device = self
            .device
            .unwrap_or_else(|| Box::new(SimulatedDevice::new(DeviceSelector::Simulated, frequency)));

        Controller {
            shared: Arc::new(Shared {
                program: self.program,
                config: self.config,
                input: self.input.unwrap_or_default(),
                log: self.log.unwrap_or_else(|| Arc::new(TracingSink)),
                did_tick: self.did_tick,
                on_state_change: self.on_state_change,
                engine: Mutex::new(Engine { device, vm: None }),
                busy: AtomicBool::new(false),
                stop: Arc::new(AtomicBool::new(false)),
                clock: AtomicU64::new(0),
                run_id: Mutex::new(None),
                state: Mutex::new(ControllerState::Idle),
            }),
        }
    }
}

/* ===================== Controller ===================== */

#[derive(Clone)]
pub struct Controller {
    shared: Arc<Shared>,
}

struct Shared {
    program: Box<dyn Program>,
    config: ControllerConfig,
    input: Input,
    log: Arc<dyn LogSink>,
    did_tick: Option<TickCallback>,
    on_state_change: Option<StateCallback>,
    engine: Mutex<Engine>,
    /// Held for the whole of start, tick, trigger and stop
    busy: AtomicBool,
    stop: Arc<AtomicBool>,
    clock: AtomicU64,
    run_id: Mutex<Option<Uuid>>,
    state: Mutex<ControllerState>,
}

struct Engine {
    device: Box<dyn Device>,
    vm: Option<VM>,
}

impl Engine {
    /// Run one reaction; `None` when no program is loaded
    fn react(
        &mut self,
        kind: ReactionKind,
        key: &str,
        stop: &AtomicBool,
        log: &dyn LogSink,
    ) -> Option<(ControllerState, u64)> {
        let vm = self.vm.as_mut()?;
        let outcome = if stop.load(Ordering::SeqCst) {
            Ok(Status::Interrupted)
        } else {
            vm.react(kind, key, self.device.as_mut(), log)
        };

        let next = match outcome {
            Ok(Status::Suspended) => ControllerState::Running,
            Ok(Status::Finished(result)) => {
                tracing::info!(%result, "program finished");
                ControllerState::Finished { result }
            }
            Ok(Status::Interrupted) => {
                tracing::info!("program stopped");
                ControllerState::Stopped
            }
            Err(error) => {
                tracing::error!(code = %error.code, "runtime error: {}", error.message);
                log.log(LogLevel::Error, &error.to_string());
                ControllerState::Failed { error }
            }
        };

        let clock = vm.clock();
        if next.is_terminal() {
            vm.shutdown(self.device.as_mut(), log);
            self.vm = None;
        }
        Some((next, clock))
    }

    /// Tear the program down; false if nothing was running
    fn shutdown(&mut self, log: &dyn LogSink) -> bool {
        match self.vm.take() {
            Some(mut vm) => {
                vm.shutdown(self.device.as_mut(), log);
                true
            }
            None => false,
        }
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| BusyGuard(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Controller {
    pub fn builder(program: impl Program + 'static) -> ControllerBuilder {
        ControllerBuilder::new(program)
    }

    /// Load and link the program, then run reaction 0
    pub fn start(&self) -> Result<(), ControllerError> {
        let _busy = BusyGuard::acquire(&self.shared.busy).ok_or(ControllerError::Reentrant)?;
        if self.state().is_running() {
            return Err(ControllerError::AlreadyStarted);
        }

        let program = &self.shared.program;
        let config = &self.shared.config;
        config.validate()?;
        let modules = program.modules()?;
        let main = match &config.main_module {
            Some(name) => name.clone(),
            None => modules
                .first()
                .map(|m| m.name.clone())
                .ok_or(LoadError::Empty)?,
        };
        let registry = Registry::link(modules, &main, &config.entry)?;
        let explanation = program
            .explanation()
            .or_else(|| registry.explanation().map(str::to_string));

        let run_id = Uuid::new_v4();
        *self.shared.run_id.lock() = Some(run_id);
        let span = tracing::info_span!("run", %run_id);
        let _enter = span.enter();
        tracing::info!(
            main = %main,
            entry = %config.entry,
            activities = registry.len(),
            "starting program"
        );

        self.shared.stop.store(false, Ordering::SeqCst);
        self.shared.clock.store(0, Ordering::SeqCst);
        self.shared.engine.lock().vm = Some(VM::new(
            Arc::new(registry),
            config.vm_options(),
            self.shared.stop.clone(),
        ));

        if let Some(text) = explanation {
            self.shared.log.log(LogLevel::Info, &text);
        }
        self.set_state(ControllerState::Running);
        self.react(ReactionKind::Start);
        Ok(())
    }

    /// Advance the clock by one and react
    pub fn tick(&self) -> Result<ControllerState, ControllerError> {
        self.advance(ReactionKind::Tick)
    }

    /// React to an input event without advancing the clock
    pub fn trigger(&self) -> Result<ControllerState, ControllerError> {
        self.advance(ReactionKind::Trigger)
    }

    /// Tear the program down, running every pending defer
    ///
    /// Idempotent. During a reaction this only raises the stop flag and the
    /// reacting call performs the teardown.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        let Some(_busy) = BusyGuard::acquire(&self.shared.busy) else {
            tracing::debug!("stop requested during a reaction");
            return;
        };
        let stopped = self.shared.engine.lock().shutdown(self.shared.log.as_ref());
        if stopped {
            tracing::info!(run_id = ?self.run_id(), "program stopped");
            self.set_state(ControllerState::Stopped);
        }
    }

    pub fn state(&self) -> ControllerState {
        self.shared.state.lock().clone()
    }

    /// Value returned by the entry activity, once finished
    pub fn result(&self) -> Option<Val> {
        match &*self.shared.state.lock() {
            ControllerState::Finished { result } => Some(result.clone()),
            _ => None,
        }
    }

    pub fn clock(&self) -> u64 {
        self.shared.clock.load(Ordering::SeqCst)
    }

    /// Id of the current or most recent run
    pub fn run_id(&self) -> Option<Uuid> {
        *self.shared.run_id.lock()
    }

    pub fn input(&self) -> Input {
        self.shared.input.clone()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.shared.config
    }

    pub fn log_info(&self, message: &str) {
        self.shared.log.log(LogLevel::Info, message);
    }

    pub fn log_note(&self, message: &str) {
        self.shared.log.log(LogLevel::Note, message);
    }

    pub fn log_error(&self, message: &str) {
        self.shared.log.log(LogLevel::Error, message);
    }

    fn advance(&self, kind: ReactionKind) -> Result<ControllerState, ControllerError> {
        {
            let _busy = BusyGuard::acquire(&self.shared.busy).ok_or(ControllerError::Reentrant)?;
            if self.state() == ControllerState::Idle {
                return Err(ControllerError::NotStarted);
            }
            self.react(kind);
        }

        // Raised by another thread after the reaction's own check
        if self.shared.stop.load(Ordering::SeqCst) && self.state().is_running() {
            self.stop();
        }
        Ok(self.state())
    }

    /// Caller holds the busy flag
    fn react(&self, kind: ReactionKind) {
        let shared = &self.shared;
        let key = shared.input.key();
        let span = tracing::debug_span!("run", run_id = ?self.run_id());
        let _enter = span.enter();

        let outcome = shared
            .engine
            .lock()
            .react(kind, &key, &shared.stop, shared.log.as_ref());

        if let Some((next, clock)) = outcome {
            shared.clock.store(clock, Ordering::SeqCst);
            self.set_state(next);
        }

        if let Some(callback) = &shared.did_tick {
            callback(self.clock());
        }
        shared.input.clear();

        // A stop that arrived after the engine's last check, callbacks included
        if shared.stop.load(Ordering::SeqCst) && self.state().is_running() {
            if shared.engine.lock().shutdown(shared.log.as_ref()) {
                tracing::info!("program stopped");
                self.set_state(ControllerState::Stopped);
            }
        }
    }

    fn set_state(&self, next: ControllerState) {
        let changed = {
            let mut state = self.shared.state.lock();
            if *state == next {
                false
            } else {
                *state = next.clone();
                true
            }
        };
        if changed {
            if let Some(callback) = &self.shared.on_state_change {
                callback(&next);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Color;
    use crate::logging::MemoryLog;
    use crate::program::ScriptProgram;

    fn program(source: &str) -> ScriptProgram {
        ScriptProgram::new().with_source("main", source)
    }

    fn setup(source: &str) -> (Controller, SimulatedDevice, MemoryLog) {
        let device = SimulatedDevice::new(DeviceSelector::Simulated, 10);
        let log = MemoryLog::new();
        let controller = ControllerBuilder::new(program(source))
            .device(device.clone())
            .log_sink(log.clone())
            .build();
        (controller, device, log)
    }

    #[test]
    fn test_lifecycle_to_finished() {
        let clocks = Arc::new(Mutex::new(Vec::new()));
        let seen = clocks.clone();
        let controller = ControllerBuilder::new(program(
            "activity Main() { run WaitTicks(2); return 7 }",
        ))
        .log_sink(MemoryLog::new())
        .on_did_tick(move |clock| seen.lock().push(clock))
        .build();

        assert_eq!(controller.state(), ControllerState::Idle);
        controller.start().unwrap();
        assert!(controller.state().is_running());
        assert!(controller.run_id().is_some());
        assert_eq!(controller.tick().unwrap(), ControllerState::Running);
        assert_eq!(
            controller.tick().unwrap(),
            ControllerState::Finished {
                result: Val::Num(7.0)
            }
        );
        assert_eq!(controller.result(), Some(Val::Num(7.0)));
        assert_eq!(controller.clock(), 2);

        // Ticking a finished program is a no-op that still clears input
        controller.input().press("a");
        assert!(controller.tick().unwrap().is_terminal());
        assert_eq!(controller.clock(), 2);
        assert_eq!(controller.input().key(), "");
        assert_eq!(*clocks.lock(), vec![0, 1, 2, 2]);
    }

    #[test]
    fn test_start_logs_explanation() {
        let (controller, _, log) = setup("//! Blinks forever.\nactivity Main() { halt }");
        controller.start().unwrap();
        assert_eq!(log.messages_at(LogLevel::Info), vec!["Blinks forever."]);

        let log = MemoryLog::new();
        let controller = ControllerBuilder::new(
            program("//! From docs.\nactivity Main() { halt }").with_explanation("Overridden."),
        )
        .log_sink(log.clone())
        .build();
        controller.start().unwrap();
        assert_eq!(log.messages(), vec!["Overridden."]);
    }

    #[test]
    fn test_lifecycle_errors() {
        let (controller, _, _) = setup("activity Main() { halt }");
        assert!(matches!(controller.tick(), Err(ControllerError::NotStarted)));
        assert!(matches!(controller.trigger(), Err(ControllerError::NotStarted)));

        controller.start().unwrap();
        assert!(matches!(controller.start(), Err(ControllerError::AlreadyStarted)));

        controller.stop();
        assert_eq!(controller.state(), ControllerState::Stopped);
        controller.start().unwrap();
        assert!(controller.state().is_running());
        assert_eq!(controller.clock(), 0);
    }

    #[test]
    fn test_link_errors_leave_controller_idle() {
        let (controller, _, _) = setup("activity Main() { run Fly() }");
        let err = controller.start().unwrap_err();
        assert!(matches!(err, ControllerError::Definition(DefinitionError::UnknownActivity { .. })));
        assert_eq!(controller.state(), ControllerState::Idle);

        let (controller, _, _) = setup("activity Main( {");
        assert!(matches!(controller.start(), Err(ControllerError::Load(_))));

        let config = ControllerConfig {
            entry: "Begin".to_string(),
            ..ControllerConfig::default()
        };
        let controller = ControllerBuilder::new(program("activity Begin() { halt }"))
            .config(config)
            .log_sink(MemoryLog::new())
            .build();
        controller.start().unwrap();
        assert!(controller.state().is_running());
    }

    #[test]
    fn test_input_is_snapshot_then_cleared() {
        let (controller, _, log) = setup(
            r#"
activity Main() {
    every (input.pressed) { log.info("key " + input.key + " at " + str(clock.ticks)) }
}
"#,
        );
        controller.start().unwrap();
        let input = controller.input();
        input.press("a");
        controller.tick().unwrap();
        assert_eq!(input.key(), "");
        controller.tick().unwrap();
        input.press("b");
        controller.trigger().unwrap();
        assert_eq!(log.messages(), vec!["key a at 1", "key b at 2"]);
        assert_eq!(controller.clock(), 2);
    }

    #[test]
    fn test_stop_runs_defers_once() {
        let (controller, device, log) = setup(
            r#"
activity Main() {
    defer {
        run SetMainLED("black")
        log.info("cleanup")
    }
    run SetMainLED("red")
    halt
}
"#,
        );
        controller.start().unwrap();
        assert_eq!(device.main_led(), Color::new(255, 0, 0));
        controller.stop();
        controller.stop();
        assert_eq!(device.main_led(), Color::BLACK);
        assert_eq!(log.count("cleanup"), 1);
        assert_eq!(controller.state(), ControllerState::Stopped);
        assert!(controller.tick().unwrap().is_terminal());
    }

    #[test]
    fn test_stop_from_inside_a_reaction() {
        let slot: Arc<Mutex<Option<Controller>>> = Arc::default();
        let log = MemoryLog::new();
        let (hook, record) = (slot.clone(), log.clone());
        let controller = ControllerBuilder::new(program(
            r#"
activity Main() {
    defer { log.info("cleanup") }
    every (clock.ticks == 3) { log.note("stop me") }
}
"#,
        ))
        .log_sink(move |level: LogLevel, message: &str| {
            record.log(level, message);
            if message == "stop me" {
                if let Some(controller) = hook.lock().as_ref() {
                    controller.stop();
                }
            }
        })
        .build();
        *slot.lock() = Some(controller.clone());

        controller.start().unwrap();
        controller.tick().unwrap();
        controller.tick().unwrap();
        assert_eq!(controller.tick().unwrap(), ControllerState::Stopped);
        assert_eq!(log.messages(), vec!["stop me", "cleanup"]);
        slot.lock().take();
    }

    #[test]
    fn test_stop_from_did_tick_callback() {
        let slot: Arc<Mutex<Option<Controller>>> = Arc::default();
        let hook = slot.clone();
        let log = MemoryLog::new();
        let controller = ControllerBuilder::new(program(
            "activity Main() { defer { log.info(\"cleanup\") } halt }",
        ))
        .log_sink(log.clone())
        .on_did_tick(move |clock| {
            if clock == 1 {
                if let Some(controller) = hook.lock().as_ref() {
                    controller.stop();
                }
            }
        })
        .build();
        *slot.lock() = Some(controller.clone());

        controller.start().unwrap();
        assert!(log.messages().is_empty());
        assert_eq!(controller.tick().unwrap(), ControllerState::Stopped);
        assert_eq!(controller.state(), ControllerState::Stopped);
        assert_eq!(log.messages(), vec!["cleanup"]);

        // Already stopped: nothing runs twice
        controller.stop();
        assert!(controller.tick().unwrap().is_terminal());
        assert_eq!(log.count("cleanup"), 1);
        slot.lock().take();
    }

    #[test]
    fn test_start_rejects_bad_tick_frequency() {
        for tick_frequency in [0.0, -2.0, f64::NAN] {
            let controller = ControllerBuilder::new(program("activity Main() { halt }"))
                .config(ControllerConfig {
                    tick_frequency,
                    ..ControllerConfig::default()
                })
                .log_sink(MemoryLog::new())
                .build();
            assert!(matches!(
                controller.start(),
                Err(ControllerError::TickFrequency(_))
            ));
            assert_eq!(controller.state(), ControllerState::Idle);
        }
    }

    #[test]
    fn test_reentrant_calls_are_rejected() {
        let slot: Arc<Mutex<Option<Controller>>> = Arc::default();
        let rejected = Arc::new(Mutex::new(Vec::new()));
        let (hook, seen) = (slot.clone(), rejected.clone());
        let controller = ControllerBuilder::new(program(
            "activity Main() { always { log.info(\"tick\") } }",
        ))
        .log_sink(move |_: LogLevel, _: &str| {
            if let Some(controller) = hook.lock().as_ref() {
                seen.lock().push(matches!(controller.tick(), Err(ControllerError::Reentrant)));
            }
        })
        .build();
        *slot.lock() = Some(controller.clone());

        controller.start().unwrap();
        controller.tick().unwrap();
        assert_eq!(*rejected.lock(), vec![true, true]);
        assert_eq!(controller.clock(), 1);
        slot.lock().take();
    }

    #[test]
    fn test_runtime_error_fails_the_program() {
        let (controller, device, log) = setup(
            r#"
activity Main() {
    defer { run SetMainLED("black") }
    run SetMainLED("green")
    var pending
    run WaitTicks(1)
    log.info(str(pending))
}
"#,
        );
        controller.start().unwrap();
        let state = controller.tick().unwrap();
        let ControllerState::Failed { error } = state else {
            panic!("expected failure, got {:?}", state);
        };
        assert_eq!(error.code, crate::executor::errors::UNBOUND_VARIABLE);
        assert_eq!(device.main_led(), Color::BLACK);
        assert_eq!(log.messages_at(LogLevel::Error).len(), 1);
        assert_eq!(controller.result(), None);
    }

    #[test]
    fn test_state_changes_are_reported() {
        let states = Arc::new(Mutex::new(Vec::new()));
        let seen = states.clone();
        let controller = ControllerBuilder::new(program("activity Main() { run WaitTicks(1) }"))
            .log_sink(MemoryLog::new())
            .on_state_change(move |state| seen.lock().push(state.clone()))
            .build();
        controller.start().unwrap();
        controller.tick().unwrap();
        assert_eq!(
            *states.lock(),
            vec![
                ControllerState::Running,
                ControllerState::Finished { result: Val::Null }
            ]
        );
    }

    #[test]
    fn test_host_log_methods() {
        let (controller, _, log) = setup("activity Main() { halt }");
        controller.log_info("a");
        controller.log_note("b");
        controller.log_error("c");
        assert_eq!(log.messages_at(LogLevel::Note), vec!["b"]);
        assert_eq!(log.messages(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_controller_state_serializes_with_tag() {
        let json = serde_json::to_value(ControllerState::Finished { result: Val::Num(1.0) }).unwrap();
        assert_eq!(json["state"], "finished");
        assert_eq!(serde_json::to_value(ControllerState::Idle).unwrap()["state"], "idle");
    }
}
