//! Test helpers for engine tests
//!
//! Common utilities for parsing programs, linking them and driving a VM one
//! reaction at a time against a simulated device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::device::{DeviceSelector, SimulatedDevice};
use crate::executor::{
    DefinitionError, ErrorInfo, Module, ReactionKind, Registry, Status, VmOptions, VM,
};
use crate::logging::MemoryLog;
use crate::parser::parse_module;
use crate::parser::semantic_validator::validate_module;

/// Parse a module and assert it has no validation errors
pub fn parse_valid(source: &str, name: &str) -> Module {
    let module = parse_module(source, name).expect("Parse module failed");
    let errors = validate_module(&module, source);
    let blocking: Vec<_> = errors.iter().filter(|e| e.is_error()).collect();
    assert!(blocking.is_empty(), "Module validation failed: {:?}", blocking);
    module
}

/// Link `(name, source)` modules without validation; the first one is main
/// and its `Main` activity is the entry
pub fn link(sources: &[(&str, &str)]) -> Result<Registry, DefinitionError> {
    let modules = sources
        .iter()
        .map(|(name, source)| parse_module(source, name).expect("Parse module failed"))
        .collect();
    Registry::link(modules, sources[0].0, "Main")
}

/// A VM plus the collaborators it runs against
pub struct Harness {
    pub vm: VM,
    pub device: SimulatedDevice,
    pub log: MemoryLog,
    pub stop: Arc<AtomicBool>,
}

impl Harness {
    /// Validated single-module program, not started yet
    pub fn new(source: &str) -> Self {
        Self::with_modules(&[("main", source)], VmOptions::default())
    }

    /// Program that skips validation, for runtime error tests
    pub fn unvalidated(source: &str) -> Self {
        let registry = link(&[("main", source)]).expect("Link failed");
        Self::from_registry(registry, VmOptions::default())
    }

    pub fn with_modules(sources: &[(&str, &str)], options: VmOptions) -> Self {
        let modules = sources
            .iter()
            .map(|(name, source)| parse_valid(source, name))
            .collect();
        let registry = Registry::link(modules, sources[0].0, "Main").expect("Link failed");
        Self::from_registry(registry, options)
    }

    fn from_registry(registry: Registry, options: VmOptions) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        Harness {
            vm: VM::new(Arc::new(registry), options, stop.clone()),
            device: SimulatedDevice::new(DeviceSelector::Simulated, options.tick_frequency as u32),
            log: MemoryLog::new(),
            stop,
        }
    }

    /// Parse, link and run reaction 0
    pub fn started(source: &str) -> Self {
        let mut h = Self::new(source);
        h.start();
        h
    }

    pub fn react(&mut self, kind: ReactionKind, key: &str) -> Result<Status, ErrorInfo> {
        self.vm.react(kind, key, &mut self.device, &self.log)
    }

    pub fn start(&mut self) -> Status {
        self.react(ReactionKind::Start, "").expect("Start reaction failed")
    }

    pub fn tick(&mut self) -> Status {
        self.tick_key("")
    }

    pub fn tick_key(&mut self, key: &str) -> Status {
        self.react(ReactionKind::Tick, key).expect("Tick reaction failed")
    }

    pub fn trigger(&mut self, key: &str) -> Status {
        self.react(ReactionKind::Trigger, key).expect("Trigger reaction failed")
    }

    /// Tick `n` times, returning the last status
    pub fn ticks(&mut self, n: usize) -> Status {
        let mut status = Status::Suspended;
        for _ in 0..n {
            status = self.tick();
        }
        status
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn shutdown(&mut self) {
        self.vm.shutdown(&mut self.device, &self.log);
    }

    pub fn messages(&self) -> Vec<String> {
        self.log.messages()
    }
}
