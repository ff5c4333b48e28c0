pub mod cli;
pub mod config;
pub mod controller;
pub mod device;
pub mod executor;
pub mod input;
pub mod logging;
pub mod parser;
pub mod program;

// Re-export the host-facing API
pub use controller::{Controller, ControllerBuilder, ControllerConfig, ControllerError, ControllerState};
pub use device::{Device, DeviceSelector, SimulatedDevice};
pub use input::Input;
pub use logging::{LogLevel, LogSink, MemoryLog, TracingSink};
pub use program::{LoadError, Program, ScriptProgram};
