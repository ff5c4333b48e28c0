//! Execution phase enums for each suspendable statement type
//!
//! A frame's phase records where its statement is between reactions. Instant
//! statements have no phase: they run to completion the moment they are reached.

use serde::{Deserialize, Serialize};

/// Execution phase for `run` statements calling an activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RunPhase {
    /// Evaluate arguments and create the callee instance
    Start = 0,
    /// Callee body is on the stack above this frame
    Running = 1,
}

/// Execution phase for `repeat` and `while` loops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum LoopPhase {
    /// Begin the next iteration (`while` tests first)
    Start = 0,
    /// Body is on the stack; the handler runs again when it completes
    Body = 1,
    /// Iteration finished in the reaction it started; resume next reaction
    Yield = 2,
}

/// Execution phase for `every`, `nowAndEvery` and `always`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EveryPhase {
    Enter = 0,
    /// Test is checked each time the trail resumes
    Waiting = 1,
    /// Body running; the test is a restart guard
    Running = 2,
}

/// Execution phase for `when (c) abort` and `when (c) reset`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum WhenPhase {
    Enter = 0,
    /// Body running; the test is checked before the body each reaction
    Running = 1,
}

/// Execution phase for `cobegin`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CobeginPhase {
    /// Child trails not created yet
    Start = 0,
    Running = 1,
}
