//! Control flow, frame and trail types

use super::ast::{Stmt, Strength};
use super::phase::{CobeginPhase, EveryPhase, LoopPhase, RunPhase, WhenPhase};
use super::values::Val;
use crate::executor::scope::InstanceId;
use crate::executor::stdlib::primitives::PrimitiveState;
use serde::{Deserialize, Serialize};

pub type TrailId = usize;

/* ===================== Control Flow ===================== */

/// Active control flow on a trail
///
/// When a trail has control set, stepping unwinds its frames instead of running
/// them, until the `run` frame that called `instance` takes the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Control {
    Return { instance: InstanceId, value: Val },
}

/* ===================== Frames ===================== */

/// Frame kind - the type and state of a statement being executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum FrameKind {
    /// Var, Assign, Expr, Exec, Defer and Return
    Instant,
    Block {
        idx: usize,
    },
    If,
    Run {
        phase: RunPhase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        callee: Option<InstanceId>,
    },
    /// A `run` of a device primitive that did not complete when started
    Primitive {
        state: PrimitiveState,
    },
    Await,
    Halt,
    Repeat {
        phase: LoopPhase,
        /// Reaction in which the current iteration started
        started: u64,
    },
    While {
        phase: LoopPhase,
        started: u64,
    },
    Every {
        phase: EveryPhase,
    },
    When {
        phase: WhenPhase,
    },
    Cobegin {
        phase: CobeginPhase,
        children: Vec<Child>,
        /// Next child to resume in the current reaction
        cursor: usize,
    },
}

/// Execution frame - one per active statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(flatten)]
    pub kind: FrameKind,

    /// Instance whose scope the statement reads and writes
    pub instance: InstanceId,

    /// The AST node (statement) this frame represents
    pub node: Stmt,
}

/* ===================== Trails ===================== */

/// One `cobegin` branch as seen from its parent frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Child {
    pub trail: TrailId,
    pub strength: Strength,
    pub alive: bool,
}

/// An independently suspending frame stack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trail {
    pub frames: Vec<Frame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<Control>,
}

/// How a trail ended its turn in a reaction
#[derive(Debug, Clone, PartialEq)]
pub enum TrailOutcome {
    Paused,
    Terminated,
    /// A `return` crossed the trail boundary; the parent keeps unwinding
    Returned { instance: InstanceId, value: Val },
}
