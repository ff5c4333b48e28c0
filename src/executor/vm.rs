//! Virtual Machine state
//!
//! The VM holds all execution state of one running program:
//! - instances: arena of activity instances (scopes, defers, results)
//! - trails: arena of frame stacks; the root trail runs the entry activity
//! - the logical clock and the stimulus frozen for the current reaction

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use super::defer::DeferStack;
use super::errors::ErrorInfo;
use super::expressions::{EvalEnv, Stimulus};
use super::instance::{Instance, InstanceArena};
use super::registry::Registry;
use super::scope::{InstanceId, Scope};
use super::types::ast::CallTarget;
use super::types::{
    CobeginPhase, EveryPhase, Frame, FrameKind, LoopPhase, RunPhase, Stmt, Trail, TrailId, Val,
    WhenPhase,
};
use crate::logging::LogSink;

/* ===================== VM ===================== */

/// Engine limits fixed for the lifetime of a VM
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VmOptions {
    pub tick_frequency: f64,
    pub max_call_depth: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            tick_frequency: 10.0,
            max_call_depth: 64,
        }
    }
}

/// Virtual Machine state
pub struct VM {
    pub(crate) registry: Arc<Registry>,
    pub(crate) instances: InstanceArena,
    pub(crate) trails: TrailArena,
    pub(crate) root: Option<TrailId>,

    /// Clock ticks since start
    pub(crate) clock: u64,
    /// Reactions since start (clock ticks and triggers)
    pub(crate) reaction: u64,
    pub(crate) options: VmOptions,

    pub(crate) stimulus: Stimulus,
    /// Last device failure of the previous reaction
    pub(crate) latched_error: Option<String>,
    /// Terminal value of the entry activity
    pub(crate) result: Option<Val>,

    /// Checked between steps; set by `Controller::stop` from inside a reaction
    pub(crate) stop: Arc<AtomicBool>,
}

impl VM {
    pub fn new(registry: Arc<Registry>, options: VmOptions, stop: Arc<AtomicBool>) -> Self {
        VM {
            registry,
            instances: InstanceArena::new(),
            trails: TrailArena::default(),
            root: None,
            clock: 0,
            reaction: 0,
            options,
            stimulus: Stimulus::default(),
            latched_error: None,
            result: None,
            stop,
        }
    }

    /// Instantiate the entry activity on a fresh root trail
    pub(crate) fn boot(&mut self) -> Result<(), ErrorInfo> {
        if self.root.is_some() {
            return Err(ErrorInfo::internal("program is already booted"));
        }
        let registry = Arc::clone(&self.registry);
        let entry = registry.entry();
        let def = registry
            .def(entry)
            .ok_or_else(|| ErrorInfo::internal(format!("entry definition {} missing", entry)))?;

        let root = self.instances.alloc(Instance {
            def: entry,
            parent: None,
            depth: 0,
            scope: Scope::with_len(def.slots.len()),
            defers: DeferStack::new(),
            result: Val::Null,
            names: def.slots.clone(),
        });

        // Synthetic `run Main()` so the root instance unwinds like any other
        let node = Stmt::Run {
            activity: def.name.clone(),
            args: vec![],
            outs: vec![],
            bind: None,
            target: Some(CallTarget::Activity { def: entry }),
            span: def.span,
        };
        let mut trail = Trail::default();
        trail.frames.push(Frame {
            kind: FrameKind::Run {
                phase: RunPhase::Running,
                callee: Some(root),
            },
            instance: root,
            node,
        });
        push_stmt(&mut trail.frames, &def.body, root);
        self.root = Some(self.trails.alloc(trail));

        tracing::debug!(activity = %def.name, module = %def.module, "booted entry activity");
        Ok(())
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn reaction(&self) -> u64 {
        self.reaction
    }

    pub fn is_running(&self) -> bool {
        self.root.is_some()
    }

    /// Number of activity instances alive right now
    pub fn live_instances(&self) -> usize {
        self.instances.live()
    }

    pub fn live_trails(&self) -> usize {
        self.trails.live()
    }

    pub(crate) fn env<'a>(&'a self, instance: InstanceId, log: &'a dyn LogSink) -> EvalEnv<'a> {
        EvalEnv {
            instances: &self.instances,
            instance,
            stimulus: &self.stimulus,
            log,
        }
    }

    pub(crate) fn push(&mut self, tid: TrailId, frame: Frame) -> Result<(), ErrorInfo> {
        self.trails.get_mut(tid)?.frames.push(frame);
        Ok(())
    }

    pub(crate) fn push_stmt(
        &mut self,
        tid: TrailId,
        stmt: &Stmt,
        instance: InstanceId,
    ) -> Result<(), ErrorInfo> {
        push_stmt(&mut self.trails.get_mut(tid)?.frames, stmt, instance);
        Ok(())
    }
}

/* ===================== Frame Management ===================== */

/// Push a new frame for a statement onto a frame stack
///
/// This determines the initial phase based on the statement type.
pub fn push_stmt(frames: &mut Vec<Frame>, stmt: &Stmt, instance: InstanceId) {
    let kind = match stmt {
        s if s.halts_forever() => FrameKind::Halt,
        Stmt::Block { .. } => FrameKind::Block { idx: 0 },
        Stmt::Exec { .. }
        | Stmt::Var { .. }
        | Stmt::Assign { .. }
        | Stmt::Expr { .. }
        | Stmt::Defer { .. }
        | Stmt::Return { .. } => FrameKind::Instant,
        Stmt::If { .. } => FrameKind::If,
        Stmt::Run { .. } => FrameKind::Run {
            phase: RunPhase::Start,
            callee: None,
        },
        Stmt::Await { .. } => FrameKind::Await,
        Stmt::Halt { .. } => FrameKind::Halt,
        Stmt::Repeat { .. } => FrameKind::Repeat {
            phase: LoopPhase::Start,
            started: 0,
        },
        Stmt::While { .. } => FrameKind::While {
            phase: LoopPhase::Start,
            started: 0,
        },
        Stmt::Every { .. } => FrameKind::Every {
            phase: EveryPhase::Enter,
        },
        Stmt::When { .. } => FrameKind::When {
            phase: WhenPhase::Enter,
        },
        Stmt::Cobegin { .. } => FrameKind::Cobegin {
            phase: CobeginPhase::Start,
            children: Vec::new(),
            cursor: 0,
        },
    };

    frames.push(Frame {
        kind,
        instance,
        node: stmt.clone(),
    });
}

/* ===================== Trail Arena ===================== */

#[derive(Debug, Default)]
pub struct TrailArena {
    entries: Vec<Option<Trail>>,
    free: Vec<TrailId>,
}

impl TrailArena {
    pub fn alloc(&mut self, trail: Trail) -> TrailId {
        match self.free.pop() {
            Some(id) => {
                self.entries[id] = Some(trail);
                id
            }
            None => {
                self.entries.push(Some(trail));
                self.entries.len() - 1
            }
        }
    }

    pub fn release(&mut self, id: TrailId) -> Option<Trail> {
        let taken = self.entries.get_mut(id).and_then(Option::take);
        if taken.is_some() {
            self.free.push(id);
        }
        taken
    }

    pub fn get(&self, id: TrailId) -> Result<&Trail, ErrorInfo> {
        self.entries
            .get(id)
            .and_then(Option::as_ref)
            .ok_or_else(|| ErrorInfo::internal(format!("trail {} is not alive", id)))
    }

    pub fn get_mut(&mut self, id: TrailId) -> Result<&mut Trail, ErrorInfo> {
        self.entries
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or_else(|| ErrorInfo::internal(format!("trail {} is not alive", id)))
    }

    pub fn live(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

/* ===================== Step Result ===================== */

/// Result of executing one step of a trail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep stepping this trail
    Continue,
    /// Trail is suspended until the next reaction
    Pause,
    /// Run a child trail's turn, then come back to this one
    Enter(TrailId),
    /// Frame stack is empty
    Finish,
}

/// What caused a reaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionKind {
    /// Reaction 0, at clock 0
    Start,
    /// Clock pulse: advances the clock by one
    Tick,
    /// Input event between clock pulses
    Trigger,
}

/// State of the program after a reaction settles
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Suspended,
    /// Entry activity terminated with this value
    Finished(Val),
    /// Stop was requested while reacting
    Interrupted,
}
