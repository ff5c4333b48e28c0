//! Core execution loop
//!
//! One reaction resumes every live trail exactly once, parents before children,
//! siblings in declaration order. The driver keeps an explicit stack of active
//! trails: a `cobegin` frame hands control to a child with `Step::Enter`, and
//! the child's outcome is delivered back to the `cobegin` when its turn ends.
//!
//! ## Function Organization
//! 1. react() - Top-level driver for one reaction
//! 2. step() - Runs the top frame of one trail
//! 3. scan_guards() / deliver() - Preemption and parallel termination
//! 4. unwind() / teardown() - Return propagation and instance cleanup

use std::sync::atomic::Ordering;

use super::defer::{DeferRecord, Site};
use super::errors::ErrorInfo;
use super::expressions::{eval_test, Stimulus};
use super::scope::InstanceId;
use super::stdlib::primitives::{self, DeviceCtx};
use super::types::ast::{PreemptMode, Strength};
use super::types::{
    Control, EveryPhase, Frame, FrameKind, RunPhase, Stmt, TrailId, TrailOutcome, Val, WhenPhase,
};
use super::vm::{push_stmt, ReactionKind, Status, Step, VM};
use crate::device::Device;
use crate::logging::{LogLevel, LogSink};

/* ===================== Public API ===================== */

impl VM {
    /// Run one reaction
    ///
    /// `Start` boots the entry activity and reacts at clock 0. `Tick` advances
    /// the clock (and the device model) first; `Trigger` reacts without moving
    /// the clock. Returns once every live trail is suspended, the entry activity
    /// terminated, or a stop was requested.
    pub fn react(
        &mut self,
        kind: ReactionKind,
        key: &str,
        device: &mut dyn Device,
        log: &dyn LogSink,
    ) -> Result<Status, ErrorInfo> {
        match kind {
            ReactionKind::Start => self.boot()?,
            ReactionKind::Tick => {
                self.clock += 1;
                self.reaction += 1;
                device.advance(self.clock);
            }
            ReactionKind::Trigger => self.reaction += 1,
        }

        self.stimulus = Stimulus {
            key: key.to_string(),
            clock_tick: kind != ReactionKind::Trigger,
            clock: self.clock,
            frequency: self.options.tick_frequency,
            device_error: self.latched_error.take(),
        };

        let span = tracing::debug_span!("reaction", n = self.reaction, clock = self.clock);
        let _enter = span.enter();

        let mut failures = Vec::new();
        let status = {
            let mut ctx = DeviceCtx {
                device,
                log,
                clock: self.clock,
                tick_frequency: self.options.tick_frequency,
                failures: &mut failures,
            };
            self.run_trails(&mut ctx)
        };
        self.latched_error = failures.pop();

        tracing::debug!(
            status = ?status.as_ref().map_err(|e| &e.code),
            instances = self.instances.live(),
            trails = self.trails.live(),
            "reaction settled"
        );
        status
    }

    /// Tear down the whole instance tree, running every pending defer
    pub fn shutdown(&mut self, device: &mut dyn Device, log: &dyn LogSink) {
        let Some(root) = self.root.take() else {
            return;
        };
        let mut failures = Vec::new();
        let mut ctx = DeviceCtx {
            device,
            log,
            clock: self.clock,
            tick_frequency: self.options.tick_frequency,
            failures: &mut failures,
        };
        self.teardown(root, 0, &mut ctx);
        self.trails.release(root);

        let leaked = self.instances.live();
        if leaked > 0 {
            tracing::warn!(leaked, "instances left after shutdown");
            self.instances.clear();
        }
        tracing::debug!(clock = self.clock, "program torn down");
    }

    fn run_trails(&mut self, ctx: &mut DeviceCtx<'_>) -> Result<Status, ErrorInfo> {
        let Some(root) = self.root else {
            return Ok(Status::Finished(self.result.clone().unwrap_or_default()));
        };

        let mut active = vec![root];
        self.scan_guards(root, ctx)?;

        while let Some(&tid) = active.last() {
            if self.stop.load(Ordering::SeqCst) {
                tracing::debug!(trail = tid, "stop requested mid-reaction");
                return Ok(Status::Interrupted);
            }

            match self.step(tid, ctx)? {
                Step::Continue => {}
                Step::Enter(child) => {
                    self.scan_guards(child, ctx)?;
                    active.push(child);
                }
                step @ (Step::Pause | Step::Finish) => {
                    active.pop();
                    let outcome = if step == Step::Pause {
                        TrailOutcome::Paused
                    } else {
                        match self.trails.get_mut(tid)?.control.take() {
                            Some(Control::Return { instance, value }) => {
                                TrailOutcome::Returned { instance, value }
                            }
                            None => TrailOutcome::Terminated,
                        }
                    };
                    tracing::trace!(trail = tid, ?outcome, "trail turn ended");

                    match active.last() {
                        Some(&parent) => self.deliver(parent, tid, outcome, ctx)?,
                        None if outcome == TrailOutcome::Paused => return Ok(Status::Suspended),
                        None => {
                            self.trails.release(tid);
                            self.root = None;
                            let value = self.result.clone().unwrap_or_default();
                            tracing::debug!(result = %value, "entry activity terminated");
                            return Ok(Status::Finished(value));
                        }
                    }
                }
            }
        }

        Err(ErrorInfo::internal("active trail stack drained without a root outcome"))
    }

    /* ===================== Stepping ===================== */

    /// Execute the top frame of one trail
    pub(crate) fn step(&mut self, tid: TrailId, ctx: &mut DeviceCtx<'_>) -> Result<Step, ErrorInfo> {
        let trail = self.trails.get_mut(tid)?;

        // Active control flow: unwind instead of running frames
        if trail.control.is_some() {
            return self.unwind(tid, ctx);
        }

        let Some(frame) = trail.frames.pop() else {
            return Ok(Step::Finish);
        };
        let instance = frame.instance;

        let step = match frame.kind {
            FrameKind::Instant => self.execute_instant(tid, frame, ctx),
            FrameKind::Block { .. } => self.execute_block(tid, frame),
            FrameKind::If => self.execute_if(tid, frame, ctx),
            FrameKind::Run { .. } => self.execute_run(tid, frame, ctx),
            FrameKind::Primitive { .. } => self.execute_primitive(tid, frame, ctx),
            FrameKind::Await => self.execute_await(tid, frame, ctx),
            FrameKind::Halt => {
                self.push(tid, frame)?;
                Ok(Step::Pause)
            }
            FrameKind::Repeat { .. } => self.execute_repeat(tid, frame, ctx),
            FrameKind::While { .. } => self.execute_while(tid, frame, ctx),
            FrameKind::Every { .. } => self.execute_every(tid, frame, ctx),
            FrameKind::When { .. } => self.execute_when(tid, frame, ctx),
            FrameKind::Cobegin { .. } => self.execute_cobegin(tid, frame),
        }?;

        // Records of frames that completed sink to the frame below them
        let height = self.trails.get(tid)?.frames.len();
        if let Ok(owner) = self.instances.get_mut(instance) {
            owner.defers.settle(tid, height);
        }
        Ok(step)
    }

    /* ===================== Preemption ===================== */

    /// Evaluate the guards of running `when`/`every` frames, bottom-up
    ///
    /// Called once per reaction when a trail's turn begins, before any of its
    /// frames run. The outermost guard that holds wins; everything above it is
    /// torn down.
    fn scan_guards(&mut self, tid: TrailId, ctx: &mut DeviceCtx<'_>) -> Result<(), ErrorInfo> {
        let log = ctx.log;
        let mut fired = None;
        for (idx, frame) in self.trails.get(tid)?.frames.iter().enumerate() {
            let test = match (&frame.kind, &frame.node) {
                (
                    FrameKind::When {
                        phase: WhenPhase::Running,
                    },
                    Stmt::When { test, .. },
                )
                | (
                    FrameKind::Every {
                        phase: EveryPhase::Running,
                    },
                    Stmt::Every { test, .. },
                ) => test,
                _ => continue,
            };
            if eval_test(test, &self.env(frame.instance, log))? {
                fired = Some(idx);
                break;
            }
        }

        match fired {
            Some(idx) => self.preempt(tid, idx, ctx),
            None => Ok(()),
        }
    }

    /// Tear down the body of the guard at `idx`, running the defers registered
    /// inside it, then end the construct (`abort`) or restart its body
    fn preempt(&mut self, tid: TrailId, idx: usize, ctx: &mut DeviceCtx<'_>) -> Result<(), ErrorInfo> {
        let guard = self
            .trails
            .get(tid)?
            .frames
            .get(idx)
            .ok_or_else(|| ErrorInfo::internal("guard frame out of range"))?;
        let instance = guard.instance;

        let restart = match &guard.node {
            Stmt::When {
                mode: PreemptMode::Abort,
                ..
            } => None,
            Stmt::When { body, .. } | Stmt::Every { body, .. } => Some((**body).clone()),
            _ => return Err(ErrorInfo::internal("guard frame is not when/every")),
        };

        match restart {
            None => {
                tracing::debug!(trail = tid, depth = idx, "guard fired: abort");
                self.teardown(tid, idx, ctx);
            }
            Some(body) => {
                tracing::debug!(trail = tid, depth = idx, "guard fired: restart body");
                self.teardown(tid, idx + 1, ctx);
                push_stmt(&mut self.trails.get_mut(tid)?.frames, &body, instance);
            }
        }
        Ok(())
    }

    /* ===================== Parallel Composition ===================== */

    /// Record a child trail's outcome on the parent's `cobegin` frame
    ///
    /// A strong child terminating, or a `return` escaping a child, ends the
    /// `cobegin` in this reaction: siblings still alive are torn down in
    /// declaration order and never get another turn.
    fn deliver(
        &mut self,
        parent: TrailId,
        child: TrailId,
        outcome: TrailOutcome,
        ctx: &mut DeviceCtx<'_>,
    ) -> Result<(), ErrorInfo> {
        if outcome == TrailOutcome::Paused {
            return Ok(());
        }

        let (owner, victims) = {
            let frames = &mut self.trails.get_mut(parent)?.frames;
            let height = frames.len();
            let frame = frames
                .last_mut()
                .ok_or_else(|| ErrorInfo::internal("parent trail has no cobegin frame"))?;
            let owner = (frame.instance, height);
            let FrameKind::Cobegin { children, .. } = &mut frame.kind else {
                return Err(ErrorInfo::internal("parent frame is not a cobegin"));
            };
            let entry = children
                .iter_mut()
                .find(|c| c.trail == child)
                .ok_or_else(|| ErrorInfo::internal(format!("trail {} is not a child", child)))?;
            entry.alive = false;

            let ends_block = entry.strength == Strength::Strong
                || matches!(outcome, TrailOutcome::Returned { .. });
            let mut victims = Vec::new();
            if ends_block {
                for sibling in children.iter_mut().filter(|c| c.alive) {
                    sibling.alive = false;
                    victims.push(sibling.trail);
                }
            }
            (owner, victims)
        };

        // Defers the child registered outside any `run` now belong to the cobegin
        let (instance, height) = owner;
        self.instances.get_mut(instance)?.defers.adopt(
            child,
            Site {
                trail: parent,
                depth: height,
            },
        );

        for victim in victims {
            tracing::debug!(trail = victim, by = child, "preempting sibling trail");
            self.teardown(victim, 0, ctx);
        }

        if let TrailOutcome::Returned { instance, value } = outcome {
            self.trails.get_mut(parent)?.control = Some(Control::Return { instance, value });
        }
        Ok(())
    }

    /* ===================== Control Flow ===================== */

    /// Pop one frame of a trail that is returning
    ///
    /// Stops at the `run` frame that called the returning instance; that frame
    /// then completes normally with the value as the callee's result.
    fn unwind(&mut self, tid: TrailId, ctx: &mut DeviceCtx<'_>) -> Result<Step, ErrorInfo> {
        let trail = self.trails.get_mut(tid)?;
        let instance = match &trail.control {
            Some(Control::Return { instance, .. }) => *instance,
            None => return Err(ErrorInfo::internal("unwind without active control")),
        };
        let Some(frame) = trail.frames.pop() else {
            // Crosses into the parent trail
            return Ok(Step::Finish);
        };

        if let FrameKind::Run {
            phase: RunPhase::Running,
            callee: Some(callee),
        } = frame.kind
        {
            if callee == instance {
                let value = match trail.control.take() {
                    Some(Control::Return { value, .. }) => value,
                    None => Val::Null,
                };
                trail.frames.push(frame);
                self.instances.get_mut(instance)?.result = value;
                return Ok(Step::Continue);
            }
        }

        self.discard_frame(frame, ctx);
        Ok(Step::Continue)
    }

    /// Tear down every frame of `tid` at or above `floor`, innermost first
    ///
    /// Each popped frame runs the defers registered inside it. Child trails of
    /// `cobegin` frames are torn down (first child first) and released; `tid`
    /// itself is not released.
    pub(crate) fn teardown(&mut self, tid: TrailId, floor: usize, ctx: &mut DeviceCtx<'_>) {
        // (trail, floor, release when empty)
        let mut work = vec![(tid, floor, false)];

        while let Some(&(t, floor, owned)) = work.last() {
            let Ok(trail) = self.trails.get_mut(t) else {
                work.pop();
                continue;
            };
            if floor == 0 {
                trail.control = None;
            }
            if trail.frames.len() <= floor {
                work.pop();
                if owned {
                    self.trails.release(t);
                }
                continue;
            }

            if let Some(Frame {
                kind: FrameKind::Cobegin { children, .. },
                ..
            }) = trail.frames.last_mut()
            {
                if !children.is_empty() {
                    let children = std::mem::take(children);
                    work.extend(children.iter().rev().map(|c| (c.trail, 0, true)));
                    continue;
                }
            }

            if let Some(frame) = trail.frames.pop() {
                let (instance, height) = (frame.instance, trail.frames.len());
                self.discard_frame(frame, ctx);
                let records = match self.instances.get_mut(instance) {
                    Ok(owner) => owner.defers.drain_above(t, height),
                    Err(_) => Vec::new(),
                };
                self.run_defers(instance, records, ctx);
            }
        }
    }

    /// Release whatever a frame owns when it is popped without completing
    fn discard_frame(&mut self, frame: Frame, ctx: &mut DeviceCtx<'_>) {
        match frame.kind {
            FrameKind::Run {
                callee: Some(callee),
                ..
            } => self.finish_instance(callee, ctx),
            FrameKind::Primitive { state } => {
                tracing::trace!(?state, "cancelling primitive");
                primitives::cancel(&state, ctx);
            }
            FrameKind::Cobegin { children, .. } => {
                for child in children {
                    self.teardown(child.trail, 0, ctx);
                    self.trails.release(child.trail);
                }
            }
            _ => {}
        }
    }

    /// Run an instance's defers in reverse registration order, then release it
    ///
    /// A failing defer is logged and the rest still run.
    pub(crate) fn finish_instance(&mut self, id: InstanceId, ctx: &mut DeviceCtx<'_>) {
        let records = match self.instances.get_mut(id) {
            Ok(instance) => instance.defers.drain_lifo(),
            Err(e) => {
                tracing::error!(instance = id, "cannot finish instance: {}", e);
                return;
            }
        };
        self.run_defers(id, records, ctx);

        if let Some(instance) = self.instances.release(id) {
            let name = self.registry.def(instance.def).map_or("?", |d| d.name.as_str());
            tracing::trace!(instance = id, activity = name, "instance released");
        }
    }

    fn run_defers(&mut self, id: InstanceId, records: Vec<DeferRecord>, ctx: &mut DeviceCtx<'_>) {
        for record in records {
            if let Err(e) = self.exec_instant(&record.body, id, ctx, None) {
                tracing::error!(
                    instance = id,
                    line = record.span.start_line + 1,
                    code = %e.code,
                    "defer failed: {}",
                    e.message
                );
                ctx.log.log(LogLevel::Error, &format!("defer failed: {}", e));
            }
        }
    }
}
