//! Statement execution handlers
//!
//! Each handler receives its frame by value (already popped), does one step of
//! work, and pushes the frame back if the statement is not finished. A handler
//! returning `Step::Continue` without pushing its frame has completed.

use std::sync::Arc;

use super::defer::{DeferStack, Site};
use super::errors::{self, ErrorInfo};
use super::expressions::{eval_expr, eval_test};
use super::instance::Instance;
use super::scope::{InstanceId, Scope, Slot, SlotRef};
use super::stdlib::primitives::{self, DeviceCtx, PrimitiveState, Progress, Started};
use super::types::ast::{CallTarget, EveryMode, PreemptMode, VarRef};
use super::types::{
    Child, CobeginPhase, Control, EveryPhase, Expr, Frame, FrameKind, LoopPhase, RunPhase, Stmt,
    Trail, TrailId, Val, WhenPhase,
};
use super::vm::{push_stmt, Step, VM};
use crate::logging::LogSink;

fn mismatch(frame: &Frame) -> ErrorInfo {
    ErrorInfo::internal(format!(
        "frame kind {:?} does not match statement node",
        frame.kind
    ))
}

fn unlinked(name: &str) -> ErrorInfo {
    ErrorInfo::internal(format!("'{}' was not resolved by the linker", name))
}

/// Keyword of a statement, for error messages
fn keyword(stmt: &Stmt) -> &'static str {
    match stmt {
        Stmt::Block { .. } => "block",
        Stmt::Exec { .. } => "exec",
        Stmt::Var { .. } => "var",
        Stmt::Assign { .. } => "assignment",
        Stmt::Expr { .. } => "expression",
        Stmt::Run { .. } => "run",
        Stmt::Await { .. } => "await",
        Stmt::Halt { .. } => "halt",
        Stmt::Repeat { .. } => "repeat",
        Stmt::While { .. } => "while",
        Stmt::Every { .. } => "every",
        Stmt::If { .. } => "if",
        Stmt::Cobegin { .. } => "cobegin",
        Stmt::When { .. } => "when",
        Stmt::Defer { .. } => "defer",
        Stmt::Return { .. } => "return",
    }
}

impl VM {
    fn eval(&self, expr: &Expr, instance: InstanceId, log: &dyn LogSink) -> Result<Val, ErrorInfo> {
        eval_expr(expr, &self.env(instance, log))
    }

    fn test(&self, expr: &Expr, instance: InstanceId, log: &dyn LogSink) -> Result<bool, ErrorInfo> {
        eval_test(expr, &self.env(instance, log))
    }

    fn bind(&mut self, instance: InstanceId, bind: Option<&VarRef>, value: Val) -> Result<(), ErrorInfo> {
        let Some(var) = bind else {
            return Ok(());
        };
        let slot = var.slot.ok_or_else(|| unlinked(&var.name))?;
        self.instances.write(instance, slot, value)
    }

    /* ===================== Instant Statements ===================== */

    /// Execute Var, Assign, Expr, Exec, Defer or Return
    pub(crate) fn execute_instant(
        &mut self,
        tid: TrailId,
        frame: Frame,
        ctx: &mut DeviceCtx<'_>,
    ) -> Result<Step, ErrorInfo> {
        match &frame.node {
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(e) => self.eval(e, frame.instance, ctx.log)?,
                    None => Val::Null,
                };
                self.trails.get_mut(tid)?.control = Some(Control::Return {
                    instance: frame.instance,
                    value,
                });
            }
            other => {
                let site = Site {
                    trail: tid,
                    depth: self.trails.get(tid)?.frames.len(),
                };
                self.exec_instant(other, frame.instance, ctx, Some(site))?
            }
        }
        Ok(Step::Continue)
    }

    /// Run a statement tree that must complete within the current step
    ///
    /// Used for `exec` bodies (`site` is where their defers register) and for
    /// defer bodies (`site` is `None`). Inside a defer, `run` of a device
    /// command is issued without waiting for completion.
    pub(crate) fn exec_instant(
        &mut self,
        stmt: &Stmt,
        instance: InstanceId,
        ctx: &mut DeviceCtx<'_>,
        site: Option<Site>,
    ) -> Result<(), ErrorInfo> {
        let in_defer = site.is_none();
        match stmt {
            Stmt::Block { body, .. } | Stmt::Exec { body, .. } => {
                for s in body {
                    self.exec_instant(s, instance, ctx, site)?;
                }
                Ok(())
            }
            Stmt::Var {
                name, slot, init, ..
            } => {
                let slot = slot.ok_or_else(|| unlinked(name))?;
                let value = match init {
                    Some(e) => Some(self.eval(e, instance, ctx.log)?),
                    None => None,
                };
                self.instances.get_mut(instance)?.scope.declare(slot, value)
            }
            Stmt::Assign { var, value, .. } => {
                let value = self.eval(value, instance, ctx.log)?;
                let slot = var.slot.ok_or_else(|| unlinked(&var.name))?;
                self.instances.write(instance, slot, value)
            }
            Stmt::Expr { expr, .. } => self.eval(expr, instance, ctx.log).map(drop),
            Stmt::If {
                test,
                then_s,
                else_s,
                ..
            } => {
                if self.test(test, instance, ctx.log)? {
                    self.exec_instant(then_s, instance, ctx, site)
                } else if let Some(else_s) = else_s {
                    self.exec_instant(else_s, instance, ctx, site)
                } else {
                    Ok(())
                }
            }
            Stmt::Defer { body, span } => match site {
                Some(site) => {
                    self.instances
                        .get_mut(instance)?
                        .defers
                        .push((**body).clone(), *span, site);
                    Ok(())
                }
                None => Err(ErrorInfo::new(
                    errors::NOT_INSTANTANEOUS,
                    format!(
                        "'defer' at line {} cannot run inside defer",
                        span.start_line + 1
                    ),
                )),
            },
            Stmt::Run {
                target: Some(CallTarget::Primitive { primitive }),
                args,
                ..
            } if in_defer && primitive.is_command() => {
                let values = args
                    .iter()
                    .map(|a| self.eval(a, instance, ctx.log))
                    .collect::<Result<Vec<_>, _>>()?;
                primitives::issue(*primitive, &values, ctx)
            }
            other => Err(ErrorInfo::new(
                errors::NOT_INSTANTANEOUS,
                format!(
                    "'{}' at line {} cannot run inside {}",
                    keyword(other),
                    other.span().start_line + 1,
                    if in_defer { "defer" } else { "exec" }
                ),
            )),
        }
    }

    /* ===================== Sequencing and Branching ===================== */

    /// Execute Block statement
    pub(crate) fn execute_block(&mut self, tid: TrailId, frame: Frame) -> Result<Step, ErrorInfo> {
        let (FrameKind::Block { idx }, Stmt::Block { body, .. }) = (&frame.kind, &frame.node) else {
            return Err(mismatch(&frame));
        };

        // Block complete, frame stays popped
        let Some(child) = body.get(*idx).cloned() else {
            return Ok(Step::Continue);
        };

        let instance = frame.instance;
        let next = idx + 1;
        self.push(
            tid,
            Frame {
                kind: FrameKind::Block { idx: next },
                ..frame
            },
        )?;
        self.push_stmt(tid, &child, instance)?;
        Ok(Step::Continue)
    }

    /// Execute If statement: the chosen branch replaces the frame
    pub(crate) fn execute_if(
        &mut self,
        tid: TrailId,
        frame: Frame,
        ctx: &mut DeviceCtx<'_>,
    ) -> Result<Step, ErrorInfo> {
        let Stmt::If {
            test,
            then_s,
            else_s,
            ..
        } = &frame.node
        else {
            return Err(mismatch(&frame));
        };

        let branch = if self.test(test, frame.instance, ctx.log)? {
            Some(&**then_s)
        } else {
            else_s.as_deref()
        };
        if let Some(branch) = branch {
            self.push_stmt(tid, branch, frame.instance)?;
        }
        Ok(Step::Continue)
    }

    /// Execute Await statement: checked when reached and on every resume
    pub(crate) fn execute_await(
        &mut self,
        tid: TrailId,
        frame: Frame,
        ctx: &mut DeviceCtx<'_>,
    ) -> Result<Step, ErrorInfo> {
        let Stmt::Await { test, .. } = &frame.node else {
            return Err(mismatch(&frame));
        };
        if self.test(test, frame.instance, ctx.log)? {
            return Ok(Step::Continue);
        }
        self.push(tid, frame)?;
        Ok(Step::Pause)
    }

    /* ===================== Run ===================== */

    /// Execute Run statement
    pub(crate) fn execute_run(
        &mut self,
        tid: TrailId,
        frame: Frame,
        ctx: &mut DeviceCtx<'_>,
    ) -> Result<Step, ErrorInfo> {
        let (phase, callee) = match &frame.kind {
            FrameKind::Run { phase, callee } => (*phase, *callee),
            _ => return Err(mismatch(&frame)),
        };
        match (phase, callee) {
            (RunPhase::Start, _) => self.start_run(tid, frame, ctx),
            (RunPhase::Running, Some(callee)) => {
                // Body completed (normally or through `return`)
                let (result, parent) = {
                    let instance = self.instances.get(callee)?;
                    (instance.result.clone(), instance.parent)
                };
                self.finish_instance(callee, ctx);
                if parent.is_none() {
                    self.result = Some(result);
                    return Ok(Step::Continue);
                }
                let Stmt::Run { bind, .. } = &frame.node else {
                    return Err(mismatch(&frame));
                };
                self.bind(frame.instance, bind.as_ref(), result)?;
                Ok(Step::Continue)
            }
            (RunPhase::Running, None) => Err(mismatch(&frame)),
        }
    }

    fn start_run(
        &mut self,
        tid: TrailId,
        frame: Frame,
        ctx: &mut DeviceCtx<'_>,
    ) -> Result<Step, ErrorInfo> {
        let Stmt::Run {
            activity,
            args,
            outs,
            bind,
            target,
            ..
        } = &frame.node
        else {
            return Err(mismatch(&frame));
        };
        let caller = frame.instance;

        match (*target).ok_or_else(|| unlinked(activity))? {
            CallTarget::Primitive { primitive } => {
                let values = args
                    .iter()
                    .map(|a| self.eval(a, caller, ctx.log))
                    .collect::<Result<Vec<_>, _>>()?;
                let locations = outs
                    .iter()
                    .map(|o| self.location(caller, o))
                    .collect::<Result<Vec<_>, _>>()?;

                match primitives::start(primitive, &values, &locations, ctx)? {
                    Started::Done(v) => {
                        self.bind(caller, bind.as_ref(), v)?;
                        Ok(Step::Continue)
                    }
                    Started::Pending(state) => {
                        if let Err(e) = self.write_sample(&state, ctx) {
                            primitives::cancel(&state, ctx);
                            return Err(e);
                        }
                        self.push(
                            tid,
                            Frame {
                                kind: FrameKind::Primitive { state },
                                ..frame
                            },
                        )?;
                        Ok(Step::Pause)
                    }
                }
            }

            CallTarget::Activity { def } => {
                let registry = Arc::clone(&self.registry);
                let definition = registry
                    .def(def)
                    .ok_or_else(|| ErrorInfo::internal(format!("definition {} missing", def)))?;

                let depth = self.instances.get(caller)?.depth + 1;
                if depth > self.options.max_call_depth {
                    return Err(ErrorInfo::new(
                        errors::CALL_DEPTH_EXCEEDED,
                        format!(
                            "Calling '{}' exceeds the maximum call depth of {}",
                            definition.name, self.options.max_call_depth
                        ),
                    ));
                }

                // Inputs: bare variables read through, anything else is copied
                let mut scope = Scope::with_len(definition.slots.len());
                for (i, arg) in args.iter().enumerate() {
                    let slot = match arg {
                        Expr::Ident {
                            slot: Some(slot), ..
                        } => self.instances.input_alias(caller, *slot)?,
                        _ => Slot::Value {
                            v: self.eval(arg, caller, ctx.log)?,
                        },
                    };
                    scope.set(i as u32, slot)?;
                }
                for (j, out) in outs.iter().enumerate() {
                    let slot = out.slot.ok_or_else(|| unlinked(&out.name))?;
                    scope.set(
                        (args.len() + j) as u32,
                        self.instances.location_alias(caller, slot)?,
                    )?;
                }

                let callee = self.instances.alloc(Instance {
                    def,
                    parent: Some(caller),
                    depth,
                    scope,
                    defers: DeferStack::new(),
                    result: Val::Null,
                    names: definition.slots.clone(),
                });
                tracing::trace!(activity = %definition.name, instance = callee, depth, "enter activity");

                self.push(
                    tid,
                    Frame {
                        kind: FrameKind::Run {
                            phase: RunPhase::Running,
                            callee: Some(callee),
                        },
                        ..frame
                    },
                )?;
                self.push_stmt(tid, &definition.body, callee)?;
                Ok(Step::Continue)
            }
        }
    }

    /// Owner slot a location argument writes to
    fn location(&self, caller: InstanceId, var: &VarRef) -> Result<SlotRef, ErrorInfo> {
        let slot = var.slot.ok_or_else(|| unlinked(&var.name))?;
        match self.instances.location_alias(caller, slot)? {
            Slot::Alias { target, .. } => Ok(target),
            _ => Err(ErrorInfo::internal("location alias without target")),
        }
    }

    /// Copy the device's latest sample into a streamer's location
    fn write_sample(&mut self, state: &PrimitiveState, ctx: &mut DeviceCtx<'_>) -> Result<(), ErrorInfo> {
        if let PrimitiveState::Stream { sensors, out } = state {
            if let Some(sample) = ctx.device.latest_sample() {
                self.instances.write_ref(*out, sample.to_val(sensors))?;
            }
        }
        Ok(())
    }

    /// Resume a pending device primitive
    pub(crate) fn execute_primitive(
        &mut self,
        tid: TrailId,
        frame: Frame,
        ctx: &mut DeviceCtx<'_>,
    ) -> Result<Step, ErrorInfo> {
        let Frame {
            kind,
            instance,
            node,
        } = frame;
        let FrameKind::Primitive { mut state } = kind else {
            return Err(ErrorInfo::internal("primitive handler got another frame kind"));
        };

        let progress = match primitives::poll(&mut state, ctx) {
            Ok(p) => self.write_sample(&state, ctx).map(|_| p),
            Err(e) => Err(e),
        };
        match progress {
            Ok(Progress::Done(v)) => {
                let Stmt::Run { bind, .. } = &node else {
                    return Err(ErrorInfo::internal("primitive frame without run node"));
                };
                self.bind(instance, bind.as_ref(), v)?;
                Ok(Step::Continue)
            }
            Ok(Progress::Pending) => {
                self.push(
                    tid,
                    Frame {
                        kind: FrameKind::Primitive { state },
                        instance,
                        node,
                    },
                )?;
                Ok(Step::Pause)
            }
            Err(e) => {
                primitives::cancel(&state, ctx);
                Err(e)
            }
        }
    }

    /* ===================== Loops ===================== */

    /// Begin a loop iteration: push the frame in `Body` phase, then the body
    fn begin_iteration(&mut self, tid: TrailId, frame: Frame, body: &Stmt) -> Result<Step, ErrorInfo> {
        let instance = frame.instance;
        let started = self.reaction;
        let kind = match frame.kind {
            FrameKind::Repeat { .. } => FrameKind::Repeat {
                phase: LoopPhase::Body,
                started,
            },
            FrameKind::While { .. } => FrameKind::While {
                phase: LoopPhase::Body,
                started,
            },
            _ => return Err(mismatch(&frame)),
        };
        self.push(tid, Frame { kind, ..frame })?;
        self.push_stmt(tid, body, instance)?;
        Ok(Step::Continue)
    }

    /// After an iteration: yield if it completed in the reaction it started
    fn end_iteration(&mut self, tid: TrailId, frame: Frame, started: u64) -> Result<Step, ErrorInfo> {
        let yielded = started == self.reaction;
        let phase = if yielded {
            LoopPhase::Yield
        } else {
            LoopPhase::Start
        };
        let kind = match frame.kind {
            FrameKind::Repeat { .. } => FrameKind::Repeat { phase, started },
            FrameKind::While { .. } => FrameKind::While { phase, started },
            _ => return Err(mismatch(&frame)),
        };
        self.push(tid, Frame { kind, ..frame })?;
        Ok(if yielded { Step::Pause } else { Step::Continue })
    }

    /// Execute Repeat statement (`until` is checked after each iteration)
    pub(crate) fn execute_repeat(
        &mut self,
        tid: TrailId,
        frame: Frame,
        ctx: &mut DeviceCtx<'_>,
    ) -> Result<Step, ErrorInfo> {
        let (FrameKind::Repeat { phase, started }, Stmt::Repeat { body, until, .. }) =
            (&frame.kind, &frame.node)
        else {
            return Err(mismatch(&frame));
        };
        let (phase, started) = (*phase, *started);

        match phase {
            LoopPhase::Start | LoopPhase::Yield => {
                let body = (**body).clone();
                self.begin_iteration(tid, frame, &body)
            }
            LoopPhase::Body => {
                if let Some(until) = until {
                    if self.test(until, frame.instance, ctx.log)? {
                        return Ok(Step::Continue);
                    }
                }
                self.end_iteration(tid, frame, started)
            }
        }
    }

    /// Execute While statement (test before each iteration)
    pub(crate) fn execute_while(
        &mut self,
        tid: TrailId,
        frame: Frame,
        ctx: &mut DeviceCtx<'_>,
    ) -> Result<Step, ErrorInfo> {
        let (FrameKind::While { phase, started }, Stmt::While { test, body, .. }) =
            (&frame.kind, &frame.node)
        else {
            return Err(mismatch(&frame));
        };
        let (phase, started) = (*phase, *started);

        match phase {
            LoopPhase::Start | LoopPhase::Yield => {
                if !self.test(test, frame.instance, ctx.log)? {
                    return Ok(Step::Continue);
                }
                let body = (**body).clone();
                self.begin_iteration(tid, frame, &body)
            }
            LoopPhase::Body => self.end_iteration(tid, frame, started),
        }
    }

    /* ===================== Guarded Constructs ===================== */

    /// Execute Every statement (`every`, `nowAndEvery`, `always`)
    pub(crate) fn execute_every(
        &mut self,
        tid: TrailId,
        frame: Frame,
        ctx: &mut DeviceCtx<'_>,
    ) -> Result<Step, ErrorInfo> {
        let (FrameKind::Every { phase }, Stmt::Every { mode, test, body, .. }) =
            (&frame.kind, &frame.node)
        else {
            return Err(mismatch(&frame));
        };
        let (phase, mode, instance) = (*phase, *mode, frame.instance);

        let waiting = |frame: Frame| Frame {
            kind: FrameKind::Every {
                phase: EveryPhase::Waiting,
            },
            ..frame
        };

        match phase {
            EveryPhase::Enter if mode == EveryMode::Next => {
                self.push(tid, waiting(frame))?;
                Ok(Step::Pause)
            }
            EveryPhase::Enter | EveryPhase::Waiting => {
                if !self.test(test, instance, ctx.log)? {
                    self.push(tid, waiting(frame))?;
                    return Ok(Step::Pause);
                }
                let body = (**body).clone();
                self.push(
                    tid,
                    Frame {
                        kind: FrameKind::Every {
                            phase: EveryPhase::Running,
                        },
                        ..frame
                    },
                )?;
                self.push_stmt(tid, &body, instance)?;
                Ok(Step::Continue)
            }
            // Body done for this round; check again next reaction
            EveryPhase::Running => {
                self.push(tid, waiting(frame))?;
                Ok(Step::Pause)
            }
        }
    }

    /// Execute When statement
    ///
    /// The guard is checked before the body first runs. An `abort` whose guard
    /// holds completes at once; a `reset` waits in `Enter` and starts its body
    /// in the first reaction where the guard does not hold.
    pub(crate) fn execute_when(
        &mut self,
        tid: TrailId,
        frame: Frame,
        ctx: &mut DeviceCtx<'_>,
    ) -> Result<Step, ErrorInfo> {
        let (FrameKind::When { phase }, Stmt::When { mode, test, body, .. }) =
            (&frame.kind, &frame.node)
        else {
            return Err(mismatch(&frame));
        };
        let (phase, mode) = (*phase, *mode);

        match phase {
            WhenPhase::Enter => {
                if self.test(test, frame.instance, ctx.log)? {
                    tracing::trace!(trail = tid, ?mode, "when guard holds on entry");
                    if mode == PreemptMode::Abort {
                        return Ok(Step::Continue);
                    }
                    self.push(tid, frame)?;
                    return Ok(Step::Pause);
                }
                let instance = frame.instance;
                let body = (**body).clone();
                self.push(
                    tid,
                    Frame {
                        kind: FrameKind::When {
                            phase: WhenPhase::Running,
                        },
                        ..frame
                    },
                )?;
                self.push_stmt(tid, &body, instance)?;
                Ok(Step::Continue)
            }
            // Body terminated on its own
            WhenPhase::Running => Ok(Step::Continue),
        }
    }

    /* ===================== Parallel Composition ===================== */

    /// Execute Cobegin statement
    ///
    /// Each resume hands the next live child to the driver; once every child
    /// has had its turn the frame pauses, and once none is alive it completes.
    pub(crate) fn execute_cobegin(&mut self, tid: TrailId, frame: Frame) -> Result<Step, ErrorInfo> {
        let Frame {
            kind,
            instance,
            node,
        } = frame;
        let FrameKind::Cobegin {
            phase,
            mut children,
            mut cursor,
        } = kind
        else {
            return Err(ErrorInfo::internal("cobegin handler got another frame kind"));
        };

        if phase == CobeginPhase::Start {
            let Stmt::Cobegin { trails, .. } = &node else {
                return Err(ErrorInfo::internal("cobegin frame without cobegin node"));
            };
            for decl in trails {
                let mut trail = Trail::default();
                push_stmt(&mut trail.frames, &decl.body, instance);
                children.push(Child {
                    trail: self.trails.alloc(trail),
                    strength: decl.strength,
                    alive: true,
                });
            }
            cursor = 0;
            tracing::trace!(trail = tid, children = children.len(), "cobegin started");
        }

        let next = (cursor..children.len()).find(|&i| children[i].alive);
        let step = match next {
            Some(i) => {
                cursor = i + 1;
                Step::Enter(children[i].trail)
            }
            None if children.iter().any(|c| c.alive) => {
                cursor = 0;
                Step::Pause
            }
            None => {
                for child in &children {
                    self.trails.release(child.trail);
                }
                return Ok(Step::Continue);
            }
        };

        self.push(
            tid,
            Frame {
                kind: FrameKind::Cobegin {
                    phase: CobeginPhase::Running,
                    children,
                    cursor,
                },
                instance,
                node,
            },
        )?;
        Ok(step)
    }
}
