//! The tree-walking evaluator.
//!
//! Statements execute against an [`ExecutionContext`] and produce a [`Flow`];
//! expressions produce a [`Value`]. Recursion through the tree is async all
//! the way down (boxed futures), because motion flushes, device reads, and
//! waits suspend inside expression evaluation.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::interpreter::ast::{
    AssignTarget, Block, Connector, Expr, ExprKind, InterruptDef, ModifierCall, MoveStmt, Program,
    Stmt, StmtKind, TextRange,
};
use crate::interpreter::ffi::pose_like;
use crate::interpreter::modifier::ModifierFrame;
use crate::interpreter::pose::Pose;
use crate::interpreter::value::{apply_binary, apply_unary, Closure, Value};
use crate::runtime::branch::{join_write_sets, BranchStatus};
use crate::runtime::error::{ExecError, ExecErrorKind};
use crate::runtime::frames::{FLANGE_FRAME, ROBOT_FRAME};
use crate::runtime::queue::{Action, MotionKind, QueuedItem};
use crate::runtime::{ExecutionContext, InterruptPolicy};

/// How a statement finished.
#[derive(Debug, Clone)]
pub(crate) enum Flow {
    /// Fall through to the next statement.
    Normal,
    /// Unwind to the innermost loop.
    Break,
    /// Unwind to the innermost call with a value.
    Return(Value),
    /// The program was stopped by the terminate interrupt policy.
    Terminated,
}

// Poll period for wait_for_io, in planner time.
const IO_POLL_INTERVAL_MS: u64 = 10;

fn locate(err: ExecError, range: TextRange) -> ExecError {
    if range == TextRange::default() {
        err
    } else {
        err.at(range)
    }
}

impl ExecutionContext {
    /// Run a whole program: execute the root block, then flush whatever the
    /// main branch still has queued.
    pub(crate) async fn run_program(&mut self, program: &Program) -> Result<(), ExecError> {
        let flow = self.exec_block(&program.body).await?;
        if !matches!(flow, Flow::Terminated) && !self.terminated {
            self.flush_queue().await?;
            self.branch.status = BranchStatus::Completed;
        }
        Ok(())
    }

    pub(crate) fn exec_block<'a>(
        &'a mut self,
        block: &'a Block,
    ) -> BoxFuture<'a, Result<Flow, ExecError>> {
        Box::pin(async move {
            for stmt in &block.statements {
                let flow = self.exec_stmt(stmt).await?;
                if self.terminated {
                    return Ok(Flow::Terminated);
                }
                if self.branch.queue.wants_flush(self.config.pipeline_threshold) {
                    self.flush_queue().await?;
                }
                if !matches!(flow, Flow::Normal) {
                    return Ok(flow);
                }
            }
            Ok(Flow::Normal)
        })
    }

    fn exec_stmt<'a>(&'a mut self, stmt: &'a Stmt) -> BoxFuture<'a, Result<Flow, ExecError>> {
        Box::pin(async move {
            self.exec_stmt_kind(&stmt.kind)
                .await
                .map_err(|err| locate(err, stmt.location))
        })
    }

    async fn exec_stmt_kind(&mut self, kind: &StmtKind) -> Result<Flow, ExecError> {
        match kind {
            StmtKind::Assign { target, value } => {
                let value = self.eval_expr(value).await?;
                self.assign(target, value)?;
                Ok(Flow::Normal)
            }
            StmtKind::If { arms, else_body } => {
                for arm in arms {
                    if self.eval_expr(&arm.condition).await?.is_truthy() {
                        return self.exec_block(&arm.body).await;
                    }
                }
                match else_body {
                    Some(body) => self.exec_block(body).await,
                    None => Ok(Flow::Normal),
                }
            }
            StmtKind::While { condition, body } => {
                while self.eval_expr(condition).await?.is_truthy() {
                    match self.exec_block(body).await? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        other => return Ok(other),
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::For {
                name,
                start,
                end,
                exclusive,
                body,
            } => {
                let start = self.eval_expr(start).await?.as_number()?;
                let end = self.eval_expr(end).await?.as_number()?;
                let mut current = start;
                while if *exclusive { current < end } else { current <= end } {
                    self.arena
                        .bind_local(self.current_scope, name, Value::Number(current));
                    match self.exec_block(body).await? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        other => return Ok(other),
                    }
                    current += 1.0;
                }
                Ok(Flow::Normal)
            }
            StmtKind::Repeat { count, body } => {
                let count = self.eval_expr(count).await?.as_number()?;
                if count < 0.0 || count.fract() != 0.0 {
                    return Err(ExecError::type_error(format!(
                        "repeat count must be a non-negative integer, got {count}"
                    )));
                }
                for _ in 0..count as u64 {
                    match self.exec_block(body).await? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        other => return Ok(other),
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Switch {
                scrutinee,
                cases,
                default,
            } => {
                let value = self.eval_expr(scrutinee).await?;
                for case in cases {
                    let candidate = self.eval_expr(&case.matches).await?;
                    if value.equals(&candidate) {
                        return self.exec_block(&case.body).await;
                    }
                }
                match default {
                    Some(body) => self.exec_block(body).await,
                    None => Ok(Flow::Normal),
                }
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Pass => Ok(Flow::Normal),
            StmtKind::Return { value } => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr).await?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::Raise { message } => {
                let message = self.eval_expr(message).await?;
                Err(ExecError::new(ExecErrorKind::UserRaised(
                    message.to_string(),
                )))
            }
            StmtKind::Print { value } => {
                let value = self.eval_expr(value).await?;
                let line = value.to_string();
                info!(target: "kinescript::program", "{line}");
                self.printed.push(line);
                Ok(Flow::Normal)
            }
            StmtKind::Wait { duration } => {
                let milliseconds = self.eval_expr(duration).await?.as_number()?;
                if milliseconds < 0.0 {
                    return Err(ExecError::type_error("wait duration must be non-negative"));
                }
                self.poll_interrupts().await?;
                if self.terminated {
                    return Ok(Flow::Terminated);
                }
                let planner = Arc::clone(&self.planner);
                planner.sleep(milliseconds as u64).await;
                // Waits are suspension points; give sibling arms a turn even
                // when the planner's timer completes immediately.
                tokio::task::yield_now().await;
                self.poll_interrupts().await?;
                Ok(Flow::Normal)
            }
            StmtKind::FunctionDef(def) => {
                self.arena.bind_local(
                    self.current_scope,
                    &def.name,
                    Value::Closure(Closure {
                        def: Arc::clone(def),
                        env: self.current_scope,
                    }),
                );
                Ok(Flow::Normal)
            }
            StmtKind::InterruptDef(def) => {
                self.declare_interrupt(def).await?;
                Ok(Flow::Normal)
            }
            StmtKind::SwitchInterrupt { name, enable } => {
                self.branch.interrupts.switch(name, *enable)?;
                debug!(interrupt = %name, armed = enable, "interrupt switched");
                Ok(Flow::Normal)
            }
            StmtKind::With { modifiers, body } => {
                let depth = self.branch.modifiers.depth();
                let frame = self.build_modifier_frame(modifiers).await?;
                self.branch.modifiers.push(frame);
                let result = self.exec_block(body).await;
                self.branch.modifiers.truncate(depth);
                result
            }
            StmtKind::Move(move_stmt) => {
                self.exec_move(move_stmt).await?;
                Ok(Flow::Normal)
            }
            StmtKind::RobotContext { arms } => self.exec_robot_context(arms).await,
            StmtKind::Sync {
                do_body,
                sync_body,
                handler,
            } => self.exec_sync(do_body, sync_body, handler).await,
            StmtKind::Write { device, key, value } => {
                let device = self.device_name(device).await?;
                let key = self.eval_expr(key).await?.as_str()?.to_string();
                let value = self.eval_expr(value).await?;
                if self.branch.queue.motion_count() > 0 {
                    // Mid-motion writes follow the motions they were queued
                    // behind.
                    self.branch.queue.push_device_write(device, key, value);
                } else {
                    let planner = Arc::clone(&self.planner);
                    planner.write(&device, &key, value).await?;
                }
                Ok(Flow::Normal)
            }
            StmtKind::Expr(expr) => {
                self.eval_expr(expr).await?;
                Ok(Flow::Normal)
            }
        }
    }

    fn assign(&mut self, target: &AssignTarget, value: Value) -> Result<(), ExecError> {
        match target {
            AssignTarget::Name(name) => {
                self.arena.write(self.current_scope, name, value);
                Ok(())
            }
            AssignTarget::Tuple(names) => {
                let items = value.as_array()?;
                if items.len() != names.len() {
                    return Err(ExecError::binding(format!(
                        "cannot destructure {} value(s) into {} name(s)",
                        items.len(),
                        names.len()
                    )));
                }
                let items = items.to_vec();
                for (name, item) in names.iter().zip(items) {
                    self.arena.write(self.current_scope, name, item);
                }
                Ok(())
            }
            AssignTarget::Relation { target, source } => {
                let pose = pose_like(value)?;
                self.frames.set_relation(target, source, pose);
                Ok(())
            }
        }
    }

    async fn build_modifier_frame(
        &mut self,
        modifiers: &[ModifierCall],
    ) -> Result<ModifierFrame, ExecError> {
        let mut frame = ModifierFrame::default();
        for modifier in modifiers {
            let value = self.eval_expr(&modifier.value).await?;
            frame.set(&modifier.name, &value)?;
        }
        Ok(frame)
    }

    async fn exec_move(&mut self, move_stmt: &MoveStmt) -> Result<(), ExecError> {
        // Attribution is checked at the move site, not at flush.
        self.motion_controller()?;
        let depth = self.branch.modifiers.depth();
        let result = self.exec_move_inner(move_stmt).await;
        self.branch.modifiers.truncate(depth);
        result
    }

    async fn exec_move_inner(&mut self, move_stmt: &MoveStmt) -> Result<(), ExecError> {
        if !move_stmt.modifiers.is_empty() {
            let frame = self.build_modifier_frame(&move_stmt.modifiers).await?;
            self.branch.modifiers.push(frame);
        }
        let tcp = match &move_stmt.tcp {
            Some(expr) => Some(self.frame_name(expr).await?),
            None => self.branch.effective_tcp(),
        };
        let target = pose_like(self.eval_expr(&move_stmt.target).await?)?;
        let target = match &move_stmt.frame_relation {
            Some((frame_target, frame_source)) => {
                // The anchored move asks: with [t | s] set to the given pose,
                // where must the flange be, expressed in the robot base? The
                // live flange relation must not shadow that query, so the
                // overlay carries only the anchor.
                let mut overlay = self.frames.clone();
                overlay.set_relation(frame_target, frame_source, target);
                overlay.get_relation(FLANGE_FRAME, ROBOT_FRAME)?
            }
            None => target,
        };
        let kind = match &move_stmt.connector {
            Connector::PointToPoint => MotionKind::PointToPoint,
            Connector::Line => MotionKind::Line,
            Connector::Arc { via } => {
                let via = pose_like(self.eval_expr(via).await?)?;
                MotionKind::Arc { via }
            }
        };
        let settings = self.branch.modifiers.settings();
        self.branch.queue.push_motion(Action {
            kind,
            target,
            tcp,
            velocity: settings.velocity,
            blending: settings.blending,
        })
    }

    async fn exec_robot_context(
        &mut self,
        arms: &[crate::interpreter::ast::DoArm],
    ) -> Result<Flow, ExecError> {
        if self.in_robot_context {
            return Err(ExecError::new(ExecErrorKind::NestedSync(
                "'do' blocks cannot nest inside a robot context".into(),
            )));
        }
        let mut contexts = Vec::with_capacity(arms.len());
        for arm in arms {
            let controller = self.controller_name(&arm.controller).await?;
            contexts.push(self.fork(controller));
        }

        // The arm futures run concurrently and interleave at suspension
        // points (waits, I/O polls), so a blocked arm is released by a
        // sibling's progress. Each arm closes with its own barrier flush.
        let results = futures::future::join_all(contexts.iter_mut().zip(arms).map(
            |(ctx, arm)| async move {
                let flow = ctx.exec_block(&arm.body).await?;
                if !ctx.terminated {
                    ctx.branch.status = BranchStatus::AwaitingSync;
                    ctx.flush_queue().await?;
                }
                Ok::<Flow, ExecError>(flow)
            },
        ))
        .await;

        let mut write_sets = Vec::with_capacity(arms.len());
        for (mut ctx, result) in contexts.into_iter().zip(results) {
            match result {
                Ok(_) => {
                    ctx.branch.status = BranchStatus::Completed;
                    debug!(branch = %ctx.branch.id, "branch joined");
                    write_sets.push(ctx.arena.local_bindings(ctx.branch.scope));
                    self.printed.append(&mut ctx.printed);
                    if ctx.terminated {
                        self.terminated = true;
                    }
                }
                Err(err) => {
                    ctx.branch.status = BranchStatus::Failed;
                    warn!(branch = %ctx.branch.id, error = %err, "branch failed");
                    return Err(err);
                }
            }
        }
        if self.terminated {
            return Ok(Flow::Terminated);
        }
        for (name, value) in join_write_sets(write_sets)? {
            self.arena.write(self.current_scope, &name, value);
        }
        Ok(Flow::Normal)
    }

    async fn exec_sync(
        &mut self,
        do_body: &Option<Block>,
        sync_body: &Option<Block>,
        handler: &Option<Block>,
    ) -> Result<Flow, ExecError> {
        let mut barrier_result: Result<Flow, ExecError> = Ok(Flow::Normal);
        if let Some(body) = do_body {
            barrier_result = self.exec_block(body).await;
        }
        if barrier_result.is_ok() {
            if let Err(err) = self.flush_queue().await {
                barrier_result = Err(err);
            }
        }
        match barrier_result {
            Ok(Flow::Normal) => {}
            Ok(other) => return Ok(other),
            Err(err) if err.is_catchable() && handler.is_some() => {
                warn!(error = %err, "sync barrier failed, running except handler");
                if let Some(body) = handler {
                    return self.exec_block(body).await;
                }
                return Ok(Flow::Normal);
            }
            Err(err) => return Err(err),
        }
        match sync_body {
            Some(body) => self.exec_block(body).await,
            None => Ok(Flow::Normal),
        }
    }

    async fn declare_interrupt(&mut self, def: &Arc<InterruptDef>) -> Result<(), ExecError> {
        let mut args = Vec::with_capacity(def.args.len());
        for arg in &def.args {
            args.push(self.eval_expr(arg).await?);
        }
        self.branch
            .interrupts
            .declare(Arc::clone(def), args, self.current_scope, self.call_depth);
        Ok(())
    }

    // --- expressions -----------------------------------------------------

    pub(crate) fn eval_expr<'a>(
        &'a mut self,
        expr: &'a Expr,
    ) -> BoxFuture<'a, Result<Value, ExecError>> {
        Box::pin(async move {
            self.eval_expr_kind(&expr.kind)
                .await
                .map_err(|err| locate(err, expr.location))
        })
    }

    async fn eval_expr_kind(&mut self, kind: &ExprKind) -> Result<Value, ExecError> {
        match kind {
            ExprKind::Number(n) => Ok(Value::Number(*n)),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Str(s) => Ok(Value::Str(s.clone())),
            ExprKind::Tuple(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item).await?);
                }
                tuple_value(values)
            }
            ExprKind::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item).await?);
                }
                Ok(Value::Array(values))
            }
            ExprKind::Record(entries) => {
                let mut record = crate::interpreter::value::Record::new();
                for (key, expr) in entries {
                    let value = self.eval_expr(expr).await?;
                    record.insert(key.clone(), value);
                }
                Ok(Value::Record(record))
            }
            ExprKind::Ident(name) => self.arena.read(self.current_scope, name),
            ExprKind::Unary { op, operand } => {
                let operand = self.eval_expr(operand).await?;
                apply_unary(*op, &operand)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                use crate::interpreter::ast::BinaryOp;
                match op {
                    BinaryOp::And => {
                        let lhs = self.eval_expr(lhs).await?;
                        if !lhs.is_truthy() {
                            return Ok(lhs);
                        }
                        self.eval_expr(rhs).await
                    }
                    BinaryOp::Or => {
                        let lhs = self.eval_expr(lhs).await?;
                        if lhs.is_truthy() {
                            return Ok(lhs);
                        }
                        self.eval_expr(rhs).await
                    }
                    _ => {
                        let lhs = self.eval_expr(lhs).await?;
                        let rhs = self.eval_expr(rhs).await?;
                        apply_binary(*op, &lhs, &rhs)
                    }
                }
            }
            ExprKind::Call { callee, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_expr(arg).await?);
                }
                self.call_by_name(callee, values, self.current_scope).await
            }
            ExprKind::Index { object, index } => {
                let object = self.eval_expr(object).await?;
                let index = self.eval_expr(index).await?;
                index_value(&object, &index)
            }
            ExprKind::Field { object, name } => {
                let object = self.eval_expr(object).await?;
                match object {
                    Value::Record(record) => record.get(name).cloned().ok_or_else(|| {
                        ExecError::name_not_found(format!("{name} (record field)"))
                    }),
                    other => Err(ExecError::type_error(format!(
                        "cannot access field '{name}' on {}",
                        other.type_name()
                    ))),
                }
            }
            ExprKind::Relation { target, source } => {
                let pose = match self.branch.last_planned_pose {
                    Some(seed) => self.frames.get_relation_with(
                        (FLANGE_FRAME, ROBOT_FRAME, seed),
                        target,
                        source,
                    )?,
                    None => self.frames.get_relation(target, source)?,
                };
                Ok(Value::Pose(pose))
            }
            ExprKind::Read { device, key } => {
                let device = self.eval_expr(device).await?;
                let key = self.eval_expr(key).await?.as_str()?.to_string();
                self.read_device(device, &key).await
            }
            ExprKind::DeviceCall { device, key, args } => {
                let device = self.eval_expr(device).await?;
                let device = self.device_name_value(device)?;
                let key = self.eval_expr(key).await?.as_str()?.to_string();
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_expr(arg).await?);
                }
                let planner = Arc::clone(&self.planner);
                Ok(planner.device_call(&device, &key, values).await?)
            }
        }
    }

    async fn read_device(&mut self, device: Value, key: &str) -> Result<Value, ExecError> {
        if let Value::Controller(controller) = &device {
            if key == "pose" {
                // Reading a robot's pose observes motion state, so the queue
                // must drain first.
                let controller = controller.clone();
                self.flush_queue().await?;
                let planner = Arc::clone(&self.planner);
                return Ok(Value::Pose(planner.read_pose(&controller).await?));
            }
        }
        let device = self.device_name_value(device)?;
        let planner = Arc::clone(&self.planner);
        Ok(planner.read(&device, key).await?)
    }

    /// Name resolution for calls: script definitions shadow host functions.
    pub(crate) fn call_by_name<'a>(
        &'a mut self,
        name: &'a str,
        args: Vec<Value>,
        scope: crate::interpreter::env::ScopeId,
    ) -> BoxFuture<'a, Result<Value, ExecError>> {
        Box::pin(async move {
            if let Ok(value) = self.arena.read(scope, name) {
                return match value {
                    Value::Closure(closure) => self.call_closure(closure, args).await,
                    other => Err(ExecError::type_error(format!(
                        "'{name}' is a {}, not a function",
                        other.type_name()
                    ))),
                };
            }
            let function = self
                .registry
                .lookup(name)
                .ok_or_else(|| ExecError::name_not_found(name))?;
            let args = function.signature.marshal(name, args)?;
            if function.deferred && self.branch.queue.motion_count() > 0 {
                debug!(function = %name, "deferring host call until flush");
                self.branch.queue.push_host_call(name, args);
                return Ok(Value::Null);
            }
            (function.callable)(self, args).await
        })
    }

    fn call_closure<'a>(
        &'a mut self,
        closure: Closure,
        args: Vec<Value>,
    ) -> BoxFuture<'a, Result<Value, ExecError>> {
        Box::pin(async move {
            if self.call_depth + 1 > self.config.max_call_depth {
                return Err(ExecError::new(ExecErrorKind::CallStackOverflow {
                    limit: self.config.max_call_depth,
                }));
            }
            let def = Arc::clone(&closure.def);
            if args.len() != def.params.len() {
                return Err(ExecError::binding(format!(
                    "'{}' expects {} argument(s), got {}",
                    def.name,
                    def.params.len(),
                    args.len()
                )));
            }
            let frame = self.arena.child(closure.env);
            for (param, arg) in def.params.iter().zip(args) {
                self.arena.bind_local(frame, param, arg);
            }
            let saved_scope = self.current_scope;
            let modifier_depth = self.branch.modifiers.depth();
            self.current_scope = frame;
            self.call_depth += 1;
            let result = self.exec_block(&def.body).await;
            self.call_depth -= 1;
            self.branch.modifiers.truncate(modifier_depth);
            self.branch.interrupts.retain_up_to_depth(self.call_depth);
            self.current_scope = saved_scope;
            match result? {
                Flow::Return(value) => Ok(value),
                Flow::Break => Err(ExecError::type_error("'break' outside of a loop")),
                _ => Ok(Value::Null),
            }
        })
    }

    // --- queue flushing and interrupts -----------------------------------

    /// Drain the active branch's queue: dispatch its motions as one batch,
    /// then run deferred host calls and device writes in order. Interrupt
    /// conditions are polled on entry and again after the dispatch.
    pub(crate) fn flush_queue<'a>(&'a mut self) -> BoxFuture<'a, Result<(), ExecError>> {
        Box::pin(async move {
            self.poll_interrupts().await?;
            if self.terminated || self.branch.queue.is_empty() {
                return Ok(());
            }
            let items = self.branch.queue.drain();
            let mut motions = Vec::new();
            let mut deferred = Vec::new();
            for item in items {
                match item {
                    QueuedItem::Motion(action) => motions.push(action),
                    other => deferred.push(other),
                }
            }
            if !motions.is_empty() {
                let controller = self.motion_controller()?;
                debug!(
                    controller = %controller,
                    motions = motions.len(),
                    "dispatching motion batch"
                );
                let planner = Arc::clone(&self.planner);
                let final_pose = planner.dispatch(&controller, &motions).await?;
                self.branch.last_planned_pose = Some(final_pose);
                self.poll_interrupts().await?;
                if self.terminated {
                    return Ok(());
                }
            }
            for item in deferred {
                match item {
                    QueuedItem::HostCall { name, args } => {
                        let function = self
                            .registry
                            .lookup(&name)
                            .ok_or_else(|| ExecError::name_not_found(&name))?;
                        (function.callable)(self, args).await?;
                    }
                    QueuedItem::DeviceWrite { device, key, value } => {
                        let planner = Arc::clone(&self.planner);
                        planner.write(&device, &key, value).await?;
                    }
                    QueuedItem::Motion(_) => {
                        return Err(ExecError::internal("motion left behind after partition"));
                    }
                }
            }
            Ok(())
        })
    }

    /// Evaluate the armed interrupt conditions of the active branch and fire
    /// the first that holds.
    pub(crate) fn poll_interrupts<'a>(&'a mut self) -> BoxFuture<'a, Result<(), ExecError>> {
        Box::pin(async move {
            if self.polling_interrupts || self.terminated || !self.branch.interrupts.any_armed() {
                return Ok(());
            }
            self.polling_interrupts = true;
            let result = self.poll_interrupts_inner().await;
            self.polling_interrupts = false;
            result
        })
    }

    async fn poll_interrupts_inner(&mut self) -> Result<(), ExecError> {
        for registration in self.branch.interrupts.armed() {
            let triggered = self
                .call_by_name(
                    &registration.def.condition,
                    registration.args.clone(),
                    registration.env,
                )
                .await?;
            if !triggered.is_truthy() {
                continue;
            }
            warn!(interrupt = %registration.def.name, "interrupt fired");
            if let Ok(controller) = self.motion_controller() {
                let planner = Arc::clone(&self.planner);
                planner.stop(&controller).await?;
            }
            self.branch.status = BranchStatus::Interrupted;
            self.branch
                .interrupts
                .deactivate_quiet(&registration.def.name);
            let handler_scope = self.arena.child(registration.env);
            let saved_scope = self.current_scope;
            self.current_scope = handler_scope;
            let def = Arc::clone(&registration.def);
            let handler_result = self.exec_block(&def.body).await;
            self.current_scope = saved_scope;
            handler_result?;
            match self.config.interrupt_policy {
                InterruptPolicy::Resume => self.branch.status = BranchStatus::Running,
                InterruptPolicy::Terminate => {
                    self.terminated = true;
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    // --- context services used by builtins -------------------------------

    /// Pose the controller will be at once everything queued has run: flush,
    /// then read.
    pub(crate) async fn planned_pose(
        &mut self,
        controller: Option<&str>,
    ) -> Result<Pose, ExecError> {
        self.flush_queue().await?;
        let controller = match controller {
            Some(name) => name.to_string(),
            None => self.motion_controller()?,
        };
        let planner = Arc::clone(&self.planner);
        Ok(planner.read_pose(&controller).await?)
    }

    /// Block until a device key reads the expected value, polling interrupt
    /// conditions between reads.
    pub(crate) async fn wait_for_io(
        &mut self,
        device: &str,
        key: &str,
        expected: &Value,
    ) -> Result<(), ExecError> {
        loop {
            let planner = Arc::clone(&self.planner);
            let value = planner.read(device, key).await?;
            if value.equals(expected) {
                return Ok(());
            }
            self.poll_interrupts().await?;
            if self.terminated {
                return Ok(());
            }
            planner.sleep(IO_POLL_INTERVAL_MS).await;
            // The poll loop must actually suspend, or a sibling arm never
            // gets to produce the value this one is waiting for.
            tokio::task::yield_now().await;
        }
    }

    // --- small helpers ---------------------------------------------------

    async fn controller_name(&mut self, expr: &Expr) -> Result<String, ExecError> {
        match self.eval_expr(expr).await? {
            Value::Controller(name) => Ok(name),
            other => Err(ExecError::type_error(format!(
                "expected a controller, got {}",
                other.type_name()
            ))),
        }
    }

    async fn frame_name(&mut self, expr: &Expr) -> Result<String, ExecError> {
        match self.eval_expr(expr).await? {
            Value::Str(name) | Value::Frame(name) => Ok(name),
            other => Err(ExecError::type_error(format!(
                "expected a tool frame name, got {}",
                other.type_name()
            ))),
        }
    }

    async fn device_name(&mut self, expr: &Expr) -> Result<String, ExecError> {
        let value = self.eval_expr(expr).await?;
        self.device_name_value(value)
    }

    fn device_name_value(&self, value: Value) -> Result<String, ExecError> {
        match value {
            Value::Controller(name) | Value::Str(name) => Ok(name),
            other => Err(ExecError::type_error(format!(
                "expected a device, got {}",
                other.type_name()
            ))),
        }
    }
}

/// A tuple literal of 3 or 6 numbers denotes a pose; anything else is an
/// array.
fn tuple_value(values: Vec<Value>) -> Result<Value, ExecError> {
    if values.len() == 3 || values.len() == 6 {
        if let Ok(numbers) = values
            .iter()
            .map(Value::as_number)
            .collect::<Result<Vec<f64>, _>>()
        {
            if numbers.len() == 3 {
                return Ok(Value::Pose(Pose::from_position(
                    crate::interpreter::pose::Vector3::new(numbers[0], numbers[1], numbers[2]),
                )));
            }
            let mut components = [0.0; 6];
            components.copy_from_slice(&numbers);
            return Ok(Value::Pose(Pose::from_components(components)));
        }
    }
    Ok(Value::Array(values))
}

fn index_value(object: &Value, index: &Value) -> Result<Value, ExecError> {
    match (object, index) {
        (Value::Array(items), Value::Number(n)) => {
            if *n < 0.0 || n.fract() != 0.0 || *n as usize >= items.len() {
                return Err(ExecError::binding(format!(
                    "index {n} out of range for array of length {}",
                    items.len()
                )));
            }
            Ok(items[*n as usize].clone())
        }
        (Value::Record(record), Value::Str(key)) => record
            .get(key)
            .cloned()
            .ok_or_else(|| ExecError::name_not_found(format!("{key} (record field)"))),
        (object, index) => Err(ExecError::type_error(format!(
            "cannot index {} with {}",
            object.type_name(),
            index.type_name()
        ))),
    }
}
