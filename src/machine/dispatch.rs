use crate::forms::*;
use crate::indexing::*;
use crate::machine::config::*;
use crate::machine::lib_machine::*;
use crate::machine::machine_errors::*;
use crate::machine::machine_state_impl::CatchKind;
use crate::machine::machine_state::*;
use crate::machine::stack::*;
use crate::machine::INTERRUPT;
use crate::types::*;

use std::rc::Rc;
use std::sync::atomic::Ordering;

impl MachineState {
    /// The driver loop. Runs until the query succeeds, fails for good,
    /// raises an uncaught exception or is stopped.
    pub(crate) fn run(&mut self) -> Status {
        loop {
            if let Some(err) = self.error {
                return Status::Fatal(err);
            }

            if let Some(code) = self.halt {
                return Status::Halt(code);
            }

            if self.abort {
                return Status::Aborted;
            }

            if let Some(ball) = self.ball.take() {
                tracing::debug!(depth = self.sub_depth, "uncaught exception");
                return Status::Exception(ball);
            }

            if INTERRUPT.swap(false, Ordering::Relaxed) {
                self.interrupt();
                continue;
            }

            if self.retry && !self.retry_choice() {
                self.retry = false;
                return Status::Failure;
            }

            let (goal, frame) = (self.st.curr_cell.clone(), self.st.curr_frame);
            let port = if self.retry { Port::Redo } else { Port::Call };

            self.trace(port, goal.as_ref(), frame);
            self.stats.goals += 1;

            match self.step() {
                Ok(true) => {
                    self.retry = false;
                    self.trace(Port::Exit, goal.as_ref(), frame);

                    match self.proceed() {
                        Ok(true) => {}
                        Ok(false) => {
                            self.stats.trail_len = self.trail.len();
                            return Status::Success;
                        }
                        Err(err) => self.throw_ball(err.ball),
                    }
                }
                Ok(false) => {
                    if self.cycle_error {
                        tracing::debug!(depth = self.sub_depth, "goal failed on a cyclic term");
                        self.cycle_error = false;
                    }

                    self.trace(Port::Fail, goal.as_ref(), frame);
                    self.retry = true;
                }
                Err(err) => self.throw_ball(err.ball),
            }
        }
    }

    fn step(&mut self) -> CallResult {
        let Some(loc) = self.st.curr_cell.clone() else {
            return Ok(true);
        };

        let cell = self.cell(&loc);

        if let Some(builtin) = cell.builtin {
            return (builtin.f)(self);
        }

        if cell.is_list_cons() {
            return self.consult_directive();
        }

        if cell.is_callable() {
            return self.match_head();
        }

        let goal = self.deref_loc(&loc, self.st.curr_frame);
        Err(self.type_error(ValidType::Callable, &goal))
    }

    /// Moves past a goal that succeeded: to the cell a builtin jumped to
    /// or the next one, through End cells and returning frames. Returns
    /// false once the query itself has succeeded.
    fn proceed(&mut self) -> Result<bool, MachineError> {
        let next = match self.jump.take() {
            Some(loc) => Some(loc),
            None => self.next_cell(),
        };

        self.st.curr_cell = match next {
            Some(next) if !self.attr_bindings.is_empty() => self.wake_attr_goals(next)?,
            next => next,
        };

        self.follow_ends();

        while self.st.curr_cell.is_none() {
            if self.st.curr_frame == 0 {
                return Ok(false);
            }

            self.resume_frame();
            self.follow_ends();
        }

        Ok(true)
    }

    /// Follows End cells until a goal or the end of a clause body.
    pub(crate) fn follow_ends(&mut self) {
        while let Some(loc) = self.st.curr_cell.clone() {
            let (cont, cgen) = match &self.cell(&loc).val {
                Value::End { cont, cgen } => (cont.clone(), *cgen),
                _ => break,
            };

            if let Some(orig) = cgen {
                self.exit_call(orig);
            }

            self.st.curr_cell = match cont {
                Cont::Return => None,
                Cont::Local(off) => Some(loc.at(off)),
                Cont::To(to) => Some(to),
            };
        }
    }

    /// Leaves a goal run behind a call barrier. A barrier still on top
    /// means the goal exited deterministically and the barrier goes; a
    /// catcher left behind becomes inactive until backtracked into.
    fn exit_call(&mut self, orig_cgen: u64) {
        let g = self.st.curr_frame;
        let cgen = self.frames[g].cgen;

        let det = self
            .choices
            .last()
            .is_some_and(|ch| ch.barrier && ch.cgen == cgen);

        if det {
            self.choices.pop();
            self.trim_trail();
        } else {
            let catcher = self
                .choices
                .iter()
                .rposition(|ch| ch.barrier && ch.cgen == cgen);

            if let Some(idx) = catcher {
                let ch = &mut self.choices[idx];

                if ch.catchme_retry && !ch.catch_exited {
                    ch.catch_exited = true;
                    self.push_trail(TrailEntry::CatchExit { choice: idx });
                }
            }
        }

        self.frames[g].cgen = orig_cgen;
    }

    /// Returns from the current frame to its caller. A frame returning
    /// with no choice point above it and no bindings into it is popped.
    fn resume_frame(&mut self) {
        let f = self.st.curr_frame;
        let frame = &self.frames[f];
        let (prev_frame, prev_cell, base) = (frame.prev_frame, frame.prev_cell.clone(), frame.base);

        let releasable = f + 1 == self.frames.len()
            && !frame.shared
            && !self.choices.last().is_some_and(|ch| ch.fp > f)
            && !self.frames[..f]
                .iter()
                .any(|frame| frame.overflow.is_some_and(|overflow| overflow >= base));

        if releasable {
            self.frames.pop();
            self.slots.truncate(base);
            self.trim_trail();
        }

        self.st.curr_frame = prev_frame;
        self.st.curr_cell = prev_cell;

        if self.flags.trace {
            let next = self.st.curr_cell.clone();
            self.trace(Port::Next, next.as_ref(), prev_frame);
        }
    }

    /// Resolves the current goal against the clauses of its predicate.
    /// On first entry the candidates are looked up and snapshotted; on
    /// backtracking the snapshot resumes after the clause last tried.
    pub(crate) fn match_head(&mut self) -> CallResult {
        let Some(goal_loc) = self.st.curr_cell.clone() else {
            return Ok(false);
        };

        let g = self.st.curr_frame;

        let mut iter = if self.retry {
            match self.st.iter.take() {
                Some(mut iter) => {
                    iter.advance();
                    iter
                }
                None => return Ok(false),
            }
        } else {
            let cell = self.cell(&goal_loc);
            let Some(key) = cell.key() else {
                return Ok(false);
            };

            let index_key = if cell.arity > 0 {
                match self.deref_loc(&goal_loc.offset(1), g) {
                    Deref::Const(cell) => IndexKey::from_cell(&cell),
                    Deref::Struct(loc, _) => IndexKey::from_cell(self.cell(&loc)),
                    Deref::Var(_) => None,
                }
            } else {
                None
            };

            match self.db.search_predicate(key, index_key) {
                Some((iter, _)) => {
                    self.frames[g].ugen = self.db.ugen();
                    iter
                }
                None => {
                    return match self.flags.unknown {
                        UnknownFlag::Error => {
                            Err(self.existence_error(ExistenceError::Procedure(key)))
                        }
                        UnknownFlag::Fail => Ok(false),
                    }
                }
            }
        };

        let ugen = self.frames[g].ugen;

        self.make_choice();

        let tp = self.trail.len();

        while let Some(clause) = iter.seek(ugen) {
            let code = clause.code.clone();
            let new = self.try_me(code.nbr_vars);

            self.stats.matches += 1;

            if self.error.is_some() {
                return Ok(false);
            }

            let goal = self.deref_loc(&goal_loc, g);
            let head = self.deref_loc(&Loc::code(&code, 0), new);

            if self.unify(&goal, &head) {
                let last = code.first_cut || !iter.has_next(ugen);
                self.commit_me(g, new, code, iter, last);
                return Ok(true);
            }

            let base = self.frames[new].base;

            self.undo_to(tp);
            self.frames.truncate(new);
            self.slots.truncate(base);
            self.attr_bindings.clear();

            iter.advance();
        }

        self.choices.pop();
        Ok(false)
    }

    /// Enters the body of a matched clause, reusing the calling frame for
    /// a deterministic tail-recursive call when nothing can still reach it.
    fn commit_me(
        &mut self,
        g: usize,
        new: usize,
        code: Rc<CompiledTerm>,
        iter: ClauseIter,
        last: bool,
    ) {
        if last {
            self.choices.pop();
        }

        let tail_rec = self.st.curr_cell.as_ref().is_some_and(|loc| match &loc.block {
            Block::Code(term) => term.tail_rec && self.cell(loc).flags.has(CellFlags::TAIL_REC),
            Block::Heap(_) => false,
        });

        let tco = last
            && self.flags.tco
            && tail_rec
            && g != 0
            && !self.any_choices(g)
            && self.attr_bindings.is_empty()
            && self.frame_reusable(g, new);

        if tco {
            self.reuse_frame(g, new);
        } else {
            self.make_frame(new);
        }

        if last {
            self.trim_trail();
        } else {
            let cgen = self.frames[self.st.curr_frame].cgen;

            if let Some(ch) = self.choices.last_mut() {
                ch.cgen = cgen;
                ch.st.iter = Some(iter);
            }
        }

        self.jump = Some(Loc::code(&code, code.body));
    }

    /// Unwinds to the newest active catcher whose catcher term unifies
    /// with a copy of the ball and runs its recovery goal. Cleanups met
    /// on the way run first. Without a catcher the ball ends the query.
    pub(crate) fn throw_ball(&mut self, ball: Tree) {
        self.retry = false;

        // catchers that already exited stay transparent even though
        // unwinding undoes the trail entries marking them so.
        let exited: Vec<bool> = self.choices.iter().map(|ch| ch.catch_exited).collect();

        while let Some(idx) = self.choices.len().checked_sub(1) {
            let tp = self.choices[idx].tp;
            self.undo_to(tp);

            if self.choices[idx].register_cleanup && !self.choices[idx].did_cleanup {
                self.choices[idx].did_cleanup = true;

                let ch = self.choices[idx].clone();
                self.run_cleanup(&ch);
            }

            let ch = self.choices[idx].clone();

            if ch.catchme_retry && !exited.get(idx).copied().unwrap_or(ch.catch_exited) {
                self.restore_choice(&ch);

                if self.recover(&ball) {
                    return;
                }

                self.undo_to(ch.tp);
                self.heap.trim(ch.hp);
            }

            self.choices.pop();
        }

        self.ball = Some(ball);
    }

    /// Tries the catch/3 goal under execution against a thrown ball.
    fn recover(&mut self, ball: &Tree) -> bool {
        let Some(next) = self.next_cell() else {
            return false;
        };

        let Some(ball) = self.import_tree(ball) else {
            return false;
        };

        let catcher = self.arg(1);

        if !self.unify(&catcher, &ball) {
            return false;
        }

        self.choices.pop();

        let g = self.st.curr_frame;
        let orig_cgen = self.frames[g].cgen;
        let recovery = self.arg(2);

        self.make_catcher(CatchKind::Exception);

        let end = Cell::end(Cont::To(next), Some(orig_cgen));

        match self.compile_call(&recovery, &[], end) {
            Ok(Some(code)) => {
                self.st.curr_cell = Some(code);
                self.follow_ends();
                true
            }
            Ok(None) => true,
            Err(err) => {
                self.choices.pop();
                self.frames[g].cgen = orig_cgen;
                self.throw_ball(err.ball);
                true
            }
        }
    }

    fn interrupt(&mut self) {
        let action = match self.hooks.borrow_mut().interrupt.as_mut() {
            Some(callback) => callback(),
            None => InterruptAction::Abort,
        };

        tracing::debug!(?action, "query interrupted");

        match action {
            InterruptAction::Abort => self.abort = true,
            InterruptAction::Fail => self.retry = true,
            InterruptAction::Continue => {}
            InterruptAction::Trace => self.flags.trace = !self.flags.trace,
            InterruptAction::Halt(code) => self.halt = Some(code),
        }
    }

    /// Reports a port event for a user-visible goal.
    fn trace(&mut self, port: Port, goal: Option<&Loc>, frame: usize) {
        if !self.flags.trace {
            return;
        }

        let Some(loc) = goal else {
            return;
        };

        let cell = self.cell(loc);

        if cell.flags.has(CellFlags::CONTROL) || cell.is_end() {
            return;
        }

        if let Some(name) = cell.name() {
            if self.db.atom_name(name).starts_with('$') {
                return;
            }
        }

        let goal = self.export_culprit(&self.deref_loc(loc, frame));
        let goal = tree_to_term(&self.db, &goal, &|n| format!("_G{n}"));

        tracing::trace!(step = self.stats.goals, port = %port, depth = frame, goal = %goal, "port");

        if let Some(callback) = self.hooks.borrow_mut().trace.as_mut() {
            callback(&TraceEvent {
                step: self.stats.goals,
                port,
                depth: frame,
                goal,
            });
        }
    }
}
