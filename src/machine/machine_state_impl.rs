use crate::machine::machine_errors::*;
use crate::machine::machine_state::*;
use crate::machine::stack::*;
use crate::types::*;

use smallvec::SmallVec;

use std::mem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CatchKind {
    /// Guards the goal of catch/3; a throw may resume here.
    Retry,
    /// Guards a recovery goal; transparent to backtracking and throws.
    Exception,
}

/// Brent's cycle finder over a chain of list cells. Long lists are
/// walked along their tails without deepening a traversal, so a cyclic
/// tail has to be caught here instead.
#[derive(Debug, Default)]
pub(crate) struct TailCycle {
    saved: Option<(Loc, usize)>,
    power: usize,
    lam: usize,
}

impl TailCycle {
    /// Records the next cell of the chain. True once the chain returns
    /// to a cell it already passed through.
    pub(crate) fn step(&mut self, loc: &Loc, ctx: usize) -> bool {
        if let Some((saved, saved_ctx)) = &self.saved {
            if *saved_ctx == ctx && saved == loc {
                return true;
            }
        }

        if self.lam == self.power {
            self.saved = Some((loc.clone(), ctx));
            self.power = (self.power * 2).max(1);
            self.lam = 0;
        }

        self.lam += 1;
        false
    }
}

impl MachineState {
    #[inline]
    pub(crate) fn cell<'a>(&'a self, loc: &'a Loc) -> &'a Cell {
        self.heap.at(loc)
    }

    #[inline]
    pub(crate) fn slot_index(&self, var: VarRef) -> Option<usize> {
        self.frames.get(var.ctx)?.slot_index(var.nbr)
    }

    #[inline]
    pub(crate) fn slot(&self, var: VarRef) -> Option<&Slot> {
        self.slot_index(var).map(|idx| &self.slots[idx])
    }

    pub(crate) fn deref_loc(&self, loc: &Loc, ctx: usize) -> Deref {
        let cell = self.cell(loc);

        match &cell.val {
            Value::Var(nbr) => self.deref_var(VarRef { ctx, nbr: *nbr }),
            Value::Indirect(target) => Deref::Struct(target.clone(), ctx),
            _ if cell.arity > 0 => Deref::Struct(loc.clone(), ctx),
            _ => Deref::Const(cell.clone()),
        }
    }

    /// Follows a variable chain to an unbound variable or a value.
    pub(crate) fn deref_var(&self, mut var: VarRef) -> Deref {
        loop {
            let Some(slot) = self.slot(var) else {
                return Deref::Var(var);
            };

            match &slot.cell.val {
                Value::Empty => return Deref::Var(var),
                Value::Var(nbr) => {
                    var = VarRef {
                        ctx: slot.ctx,
                        nbr: *nbr,
                    }
                }
                Value::Indirect(loc) => return Deref::Struct(loc.clone(), slot.ctx),
                _ => return Deref::Const(slot.cell.clone()),
            }
        }
    }

    pub(crate) fn deref(&self, term: &Deref) -> Deref {
        match term {
            Deref::Var(var) => self.deref_var(*var),
            Deref::Struct(loc, ctx) => self.deref_loc(loc, *ctx),
            Deref::Const(_) => term.clone(),
        }
    }

    /// The cells holding the arguments of the compound at `loc`.
    pub(crate) fn arg_locs(&self, loc: &Loc) -> SmallVec<[Loc; 4]> {
        let cell = self.cell(loc);
        let mut locs = SmallVec::with_capacity(cell.arity as usize);
        let mut off = loc.off + 1;

        for _ in 0..cell.arity {
            let arg = loc.at(off);
            off += self.cell(&arg).nbr_cells as usize;
            locs.push(arg);
        }

        locs
    }

    /// Argument `n` (from zero) of a dereferenced compound.
    pub(crate) fn struct_arg(&self, term: &Deref, n: usize) -> Option<Deref> {
        let Deref::Struct(loc, ctx) = term else {
            return None;
        };

        let cell = self.cell(loc);

        if n >= cell.arity as usize {
            return None;
        }

        let mut off = loc.off + 1;

        for _ in 0..n {
            off += self.cell(&loc.at(off)).nbr_cells as usize;
        }

        Some(self.deref_loc(&loc.at(off), *ctx))
    }

    /// The heads of the list cells `list` starts with, and what follows
    /// them.
    pub(crate) fn list_spine(&self, list: &Deref) -> Result<(Vec<Deref>, Deref), CycleError> {
        let mut items = vec![];
        let mut cycle = TailCycle::default();
        let mut rest = self.deref(list);

        while let Deref::Struct(loc, ctx) = &rest {
            if !self.cell(loc).is_list_cons() {
                break;
            }

            if cycle.step(loc, *ctx) {
                return Err(CycleError);
            }

            let args = self.arg_locs(loc);

            items.push(self.deref_loc(&args[0], *ctx));
            rest = self.deref_loc(&args[1], *ctx);
        }

        Ok((items, rest))
    }

    /// Walks two lists in step for as long as both continue. Yields the
    /// pairs of heads in order, then the pair of remaining tails.
    pub(crate) fn zip_lists(
        &self,
        l1: &Deref,
        l2: &Deref,
    ) -> Result<Vec<(Deref, Deref)>, CycleError> {
        let mut pairs = vec![];
        let mut cycle = TailCycle::default();
        let (mut t1, mut t2) = (self.deref(l1), self.deref(l2));

        loop {
            let (Deref::Struct(loc1, ctx1), Deref::Struct(loc2, ctx2)) = (&t1, &t2) else {
                break;
            };

            if !self.cell(loc1).is_list_cons() || !self.cell(loc2).is_list_cons() {
                break;
            }

            if cycle.step(loc1, *ctx1) {
                return Err(CycleError);
            }

            let (args1, args2) = (self.arg_locs(loc1), self.arg_locs(loc2));
            let (ctx1, ctx2) = (*ctx1, *ctx2);

            pairs.push((self.deref_loc(&args1[0], ctx1), self.deref_loc(&args2[0], ctx2)));

            t1 = self.deref_loc(&args1[1], ctx1);
            t2 = self.deref_loc(&args2[1], ctx2);
        }

        pairs.push((t1, t2));
        Ok(pairs)
    }

    /// Argument `n` (from zero) of the goal under execution, dereferenced
    /// in the current frame.
    pub(crate) fn arg(&self, n: usize) -> Deref {
        let goal = match &self.st.curr_cell {
            Some(loc) => Deref::Struct(loc.clone(), self.st.curr_frame),
            None => return Deref::Const(Cell::atom(atom!("[]"))),
        };

        self.struct_arg(&goal, n)
            .unwrap_or(Deref::Const(Cell::atom(atom!("[]"))))
    }

    /// Raises the hard error flag. The driver stops at its next iteration.
    pub(crate) fn fatal(&mut self, err: ResourceError) {
        if self.error.is_none() {
            tracing::warn!(resource = %err, depth = self.sub_depth, "query stack exhausted");
            self.error = Some(EngineError::Resource(err));
        }
    }

    pub(crate) fn alloc(&mut self, cells: Vec<Cell>) -> Option<Loc> {
        match self.heap.alloc(cells) {
            Ok(loc) => Some(loc),
            Err(err) => {
                self.fatal(err);
                None
            }
        }
    }

    pub(crate) fn push_trail(&mut self, entry: TrailEntry) {
        if let Err(err) = ensure_room(&mut self.trail, self.flags.max_trail, ResourceError::Trail) {
            self.fatal(err);
        }

        self.trail.push(entry);
        self.stats.max_trail = self.stats.max_trail.max(self.trail.len());
    }

    /// Binds an unbound variable. Structures are stored as an indirection
    /// to the cells, tagged with the context their variables live in.
    pub(crate) fn set_var(&mut self, var: VarRef, value: &Deref) {
        let Some(idx) = self.slot_index(var) else {
            return;
        };

        let (cell, ctx) = self.encode_value(var.ctx, value);
        let slot = &mut self.slots[idx];
        let attrs = slot.attrs.take();

        slot.cell = cell;
        slot.ctx = ctx;

        if let Some(attrs) = &attrs {
            self.attr_bindings.push((var, attrs.clone()));
        }

        if self.choices.is_empty() && attrs.is_none() {
            return;
        }

        self.push_trail(TrailEntry::Binding { var, attrs });
    }

    /// The cell and context storing `value` in a variable of frame
    /// `owner`. A newer frame referenced from an older one is marked
    /// shared so it is neither popped nor reused while reachable.
    pub(crate) fn encode_value(&mut self, owner: usize, value: &Deref) -> (Cell, usize) {
        let (cell, ctx) = match value {
            Deref::Var(other) => (Cell::var(other.nbr), other.ctx),
            Deref::Struct(loc, ctx) => (Cell::indirect(loc.clone()), *ctx),
            Deref::Const(cell) => {
                let mut cell = cell.clone();
                cell.flags = CellFlags::default();
                cell.builtin = None;
                (cell, owner)
            }
        };

        if ctx > owner {
            if let Some(frame) = self.frames.get_mut(ctx) {
                frame.shared = true;
            }
        }

        (cell, ctx)
    }

    /// Reads back a value stored by [`encode_value`](Self::encode_value).
    pub(crate) fn decode_value(&self, cell: &Cell, ctx: usize) -> Deref {
        match &cell.val {
            Value::Var(nbr) => self.deref_var(VarRef { ctx, nbr: *nbr }),
            Value::Indirect(loc) => Deref::Struct(loc.clone(), ctx),
            _ => Deref::Const(cell.clone()),
        }
    }

    /// Replaces the attributes of an unbound variable, trailing the old
    /// list.
    pub(crate) fn set_attrs(&mut self, var: VarRef, attrs: Option<AttrList>) {
        let Some(idx) = self.slot_index(var) else {
            return;
        };

        let prior = mem::replace(&mut self.slots[idx].attrs, attrs);
        self.push_trail(TrailEntry::Binding { var, attrs: prior });
    }

    /// Pops the trail down to `tp`, resetting each binding it recorded.
    pub(crate) fn undo_to(&mut self, tp: usize) {
        while self.trail.len() > tp {
            let Some(entry) = self.trail.pop() else {
                break;
            };

            match entry {
                TrailEntry::Binding { var, attrs } => {
                    if let Some(idx) = self.slot_index(var) {
                        let slot = &mut self.slots[idx];

                        slot.cell = Cell::empty();
                        slot.ctx = var.ctx;
                        slot.attrs = attrs;
                    }
                }
                TrailEntry::CatchExit { choice } => {
                    if let Some(ch) = self.choices.get_mut(choice) {
                        ch.catch_exited = false;
                    }
                }
                TrailEntry::FrameVars {
                    frame,
                    nbr_vars,
                    nbr_slots,
                    overflow,
                } => {
                    if let Some(frame) = self.frames.get_mut(frame) {
                        frame.nbr_vars = nbr_vars;
                        frame.nbr_slots = nbr_slots;
                        frame.overflow = overflow;
                    }
                }
            }
        }
    }

    /// Drops trail entries no surviving choice point can need: bindings of
    /// frames newer than the top choice and marks of popped catchers.
    pub(crate) fn trim_trail(&mut self) {
        let Some(ch) = self.choices.last() else {
            self.trail.clear();
            return;
        };

        let (tp, fp, nbr_choices) = (ch.tp, ch.fp, self.choices.len());
        let mut kept = tp;

        for idx in tp..self.trail.len() {
            let keep = match &self.trail[idx] {
                TrailEntry::Binding { var, .. } => var.ctx < fp,
                TrailEntry::CatchExit { choice } => *choice < nbr_choices,
                TrailEntry::FrameVars { frame, .. } => *frame < fp,
            };

            if keep {
                self.trail.swap(kept, idx);
                kept += 1;
            }
        }

        self.trail.truncate(kept);
    }

    pub(crate) fn make_choice(&mut self) {
        if let Err(err) = ensure_room(
            &mut self.choices,
            self.flags.max_choices,
            ResourceError::Choices,
        ) {
            self.fatal(err);
        }

        let frame = &self.frames[self.st.curr_frame];

        self.choices.push(Choice {
            st: self.st.clone(),
            fp: self.frames.len(),
            sp: self.slots.len(),
            tp: self.trail.len(),
            hp: self.heap.mark(),
            cgen: frame.cgen,
            orig_cgen: frame.cgen,
            ugen: frame.ugen,
            nbr_vars: frame.nbr_vars,
            nbr_slots: frame.nbr_slots,
            overflow: frame.overflow,
            barrier: false,
            soft_cut: false,
            catchme_retry: false,
            catchme_exception: false,
            catch_exited: false,
            register_cleanup: false,
            did_cleanup: false,
            chk_is_det: false,
        });

        self.stats.max_choices = self.stats.max_choices.max(self.choices.len());
    }

    /// A choice point that also opens a new cut generation for the
    /// current frame, so cuts inside stop here.
    pub(crate) fn make_barrier(&mut self) {
        self.make_choice();

        let cgen = self.next_cgen();
        let g = self.st.curr_frame;

        self.frames[g].cgen = cgen;

        if let Some(ch) = self.choices.last_mut() {
            ch.cgen = cgen;
            ch.barrier = true;
        }
    }

    pub(crate) fn make_catcher(&mut self, kind: CatchKind) {
        self.make_barrier();

        if let Some(ch) = self.choices.last_mut() {
            match kind {
                CatchKind::Retry => ch.catchme_retry = true,
                CatchKind::Exception => ch.catchme_exception = true,
            }
        }
    }

    /// Restores the registers and the current frame's bookkeeping to a
    /// choice point, releasing everything allocated since.
    pub(crate) fn restore_choice(&mut self, ch: &Choice) {
        self.heap.trim(ch.hp);
        self.frames.truncate(ch.fp);
        self.slots.truncate(ch.sp);
        self.st = ch.st.clone();

        if let Some(frame) = self.frames.get_mut(self.st.curr_frame) {
            frame.ugen = ch.ugen;
            frame.cgen = ch.orig_cgen;
            frame.nbr_vars = ch.nbr_vars;
            frame.nbr_slots = ch.nbr_slots;
            frame.overflow = ch.overflow;
        }

        self.attr_bindings.clear();
        self.jump = None;
    }

    /// Backtracks to the newest choice point that still offers an
    /// alternative. Returns false when there is none.
    pub(crate) fn retry_choice(&mut self) -> bool {
        while let Some(ch) = self.choices.pop() {
            self.undo_to(ch.tp);

            if ch.catchme_exception || ch.soft_cut || ch.did_cleanup {
                continue;
            }

            self.restore_choice(&ch);
            self.stats.retries += 1;
            self.retry = true;

            return true;
        }

        self.attr_bindings.clear();
        false
    }

    /// Discards the newest choice point without backtracking to it,
    /// honouring any cleanup it carries.
    pub(crate) fn cut_choice(&mut self) {
        let Some(ch) = self.choices.pop() else {
            return;
        };

        if ch.register_cleanup && !ch.did_cleanup {
            self.run_cleanup(&ch);
        } else if ch.chk_is_det {
            let top = self.choices.len().checked_sub(1);

            if let Some(top) = top {
                let guard = &mut self.choices[top];

                if guard.register_cleanup && !guard.did_cleanup {
                    guard.did_cleanup = true;
                    let guard = guard.clone();
                    self.run_cleanup(&guard);
                }
            }
        }
    }

    #[inline]
    fn settle_trail(&mut self) {
        if self.choices.is_empty() {
            self.trail.clear();
        }
    }

    /// `!`: removes the choice points of the current cut generation,
    /// stopping at a barrier opened in it.
    pub(crate) fn cut_me(&mut self) {
        let cgen = self.frames[self.st.curr_frame].cgen;

        while let Some(ch) = self.choices.last() {
            if ch.cgen < cgen || (ch.barrier && ch.cgen == cgen) {
                break;
            }

            self.cut_choice();
        }

        self.settle_trail();
    }

    /// Commits to the condition of an if-then-else: removes the barrier
    /// opened for it along with the condition's choice points.
    pub(crate) fn ite_cut(&mut self) {
        let g = self.st.curr_frame;
        let cgen = self.frames[g].cgen;

        while let Some(ch) = self.choices.last() {
            if ch.cgen < cgen {
                break;
            }

            let opened_here = ch.barrier && ch.cgen == cgen;
            let orig_cgen = ch.orig_cgen;

            self.cut_choice();

            if opened_here {
                self.frames[g].cgen = orig_cgen;
                break;
            }
        }

        self.settle_trail();
    }

    /// Commits to the condition of a soft-cut without discarding its
    /// alternatives: the barrier no longer leads to the else branch.
    pub(crate) fn soft_cut(&mut self) {
        let g = self.st.curr_frame;
        let cgen = self.frames[g].cgen;

        let barrier = self
            .choices
            .iter_mut()
            .rev()
            .find(|ch| ch.barrier && ch.cgen == cgen);

        if let Some(ch) = barrier {
            ch.soft_cut = true;
            self.frames[g].cgen = ch.orig_cgen;
        }
    }

    /// Whether any choice point belongs to the current generation of
    /// frame `g` or a newer one.
    #[inline]
    pub(crate) fn any_choices(&self, g: usize) -> bool {
        let cgen = self.frames[g].cgen;
        self.choices.last().is_some_and(|ch| ch.cgen >= cgen)
    }

    /// Pushes a candidate frame for a clause with `nbr_vars` variables.
    pub(crate) fn try_me(&mut self, nbr_vars: usize) -> usize {
        if let Err(err) = ensure_room(&mut self.frames, self.flags.max_frames, ResourceError::Frames)
        {
            self.fatal(err);
        }

        let base = self.slots.len();

        if base + nbr_vars > self.flags.max_slots {
            self.fatal(ResourceError::Slots);
        }

        self.slots.resize(base + nbr_vars, Slot::default());
        self.frames.push(Frame::new(base, nbr_vars));

        let new = self.frames.len() - 1;
        self.stats.max_frames = self.stats.max_frames.max(self.frames.len());

        new
    }

    /// The cell following the goal under execution.
    pub(crate) fn next_cell(&self) -> Option<Loc> {
        self.st
            .curr_cell
            .as_ref()
            .map(|loc| loc.offset(self.cell(loc).nbr_cells as usize))
    }

    /// Makes a matched candidate frame current. It returns to the cell
    /// after the calling goal.
    pub(crate) fn make_frame(&mut self, new: usize) {
        let cgen = self.next_cgen();
        let prev_cell = self.next_cell();
        let prev_frame = self.st.curr_frame;
        let frame = &mut self.frames[new];

        frame.prev_frame = prev_frame;
        frame.prev_cell = prev_cell;
        frame.cgen = cgen;

        self.st.curr_frame = new;
    }

    /// Whether the candidate frame `new` can replace the calling frame
    /// `g`: nothing older may point into the frames being released, and
    /// the new bindings may only point at themselves or at older frames.
    pub(crate) fn frame_reusable(&self, g: usize, new: usize) -> bool {
        if self.frames[g..].iter().any(|frame| frame.shared) {
            return false;
        }

        let g_base = self.frames[g].base;

        if self.frames[..g]
            .iter()
            .any(|frame| frame.overflow.is_some_and(|overflow| overflow >= g_base))
        {
            return false;
        }

        let frame = &self.frames[new];

        if frame.overflow.is_some() {
            return false;
        }

        let reachable = |ctx: usize| ctx < g || ctx == new;

        self.slots[frame.base..frame.base + frame.nbr_vars]
            .iter()
            .all(|slot| {
                let bound_ok = match slot.cell.val {
                    Value::Var(_) | Value::Indirect(_) => reachable(slot.ctx),
                    _ => true,
                };

                bound_ok
                    && slot
                        .attrs
                        .as_ref()
                        .map_or(true, |attrs| attrs.iter().all(|(_, _, ctx)| reachable(*ctx)))
            })
    }

    /// Moves the slots of the top frame `new` down over frame `g` and
    /// drops every frame above `g`.
    pub(crate) fn reuse_frame(&mut self, g: usize, new: usize) {
        let (base, nbr_vars) = {
            let frame = &self.frames[new];
            (frame.base, frame.nbr_vars)
        };

        let mut moved = self.slots.split_off(base);
        moved.truncate(nbr_vars);

        for slot in moved.iter_mut() {
            if slot.ctx == new {
                slot.ctx = g;
            }

            if let Some(attrs) = slot.attrs.as_mut() {
                if attrs.iter().any(|(_, _, ctx)| *ctx == new) {
                    let remapped = attrs
                        .iter()
                        .map(|(module, value, ctx)| {
                            (*module, value.clone(), if *ctx == new { g } else { *ctx })
                        })
                        .collect();

                    *attrs = std::rc::Rc::new(remapped);
                }
            }
        }

        let g_base = self.frames[g].base;

        self.slots.truncate(g_base);
        self.slots.extend(moved);
        self.frames.truncate(g + 1);

        let cgen = self.next_cgen();
        let frame = &mut self.frames[g];

        frame.nbr_vars = nbr_vars;
        frame.nbr_slots = nbr_vars;
        frame.overflow = None;
        frame.shared = false;
        frame.cgen = cgen;

        self.stats.tcos += 1;
    }

    /// Allocates `cnt` fresh variables in the current frame and returns
    /// the number of the first. Frames that are no longer on top of the
    /// slot store grow into an overflow region at its end.
    pub(crate) fn create_vars(&mut self, cnt: usize) -> u32 {
        let g = self.st.curr_frame;
        let sp = self.slots.len();
        let (base, nbr_slots, first, overflow) = {
            let frame = &self.frames[g];
            (frame.base, frame.nbr_slots, frame.nbr_vars, frame.overflow)
        };

        if cnt == 0 {
            return first as u32;
        }

        if self.choices.last().is_some_and(|ch| g < ch.fp) {
            self.push_trail(TrailEntry::FrameVars {
                frame: g,
                nbr_vars: first,
                nbr_slots,
                overflow,
            });
        }

        if sp + cnt > self.flags.max_slots {
            self.fatal(ResourceError::Slots);
        }

        match overflow {
            None if base + nbr_slots == sp => {
                self.frames[g].nbr_slots += cnt;
            }
            None => {
                self.frames[g].overflow = Some(sp);
            }
            Some(overflow) => {
                let in_overflow = first - nbr_slots;

                if overflow + in_overflow != sp {
                    let region: Vec<Slot> = self.slots[overflow..overflow + in_overflow].to_vec();

                    self.slots.extend(region);
                    self.frames[g].overflow = Some(sp);
                }
            }
        }

        let sp = self.slots.len();

        self.slots.resize(sp + cnt, Slot::default());
        self.frames[g].nbr_vars += cnt;

        first as u32
    }
}
