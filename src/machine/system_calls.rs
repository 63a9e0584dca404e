use crate::atom_table::*;
use crate::forms::*;
use crate::indexing::*;
use crate::machine::arithmetic_ops::*;
use crate::machine::compile::*;
use crate::machine::lib_machine::*;
use crate::machine::machine_errors::*;
use crate::machine::machine_state_impl::CatchKind;
use crate::machine::machine_indices::*;
use crate::machine::machine_state::*;
use crate::machine::stack::*;
use crate::types::*;

use dashu::Integer;

use std::cmp::Ordering;

/// Largest arity functor/3 and =../2 will build.
pub(crate) const MAX_ARITY: usize = 1023;

/// Native predicates, attached to goal cells at compile time.
pub(crate) static BUILTINS: &[(&str, usize, BuiltinFn)] = &[
    ("true", 0, MachineState::succeed),
    ("fail", 0, MachineState::fail),
    ("false", 0, MachineState::fail),
    ("!", 0, MachineState::cut),
    (";", 2, MachineState::disjunction),
    ("->", 2, MachineState::if_then),
    ("*->", 2, MachineState::if_then),
    ("\\+", 1, MachineState::not_provable),
    ("$ite_cut", 0, MachineState::ite_cut_goal),
    ("$soft_cut", 0, MachineState::soft_cut_goal),
    ("$nt_cut", 0, MachineState::nt_cut_goal),
    ("call", 1, MachineState::call_n),
    ("call", 2, MachineState::call_n),
    ("call", 3, MachineState::call_n),
    ("call", 4, MachineState::call_n),
    ("call", 5, MachineState::call_n),
    ("call", 6, MachineState::call_n),
    ("call", 7, MachineState::call_n),
    ("call", 8, MachineState::call_n),
    (":", 2, MachineState::call_qualified),
    ("once", 1, MachineState::once),
    ("ignore", 1, MachineState::ignore),
    ("forall", 2, MachineState::forall),
    ("catch", 3, MachineState::catch),
    ("throw", 1, MachineState::throw),
    ("findall", 3, MachineState::findall),
    ("setup_call_cleanup", 3, MachineState::setup_call_cleanup),
    ("$call_cleanup", 2, MachineState::call_cleanup),
    ("$cleanup_exit", 0, MachineState::cleanup_exit),
    ("between", 3, MachineState::between),
    ("repeat", 0, MachineState::repeat),
    ("halt", 0, MachineState::halt_0),
    ("halt", 1, MachineState::halt_1),
    ("=", 2, MachineState::unify_goal),
    ("\\=", 2, MachineState::not_unifiable),
    ("==", 2, |m| m.compare_goal(Ordering::is_eq)),
    ("\\==", 2, |m| m.compare_goal(Ordering::is_ne)),
    ("@<", 2, |m| m.compare_goal(Ordering::is_lt)),
    ("@>", 2, |m| m.compare_goal(Ordering::is_gt)),
    ("@=<", 2, |m| m.compare_goal(Ordering::is_le)),
    ("@>=", 2, |m| m.compare_goal(Ordering::is_ge)),
    ("compare", 3, MachineState::compare),
    ("var", 1, |m| Ok(m.arg(0).is_var())),
    ("nonvar", 1, |m| Ok(!m.arg(0).is_var())),
    ("atom", 1, |m| Ok(matches!(m.arg(0), Deref::Const(ref c) if c.is_atom()))),
    ("number", 1, |m| Ok(matches!(m.arg(0), Deref::Const(ref c) if c.is_number()))),
    ("integer", 1, |m| Ok(matches!(m.arg(0), Deref::Const(ref c) if c.is_integer()))),
    ("float", 1, |m| Ok(matches!(m.arg(0), Deref::Const(Cell { val: Value::Float(_), .. })))),
    ("atomic", 1, |m| Ok(matches!(m.arg(0), Deref::Const(_)))),
    ("compound", 1, |m| Ok(matches!(m.arg(0), Deref::Struct(..)))),
    ("callable", 1, MachineState::callable),
    ("is_list", 1, |m| Ok(matches!(m.list_items(&m.arg(0)), ListShape::Proper(_)))),
    ("string", 1, |m| Ok(matches!(m.arg(0), Deref::Const(Cell { val: Value::Str(_), .. })))),
    ("ground", 1, MachineState::ground),
    ("functor", 3, MachineState::functor),
    ("arg", 3, MachineState::arg_3),
    ("=..", 2, MachineState::univ),
    ("copy_term", 2, MachineState::copy_term_goal),
    ("is", 2, MachineState::is),
    ("=:=", 2, |m| m.compare_numbers(Ordering::is_eq)),
    ("=\\=", 2, |m| m.compare_numbers(Ordering::is_ne)),
    ("<", 2, |m| m.compare_numbers(Ordering::is_lt)),
    (">", 2, |m| m.compare_numbers(Ordering::is_gt)),
    ("=<", 2, |m| m.compare_numbers(Ordering::is_le)),
    (">=", 2, |m| m.compare_numbers(Ordering::is_ge)),
    ("assert", 1, |m| m.assert_clause(false)),
    ("assertz", 1, |m| m.assert_clause(false)),
    ("asserta", 1, |m| m.assert_clause(true)),
    ("retract", 1, MachineState::retract),
    ("clause", 2, MachineState::clause),
    ("dynamic", 1, MachineState::dynamic),
    ("put_attr", 3, MachineState::put_attr),
    ("get_attr", 3, MachineState::get_attr),
    ("del_attr", 2, MachineState::del_attr),
    ("freeze", 2, MachineState::freeze),
];

/// The shape of a list term.
pub(crate) enum ListShape {
    Proper(Vec<Deref>),
    Partial(Vec<Deref>, VarRef),
    Improper,
}

impl MachineState {
    fn succeed(&mut self) -> CallResult {
        Ok(true)
    }

    fn fail(&mut self) -> CallResult {
        Ok(false)
    }

    fn cut(&mut self) -> CallResult {
        self.cut_me();
        Ok(true)
    }

    /// The else branch of the control construct under execution.
    fn control_else(&self) -> Option<Loc> {
        let h = self.st.curr_cell.as_ref()?;

        match self.cell(&h.offset(1)).val {
            Value::Fixnum(off) if off > 0 => Some(h.offset(off as usize)),
            _ => None,
        }
    }

    fn jump_to(&mut self, loc: Option<Loc>) -> CallResult {
        match loc {
            Some(loc) => {
                self.jump = Some(loc);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn disjunction(&mut self) -> CallResult {
        if self.retry {
            let otherwise = self.control_else();
            return self.jump_to(otherwise);
        }

        self.make_choice();

        let lhs = self.st.curr_cell.as_ref().map(|h| h.offset(2));
        self.jump_to(lhs)
    }

    /// `->/2` and `*->/2`: the condition runs behind a barrier, which the
    /// cut cell after it removes or softens.
    fn if_then(&mut self) -> CallResult {
        if self.retry {
            let otherwise = self.control_else();
            return self.jump_to(otherwise);
        }

        self.make_barrier();

        let cond = self.st.curr_cell.as_ref().map(|h| h.offset(2));
        self.jump_to(cond)
    }

    fn not_provable(&mut self) -> CallResult {
        if self.retry {
            return Ok(true);
        }

        self.make_barrier();

        let goal = self.st.curr_cell.as_ref().map(|h| h.offset(1));
        self.jump_to(goal)
    }

    fn ite_cut_goal(&mut self) -> CallResult {
        self.ite_cut();
        Ok(true)
    }

    fn soft_cut_goal(&mut self) -> CallResult {
        self.soft_cut();
        Ok(true)
    }

    fn nt_cut_goal(&mut self) -> CallResult {
        self.ite_cut();
        Ok(false)
    }

    /// Runs `goal` behind a barrier, or behind a catcher for catch/3.
    /// The barrier holds the way back to the caller's cut generation.
    pub(crate) fn call_goal(&mut self, goal: &Deref, extra: &[Deref], catcher: bool) -> CallResult {
        if self.retry {
            return Ok(false);
        }

        let Some(next) = self.next_cell() else {
            return Ok(false);
        };

        let g = self.st.curr_frame;
        let orig_cgen = self.frames[g].cgen;

        if catcher {
            self.make_catcher(CatchKind::Retry);
        } else {
            self.make_barrier();
        }

        let end = Cell::end(Cont::To(next), Some(orig_cgen));

        match self.compile_call(goal, extra, end) {
            Ok(code) => self.jump_to(code),
            Err(err) => {
                self.choices.pop();
                self.frames[g].cgen = orig_cgen;
                Err(err)
            }
        }
    }

    fn call_n(&mut self) -> CallResult {
        let arity = self
            .st
            .curr_cell
            .as_ref()
            .map_or(0, |loc| self.cell(loc).arity as usize);

        let goal = self.arg(0);
        let extra: Vec<Deref> = (1..arity).map(|n| self.arg(n)).collect();

        self.call_goal(&goal, &extra, false)
    }

    fn call_qualified(&mut self) -> CallResult {
        let goal = self.arg(1);
        self.call_goal(&goal, &[], false)
    }

    /// Runs a goal tree whose variables stand for `bound` in place of the
    /// current goal.
    fn call_template(&mut self, tree: &Tree, bound: &[Deref]) -> CallResult {
        let Some(next) = self.next_cell() else {
            return Ok(false);
        };

        let code = self.compile_template(tree, bound, Cell::end(Cont::To(next), None))?;
        self.jump_to(code)
    }

    fn once(&mut self) -> CallResult {
        // (G -> true)
        let tree = compound_tree!("->", Tree::Var(0), atom_tree!("true"));
        let goal = self.arg(0);

        self.call_template(&tree, &[goal])
    }

    fn ignore(&mut self) -> CallResult {
        // ((G -> true) ; true)
        let tree = compound_tree!(
            ";",
            compound_tree!("->", Tree::Var(0), atom_tree!("true")),
            atom_tree!("true"),
        );
        let goal = self.arg(0);

        self.call_template(&tree, &[goal])
    }

    fn forall(&mut self) -> CallResult {
        // \+ (Cond, \+ Action)
        let tree = compound_tree!(
            "\\+",
            compound_tree!(",", Tree::Var(0), compound_tree!("\\+", Tree::Var(1))),
        );
        let (cond, action) = (self.arg(0), self.arg(1));

        self.call_template(&tree, &[cond, action])
    }

    fn catch(&mut self) -> CallResult {
        let goal = self.arg(0);
        self.call_goal(&goal, &[], true)
    }

    fn throw(&mut self) -> CallResult {
        let ball = self.arg(0);

        if ball.is_var() {
            return Err(self.instantiation_error());
        }

        match self.export_tree(&ball, true) {
            Ok(ball) => Err(MachineError::from_ball(ball)),
            Err(CycleError) => {
                self.cycle_error = true;
                Ok(false)
            }
        }
    }

    /// Collects every instance of the template in a nested query, then
    /// copies the list back into this one.
    fn findall(&mut self) -> CallResult {
        let (template, goal) = (self.arg(0), self.arg(1));

        if let ListShape::Improper = self.list_items(&self.arg(2)) {
            return Err(self.type_error(ValidType::List, &self.arg(2)));
        }

        let Some(mut sub) = self.sub_query(Some(&template), &goal)? else {
            return Ok(false);
        };

        let mut items = vec![];
        let mut base = 0;
        let mut status = sub.start();

        loop {
            match status {
                Status::Success => {
                    if let Some(mut item) = sub.template_tree() {
                        let nbr_vars = item.var_count() as u32;

                        item.rename_vars(&|n| n + base);
                        base += nbr_vars;
                        items.push(item);
                    }

                    status = sub.redo();
                }
                Status::Failure => break,
                status => {
                    drop(sub);
                    return self.absorb(status).and(Ok(false));
                }
            }
        }

        drop(sub);

        let list = Tree::list(items, atom_tree!("[]"));

        match self.import_tree(&list) {
            Some(list) => Ok(self.unify_arg(2, &list)),
            None => Ok(false),
        }
    }

    fn setup_call_cleanup(&mut self) -> CallResult {
        // (once(Setup), '$call_cleanup'(Goal, Cleanup))
        let tree = compound_tree!(
            ",",
            compound_tree!("once", Tree::Var(0)),
            compound_tree!("$call_cleanup", Tree::Var(1), Tree::Var(2)),
        );
        let bound = [self.arg(0), self.arg(1), self.arg(2)];

        self.call_template(&tree, &bound)
    }

    /// Runs the goal of setup_call_cleanup/3 behind a barrier that
    /// remembers the cleanup. Backtracking into the barrier means the
    /// goal has failed for good.
    fn call_cleanup(&mut self) -> CallResult {
        if self.retry {
            let cleanup = self.arg(1);
            self.run_detached(&cleanup);
            return Ok(false);
        }

        let Some(next) = self.next_cell() else {
            return Ok(false);
        };

        let g = self.st.curr_frame;
        let orig_cgen = self.frames[g].cgen;

        self.make_barrier();

        if let Some(ch) = self.choices.last_mut() {
            ch.register_cleanup = true;
        }

        let tree = compound_tree!(",", Tree::Var(0), atom_tree!("$cleanup_exit"));
        let goal = self.arg(0);
        let end = Cell::end(Cont::To(next), Some(orig_cgen));

        match self.compile_template(&tree, &[goal], end) {
            Ok(code) => self.jump_to(code),
            Err(err) => {
                self.choices.pop();
                self.frames[g].cgen = orig_cgen;
                Err(err)
            }
        }
    }

    /// The goal of setup_call_cleanup/3 has exited. Without choice points
    /// of its own the cleanup runs now; otherwise its newest choice
    /// point is checked when it is cut.
    fn cleanup_exit(&mut self) -> CallResult {
        let cgen = self.frames[self.st.curr_frame].cgen;
        let Some(top) = self.choices.last_mut() else {
            return Ok(true);
        };

        if top.register_cleanup && top.cgen == cgen {
            top.did_cleanup = true;

            if let Some(ch) = self.choices.pop() {
                self.trim_trail();
                self.run_cleanup(&ch);
            }
        } else {
            top.chk_is_det = true;
        }

        Ok(true)
    }

    /// Runs the cleanup goal recorded by a `register_cleanup` barrier.
    pub(crate) fn run_cleanup(&mut self, ch: &Choice) {
        let Some(loc) = ch.st.curr_cell.clone() else {
            return;
        };

        if let Some(cleanup) = self.struct_arg(&Deref::Struct(loc, ch.st.curr_frame), 1) {
            self.run_detached(&cleanup);
        }
    }

    /// Runs a goal once in a nested query, keeping only its halts, aborts
    /// and fatal errors.
    pub(crate) fn run_detached(&mut self, goal: &Deref) {
        let mut sub = match self.sub_query(None, goal) {
            Ok(Some(sub)) => sub,
            Ok(None) => return,
            Err(err) => {
                tracing::debug!(ball = ?err.ball, "cleanup goal not callable");
                return;
            }
        };

        match sub.start() {
            Status::Halt(code) => self.halt = Some(code),
            Status::Aborted => self.abort = true,
            Status::Fatal(err) => {
                if self.error.is_none() {
                    self.error = Some(err);
                }
            }
            Status::Exception(ball) => {
                tracing::debug!(?ball, "cleanup goal raised an exception");
            }
            Status::Success | Status::Failure => {}
        }
    }

    fn integer_value(&self, term: &Deref) -> Result<Integer, MachineError> {
        match term {
            Deref::Var(_) => Err(self.instantiation_error()),
            Deref::Const(cell) => Number::from_cell(cell)
                .and_then(|n| n.to_integer())
                .ok_or_else(|| self.type_error(ValidType::Integer, term)),
            Deref::Struct(..) => Err(self.type_error(ValidType::Integer, term)),
        }
    }

    pub(crate) fn atom_value(&self, term: &Deref) -> Result<Atom, MachineError> {
        match term {
            Deref::Var(_) => Err(self.instantiation_error()),
            Deref::Const(cell) if cell.is_atom() => cell
                .name()
                .ok_or_else(|| self.type_error(ValidType::Atom, term)),
            _ => Err(self.type_error(ValidType::Atom, term)),
        }
    }

    /// Enumerates `Low..=High` on backtracking. The alternative index is
    /// the offset from `Low` to try next.
    fn between(&mut self) -> CallResult {
        let low = self.integer_value(&self.arg(0))?;
        let high = match self.arg(1) {
            Deref::Const(cell)
                if matches!(cell.name(), Some(atom!("inf")) | Some(atom!("infinite"))) =>
            {
                None
            }
            high => Some(self.integer_value(&high)?),
        };

        if !self.retry {
            match self.arg(2) {
                Deref::Var(_) => self.st.alt = 0,
                Deref::Const(cell) if cell.is_integer() => {
                    let n = self.integer_value(&Deref::Const(cell))?;
                    return Ok(low <= n && high.map_or(true, |high| n <= high));
                }
                x => return Err(self.type_error(ValidType::Integer, &x)),
            }
        }

        let offset = self.st.alt;
        let value = low + Integer::from(offset);

        if high.as_ref().is_some_and(|high| value > *high) {
            return Ok(false);
        }

        if high.as_ref().map_or(true, |high| value < *high) {
            self.st.alt = offset + 1;
            self.make_choice();
        }

        Ok(self.unify_arg(2, &Deref::Const(Cell::integer(value))))
    }

    fn repeat(&mut self) -> CallResult {
        self.make_choice();
        Ok(true)
    }

    fn halt_0(&mut self) -> CallResult {
        self.halt = Some(0);
        Ok(false)
    }

    fn halt_1(&mut self) -> CallResult {
        let code = self.integer_value(&self.arg(0))?;
        self.halt = Some(i32::try_from(&code).unwrap_or(i32::MAX));
        Ok(false)
    }

    fn unify_goal(&mut self) -> CallResult {
        let (t1, t2) = (self.arg(0), self.arg(1));
        Ok(self.unify(&t1, &t2))
    }

    /// Unifies under a temporary choice point and undoes the bindings.
    pub(crate) fn probe_unify(&mut self, t1: &Deref, t2: &Deref) -> bool {
        let nbr_attr_bindings = self.attr_bindings.len();

        self.make_choice();

        let tp = self.trail.len();
        let unified = self.unify(t1, t2);

        self.undo_to(tp);
        self.choices.pop();
        self.attr_bindings.truncate(nbr_attr_bindings);

        unified
    }

    fn not_unifiable(&mut self) -> CallResult {
        let (t1, t2) = (self.arg(0), self.arg(1));
        Ok(!self.probe_unify(&t1, &t2))
    }

    fn compare_goal(&mut self, ord: fn(Ordering) -> bool) -> CallResult {
        let (t1, t2) = (self.arg(0), self.arg(1));

        match self.compare_terms(&t1, &t2) {
            Ok(result) => Ok(ord(result)),
            Err(CycleError) => {
                self.cycle_error = true;
                Ok(false)
            }
        }
    }

    fn compare(&mut self) -> CallResult {
        let order = self.arg(0);

        match &order {
            Deref::Var(_) => {}
            Deref::Const(cell) if cell.is_atom() => {
                if !matches!(cell.name(), Some(atom!("<")) | Some(atom!("=")) | Some(atom!(">"))) {
                    return Err(self.domain_error(DomainErrorType::Order, &order));
                }
            }
            _ => return Err(self.type_error(ValidType::Atom, &order)),
        }

        let (t1, t2) = (self.arg(1), self.arg(2));

        let result = match self.compare_terms(&t1, &t2) {
            Ok(Ordering::Less) => atom!("<"),
            Ok(Ordering::Equal) => atom!("="),
            Ok(Ordering::Greater) => atom!(">"),
            Err(CycleError) => {
                self.cycle_error = true;
                return Ok(false);
            }
        };

        Ok(self.unify(&order, &Deref::Const(Cell::atom(result))))
    }

    fn callable(&mut self) -> CallResult {
        Ok(match self.arg(0) {
            Deref::Struct(..) => true,
            Deref::Const(cell) => cell.is_atom(),
            Deref::Var(_) => false,
        })
    }

    fn ground(&mut self) -> CallResult {
        let mut work = vec![(self.arg(0), 0usize)];

        while let Some((term, depth)) = work.pop() {
            if depth > self.flags.max_depth {
                self.cycle_error = true;
                return Ok(false);
            }

            match self.deref(&term) {
                Deref::Var(_) => return Ok(false),
                Deref::Const(_) => {}
                Deref::Struct(loc, ctx) if self.cell(&loc).is_list_cons() => {
                    let Ok((items, rest)) = self.list_spine(&Deref::Struct(loc, ctx)) else {
                        self.cycle_error = true;
                        return Ok(false);
                    };

                    work.push((rest, depth));
                    work.extend(items.into_iter().map(|item| (item, depth + 1)));
                }
                Deref::Struct(loc, ctx) => {
                    for arg in self.arg_locs(&loc) {
                        work.push((self.deref_loc(&arg, ctx), depth + 1));
                    }
                }
            }
        }

        Ok(true)
    }

    /// Classifies a list by its spine.
    pub(crate) fn list_items(&self, list: &Deref) -> ListShape {
        let Ok((items, rest)) = self.list_spine(list) else {
            return ListShape::Improper;
        };

        match rest {
            Deref::Var(var) => ListShape::Partial(items, var),
            Deref::Const(cell) if cell.is_nil() => ListShape::Proper(items),
            _ => ListShape::Improper,
        }
    }

    fn functor(&mut self) -> CallResult {
        let term = self.arg(0);

        match &term {
            Deref::Var(_) => {}
            Deref::Const(cell) => {
                let name = Deref::Const(cell.clone());
                return Ok(self.unify_arg(1, &name)
                    && self.unify_arg(2, &Deref::Const(fixnum_as_cell!(0))));
            }
            Deref::Struct(loc, _) => {
                let cell = self.cell(loc);
                let (name, arity) = (cell.name(), cell.arity);
                let Some(name) = name else {
                    return Ok(false);
                };

                return Ok(self.unify_arg(1, &Deref::Const(Cell::atom(name)))
                    && self.unify_arg(2, &Deref::Const(fixnum_as_cell!(arity))));
            }
        }

        let (name, arity) = (self.arg(1), self.arg(2));

        if name.is_var() || arity.is_var() {
            return Err(self.instantiation_error());
        }

        let arity_value = self.integer_value(&arity)?;

        if arity_value < Integer::ZERO {
            return Err(self.domain_error(DomainErrorType::NotLessThanZero, &arity));
        }

        let arity = match usize::try_from(&arity_value) {
            Ok(arity) if arity <= MAX_ARITY => arity,
            _ => return Err(self.representation_error(RepFlag::MaxArity)),
        };

        if arity == 0 {
            return match name {
                Deref::Const(_) => Ok(self.unify(&term, &name)),
                _ => Err(self.type_error(ValidType::Atomic, &name)),
            };
        }

        let name = match &name {
            Deref::Const(cell) if cell.is_atom() => cell.name(),
            Deref::Const(_) => return Err(self.type_error(ValidType::Atom, &name)),
            _ => return Err(self.type_error(ValidType::Atomic, &name)),
        };

        let Some(built) = name.and_then(|name| self.build_struct(name, arity, &[])) else {
            return Ok(false);
        };

        Ok(self.unify(&term, &built))
    }

    /// `arg/3`. An unbound position enumerates the arguments on
    /// backtracking.
    fn arg_3(&mut self) -> CallResult {
        let (n, term) = (self.arg(0), self.arg(1));

        let Deref::Struct(loc, _) = &term else {
            return match &term {
                Deref::Var(_) => Err(self.instantiation_error()),
                _ => Err(self.type_error(ValidType::Compound, &term)),
            };
        };

        let arity = self.cell(loc).arity as usize;

        if !n.is_var() {
            let n = self.integer_value(&n)?;

            return match usize::try_from(&n) {
                Ok(n) if n >= 1 && n <= arity => match self.struct_arg(&term, n - 1) {
                    Some(value) => Ok(self.unify_arg(2, &value)),
                    None => Ok(false),
                },
                _ => Ok(false),
            };
        }

        let k = if self.retry { self.st.alt } else { 0 };

        if k >= arity {
            return Ok(false);
        }

        if k + 1 < arity {
            self.st.alt = k + 1;
            self.make_choice();
        }

        let Some(value) = self.struct_arg(&term, k) else {
            return Ok(false);
        };

        Ok(self.unify(&n, &Deref::Const(fixnum_as_cell!(k + 1))) && self.unify_arg(2, &value))
    }

    fn univ(&mut self) -> CallResult {
        let term = self.arg(0);

        match &term {
            Deref::Const(_) => {
                let list = Tree::list(vec![Tree::Var(0)], atom_tree!("[]"));

                return match self.import_with(&list, &[term.clone()]) {
                    Some(list) => Ok(self.unify_arg(1, &list)),
                    None => Ok(false),
                };
            }
            Deref::Struct(loc, _) => {
                let cell = self.cell(loc);
                let Some(name) = cell.name() else {
                    return Ok(false);
                };

                let arity = cell.arity as usize;
                let mut items = vec![Tree::Atom(name)];

                items.extend((0..arity as u32).map(Tree::Var));

                let args: Vec<Deref> = (0..arity)
                    .filter_map(|n| self.struct_arg(&term, n))
                    .collect();
                let list = Tree::list(items, atom_tree!("[]"));

                return match self.import_with(&list, &args) {
                    Some(list) => Ok(self.unify_arg(1, &list)),
                    None => Ok(false),
                };
            }
            Deref::Var(_) => {}
        }

        let list = self.arg(1);

        let items = match self.list_items(&list) {
            ListShape::Proper(items) => items,
            ListShape::Partial(..) => return Err(self.instantiation_error()),
            ListShape::Improper => return Err(self.type_error(ValidType::List, &list)),
        };

        let Some((head, args)) = items.split_first() else {
            return Err(self.domain_error(DomainErrorType::NonEmptyList, &list));
        };

        match head {
            Deref::Var(_) => Err(self.instantiation_error()),
            Deref::Const(_) if args.is_empty() => Ok(self.unify(&term, head)),
            Deref::Const(cell) if cell.is_atom() => {
                if args.len() > MAX_ARITY {
                    return Err(self.representation_error(RepFlag::MaxArity));
                }

                let Some(name) = cell.name() else {
                    return Ok(false);
                };

                match self.build_struct(name, args.len(), args) {
                    Some(built) => Ok(self.unify(&term, &built)),
                    None => Ok(false),
                }
            }
            Deref::Const(_) => Err(self.type_error(ValidType::Atom, head)),
            Deref::Struct(..) => Err(self.type_error(ValidType::Atomic, head)),
        }
    }

    fn copy_term_goal(&mut self) -> CallResult {
        let term = self.arg(0);

        match self.copy_term(&term) {
            Some(copy) => Ok(self.unify_arg(1, &copy)),
            None => Ok(false),
        }
    }

    fn is(&mut self) -> CallResult {
        let value = self.eval(&self.arg(1))?;
        Ok(self.unify_arg(0, &Deref::Const(value.to_cell())))
    }

    /// `Name/Arity` of a callable term.
    fn callable_key(&self, head: &Deref) -> Result<PredicateKey, MachineError> {
        match head {
            Deref::Var(_) => Err(self.instantiation_error()),
            Deref::Const(cell) if cell.is_atom() => cell
                .key()
                .ok_or_else(|| self.type_error(ValidType::Callable, head)),
            Deref::Struct(loc, _) => self
                .cell(loc)
                .key()
                .ok_or_else(|| self.type_error(ValidType::Callable, head)),
            Deref::Const(_) => Err(self.type_error(ValidType::Callable, head)),
        }
    }

    fn assert_clause(&mut self, at_front: bool) -> CallResult {
        let clause = self.arg(0);

        if clause.is_var() {
            return Err(self.instantiation_error());
        }

        let tree = match self.export_tree(&clause, true) {
            Ok(tree) => tree,
            Err(CycleError) => {
                self.cycle_error = true;
                return Ok(false);
            }
        };

        let key = self.add_clause_tree(&tree, at_front, true)?;

        tracing::debug!(
            name = %self.db.atom_name(key.0),
            arity = key.1,
            at_front,
            "clause asserted"
        );

        Ok(true)
    }

    /// Compiles a clause and adds it to its predicate.
    pub(crate) fn add_clause_tree(
        &self,
        tree: &Tree,
        at_front: bool,
        dynamic: bool,
    ) -> Result<PredicateKey, MachineError> {
        let (key, code, data) = match compile_clause(&self.db, tree) {
            Ok(compiled) => compiled,
            Err(CompileError::Instantiation) => return Err(self.instantiation_error()),
            Err(CompileError::NotCallable(culprit)) => {
                return Err(self.type_error_tree(ValidType::Callable, culprit))
            }
        };

        match self.db.add_clause(key, code, data, at_front, dynamic) {
            Ok(_) => Ok(key),
            Err(_) => Err(self.permission_error(
                Permission::Modify,
                atom!("static_procedure"),
                Tree::indicator(key),
            )),
        }
    }

    /// Matches `(Head :- Body)` against the data terms of a predicate's
    /// clauses, resuming from the clause iterator on backtracking. Each
    /// candidate is unified under a frame of its own.
    fn match_clause(&mut self, key: PredicateKey, target: &Deref, retract: bool) -> CallResult {
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
            let head = self.struct_arg(target, 0);
            let index_key = match head.as_ref().and_then(|head| self.struct_arg(head, 0)) {
                Some(Deref::Const(cell)) => IndexKey::from_cell(&cell),
                Some(Deref::Struct(loc, _)) => IndexKey::from_cell(self.cell(&loc)),
                _ => None,
            };

            match self.db.search_predicate(key, index_key) {
                Some((iter, _)) => {
                    self.frames[g].ugen = self.db.ugen();
                    iter
                }
                None => return Ok(false),
            }
        };

        let ugen = self.frames[g].ugen;

        self.make_choice();

        let tp = self.trail.len();
        let nbr_attr_bindings = self.attr_bindings.len();

        while let Some(clause) = iter.seek(ugen) {
            let data = clause.data.clone();
            let new = self.try_me(data.nbr_vars);

            if self.error.is_some() {
                return Ok(false);
            }

            let term = self.deref_loc(&Loc::code(&data, 0), new);

            if self.unify(target, &term) {
                if retract {
                    self.db.retract(key, &clause);

                    tracing::debug!(
                        name = %self.db.atom_name(key.0),
                        arity = key.1,
                        "clause retracted"
                    );
                }

                if iter.has_next(ugen) {
                    if let Some(ch) = self.choices.last_mut() {
                        ch.st.iter = Some(iter);
                    }
                } else {
                    self.choices.pop();
                    self.trim_trail();
                }

                return Ok(true);
            }

            let base = self.frames[new].base;

            self.undo_to(tp);
            self.frames.truncate(new);
            self.slots.truncate(base);
            self.attr_bindings.truncate(nbr_attr_bindings);

            iter.advance();
        }

        self.choices.pop();
        Ok(false)
    }

    /// Checks a predicate for clause/2 and retract/1. Unknown predicates
    /// simply have no clauses.
    fn inspectable(&self, key: PredicateKey, perm: Permission) -> Result<(), MachineError> {
        let object_type = match perm {
            Permission::Access => atom!("private_procedure"),
            Permission::Modify => atom!("static_procedure"),
        };

        let refused = self.db.is_protected(key) || self.db.is_dynamic(key) == Some(false);

        if refused {
            Err(self.permission_error(perm, object_type, Tree::indicator(key)))
        } else {
            Ok(())
        }
    }

    fn clause(&mut self) -> CallResult {
        let (head, body) = (self.arg(0), self.arg(1));

        if !self.retry {
            let key = self.callable_key(&head)?;

            match &body {
                Deref::Var(_) | Deref::Struct(..) => {}
                Deref::Const(cell) if cell.is_atom() => {}
                Deref::Const(_) => return Err(self.type_error(ValidType::Callable, &body)),
            }

            self.inspectable(key, Permission::Access)?;
        }

        let key = self.callable_key(&head)?;
        let Some(target) = self.build_struct(atom!(":-"), 2, &[head, body]) else {
            return Ok(false);
        };

        self.match_clause(key, &target, false)
    }

    fn retract(&mut self) -> CallResult {
        let clause = self.arg(0);

        let (head, target) = match &clause {
            Deref::Struct(loc, _) if self.cell(loc).key() == Some((atom!(":-"), 2)) => {
                match self.struct_arg(&clause, 0) {
                    Some(head) => (head, clause.clone()),
                    None => return Ok(false),
                }
            }
            _ => {
                let body = Deref::Const(atom_as_cell!("true"));

                match self.build_struct(atom!(":-"), 2, &[clause.clone(), body]) {
                    Some(target) => (clause.clone(), target),
                    None => return Ok(false),
                }
            }
        };

        let key = self.callable_key(&head)?;

        if !self.retry {
            self.inspectable(key, Permission::Modify)?;
        }

        self.match_clause(key, &target, true)
    }

    /// `dynamic/1` over an indicator, a conjunction or a list of them.
    fn dynamic(&mut self) -> CallResult {
        let mut work = vec![self.arg(0)];

        while let Some(spec) = work.pop() {
            match &spec {
                Deref::Var(_) => return Err(self.instantiation_error()),
                Deref::Const(cell) if cell.is_nil() => {}
                Deref::Struct(loc, _) => {
                    let key = self.cell(loc).key();

                    if key == Some((atom!(","), 2)) || key == Some((atom!("."), 2)) {
                        work.extend((0..2).rev().filter_map(|n| self.struct_arg(&spec, n)));
                        continue;
                    }

                    if key != Some((atom!("/"), 2)) {
                        return Err(self.type_error(ValidType::PredicateIndicator, &spec));
                    }

                    let (name, arity) = match (self.struct_arg(&spec, 0), self.struct_arg(&spec, 1)) {
                        (Some(name), Some(arity)) => (name, arity),
                        _ => return Ok(false),
                    };

                    let name = self.atom_value(&name)?;
                    let arity_value = self.integer_value(&arity)?;

                    let Ok(arity) = usize::try_from(&arity_value) else {
                        return Err(self.domain_error(DomainErrorType::NotLessThanZero, &arity));
                    };

                    if self.db.declare_dynamic((name, arity)).is_err() {
                        return Err(self.permission_error(
                            Permission::Modify,
                            atom!("static_procedure"),
                            Tree::indicator((name, arity)),
                        ));
                    }

                    tracing::debug!(name = %self.db.atom_name(name), arity, "predicate declared dynamic");
                }
                _ => return Err(self.type_error(ValidType::PredicateIndicator, &spec)),
            }
        }

        Ok(true)
    }

    /// Loads the sources named by a list goal through the consult hook.
    pub(crate) fn consult_directive(&mut self) -> CallResult {
        let Some(loc) = self.st.curr_cell.clone() else {
            return Ok(false);
        };

        let list = self.deref_loc(&loc, self.st.curr_frame);

        let items = match self.list_items(&list) {
            ListShape::Proper(items) => items,
            ListShape::Partial(..) => return Err(self.instantiation_error()),
            ListShape::Improper => return Err(self.type_error(ValidType::List, &list)),
        };

        for item in items {
            let name = self.atom_value(&item)?;
            let text = self.db.atom_name(name);

            let loaded = {
                let mut hooks = self.hooks.borrow_mut();

                match hooks.consult.as_mut() {
                    Some(handler) => handler(&*text),
                    None => Err(String::from("no consult handler installed")),
                }
            };

            match loaded {
                Ok(clauses) => {
                    tracing::debug!(source = %text, clauses = clauses.len(), "consulting");
                    self.consult_terms(&clauses)?;
                }
                Err(reason) => {
                    tracing::debug!(source = %text, %reason, "consult failed");
                    return Err(self.existence_error(ExistenceError::SourceSink(name)));
                }
            }
        }

        Ok(true)
    }

    /// Adds consulted clauses as static clauses, running `:- Goal`
    /// directives in order as they are met.
    pub(crate) fn consult_terms(&mut self, terms: &[Term]) -> Result<(), MachineError> {
        for term in terms {
            let tree = term_to_tree(&self.db, term, &mut VarNames::default());

            match &tree {
                Tree::Struct(atom!(":-"), args) if args.len() == 1 => {
                    self.run_directive(&args[0])?;
                }
                _ => {
                    self.add_clause_tree(&tree, false, false)?;
                }
            }

            if self.halt.is_some() || self.abort || self.error.is_some() {
                break;
            }
        }

        Ok(())
    }

    fn run_directive(&mut self, goal: &Tree) -> Result<(), MachineError> {
        let Some(goal) = self.import_tree(goal) else {
            return Ok(());
        };

        let Some(mut sub) = self.sub_query(None, &goal)? else {
            return Ok(());
        };

        match sub.start() {
            Status::Failure => {
                tracing::warn!("directive failed");
                Ok(())
            }
            status => self.absorb(status).map(|_| ()),
        }
    }
}
