use crate::atom_table::*;
use crate::forms::*;
use crate::machine::compile::*;
use crate::machine::machine_errors::*;
use crate::machine::machine_state::*;
use crate::types::*;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;

/// Numbers the distinct variables met while exporting, in order of
/// first occurrence.
pub(crate) type VarMap = IndexMap<VarRef, u32, FxBuildHasher>;

enum ExportStep {
    Visit(Deref, usize),
    Build(Atom, usize),
    List(usize),
}

enum GoalStep {
    Visit(Deref),
    Build(Atom, usize),
}

fn is_control(key: PredicateKey) -> bool {
    matches!(
        key,
        (atom!(","), 2) | (atom!(";"), 2) | (atom!("->"), 2) | (atom!("*->"), 2) | (atom!("\\+"), 1)
    )
}

pub(crate) fn const_tree(cell: &Cell) -> Tree {
    match cell.val {
        Value::Atom(name) => Tree::Atom(name),
        _ => Literal::from_cell(cell).map_or(Tree::Atom(atom!("[]")), Tree::Literal),
    }
}

impl MachineState {
    /// Copies a term out of the stacks into an owned tree. Past
    /// `max_depth` a strict export fails; otherwise the subterm is
    /// elided as `...`.
    pub(crate) fn export_with(
        &self,
        term: &Deref,
        vars: &mut VarMap,
        strict: bool,
    ) -> Result<Tree, CycleError> {
        let max_depth = self.flags.max_depth;
        let mut work = vec![ExportStep::Visit(term.clone(), 0)];
        let mut out: Vec<Tree> = vec![];

        while let Some(step) = work.pop() {
            match step {
                ExportStep::Visit(term, depth) => {
                    if depth > max_depth {
                        if strict {
                            return Err(CycleError);
                        }

                        out.push(Tree::Atom(atom!("...")));
                        continue;
                    }

                    match self.deref(&term) {
                        Deref::Var(var) => {
                            let next = vars.len() as u32;
                            out.push(Tree::Var(*vars.entry(var).or_insert(next)));
                        }
                        Deref::Const(cell) => out.push(const_tree(&cell)),
                        Deref::Struct(loc, ctx) if self.cell(&loc).is_list_cons() => {
                            let (items, rest) = match self.list_spine(&Deref::Struct(loc, ctx)) {
                                Ok(spine) => spine,
                                Err(CycleError) if strict => return Err(CycleError),
                                Err(CycleError) => {
                                    out.push(Tree::Atom(atom!("...")));
                                    continue;
                                }
                            };

                            work.push(ExportStep::List(items.len()));
                            work.push(ExportStep::Visit(rest, depth));

                            for item in items.into_iter().rev() {
                                work.push(ExportStep::Visit(item, depth + 1));
                            }
                        }
                        Deref::Struct(loc, ctx) => {
                            let cell = self.cell(&loc);
                            let name = cell.name().unwrap_or(atom!("[]"));

                            work.push(ExportStep::Build(name, cell.arity as usize));

                            for arg in self.arg_locs(&loc).iter().rev() {
                                work.push(ExportStep::Visit(self.deref_loc(arg, ctx), depth + 1));
                            }
                        }
                    }
                }
                ExportStep::Build(name, arity) => {
                    let args = out.split_off(out.len().saturating_sub(arity));
                    out.push(Tree::compound(name, args));
                }
                ExportStep::List(n) => {
                    let tail = out.pop().unwrap_or(Tree::Atom(atom!("[]")));
                    let items = out.split_off(out.len().saturating_sub(n));

                    out.push(Tree::list(items, tail));
                }
            }
        }

        out.pop().ok_or(CycleError)
    }

    #[inline]
    pub(crate) fn export_tree(&self, term: &Deref, strict: bool) -> Result<Tree, CycleError> {
        self.export_with(term, &mut VarMap::default(), strict)
    }

    /// A culprit for an error term. Cyclic culprits are elided.
    pub(crate) fn export_culprit(&self, term: &Deref) -> Tree {
        self.export_tree(term, false)
            .unwrap_or(Tree::Atom(atom!("...")))
    }

    /// Writes a tree into the heap with fresh variables of the current
    /// frame. `None` means the heap is exhausted.
    #[inline]
    pub(crate) fn import_tree(&mut self, tree: &Tree) -> Option<Deref> {
        self.import_with(tree, &[])
    }

    /// Like [`import_tree`](Self::import_tree), with variable `n` of the
    /// tree bound to `bound[n]`.
    pub(crate) fn import_with(&mut self, tree: &Tree, bound: &[Deref]) -> Option<Deref> {
        let first = self.create_vars(tree.var_count().max(bound.len()));
        let ctx = self.st.curr_frame;

        for (n, value) in bound.iter().enumerate() {
            let var = VarRef {
                ctx,
                nbr: first + n as u32,
            };

            self.set_var(var, value);
        }

        match tree {
            Tree::Var(n) => Some(self.deref_var(VarRef {
                ctx,
                nbr: first + n,
            })),
            Tree::Atom(name) => Some(Deref::Const(Cell::atom(*name))),
            Tree::Literal(lit) => Some(Deref::Const(lit.to_cell())),
            Tree::Struct(..) | Tree::List(..) => {
                let mut cells = Vec::with_capacity(16);

                write_data(tree, first, &mut cells);
                self.alloc(cells).map(|loc| Deref::Struct(loc, ctx))
            }
        }
    }

    /// A compound of fresh variables, the first of them bound to `args`.
    pub(crate) fn build_struct(&mut self, name: Atom, arity: usize, args: &[Deref]) -> Option<Deref> {
        let vars = (0..arity as u32).map(Tree::Var).collect();
        self.import_with(&Tree::compound(name, vars), args)
    }

    /// `copy_term/2` without attributes.
    pub(crate) fn copy_term(&mut self, term: &Deref) -> Option<Deref> {
        match self.export_tree(term, true) {
            Ok(tree) => self.import_tree(&tree),
            Err(CycleError) => {
                self.cycle_error = true;
                None
            }
        }
    }

    fn leaf_goal(&self, goal: &Deref, extra: &[Deref], bound: &mut Vec<Deref>) -> Option<Tree> {
        let mut bind = |term: Deref| {
            bound.push(term);
            Tree::Var(bound.len() as u32 - 1)
        };

        match goal {
            Deref::Var(_) if extra.is_empty() => Some(bind(goal.clone())),
            Deref::Const(cell) if cell.is_atom() => {
                let args: Vec<Tree> = extra.iter().cloned().map(bind).collect();
                Some(Tree::compound(cell.name()?, args))
            }
            Deref::Struct(loc, ctx) => {
                let cell = self.cell(loc);
                let name = cell.name()?;
                let args: Vec<Tree> = self
                    .arg_locs(loc)
                    .iter()
                    .map(|arg| self.deref_loc(arg, *ctx))
                    .chain(extra.iter().cloned())
                    .map(bind)
                    .collect();

                Some(Tree::Struct(name, args))
            }
            _ => None,
        }
    }

    /// The control skeleton of a goal with each of its leaf goals'
    /// arguments replaced by a variable, together with the terms those
    /// variables stand for. `None` means a leaf is not callable.
    fn goal_skeleton(&self, goal: &Deref, extra: &[Deref]) -> Option<(Tree, Vec<Deref>)> {
        let mut bound = vec![];

        if !extra.is_empty() {
            let tree = self.leaf_goal(&self.deref(goal), extra, &mut bound)?;
            return Some((tree, bound));
        }

        let mut work = vec![GoalStep::Visit(goal.clone())];
        let mut out: Vec<Tree> = vec![];

        while let Some(step) = work.pop() {
            match step {
                GoalStep::Visit(goal) => {
                    let goal = self.deref(&goal);

                    if let Deref::Struct(loc, ctx) = &goal {
                        let cell = self.cell(loc);

                        if let Some(key) = cell.key().filter(|key| is_control(*key)) {
                            work.push(GoalStep::Build(key.0, key.1));

                            for arg in self.arg_locs(loc).iter().rev() {
                                work.push(GoalStep::Visit(self.deref_loc(arg, *ctx)));
                            }

                            continue;
                        }
                    }

                    out.push(self.leaf_goal(&goal, &[], &mut bound)?);
                }
                GoalStep::Build(name, arity) => {
                    let args = out.split_off(out.len().saturating_sub(arity));
                    out.push(Tree::Struct(name, args));
                }
            }
        }

        Some((out.pop()?, bound))
    }

    /// Compiles a goal of the current frame, plus extra arguments, into
    /// heap code ended by `end`. The arguments of its leaf goals are
    /// shared with the caller through fresh variables of the current
    /// frame. `Ok(None)` means the heap is exhausted.
    pub(crate) fn compile_call(
        &mut self,
        goal: &Deref,
        extra: &[Deref],
        end: Cell,
    ) -> Result<Option<Loc>, MachineError> {
        let goal = self.deref(goal);

        if goal.is_var() {
            return Err(self.instantiation_error());
        }

        let Some((tree, bound)) = self.goal_skeleton(&goal, extra) else {
            return Err(self.type_error(ValidType::Callable, &goal));
        };

        self.compile_template(&tree, &bound, end)
    }

    /// Compiles a goal tree whose variable `n` stands for `bound[n]`.
    pub(crate) fn compile_template(
        &mut self,
        tree: &Tree,
        bound: &[Deref],
        end: Cell,
    ) -> Result<Option<Loc>, MachineError> {
        let first = self.create_vars(bound.len().max(tree.var_count()));
        let ctx = self.st.curr_frame;

        for (n, value) in bound.iter().enumerate() {
            let var = VarRef {
                ctx,
                nbr: first + n as u32,
            };

            self.set_var(var, value);
        }

        match compile_goal_code(&self.db, tree, first, end) {
            Ok(cells) => Ok(self.alloc(cells)),
            Err(CompileError::Instantiation) => Err(self.instantiation_error()),
            Err(CompileError::NotCallable(culprit)) => {
                Err(self.type_error_tree(ValidType::Callable, culprit))
            }
        }
    }
}
