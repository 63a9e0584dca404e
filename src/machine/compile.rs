use crate::atom_table::*;
use crate::forms::*;
use crate::machine::machine_indices::*;
use crate::types::*;

/// Why a term could not be compiled.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CompileError {
    /// The head, or the whole clause, is a variable.
    Instantiation,
    /// The culprit is not callable.
    NotCallable(Tree),
}

enum DataStep<'a> {
    Visit(&'a Tree),
    Spine(&'a [Tree], &'a Tree),
    Close(usize),
}

/// Writes a tree as a flat pre-order cell array. Variable `n` of the tree
/// becomes variable `var_base + n` of whatever frame the cells run in.
pub(crate) fn write_data(tree: &Tree, var_base: u32, cells: &mut Vec<Cell>) {
    let mut work = vec![DataStep::Visit(tree)];

    while let Some(step) = work.pop() {
        match step {
            DataStep::Visit(tree) => match tree {
                Tree::Var(n) => cells.push(Cell::var(var_base + n)),
                Tree::Atom(name) => cells.push(Cell::atom(*name)),
                Tree::Literal(lit) => cells.push(lit.to_cell()),
                Tree::Struct(name, args) => {
                    let idx = cells.len();

                    cells.push(Cell::functor(*name, args.len(), 1));
                    work.push(DataStep::Close(idx));
                    work.extend(args.iter().rev().map(DataStep::Visit));
                }
                Tree::List(items, tail) => work.push(DataStep::Spine(items, tail)),
            },
            DataStep::Spine(items, tail) => match items.split_first() {
                Some((item, rest)) => {
                    let idx = cells.len();

                    cells.push(Cell::functor(atom!("."), 2, 1));
                    work.push(DataStep::Close(idx));
                    work.push(DataStep::Spine(rest, tail));
                    work.push(DataStep::Visit(item));
                }
                None => work.push(DataStep::Visit(tail)),
            },
            DataStep::Close(idx) => {
                cells[idx].nbr_cells = (cells.len() - idx) as u32;
            }
        }
    }
}

/// The goals of a conjunction, left to right, however it nests.
fn conjuncts(body: &Tree) -> Vec<&Tree> {
    let mut goals = vec![];
    let mut stack = vec![body];

    while let Some(goal) = stack.pop() {
        match goal {
            Tree::Struct(name, args) if *name == atom!(",") && args.len() == 2 => {
                stack.push(&args[1]);
                stack.push(&args[0]);
            }
            _ => goals.push(goal),
        }
    }

    goals
}

fn control_args(goal: &Tree, name: Atom, arity: usize) -> Option<&[Tree]> {
    match goal {
        Tree::Struct(n, args) if *n == name && args.len() == arity => Some(args),
        _ => None,
    }
}

struct BodyCompiler<'a> {
    db: &'a Database,
    cells: Vec<Cell>,
    var_base: u32,
    pred: Option<PredicateKey>,
    tail_rec: bool,
}

impl<'a> BodyCompiler<'a> {
    fn new(db: &'a Database, var_base: u32, pred: Option<PredicateKey>) -> Self {
        BodyCompiler {
            db,
            cells: vec![],
            var_base,
            pred,
            tail_rec: false,
        }
    }

    fn compile_seq(&mut self, body: &Tree, top: bool) -> Result<(), CompileError> {
        let goals = conjuncts(body);
        let last = goals.len().saturating_sub(1);

        for (idx, goal) in goals.into_iter().enumerate() {
            self.compile_goal(goal, top && idx == last)?;
        }

        Ok(())
    }

    fn compile_goal(&mut self, goal: &Tree, tail: bool) -> Result<(), CompileError> {
        if let Some(args) = control_args(goal, atom!(";"), 2) {
            if let Some(cond) = control_args(&args[0], atom!("->"), 2) {
                return self.compile_ite(&cond[0], &cond[1], Some(&args[1]), atom!("->"));
            }

            if let Some(cond) = control_args(&args[0], atom!("*->"), 2) {
                return self.compile_ite(&cond[0], &cond[1], Some(&args[1]), atom!("*->"));
            }

            return self.compile_or(&args[0], &args[1]);
        }

        if let Some(args) = control_args(goal, atom!("->"), 2) {
            return self.compile_ite(&args[0], &args[1], None, atom!("->"));
        }

        if let Some(args) = control_args(goal, atom!("*->"), 2) {
            return self.compile_ite(&args[0], &args[1], None, atom!("*->"));
        }

        if let Some(args) = control_args(goal, atom!("\\+"), 1) {
            return self.compile_not(&args[0]);
        }

        match goal {
            Tree::Var(_) => {
                let call = Tree::Struct(atom!("call"), vec![goal.clone()]);
                self.emit_call(&call, tail);
                Ok(())
            }
            Tree::Literal(_) => Err(CompileError::NotCallable(goal.clone())),
            _ => {
                self.emit_call(goal, tail);
                Ok(())
            }
        }
    }

    fn emit_call(&mut self, goal: &Tree, tail: bool) {
        let idx = self.cells.len();
        let key = goal.key();
        let builtin = key.and_then(|key| self.db.builtin(key));
        let tail_rec = tail && key.is_some() && key == self.pred;

        write_data(goal, self.var_base, &mut self.cells);

        let header = &mut self.cells[idx];
        header.builtin = builtin;

        if tail_rec {
            header.flags.set(CellFlags::TAIL_REC);
            self.tail_rec = true;
        }
    }

    fn emit_internal(&mut self, name: Atom) {
        let mut cell = Cell::atom(name);
        cell.builtin = self.db.builtin((name, 0));
        self.cells.push(cell);
    }

    /// A control header: the construct's builtin, spanning the whole
    /// construct once closed. Binary constructs are followed by the
    /// offset of their else branch.
    fn header(&mut self, name: Atom, arity: usize) -> usize {
        let h = self.cells.len();
        let mut cell = Cell::functor(name, 0, 1);

        cell.flags.set(CellFlags::CONTROL);
        cell.builtin = self.db.builtin((name, arity));

        self.cells.push(cell);

        if arity == 2 {
            self.cells.push(Cell::fixnum(0));
        }

        h
    }

    fn push_end(&mut self) -> usize {
        self.cells.push(Cell::end(Cont::Local(0), None));
        self.cells.len() - 1
    }

    fn close_control(&mut self, h: usize, else_off: Option<usize>, ends: &[usize]) {
        let after = self.cells.len();

        self.cells[h].nbr_cells = (after - h) as u32;

        if let Some(off) = else_off {
            self.cells[h + 1] = Cell::fixnum((off - h) as i64);
        }

        for &end in ends {
            self.cells[end] = Cell::end(Cont::Local(after), None);
        }
    }

    fn compile_or(&mut self, lhs: &Tree, rhs: &Tree) -> Result<(), CompileError> {
        let h = self.header(atom!(";"), 2);

        self.compile_seq(lhs, false)?;
        let end1 = self.push_end();

        let else_off = self.cells.len();

        self.compile_seq(rhs, false)?;
        let end2 = self.push_end();

        self.close_control(h, Some(else_off), &[end1, end2]);
        Ok(())
    }

    fn compile_ite(
        &mut self,
        cond: &Tree,
        then: &Tree,
        otherwise: Option<&Tree>,
        name: Atom,
    ) -> Result<(), CompileError> {
        let h = self.header(name, 2);
        let cut = if name == atom!("*->") {
            atom!("$soft_cut")
        } else {
            atom!("$ite_cut")
        };

        self.compile_seq(cond, false)?;
        self.emit_internal(cut);
        self.compile_seq(then, false)?;

        let end1 = self.push_end();

        match otherwise {
            Some(otherwise) => {
                let else_off = self.cells.len();

                self.compile_seq(otherwise, false)?;

                let end2 = self.push_end();
                self.close_control(h, Some(else_off), &[end1, end2]);
            }
            None => self.close_control(h, None, &[end1]),
        }

        Ok(())
    }

    fn compile_not(&mut self, goal: &Tree) -> Result<(), CompileError> {
        let h = self.header(atom!("\\+"), 1);

        self.compile_seq(goal, false)?;
        self.emit_internal(atom!("$nt_cut"));

        self.close_control(h, None, &[]);
        Ok(())
    }
}

fn body_starts_with_cut(body: &Tree) -> bool {
    conjuncts(body)
        .first()
        .is_some_and(|goal| matches!(goal, Tree::Atom(name) if *name == atom!("!")))
}

/// Compiles `Head :- Body` (or a fact) into its code term, laid out as
/// head cells, body cells and a returning End cell, and its data term
/// `(Head :- Body)`.
pub(crate) fn compile_clause(
    db: &Database,
    clause: &Tree,
) -> Result<(PredicateKey, CompiledTerm, CompiledTerm), CompileError> {
    let true_body = Tree::Atom(atom!("true"));

    let (head, body) = match control_args(clause, atom!(":-"), 2) {
        Some(args) => (&args[0], &args[1]),
        None => (clause, &true_body),
    };

    let key = match head {
        Tree::Var(_) => return Err(CompileError::Instantiation),
        Tree::Literal(_) => return Err(CompileError::NotCallable(head.clone())),
        _ => head.key().ok_or(CompileError::Instantiation)?,
    };

    let nbr_vars = clause.var_count();
    let mut compiler = BodyCompiler::new(db, 0, Some(key));

    write_data(head, 0, &mut compiler.cells);

    let body_off = compiler.cells.len();

    if *body != true_body {
        compiler
            .compile_seq(body, true)
            .map_err(|err| match err {
                CompileError::NotCallable(_) => CompileError::NotCallable(clause.clone()),
                err => err,
            })?;
    }

    compiler.cells.push(Cell::end(Cont::Return, None));

    let code = CompiledTerm {
        cells: compiler.cells,
        nbr_vars,
        body: body_off,
        first_cut: body_starts_with_cut(body),
        tail_rec: compiler.tail_rec,
    };

    let mut data_cells = vec![];
    let data_tree = Tree::Struct(atom!(":-"), vec![head.clone(), body.clone()]);

    write_data(&data_tree, 0, &mut data_cells);

    let data = CompiledTerm {
        cells: data_cells,
        nbr_vars,
        ..CompiledTerm::default()
    };

    Ok((key, code, data))
}

/// Compiles a query goal. A template, when given, is laid out first so
/// its instance can be read back from offset zero of frame zero.
pub(crate) fn compile_query(
    db: &Database,
    goal: &Tree,
    template: Option<&Tree>,
) -> Result<CompiledTerm, CompileError> {
    let mut compiler = BodyCompiler::new(db, 0, None);

    if let Some(template) = template {
        write_data(template, 0, &mut compiler.cells);
    }

    let body = compiler.cells.len();

    compiler.compile_seq(goal, true)?;
    compiler.cells.push(Cell::end(Cont::Return, None));

    let nbr_vars = goal
        .var_count()
        .max(template.map_or(0, Tree::var_count));

    Ok(CompiledTerm {
        cells: compiler.cells,
        nbr_vars,
        body,
        first_cut: body_starts_with_cut(goal),
        tail_rec: false,
    })
}

/// Compiles a goal built at run time into cells for the heap, ended by
/// `end`. Its variables are numbered from `var_base` in the frame that
/// runs it.
pub(crate) fn compile_goal_code(
    db: &Database,
    goal: &Tree,
    var_base: u32,
    end: Cell,
) -> Result<Vec<Cell>, CompileError> {
    let mut compiler = BodyCompiler::new(db, var_base, None);

    compiler.compile_seq(goal, false)?;
    compiler.cells.push(end);

    Ok(compiler.cells)
}
