use crate::atom_table::*;
use crate::forms::*;
use crate::machine::compile::*;
use crate::machine::copier::VarMap;
use crate::machine::machine_errors::*;
use crate::machine::machine_indices::*;
use crate::machine::machine_state::*;
use crate::machine::Machine;
use crate::types::*;

use dashu::{Integer, Rational};
use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use ordered_float::OrderedFloat;

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

#[cfg(test)]
mod tests;

/// Represents a leaf answer from a query.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafAnswer {
    /// A `true` leaf answer.
    True,
    /// A `false` leaf answer.
    ///
    /// This means that there are no more answers for the query.
    False,
    /// An exception leaf answer.
    Exception(Term),
    /// A leaf answer with bindings.
    #[non_exhaustive]
    LeafAnswer {
        /// The bindings of variables in the query.
        bindings: BTreeMap<String, Term>,
    },
}

impl LeafAnswer {
    /// Creates a leaf answer from its bindings.
    pub fn from_bindings<S: Into<String>>(bindings: impl IntoIterator<Item = (S, Term)>) -> Self {
        LeafAnswer::LeafAnswer {
            bindings: bindings.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Represents a Prolog term.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// An arbitrary precision integer.
    Integer(Integer),
    /// An arbitrary precision rational.
    Rational(Rational),
    /// A float.
    Float(f64),
    /// A Prolog atom.
    Atom(String),
    /// A Prolog string. Strings are not atoms and do not unify with them.
    String(String),
    /// A Prolog list.
    List(Vec<Term>),
    /// A Prolog compound term.
    Compound(String, Vec<Term>),
    /// A Prolog variable.
    Var(String),
}

impl Term {
    /// Creates an integer term.
    pub fn integer(value: impl Into<Integer>) -> Self {
        Term::Integer(value.into())
    }

    /// Creates a rational term.
    pub fn rational(value: impl Into<Rational>) -> Self {
        Term::Rational(value.into())
    }

    /// Creates a float term.
    pub fn float(value: impl Into<f64>) -> Self {
        Term::Float(value.into())
    }

    /// Creates an atom term.
    pub fn atom(value: impl Into<String>) -> Self {
        Term::Atom(value.into())
    }

    /// Creates a string term.
    pub fn string(value: impl Into<String>) -> Self {
        Term::String(value.into())
    }

    /// Creates a list term.
    pub fn list(value: impl IntoIterator<Item = Term>) -> Self {
        Term::List(value.into_iter().collect())
    }

    /// Creates a compound term.
    pub fn compound(functor: impl Into<String>, args: impl IntoIterator<Item = Term>) -> Self {
        Term::Compound(functor.into(), args.into_iter().collect())
    }

    /// Creates a variable.
    pub fn variable(value: impl Into<String>) -> Self {
        Term::Var(value.into())
    }

    /// Creates a conjunction, giving the atom `true` if empty.
    pub fn conjunction(value: impl IntoIterator<Item = Term>) -> Self {
        Term::try_conjunction(value).unwrap_or(Term::atom("true"))
    }

    /// Creates a conjunction, giving `None` if empty.
    pub fn try_conjunction(value: impl IntoIterator<Item = Term>) -> Option<Self> {
        let mut terms: Vec<Term> = value.into_iter().collect();
        let last = terms.pop()?;

        Some(
            terms
                .into_iter()
                .rev()
                .fold(last, |rest, term| Term::compound(",", [term, rest])),
        )
    }

    /// Creates a disjunction, giving the atom `false` if empty.
    pub fn disjunction(value: impl IntoIterator<Item = Term>) -> Self {
        Term::try_disjunction(value).unwrap_or(Term::atom("false"))
    }

    /// Creates a disjunction, giving `None` if empty.
    pub fn try_disjunction(value: impl IntoIterator<Item = Term>) -> Option<Self> {
        let mut terms: Vec<Term> = value.into_iter().collect();
        let last = terms.pop()?;

        Some(
            terms
                .into_iter()
                .rev()
                .fold(last, |rest, term| Term::compound(";", [term, rest])),
        )
    }
}

fn is_symbol_char(c: char) -> bool {
    "+-*/\\^<>=~:.?@#&$".contains(c)
}

fn needs_quotes(name: &str) -> bool {
    let Some(first) = name.chars().next() else {
        return true;
    };

    if first.is_lowercase() {
        return !name.chars().all(|c| c.is_alphanumeric() || c == '_');
    }

    if matches!(name, "[]" | "!" | ";" | "{}") {
        return false;
    }

    !name.chars().all(is_symbol_char)
}

fn write_escaped(f: &mut fmt::Formatter<'_>, text: &str, quote: char) -> fmt::Result {
    for c in text.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            c if c == quote => write!(f, "\\{c}")?,
            c => write!(f, "{c}")?,
        }
    }

    Ok(())
}

fn write_atom(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    if needs_quotes(name) {
        f.write_str("'")?;
        write_escaped(f, name, '\'')?;
        f.write_str("'")
    } else {
        f.write_str(name)
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Term]) -> fmt::Result {
    for (idx, arg) in args.iter().enumerate() {
        if idx > 0 {
            f.write_str(",")?;
        }

        write!(f, "{arg}")?;
    }

    Ok(())
}

/// Canonical syntax: operators are written in functional notation and
/// atoms are quoted where needed.
impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Integer(n) => write!(f, "{n}"),
            Term::Rational(r) => write!(f, "{} rdiv {}", r.numerator(), r.denominator()),
            Term::Float(x) => write!(f, "{x:?}"),
            Term::Atom(name) => write_atom(f, name),
            Term::String(s) => {
                f.write_str("\"")?;
                write_escaped(f, s, '"')?;
                f.write_str("\"")
            }
            Term::List(items) => {
                f.write_str("[")?;
                write_args(f, items)?;
                f.write_str("]")
            }
            Term::Compound(name, args) => {
                write_atom(f, name)?;
                f.write_str("(")?;
                write_args(f, args)?;
                f.write_str(")")
            }
            Term::Var(name) => f.write_str(name),
        }
    }
}

/// This is an auxiliary function to turn a count into names of anonymous variables like _A, _B,
/// _AB, etc...
fn count_to_letter_code(mut count: usize) -> String {
    let mut letters = Vec::new();

    loop {
        letters.push(char::from(b'A' + (count % 26) as u8));
        count /= 26;

        if count == 0 {
            break;
        }
    }

    letters.into_iter().chain("_".chars()).rev().collect()
}

fn literal_term(lit: &Literal) -> Term {
    match lit {
        Literal::Fixnum(n) => Term::Integer(Integer::from(*n)),
        Literal::Integer(n) => Term::Integer((**n).clone()),
        Literal::Rational(r) => Term::Rational((**r).clone()),
        Literal::Float(f) => Term::Float(f.into_inner()),
        Literal::Str(s) => Term::String(s.to_string()),
    }
}

enum TermStep<'a> {
    Visit(&'a Tree),
    Compound(Atom, usize),
    List(usize),
}

/// Converts an exported tree into a public term. `var_name` names its
/// variables; `[]` becomes the empty list.
pub(crate) fn tree_to_term(db: &Database, tree: &Tree, var_name: &dyn Fn(u32) -> String) -> Term {
    let mut work = vec![TermStep::Visit(tree)];
    let mut out: Vec<Term> = vec![];

    while let Some(step) = work.pop() {
        match step {
            TermStep::Visit(tree) => match tree {
                Tree::Var(n) => out.push(Term::Var(var_name(*n))),
                Tree::Atom(atom!("[]")) => out.push(Term::List(vec![])),
                Tree::Atom(name) => out.push(Term::Atom(db.atom_name(*name).to_string())),
                Tree::Literal(lit) => out.push(literal_term(lit)),
                Tree::Struct(name, args) => {
                    work.push(TermStep::Compound(*name, args.len()));
                    work.extend(args.iter().rev().map(TermStep::Visit));
                }
                Tree::List(items, tail) => {
                    work.push(TermStep::List(items.len()));
                    work.push(TermStep::Visit(tail));
                    work.extend(items.iter().rev().map(TermStep::Visit));
                }
            },
            TermStep::Compound(name, arity) => {
                let args = out.split_off(out.len().saturating_sub(arity));
                out.push(Term::Compound(db.atom_name(name).to_string(), args));
            }
            TermStep::List(len) => {
                let Some(tail) = out.pop() else {
                    break;
                };

                let mut items = out.split_off(out.len().saturating_sub(len));

                match tail {
                    Term::List(rest) => {
                        items.extend(rest);
                        out.push(Term::List(items));
                    }
                    tail => {
                        let partial = items
                            .into_iter()
                            .rev()
                            .fold(tail, |rest, item| Term::compound(".", [item, rest]));

                        out.push(partial);
                    }
                }
            }
        }
    }

    out.pop().unwrap_or(Term::List(vec![]))
}

/// Numbers the variables of terms handed in by the embedding program.
/// Every `_` is a variable of its own.
#[derive(Debug, Default)]
pub(crate) struct VarNames {
    named: IndexMap<String, u32, FxBuildHasher>,
    next: u32,
}

impl VarNames {
    fn var(&mut self, name: &str) -> u32 {
        let next = &mut self.next;

        let mut fresh = || {
            let n = *next;
            *next += 1;
            n
        };

        if name == "_" {
            return fresh();
        }

        *self.named.entry(name.to_string()).or_insert_with(fresh)
    }
}

fn integer_literal(n: &Integer) -> Literal {
    match i64::try_from(n) {
        Ok(n) => Literal::Fixnum(n),
        Err(_) => Literal::Integer(Rc::new(n.clone())),
    }
}

/// Converts a public term into a tree, numbering its variables through
/// `vars`.
pub(crate) fn term_to_tree(db: &Database, term: &Term, vars: &mut VarNames) -> Tree {
    match term {
        Term::Integer(n) => Tree::Literal(integer_literal(n)),
        Term::Rational(r) if r.denominator().is_one() => {
            Tree::Literal(integer_literal(r.numerator()))
        }
        Term::Rational(r) => Tree::Literal(Literal::Rational(Rc::new(r.clone()))),
        Term::Float(x) => Tree::Literal(Literal::Float(OrderedFloat(*x))),
        Term::Atom(name) => Tree::Atom(db.atom(name)),
        Term::String(s) => Tree::Literal(Literal::Str(Rc::from(s.as_str()))),
        Term::List(items) => {
            let items = items.iter().map(|item| term_to_tree(db, item, vars)).collect();
            Tree::list(items, atom_tree!("[]"))
        }
        Term::Compound(name, args) if name == "." && args.len() == 2 => {
            let head = term_to_tree(db, &args[0], vars);

            match term_to_tree(db, &args[1], vars) {
                Tree::List(mut items, tail) => {
                    items.insert(0, head);
                    Tree::List(items, tail)
                }
                tail => Tree::list(vec![head], tail),
            }
        }
        Term::Compound(name, args) => {
            let args = args.iter().map(|arg| term_to_tree(db, arg, vars)).collect();
            Tree::compound(db.atom(name), args)
        }
        Term::Var(name) => Tree::Var(vars.var(name)),
    }
}

/// An iterator though the leaf answers of a query.
pub struct QueryState<'a> {
    machine: &'a mut Machine,
    state: MachineState,
    code: Option<Rc<CompiledTerm>>,
    pending: Option<Term>,
    names: Vec<(String, u32)>,
    started: bool,
    done: bool,
}

impl fmt::Debug for QueryState<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryState")
            .field("names", &self.names)
            .field("started", &self.started)
            .field("done", &self.done)
            .finish()
    }
}

impl QueryState<'_> {
    /// Engine counters of the query so far.
    pub fn stats(&self) -> QueryStats {
        self.state.query_stats()
    }

    fn name_of(&self, var: VarRef) -> Option<&str> {
        if var.ctx != 0 {
            return None;
        }

        self.names
            .iter()
            .find(|(_, nbr)| *nbr == var.nbr)
            .map(|(name, _)| name.as_str())
    }

    fn fresh_names(&self, count: usize) -> Vec<String> {
        let mut names = Vec::with_capacity(count);
        let mut anon = 0;

        while names.len() < count {
            let name = count_to_letter_code(anon);
            anon += 1;

            if self.names.iter().all(|(taken, _)| *taken != name) {
                names.push(name);
            }
        }

        names
    }

    fn ball_term(&self, ball: &Tree) -> Term {
        self.machine.error_term(ball)
    }

    fn answer(&self) -> LeafAnswer {
        if self.names.is_empty() {
            return LeafAnswer::True;
        }

        let mut vars = VarMap::default();

        let values: Vec<Tree> = self
            .names
            .iter()
            .map(|(_, nbr)| {
                let value = self.state.deref_var(VarRef { ctx: 0, nbr: *nbr });

                self.state
                    .export_with(&value, &mut vars, false)
                    .unwrap_or(atom_tree!("..."))
            })
            .collect();

        let mut fresh = self.fresh_names(vars.len()).into_iter();

        let var_names: Vec<String> = vars
            .keys()
            .map(|var| match self.name_of(*var) {
                Some(name) => name.to_string(),
                None => fresh.next().unwrap_or_default(),
            })
            .collect();

        let var_name = |n: u32| var_names.get(n as usize).cloned().unwrap_or_default();
        let mut bindings = BTreeMap::new();

        for (idx, ((name, _), value)) in self.names.iter().zip(values).enumerate() {
            if name.starts_with('_') {
                continue;
            }

            let mut name = name.clone();
            let mut term = tree_to_term(&self.machine.db, &value, &var_name);

            if let Term::Var(other) = &term {
                let other = other.clone();

                if other == name {
                    continue;
                }

                // Names appear in query order. An alias to an earlier
                // variable is reported under the earlier name.
                let earlier = self
                    .names
                    .iter()
                    .position(|(n, _)| *n == other)
                    .is_some_and(|other_idx| other_idx < idx);

                if earlier {
                    term = Term::Var(name);
                    name = other;
                }
            }

            bindings.insert(name, term);
        }

        LeafAnswer::LeafAnswer { bindings }
    }
}

impl Iterator for QueryState<'_> {
    type Item = Result<LeafAnswer, Term>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if let Some(err) = self.pending.take() {
            self.done = true;
            return Some(Err(err));
        }

        let status = if self.started {
            // No more choicepoints, end iteration
            if !self.state.has_choices() {
                self.done = true;
                return None;
            }

            self.state.redo()
        } else {
            self.started = true;

            match self.code.clone() {
                Some(code) => self.state.execute(code),
                None => Status::Failure,
            }
        };

        match status {
            Status::Success => Some(Ok(self.answer())),
            Status::Failure => {
                self.done = true;
                Some(Ok(LeafAnswer::False))
            }
            Status::Exception(ball) => {
                self.done = true;

                let ball = self.ball_term(&ball);

                if let Term::Compound(functor, args) = &ball {
                    if functor == "error" && args.len() == 2 {
                        return Some(Err(ball));
                    }
                }

                Some(Ok(LeafAnswer::Exception(ball)))
            }
            Status::Halt(code) => {
                self.done = true;
                self.machine.halted = Some(code);
                None
            }
            Status::Aborted => {
                self.done = true;
                None
            }
            Status::Fatal(err) => {
                self.done = true;

                let what = match err {
                    EngineError::Resource(what) => self.machine.db.atom(&what.to_string()),
                };

                Some(Err(self.ball_term(&engine_error_tree(err, what))))
            }
        }
    }
}

impl Machine {
    fn error_term(&self, ball: &Tree) -> Term {
        tree_to_term(&self.db, ball, &|n| count_to_letter_code(n as usize))
    }

    /// Loads a program. Its clauses become static predicates; each
    /// `:- Goal` directive is run once when it is reached. A list goal
    /// in a directive consults the named sources through the consult
    /// handler.
    pub fn consult(&mut self, clauses: impl IntoIterator<Item = Term>) -> Result<(), Term> {
        let clauses: Vec<Term> = clauses.into_iter().collect();
        let mut state = self.scratch_state();
        let result = state.consult_terms(&clauses);

        if let Some(code) = state.halt {
            self.halted = Some(code);
        }

        result.map_err(|err| self.error_term(&err.ball))
    }

    fn add_dynamic(&mut self, clause: Term, at_front: bool) -> Result<(), Term> {
        let state = self.scratch_state();
        let tree = term_to_tree(&self.db, &clause, &mut VarNames::default());

        state
            .add_clause_tree(&tree, at_front, true)
            .map(|_| ())
            .map_err(|err| self.error_term(&err.ball))
    }

    /// Adds a clause at the end of its dynamic predicate, as assertz/1.
    pub fn assertz(&mut self, clause: Term) -> Result<(), Term> {
        self.add_dynamic(clause, false)
    }

    /// Adds a clause at the start of its dynamic predicate, as asserta/1.
    pub fn asserta(&mut self, clause: Term) -> Result<(), Term> {
        self.add_dynamic(clause, true)
    }

    /// Declares `name/arity` dynamic, as dynamic/1.
    pub fn declare_dynamic(&mut self, name: &str, arity: usize) -> Result<(), Term> {
        let key = (self.db.atom(name), arity);

        self.db.declare_dynamic(key).map_err(|_| {
            let err = self.scratch_state().permission_error(
                Permission::Modify,
                atom!("static_procedure"),
                Tree::indicator(key),
            );

            self.error_term(&err.ball)
        })
    }

    /// Runs a query.
    pub fn run_query(&mut self, query: Term) -> QueryState<'_> {
        let mut vars = VarNames::default();
        let goal = term_to_tree(&self.db, &query, &mut vars);
        let state = self.query_state();

        let names = vars
            .named
            .iter()
            .map(|(name, nbr)| (name.clone(), *nbr))
            .collect();

        let (code, pending) = match compile_query(&self.db, &goal, None) {
            Ok(code) => (Some(Rc::new(code)), None),
            Err(err) => {
                let err = match err {
                    CompileError::Instantiation => state.instantiation_error(),
                    CompileError::NotCallable(culprit) => {
                        state.type_error_tree(ValidType::Callable, culprit)
                    }
                };

                (None, Some(err))
            }
        };

        // A culprit keeps the names of the query's variables.
        let pending = pending.map(|err| {
            tree_to_term(&self.db, &err.ball, &|n| {
                vars.named
                    .iter()
                    .find(|(_, nbr)| **nbr == n)
                    .map_or_else(|| count_to_letter_code(n as usize), |(name, _)| name.clone())
            })
        });

        QueryState {
            machine: self,
            state,
            code,
            pending,
            names,
            started: false,
            done: false,
        }
    }

    /// The exit code of the last `halt/0,1`, if any query has halted.
    #[inline]
    pub fn halted(&self) -> Option<i32> {
        self.halted
    }
}
