use crate::atom_table::*;
use crate::indexing::IndexKey;
use crate::types::*;

use dashu::{Integer, Rational};
use ordered_float::OrderedFloat;

use std::cell::Cell as Stamp;
use std::rc::Rc;

pub(crate) type PredicateKey = (Atom, usize);

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Literal {
    Fixnum(i64),
    Integer(Rc<Integer>),
    Rational(Rc<Rational>),
    Float(OrderedFloat<f64>),
    Str(Rc<str>),
}

impl Literal {
    pub(crate) fn to_cell(&self) -> Cell {
        match self {
            Literal::Fixnum(n) => Cell::fixnum(*n),
            Literal::Integer(n) => Cell::integer((**n).clone()),
            Literal::Rational(r) => Cell::rational((**r).clone()),
            Literal::Float(f) => Cell::float(f.into_inner()),
            Literal::Str(s) => Cell::string(s.clone()),
        }
    }

    pub(crate) fn from_cell(cell: &Cell) -> Option<Self> {
        match &cell.val {
            Value::Fixnum(n) => Some(Literal::Fixnum(*n)),
            Value::Integer(n) => Some(Literal::Integer(n.clone())),
            Value::Rational(r) => Some(Literal::Rational(r.clone())),
            Value::Float(f) => Some(Literal::Float(*f)),
            Value::Str(s) => Some(Literal::Str(s.clone())),
            _ => None,
        }
    }
}

/// An owned, context-free term. Variables are numbered densely from zero
/// so a tree can be written into any frame or heap block. List spines are
/// kept flat so long lists neither recurse nor drop recursively.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tree {
    Var(u32),
    Atom(Atom),
    Literal(Literal),
    Struct(Atom, Vec<Tree>),
    List(Vec<Tree>, Box<Tree>),
}

impl Tree {
    #[inline]
    pub(crate) fn compound(name: Atom, args: Vec<Tree>) -> Self {
        if args.is_empty() {
            Tree::Atom(name)
        } else {
            Tree::Struct(name, args)
        }
    }

    #[inline]
    pub(crate) fn fixnum(n: i64) -> Self {
        Tree::Literal(Literal::Fixnum(n))
    }

    /// `Name/Arity`.
    pub(crate) fn indicator(key: PredicateKey) -> Self {
        Tree::Struct(
            atom!("/"),
            vec![Tree::Atom(key.0), Tree::fixnum(key.1 as i64)],
        )
    }

    pub(crate) fn list(items: Vec<Tree>, tail: Tree) -> Self {
        if items.is_empty() {
            tail
        } else {
            Tree::List(items, Box::new(tail))
        }
    }

    #[inline]
    pub(crate) fn key(&self) -> Option<PredicateKey> {
        match self {
            Tree::Atom(name) => Some((*name, 0)),
            Tree::Struct(name, args) => Some((*name, args.len())),
            Tree::List(..) => Some((atom!("."), 2)),
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn is_callable(&self) -> bool {
        matches!(self, Tree::Atom(_) | Tree::Struct(..) | Tree::List(..))
    }

    /// The arguments of a callable tree. A list yields its first element
    /// and the rest of its spine.
    pub(crate) fn args(&self) -> Vec<Tree> {
        match self {
            Tree::Struct(_, args) => args.clone(),
            Tree::List(items, tail) => {
                let rest = Tree::list(items[1..].to_vec(), (**tail).clone());
                vec![items[0].clone(), rest]
            }
            _ => vec![],
        }
    }

    /// One more than the largest variable number, or zero.
    pub(crate) fn var_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];

        while let Some(tree) = stack.pop() {
            match tree {
                Tree::Var(n) => count = count.max(*n as usize + 1),
                Tree::Struct(_, args) => stack.extend(args.iter()),
                Tree::List(items, tail) => {
                    stack.extend(items.iter());
                    stack.push(tail);
                }
                _ => {}
            }
        }

        count
    }

    pub(crate) fn rename_vars(&mut self, map: &impl Fn(u32) -> u32) {
        let mut stack = vec![self];

        while let Some(tree) = stack.pop() {
            match tree {
                Tree::Var(n) => *n = map(*n),
                Tree::Struct(_, args) => stack.extend(args.iter_mut()),
                Tree::List(items, tail) => {
                    stack.extend(items.iter_mut());
                    stack.push(tail);
                }
                _ => {}
            }
        }
    }
}

/// A flat cell array: head cells (if any) followed by compiled body cells.
#[derive(Debug, Default)]
pub(crate) struct CompiledTerm {
    pub(crate) cells: Vec<Cell>,
    pub(crate) nbr_vars: usize,
    pub(crate) body: usize,
    pub(crate) first_cut: bool,
    pub(crate) tail_rec: bool,
}

#[derive(Debug)]
pub(crate) struct Clause {
    pub(crate) code: Rc<CompiledTerm>,
    /// `(Head :- Body)` as data, matched by clause/2 and retract/1.
    pub(crate) data: Rc<CompiledTerm>,
    pub(crate) key: Option<IndexKey>,
    pub(crate) created: u64,
    pub(crate) erased: Stamp<u64>,
}

impl Clause {
    /// The logical update view: a clause is seen by a call whose update
    /// generation follows its creation and precedes its erasure.
    #[inline]
    pub(crate) fn is_visible(&self, ugen: u64) -> bool {
        let erased = self.erased.get();
        self.created <= ugen && (erased == 0 || erased > ugen)
    }

    #[inline]
    pub(crate) fn is_erased(&self) -> bool {
        self.erased.get() != 0
    }
}
