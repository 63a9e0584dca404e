use crate::atom_table::*;
use crate::forms::*;
use crate::types::*;

use dashu::Integer;
use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use ordered_float::OrderedFloat;

use std::rc::Rc;

/// Predicates reaching this many clauses get a first-argument index.
pub(crate) const INDEX_THRESHOLD: usize = 8;

pub(crate) type ClauseList = Rc<Vec<Rc<Clause>>>;

/// The principal functor or constant of a first argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum IndexKey {
    Atom(Atom),
    Functor(Atom, usize),
    Fixnum(i64),
    Integer(Rc<Integer>),
    Float(OrderedFloat<f64>),
    Str(Rc<str>),
}

impl IndexKey {
    /// Keys are taken from dereferenced cells. Variables and rationals
    /// have none and match every clause.
    pub(crate) fn from_cell(cell: &Cell) -> Option<Self> {
        match &cell.val {
            Value::Atom(name) if cell.arity > 0 => {
                Some(IndexKey::Functor(*name, cell.arity as usize))
            }
            Value::Atom(name) => Some(IndexKey::Atom(*name)),
            Value::Fixnum(n) => Some(IndexKey::Fixnum(*n)),
            Value::Integer(n) => Some(IndexKey::Integer(n.clone())),
            Value::Float(f) => Some(IndexKey::Float(*f)),
            Value::Str(s) => Some(IndexKey::Str(s.clone())),
            _ => None,
        }
    }

    /// Keys of the first head argument of a compiled clause.
    pub(crate) fn of_head(code: &CompiledTerm) -> Option<Self> {
        match code.cells.first() {
            Some(head) if head.arity > 0 => code.cells.get(1).and_then(IndexKey::from_cell),
            _ => None,
        }
    }
}

#[inline]
pub(crate) fn keys_compatible(clause: Option<&IndexKey>, goal: Option<&IndexKey>) -> bool {
    match (clause, goal) {
        (Some(k1), Some(k2)) => k1 == k2,
        _ => true,
    }
}

/// Per-key clause chains. Each bucket keeps its clauses in database
/// order, interleaved with the clauses whose first argument is unkeyed.
/// Buckets are shared copy-on-write with in-flight iterators.
#[derive(Debug, Default)]
pub(crate) struct FirstArgIndex {
    buckets: IndexMap<IndexKey, ClauseList, FxBuildHasher>,
    unkeyed: ClauseList,
}

impl FirstArgIndex {
    pub(crate) fn build(clauses: &[Rc<Clause>]) -> Self {
        let mut index = FirstArgIndex::default();

        for clause in clauses {
            index.insert(clause.clone(), false);
        }

        index
    }

    pub(crate) fn insert(&mut self, clause: Rc<Clause>, at_front: bool) {
        let push = |list: &mut ClauseList, clause: Rc<Clause>| {
            let list = Rc::make_mut(list);

            if at_front {
                list.insert(0, clause);
            } else {
                list.push(clause);
            }
        };

        match &clause.key {
            Some(key) => {
                if !self.buckets.contains_key(key) {
                    self.buckets.insert(key.clone(), self.unkeyed.clone());
                }

                if let Some(bucket) = self.buckets.get_mut(key) {
                    push(bucket, clause);
                }
            }
            None => {
                for bucket in self.buckets.values_mut() {
                    push(bucket, clause.clone());
                }

                push(&mut self.unkeyed, clause);
            }
        }
    }

    pub(crate) fn remove(&mut self, clause: &Rc<Clause>) {
        let unlink = |list: &mut ClauseList| {
            if list.iter().any(|c| Rc::ptr_eq(c, clause)) {
                Rc::make_mut(list).retain(|c| !Rc::ptr_eq(c, clause));
            }
        };

        match &clause.key {
            Some(key) => {
                if let Some(bucket) = self.buckets.get_mut(key) {
                    unlink(bucket);
                }
            }
            None => {
                for bucket in self.buckets.values_mut() {
                    unlink(bucket);
                }

                unlink(&mut self.unkeyed);
            }
        }
    }

    /// The narrowed chain for a key. Keys no clause mentions only reach
    /// the unkeyed clauses.
    pub(crate) fn lookup(&self, key: &IndexKey) -> ClauseList {
        self.buckets
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.unkeyed.clone())
    }
}

/// A cursor over a snapshot of a clause chain, stored in choice points.
#[derive(Debug, Clone)]
pub(crate) struct ClauseIter {
    list: ClauseList,
    pos: usize,
    key: Option<IndexKey>,
}

impl ClauseIter {
    pub(crate) fn new(list: ClauseList, key: Option<IndexKey>) -> Self {
        ClauseIter { list, pos: 0, key }
    }

    /// The next visible candidate at or after the cursor.
    pub(crate) fn seek(&mut self, ugen: u64) -> Option<Rc<Clause>> {
        while let Some(clause) = self.list.get(self.pos) {
            if clause.is_visible(ugen) && keys_compatible(clause.key.as_ref(), self.key.as_ref()) {
                return Some(clause.clone());
            }

            self.pos += 1;
        }

        None
    }

    #[inline]
    pub(crate) fn advance(&mut self) {
        self.pos += 1;
    }

    /// Whether a visible candidate follows the one under the cursor.
    pub(crate) fn has_next(&self, ugen: u64) -> bool {
        self.list.iter().skip(self.pos + 1).any(|clause| {
            clause.is_visible(ugen) && keys_compatible(clause.key.as_ref(), self.key.as_ref())
        })
    }
}
