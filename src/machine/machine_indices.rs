use crate::atom_table::*;
use crate::forms::*;
use crate::indexing::*;
use crate::machine::system_calls::BUILTINS;
use crate::types::*;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;

use std::cell::{Cell as Stamp, RefCell};
use std::rc::Rc;

#[derive(Debug)]
pub(crate) struct Predicate {
    pub(crate) clauses: ClauseList,
    pub(crate) index: Option<FirstArgIndex>,
    pub(crate) is_dynamic: bool,
}

impl Predicate {
    fn new(is_dynamic: bool) -> Self {
        Predicate {
            clauses: Rc::new(vec![]),
            index: None,
            is_dynamic,
        }
    }

    fn candidates(&self, key: Option<&IndexKey>) -> ClauseList {
        match (&self.index, key) {
            (Some(index), Some(key)) => index.lookup(key),
            _ => self.clauses.clone(),
        }
    }
}

/// Why a database update was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DbError {
    /// The predicate is a builtin or a control construct.
    Builtin,
    /// The predicate is static.
    Static,
}

/// Constructs compiled inline by the body compiler. They cannot be
/// redefined.
pub(crate) const CONTROL_CONSTRUCTS: &[PredicateKey] = &[
    (atom!(","), 2),
    (atom!(";"), 2),
    (atom!("->"), 2),
    (atom!("*->"), 2),
    (atom!("\\+"), 1),
];

/// The clause database and literal pool, shared by a machine and every
/// query and sub-query it runs. Mutation is single-threaded; in-flight
/// resolutions are isolated from it by generation stamps and by holding
/// snapshots of the clause chains.
#[derive(Debug)]
pub(crate) struct Database {
    pub(crate) atoms: RefCell<AtomTable>,
    preds: RefCell<IndexMap<PredicateKey, Predicate, FxBuildHasher>>,
    builtins: IndexMap<PredicateKey, Builtin, FxBuildHasher>,
    ugen: Stamp<u64>,
}

impl Database {
    pub(crate) fn new() -> Self {
        let mut atoms = AtomTable::new();
        let mut builtins = IndexMap::with_hasher(FxBuildHasher::default());

        for &(name, arity, f) in BUILTINS {
            let name = atoms.build_with(name);
            builtins.insert((name, arity), Builtin { name, arity, f });
        }

        Database {
            atoms: RefCell::new(atoms),
            preds: RefCell::new(IndexMap::with_hasher(FxBuildHasher::default())),
            builtins,
            ugen: Stamp::new(0),
        }
    }

    #[inline]
    pub(crate) fn atom(&self, text: &str) -> Atom {
        self.atoms.borrow_mut().build_with(text)
    }

    #[inline]
    pub(crate) fn atom_name(&self, atom: Atom) -> Rc<str> {
        self.atoms.borrow().name(atom)
    }

    #[inline]
    pub(crate) fn builtin(&self, key: PredicateKey) -> Option<Builtin> {
        self.builtins.get(&key).copied()
    }

    #[inline]
    pub(crate) fn is_protected(&self, key: PredicateKey) -> bool {
        self.builtins.contains_key(&key) || CONTROL_CONSTRUCTS.contains(&key)
    }

    #[inline]
    pub(crate) fn ugen(&self) -> u64 {
        self.ugen.get()
    }

    #[inline]
    pub(crate) fn next_ugen(&self) -> u64 {
        let ugen = self.ugen.get() + 1;
        self.ugen.set(ugen);
        ugen
    }

    /// Resolves a predicate to an iterator over a snapshot of its
    /// candidate clauses, narrowed by `key` when the predicate is indexed.
    pub(crate) fn search_predicate(
        &self,
        pred_key: PredicateKey,
        key: Option<IndexKey>,
    ) -> Option<(ClauseIter, bool)> {
        let preds = self.preds.borrow();
        let pred = preds.get(&pred_key)?;

        Some((
            ClauseIter::new(pred.candidates(key.as_ref()), key),
            pred.is_dynamic,
        ))
    }

    pub(crate) fn is_dynamic(&self, key: PredicateKey) -> Option<bool> {
        self.preds.borrow().get(&key).map(|pred| pred.is_dynamic)
    }

    pub(crate) fn declare_dynamic(&self, key: PredicateKey) -> Result<(), DbError> {
        if self.is_protected(key) {
            return Err(DbError::Builtin);
        }

        let mut preds = self.preds.borrow_mut();

        match preds.get(&key) {
            Some(pred) if !pred.is_dynamic && !pred.clauses.is_empty() => Err(DbError::Static),
            Some(_) => {
                if let Some(pred) = preds.get_mut(&key) {
                    pred.is_dynamic = true;
                }

                Ok(())
            }
            None => {
                preds.insert(key, Predicate::new(true));
                Ok(())
            }
        }
    }

    /// Adds a compiled clause. Consulted clauses create static predicates,
    /// asserted ones dynamic predicates.
    pub(crate) fn add_clause(
        &self,
        key: PredicateKey,
        code: CompiledTerm,
        data: CompiledTerm,
        at_front: bool,
        dynamic: bool,
    ) -> Result<Rc<Clause>, DbError> {
        if self.is_protected(key) {
            return Err(DbError::Builtin);
        }

        let mut preds = self.preds.borrow_mut();
        let pred = preds.entry(key).or_insert_with(|| Predicate::new(dynamic));

        if dynamic && !pred.is_dynamic {
            return Err(DbError::Static);
        }

        let clause = Rc::new(Clause {
            key: IndexKey::of_head(&code),
            code: Rc::new(code),
            data: Rc::new(data),
            created: self.next_ugen(),
            erased: Stamp::new(0),
        });

        {
            let clauses = Rc::make_mut(&mut pred.clauses);

            if at_front {
                clauses.insert(0, clause.clone());
            } else {
                clauses.push(clause.clone());
            }
        }

        match &mut pred.index {
            Some(index) => index.insert(clause.clone(), at_front),
            None if pred.clauses.len() >= INDEX_THRESHOLD => {
                pred.index = Some(FirstArgIndex::build(&pred.clauses));
            }
            None => {}
        }

        Ok(clause)
    }

    /// Erases a clause. Resolutions already iterating over the predicate
    /// keep seeing it through their snapshot and update generation.
    pub(crate) fn retract(&self, key: PredicateKey, clause: &Rc<Clause>) {
        if clause.is_erased() {
            return;
        }

        clause.erased.set(self.next_ugen());

        let mut preds = self.preds.borrow_mut();

        if let Some(pred) = preds.get_mut(&key) {
            Rc::make_mut(&mut pred.clauses).retain(|c| !Rc::ptr_eq(c, clause));

            if let Some(index) = &mut pred.index {
                index.remove(clause);
            }
        }
    }
}
