use std::fmt;
use std::rc::Rc;

use fxhash::FxBuildHasher;
use indexmap::IndexSet;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(pub(crate) u32);

impl Atom {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/* Defines the atoms interned at table creation along with the atom!
 * macro resolving their text to a constant at compile time.
 */
macro_rules! static_atoms {
    ($($name:ident => $text:tt),* $(,)?) => {
        #[allow(non_camel_case_types, clippy::upper_case_acronyms, dead_code)]
        #[repr(u32)]
        enum StaticAtomIndex {
            $($name),*
        }

        #[allow(dead_code)]
        impl Atom {
            $(pub(crate) const $name: Atom = Atom(StaticAtomIndex::$name as u32);)*
        }

        pub(crate) const STATIC_ATOMS: &[&str] = &[$($text),*];

        macro_rules! atom {
            $(($text) => { $crate::atom_table::Atom::$name };)*
        }
    };
}

static_atoms!(
    NIL => "[]",
    DOT => ".",
    TRUE => "true",
    FAIL => "fail",
    FALSE => "false",
    COMMA => ",",
    SEMICOLON => ";",
    ARROW => "->",
    SOFT_ARROW => "*->",
    NOT_PROVABLE => "\\+",
    CUT => "!",
    NECK => ":-",
    CALL => "call",
    COLON => ":",
    SLASH => "/",
    EQUAL => "=",
    LESS => "<",
    GREATER => ">",
    ERROR => "error",
    TYPE_ERROR => "type_error",
    INSTANTIATION_ERROR => "instantiation_error",
    DOMAIN_ERROR => "domain_error",
    EVALUATION_ERROR => "evaluation_error",
    EXISTENCE_ERROR => "existence_error",
    PERMISSION_ERROR => "permission_error",
    REPRESENTATION_ERROR => "representation_error",
    RESOURCE_ERROR => "resource_error",
    CALLABLE => "callable",
    EVALUABLE => "evaluable",
    INTEGER => "integer",
    ATOM => "atom",
    ATOMIC => "atomic",
    COMPOUND => "compound",
    LIST => "list",
    NUMBER => "number",
    VARIABLE => "variable",
    PROCEDURE => "procedure",
    SOURCE_SINK => "source_sink",
    MODIFY => "modify",
    ACCESS => "access",
    STATIC_PROCEDURE => "static_procedure",
    PRIVATE_PROCEDURE => "private_procedure",
    ZERO_DIVISOR => "zero_divisor",
    UNDEFINED => "undefined",
    FLOAT_OVERFLOW => "float_overflow",
    INT_OVERFLOW => "int_overflow",
    NOT_LESS_THAN_ZERO => "not_less_than_zero",
    PREDICATE_INDICATOR => "predicate_indicator",
    MAX_ARITY => "max_arity",
    FREEZE => "freeze",
    ATTR_UNIFY_HOOK => "attr_unify_hook",
    ENGINE => "engine",
    INF => "inf",
    INFINITE => "infinite",
    NAN => "nan",
    PI => "pi",
    E => "e",
    EPSILON => "epsilon",
    MAX_TAGGED_INTEGER => "max_tagged_integer",
    ITE_CUT => "$ite_cut",
    SOFT_CUT => "$soft_cut",
    NT_CUT => "$nt_cut",
    CLEANUP_EXIT => "$cleanup_exit",
    ELLIPSIS => "...",
    ORDER => "order",
    CALL_CLEANUP => "$call_cleanup",
    ONCE => "once",
    NON_EMPTY_LIST => "non_empty_list",
);

impl From<bool> for Atom {
    #[inline]
    fn from(value: bool) -> Self {
        if value {
            atom!("true")
        } else {
            atom!("false")
        }
    }
}

/// The literal pool shared by a machine and all of its queries.
pub(crate) struct AtomTable {
    names: IndexSet<Rc<str>, FxBuildHasher>,
}

impl fmt::Debug for AtomTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomTable")
            .field("len", &self.names.len())
            .finish()
    }
}

impl AtomTable {
    pub(crate) fn new() -> Self {
        let mut names =
            IndexSet::with_capacity_and_hasher(STATIC_ATOMS.len() * 4, FxBuildHasher::default());

        for text in STATIC_ATOMS {
            names.insert(Rc::from(*text));
        }

        AtomTable { names }
    }

    pub(crate) fn build_with(&mut self, text: &str) -> Atom {
        if let Some(index) = self.names.get_index_of(text) {
            return Atom(index as u32);
        }

        let (index, _) = self.names.insert_full(Rc::from(text));
        Atom(index as u32)
    }

    #[inline]
    pub(crate) fn name(&self, atom: Atom) -> Rc<str> {
        self.names
            .get_index(atom.index())
            .cloned()
            .unwrap_or_else(|| Rc::from(""))
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.names.len()
    }
}
