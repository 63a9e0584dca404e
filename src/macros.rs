/* Builders for the owned trees and cells the builtins assemble. The
 * names must be static atoms, resolved at compile time by atom!.
 */

macro_rules! atom_tree {
    ($name:tt) => {
        $crate::forms::Tree::Atom(atom!($name))
    };
}

macro_rules! compound_tree {
    ($name:tt, $($arg:expr),+ $(,)?) => {
        $crate::forms::Tree::Struct(atom!($name), vec![$($arg),+])
    };
}

macro_rules! atom_as_cell {
    ($name:tt) => {
        $crate::types::Cell::atom(atom!($name))
    };
}

macro_rules! fixnum_as_cell {
    ($n:expr) => {
        $crate::types::Cell::fixnum($n as i64)
    };
}
