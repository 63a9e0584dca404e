//! A stack-based Prolog resolution engine: unification, backtracking,
//! cut, catch/throw and last-call optimization over a clause database
//! with the logical update view.
#![deny(missing_docs)]

#[macro_use]
pub(crate) mod macros;
#[macro_use]
pub(crate) mod atom_table;
mod forms;
mod indexing;
pub(crate) mod machine;
pub(crate) mod types;

// Re-exports
pub use machine::config::*;
pub use machine::lib_machine::*;
pub use machine::machine_state::QueryStats;
pub use machine::Machine;
pub use machine::INTERRUPT;
