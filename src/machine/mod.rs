pub(crate) mod arithmetic_ops;
pub(crate) mod attributed_variables;
pub(crate) mod compare;
pub(crate) mod compile;
pub mod config;
pub(crate) mod copier;
pub(crate) mod dispatch;
pub(crate) mod heap;
pub mod lib_machine;
pub mod machine_errors;
pub(crate) mod machine_indices;
pub mod machine_state;
pub(crate) mod machine_state_impl;
pub(crate) mod stack;
pub(crate) mod system_calls;
pub(crate) mod unify;

use crate::machine::config::*;
use crate::machine::machine_indices::*;
use crate::machine::machine_state::*;

use lazy_static::lazy_static;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;

lazy_static! {
    /// Raised asynchronously (from a signal handler, say) to interrupt
    /// the running query. The driver clears it when it takes notice.
    pub static ref INTERRUPT: AtomicBool = AtomicBool::new(false);
}

/// A Prolog engine: a clause database plus the configuration every
/// query run against it inherits.
#[derive(Debug)]
pub struct Machine {
    pub(crate) db: Rc<Database>,
    pub(crate) flags: MachineFlags,
    pub(crate) hooks: Rc<RefCell<Hooks>>,
    pub(crate) halted: Option<i32>,
}

impl Default for Machine {
    fn default() -> Self {
        MachineBuilder::default().build()
    }
}

impl Machine {
    /// Creates a machine with the default configuration.
    pub fn new() -> Self {
        Default::default()
    }

    /// The flags queries run with.
    #[inline]
    pub fn flags(&self) -> &MachineFlags {
        &self.flags
    }

    /// Changes the flags of the queries run from now on.
    #[inline]
    pub fn set_flags(&mut self, flags: MachineFlags) {
        self.flags = flags;
    }

    pub(crate) fn query_state(&self) -> MachineState {
        MachineState::new(self.db.clone(), self.flags.clone(), self.hooks.clone(), 0)
    }

    pub(crate) fn scratch_state(&self) -> MachineState {
        MachineState::with_root_frame(self.db.clone(), self.flags.clone(), self.hooks.clone())
    }
}
