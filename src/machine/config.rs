use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use derive_more::Display;

use crate::machine::lib_machine::Term;
use crate::machine::machine_indices::Database;
use crate::Machine;

/// Called with every port event while tracing is on.
pub type TraceCallback = Box<dyn FnMut(&TraceEvent)>;
/// Decides what an interrupted query does next.
pub type InterruptCallback = Box<dyn FnMut() -> InterruptAction>;
/// Resolves a source name from a list directive to the clauses it holds.
pub type ConsultHandler = Box<dyn FnMut(&str) -> Result<Vec<Term>, String>>;

/// The box-model port of a traced step.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    /// A goal is entered for the first time.
    #[display(fmt = "CALL")]
    Call,
    /// A goal succeeded.
    #[display(fmt = "EXIT")]
    Exit,
    /// A goal is re-entered on backtracking.
    #[display(fmt = "REDO")]
    Redo,
    /// A goal failed.
    #[display(fmt = "FAIL")]
    Fail,
    /// Control returned to a caller whose body continues.
    #[display(fmt = "NEXT")]
    Next,
}

/// A traced step.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    /// The number of goals executed so far.
    pub step: u64,
    /// The port label.
    pub port: Port,
    /// The frame the goal runs under.
    pub depth: usize,
    /// The goal, with its bindings resolved.
    pub goal: Term,
}

/// What an interrupted query does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    /// Abandon the query.
    Abort,
    /// Fail the current goal.
    Fail,
    /// Carry on as if nothing happened.
    Continue,
    /// Toggle tracing and carry on.
    Trace,
    /// Halt with the given exit code.
    Halt(i32),
}

/// What calling an unknown procedure does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownFlag {
    /// Raise `existence_error(procedure, Name/Arity)`.
    #[default]
    Error,
    /// Fail silently.
    Fail,
}

/// Engine flags. Each query and sub-query runs with its own copy.
#[derive(Debug, Clone)]
pub struct MachineFlags {
    /// Reuse frames for deterministic tail-recursive calls.
    pub tco: bool,
    /// Emit port events.
    pub trace: bool,
    /// Behaviour for unknown procedures.
    pub unknown: UnknownFlag,
    /// Bound on the depth of unification, comparison and term copying.
    pub max_depth: usize,
    /// Ceiling on the frame stack.
    pub max_frames: usize,
    /// Ceiling on the slot store.
    pub max_slots: usize,
    /// Ceiling on the choice-point stack.
    pub max_choices: usize,
    /// Ceiling on the trail.
    pub max_trail: usize,
    /// Ceiling on the number of live heap cells.
    pub max_heap_cells: usize,
    /// Ceiling on the nesting of sub-queries.
    pub max_sub_queries: usize,
    /// Initial capacity of heap chunks.
    pub heap_chunk_size: usize,
}

impl Default for MachineFlags {
    fn default() -> Self {
        MachineFlags {
            tco: true,
            trace: false,
            unknown: UnknownFlag::Error,
            max_depth: 1_000_000,
            max_frames: 1 << 24,
            max_slots: 1 << 26,
            max_choices: 1 << 24,
            max_trail: 1 << 26,
            max_heap_cells: 1 << 28,
            max_sub_queries: 256,
            heap_chunk_size: 1 << 12,
        }
    }
}

#[derive(Default)]
pub(crate) struct Hooks {
    pub(crate) trace: Option<TraceCallback>,
    pub(crate) interrupt: Option<InterruptCallback>,
    pub(crate) consult: Option<ConsultHandler>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |present: bool| if present { "<callback>" } else { "None" };

        f.debug_struct("Hooks")
            .field("trace", &show(self.trace.is_some()))
            .field("interrupt", &show(self.interrupt.is_some()))
            .field("consult", &show(self.consult.is_some()))
            .finish()
    }
}

/// Describes how a [`Machine`](crate::Machine) will be configured.
#[derive(Debug, Default)]
pub struct MachineBuilder {
    pub(crate) flags: MachineFlags,
    pub(crate) hooks: Hooks,
}

impl MachineBuilder {
    /// Creates a default configuration.
    pub fn new() -> Self {
        Default::default()
    }

    /// Uses the given flags in this configuration.
    pub fn with_flags(mut self, flags: MachineFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Enables or disables last-call frame reuse.
    pub fn with_tco(mut self, tco: bool) -> Self {
        self.flags.tco = tco;
        self
    }

    /// Enables or disables port tracing.
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.flags.trace = trace;
        self
    }

    /// Sets the behaviour for unknown procedures.
    pub fn with_unknown(mut self, unknown: UnknownFlag) -> Self {
        self.flags.unknown = unknown;
        self
    }

    /// Bounds unification, comparison and copying depth.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.flags.max_depth = max_depth;
        self
    }

    /// Bounds the frame stack and the choice-point stack.
    pub fn with_stack_limits(mut self, max_frames: usize, max_choices: usize) -> Self {
        self.flags.max_frames = max_frames;
        self.flags.max_choices = max_choices;
        self
    }

    /// Calls `callback` with every port event while tracing is on.
    pub fn with_trace_callback(mut self, callback: TraceCallback) -> Self {
        self.hooks.trace = Some(callback);
        self
    }

    /// Asks `callback` what to do when [`INTERRUPT`](crate::INTERRUPT) is raised.
    pub fn with_interrupt_callback(mut self, callback: InterruptCallback) -> Self {
        self.hooks.interrupt = Some(callback);
        self
    }

    /// Resolves the source names of list directives with `handler`.
    pub fn with_consult_handler(mut self, handler: ConsultHandler) -> Self {
        self.hooks.consult = Some(handler);
        self
    }

    /// Builds the [`Machine`](crate::Machine) from this configuration.
    pub fn build(self) -> Machine {
        Machine {
            db: Rc::new(Database::new()),
            flags: self.flags,
            hooks: Rc::new(RefCell::new(self.hooks)),
            halted: None,
        }
    }
}
