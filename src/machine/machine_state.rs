use crate::forms::*;
use crate::machine::compile::*;
use crate::machine::config::*;
use crate::machine::copier::*;
use crate::machine::heap::*;
use crate::machine::machine_errors::*;
use crate::machine::machine_indices::*;
use crate::machine::stack::*;
use crate::types::*;

use std::cell::RefCell;
use std::rc::Rc;

/// Engine counters of one query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    /// Goals dispatched by the driver.
    pub goals: u64,
    /// Clause heads tried against a goal.
    pub matches: u64,
    /// Choice points resumed on backtracking.
    pub retries: u64,
    /// Tail-recursive calls that reused their caller's frame.
    pub tcos: u64,
    /// High-water mark of the frame stack.
    pub max_frames: usize,
    /// High-water mark of the choice-point stack.
    pub max_choices: usize,
    /// High-water mark of the trail.
    pub max_trail: usize,
    /// Trail length at the last answer.
    pub trail_len: usize,
    /// Live heap cells at the last answer.
    pub heap_cells: usize,
}

/// How a run of the driver ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Status {
    Success,
    Failure,
    Exception(Tree),
    Halt(i32),
    Aborted,
    Fatal(EngineError),
}

/// The state of one query: its four stacks, the heap arena and the
/// driver registers. Sub-queries get a state of their own and share
/// only the database and the hooks.
#[derive(Debug)]
pub struct MachineState {
    pub(crate) db: Rc<Database>,
    pub(crate) flags: MachineFlags,
    pub(crate) hooks: Rc<RefCell<Hooks>>,
    pub(crate) st: RunState,
    pub(crate) frames: Vec<Frame>,
    pub(crate) slots: Vec<Slot>,
    pub(crate) trail: Vec<TrailEntry>,
    pub(crate) choices: Vec<Choice>,
    pub(crate) heap: Heap,
    pub(crate) cgen: u64,
    pub(crate) retry: bool,
    pub(crate) jump: Option<Loc>,
    pub(crate) error: Option<EngineError>,
    pub(crate) cycle_error: bool,
    pub(crate) ball: Option<Tree>,
    pub(crate) halt: Option<i32>,
    pub(crate) abort: bool,
    pub(crate) attr_bindings: Vec<(VarRef, AttrList)>,
    pub(crate) sub_depth: usize,
    pub(crate) stats: QueryStats,
    pub(crate) query: Option<Rc<CompiledTerm>>,
}

impl MachineState {
    pub(crate) fn new(
        db: Rc<Database>,
        flags: MachineFlags,
        hooks: Rc<RefCell<Hooks>>,
        sub_depth: usize,
    ) -> Self {
        let heap = Heap::new(flags.heap_chunk_size, flags.max_heap_cells);

        tracing::debug!(sub_depth, "query created");

        MachineState {
            db,
            flags,
            hooks,
            st: RunState::default(),
            frames: Vec::with_capacity(64),
            slots: Vec::with_capacity(256),
            trail: Vec::with_capacity(64),
            choices: Vec::with_capacity(64),
            heap,
            cgen: 0,
            retry: false,
            jump: None,
            error: None,
            cycle_error: false,
            ball: None,
            halt: None,
            abort: false,
            attr_bindings: vec![],
            sub_depth,
            stats: QueryStats::default(),
            query: None,
        }
    }

    #[inline]
    pub(crate) fn next_cgen(&mut self) -> u64 {
        self.cgen += 1;
        self.cgen
    }

    /// Starts a compiled query. Its variables live in frame 0, which sees
    /// the database as of a fresh update generation.
    pub(crate) fn execute(&mut self, code: Rc<CompiledTerm>) -> Status {
        let ugen = self.db.next_ugen();
        let mut frame = Frame::new(0, code.nbr_vars);

        frame.ugen = ugen;

        self.frames.clear();
        self.slots.clear();
        self.trail.clear();
        self.choices.clear();
        self.slots.resize(code.nbr_vars, Slot::default());
        self.frames.push(frame);
        self.stats.max_frames = 1;

        self.st = RunState {
            curr_cell: Some(Loc::code(&code, code.body)),
            curr_frame: 0,
            iter: None,
            alt: 0,
        };

        self.query = Some(code);
        self.retry = false;
        self.follow_ends();

        self.run()
    }

    /// Resumes the query for its next answer.
    pub(crate) fn redo(&mut self) -> Status {
        if self.choices.is_empty() {
            return Status::Failure;
        }

        self.retry = true;
        self.run()
    }

    #[inline]
    pub(crate) fn has_choices(&self) -> bool {
        !self.choices.is_empty()
    }

    /// Creates a nested query over `goal` whose answers can be read back
    /// through `template`. `Ok(None)` means the sub-query could not be
    /// set up and the caller fails.
    pub(crate) fn sub_query(
        &mut self,
        template: Option<&Deref>,
        goal: &Deref,
    ) -> Result<Option<MachineState>, MachineError> {
        if goal.is_var() {
            return Err(self.instantiation_error());
        }

        if self.sub_depth + 1 > self.flags.max_sub_queries {
            self.fatal(ResourceError::SubQueries);
            return Ok(None);
        }

        let template = template
            .cloned()
            .unwrap_or(Deref::Const(Cell::atom(atom!("[]"))));

        let mut vars = VarMap::default();

        let (template, goal) = match (
            self.export_with(&template, &mut vars, true),
            self.export_with(goal, &mut vars, true),
        ) {
            (Ok(template), Ok(goal)) => (template, goal),
            _ => return Ok(None),
        };

        let code = match compile_query(&self.db, &goal, Some(&template)) {
            Ok(code) => code,
            Err(CompileError::Instantiation) => return Err(self.instantiation_error()),
            Err(CompileError::NotCallable(_)) => {
                return Err(self.type_error_tree(ValidType::Callable, goal))
            }
        };

        tracing::debug!(depth = self.sub_depth + 1, "sub-query created");

        let mut sub = MachineState::new(
            self.db.clone(),
            self.flags.clone(),
            self.hooks.clone(),
            self.sub_depth + 1,
        );

        sub.query = Some(Rc::new(code));
        Ok(Some(sub))
    }

    /// Runs a sub-query for its first answer.
    pub(crate) fn start(&mut self) -> Status {
        match self.query.clone() {
            Some(code) => self.execute(code),
            None => Status::Failure,
        }
    }

    /// The template of a sub-query as instantiated by its current answer.
    pub(crate) fn template_tree(&self) -> Option<Tree> {
        let code = self.query.as_ref()?;
        let template = self.deref_loc(&Loc::code(code, 0), 0);

        self.export_tree(&template, true).ok()
    }

    /// Hands the outcome of a sub-query to its parent: exceptions are
    /// rethrown, fatal errors and halts propagate, answers report success.
    pub(crate) fn absorb(&mut self, status: Status) -> CallResult {
        match status {
            Status::Success => Ok(true),
            Status::Failure => Ok(false),
            Status::Exception(ball) => Err(MachineError::from_ball(ball)),
            Status::Halt(code) => {
                self.halt = Some(code);
                Ok(false)
            }
            Status::Aborted => {
                self.abort = true;
                Ok(false)
            }
            Status::Fatal(err) => {
                if self.error.is_none() {
                    self.error = Some(err);
                }

                Ok(false)
            }
        }
    }

    #[inline]
    pub(crate) fn query_stats(&self) -> QueryStats {
        QueryStats {
            trail_len: self.trail.len(),
            heap_cells: self.heap.len(),
            ..self.stats
        }
    }
}

impl MachineState {
    /// A state with an empty root frame, for running goals outside a
    /// compiled query: directives while consulting, and database updates
    /// from the embedding program.
    pub(crate) fn with_root_frame(
        db: Rc<Database>,
        flags: MachineFlags,
        hooks: Rc<RefCell<Hooks>>,
    ) -> Self {
        let mut machine = MachineState::new(db, flags, hooks, 0);

        machine.frames.push(Frame::new(0, 0));
        machine.stats.max_frames = 1;
        machine
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        MachineState::with_root_frame(
            Rc::new(Database::new()),
            MachineFlags::default(),
            Rc::new(RefCell::new(Hooks::default())),
        )
    }
}

impl Drop for MachineState {
    fn drop(&mut self) {
        tracing::debug!(
            sub_depth = self.sub_depth,
            goals = self.stats.goals,
            retries = self.stats.retries,
            tcos = self.stats.tcos,
            "query destroyed"
        );
    }
}
