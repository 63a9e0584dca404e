use crate::atom_table::*;
use crate::forms::*;
use crate::machine::machine_state::*;
use crate::types::*;

use derive_more::Display;

use std::error::Error;
use std::fmt;

pub(crate) type CallResult = Result<bool, MachineError>;

/// A Prolog exception on its way to a catcher. The ball is owned so it
/// survives the unwinding of the stacks its culprit lived on.
#[derive(Debug, Clone)]
pub(crate) struct MachineError {
    pub(crate) ball: Tree,
}

impl MachineError {
    #[inline]
    pub(crate) fn from_ball(ball: Tree) -> Self {
        MachineError { ball }
    }
}

/// A traversal went deeper than `max_depth`, which only cyclic terms do
/// in practice, or ran around a cyclic list tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CycleError;

// from 7.12.2 b) of 13211-1:1995
#[derive(Debug, Clone, Copy)]
pub(crate) enum ValidType {
    Atom,
    Atomic,
    Callable,
    Compound,
    Evaluable,
    Integer,
    List,
    PredicateIndicator,
    Variable,
}

impl ValidType {
    pub(crate) fn as_atom(self) -> Atom {
        match self {
            ValidType::Atom => atom!("atom"),
            ValidType::Atomic => atom!("atomic"),
            ValidType::Callable => atom!("callable"),
            ValidType::Compound => atom!("compound"),
            ValidType::Evaluable => atom!("evaluable"),
            ValidType::Integer => atom!("integer"),
            ValidType::List => atom!("list"),
            ValidType::PredicateIndicator => atom!("predicate_indicator"),
            ValidType::Variable => atom!("variable"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum DomainErrorType {
    NonEmptyList,
    NotLessThanZero,
    Order,
}

impl DomainErrorType {
    pub(crate) fn as_atom(self) -> Atom {
        match self {
            DomainErrorType::NonEmptyList => atom!("non_empty_list"),
            DomainErrorType::NotLessThanZero => atom!("not_less_than_zero"),
            DomainErrorType::Order => atom!("order"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EvalError {
    FloatOverflow,
    IntOverflow,
    Undefined,
    ZeroDivisor,
}

impl EvalError {
    pub(crate) fn as_atom(self) -> Atom {
        match self {
            EvalError::FloatOverflow => atom!("float_overflow"),
            EvalError::IntOverflow => atom!("int_overflow"),
            EvalError::Undefined => atom!("undefined"),
            EvalError::ZeroDivisor => atom!("zero_divisor"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum ExistenceError {
    Procedure(PredicateKey),
    SourceSink(Atom),
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Permission {
    Access,
    Modify,
}

impl Permission {
    pub(crate) fn as_atom(self) -> Atom {
        match self {
            Permission::Access => atom!("access"),
            Permission::Modify => atom!("modify"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum RepFlag {
    MaxArity,
}

/// Stacks whose growth failure ends a query.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    /// The frame stack.
    #[display(fmt = "frames")]
    Frames,
    /// The slot store.
    #[display(fmt = "slots")]
    Slots,
    /// The trail.
    #[display(fmt = "trail")]
    Trail,
    /// The choice-point stack.
    #[display(fmt = "choices")]
    Choices,
    /// The heap arena.
    #[display(fmt = "heap")]
    Heap,
    /// Nesting of sub-queries.
    #[display(fmt = "sub_queries")]
    SubQueries,
}

/// Errors fatal to a query. They are never seen by catch/3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// A stack could not grow.
    Resource(ResourceError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Resource(what) => write!(f, "resource error: {what} exhausted"),
        }
    }
}

impl Error for EngineError {}

impl From<ResourceError> for EngineError {
    #[inline]
    fn from(err: ResourceError) -> Self {
        EngineError::Resource(err)
    }
}

impl MachineState {
    /// The `Name/Arity` of the goal under execution, for error contexts.
    /// A fresh variable stands in when there is no goal to name.
    pub(crate) fn goal_indicator(&self, fresh: u32) -> Tree {
        self.st
            .curr_cell
            .as_ref()
            .map(|loc| self.cell(loc))
            .filter(|cell| !cell.flags.has(CellFlags::CONTROL))
            .and_then(Cell::key)
            .map_or(Tree::Var(fresh), Tree::indicator)
    }

    pub(crate) fn error_form(&self, formal: Tree) -> MachineError {
        let context = self.goal_indicator(formal.var_count() as u32);
        MachineError::from_ball(Tree::Struct(atom!("error"), vec![formal, context]))
    }

    pub(crate) fn instantiation_error(&self) -> MachineError {
        self.error_form(Tree::Atom(atom!("instantiation_error")))
    }

    pub(crate) fn type_error(&self, valid_type: ValidType, culprit: &Deref) -> MachineError {
        let culprit = self.export_culprit(culprit);
        self.type_error_tree(valid_type, culprit)
    }

    pub(crate) fn type_error_tree(&self, valid_type: ValidType, culprit: Tree) -> MachineError {
        self.error_form(Tree::Struct(
            atom!("type_error"),
            vec![Tree::Atom(valid_type.as_atom()), culprit],
        ))
    }

    pub(crate) fn domain_error(&self, domain: DomainErrorType, culprit: &Deref) -> MachineError {
        let culprit = self.export_culprit(culprit);

        self.error_form(Tree::Struct(
            atom!("domain_error"),
            vec![Tree::Atom(domain.as_atom()), culprit],
        ))
    }

    pub(crate) fn evaluation_error(&self, err: EvalError) -> MachineError {
        self.error_form(Tree::Struct(
            atom!("evaluation_error"),
            vec![Tree::Atom(err.as_atom())],
        ))
    }

    pub(crate) fn existence_error(&self, err: ExistenceError) -> MachineError {
        let (kind, culprit) = match err {
            ExistenceError::Procedure(key) => (atom!("procedure"), Tree::indicator(key)),
            ExistenceError::SourceSink(name) => (atom!("source_sink"), Tree::Atom(name)),
        };

        self.error_form(Tree::Struct(
            atom!("existence_error"),
            vec![Tree::Atom(kind), culprit],
        ))
    }

    pub(crate) fn permission_error(
        &self,
        perm: Permission,
        object_type: Atom,
        culprit: Tree,
    ) -> MachineError {
        self.error_form(Tree::Struct(
            atom!("permission_error"),
            vec![
                Tree::Atom(perm.as_atom()),
                Tree::Atom(object_type),
                culprit,
            ],
        ))
    }

    pub(crate) fn representation_error(&self, flag: RepFlag) -> MachineError {
        let flag = match flag {
            RepFlag::MaxArity => atom!("max_arity"),
        };

        self.error_form(Tree::Struct(
            atom!("representation_error"),
            vec![Tree::Atom(flag)],
        ))
    }
}

/// The term reported to the embedding program for a fatal error.
pub(crate) fn engine_error_tree(err: EngineError, what: Atom) -> Tree {
    match err {
        EngineError::Resource(_) => Tree::Struct(
            atom!("error"),
            vec![
                Tree::Struct(atom!("resource_error"), vec![Tree::Atom(what)]),
                Tree::Atom(atom!("engine")),
            ],
        ),
    }
}
