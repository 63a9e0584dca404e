use crate::atom_table::*;
use crate::forms::*;
use crate::machine::machine_errors::CallResult;
use crate::machine::machine_state::MachineState;

use dashu::{Integer, Rational};
use ordered_float::OrderedFloat;

use std::fmt;
use std::rc::Rc;

pub(crate) type BuiltinFn = fn(&mut MachineState) -> CallResult;

/// A native predicate attached to a goal cell.
#[derive(Clone, Copy)]
pub(crate) struct Builtin {
    pub(crate) name: Atom,
    pub(crate) arity: usize,
    pub(crate) f: BuiltinFn,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Builtin({:?}/{})", self.name, self.arity)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CellFlags(u8);

impl CellFlags {
    /// The last goal of a clause body, naming the clause's own predicate.
    pub(crate) const TAIL_REC: u8 = 1 << 0;
    /// Control construct header laid out inline by the compiler.
    pub(crate) const CONTROL: u8 = 1 << 1;

    #[inline]
    pub(crate) fn has(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    #[inline]
    pub(crate) fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Block {
    Code(Rc<CompiledTerm>),
    Heap(usize),
}

/// A stable handle to a cell: the block holding it and its offset.
#[derive(Debug, Clone)]
pub(crate) struct Loc {
    pub(crate) block: Block,
    pub(crate) off: usize,
}

impl Loc {
    #[inline]
    pub(crate) fn code(term: &Rc<CompiledTerm>, off: usize) -> Self {
        Loc {
            block: Block::Code(term.clone()),
            off,
        }
    }

    #[inline]
    pub(crate) fn heap(chunk: usize, off: usize) -> Self {
        Loc {
            block: Block::Heap(chunk),
            off,
        }
    }

    #[inline]
    pub(crate) fn at(&self, off: usize) -> Self {
        Loc {
            block: self.block.clone(),
            off,
        }
    }

    #[inline]
    pub(crate) fn offset(&self, n: usize) -> Self {
        self.at(self.off + n)
    }
}

impl PartialEq for Loc {
    fn eq(&self, other: &Loc) -> bool {
        if self.off != other.off {
            return false;
        }

        match (&self.block, &other.block) {
            (Block::Code(t1), Block::Code(t2)) => Rc::ptr_eq(t1, t2),
            (Block::Heap(c1), Block::Heap(c2)) => c1 == c2,
            _ => false,
        }
    }
}

/// Where control goes once an End cell is reached.
#[derive(Debug, Clone)]
pub(crate) enum Cont {
    /// The clause body is exhausted; resume the calling frame.
    Return,
    /// Continue at an offset of the block holding the End cell.
    Local(usize),
    /// Continue at an arbitrary cell.
    To(Loc),
}

#[derive(Debug, Clone)]
pub(crate) enum Value {
    Empty,
    Var(u32),
    /// An atom, or the functor of a compound when the cell's arity is nonzero.
    Atom(Atom),
    Str(Rc<str>),
    Fixnum(i64),
    Integer(Rc<Integer>),
    Rational(Rc<Rational>),
    Float(OrderedFloat<f64>),
    Indirect(Loc),
    End { cont: Cont, cgen: Option<u64> },
}

#[derive(Debug, Clone)]
pub(crate) struct Cell {
    pub(crate) val: Value,
    pub(crate) arity: u32,
    pub(crate) nbr_cells: u32,
    pub(crate) flags: CellFlags,
    pub(crate) builtin: Option<Builtin>,
}

impl Default for Cell {
    #[inline]
    fn default() -> Self {
        Cell::empty()
    }
}

impl Cell {
    #[inline]
    fn leaf(val: Value) -> Self {
        Cell {
            val,
            arity: 0,
            nbr_cells: 1,
            flags: CellFlags::default(),
            builtin: None,
        }
    }

    #[inline]
    pub(crate) fn empty() -> Self {
        Cell::leaf(Value::Empty)
    }

    #[inline]
    pub(crate) fn var(nbr: u32) -> Self {
        Cell::leaf(Value::Var(nbr))
    }

    #[inline]
    pub(crate) fn atom(name: Atom) -> Self {
        Cell::leaf(Value::Atom(name))
    }

    #[inline]
    pub(crate) fn functor(name: Atom, arity: usize, nbr_cells: usize) -> Self {
        Cell {
            val: Value::Atom(name),
            arity: arity as u32,
            nbr_cells: nbr_cells as u32,
            flags: CellFlags::default(),
            builtin: None,
        }
    }

    #[inline]
    pub(crate) fn fixnum(n: i64) -> Self {
        Cell::leaf(Value::Fixnum(n))
    }

    /// Big integers that fit a fixnum are always stored as one, so that
    /// equal values share a representation.
    pub(crate) fn integer(n: Integer) -> Self {
        match i64::try_from(&n) {
            Ok(n) => Cell::fixnum(n),
            Err(_) => Cell::leaf(Value::Integer(Rc::new(n))),
        }
    }

    pub(crate) fn rational(r: Rational) -> Self {
        if r.denominator().is_one() {
            let (num, _) = r.into_parts();
            Cell::integer(num)
        } else {
            Cell::leaf(Value::Rational(Rc::new(r)))
        }
    }

    #[inline]
    pub(crate) fn float(f: f64) -> Self {
        Cell::leaf(Value::Float(OrderedFloat(f)))
    }

    #[inline]
    pub(crate) fn string(s: Rc<str>) -> Self {
        Cell::leaf(Value::Str(s))
    }

    #[inline]
    pub(crate) fn indirect(loc: Loc) -> Self {
        Cell::leaf(Value::Indirect(loc))
    }

    #[inline]
    pub(crate) fn end(cont: Cont, cgen: Option<u64>) -> Self {
        Cell::leaf(Value::End { cont, cgen })
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        matches!(self.val, Value::Empty)
    }

    #[inline]
    pub(crate) fn is_var(&self) -> bool {
        matches!(self.val, Value::Var(_))
    }

    #[inline]
    pub(crate) fn is_end(&self) -> bool {
        matches!(self.val, Value::End { .. })
    }

    #[inline]
    pub(crate) fn name(&self) -> Option<Atom> {
        match self.val {
            Value::Atom(name) => Some(name),
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn is_atom(&self) -> bool {
        self.arity == 0 && matches!(self.val, Value::Atom(_))
    }

    #[inline]
    pub(crate) fn is_callable(&self) -> bool {
        matches!(self.val, Value::Atom(_))
    }

    #[inline]
    pub(crate) fn is_number(&self) -> bool {
        matches!(
            self.val,
            Value::Fixnum(_) | Value::Integer(_) | Value::Rational(_) | Value::Float(_)
        )
    }

    #[inline]
    pub(crate) fn is_integer(&self) -> bool {
        matches!(self.val, Value::Fixnum(_) | Value::Integer(_))
    }

    #[inline]
    pub(crate) fn is_list_cons(&self) -> bool {
        self.arity == 2 && self.name() == Some(atom!("."))
    }

    #[inline]
    pub(crate) fn is_nil(&self) -> bool {
        self.arity == 0 && self.name() == Some(atom!("[]"))
    }

    #[inline]
    pub(crate) fn key(&self) -> Option<PredicateKey> {
        self.name().map(|name| (name, self.arity as usize))
    }
}

/// A variable addressed by its binding context (frame) and index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct VarRef {
    pub(crate) ctx: usize,
    pub(crate) nbr: u32,
}

/// A dereferenced term, always carried with the context it lives in.
#[derive(Debug, Clone)]
pub(crate) enum Deref {
    Var(VarRef),
    Const(Cell),
    Struct(Loc, usize),
}

impl Deref {
    #[inline]
    pub(crate) fn is_var(&self) -> bool {
        matches!(self, Deref::Var(_))
    }
}
