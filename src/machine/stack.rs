use crate::atom_table::*;
use crate::indexing::ClauseIter;
use crate::machine::heap::HeapMark;
use crate::machine::machine_errors::*;
use crate::types::*;

use std::rc::Rc;

/// Attribute list of a variable: `(Module, Value, ValueContext)`.
pub(crate) type AttrList = Rc<Vec<(Atom, Cell, usize)>>;

/// One activation record. Its variables live in the slot store at
/// `base .. base + nbr_slots`, and past that in the overflow region.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub(crate) prev_frame: usize,
    pub(crate) prev_cell: Option<Loc>,
    pub(crate) base: usize,
    pub(crate) nbr_vars: usize,
    pub(crate) nbr_slots: usize,
    pub(crate) overflow: Option<usize>,
    pub(crate) cgen: u64,
    pub(crate) ugen: u64,
    /// Some older binding points into this frame.
    pub(crate) shared: bool,
}

impl Frame {
    pub(crate) fn new(base: usize, nbr_vars: usize) -> Self {
        Frame {
            prev_frame: 0,
            prev_cell: None,
            base,
            nbr_vars,
            nbr_slots: nbr_vars,
            overflow: None,
            cgen: 0,
            ugen: 0,
            shared: false,
        }
    }

    #[inline]
    pub(crate) fn slot_index(&self, nbr: u32) -> Option<usize> {
        let nbr = nbr as usize;

        if nbr < self.nbr_slots {
            Some(self.base + nbr)
        } else if nbr < self.nbr_vars {
            self.overflow.map(|overflow| overflow + nbr - self.nbr_slots)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Slot {
    pub(crate) cell: Cell,
    pub(crate) ctx: usize,
    pub(crate) attrs: Option<AttrList>,
}

#[derive(Debug, Clone)]
pub(crate) enum TrailEntry {
    /// Undone by emptying the slot and restoring its prior attributes.
    Binding {
        var: VarRef,
        attrs: Option<AttrList>,
    },
    /// Undone by re-activating the catcher at this choice index.
    CatchExit { choice: usize },
    /// Undone by shrinking a frame older than the top choice point back
    /// to the variables it had before it grew.
    FrameVars {
        frame: usize,
        nbr_vars: usize,
        nbr_slots: usize,
        overflow: Option<usize>,
    },
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RunState {
    pub(crate) curr_cell: Option<Loc>,
    pub(crate) curr_frame: usize,
    pub(crate) iter: Option<ClauseIter>,
    /// The alternative a re-entered builtin resumes from.
    pub(crate) alt: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct Choice {
    pub(crate) st: RunState,
    pub(crate) fp: usize,
    pub(crate) sp: usize,
    pub(crate) tp: usize,
    pub(crate) hp: HeapMark,
    pub(crate) cgen: u64,
    pub(crate) orig_cgen: u64,
    pub(crate) ugen: u64,
    pub(crate) nbr_vars: usize,
    pub(crate) nbr_slots: usize,
    pub(crate) overflow: Option<usize>,
    pub(crate) barrier: bool,
    pub(crate) soft_cut: bool,
    pub(crate) catchme_retry: bool,
    pub(crate) catchme_exception: bool,
    pub(crate) catch_exited: bool,
    pub(crate) register_cleanup: bool,
    pub(crate) did_cleanup: bool,
    pub(crate) chk_is_det: bool,
}

/// Grows a stack by half again its capacity when full, bounded by
/// `limit` entries.
pub(crate) fn ensure_room<T>(
    stack: &mut Vec<T>,
    limit: usize,
    what: ResourceError,
) -> Result<(), ResourceError> {
    if stack.len() < stack.capacity() {
        return Ok(());
    }

    if stack.len() >= limit {
        return Err(what);
    }

    let new_cap = (stack.capacity() * 3 / 2).max(16).min(limit);

    stack
        .try_reserve_exact(new_cap - stack.len())
        .map_err(|_| what)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_is_geometric_and_bounded() {
        let mut stack: Vec<u32> = Vec::new();

        for n in 0..100 {
            ensure_room(&mut stack, 100, ResourceError::Trail).unwrap();
            stack.push(n);
        }

        assert_eq!(stack.len(), 100);
        assert!(stack.capacity() <= 100);
        assert_eq!(
            ensure_room(&mut stack, 100, ResourceError::Trail),
            Err(ResourceError::Trail)
        );
    }

    #[test]
    fn overflow_slots_follow_primary_slots() {
        let mut frame = Frame::new(10, 2);
        assert_eq!(frame.slot_index(1), Some(11));
        assert_eq!(frame.slot_index(2), None);

        frame.nbr_vars = 4;
        frame.overflow = Some(40);
        assert_eq!(frame.slot_index(2), Some(40));
        assert_eq!(frame.slot_index(3), Some(41));
    }
}
