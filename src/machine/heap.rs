use crate::machine::machine_errors::*;
use crate::types::*;

/// A position in the arena: the number of live chunks and the fill of
/// the last one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct HeapMark {
    pub(crate) chunks: usize,
    pub(crate) hp: usize,
}

/// Bump-allocated term storage. Terms never span chunks, so a `Loc`
/// into the heap stays valid until a trim releases its chunk.
#[derive(Debug)]
pub(crate) struct Heap {
    chunks: Vec<Vec<Cell>>,
    chunk_size: usize,
    limit: usize,
    used: usize,
}

impl Heap {
    pub(crate) fn new(chunk_size: usize, limit: usize) -> Self {
        Heap {
            chunks: vec![],
            chunk_size: chunk_size.max(1),
            limit,
            used: 0,
        }
    }

    #[inline]
    pub(crate) fn mark(&self) -> HeapMark {
        HeapMark {
            chunks: self.chunks.len(),
            hp: self.chunks.last().map_or(0, Vec::len),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.used
    }

    /// Copies a term into the arena. Local continuations in the cells are
    /// relative to the start of `cells` and get rebased to the placement.
    pub(crate) fn alloc(&mut self, cells: Vec<Cell>) -> Result<Loc, ResourceError> {
        let n = cells.len();

        if self.used + n > self.limit {
            return Err(ResourceError::Heap);
        }

        let fits = self
            .chunks
            .last()
            .is_some_and(|chunk| chunk.capacity() - chunk.len() >= n);

        if !fits {
            let mut chunk = Vec::new();

            chunk
                .try_reserve_exact(self.chunk_size.max(n))
                .map_err(|_| ResourceError::Heap)?;

            self.chunks.push(chunk);
        }

        let chunk_nbr = self.chunks.len() - 1;
        let chunk = &mut self.chunks[chunk_nbr];
        let base = chunk.len();

        chunk.extend(cells.into_iter().map(|mut cell| {
            if let Value::End {
                cont: Cont::Local(ref mut off),
                ..
            } = cell.val
            {
                *off += base;
            }

            cell
        }));

        self.used += n;
        Ok(Loc::heap(chunk_nbr, base))
    }

    /// Releases everything allocated after `mark`, dropping the payloads
    /// and any chunks left wholly unused.
    pub(crate) fn trim(&mut self, mark: HeapMark) {
        if mark.chunks == 0 {
            self.chunks.clear();
            self.used = 0;
            return;
        }

        if mark.chunks > self.chunks.len() {
            return;
        }

        self.chunks.truncate(mark.chunks);

        if let Some(last) = self.chunks.last_mut() {
            last.truncate(mark.hp);
        }

        self.used = self.chunks.iter().map(Vec::len).sum();
    }

    #[inline]
    pub(crate) fn cell(&self, chunk: usize, off: usize) -> &Cell {
        &self.chunks[chunk][off]
    }

    /// The cell at `loc`, which lies either in the arena or in a
    /// compiled clause the location keeps alive.
    #[inline]
    pub(crate) fn at<'a>(&'a self, loc: &'a Loc) -> &'a Cell {
        match loc.block {
            Block::Heap(chunk) => self.cell(chunk, loc.off),
            Block::Code(ref term) => &term.cells[loc.off],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_releases_cells_after_mark() {
        let mut heap = Heap::new(4, 1 << 20);

        heap.alloc(vec![Cell::fixnum(1), Cell::fixnum(2)]).unwrap();
        let mark = heap.mark();

        let loc = heap
            .alloc(vec![Cell::fixnum(3), Cell::fixnum(4), Cell::fixnum(5)])
            .unwrap();

        // a second chunk since the first cannot fit three more cells
        assert_eq!(loc.off, 0);
        assert_eq!(heap.len(), 5);

        heap.trim(mark);
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.mark(), mark);
    }

    #[test]
    fn local_continuations_are_rebased() {
        let mut heap = Heap::new(16, 1 << 20);

        heap.alloc(vec![Cell::fixnum(0), Cell::fixnum(0)]).unwrap();
        let loc = heap
            .alloc(vec![Cell::atom(atom!("true")), Cell::end(Cont::Local(0), None)])
            .unwrap();

        let end = loc.offset(1);

        match &heap.at(&end).val {
            Value::End {
                cont: Cont::Local(off),
                ..
            } => assert_eq!(*off, 2),
            _ => panic!("expected an end cell"),
        }
    }

    #[test]
    fn allocation_respects_limit() {
        let mut heap = Heap::new(4, 3);

        assert!(heap.alloc(vec![Cell::fixnum(1); 2]).is_ok());
        assert_eq!(
            heap.alloc(vec![Cell::fixnum(1); 2]).map(|_| ()),
            Err(ResourceError::Heap)
        );
    }
}
