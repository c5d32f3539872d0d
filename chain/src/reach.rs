//! Transitive closure of the staged precedence graph.

use std::ops::Range;

use log::trace;

use crate::Id;

/// Reachability matrix over a growing id space.
///
/// Cell `(i, j)` holds "`j` is transitively reachable from `i`". Edges are
/// inserted in three phases: [`stage`] updates the matrix and remembers
/// every cell it flipped, [`commit`] seals the staged delta into a history
/// stack, and [`rollback`] pops the last sealed delta and clears its cells.
/// [`reset`] abandons the current staged delta instead.
///
/// Since edges are only ever added, a staged change can never reduce
/// reachability, so restoring the exact prior state is a matter of clearing
/// the remembered cells.
///
/// [`stage`]: ReachMap::stage
/// [`commit`]: ReachMap::commit
/// [`rollback`]: ReachMap::rollback
/// [`reset`]: ReachMap::reset
#[derive(Clone, Debug, Default)]
pub struct ReachMap {
    bits: Vec<bool>,
    stride: usize,
    len: usize,
    staged_cells: Vec<(u32, u32)>,
    staged_edges: Vec<(Id, Id)>,
    history: Vec<Commit>,
}

#[derive(Clone, Debug)]
struct Commit {
    cells: Vec<(u32, u32)>,
    edges: Vec<(Id, Id)>,
}

impl ReachMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live ids.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no ids are allocated.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn cell(&self, row: u32, col: u32) -> usize {
        row as usize * self.stride + col as usize
    }

    /// Whether `succ` is transitively reachable from `pred`.
    pub fn reaches(&self, pred: Id, succ: Id) -> bool {
        debug_assert!(pred.index() < self.len && succ.index() < self.len);
        self.bits[self.cell(pred.0, succ.0)]
    }

    /// Allocate `count` fresh ids, contiguous and starting right after the
    /// most recently allocated one. Rows and columns that come back into
    /// play are zero-filled, so dropped id space can be reused safely.
    pub fn allocate(&mut self, count: usize) -> Range<u32> {
        let prev = self.len;
        self.len += count;
        // Space below `stride` may hold stale cells of dropped ids.
        let reused_top = self.len.min(self.stride);
        if prev < reused_top {
            for row in 0..self.stride {
                for col in prev..reused_top {
                    let cell = self.cell(row as u32, col as u32);
                    self.bits[cell] = false;
                }
            }
            for row in prev..reused_top {
                let start = row * self.stride;
                for bit in &mut self.bits[start..start + self.stride] {
                    *bit = false;
                }
            }
        }
        if self.len > self.stride {
            self.grow((self.stride * 2).max(self.len).max(8));
        }
        prev as u32..self.len as u32
    }

    fn grow(&mut self, new_stride: usize) {
        let mut bits = vec![false; new_stride * new_stride];
        for row in 0..self.stride {
            let src = row * self.stride;
            let dst = row * new_stride;
            bits[dst..dst + self.stride].copy_from_slice(&self.bits[src..src + self.stride]);
        }
        self.bits = bits;
        self.stride = new_stride;
    }

    /// Shrink the id space by one. Only the most recently allocated id may
    /// be dropped; its cells are left in place and zero-filled on reuse.
    pub fn drop_last(&mut self, id: Id) {
        assert_eq!(
            id.index() + 1,
            self.len,
            "only the most recently allocated id can be dropped",
        );
        self.len -= 1;
    }

    /// Try to add the edge `pred -> succ`.
    ///
    /// Fails (returns `false`, staging untouched) when the reverse edge is
    /// already present, since that would close a cycle. An edge that is
    /// already implied transitively succeeds without a map change but is
    /// still recorded for [`committed_edges`](ReachMap::committed_edges).
    pub fn stage(&mut self, pred: Id, succ: Id) -> bool {
        if self.reaches(succ, pred) {
            trace!("edge {:?} -> {:?} would close a cycle", pred, succ);
            return false;
        }
        self.staged_edges.push((pred, succ));
        if self.reaches(pred, succ) {
            return true;
        }
        // Every id reaching `pred` now also reaches everything reachable
        // from `succ`; only cells that actually flip are remembered.
        let len = self.len as u32;
        let pred_raw = pred.0;
        let succ_raw = succ.0;
        let sources: Vec<u32> = (0..len)
            .filter(|&a| a == pred_raw || self.bits[self.cell(a, pred_raw)])
            .collect();
        let sinks: Vec<u32> = (0..len)
            .filter(|&b| b == succ_raw || self.bits[self.cell(succ_raw, b)])
            .collect();
        for &a in &sources {
            for &b in &sinks {
                let cell = self.cell(a, b);
                if !self.bits[cell] {
                    self.bits[cell] = true;
                    self.staged_cells.push((a, b));
                }
            }
        }
        true
    }

    /// Abandon the staged delta, restoring the map to its state at the last
    /// commit boundary.
    pub fn reset(&mut self) {
        for &(a, b) in &self.staged_cells {
            let cell = self.cell(a, b);
            self.bits[cell] = false;
        }
        self.staged_cells.clear();
        self.staged_edges.clear();
    }

    /// Seal the staged delta into the history stack.
    pub fn commit(&mut self) {
        self.history.push(Commit {
            cells: std::mem::take(&mut self.staged_cells),
            edges: std::mem::take(&mut self.staged_edges),
        });
    }

    /// Pop the last committed delta and clear its cells. Staging must be
    /// empty when this is called.
    pub fn rollback(&mut self) {
        self.assert_staging_clear();
        let last = self
            .history
            .pop()
            .expect("rollback without a committed entry");
        self.staged_cells = last.cells;
        self.staged_edges = last.edges;
        self.reset();
    }

    /// Assert that no changes are currently staged.
    pub fn assert_staging_clear(&self) {
        assert!(
            self.staged_cells.is_empty() && self.staged_edges.is_empty(),
            "staged changes present where none are expected",
        );
    }

    /// All committed edges, in commit order. Edges that were transitively
    /// implied at staging time are included.
    pub fn committed_edges(&self) -> impl Iterator<Item = (Id, Id)> + '_ {
        self.history.iter().flat_map(|commit| commit.edges.iter().copied())
    }
}
