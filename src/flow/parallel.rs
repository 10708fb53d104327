//! Parallel-execution helpers
//!
//! Partition a range of work across the branches of the current group
//! (honouring any active branch filter) and optionally rendezvous when every
//! branch has finished its share. The 2-D variant covers every ordered pair
//! `(i, j)` with `i < j` by inverting the triangular pair count.

use super::branch::Branch;

/// 1-D partitioned executor: each branch handles a contiguous slice of
/// `0..total` (shifted by an optional offset).
pub struct ParallelRange<'a> {
    branch: &'a Branch,
    total: usize,
    offset: usize,
    count: usize,
    start: usize,
}

impl<'a> ParallelRange<'a> {
    /// Partitions `0..total` across the branches of the current group.
    pub fn new(branch: &'a Branch, total: usize) -> Self {
        Self::with_offset(branch, total, 0)
    }

    /// Partitions `offset..offset + total`.
    pub fn with_offset(branch: &'a Branch, total: usize, offset: usize) -> Self {
        let mut range = Self {
            branch,
            total,
            offset,
            count: 0,
            start: 0,
        };
        range.update();
        range
    }

    /// Recomputes this branch's share; call after the filter or branch count
    /// changed.
    pub fn update(&mut self) {
        let (count, start) = self.branch.split_work(self.total);
        self.count = count;
        self.start = start + self.offset;
    }

    /// This branch's share as `(count, start)`.
    pub fn share(&self) -> (usize, usize) {
        (self.count, self.start)
    }

    /// Runs `op` for every index of this branch's share. With `sync_on_end`
    /// the branch waits for the rest of the team before returning.
    pub fn execute<F>(&self, mut op: F, sync_on_end: bool)
    where
        F: FnMut(usize),
    {
        for index in (self.start..self.start + self.count).rev() {
            op(index);
        }
        if sync_on_end {
            sync(self.branch);
        }
    }
}

/// 2-D pairwise executor over `items` elements: partitions all pairs
/// `(i, j)` with `0 <= i < j < items` across the branches.
pub struct ParallelPairs<'a> {
    branch: &'a Branch,
    items: usize,
    count: usize,
    start: Option<(usize, usize)>,
}

impl<'a> ParallelPairs<'a> {
    pub fn new(branch: &'a Branch, items: usize) -> Self {
        let mut pairs = Self {
            branch,
            items,
            count: 0,
            start: None,
        };
        pairs.update();
        pairs
    }

    /// Recomputes this branch's share of the pair triangle.
    pub fn update(&mut self) {
        let size = self.items.saturating_sub(1);
        let (count, start) = self.branch.split_work(size * (size + 1) / 2);
        self.count = count;
        if count > 0 {
            // Invert the triangular sum to find the starting pair: row i
            // contributes `items - 1 - i` pairs.
            let mut remaining = start + 1;
            let mut row_len = size;
            while remaining > row_len {
                remaining -= row_len;
                row_len -= 1;
            }
            let first = size - row_len;
            self.start = Some((first, first + remaining));
        } else if self.items > 0 && self.branch.filtered_id() == Some(0) {
            // Too few pairs to go around: branch 0 still visits item 0.
            self.start = Some((0, 0));
        } else {
            self.start = None;
        }
    }

    /// Number of pairs assigned to this branch.
    pub fn pair_count(&self) -> usize {
        self.count
    }

    /// Runs `on_item` once per item whose pair row this branch opens (and
    /// for the final item), and `on_pair` for every assigned pair.
    pub fn execute<F1, F2>(&self, mut on_item: F1, mut on_pair: F2, sync_on_end: bool)
    where
        F1: FnMut(usize),
        F2: FnMut(usize, usize),
    {
        if let Some((start_i, start_j)) = self.start {
            let mut i = start_i;
            let mut j = start_j;
            let mut left = self.count;
            loop {
                if left == 0 {
                    break;
                }
                if j == i + 1 {
                    on_item(i);
                }
                while j < self.items && left > 0 {
                    on_pair(i, j);
                    j += 1;
                    left -= 1;
                }
                i += 1;
                j = i + 1;
            }
            if self.items > 0 && i == self.items - 1 {
                on_item(i);
            }
        }
        if sync_on_end {
            sync(self.branch);
        }
    }
}

fn sync(branch: &Branch) {
    branch.barrier().enter(true, branch.barrier_count());
}
