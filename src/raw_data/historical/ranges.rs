use std::fmt;

use serde::{Deserialize, Serialize};

/// Block a job starts from when neither the job nor the caller names one.
pub const DEFAULT_DEPLOY_BLOCK: u64 = 14_400_533;

/// Default window width (`end - start`) of a single `eth_getLogs` query.
pub const DEFAULT_WINDOW_SIZE: u64 = 100;

/// An inclusive block window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    /// The parts of this window not covered by any of `covered`, which must be
    /// sorted by start.
    pub fn subtract(&self, covered: &[BlockRange]) -> Vec<BlockRange> {
        let mut pieces = Vec::new();
        let mut next = self.start;
        for c in covered {
            if c.end < next {
                continue;
            }
            if c.start > self.end {
                break;
            }
            if c.start > next {
                pieces.push(BlockRange {
                    start: next,
                    end: c.start - 1,
                });
            }
            if c.end >= self.end {
                return pieces;
            }
            next = c.end + 1;
        }
        pieces.push(BlockRange {
            start: next,
            end: self.end,
        });
        pieces
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Lazy sequence of contiguous windows covering `[next, end]`.
///
/// Cheap to clone and fully determined by its bounds and width, so a run can
/// be resumed by building a new partition from an updated start block.
#[derive(Debug, Clone)]
pub struct BlockRanges {
    next: Option<u64>,
    end: u64,
    width: u64,
}

impl Iterator for BlockRanges {
    type Item = BlockRange;

    fn next(&mut self) -> Option<BlockRange> {
        let start = self.next?;
        let end = start.saturating_add(self.width).min(self.end);
        self.next = end.checked_add(1).filter(|n| *n <= self.end);
        Some(BlockRange { start, end })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.next {
            None => (0, Some(0)),
            Some(start) => {
                let span = (self.end - start) as u128 + 1;
                let per_window = self.width as u128 + 1;
                let count = span.div_ceil(per_window);
                let count = usize::try_from(count).unwrap_or(usize::MAX);
                (count, Some(count))
            }
        }
    }
}

/// Split `[deploy_block, end_block]` into windows whose span (`end - start`)
/// is at most `width`. Windows are ordered by start block and each one begins
/// exactly one block after the previous one ends.
///
/// Returns an empty sequence when `deploy_block > end_block`.
pub fn partition(deploy_block: u64, end_block: u64, width: u64) -> BlockRanges {
    BlockRanges {
        next: (deploy_block <= end_block).then_some(deploy_block),
        end: end_block,
        width,
    }
}
