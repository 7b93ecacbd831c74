use serde::Serialize;
use std::fmt;

/// Inclusive block range handed to one extraction run. `start <= end` always
/// holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BlockRange {
    start: u64,
    end: u64,
}

impl BlockRange {
    pub fn new(start: u64, end: u64) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Next range that is at least `confirmation_lag` blocks behind `tip`.
///
/// Returns `None` when nothing is safe to process yet, including when the
/// ledger is shorter than the lag itself.
pub fn next_window(
    tip: u64,
    confirmation_lag: u64,
    start_block: u64,
    max_window_blocks: Option<u64>,
) -> Option<BlockRange> {
    let safe_end = tip.checked_sub(confirmation_lag)?;
    let end = match max_window_blocks {
        Some(cap) if cap > 0 => safe_end.min(start_block.saturating_add(cap - 1)),
        _ => safe_end,
    };
    BlockRange::new(start_block, end)
}
