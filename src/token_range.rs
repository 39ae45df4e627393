use std::{fmt, ops::Range};

use serde::{Deserialize, Serialize};

/// A half-open `[begin, end)` interval over query tokens.
///
/// Ordering is lexicographic on `(begin, end)`, which is the order locality
/// tables are walked in.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub struct TokenRange {
    pub begin: usize,
    pub end: usize,
}

impl TokenRange {
    pub fn new(begin: usize, end: usize) -> Self {
        debug_assert!(begin <= end, "invalid token range [{begin}, {end})");
        Self { begin, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    pub fn contains(&self, token: usize) -> bool {
        self.begin <= token && token < self.end
    }

    /// Two ranges are adjacent iff one ends where the other begins.
    pub fn is_adjacent_to(&self, other: &TokenRange) -> bool {
        self.end == other.begin || other.end == self.begin
    }

    pub fn overlaps(&self, other: &TokenRange) -> bool {
        self.begin < other.end && other.begin < self.end
    }

    pub fn tokens(&self) -> Range<usize> {
        self.begin..self.end
    }
}

impl From<Range<usize>> for TokenRange {
    fn from(range: Range<usize>) -> Self {
        Self::new(range.start, range.end)
    }
}

impl fmt::Display for TokenRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}
