//! Source mapping for bytecode instructions
//!
//! Each code object carries a run-length line table: an entry marks the
//! offset where a new source line begins. Line `0` means no position is
//! known for the instructions in that run.

use std::fmt;
use std::sync::Arc;

/// Represents a location in source code
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    /// Source file, when the compiler was told one
    pub file: Option<Arc<str>>,
    /// Line number (1-based)
    pub line: Option<u32>,
    /// Instruction offset inside the code object
    pub offset: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = self.file.as_deref().unwrap_or("<unknown>");
        match self.line {
            Some(line) => write!(f, "{}:{} (offset {})", file, line, self.offset),
            None => write!(f, "{} (offset {})", file, self.offset),
        }
    }
}

/// Run-length mapping from instruction offset to source line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineTable {
    runs: Vec<(u32, u32)>,
}

impl LineTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the instruction at `offset` comes from `line`
    ///
    /// Offsets must be pushed in ascending order.
    pub fn push(&mut self, offset: u32, line: u32) {
        match self.runs.last_mut() {
            Some(&mut (_, last)) if last == line => {}
            Some(run) if run.0 == offset => run.1 = line,
            _ => self.runs.push((offset, line)),
        }
    }

    /// Line of the instruction at `offset`
    pub fn line_for(&self, offset: usize) -> Option<u32> {
        let idx = self.runs.partition_point(|&(start, _)| start as usize <= offset);
        match idx.checked_sub(1).map(|i| self.runs[i].1) {
            Some(0) | None => None,
            line => line,
        }
    }

    /// The raw `(offset, line)` runs
    pub fn runs(&self) -> &[(u32, u32)] {
        &self.runs
    }

    /// Rebuild from persisted runs; `None` unless offsets strictly ascend
    pub fn from_runs(runs: Vec<(u32, u32)>) -> Option<Self> {
        if runs.windows(2).all(|w| w[0].0 < w[1].0) {
            Some(Self { runs })
        } else {
            None
        }
    }
}
