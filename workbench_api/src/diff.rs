use serde::{Deserialize, Serialize};

/// Line-level diff between two text contents.
///
/// An empty `lines` vector means the two sides are identical. Otherwise the
/// records cover every line of both sides in order, so unchanged lines are
/// present alongside additions and removals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TextDiff {
    /// Ordered change records.
    #[serde(default)]
    pub lines: Vec<DiffLine>,
}

impl TextDiff {
    /// A diff with no records.
    pub const fn empty() -> Self {
        Self { lines: Vec::new() }
    }

    /// Whether the two compared sides were identical.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Count of added and removed lines.
    pub fn stats(&self) -> DiffStats {
        self.lines
            .iter()
            .fold(DiffStats::ZERO, |stats, line| match line.kind {
                DiffLineKind::Added => stats.add(DiffStats::new(1, 0)),
                DiffLineKind::Removed => stats.add(DiffStats::new(0, 1)),
                DiffLineKind::Unchanged => stats,
            })
    }

    /// Records that are additions or removals.
    pub fn changes(&self) -> impl Iterator<Item = &DiffLine> + '_ {
        self.lines
            .iter()
            .filter(|line| line.kind != DiffLineKind::Unchanged)
    }
}

/// Summary information about the changes within a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DiffStats {
    /// Number of added lines.
    pub additions: u32,
    /// Number of removed lines.
    pub deletions: u32,
}

impl DiffStats {
    /// A stats instance with zero additions and deletions.
    pub const ZERO: Self = Self {
        additions: 0,
        deletions: 0,
    };

    /// Convenience constructor for explicit values.
    pub const fn new(additions: u32, deletions: u32) -> Self {
        Self {
            additions,
            deletions,
        }
    }

    /// Combine two stats structs.
    pub const fn add(self, other: Self) -> Self {
        Self {
            additions: self.additions + other.additions,
            deletions: self.deletions + other.deletions,
        }
    }
}

/// A contiguous group of changes with surrounding context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffHunk {
    /// The range header describing the hunk offsets.
    pub header: DiffRange,
    /// Line records inside the hunk.
    #[serde(default)]
    pub lines: Vec<DiffLine>,
}

/// The line number ranges referenced by a hunk header.
///
/// Start lines are 1-based; a side with zero lines reports the line after
/// which the hunk applies, as unified diffs do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffRange {
    /// Starting line number on the old side.
    pub old_start: u32,
    /// Number of lines covered on the old side.
    pub old_lines: u32,
    /// Starting line number on the new side.
    pub new_start: u32,
    /// Number of lines covered on the new side.
    pub new_lines: u32,
}

/// A single line record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    /// The role the line plays in the diff.
    pub kind: DiffLineKind,
    /// Raw text of the line, including its terminator when it has one.
    pub text: String,
    /// 1-based line number on the old side if applicable.
    #[serde(default)]
    pub old_line: Option<u32>,
    /// 1-based line number on the new side if applicable.
    #[serde(default)]
    pub new_line: Option<u32>,
}

/// Type of a line contained in a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffLineKind {
    /// Line present on both sides.
    Unchanged,
    /// Line only present on the new side.
    Added,
    /// Line only present on the old side.
    Removed,
}
