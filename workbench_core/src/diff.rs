//! Line diffs between texts, patch application, and optional memoization.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use similar::{Algorithm, ChangeTag};

use crate::api::{DiffHunk, DiffLine, DiffLineKind, DiffRange, TextDiff};
use crate::{Error, Result};

/// Computes line diffs.
///
/// Alignment is Myers' O((N+M)·D) longest-common-subsequence search, so the
/// edit script is minimal and the output is stable for identical inputs.
/// Lines keep their terminators: `"a"` and `"a\n"` are different lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextDifferencer;

impl TextDifferencer {
    /// Construct a new differencer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Diff `old` against `new`.
    ///
    /// Identical inputs produce an empty [`TextDiff`]. Otherwise every line of
    /// both sides appears exactly once, in order.
    #[must_use]
    pub fn diff(&self, old: &str, new: &str) -> TextDiff {
        if old == new {
            return TextDiff::empty();
        }

        let diff = similar::TextDiff::configure()
            .algorithm(Algorithm::Myers)
            .diff_lines(old, new);

        let lines = diff
            .iter_all_changes()
            .map(|change| DiffLine {
                kind: match change.tag() {
                    ChangeTag::Equal => DiffLineKind::Unchanged,
                    ChangeTag::Insert => DiffLineKind::Added,
                    ChangeTag::Delete => DiffLineKind::Removed,
                },
                text: change.value().to_owned(),
                old_line: line_number(change.old_index()),
                new_line: line_number(change.new_index()),
            })
            .collect();

        TextDiff { lines }
    }

    /// Rebuild the new side of `diff` from `old`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PatchMismatch`] when an unchanged or removed record
    /// does not match `old`, or when `diff` does not consume all of `old`.
    pub fn apply(&self, old: &str, diff: &TextDiff) -> Result<String> {
        if diff.is_empty() {
            return Ok(old.to_owned());
        }

        let old_lines = split_lines(old);
        let mut output = String::with_capacity(old.len());
        let mut cursor = 0usize;

        for line in &diff.lines {
            match line.kind {
                DiffLineKind::Added => output.push_str(&line.text),
                DiffLineKind::Unchanged | DiffLineKind::Removed => {
                    if old_lines.get(cursor).copied() != Some(line.text.as_str()) {
                        return Err(mismatch(cursor));
                    }
                    if line.kind == DiffLineKind::Unchanged {
                        output.push_str(&line.text);
                    }
                    cursor += 1;
                }
            }
        }

        if cursor != old_lines.len() {
            return Err(mismatch(cursor));
        }
        Ok(output)
    }

    /// Group the changes of `diff` into hunks with `context` unchanged lines
    /// around them. Changes separated by at most `2 * context` unchanged
    /// lines share a hunk.
    #[must_use]
    pub fn hunks(&self, diff: &TextDiff, context: usize) -> Vec<DiffHunk> {
        let lines = &diff.lines;
        let changed: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.kind != DiffLineKind::Unchanged)
            .map(|(index, _)| index)
            .collect();

        let mut groups: Vec<(usize, usize)> = Vec::new();
        for index in changed {
            match groups.last_mut() {
                Some((_, last)) if index - *last - 1 <= 2 * context => *last = index,
                _ => groups.push((index, index)),
            }
        }

        groups
            .into_iter()
            .map(|(first, last)| {
                let start = first.saturating_sub(context);
                let stop = (last + context + 1).min(lines.len());
                hunk(lines, start, stop)
            })
            .collect()
    }
}

fn hunk(lines: &[DiffLine], start: usize, stop: usize) -> DiffHunk {
    let slice = &lines[start..stop];
    let count = |side: fn(&DiffLine) -> Option<u32>| {
        u32::try_from(slice.iter().filter_map(side).count()).unwrap_or(u32::MAX)
    };
    let preceding = |side: fn(&DiffLine) -> Option<u32>| {
        u32::try_from(lines[..start].iter().filter_map(side).count()).unwrap_or(u32::MAX)
    };
    let first = |side: fn(&DiffLine) -> Option<u32>| slice.iter().find_map(side);

    let old_side: fn(&DiffLine) -> Option<u32> = |line| line.old_line;
    let new_side: fn(&DiffLine) -> Option<u32> = |line| line.new_line;

    DiffHunk {
        header: DiffRange {
            old_start: first(old_side).unwrap_or_else(|| preceding(old_side)),
            old_lines: count(old_side),
            new_start: first(new_side).unwrap_or_else(|| preceding(new_side)),
            new_lines: count(new_side),
        },
        lines: slice.to_vec(),
    }
}

/// Split after every `\n`, `\r\n`, or lone `\r`: the line boundaries
/// `similar` uses, so removed and unchanged records match `old` exactly.
fn split_lines(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    let mut index = 0;
    while index < bytes.len() {
        let end = match bytes[index] {
            b'\n' => index + 1,
            b'\r' if bytes.get(index + 1) == Some(&b'\n') => index + 2,
            b'\r' => index + 1,
            _ => {
                index += 1;
                continue;
            }
        };
        lines.push(&text[start..end]);
        start = end;
        index = end;
    }
    if start < text.len() {
        lines.push(&text[start..]);
    }
    lines
}

fn line_number(index: Option<usize>) -> Option<u32> {
    index.and_then(|index| u32::try_from(index + 1).ok())
}

fn mismatch(cursor: usize) -> Error {
    Error::PatchMismatch {
        line: u32::try_from(cursor + 1).unwrap_or(u32::MAX),
    }
}

/// LRU memo of diffs keyed by the blob ids of both sides.
///
/// Blob ids are content addresses, so an entry stays valid for every
/// workspace and revision pair that resolves to the same contents.
#[derive(Debug)]
pub struct DiffCache {
    entries: Mutex<LruCache<(String, String), Arc<TextDiff>>>,
}

impl DiffCache {
    /// Cache holding up to `capacity` diffs.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Cache for a configured capacity; `None` when memoization is disabled.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Option<Self> {
        NonZeroUsize::new(capacity).map(Self::new)
    }

    /// Return the memoized diff for the pair, computing it on a miss.
    ///
    /// The computation runs without holding the cache lock.
    pub fn get_or_compute<F>(&self, old_id: &str, new_id: &str, compute: F) -> Arc<TextDiff>
    where
        F: FnOnce() -> TextDiff,
    {
        let key = (old_id.to_owned(), new_id.to_owned());
        if let Some(hit) = self.entries.lock().get(&key) {
            return Arc::clone(hit);
        }

        let diff = Arc::new(compute());
        self.entries.lock().put(key, Arc::clone(&diff));
        diff
    }

    /// Number of memoized diffs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is memoized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::DiffStats;

    fn kinds(diff: &TextDiff) -> Vec<DiffLineKind> {
        diff.lines.iter().map(|line| line.kind).collect()
    }

    #[test]
    fn identical_inputs_produce_empty_diff() {
        let differ = TextDifferencer::new();
        assert!(differ.diff("", "").is_empty());
        assert!(differ.diff("a\nb\n", "a\nb\n").is_empty());
    }

    #[test]
    fn empty_old_side_is_all_added() {
        let diff = TextDifferencer::new().diff("", "a\nb\n");
        assert_eq!(kinds(&diff), vec![DiffLineKind::Added, DiffLineKind::Added]);
        assert_eq!(diff.lines[1].new_line, Some(2));
        assert!(diff.lines[1].old_line.is_none());
    }

    #[test]
    fn empty_new_side_is_all_removed() {
        let diff = TextDifferencer::new().diff("a\nb\n", "");
        assert_eq!(
            kinds(&diff),
            vec![DiffLineKind::Removed, DiffLineKind::Removed]
        );
    }

    #[test]
    fn trailing_newline_is_a_single_line_change() {
        let diff = TextDifferencer::new().diff("a\nb", "a\nb\n");
        assert_eq!(diff.stats(), DiffStats::new(1, 1));
        assert_eq!(diff.lines[0].kind, DiffLineKind::Unchanged);
        assert_eq!(diff.lines[1].text, "b");
        assert_eq!(diff.lines[2].text, "b\n");
    }

    #[test]
    fn lines_split_on_every_terminator() {
        assert_eq!(
            split_lines("a\nb\r\nc\rd"),
            vec!["a\n", "b\r\n", "c\r", "d"]
        );
        assert_eq!(split_lines("\r\n\n"), vec!["\r\n", "\n"]);
        assert!(split_lines("").is_empty());
    }

    #[test]
    fn carriage_returns_survive_apply() -> Result<()> {
        let differ = TextDifferencer::new();
        let old = "one\rtwo\r\nthree";
        let new = "one\rTWO\r\nthree\n";
        assert_eq!(differ.apply(old, &differ.diff(old, new))?, new);
        Ok(())
    }

    #[test]
    fn line_numbers_track_both_sides() {
        let diff = TextDifferencer::new().diff("a\nb\nc\n", "a\nx\nc\n");
        let numbers: Vec<(Option<u32>, Option<u32>)> = diff
            .lines
            .iter()
            .map(|line| (line.old_line, line.new_line))
            .collect();
        assert_eq!(
            numbers,
            vec![
                (Some(1), Some(1)),
                (Some(2), None),
                (None, Some(2)),
                (Some(3), Some(3)),
            ]
        );
    }

    #[test]
    fn apply_rejects_foreign_base() {
        let differ = TextDifferencer::new();
        let diff = differ.diff("a\nb\n", "a\nc\n");
        let err = differ.apply("z\nb\n", &diff);
        assert!(matches!(err, Err(Error::PatchMismatch { line: 1 })));

        let err = differ.apply("a\nb\nextra\n", &diff);
        assert!(matches!(err, Err(Error::PatchMismatch { line: 3 })));
    }

    #[test]
    fn hunks_merge_nearby_changes() {
        let differ = TextDifferencer::new();
        let old = "1\n2\n3\n4\n5\n6\n7\n8\n9\n10\n";
        let new = "1\nX\n3\n4\n5\n6\n7\n8\nY\n10\n";

        let separate = differ.hunks(&differ.diff(old, new), 1);
        assert_eq!(separate.len(), 2);
        assert_eq!(
            separate[0].header,
            DiffRange {
                old_start: 1,
                old_lines: 3,
                new_start: 1,
                new_lines: 3,
            }
        );

        let merged = differ.hunks(&differ.diff(old, new), 3);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn pure_insertion_hunk_points_after_preceding_line() {
        let differ = TextDifferencer::new();
        let diff = differ.diff("a\nb\nc\nd\n", "a\nb\nnew\nc\nd\n");
        let hunks = differ.hunks(&diff, 0);
        assert_eq!(hunks.len(), 1);
        assert_eq!(
            hunks[0].header,
            DiffRange {
                old_start: 2,
                old_lines: 0,
                new_start: 3,
                new_lines: 1,
            }
        );
    }

    #[test]
    fn cache_reuses_entries() {
        let cache = DiffCache::with_capacity(2).expect("enabled");
        let mut computed = 0;
        for _ in 0..3 {
            let _ = cache.get_or_compute("old", "new", || {
                computed += 1;
                TextDiff::empty()
            });
        }
        assert_eq!(computed, 1);
        assert_eq!(cache.len(), 1);
        assert!(DiffCache::with_capacity(0).is_none());
    }
}
