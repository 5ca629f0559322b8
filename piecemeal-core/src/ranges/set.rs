//! Ordered, non-overlapping collection of byte ranges
//!
//! The single data structure behind both the cache contents and the
//! missing-range bookkeeping of in-flight reads. Insertion resolves
//! overlaps by priority, trimming the losing side into at most a left
//! and a right remainder; removal trims the same way without inserting.

use std::cmp::Ordering;

use serde::ser::{Serialize, Serializer};
use tracing::warn;

use super::ByteRange;

/// Sorted set of pairwise non-overlapping byte ranges.
///
/// Invariants: ranges are ordered by offset and never overlap; adjacent
/// plain ranges with equal priority are kept merged; payload ranges never
/// merge with anything. Trimming and splitting cannot fail — every split
/// has a valid non-negative length.
#[derive(Debug, Clone, Default)]
pub struct RangeSet {
    ranges: Vec<ByteRange>,
}

impl RangeSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored ranges, in offset order.
    pub fn ranges(&self) -> &[ByteRange] {
        &self.ranges
    }

    /// Number of stored ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Whether the set stores nothing.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Whether any stored range extends to the end of the file.
    pub fn has_unbounded(&self) -> bool {
        self.ranges.iter().any(ByteRange::is_unbounded)
    }

    /// Binary search for the range containing `offset`.
    ///
    /// Returns `Ok(index)` of the containing range, or `Err(index)` with
    /// the insertion point when no stored range contains the offset.
    pub fn find_index_for_offset(&self, offset: u64) -> Result<usize, usize> {
        self.ranges.binary_search_by(|range| {
            if range.contains(offset) {
                Ordering::Equal
            } else if offset < range.offset() {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        })
    }

    /// Inserts `range`, resolving every overlap via [`ByteRange::wins_over`].
    ///
    /// Where the incoming range wins, overlapped incumbents are trimmed to
    /// their non-overlapping remainders (payloads sliced to match); where
    /// it loses, the incoming range keeps only its non-overlapping parts.
    /// Inserting an unbounded range that wins clears everything at or
    /// after its start. Zero-length ranges are no-ops.
    pub fn put(&mut self, range: ByteRange) {
        if range.length() == Some(0) {
            return;
        }
        let lo = self.find_index_for_offset(range.offset()).unwrap_or_else(|i| i);
        let mut replacement: Vec<ByteRange> = Vec::new();
        let mut pending = Some(range);
        let mut tail: Option<ByteRange> = None;
        let mut hi = lo;

        while hi < self.ranges.len() {
            let Some(current) = pending.take() else {
                break;
            };
            let existing = &self.ranges[hi];
            if !current.overlaps(existing) {
                pending = Some(current);
                break;
            }
            if current.wins_over(existing) {
                if existing.offset() < current.offset() {
                    replacement
                        .push(existing.subrange(0, Some(current.offset() - existing.offset())));
                }
                if let Some(after) = current.after_offset() {
                    if existing.extends_past(after) {
                        // Only the last overlapped incumbent can stick out
                        // past the incoming range's end.
                        tail = Some(existing.subrange(after - existing.offset(), None));
                    }
                }
                pending = Some(current);
            } else {
                if current.offset() < existing.offset() {
                    replacement
                        .push(current.subrange(0, Some(existing.offset() - current.offset())));
                }
                replacement.push(existing.clone());
                pending = existing.after_offset().and_then(|after| {
                    let rest = current.subrange(after - current.offset(), None);
                    (rest.length() != Some(0)).then_some(rest)
                });
            }
            hi += 1;
        }

        if let Some(rest) = pending {
            if rest.length() != Some(0) {
                replacement.push(rest);
            }
        }
        if let Some(rest) = tail {
            replacement.push(rest);
        }

        let added = replacement.len();
        self.ranges.splice(lo..hi, replacement);
        self.coalesce_window(lo, lo + added + 1);
    }

    /// Removes the portion of the set overlapping `range`, trimming
    /// boundary ranges. Zero-length ranges are no-ops.
    pub fn clear(&mut self, range: &ByteRange) {
        if range.length() == Some(0) {
            return;
        }
        let lo = self.find_index_for_offset(range.offset()).unwrap_or_else(|i| i);
        let mut replacement: Vec<ByteRange> = Vec::new();
        let mut hi = lo;

        while hi < self.ranges.len() {
            let existing = &self.ranges[hi];
            if !range.overlaps(existing) {
                break;
            }
            if existing.offset() < range.offset() {
                replacement.push(existing.subrange(0, Some(range.offset() - existing.offset())));
            }
            if let Some(after) = range.after_offset() {
                if existing.extends_past(after) {
                    replacement.push(existing.subrange(after - existing.offset(), None));
                }
            }
            hi += 1;
        }

        self.ranges.splice(lo..hi, replacement);
    }

    /// Empties the set.
    pub fn clear_all(&mut self) {
        self.ranges.clear();
    }

    /// Read-only clipped view of the stored ranges intersecting
    /// `[start_offset, end_offset)`.
    ///
    /// Payloads in the result are zero-copy slices of the stored buffers.
    /// `end_offset <= start_offset` yields an empty set; a reversed pair
    /// is logged, since this takes two offsets rather than an offset and
    /// a length.
    pub fn slice(&self, start_offset: u64, end_offset: u64) -> RangeSet {
        let mut out = RangeSet::new();
        if end_offset <= start_offset {
            if end_offset < start_offset {
                warn!(
                    start_offset,
                    end_offset, "slice() takes two offsets, not an offset and a length"
                );
            }
            return out;
        }
        let mut i = self
            .find_index_for_offset(start_offset)
            .unwrap_or_else(|i| i);
        while let Some(range) = self.ranges.get(i) {
            if range.offset() >= end_offset {
                break;
            }
            let clip_start = range.offset().max(start_offset);
            let clip_end = match range.after_offset() {
                Some(after) => after.min(end_offset),
                None => end_offset,
            };
            out.ranges
                .push(range.subrange(clip_start - range.offset(), Some(clip_end - clip_start)));
            i += 1;
        }
        out
    }

    /// Sum of the finite lengths of every stored range.
    ///
    /// Unbounded ranges contribute nothing; they have no length to add.
    pub fn total_length(&self) -> u64 {
        self.ranges.iter().filter_map(ByteRange::length).sum()
    }

    /// Sum of the finite lengths of the stored ranges matching `condition`.
    pub fn total_length_where<F>(&self, condition: F) -> u64
    where
        F: Fn(&ByteRange) -> bool,
    {
        self.ranges
            .iter()
            .filter(|range| condition(range))
            .filter_map(ByteRange::length)
            .sum()
    }

    /// End of the contiguous stored run covering `offset`, walking across
    /// exactly-adjacent ranges.
    ///
    /// Returns `None` when no stored range contains `offset` or the run
    /// has no finite end.
    pub fn contiguous_end(&self, offset: u64) -> Option<u64> {
        let mut i = self.find_index_for_offset(offset).ok()?;
        let mut end = self.ranges[i].after_offset()?;
        while let Some(next) = self.ranges.get(i + 1) {
            if next.offset() != end {
                break;
            }
            end = next.after_offset()?;
            i += 1;
        }
        Some(end)
    }

    /// Merges exactly-adjacent coalescable neighbors inside the window
    /// `[from - 1, to]`, keeping the merge pass local to a mutation.
    fn coalesce_window(&mut self, from: usize, to: usize) {
        let mut i = from.saturating_sub(1);
        let mut end = to;
        while i + 1 < self.ranges.len() && i < end {
            let merged = {
                let a = &self.ranges[i];
                let b = &self.ranges[i + 1];
                if a.after_offset() == Some(b.offset()) && a.can_coalesce_with(b) {
                    let length = match (a.length(), b.length()) {
                        (Some(x), Some(y)) => Some(x + y),
                        _ => None,
                    };
                    a.plain_priority()
                        .map(|priority| ByteRange::with_priority(a.offset(), length, priority))
                } else {
                    None
                }
            };
            match merged {
                Some(range) => {
                    self.ranges[i] = range;
                    self.ranges.remove(i + 1);
                    end = end.saturating_sub(1);
                }
                None => i += 1,
            }
        }
    }
}

impl Serialize for RangeSet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.ranges.iter())
    }
}
