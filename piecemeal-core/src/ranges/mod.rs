//! Byte-range interval model for the sparse cache
//!
//! Provides `ByteRange`, a half-open interval over a remote file that may
//! carry downloaded bytes, and `RangeSet`, the ordered non-overlapping
//! collection the cache and the download coalescer are built on.

mod set;

use bytes::Bytes;
use serde::ser::{Serialize, SerializeStruct, Serializer};

pub use set::RangeSet;

/// Payload and precedence attached to a range.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeKind {
    /// No payload. Carries an explicit priority for overlap resolution.
    Plain {
        /// Precedence when two ranges overlap during insertion
        priority: i32,
    },
    /// Downloaded bytes. Always finite, always wins overlaps.
    Cached {
        /// The payload, exactly `length` bytes
        bytes: Bytes,
    },
}

/// A half-open span `[offset, offset + length)` of a remote file.
///
/// `length == None` means unbounded: everything from `offset` to the end
/// of the file. Zero-length ranges are valid values but are never stored
/// in a [`RangeSet`].
#[derive(Debug, Clone, PartialEq)]
pub struct ByteRange {
    offset: u64,
    length: Option<u64>,
    kind: RangeKind,
}

impl ByteRange {
    /// Creates a plain range with the default (lowest) priority.
    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self::with_priority(offset, length, 0)
    }

    /// Creates a plain range with an explicit priority.
    pub fn with_priority(offset: u64, length: Option<u64>, priority: i32) -> Self {
        Self {
            offset,
            length,
            kind: RangeKind::Plain { priority },
        }
    }

    /// Creates a range carrying downloaded bytes.
    ///
    /// The length is exactly the payload length; cached ranges are never
    /// unbounded.
    pub fn cached(offset: u64, bytes: Bytes) -> Self {
        let length = bytes.len() as u64;
        Self {
            offset,
            length: Some(length),
            kind: RangeKind::Cached { bytes },
        }
    }

    /// Start offset of the range.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Length in bytes, or `None` for "to end of file".
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// First offset past the range, or `None` when unbounded.
    pub fn after_offset(&self) -> Option<u64> {
        self.length.map(|length| self.offset + length)
    }

    /// Whether the range extends to the end of the file.
    pub fn is_unbounded(&self) -> bool {
        self.length.is_none()
    }

    /// The payload, when this range carries downloaded bytes.
    pub fn bytes(&self) -> Option<&Bytes> {
        match &self.kind {
            RangeKind::Cached { bytes } => Some(bytes),
            RangeKind::Plain { .. } => None,
        }
    }

    /// The payload-free priority, when this range is plain.
    pub fn plain_priority(&self) -> Option<i32> {
        match &self.kind {
            RangeKind::Plain { priority } => Some(*priority),
            RangeKind::Cached { .. } => None,
        }
    }

    /// Whether `offset` falls inside the range.
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.offset
            && match self.after_offset() {
                Some(after) => offset < after,
                None => true,
            }
    }

    /// Overlap resolution rule used by [`RangeSet::put`].
    ///
    /// Cached ranges take the overlapping region unconditionally, ties
    /// included. A plain range takes it only with strictly greater
    /// priority than the incumbent; equal priority keeps the existing
    /// owner.
    pub fn wins_over(&self, incumbent: &ByteRange) -> bool {
        match (&self.kind, &incumbent.kind) {
            (RangeKind::Cached { .. }, _) => true,
            (RangeKind::Plain { .. }, RangeKind::Cached { .. }) => false,
            (RangeKind::Plain { priority }, RangeKind::Plain { priority: other }) => {
                priority > other
            }
        }
    }

    /// Whether the range extends strictly past `offset`.
    pub(crate) fn extends_past(&self, offset: u64) -> bool {
        match self.after_offset() {
            Some(after) => after > offset,
            None => true,
        }
    }

    /// Whether two ranges share at least one byte.
    pub(crate) fn overlaps(&self, other: &ByteRange) -> bool {
        self.extends_past(other.offset) && other.extends_past(self.offset)
    }

    /// Adjacent plain ranges with equal priority collapse into one;
    /// payload ranges never merge with anything.
    pub(crate) fn can_coalesce_with(&self, next: &ByteRange) -> bool {
        match (&self.kind, &next.kind) {
            (RangeKind::Plain { priority }, RangeKind::Plain { priority: other }) => {
                priority == other
            }
            _ => false,
        }
    }

    /// Clipped copy of the range starting `rel_offset` bytes in.
    ///
    /// `rel_length == None` keeps everything up to the range's own end.
    /// Both arguments are clamped to the range, so the result always has
    /// a valid non-negative extent; payload buffers are sliced to match.
    pub(crate) fn subrange(&self, rel_offset: u64, rel_length: Option<u64>) -> ByteRange {
        let rel_offset = match self.length {
            Some(length) => rel_offset.min(length),
            None => rel_offset,
        };
        let offset = self.offset + rel_offset;
        let length = match (rel_length, self.after_offset()) {
            (Some(want), Some(after)) => Some(want.min(after - offset)),
            (Some(want), None) => Some(want),
            (None, Some(after)) => Some(after - offset),
            (None, None) => None,
        };
        let kind = match &self.kind {
            RangeKind::Plain { priority } => RangeKind::Plain {
                priority: *priority,
            },
            RangeKind::Cached { bytes } => {
                // Cached ranges are always finite, so `length` is Some here.
                let start = rel_offset as usize;
                let end = start + length.unwrap_or(0) as usize;
                RangeKind::Cached {
                    bytes: bytes.slice(start..end),
                }
            }
        };
        ByteRange {
            offset,
            length,
            kind,
        }
    }
}

impl Serialize for ByteRange {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("ByteRange", 3)?;
        state.serialize_field("offset", &self.offset)?;
        if let Some(length) = self.length {
            state.serialize_field("length", &length)?;
        }
        match &self.kind {
            RangeKind::Plain { priority } if *priority != 0 => {
                state.serialize_field("priority", priority)?;
            }
            RangeKind::Plain { .. } => {}
            RangeKind::Cached { .. } => {
                state.serialize_field("cached", &true)?;
            }
        }
        state.end()
    }
}
