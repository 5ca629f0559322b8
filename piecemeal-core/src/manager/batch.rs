//! Coalescing batch of missing ranges awaiting dispatch
//!
//! Misses from concurrent reads accumulate here during the coalescing
//! window instead of firing one request each. Small batches are padded up
//! to a minimum request size before dispatch so scattered little reads do
//! not turn into swarms of tiny HTTP requests.

use tracing::debug;

use crate::ranges::{ByteRange, RangeSet};
use crate::transport::RequestRange;

/// Missing ranges pending submission to one transport.
pub(crate) struct DownloadBatch {
    id: u64,
    ranges: RangeSet,
}

impl DownloadBatch {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            ranges: RangeSet::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Adds a missing span; overlapping and adjacent spans collapse into
    /// the set's union.
    pub fn add(&mut self, range: RequestRange) {
        self.ranges.put(ByteRange::new(range.offset, range.length));
    }

    /// The request list for this batch, padded up to `min_request_size`.
    ///
    /// Padding fills the gaps between queued spans left to right, capped
    /// at the remaining deficit, then extends past the end of the last
    /// span. Batches containing an open-ended span are never padded —
    /// they already reach the end of the file.
    pub fn padded_ranges(&self, min_request_size: u64) -> Vec<RequestRange> {
        let mut out: Vec<RequestRange> = self
            .ranges
            .ranges()
            .iter()
            .map(|range| RequestRange {
                offset: range.offset(),
                length: range.length(),
            })
            .collect();
        if out.is_empty() || self.ranges.has_unbounded() {
            return out;
        }
        let total = self.ranges.total_length();
        if total >= min_request_size {
            return out;
        }
        let mut deficit = min_request_size - total;
        debug!(
            batch_id = self.id,
            total, deficit, "padding undersized batch to the minimum request size"
        );

        for i in 1..out.len() {
            if deficit == 0 {
                break;
            }
            let Some(prev_end) = out[i - 1].end() else {
                continue;
            };
            let pad = (out[i].offset - prev_end).min(deficit);
            if pad > 0 {
                if let Some(length) = out[i - 1].length {
                    out[i - 1].length = Some(length + pad);
                }
                deficit -= pad;
            }
        }
        if deficit > 0 {
            if let Some(last) = out.last_mut() {
                if let Some(length) = last.length {
                    last.length = Some(length + deficit);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: u64 = 16 * 1024;

    fn total_of(ranges: &[RequestRange]) -> u64 {
        ranges.iter().filter_map(|r| r.length).sum()
    }

    #[test]
    fn test_tiny_batch_extends_past_its_end() {
        let mut batch = DownloadBatch::new(1);
        batch.add(RequestRange::bounded(100, 10));

        let padded = batch.padded_ranges(MIN);
        assert_eq!(padded, vec![RequestRange::bounded(100, MIN)]);
    }

    #[test]
    fn test_gaps_fill_before_extending() {
        let mut batch = DownloadBatch::new(1);
        batch.add(RequestRange::bounded(0, 1000));
        batch.add(RequestRange::bounded(2000, 1000));

        let padded = batch.padded_ranges(MIN);
        // The 1000-byte gap fills first, then the tail extends to cover
        // the rest of the deficit.
        assert_eq!(padded[0], RequestRange::bounded(0, 2000));
        assert_eq!(padded[1].offset, 2000);
        assert_eq!(total_of(&padded), MIN);
    }

    #[test]
    fn test_huge_gap_is_filled_only_up_to_the_deficit() {
        let mut batch = DownloadBatch::new(1);
        batch.add(RequestRange::bounded(0, 1000));
        batch.add(RequestRange::bounded(1_000_000, 1000));

        let padded = batch.padded_ranges(MIN);
        assert_eq!(padded.len(), 2);
        assert_eq!(padded[0], RequestRange::bounded(0, 1000 + (MIN - 2000)));
        assert_eq!(padded[1], RequestRange::bounded(1_000_000, 1000));
    }

    #[test]
    fn test_large_batch_is_left_alone() {
        let mut batch = DownloadBatch::new(1);
        batch.add(RequestRange::bounded(0, MIN * 2));

        let padded = batch.padded_ranges(MIN);
        assert_eq!(padded, vec![RequestRange::bounded(0, MIN * 2)]);
    }

    #[test]
    fn test_unbounded_batch_is_never_padded() {
        let mut batch = DownloadBatch::new(1);
        batch.add(RequestRange::bounded(0, 10));
        batch.add(RequestRange::unbounded(5000));

        let padded = batch.padded_ranges(MIN);
        assert_eq!(
            padded,
            vec![RequestRange::bounded(0, 10), RequestRange::unbounded(5000)]
        );
    }

    #[test]
    fn test_overlapping_misses_collapse() {
        let mut batch = DownloadBatch::new(1);
        batch.add(RequestRange::bounded(0, 100));
        batch.add(RequestRange::bounded(50, 100));
        batch.add(RequestRange::bounded(150, 50));

        let padded = batch.padded_ranges(0);
        assert_eq!(padded, vec![RequestRange::bounded(0, 200)]);
    }

    #[test]
    fn test_empty_batch_stays_empty() {
        let batch = DownloadBatch::new(1);
        assert!(batch.padded_ranges(MIN).is_empty());
    }
}
