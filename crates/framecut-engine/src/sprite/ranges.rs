// crates/framecut-engine/src/sprite/ranges.rs
//
// Which parts of a source already have thumbnails. Closed microsecond
// intervals, kept sorted and non-overlapping: adding a range merges with
// every neighbour it touches.

/// Sorted, non-overlapping set of closed `[start, end]` intervals.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GeneratedRanges {
    ranges: Vec<(i64, i64)>,
}

impl GeneratedRanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `[start, end]` as generated, merging overlapping and touching
    /// neighbours so the set stays sorted and disjoint.
    pub fn add(&mut self, start: i64, end: i64) {
        debug_assert!(start <= end);
        let (mut start, mut end) = (start.min(end), start.max(end));

        let mut merged = Vec::with_capacity(self.ranges.len() + 1);
        let mut placed = false;
        for &(s, e) in &self.ranges {
            if e < start || s > end {
                if !placed && s > end {
                    merged.push((start, end));
                    placed = true;
                }
                merged.push((s, e));
            } else {
                start = start.min(s);
                end = end.max(e);
            }
        }
        if !placed {
            merged.push((start, end));
        }
        self.ranges = merged;
    }

    /// True when `t` lies inside a generated interval.
    pub fn contains(&self, t: i64) -> bool {
        let idx = self.ranges.partition_point(|&(s, _)| s <= t);
        idx.checked_sub(1)
            .map(|i| self.ranges[i].1 >= t)
            .unwrap_or(false)
    }

    /// True when one generated interval covers all of `[start, end]`.
    pub fn covers(&self, start: i64, end: i64) -> bool {
        let idx = self.ranges.partition_point(|&(s, _)| s <= start);
        idx.checked_sub(1)
            .map(|i| self.ranges[i].1 >= end)
            .unwrap_or(false)
    }

    pub fn ranges(&self) -> &[(i64, i64)] {
        &self.ranges
    }
}
