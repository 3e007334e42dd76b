// Pending-range bookkeeping: which byte spans of the resource are not yet local.

/// Inclusive byte span `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: u64,
    pub end: u64,
}

impl Interval {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "empty interval {}-{}", start, end);
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn contains(&self, position: u64) -> bool {
        self.start <= position && position <= self.end
    }
}

/// Sorted, pairwise disjoint set of non-empty pending intervals.
///
/// Starts out covering the whole resource and only ever loses bytes; a split
/// rearranges an interval without changing the pending total.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingRanges {
    ranges: Vec<Interval>,
}

impl PendingRanges {
    pub fn new(length: u64) -> Self {
        let ranges = if length == 0 {
            Vec::new()
        } else {
            vec![Interval::new(0, length - 1)]
        };
        Self { ranges }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn get(&self, index: usize) -> Option<Interval> {
        self.ranges.get(index).copied()
    }

    pub fn as_slice(&self) -> &[Interval] {
        &self.ranges
    }

    /// Total number of bytes still pending.
    pub fn pending_bytes(&self) -> u64 {
        self.ranges.iter().map(Interval::len).sum()
    }

    /// Index of the first interval whose end is at or after `position`.
    ///
    /// With `wrap`, falls back to the first interval when nothing is pending
    /// at or after `position`.
    pub fn find_at_or_after(&self, position: u64, wrap: bool) -> Option<usize> {
        let index = self.ranges.partition_point(|r| r.end < position);
        if index < self.ranges.len() {
            Some(index)
        } else if wrap && !self.ranges.is_empty() {
            Some(0)
        } else {
            None
        }
    }

    /// Interval containing `position`, if that byte is pending.
    pub fn covering(&self, position: u64) -> Option<Interval> {
        self.find_at_or_after(position, false)
            .and_then(|i| self.get(i))
            .filter(|r| r.contains(position))
    }

    /// Drop the bytes of `covered` from the set, shrinking or removing every
    /// interval it overlaps. Returns the number of bytes that were pending.
    pub fn shrink_or_remove(&mut self, covered: Interval) -> u64 {
        let first = self.ranges.partition_point(|r| r.end < covered.start);
        let last = self.ranges.partition_point(|r| r.start <= covered.end);
        if first >= last {
            return 0;
        }

        let before: u64 = self.ranges[first..last].iter().map(Interval::len).sum();
        let head = self.ranges[first];
        let tail = self.ranges[last - 1];

        let mut remains = Vec::with_capacity(2);
        if head.start < covered.start {
            remains.push(Interval::new(head.start, covered.start - 1));
        }
        if tail.end > covered.end {
            remains.push(Interval::new(covered.end + 1, tail.end));
        }
        let after: u64 = remains.iter().map(Interval::len).sum();

        self.ranges.splice(first..last, remains);
        before - after
    }

    /// Split the interval strictly containing `position` into
    /// `[start, position - 1]` and `[position, end]`.
    pub fn split(&mut self, position: u64) -> bool {
        let index = self.ranges.partition_point(|r| r.end < position);
        match self.ranges.get(index).copied() {
            Some(r) if r.start < position => {
                self.ranges[index] = Interval::new(r.start, position - 1);
                self.ranges.insert(index + 1, Interval::new(position, r.end));
                true
            }
            _ => false,
        }
    }
}
