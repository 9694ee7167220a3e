//! Acknowledgment state supplied by the receiver side.

use std::ops::RangeInclusive;

use reliant_common::MessageNumber;

/// Answers whether a message number has been acknowledged for a sequence.
pub trait AcknowledgementState {
    fn is_acknowledged(&self, number: MessageNumber) -> bool;
}

impl<F> AcknowledgementState for F
where
    F: Fn(MessageNumber) -> bool,
{
    fn is_acknowledged(&self, number: MessageNumber) -> bool {
        self(number)
    }
}

/// Acknowledged message numbers as sorted, disjoint inclusive ranges.
///
/// This is the shape carried by sequence acknowledgment headers:
/// `[1, 4], [6, 6], [9, 12]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcknowledgementRanges {
    ranges: Vec<(MessageNumber, MessageNumber)>,
}

impl AcknowledgementRanges {
    #[must_use]
    pub const fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Record a single acknowledged number.
    pub fn insert(&mut self, number: MessageNumber) {
        self.insert_range(number, number);
    }

    /// Record `lower..=upper` as acknowledged, merging with overlapping or
    /// adjacent ranges. Empty ranges (`lower > upper`) are ignored.
    pub fn insert_range(&mut self, lower: MessageNumber, upper: MessageNumber) {
        if lower > upper {
            return;
        }

        // First range that could touch [lower, upper].
        let start = self
            .ranges
            .partition_point(|&(_, hi)| hi.saturating_add(1) < lower);
        let mut end = start;
        let mut merged = (lower, upper);

        while end < self.ranges.len() && self.ranges[end].0 <= upper.saturating_add(1) {
            merged.0 = merged.0.min(self.ranges[end].0);
            merged.1 = merged.1.max(self.ranges[end].1);
            end += 1;
        }

        self.ranges.drain(start..end);
        self.ranges.insert(start, merged);
    }

    pub fn contains(&self, number: MessageNumber) -> bool {
        let idx = self.ranges.partition_point(|&(_, hi)| hi < number);
        self.ranges
            .get(idx)
            .is_some_and(|&(lo, hi)| lo <= number && number <= hi)
    }

    pub fn iter(&self) -> impl Iterator<Item = RangeInclusive<MessageNumber>> + '_ {
        self.ranges.iter().map(|&(lo, hi)| lo..=hi)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Highest acknowledged number, if any.
    pub fn upper(&self) -> Option<MessageNumber> {
        self.ranges.last().map(|&(_, hi)| hi)
    }
}

impl AcknowledgementState for AcknowledgementRanges {
    fn is_acknowledged(&self, number: MessageNumber) -> bool {
        self.contains(number)
    }
}

impl FromIterator<(MessageNumber, MessageNumber)> for AcknowledgementRanges {
    fn from_iter<T: IntoIterator<Item = (MessageNumber, MessageNumber)>>(iter: T) -> Self {
        let mut ranges = Self::new();
        for (lower, upper) in iter {
            ranges.insert_range(lower, upper);
        }
        ranges
    }
}
