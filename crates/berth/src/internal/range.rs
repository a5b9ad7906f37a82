use rand::Rng;
use serde::{Deserialize, Serialize};

/// Closed integer interval `[begin, end]`.
///
/// A `Vec<ValueRange>` represents a set of integers; it is semantically
/// equivalent to its coalesced form (sorted, merged, no overlapping or
/// adjacent members). All set operations in this module coalesce their
/// inputs first, so callers may pass lists in any order.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueRange {
    pub begin: i32,
    pub end: i32,
}

impl ValueRange {
    #[inline]
    pub fn new(begin: i32, end: i32) -> Self {
        debug_assert!(begin <= end);
        ValueRange { begin, end }
    }

    #[inline]
    pub fn size(&self) -> i64 {
        i64::from(self.end) - i64::from(self.begin) + 1
    }

    #[inline]
    pub fn contains(&self, value: i32) -> bool {
        self.begin <= value && value <= self.end
    }
}

impl std::fmt::Display for ValueRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.begin == self.end {
            write!(f, "[{}]", self.begin)
        } else {
            write!(f, "[{}-{}]", self.begin, self.end)
        }
    }
}

/// Sorts by `begin` and merges overlapping or adjacent ranges
/// (`next.begin <= current.end + 1`) into a single run.
pub fn coalesce(ranges: &[ValueRange]) -> Vec<ValueRange> {
    let mut sorted = ranges.to_vec();
    sorted.sort_unstable();

    let mut result = Vec::with_capacity(sorted.len());
    let mut iter = sorted.into_iter();
    let Some(mut current) = iter.next() else {
        return result;
    };
    for range in iter {
        if range.begin <= current.end.saturating_add(1) {
            current.end = current.end.max(range.end);
        } else {
            result.push(current);
            current = range;
        }
    }
    result.push(current);
    result
}

/// Number of integers covered by the list. The list must be coalesced,
/// otherwise overlapping members are counted twice.
pub fn count(ranges: &[ValueRange]) -> i64 {
    ranges.iter().map(|r| r.size()).sum()
}

/// Set intersection of two range lists.
pub fn intersect(lhs: &[ValueRange], rhs: &[ValueRange]) -> Vec<ValueRange> {
    let a = coalesce(lhs);
    let b = coalesce(rhs);
    let mut result = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let begin = a[i].begin.max(b[j].begin);
        let end = a[i].end.min(b[j].end);
        if begin <= end {
            result.push(ValueRange::new(begin, end));
        }
        // Advance whichever range ends first
        if a[i].end <= b[j].end {
            i += 1;
        } else {
            j += 1;
        }
    }
    result
}

/// Set difference `lhs \ rhs`.
pub fn subtract(lhs: &[ValueRange], rhs: &[ValueRange]) -> Vec<ValueRange> {
    let mut a = coalesce(lhs);
    let b = coalesce(rhs);
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let r = b[j];
        if a[i].end < r.begin {
            i += 1;
        } else if r.end < a[i].begin {
            j += 1;
        } else if a[i].begin < r.begin {
            // Truncate the tail; splice the remainder back if a[i]
            // extended past the subtracted range
            let tail_end = a[i].end;
            a[i].end = r.begin - 1;
            if tail_end > r.end {
                a.insert(i + 1, ValueRange::new(r.end + 1, tail_end));
            }
            i += 1;
        } else if a[i].end > r.end {
            a[i].begin = r.end + 1;
            j += 1;
        } else {
            // Fully covered
            a.remove(i);
        }
    }
    a
}

/// Set union of two range lists.
pub fn union(lhs: &[ValueRange], rhs: &[ValueRange]) -> Vec<ValueRange> {
    if lhs.is_empty() {
        return coalesce(rhs);
    }
    if rhs.is_empty() {
        return coalesce(lhs);
    }
    let mut all = lhs.to_vec();
    all.extend_from_slice(rhs);
    coalesce(&all)
}

/// True iff every integer covered by `small` is also covered by `big`.
pub fn fits_in(small: &[ValueRange], big: &[ValueRange]) -> bool {
    let small = coalesce(small);
    let big = coalesce(big);
    let mut i = 0;
    for b in &big {
        while i < small.len() {
            let s = small[i];
            if s.begin < b.begin {
                return false;
            }
            if s.begin > b.end {
                break;
            }
            if s.end > b.end {
                return false;
            }
            i += 1;
        }
        if i == small.len() {
            break;
        }
    }
    i == small.len()
}

/// Takes up to `amount` values from `available`, in order, skipping
/// everything below `floor`. Returns fewer values (possibly none) when
/// infeasible; the caller must check `count(result) == amount`.
pub fn sub_range_sequentially(
    available: &[ValueRange],
    amount: i32,
    floor: i32,
) -> Vec<ValueRange> {
    let mut result = Vec::new();
    let mut needed = i64::from(amount);
    for range in coalesce(available) {
        if needed <= 0 {
            break;
        }
        if range.end < floor {
            continue;
        }
        let begin = range.begin.max(floor);
        let take = needed.min(i64::from(range.end) - i64::from(begin) + 1);
        result.push(ValueRange::new(begin, begin + take as i32 - 1));
        needed -= take;
    }
    result
}

/// Same feasibility semantics as [`sub_range_sequentially`], but the
/// scan starts at a randomized offset: a uniform base is drawn from
/// `[1, max value of the list]`, then halved on every failed attempt
/// until a fitting subset is found or the base reaches 0 (plain scan
/// from `floor`).
///
/// This biases allocations away from the low end of the range with a
/// bounded number of retries. It is deliberately NOT uniform over all
/// valid subsets; a weighted-reservoir scheme could replace it if
/// randomness quality ever matters downstream.
pub fn sub_range_randomly(
    available: &[ValueRange],
    amount: i32,
    floor: i32,
    rng: &mut impl Rng,
) -> Vec<ValueRange> {
    let avail = coalesce(available);
    let Some(last) = avail.last() else {
        return Vec::new();
    };
    let mut base = rng.random_range(1..=last.end.max(1));
    loop {
        let candidate = sub_range_sequentially(&avail, amount, floor.saturating_add(base));
        if count(&candidate) == i64::from(amount) || base == 0 {
            return candidate;
        }
        base /= 2;
    }
}

/// Treats the coalesced list as one virtual concatenated sequence and
/// returns its `index`-th value, or `-1` when out of range.
pub fn value_at(ranges: &[ValueRange], index: i64) -> i32 {
    if index < 0 {
        return -1;
    }
    let mut remaining = index;
    for range in coalesce(ranges) {
        if remaining < range.size() {
            return range.begin + remaining as i32;
        }
        remaining -= range.size();
    }
    -1
}
