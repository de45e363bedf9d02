//! Compact relation sets used as dynamic-programming keys.

use std::fmt;

/// Set of relation indices within one enumeration scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationSet(pub u64);

impl RelationSet {
    /// Largest number of relations a set can hold.
    pub const CAPACITY: usize = 64;

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn singleton(bit: usize) -> Self {
        debug_assert!(bit < Self::CAPACITY);
        Self(1u64 << bit)
    }

    /// All indices below `bit`.
    pub fn below(bit: usize) -> Self {
        if bit >= Self::CAPACITY {
            Self(u64::MAX)
        } else {
            Self((1u64 << bit) - 1)
        }
    }

    /// All indices up to and including `bit`.
    pub fn up_to(bit: usize) -> Self {
        Self::below(bit + 1)
    }

    pub fn insert(&mut self, bit: usize) {
        debug_assert!(bit < Self::CAPACITY);
        self.0 |= 1u64 << bit;
    }

    pub fn contains(self, bit: usize) -> bool {
        bit < Self::CAPACITY && (self.0 & (1u64 << bit)) != 0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn overlaps(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_subset_of(self, other: Self) -> bool {
        self.difference(other).is_empty()
    }

    /// Index of the lowest member.
    pub fn first(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as usize)
        }
    }

    /// The lowest member as a set; empty for an empty set.
    pub fn lowest(self) -> Self {
        Self(self.0 & self.0.wrapping_neg())
    }

    /// Iterate over member indices, lowest first.
    pub fn iter(self) -> RelationSetIter {
        RelationSetIter(self.0)
    }

    /// Iterate over the non-empty subsets, smallest numeric value first.
    pub fn subsets(self) -> Subsets {
        Subsets {
            set: self.0,
            next: self.0.wrapping_neg() & self.0,
        }
    }
}

pub struct RelationSetIter(u64);

impl Iterator for RelationSetIter {
    type Item = usize;
    fn next(&mut self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            let bit = self.0.trailing_zeros() as usize;
            self.0 &= self.0 - 1;
            Some(bit)
        }
    }
}

/// Subset enumeration by `sub = (sub - set) & set`.
pub struct Subsets {
    set: u64,
    next: u64,
}

impl Iterator for Subsets {
    type Item = RelationSet;
    fn next(&mut self) -> Option<RelationSet> {
        if self.next == 0 {
            return None;
        }
        let current = self.next;
        self.next = current.wrapping_sub(self.set) & self.set;
        Some(RelationSet(current))
    }
}

impl FromIterator<usize> for RelationSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = Self::empty();
        for bit in iter {
            set.insert(bit);
        }
        set
    }
}

impl fmt::Display for RelationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        for b in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}", b)?;
            first = false;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_ops() {
        let a: RelationSet = [0, 2].into_iter().collect();
        let b: RelationSet = [2, 3].into_iter().collect();
        assert_eq!(a.union(b), [0, 2, 3].into_iter().collect());
        assert_eq!(a.intersection(b), RelationSet::singleton(2));
        assert_eq!(a.difference(b), RelationSet::singleton(0));
        assert!(a.overlaps(b));
        assert!(RelationSet::singleton(2).is_subset_of(a));
        assert_eq!(a.len(), 2);
        assert_eq!(a.to_string(), "{0, 2}");
    }

    #[test]
    fn test_lowest_and_first() {
        let s: RelationSet = [3, 5].into_iter().collect();
        assert_eq!(s.lowest(), RelationSet::singleton(3));
        assert_eq!(s.first(), Some(3));
        assert_eq!(RelationSet::empty().lowest(), RelationSet::empty());
        assert_eq!(RelationSet::empty().first(), None);
    }

    #[test]
    fn test_below() {
        assert_eq!(RelationSet::below(0), RelationSet::empty());
        assert_eq!(RelationSet::below(3), [0, 1, 2].into_iter().collect());
        assert_eq!(RelationSet::up_to(63).len(), 64);
    }

    #[test]
    fn test_subsets() {
        let s: RelationSet = [1, 3, 4].into_iter().collect();
        let subs: Vec<RelationSet> = s.subsets().collect();
        assert_eq!(subs.len(), 7);
        assert_eq!(subs[0], RelationSet::singleton(1));
        assert_eq!(*subs.last().unwrap(), s);
        assert!(subs.iter().all(|sub| sub.is_subset_of(s)));
        assert_eq!(RelationSet::empty().subsets().count(), 0);
    }

    #[test]
    fn test_full_set_subsets_terminate() {
        let s = RelationSet::up_to(63);
        assert_eq!(s.subsets().take(3).count(), 3);
        assert_eq!(s.iter().count(), 64);
    }
}
