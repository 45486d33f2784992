//! Per-day boolean timeline and its monotonic union.

use serde::{Deserialize, Serialize};

/// One flag per day of the month, index 0 = day 1.
///
/// The length is not tied to the month length: sources may deliver fewer
/// days than the month has (or a stale longer array). Lookups past the end
/// read as `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayFlags(Vec<bool>);

impl DayFlags {
    pub fn new() -> Self {
        DayFlags(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flag for zero-based `index`; out of range is `false`.
    pub fn get(&self, index: usize) -> bool {
        self.0.get(index).copied().unwrap_or(false)
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<bool> {
        self.0
    }

    pub fn count_set(&self) -> usize {
        self.0.iter().filter(|b| **b).count()
    }

    /// OR-merge with `other`. The result is as long as the longer input.
    pub fn union(&self, other: &DayFlags) -> DayFlags {
        merge(self, other)
    }

    /// True if every day set in `self` is also set in `other`.
    pub fn is_covered_by(&self, other: &DayFlags) -> bool {
        self.0.iter().enumerate().all(|(i, set)| !set || other.get(i))
    }
}

impl From<Vec<bool>> for DayFlags {
    fn from(flags: Vec<bool>) -> Self {
        DayFlags(flags)
    }
}

impl FromIterator<bool> for DayFlags {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        DayFlags(iter.into_iter().collect())
    }
}

/// Union of two timelines: `result[i] = a[i] || b[i]`, missing entries read as `false`.
pub fn merge(a: &DayFlags, b: &DayFlags) -> DayFlags {
    let len = a.len().max(b.len());
    (0..len).map(|i| a.get(i) || b.get(i)).collect()
}

/// Fold any number of timelines through [`merge`]. Empty input yields an empty timeline.
pub fn merge_all<'a, I>(sources: I) -> DayFlags
where
    I: IntoIterator<Item = &'a DayFlags>,
{
    sources
        .into_iter()
        .fold(DayFlags::new(), |acc, flags| merge(&acc, flags))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(v: &[bool]) -> DayFlags {
        DayFlags::from(v.to_vec())
    }

    #[test]
    fn test_merge_equal_length() {
        let merged = merge(&flags(&[true, false, false]), &flags(&[false, false, true]));
        assert_eq!(merged, flags(&[true, false, true]));
    }

    #[test]
    fn test_merge_unequal_length() {
        let merged = merge(&flags(&[true]), &flags(&[false, false, true]));
        assert_eq!(merged, flags(&[true, false, true]));
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_merge_empty_inputs() {
        assert!(merge(&DayFlags::new(), &DayFlags::new()).is_empty());
        let a = flags(&[false, true]);
        assert_eq!(merge(&a, &DayFlags::new()), a);
        assert_eq!(merge(&DayFlags::new(), &a), a);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let a = flags(&[true, false, false, false]);
        let b = flags(&[false, true]);
        let c = flags(&[false, false, false, false, true]);

        let ab_c = merge(&merge(&a, &b), &c);
        let a_bc = merge(&a, &merge(&b, &c));
        let ac_b = merge(&merge(&a, &c), &b);

        assert_eq!(ab_c, a_bc);
        assert_eq!(ab_c, ac_b);
        assert_eq!(merge(&a, &b), merge(&b, &a));
        assert_eq!(merge_all([&c, &a, &b]), ab_c);
    }

    #[test]
    fn test_merge_never_drops_true() {
        let recorded = flags(&[true, false, true]);
        let stale = flags(&[false]);
        let merged = merge_all([&recorded, &stale, &DayFlags::new()]);
        assert!(recorded.is_covered_by(&merged));
        assert_eq!(merged.count_set(), 2);
    }

    #[test]
    fn test_get_out_of_range_is_false() {
        let f = flags(&[true, true]);
        assert!(f.get(1));
        assert!(!f.get(2));
        assert!(!f.get(usize::MAX));
        assert!(!DayFlags::new().get(0));
    }

    #[test]
    fn test_serializes_as_plain_array() {
        let json = serde_json::to_string(&flags(&[true, false])).unwrap();
        assert_eq!(json, "[true,false]");
    }
}
