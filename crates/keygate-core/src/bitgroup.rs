//! Bit-group permission sets.
//!
//! Permission IDs are dense from 1, so eight consecutive IDs are packed into a
//! single byte. Group `g` (starting at 1) holds IDs `8·(g−1)+1 ..= 8·g`; bit
//! `b` of the group's mask is set when ID `8·(g−1)+b+1` is granted.
//!
//! On the wire a set is a JSON object mapping the group index (as a string)
//! to its mask, e.g. `{"1": 129, "2": 1}` for IDs `{1, 8, 9}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable numeric permission identifier.
pub type PermissionId = u32;

/// Number of permission IDs packed into one group.
pub const GROUP_WIDTH: u32 = 8;

/// Errors raised while building a [`PermissionSet`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Permission IDs start at 1.
    #[error("Invalid permission id: {0}")]
    InvalidPermissionId(PermissionId),

    /// Group indices start at 1.
    #[error("Invalid group index: {0}")]
    InvalidGroup(u32),

    /// A group is present with no bits set.
    #[error("Group {0} has an empty mask")]
    EmptyMask(u32),
}

/// Locate a permission ID as `(group, bit)`.
///
/// Returns `None` for ID 0.
#[must_use]
pub const fn position(id: PermissionId) -> Option<(u32, u8)> {
    if id == 0 {
        return None;
    }
    let offset = id - 1;
    #[allow(clippy::cast_possible_truncation)]
    let bit = (offset % GROUP_WIDTH) as u8;
    Some((offset / GROUP_WIDTH + 1, bit))
}

/// The largest ID named by `mask` in `group`, if it is representable.
fn highest_id(group: u32, mask: u8) -> Option<PermissionId> {
    (group - 1)
        .checked_mul(GROUP_WIDTH)?
        .checked_add(GROUP_WIDTH - mask.leading_zeros())
}

/// A canonical set of permission IDs encoded as 8-bit groups.
///
/// Canonical means no group is stored with a zero mask, so two sets holding
/// the same IDs always compare equal and serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<u32, u8>", into = "BTreeMap<u32, u8>")]
pub struct PermissionSet {
    groups: BTreeMap<u32, u8>,
}

impl PermissionSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a collection of permission IDs.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidPermissionId`] if any ID is 0.
    pub fn encode<I>(ids: I) -> Result<Self, CodecError>
    where
        I: IntoIterator<Item = PermissionId>,
    {
        let mut set = Self::new();
        for id in ids {
            set.insert(id)?;
        }
        Ok(set)
    }

    /// Build a set from raw `(group, mask)` pairs.
    ///
    /// # Errors
    ///
    /// Rejects group index 0, zero masks, and bits whose ID would not fit in
    /// a [`PermissionId`].
    pub fn from_groups<I>(groups: I) -> Result<Self, CodecError>
    where
        I: IntoIterator<Item = (u32, u8)>,
    {
        let mut map = BTreeMap::new();
        for (group, mask) in groups {
            if group == 0 {
                return Err(CodecError::InvalidGroup(group));
            }
            if mask == 0 {
                return Err(CodecError::EmptyMask(group));
            }
            if highest_id(group, mask).is_none() {
                return Err(CodecError::InvalidGroup(group));
            }
            *map.entry(group).or_insert(0) |= mask;
        }
        Ok(Self { groups: map })
    }

    /// Check membership. ID 0 is never a member.
    #[must_use]
    pub fn contains(&self, id: PermissionId) -> bool {
        position(id).is_some_and(|(group, bit)| {
            self.groups
                .get(&group)
                .is_some_and(|mask| mask & (1 << bit) != 0)
        })
    }

    /// Add a permission. Returns `true` if it was not already present.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidPermissionId`] for ID 0.
    pub fn insert(&mut self, id: PermissionId) -> Result<bool, CodecError> {
        let (group, bit) = position(id).ok_or(CodecError::InvalidPermissionId(id))?;
        let mask = self.groups.entry(group).or_insert(0);
        let added = *mask & (1 << bit) == 0;
        *mask |= 1 << bit;
        Ok(added)
    }

    /// Remove a permission. Returns `true` if it was present.
    pub fn remove(&mut self, id: PermissionId) -> bool {
        let Some((group, bit)) = position(id) else {
            return false;
        };
        let Some(mask) = self.groups.get_mut(&group) else {
            return false;
        };
        let present = *mask & (1 << bit) != 0;
        *mask &= !(1 << bit);
        if *mask == 0 {
            self.groups.remove(&group);
        }
        present
    }

    /// IDs present in either set.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut groups = self.groups.clone();
        for (group, mask) in &other.groups {
            *groups.entry(*group).or_insert(0) |= mask;
        }
        Self { groups }
    }

    /// IDs present in `self` but not in `other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        let groups = self
            .groups
            .iter()
            .filter_map(|(group, mask)| {
                let remaining = mask & !other.groups.get(group).copied().unwrap_or(0);
                (remaining != 0).then_some((*group, remaining))
            })
            .collect();
        Self { groups }
    }

    /// Iterate member IDs in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = PermissionId> + '_ {
        self.groups.iter().flat_map(|(group, mask)| {
            let base = (group - 1) * GROUP_WIDTH;
            (0..GROUP_WIDTH)
                .filter(move |bit| mask & (1 << bit) != 0)
                .map(move |bit| base + bit + 1)
        })
    }

    /// Iterate `(group, mask)` pairs in ascending group order.
    pub fn groups(&self) -> impl Iterator<Item = (u32, u8)> + '_ {
        self.groups.iter().map(|(group, mask)| (*group, *mask))
    }

    /// Number of member IDs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups
            .values()
            .map(|mask| mask.count_ones() as usize)
            .sum()
    }

    /// Whether the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl TryFrom<BTreeMap<u32, u8>> for PermissionSet {
    type Error = CodecError;

    fn try_from(groups: BTreeMap<u32, u8>) -> Result<Self, Self::Error> {
        Self::from_groups(groups)
    }
}

impl From<PermissionSet> for BTreeMap<u32, u8> {
    fn from(set: PermissionSet) -> Self {
        set.groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    /// Deterministic pseudo-random subsets of 1..=limit.
    fn sample_sets(count: usize, limit: u32) -> Vec<BTreeSet<u32>> {
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = move || {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            state >> 33
        };
        (0..count)
            .map(|_| {
                let size = next() % 40;
                (0..size)
                    .map(|_| u32::try_from(next() % u64::from(limit)).unwrap() + 1)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_group_math_examples() {
        assert_eq!(position(1), Some((1, 0)));
        assert_eq!(position(8), Some((1, 7)));
        assert_eq!(position(9), Some((2, 0)));
        assert_eq!(position(16), Some((2, 7)));
        assert_eq!(position(0), None);
    }

    #[test]
    fn test_group_math_range() {
        for id in 1..200u32 {
            let (group, bit) = position(id).unwrap();
            assert_eq!(group, (id - 1) / 8 + 1, "group for id {id}");
            assert_eq!(u32::from(bit), (id - 1) % 8, "bit for id {id}");

            let set = PermissionSet::encode([id]).unwrap();
            assert_eq!(set.groups().collect::<Vec<_>>(), vec![(group, 1 << bit)]);
        }
    }

    #[test]
    fn test_encode_login_example() {
        let set = PermissionSet::encode([1, 8, 9]).unwrap();
        assert_eq!(
            set.groups().collect::<Vec<_>>(),
            vec![(1, 0b1000_0001), (2, 0b0000_0001)]
        );
        assert!(set.contains(8));
        assert!(!set.contains(2));
    }

    #[test]
    fn test_encode_single_permission() {
        let set = PermissionSet::encode([1]).unwrap();
        assert_eq!(set.groups().collect::<Vec<_>>(), vec![(1, 0b0000_0001)]);
        assert!(!set.contains(2));
    }

    #[test]
    fn test_empty_input() {
        let set = PermissionSet::encode(std::iter::empty()).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.len(), 0);
        assert!(!set.contains(1));
    }

    #[test]
    fn test_zero_id_rejected() {
        assert_eq!(
            PermissionSet::encode([3, 0]),
            Err(CodecError::InvalidPermissionId(0))
        );
        let set = PermissionSet::encode([1]).unwrap();
        assert!(!set.contains(0));
    }

    #[test]
    fn test_round_trip_and_canonical() {
        for ids in sample_sets(200, 300) {
            let set = PermissionSet::encode(ids.iter().copied()).unwrap();

            let decoded: BTreeSet<u32> = (1..=310).filter(|id| set.contains(*id)).collect();
            assert_eq!(decoded, ids);
            assert_eq!(set.ids().collect::<BTreeSet<_>>(), ids);
            assert_eq!(set.len(), ids.len());
            assert!(set.groups().all(|(_, mask)| mask != 0));
        }
    }

    #[test]
    fn test_duplicate_ids_are_idempotent() {
        let a = PermissionSet::encode([5, 5, 5, 12]).unwrap();
        let b = PermissionSet::encode([12, 5]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_union_and_difference() {
        let a = PermissionSet::encode([1, 2, 9]).unwrap();
        let b = PermissionSet::encode([2, 17]).unwrap();

        let union = a.union(&b);
        assert_eq!(union.ids().collect::<Vec<_>>(), vec![1, 2, 9, 17]);

        let diff = a.difference(&b);
        assert_eq!(diff.ids().collect::<Vec<_>>(), vec![1, 9]);

        // Removing every member of a group must drop the group.
        let only_nine = a.difference(&PermissionSet::encode([1, 2]).unwrap());
        assert_eq!(only_nine.groups().collect::<Vec<_>>(), vec![(2, 1)]);
        assert_eq!(a.difference(&a), PermissionSet::new());
    }

    #[test]
    fn test_insert_remove() {
        let mut set = PermissionSet::new();
        assert!(set.insert(10).unwrap());
        assert!(!set.insert(10).unwrap());
        assert!(set.contains(10));
        assert!(set.remove(10));
        assert!(!set.remove(10));
        assert!(set.is_empty());
        assert!(!set.remove(0));
    }

    #[test]
    fn test_serde_shape() {
        let set = PermissionSet::encode([1, 8, 9]).unwrap();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"{"1":129,"2":1}"#);

        let back: PermissionSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_deserialize_rejects_non_canonical() {
        assert!(serde_json::from_str::<PermissionSet>(r#"{"1":0}"#).is_err());
        assert!(serde_json::from_str::<PermissionSet>(r#"{"0":1}"#).is_err());
        assert!(serde_json::from_str::<PermissionSet>(r#"{"1":256}"#).is_err());
        assert!(serde_json::from_str::<PermissionSet>(r#"{"4294967295":1}"#).is_err());
        assert!(serde_json::from_str::<PermissionSet>(r#"{"536870913":1}"#).is_err());
    }

    #[test]
    fn test_highest_group_bounds() {
        let (top, bit) = position(PermissionId::MAX).unwrap();
        assert_eq!((top, bit), (536_870_912, 6));

        let set = PermissionSet::from_groups([(top, 0b0100_0001)]).unwrap();
        assert_eq!(
            set.ids().collect::<Vec<_>>(),
            vec![PermissionId::MAX - 6, PermissionId::MAX]
        );
        assert_eq!(
            PermissionSet::from_groups([(top, 0b1000_0000)]),
            Err(CodecError::InvalidGroup(top))
        );
        assert_eq!(
            PermissionSet::from_groups([(u32::MAX, 1)]),
            Err(CodecError::InvalidGroup(u32::MAX))
        );
    }
}
