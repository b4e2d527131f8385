//! vBucket 发现：把 `[0, total_vbuckets)` 按成员编号切分成连续区间。
//!
//! # 教案式说明
//! - **意图 (Why)**：每个成员独立、纯函数式地计算出自己负责的 vBucket 集合，
//!   不需要和其它成员协商——只要大家对 `total_members`/`member_number` 的认知一致
//!   （由 [`crate::membership`] 保证），计算结果就自动互斥且覆盖全集。
//! - **算法 (What)**：`total_vbuckets` 不能被 `total_members` 整除时，前
//!   `total_vbuckets % total_members` 个成员多分担一个 vBucket，其余成员分担
//!   `total_vbuckets / total_members` 个；区间连续而非轮询散布，便于运维观察。

use crate::model::VbucketId;
use std::collections::HashSet;

/// 计算给定成员在当前成员关系下应当负责的 vBucket 区间。
///
/// `member_number` 从 1 开始，落在 `1..=total_members`。
pub fn assign_vbuckets(
    total_vbuckets: u16,
    member_number: u32,
    total_members: u32,
) -> Vec<VbucketId> {
    assert!(member_number >= 1 && member_number <= total_members);

    let total_vbuckets = total_vbuckets as u32;
    let base = total_vbuckets / total_members;
    let remainder = total_vbuckets % total_members;

    // 前 `remainder` 个成员（1-based）各多领一个，让分布尽量均匀。
    let index = member_number - 1;
    let start = index * base + index.min(remainder);
    let len = base + u32::from(index < remainder);

    (start..start + len).map(|v| v as VbucketId).collect()
}

/// 两次成员关系之间的 vBucket 归属差异，驱动流引擎的增量 rebalance。
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OwnershipDiff {
    pub added: Vec<VbucketId>,
    pub removed: Vec<VbucketId>,
}

pub fn diff_ownership(previous: &[VbucketId], current: &[VbucketId]) -> OwnershipDiff {
    let previous_set: HashSet<_> = previous.iter().copied().collect();
    let current_set: HashSet<_> = current.iter().copied().collect();

    let mut added: Vec<_> = current_set.difference(&previous_set).copied().collect();
    let mut removed: Vec<_> = previous_set.difference(&current_set).copied().collect();
    added.sort_unstable();
    removed.sort_unstable();

    OwnershipDiff { added, removed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn splits_1024_vbuckets_across_a_single_member() {
        let assigned = assign_vbuckets(1024, 1, 1);
        assert_eq!(assigned.len(), 1024);
        assert_eq!(assigned[0], 0);
        assert_eq!(*assigned.last().unwrap(), 1023);
    }

    #[test]
    fn splits_1024_vbuckets_across_three_members() {
        let a = assign_vbuckets(1024, 1, 3);
        let b = assign_vbuckets(1024, 2, 3);
        let c = assign_vbuckets(1024, 3, 3);
        assert_eq!(a.len(), 342);
        assert_eq!(b.len(), 341);
        assert_eq!(c.len(), 341);
        assert_eq!(a[0], 0);
        assert_eq!(*c.last().unwrap(), 1023);
    }

    #[test]
    fn diff_reports_only_the_changed_vbuckets() {
        let before = assign_vbuckets(1024, 1, 3);
        let after = assign_vbuckets(1024, 1, 4);
        let diff = diff_ownership(&before, &after);
        assert!(diff.removed.iter().all(|vb| before.contains(vb)));
        assert!(diff.added.is_empty());
    }

    proptest! {
        #[test]
        fn assignments_are_disjoint_and_cover_the_full_range(
            total_vbuckets in 1u16..=1024u16,
            total_members in 1u32..=64u32,
        ) {
            let mut union = HashSet::new();
            let mut total_assigned = 0usize;
            let mut sizes = Vec::new();

            for member_number in 1..=total_members {
                let assigned = assign_vbuckets(total_vbuckets, member_number, total_members);
                sizes.push(assigned.len());
                total_assigned += assigned.len();
                for vb in assigned {
                    prop_assert!(union.insert(vb), "vbucket {} assigned to more than one member", vb);
                }
            }

            prop_assert_eq!(total_assigned, total_vbuckets as usize);
            let max = *sizes.iter().max().unwrap();
            let min = *sizes.iter().min().unwrap();
            prop_assert!(max - min <= 1);
        }
    }
}
