//! Bucket selection for writes and reads.

use super::types::Bucket;

/// What a write should do to find its bucket.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteTarget {
    Existing(usize),
    Create,
}

/// Index of the bucket owning `timestamp` in an oldest-first list.
pub fn owning_bucket(buckets: &[Bucket], timestamp: u64) -> Option<usize> {
    buckets.iter().rposition(|b| b.creation_time <= timestamp)
}

pub fn write_target(buckets: &[Bucket], timestamp: u64, max_records: u64) -> WriteTarget {
    let Some(idx) = owning_bucket(buckets, timestamp) else {
        return WriteTarget::Create;
    };

    let bucket = &buckets[idx];
    let is_newest = idx + 1 == buckets.len();
    if is_newest && bucket.is_full(max_records) && timestamp > bucket.creation_time {
        return WriteTarget::Create;
    }

    WriteTarget::Existing(idx)
}

/// Buckets whose time slice intersects `[from, to]`, oldest first.
pub fn buckets_in_range(buckets: &[Bucket], from: u64, to: u64) -> Vec<Bucket> {
    if from > to {
        return Vec::new();
    }

    buckets
        .iter()
        .enumerate()
        .filter(|(i, b)| {
            let ends_after_from = buckets
                .get(i + 1)
                .map(|next| next.creation_time > from)
                .unwrap_or(true);
            b.creation_time <= to && ends_after_from
        })
        .map(|(_, b)| b.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(creation_time: u64, record_count: u64) -> Bucket {
        let mut b = Bucket::new("s", 0, creation_time);
        b.record_count = record_count;
        b
    }

    #[test]
    fn test_no_buckets_means_create() {
        assert_eq!(write_target(&[], 100, 10), WriteTarget::Create);
    }

    #[test]
    fn test_write_before_first_bucket_creates() {
        let buckets = vec![bucket(100, 0)];

        assert_eq!(write_target(&buckets, 50, 10), WriteTarget::Create);
    }

    #[test]
    fn test_full_newest_bucket_rolls_over() {
        let buckets = vec![bucket(100, 10)];

        assert_eq!(write_target(&buckets, 150, 10), WriteTarget::Create);
        // Same timestamp as the creation time cannot start a new slice
        assert_eq!(write_target(&buckets, 100, 10), WriteTarget::Existing(0));
    }

    #[test]
    fn test_full_older_bucket_absorbs_late_write() {
        let buckets = vec![bucket(100, 10), bucket(200, 1)];

        assert_eq!(write_target(&buckets, 150, 10), WriteTarget::Existing(0));
        assert_eq!(write_target(&buckets, 250, 10), WriteTarget::Existing(1));
    }

    #[test]
    fn test_range_selects_overlapping_slices() {
        let buckets = vec![bucket(100, 1), bucket(200, 1), bucket(300, 1)];

        let ids = |v: Vec<Bucket>| v.iter().map(|b| b.creation_time).collect::<Vec<_>>();

        assert_eq!(ids(buckets_in_range(&buckets, 150, 250)), vec![100, 200]);
        assert_eq!(ids(buckets_in_range(&buckets, 200, 200)), vec![200]);
        assert_eq!(ids(buckets_in_range(&buckets, 0, 50)), Vec::<u64>::new());
        assert_eq!(ids(buckets_in_range(&buckets, 500, 900)), vec![300]);
        assert_eq!(ids(buckets_in_range(&buckets, 300, 100)), Vec::<u64>::new());
    }
}
