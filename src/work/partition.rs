/// Maps a work key to one of `num_partitions` output destinations. The
/// mapping must be pure: the same key with the same partition count always
/// yields the same partition, on every node.
pub trait PartitionFunction: Send + Sync {
    fn partition(&self, key: i64, num_partitions: usize) -> usize;
}

/// Derives a stable int64 key from a string value, so text records can be
/// routed and joined by content.
pub trait StringKeyFunction: Send + Sync {
    fn key(&self, value: &str) -> i64;
}

/// Default partitioner: key modulo partition count (euclidean, so negative
/// keys stay in range).
#[derive(Debug, Clone, Copy, Default)]
pub struct ModPartition;

impl PartitionFunction for ModPartition {
    fn partition(&self, key: i64, num_partitions: usize) -> usize {
        debug_assert!(num_partitions > 0);
        key.rem_euclid(num_partitions as i64) as usize
    }
}

/// Default string keyer: 64-bit FNV-1a over the UTF-8 bytes. Chosen over the
/// std hasher because the value must be identical across processes and
/// program runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fnv1aKey;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x1000_0000_01b3;

impl StringKeyFunction for Fnv1aKey {
    fn key(&self, value: &str) -> i64 {
        let mut hash = FNV_OFFSET;
        for byte in value.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mod_partition_is_stable_and_in_range() {
        let p = ModPartition;
        for key in [-1000, -7, -1, 0, 1, 7, 1000, i64::MAX, i64::MIN + 1] {
            for n in [1, 2, 5, 16] {
                let first = p.partition(key, n);
                assert!(first < n, "partition {first} out of range for n={n}");
                assert_eq!(first, p.partition(key, n), "partitioning must be pure");
            }
        }
    }

    #[test]
    fn same_key_same_partition_via_string() {
        let keyer = Fnv1aKey;
        let p = ModPartition;
        let k1 = keyer.key("record-42");
        let k2 = keyer.key("record-42");
        assert_eq!(k1, k2);
        assert_eq!(p.partition(k1, 8), p.partition(k2, 8));
        assert_ne!(keyer.key("record-42"), keyer.key("record-43"));
    }

    #[test]
    fn fnv_matches_reference_vectors() {
        // Published FNV-1a test vectors.
        let keyer = Fnv1aKey;
        assert_eq!(keyer.key("") as u64, 0xcbf2_9ce4_8422_2325);
        assert_eq!(keyer.key("a") as u64, 0xaf63_dc4c_8601_ec8c);
    }
}
