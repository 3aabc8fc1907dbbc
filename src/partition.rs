//! Key space partitioning.

use crate::config::ConfigError;
use crate::record::{Record, KEY_SIZE};

/// Maximum number of nodes: the partition is taken from the first key byte only.
pub const MAX_NODES: usize = 1 << 8;

/// Maps keys to owning nodes using the most significant bits of the first key byte.
///
/// With `2^n` nodes the key space is cut into `2^n` contiguous buckets of equal width,
/// bucket `i` being owned by the node with id `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partitioner {
    node_count: usize,
    bits: u32,
}

impl Partitioner {
    /// Creates a partitioner for `node_count` nodes.
    /// The count must be a power of two not exceeding [`MAX_NODES`].
    pub fn new(node_count: usize) -> Result<Self, ConfigError> {
        if !node_count.is_power_of_two() || node_count > MAX_NODES {
            return Err(ConfigError::NodeCount(node_count));
        }

        return Ok(Partitioner {
            node_count,
            bits: node_count.trailing_zeros(),
        });
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Returns the id of the node owning `key`.
    pub fn owner(&self, key: &[u8; KEY_SIZE]) -> usize {
        let mask = (1u32 << self.bits) - 1;
        (((key[0] as u32) >> (8 - self.bits)) & mask) as usize
    }

    /// Returns copies of the records owned by `node`, preserving their order.
    pub fn owned_by(&self, records: &[Record], node: usize) -> Vec<Record> {
        records
            .iter()
            .filter(|record| self.owner(record.key()) == node)
            .cloned()
            .collect()
    }

    /// Distributes records into one bucket per node, bucket index being the owner id.
    pub fn split(&self, records: impl IntoIterator<Item = Record>) -> Vec<Vec<Record>> {
        let mut buckets = Vec::from_iter((0..self.node_count).map(|_| Vec::new()));
        for record in records.into_iter() {
            buckets[self.owner(record.key())].push(record);
        }

        return buckets;
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::Partitioner;
    use crate::config::ConfigError;
    use crate::record::test::{random_record, record_with_key};
    use crate::record::KEY_SIZE;

    #[rstest]
    #[case(0)]
    #[case(3)]
    #[case(6)]
    #[case(512)]
    fn test_invalid_node_count(#[case] count: usize) {
        match Partitioner::new(count) {
            Err(ConfigError::NodeCount(actual)) => assert_eq!(actual, count),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(4)]
    #[case(8)]
    #[case(256)]
    fn test_owner_range_and_purity(#[case] count: usize) {
        let partitioner = Partitioner::new(count).unwrap();

        for first in 0..=u8::MAX {
            let owner = partitioner.owner(record_with_key(first, 0x00).key());
            assert!(owner < count);
            assert_eq!(owner, partitioner.owner(record_with_key(first, 0xFF).key()));
            assert_eq!(owner, first as usize * count / 256);
        }
    }

    #[rstest]
    #[case(0x00, 0)]
    #[case(0x3F, 0)]
    #[case(0x40, 1)]
    #[case(0x80, 2)]
    #[case(0xFF, 3)]
    fn test_owner_four_nodes(#[case] first: u8, #[case] expected: usize) {
        let partitioner = Partitioner::new(4).unwrap();
        let mut key = [0u8; KEY_SIZE];
        key[0] = first;

        assert_eq!(partitioner.owner(&key), expected);
    }

    #[test]
    fn test_single_node_owns_everything() {
        let partitioner = Partitioner::new(1).unwrap();
        let mut rng = rand::thread_rng();
        let records = Vec::from_iter((0..100).map(|_| random_record(&mut rng)));

        assert_eq!(partitioner.owned_by(&records, 0), records);
    }

    #[rstest]
    #[case(2)]
    #[case(4)]
    #[case(16)]
    fn test_coverage(#[case] count: usize) {
        let partitioner = Partitioner::new(count).unwrap();
        let mut rng = rand::thread_rng();
        let records = Vec::from_iter((0..500).map(|_| random_record(&mut rng)));

        for record in &records {
            let owners = (0..count)
                .filter(|node| partitioner.owned_by(std::slice::from_ref(record), *node).len() == 1)
                .count();
            assert_eq!(owners, 1);
        }

        let buckets = partitioner.split(records.clone());
        assert_eq!(buckets.len(), count);
        assert_eq!(buckets.iter().map(Vec::len).sum::<usize>(), records.len());
        for (node, bucket) in buckets.iter().enumerate() {
            assert_eq!(bucket, &partitioner.owned_by(&records, node));
        }
    }
}
