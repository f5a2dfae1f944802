//! Key hashing for shard selection
//!
//! Keys map to shards with `(crc32(key) mod N) + 1`, giving a 1-based shard
//! index. The checksum is taken as an unsigned 32 bit value so the result
//! never goes negative. Resharding tools use the same numbering, so a key
//! lands on `node_<shard>` both when written through the router and when
//! migrated offline.

/// CRC32 (IEEE) of the hash key
pub fn crc32(key: &[u8]) -> u32 {
    crc32fast::hash(key)
}

/// 1-based shard index for a hash key among `shard_count` shards
///
/// # Example
///
/// ```
/// use shardkv::cluster::shard_for_key;
///
/// let shard = shard_for_key(b"foo", 3);
/// assert!((1..=3).contains(&shard));
/// assert_eq!(shard, shard_for_key(b"foo", 3));
/// ```
///
/// # Panics
///
/// `shard_count` must be positive; zero panics. A validated topology always
/// has at least one shard, and [`route`](super::route) validates the
/// topology before hashing.
pub fn shard_for_key(key: &[u8], shard_count: usize) -> usize {
    assert!(shard_count > 0, "shard count must be positive");
    (crc32(key) as u64 % shard_count as u64) as usize + 1
}
