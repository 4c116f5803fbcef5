//! ShardRouter - key から shard index への決定的なマッピング
//!
//! IEEE CRC-32 (`crc32fast`) を shard 数で割った余りを使う。
//! 挿入順序やプロセスに依存しないので、同じ key は常に同じ shard に行く。

use std::num::NonZeroUsize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRouter {
    shards: NonZeroUsize,
}

impl ShardRouter {
    pub fn new(shards: NonZeroUsize) -> Self {
        Self { shards }
    }

    pub fn shards(&self) -> usize {
        self.shards.get()
    }

    /// Shard index for `key`, in `0..shards`.
    pub fn route(&self, key: &[u8]) -> usize {
        shard_index(key, self.shards.get())
    }
}

/// `crc32(key) % shards`. `shards` must be non-zero.
pub fn shard_index(key: &[u8], shards: usize) -> usize {
    debug_assert!(shards > 0);
    (crc32fast::hash(key) as u64 % shards as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rstest::rstest;

    fn router(n: usize) -> ShardRouter {
        ShardRouter::new(NonZeroUsize::new(n).unwrap())
    }

    #[rstest]
    #[case(&b"add add add add add add add add add"[..], 2)]
    #[case(&b"sub sub sub sub sub sub sub sub sub"[..], 1)]
    #[case(&b"mul mul mul mul mul mul mul mul mul"[..], 3)]
    #[case(&b"div div div div div div div div div"[..], 0)]
    #[case(&b"add add add"[..], 3)]
    #[case(&b"div div div"[..], 3)]
    fn known_keys_route_to_known_shards(#[case] key: &[u8], #[case] expected: usize) {
        assert_eq!(router(4).route(key), expected);
    }

    #[test]
    fn single_shard_takes_everything() {
        let r = router(1);
        assert_eq!(r.shards(), 1);
        assert_eq!(r.route(b""), 0);
        assert_eq!(r.route(b"anything"), 0);
    }

    #[test]
    fn routing_is_stable_across_routers() {
        let a = router(7);
        let b = router(7);
        for key in [&b"alpha"[..], b"beta", b"gamma", b""] {
            assert_eq!(a.route(key), b.route(key));
        }
    }

    #[test]
    fn random_keys_cover_every_shard_roughly_evenly() {
        let r = router(8);
        let mut rng = rand::thread_rng();
        let mut hits = [0usize; 8];
        for _ in 0..8_000 {
            let key: [u8; 16] = rng.r#gen();
            hits[r.route(&key)] += 1;
        }
        // 期待値 1000 / shard。CRC32 なら大きく偏らない
        for (shard, count) in hits.iter().enumerate() {
            assert!(
                (700..1300).contains(count),
                "shard {shard} got {count} of 8000"
            );
        }
    }
}
