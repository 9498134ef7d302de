//! Binary search over a remote, timestamp-ordered record range.
//!
//! Records are only reachable one round-trip at a time, so the search takes a key_at closure
//! that fetches the key at an index. The range is `0..count`; the result can be `count` when
//! the target lies after every record.

/// Smallest index whose key is `>= target`.
pub fn first_at_or_after<K, E>(
    count: u32,
    target: &K,
    key_at: impl FnMut(u32) -> Result<K, E>,
) -> Result<u32, E>
where
    K: Ord,
{
    partition_point(count, key_at, |key| key < target)
}

/// Smallest index whose key is `> target`.
///
/// Resuming after the last record already seen uses this, so that record is not repeated.
pub fn first_after<K, E>(
    count: u32,
    target: &K,
    key_at: impl FnMut(u32) -> Result<K, E>,
) -> Result<u32, E>
where
    K: Ord,
{
    partition_point(count, key_at, |key| key <= target)
}

/// First index at which `before` stops holding. `before` must be true for a prefix only.
fn partition_point<K, E>(
    count: u32,
    mut key_at: impl FnMut(u32) -> Result<K, E>,
    before: impl Fn(&K) -> bool,
) -> Result<u32, E> {
    let mut lower = 0u32;
    let mut upper = count;
    while lower < upper {
        let mid = lower + (upper - lower) / 2;
        let key = key_at(mid)?;
        if before(&key) {
            lower = mid + 1;
        } else {
            upper = mid;
        }
    }
    Ok(lower)
}
