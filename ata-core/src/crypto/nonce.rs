//! Per-chunk nonces.
//!
//! nonce = base(16, the archive salt) || counter(8, LE)
//!
//! The counter is the archive-wide chunk ordinal. It is handed out by the
//! single orchestrating thread, once per chunk, so distinct chunks always get
//! distinct nonces under the archive key.

use crate::crypto::aead::NONCE_LEN;
use crate::crypto::kdf::SALT_LEN;
use crate::error::{AtaError, Result};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

pub fn nonce_for(base: &[u8; SALT_LEN], counter: u64) -> [u8; NONCE_LEN] {
    let mut n = [0u8; NONCE_LEN];
    n[..SALT_LEN].copy_from_slice(base);
    n[SALT_LEN..].copy_from_slice(&counter.to_le_bytes());
    n
}

#[derive(Debug, Default)]
pub struct NonceSequence {
    next: AtomicU64,
}

impl NonceSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next counter value.
    pub fn next(&self) -> Result<u64> {
        Ok(self.reserve(1)?.start)
    }

    /// Reserve `n` consecutive counter values.
    pub fn reserve(&self, n: u64) -> Result<Range<u64>> {
        let mut cur = self.next.load(Ordering::Relaxed);
        loop {
            let end = cur.checked_add(n).ok_or(AtaError::NonceExhausted)?;
            match self
                .next
                .compare_exchange_weak(cur, end, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Ok(cur..end),
                Err(seen) => cur = seen,
            }
        }
    }

    /// Number of counters handed out so far.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn million_nonces_are_unique() {
        let base = [0xA5u8; SALT_LEN];
        let seq = NonceSequence::new();
        let mut seen = HashSet::with_capacity(1_000_000);
        for _ in 0..1_000_000u64 {
            let c = seq.next().unwrap();
            assert!(seen.insert(nonce_for(&base, c)), "nonce reused at {c}");
        }
        assert_eq!(seq.issued(), 1_000_000);
    }

    #[test]
    fn reserved_ranges_do_not_overlap() {
        let seq = NonceSequence::new();
        let a = seq.reserve(10).unwrap();
        let b = seq.reserve(5).unwrap();
        let c = seq.next().unwrap();
        assert_eq!(a, 0..10);
        assert_eq!(b, 10..15);
        assert_eq!(c, 15);
    }

    #[test]
    fn concurrent_reservations_are_disjoint() {
        let seq = NonceSequence::new();
        let ranges: Vec<Range<u64>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| (0..100).map(|_| seq.reserve(3).unwrap()).collect::<Vec<_>>()))
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });
        let mut all: Vec<u64> = ranges.into_iter().flatten().collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 8 * 100 * 3);
    }

    #[test]
    fn exhaustion_is_an_error() {
        let seq = NonceSequence { next: AtomicU64::new(u64::MAX - 1) };
        assert!(seq.reserve(1).is_ok());
        assert!(matches!(seq.reserve(1), Err(AtaError::NonceExhausted)));
    }

    #[test]
    fn nonce_layout() {
        let n = nonce_for(&[1u8; SALT_LEN], 0x0102);
        assert_eq!(&n[..SALT_LEN], &[1u8; SALT_LEN]);
        assert_eq!(&n[SALT_LEN..], &[0x02, 0x01, 0, 0, 0, 0, 0, 0]);
    }
}
