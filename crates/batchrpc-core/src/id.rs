//! Request id allocation.
//!
//! Ids come from a wrapping counter seeded with a random 32-bit value and
//! confined to the 53-bit range JSON numbers represent exactly. Two live
//! requests can only share an id if 2^53 ids were issued while one of them was
//! still outstanding; the allocator additionally skips any id the caller
//! reports as taken.

use std::sync::atomic::{AtomicU64, Ordering};

/// Largest id handed out (2^53 - 1).
pub const MAX_ID: u64 = (1 << 53) - 1;

#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// A generator starting at a random offset.
    pub fn new() -> Self {
        Self::starting_at(u64::from(rand::random::<u32>()))
    }

    /// A generator whose first id is `start` (masked into range).
    pub fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start & MAX_ID),
        }
    }

    /// Draw the next id for which `taken` returns `false`.
    pub fn next_free(&self, mut taken: impl FnMut(u64) -> bool) -> u64 {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed) & MAX_ID;
            if !taken(id) {
                return id;
            }
            tracing::trace!(id, "request id still in flight, skipping");
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn sequential_ids_are_distinct() {
        let ids = IdGenerator::starting_at(100);
        let issued: HashSet<u64> = (0..1000).map(|_| ids.next_free(|_| false)).collect();
        assert_eq!(issued.len(), 1000);
    }

    #[test]
    fn skips_taken_ids() {
        let ids = IdGenerator::starting_at(10);
        let live: HashSet<u64> = [10, 11, 13].into_iter().collect();
        assert_eq!(ids.next_free(|id| live.contains(&id)), 12);
        assert_eq!(ids.next_free(|id| live.contains(&id)), 14);
    }

    #[test]
    fn wraps_within_json_safe_range() {
        let ids = IdGenerator::starting_at(MAX_ID);
        assert_eq!(ids.next_free(|_| false), MAX_ID);
        assert_eq!(ids.next_free(|_| false), 0);
    }
}
