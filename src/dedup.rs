//! Deduplication store for observed broadcast values
//!
//! The store is the single source of truth for "has this node already
//! disseminated this value". Insertion is the authoritative novelty signal:
//! exactly one caller ever sees `true` for a given value.

use std::collections::HashSet;
use std::hash::Hash;
use tokio::sync::RwLock;

/// Concurrency-safe, grow-only set of observed values
#[derive(Debug)]
pub struct DedupStore<V> {
    seen: RwLock<HashSet<V>>,
}

impl<V> DedupStore<V>
where
    V: Eq + Hash + Clone,
{
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            seen: RwLock::new(HashSet::new()),
        }
    }

    /// Record `value`, returning `true` only the first time it is seen.
    ///
    /// Membership check and insertion happen under one write lock, so two
    /// concurrent deliveries of the same value can never both be novel.
    pub async fn observe(&self, value: V) -> bool {
        self.seen.write().await.insert(value)
    }

    /// Point-in-time copy of every observed value
    pub async fn snapshot(&self) -> HashSet<V> {
        self.seen.read().await.clone()
    }

    /// Check for a value without recording it
    pub async fn contains(&self, value: &V) -> bool {
        self.seen.read().await.contains(value)
    }

    /// Number of distinct values observed
    pub async fn len(&self) -> usize {
        self.seen.read().await.len()
    }

    /// Whether nothing has been observed yet
    pub async fn is_empty(&self) -> bool {
        self.seen.read().await.is_empty()
    }
}

impl<V> Default for DedupStore<V>
where
    V: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
