//! Read-through memoization of machine hash traces.
//!
//! Collecting the machine hashes for one challenge request can mean
//! re-executing an entire block, so identical lookups are served from an
//! in-process LRU. Entries are never invalidated: the key includes the
//! challenged block's hash, and finalized history never changes
//! retroactively, so a hit can only ever be the same trace recomputed.

use alloy_primitives::B256;
use lru::LruCache;
use std::{num::NonZeroUsize, sync::Mutex};

/// Identifies one machine hash trace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceKey {
    /// Hash of the block whose execution is being traced.
    pub block_hash: B256,
    /// The wasm module root the machine runs under.
    pub wasm_module_root: B256,
    /// The message whose execution is traced.
    pub message: u64,
    /// The enclosing step heights narrowing the trace window.
    pub step_heights: Vec<u64>,
}

/// A mutex-guarded LRU of machine hash traces.
pub struct MachineHashCache {
    entries: Mutex<LruCache<TraceKey, Vec<B256>>>,
}

impl core::fmt::Debug for MachineHashCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MachineHashCache").finish_non_exhaustive()
    }
}

impl MachineHashCache {
    /// Creates a cache holding up to `capacity` traces.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self { entries: Mutex::new(LruCache::new(capacity)) }
    }

    /// Returns the first `num_hashes` entries of the cached trace, if a trace
    /// at least that long is cached.
    pub fn get(&self, key: &TraceKey, num_hashes: u64) -> Option<Vec<B256>> {
        let mut entries = self.entries.lock().unwrap();
        let trace = entries.get(key)?;
        if (trace.len() as u64) < num_hashes {
            return None;
        }
        Some(trace[..num_hashes as usize].to_vec())
    }

    /// Stores a trace.
    pub fn put(&self, key: TraceKey, trace: Vec<B256>) {
        self.entries.lock().unwrap().put(key, trace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(message: u64) -> TraceKey {
        TraceKey {
            block_hash: B256::with_last_byte(1),
            wasm_module_root: B256::with_last_byte(2),
            message,
            step_heights: vec![4],
        }
    }

    #[test]
    fn serves_prefixes_of_longer_traces() {
        let cache = MachineHashCache::new(4);
        let trace: Vec<B256> = (0..8u8).map(B256::with_last_byte).collect();
        cache.put(key(0), trace.clone());
        assert_eq!(cache.get(&key(0), 8), Some(trace.clone()));
        assert_eq!(cache.get(&key(0), 3), Some(trace[..3].to_vec()));
        assert_eq!(cache.get(&key(0), 9), None);
        assert_eq!(cache.get(&key(1), 1), None);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = MachineHashCache::new(2);
        cache.put(key(0), vec![B256::ZERO]);
        cache.put(key(1), vec![B256::ZERO]);
        cache.get(&key(0), 1);
        cache.put(key(2), vec![B256::ZERO]);
        assert!(cache.get(&key(1), 1).is_none());
        assert!(cache.get(&key(0), 1).is_some());
    }
}
