//! Content-addressed bytecode cache.
//!
//! Compiled programs are keyed by the SHA-256 of their source text, so a
//! changed source invalidates itself. Eviction is strict LRU at a fixed
//! capacity. The cache is shared across all compiles in the process;
//! access is serialized so concurrent hits and inserts cannot corrupt the
//! recency order.

use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::codegen::program::CompiledProgram;
use crate::sourcemap::SourceMapping;

/// Default maximum number of cached entries.
pub const DEFAULT_MAX_SIZE: usize = 100;

type Entry = (Arc<CompiledProgram>, Arc<Vec<SourceMapping>>);

struct Inner {
    /// Most recently used last.
    order: Vec<String>,
    entries: std::collections::HashMap<String, Entry>,
}

pub struct BytecodeCache {
    inner: Mutex<Inner>,
    max_size: usize,
}

impl Default for BytecodeCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE)
    }
}

impl BytecodeCache {
    pub fn new(max_size: usize) -> Self {
        tracing::debug!(max_size, "created bytecode cache");
        Self {
            inner: Mutex::new(Inner { order: Vec::new(), entries: std::collections::HashMap::new() }),
            max_size,
        }
    }

    /// SHA-256 hex digest of the source text — the cache key.
    pub fn compute_key(source: &str) -> String {
        hex::encode(Sha256::digest(source.as_bytes()))
    }

    /// Cached (program, mappings) for this source, refreshing recency.
    pub fn get(&self, source: &str) -> Option<Entry> {
        let key = Self::compute_key(source);
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get(&key).cloned() {
            if let Some(pos) = inner.order.iter().position(|k| *k == key) {
                inner.order.remove(pos);
            }
            inner.order.push(key);
            tracing::debug!("bytecode cache hit");
            Some(entry)
        } else {
            tracing::debug!("bytecode cache miss");
            None
        }
    }

    /// Insert a compile result, evicting least-recently-used entries while
    /// the cache is at capacity.
    pub fn put(
        &self,
        source: &str,
        program: Arc<CompiledProgram>,
        mappings: Arc<Vec<SourceMapping>>,
    ) {
        let key = Self::compute_key(source);
        let mut inner = self.inner.lock();

        if inner.entries.contains_key(&key) {
            if let Some(pos) = inner.order.iter().position(|k| *k == key) {
                inner.order.remove(pos);
            }
        } else {
            while inner.entries.len() >= self.max_size {
                let evicted = inner.order.remove(0);
                inner.entries.remove(&evicted);
                tracing::debug!(key = %&evicted[..12.min(evicted.len())], "evicted cache entry");
            }
        }

        inner.order.push(key.clone());
        inner.entries.insert(key, (program, mappings));
    }

    /// Remove the entry for this source. Returns true when one existed.
    pub fn invalidate(&self, source: &str) -> bool {
        let key = Self::compute_key(source);
        let mut inner = self.inner.lock();
        if inner.entries.remove(&key).is_some() {
            if let Some(pos) = inner.order.iter().position(|k| *k == key) {
                inner.order.remove(pos);
            }
            true
        } else {
            false
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}
