//! Content-addressed memoisation of per-file frontend results.
//!
//! Off by default. When enabled, the parse and symbol-collection result
//! of each file is stored under
//! `sha256(file bytes) ‖ compiler version ‖ target-profile token`.
//! Analysis results are never cached: analysis is whole-program.
//! Invalidation is purely by key change; no timestamps are consulted.

use crate::ast::SourceFile;
use crate::diagnostics::Diagnostic;
use crate::symbols::FileSymbols;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Cache key: one digest over content, compiler version, and profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    pub fn compute(source: &str, compiler_version: &str, profile_token: &str) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update([0u8]);
        hasher.update(compiler_version.as_bytes());
        hasher.update([0u8]);
        hasher.update(profile_token.as_bytes());
        CacheKey(hasher.finalize().into())
    }
}

/// The memoised frontend output for one file.
#[derive(Debug)]
pub struct CacheEntry {
    pub ast: SourceFile,
    pub symbols: FileSymbols,
    pub diagnostics: Vec<Diagnostic>,
}

/// Thread-safe frontend cache, shared between parallel compilation
/// units. Entries are immutable once inserted.
#[derive(Default)]
pub struct Cache {
    entries: Mutex<HashMap<CacheKey, Arc<CacheEntry>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl Cache {
    pub fn new() -> Self {
        Cache::default()
    }

    /// Fetch the entry for `key`, computing and storing it on a miss.
    pub fn get_or_insert_with<F>(&self, key: CacheKey, compute: F) -> Arc<CacheEntry>
    where
        F: FnOnce() -> CacheEntry,
    {
        if let Some(entry) = self.entries.lock().expect("cache poisoned").get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Arc::clone(entry);
        }
        // The lock is dropped while computing so a slow parse does not
        // serialise unrelated lookups; a racing duplicate insert is
        // harmless because entries for one key are identical.
        self.misses.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(compute());
        self.entries
            .lock()
            .expect("cache poisoned")
            .entry(key)
            .or_insert(entry)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::frontend;
    use std::path::Path;

    fn entry_for(source: &str) -> CacheEntry {
        let (ast, symbols, diagnostics) = frontend(source, Path::new("test.cnx"));
        CacheEntry { ast, symbols, diagnostics }
    }

    #[test]
    fn test_key_changes_with_content_version_and_profile() {
        let base = CacheKey::compute("u8 x;", "0.9.0", "host:primask");
        assert_eq!(base, CacheKey::compute("u8 x;", "0.9.0", "host:primask"));
        assert_ne!(base, CacheKey::compute("u8 y;", "0.9.0", "host:primask"));
        assert_ne!(base, CacheKey::compute("u8 x;", "0.9.1", "host:primask"));
        assert_ne!(base, CacheKey::compute("u8 x;", "0.9.0", "teensy41:ldrex"));
    }

    #[test]
    fn test_hit_returns_same_entry() {
        let cache = Cache::new();
        let key = CacheKey::compute("u8 x <- 0;\n", "0.9.0", "host");
        let first = cache.get_or_insert_with(key, || entry_for("u8 x <- 0;\n"));
        let second = cache.get_or_insert_with(key, || panic!("should not recompute"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_distinct_keys_stored_separately() {
        let cache = Cache::new();
        let a = CacheKey::compute("u8 a;", "0.9.0", "host");
        let b = CacheKey::compute("u8 b;", "0.9.0", "host");
        cache.get_or_insert_with(a, || entry_for("u8 a;"));
        cache.get_or_insert_with(b, || entry_for("u8 b;"));
        assert_eq!(cache.len(), 2);
    }
}
