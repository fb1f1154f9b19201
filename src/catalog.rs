// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Book metadata lookup with an in-process LRU cache.
//!
//! The metadata store is external (read-only); the pipeline consults it
//! once per session start to learn the title and content path. Metadata
//! is effectively immutable, so a small TTL'd LRU in front of it avoids
//! repeated lookups when the viewer reopens the same book. Access
//! decisions are never cached here or anywhere else.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;

use crate::models::{BookId, BookMetadata};

/// Read-only metadata store: `book_id -> {title, author, content_path}`.
#[async_trait]
pub trait BookCatalog: Send + Sync {
    /// Look up metadata for a book. `Ok(None)` means the book does not
    /// exist; `Err` means the store itself was unreachable.
    async fn metadata(&self, book_id: BookId) -> Result<Option<BookMetadata>, CatalogError>;
}

/// Errors from the external metadata store.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("metadata store unreachable: {0}")]
    Unreachable(String),
}

/// Cached entry: metadata + insertion timestamp.
struct CacheEntry {
    metadata: BookMetadata,
    inserted_at: Instant,
}

/// In-process LRU cache over book metadata lookups.
pub struct MetadataCache {
    cache: Mutex<LruCache<BookId, CacheEntry>>,
    ttl: Duration,
}

impl MetadataCache {
    /// Create a new cache with the given capacity and TTL.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap()),
            )),
            ttl,
        }
    }

    /// Get cached metadata for a book.
    ///
    /// Returns `None` if not cached or expired.
    pub fn get(&self, book_id: BookId) -> Option<BookMetadata> {
        let mut cache = self.cache.lock().ok()?;
        if let Some(entry) = cache.get(&book_id) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.metadata.clone());
            }
            // Expired — remove it
            cache.pop(&book_id);
        }
        None
    }

    /// Store metadata for a book.
    pub fn put(&self, metadata: BookMetadata) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                metadata.book_id,
                CacheEntry {
                    metadata,
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    /// Invalidate the cache for a specific book.
    pub fn invalidate(&self, book_id: BookId) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.pop(&book_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta(id: u64) -> BookMetadata {
        BookMetadata {
            book_id: BookId(id),
            title: "The Left Hand of Darkness".into(),
            author: "Ursula K. Le Guin".into(),
            content_path: format!("{id}/book.epub"),
        }
    }

    #[test]
    fn cache_put_and_get() {
        let cache = MetadataCache::new(10, Duration::from_secs(300));
        assert!(cache.get(BookId(42)).is_none());

        cache.put(sample_meta(42));

        let hit = cache.get(BookId(42)).unwrap();
        assert_eq!(hit.content_path, "42/book.epub");
    }

    #[test]
    fn cache_invalidate() {
        let cache = MetadataCache::new(10, Duration::from_secs(300));
        cache.put(sample_meta(7));
        assert!(cache.get(BookId(7)).is_some());

        cache.invalidate(BookId(7));
        assert!(cache.get(BookId(7)).is_none());
    }

    #[test]
    fn cache_ttl_expiry() {
        let cache = MetadataCache::new(10, Duration::from_millis(1));
        cache.put(sample_meta(99));

        std::thread::sleep(Duration::from_millis(5));

        assert!(cache.get(BookId(99)).is_none());
    }
}
