//! Content fingerprints and the Phase 1 fingerprint cache
//!
//! Phase 1 is deterministic and reads only the normalized subject and content
//! of a message, so its result is a pure function of [`fingerprint_message`].
//! The cache memoizes it in a bounded in-memory LRU that reads through to the
//! store's `phase1_cache` table.
//!
//! Concurrent access: two workers computing the same fingerprint compute the
//! same value, so last-writer-wins is acceptable and no lock is held while
//! computing or while awaiting the store.

use crate::db::PhaseStore;
use crate::error::PipelineResult;
use crate::types::{Chain, Message, PhasePayload};
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Collapse whitespace runs to a single space and trim. Case is kept.
pub fn normalize_content(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fingerprint of the Phase 1 input: normalized subject and content
///
/// Normalized text holds no newline, so the separator is unambiguous.
pub fn fingerprint_message(message: &Message) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_content(&message.subject).as_bytes());
    hasher.update(b"\n");
    hasher.update(normalize_content(&message.content).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fingerprint of a chain's message set (order-independent)
///
/// Covers everything the completeness analyzer reads: ids, subject, content,
/// reply links and timestamps.
pub fn message_set_fingerprint(chain: &Chain) -> String {
    let mut entries: Vec<String> = chain
        .messages
        .iter()
        .map(|m| {
            format!(
                "{}:{}:{}:{}",
                m.message_id,
                fingerprint_message(m),
                m.in_reply_to.as_deref().unwrap_or(""),
                m.timestamp.timestamp_millis()
            )
        })
        .collect();
    entries.sort();

    let mut hasher = Sha256::new();
    for entry in &entries {
        hasher.update(entry.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Where a cached value was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOrigin {
    Memory,
    Store,
    Computed,
}

/// Bounded, read-through Phase 1 cache
pub struct FingerprintCache {
    entries: Mutex<LruCache<String, PhasePayload>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FingerprintCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Memory lookup only
    pub fn get(&self, fingerprint: &str) -> Option<PhasePayload> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(fingerprint).cloned()
    }

    pub fn insert(&self, fingerprint: String, payload: PhasePayload) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.put(fingerprint, payload);
    }

    /// Memory → store → compute; computed values are written to both tiers
    pub async fn get_or_compute<F>(
        &self,
        fingerprint: &str,
        store: &dyn PhaseStore,
        compute: F,
    ) -> PipelineResult<(PhasePayload, CacheOrigin)>
    where
        F: FnOnce() -> PhasePayload,
    {
        if let Some(payload) = self.get(fingerprint) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok((payload, CacheOrigin::Memory));
        }

        if let Some(payload) = store.get_cached_phase1(fingerprint).await? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.insert(fingerprint.to_string(), payload.clone());
            debug!(fingerprint = %short(fingerprint), "Phase 1 cache hit (store)");
            return Ok((payload, CacheOrigin::Store));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let payload = compute();
        store.put_cached_phase1(fingerprint, &payload).await?;
        self.insert(fingerprint.to_string(), payload.clone());
        debug!(fingerprint = %short(fingerprint), "Phase 1 computed and cached");
        Ok((payload, CacheOrigin::Computed))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

fn short(fingerprint: &str) -> &str {
    &fingerprint[..fingerprint.len().min(12)]
}
