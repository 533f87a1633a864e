//! Phase 1 memoization keyed by message fingerprint

pub mod fingerprint;

pub use fingerprint::{
    fingerprint_message, message_set_fingerprint, normalize_content, CacheOrigin,
    FingerprintCache,
};
