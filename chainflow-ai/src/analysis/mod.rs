//! Chain analysis
//!
//! Each chain is scored once per message set; the assessment cache hands the
//! same `ChainAssessment` to every message of the chain.

pub mod completeness;

pub use completeness::{CompletenessAnalyzer, CompletenessWeights};

use crate::types::{Chain, ChainAssessment};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Read-mostly map of chain assessments, keyed by (chain id, message-set fingerprint)
#[derive(Default)]
pub struct AssessmentCache {
    entries: RwLock<HashMap<(String, String), Arc<ChainAssessment>>>,
}

impl AssessmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached assessment or score the chain and cache it.
    /// Second value is `true` when the chain was scored by this call.
    pub fn get_or_score(
        &self,
        analyzer: &CompletenessAnalyzer,
        chain: &Chain,
    ) -> (Arc<ChainAssessment>, bool) {
        let key = (
            chain.chain_id.clone(),
            crate::cache::message_set_fingerprint(chain),
        );

        if let Some(existing) = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return (Arc::clone(existing), false);
        }

        let assessment = Arc::new(analyzer.score(chain));
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = entries.entry(key).or_insert_with(|| Arc::clone(&assessment));
        (Arc::clone(entry), true)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
