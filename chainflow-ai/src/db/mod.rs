//! Persistence for chainflow-ai
//!
//! `PhaseStore` is the seam between workers and the database. `SqliteStore`
//! backs it with the shared WAL-journaled SQLite file.

pub mod assessments;
pub mod messages;
pub mod phase_results;

use async_trait::async_trait;
use chainflow_common::Result;
use sqlx::SqlitePool;

use crate::types::{ChainAssessment, MessageState, Phase, PhasePayload, PhaseResult, QualityAssessment};

/// Store operations used by the pipeline
#[async_trait]
pub trait PhaseStore: Send + Sync {
    /// Persist the final result of one phase. Returns `false` when an
    /// identical result was already stored.
    async fn upsert_phase_result(&self, message_id: &str, result: &PhaseResult) -> Result<bool>;

    async fn get_phase_result(&self, message_id: &str, phase: Phase) -> Result<Option<PhaseResult>>;

    async fn get_cached_phase1(&self, fingerprint: &str) -> Result<Option<PhasePayload>>;

    async fn put_cached_phase1(&self, fingerprint: &str, payload: &PhasePayload) -> Result<()>;

    async fn save_message_state(&self, state: &MessageState) -> Result<()>;

    async fn load_message_state(&self, message_id: &str) -> Result<Option<MessageState>>;

    async fn list_parked(&self) -> Result<Vec<MessageState>>;

    async fn save_chain_assessment(&self, assessment: &ChainAssessment) -> Result<()>;

    async fn load_chain_assessment(
        &self,
        chain_id: &str,
        message_set_fingerprint: &str,
    ) -> Result<Option<ChainAssessment>>;

    async fn record_quality_audit(
        &self,
        message_id: &str,
        phase: Phase,
        assessment: &QualityAssessment,
    ) -> Result<()>;

    /// Cheap reachability check used after a store failure
    async fn ping(&self) -> Result<()>;
}

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl PhaseStore for SqliteStore {
    async fn upsert_phase_result(&self, message_id: &str, result: &PhaseResult) -> Result<bool> {
        phase_results::upsert_phase_result(&self.pool, message_id, result, self.max_lock_wait_ms).await
    }

    async fn get_phase_result(&self, message_id: &str, phase: Phase) -> Result<Option<PhaseResult>> {
        phase_results::get_phase_result(&self.pool, message_id, phase).await
    }

    async fn get_cached_phase1(&self, fingerprint: &str) -> Result<Option<PhasePayload>> {
        assessments::get_cached_phase1(&self.pool, fingerprint).await
    }

    async fn put_cached_phase1(&self, fingerprint: &str, payload: &PhasePayload) -> Result<()> {
        assessments::put_cached_phase1(&self.pool, fingerprint, payload, self.max_lock_wait_ms).await
    }

    async fn save_message_state(&self, state: &MessageState) -> Result<()> {
        messages::save_message_state(&self.pool, state, self.max_lock_wait_ms).await
    }

    async fn load_message_state(&self, message_id: &str) -> Result<Option<MessageState>> {
        messages::load_message_state(&self.pool, message_id).await
    }

    async fn list_parked(&self) -> Result<Vec<MessageState>> {
        messages::list_parked(&self.pool).await
    }

    async fn save_chain_assessment(&self, assessment: &ChainAssessment) -> Result<()> {
        assessments::save_chain_assessment(&self.pool, assessment, self.max_lock_wait_ms).await
    }

    async fn load_chain_assessment(
        &self,
        chain_id: &str,
        message_set_fingerprint: &str,
    ) -> Result<Option<ChainAssessment>> {
        assessments::load_chain_assessment(&self.pool, chain_id, message_set_fingerprint).await
    }

    async fn record_quality_audit(
        &self,
        message_id: &str,
        phase: Phase,
        assessment: &QualityAssessment,
    ) -> Result<()> {
        phase_results::record_quality_audit(&self.pool, message_id, phase, assessment, self.max_lock_wait_ms)
            .await
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
