//! Chain assessments and the persistent tier of the Phase 1 cache

use chainflow_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use crate::types::{ChainAssessment, ChainType, PhasePayload, ProgressionMarker};
use crate::utils::retry_on_lock;
use std::collections::BTreeSet;

/// Record a scoring pass. The same chain and message set scores identically,
/// so an existing row is left as is.
pub async fn save_chain_assessment(
    pool: &SqlitePool,
    assessment: &ChainAssessment,
    max_wait_ms: u64,
) -> Result<()> {
    let markers = serde_json::to_string(&assessment.markers)
        .map_err(|e| Error::Internal(format!("Failed to serialize markers: {}", e)))?;
    let scored_at = chrono::Utc::now().to_rfc3339();

    retry_on_lock("save_chain_assessment", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO chain_assessments (
                chain_id, message_set_fingerprint, message_count, duration_span_secs,
                completeness_score, chain_type, is_complete, markers, scored_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chain_id, message_set_fingerprint) DO NOTHING
            "#,
        )
        .bind(&assessment.chain_id)
        .bind(&assessment.message_set_fingerprint)
        .bind(assessment.message_count as i64)
        .bind(assessment.duration_span_secs)
        .bind(assessment.completeness_score)
        .bind(assessment.chain_type.as_str())
        .bind(assessment.is_complete)
        .bind(&markers)
        .bind(&scored_at)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

pub async fn load_chain_assessment(
    pool: &SqlitePool,
    chain_id: &str,
    message_set_fingerprint: &str,
) -> Result<Option<ChainAssessment>> {
    let row = sqlx::query(
        r#"
        SELECT message_count, duration_span_secs, completeness_score,
               chain_type, is_complete, markers
        FROM chain_assessments
        WHERE chain_id = ? AND message_set_fingerprint = ?
        "#,
    )
    .bind(chain_id)
    .bind(message_set_fingerprint)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let chain_type: String = row.get("chain_type");
    let chain_type = match chain_type.as_str() {
        "request" => ChainType::Request,
        "negotiation" => ChainType::Negotiation,
        "support" => ChainType::Support,
        "general" => ChainType::General,
        other => {
            return Err(Error::Internal(format!("Invalid chain type in store: {}", other)));
        }
    };
    let markers: String = row.get("markers");
    let markers: BTreeSet<ProgressionMarker> = serde_json::from_str(&markers)
        .map_err(|e| Error::Internal(format!("Failed to deserialize markers: {}", e)))?;

    Ok(Some(ChainAssessment {
        chain_id: chain_id.to_string(),
        message_count: row.get::<i64, _>("message_count") as usize,
        duration_span_secs: row.get("duration_span_secs"),
        completeness_score: row.get("completeness_score"),
        chain_type,
        markers,
        is_complete: row.get("is_complete"),
        message_set_fingerprint: message_set_fingerprint.to_string(),
    }))
}

pub async fn get_cached_phase1(pool: &SqlitePool, fingerprint: &str) -> Result<Option<PhasePayload>> {
    let payload: Option<String> =
        sqlx::query_scalar("SELECT payload FROM phase1_cache WHERE fingerprint = ?")
            .bind(fingerprint)
            .fetch_optional(pool)
            .await?;

    payload
        .map(|p| {
            serde_json::from_str(&p)
                .map_err(|e| Error::Internal(format!("Failed to deserialize cached payload: {}", e)))
        })
        .transpose()
}

/// Last writer wins; Phase 1 is deterministic so concurrent writers agree
pub async fn put_cached_phase1(
    pool: &SqlitePool,
    fingerprint: &str,
    payload: &PhasePayload,
    max_wait_ms: u64,
) -> Result<()> {
    let payload = serde_json::to_string(payload)
        .map_err(|e| Error::Internal(format!("Failed to serialize payload: {}", e)))?;
    let created_at = chrono::Utc::now().to_rfc3339();

    retry_on_lock("put_cached_phase1", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO phase1_cache (fingerprint, payload, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(fingerprint) DO UPDATE SET payload = excluded.payload
            "#,
        )
        .bind(fingerprint)
        .bind(&payload)
        .bind(&created_at)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}
