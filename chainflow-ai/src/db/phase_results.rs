//! Final phase results and the quality audit trail

use chainflow_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use crate::types::{Phase, PhasePayload, PhaseResult, QualityAssessment, ResultSource};
use crate::utils::retry_on_lock;

/// Persist the single final result for `(message_id, phase)`.
///
/// Re-persisting an identical result leaves the row untouched (including
/// `created_at`). Returns `true` when a row was inserted or changed.
pub async fn upsert_phase_result(
    pool: &SqlitePool,
    message_id: &str,
    result: &PhaseResult,
    max_wait_ms: u64,
) -> Result<bool> {
    let phase = result.phase.number() as i64;
    let source = result.source.as_str();
    let payload = serde_json::to_string(&result.payload)
        .map_err(|e| Error::Internal(format!("Failed to serialize payload: {}", e)))?;
    let quality_score = result.quality_score.map(f64::from);
    let latency_ms = result.latency_ms as i64;
    let retry_count = result.retry_count as i64;
    let created_at = chrono::Utc::now().to_rfc3339();

    retry_on_lock("upsert_phase_result", max_wait_ms, || async {
        let outcome = sqlx::query(
            r#"
            INSERT INTO phase_results (
                message_id, phase, source, quality_score, latency_ms,
                retry_count, payload, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(message_id, phase) DO UPDATE SET
                source = excluded.source,
                quality_score = excluded.quality_score,
                latency_ms = excluded.latency_ms,
                retry_count = excluded.retry_count,
                payload = excluded.payload,
                created_at = excluded.created_at
            WHERE phase_results.source IS NOT excluded.source
               OR phase_results.quality_score IS NOT excluded.quality_score
               OR phase_results.latency_ms IS NOT excluded.latency_ms
               OR phase_results.retry_count IS NOT excluded.retry_count
               OR phase_results.payload IS NOT excluded.payload
            "#,
        )
        .bind(message_id)
        .bind(phase)
        .bind(source)
        .bind(quality_score)
        .bind(latency_ms)
        .bind(retry_count)
        .bind(&payload)
        .bind(&created_at)
        .execute(pool)
        .await?;

        Ok(outcome.rows_affected() > 0)
    })
    .await
}

pub async fn get_phase_result(
    pool: &SqlitePool,
    message_id: &str,
    phase: Phase,
) -> Result<Option<PhaseResult>> {
    let row = sqlx::query(
        r#"
        SELECT phase, source, quality_score, latency_ms, retry_count, payload
        FROM phase_results
        WHERE message_id = ? AND phase = ?
        "#,
    )
    .bind(message_id)
    .bind(phase.number() as i64)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let source: String = row.get("source");
    let source = ResultSource::parse(&source)
        .ok_or_else(|| Error::Internal(format!("Invalid result source in store: {}", source)))?;
    let payload: String = row.get("payload");
    let payload: PhasePayload = serde_json::from_str(&payload)
        .map_err(|e| Error::Internal(format!("Failed to deserialize payload: {}", e)))?;
    let quality_score: Option<f64> = row.get("quality_score");

    Ok(Some(PhaseResult {
        phase,
        payload,
        source,
        quality_score: quality_score.map(|q| q as f32),
        latency_ms: row.get::<i64, _>("latency_ms") as u64,
        retry_count: row.get::<i64, _>("retry_count") as u32,
    }))
}

/// Append one assessor decision to the audit trail
pub async fn record_quality_audit(
    pool: &SqlitePool,
    message_id: &str,
    phase: Phase,
    assessment: &QualityAssessment,
    max_wait_ms: u64,
) -> Result<()> {
    let deductions = serde_json::to_string(&assessment.deductions)
        .map_err(|e| Error::Internal(format!("Failed to serialize deductions: {}", e)))?;
    let recorded_at = chrono::Utc::now().to_rfc3339();

    retry_on_lock("record_quality_audit", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO quality_audit (message_id, phase, total_score, decision, deductions, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(message_id)
        .bind(phase.number() as i64)
        .bind(assessment.total_score as f64)
        .bind(assessment.decision.as_str())
        .bind(&deductions)
        .bind(&recorded_at)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}
