//! Message state persistence
//!
//! The worker pool is the only writer of `status`/`current_phase` while a task
//! is in flight. Each save is one short, individually committed statement.

use chainflow_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::types::{MessageState, MessageStatus, Phase};
use crate::utils::retry_on_lock;

/// Insert or update a message's processing state
pub async fn save_message_state(
    pool: &SqlitePool,
    state: &MessageState,
    max_wait_ms: u64,
) -> Result<()> {
    // Prepare all data BEFORE acquiring a connection
    let phases: Vec<u8> = state.assigned_phases.iter().map(Phase::number).collect();
    let assigned_phases = serde_json::to_string(&phases)
        .map_err(|e| Error::Internal(format!("Failed to serialize assigned phases: {}", e)))?;
    let current_phase = state.current_phase.map(|p| p.number() as i64);
    let status = state.status.as_str();
    let attempts = state.attempts as i64;
    let updated_at = chrono::Utc::now().to_rfc3339();

    retry_on_lock("save_message_state", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO messages (
                message_id, chain_id, content_fingerprint, assigned_phases,
                current_phase, status, attempts, failure_reason, parked, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(message_id) DO UPDATE SET
                chain_id = excluded.chain_id,
                content_fingerprint = excluded.content_fingerprint,
                assigned_phases = excluded.assigned_phases,
                current_phase = excluded.current_phase,
                status = excluded.status,
                attempts = excluded.attempts,
                failure_reason = excluded.failure_reason,
                parked = excluded.parked,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.message_id)
        .bind(&state.chain_id)
        .bind(&state.content_fingerprint)
        .bind(&assigned_phases)
        .bind(current_phase)
        .bind(status)
        .bind(attempts)
        .bind(&state.failure_reason)
        .bind(state.parked)
        .bind(&updated_at)
        .execute(pool)
        .await?;

        Ok(())
    })
    .await
}

pub async fn load_message_state(pool: &SqlitePool, message_id: &str) -> Result<Option<MessageState>> {
    let row = sqlx::query(
        r#"
        SELECT message_id, chain_id, content_fingerprint, assigned_phases,
               current_phase, status, attempts, failure_reason, parked
        FROM messages
        WHERE message_id = ?
        "#,
    )
    .bind(message_id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| state_from_row(&row)).transpose()
}

/// Messages that exhausted their retries and await manual inspection
pub async fn list_parked(pool: &SqlitePool) -> Result<Vec<MessageState>> {
    let rows = sqlx::query(
        r#"
        SELECT message_id, chain_id, content_fingerprint, assigned_phases,
               current_phase, status, attempts, failure_reason, parked
        FROM messages
        WHERE parked = 1
        ORDER BY updated_at, message_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(state_from_row).collect()
}

/// Count of messages per status (parked rows included under FAILED)
pub async fn count_by_status(pool: &SqlitePool, status: MessageStatus) -> Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE status = ?")
        .bind(status.as_str())
        .fetch_one(pool)
        .await?;
    Ok(count as u64)
}

fn state_from_row(row: &SqliteRow) -> Result<MessageState> {
    let assigned: String = row.get("assigned_phases");
    let numbers: Vec<i64> = serde_json::from_str(&assigned)
        .map_err(|e| Error::Internal(format!("Failed to deserialize assigned phases: {}", e)))?;
    let assigned_phases = numbers
        .into_iter()
        .map(|n| {
            Phase::from_number(n)
                .ok_or_else(|| Error::Internal(format!("Invalid phase number in store: {}", n)))
        })
        .collect::<Result<Vec<_>>>()?;

    let current_phase: Option<i64> = row.get("current_phase");
    let current_phase = current_phase
        .map(|n| {
            Phase::from_number(n)
                .ok_or_else(|| Error::Internal(format!("Invalid current phase in store: {}", n)))
        })
        .transpose()?;

    let status: String = row.get("status");
    let status = MessageStatus::parse(&status)
        .ok_or_else(|| Error::Internal(format!("Invalid message status in store: {}", status)))?;

    Ok(MessageState {
        message_id: row.get("message_id"),
        chain_id: row.get("chain_id"),
        content_fingerprint: row.get("content_fingerprint"),
        assigned_phases,
        current_phase,
        status,
        attempts: row.get::<i64, _>("attempts") as u32,
        failure_reason: row.get("failure_reason"),
        parked: row.get("parked"),
    })
}
