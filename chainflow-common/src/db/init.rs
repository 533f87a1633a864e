//! Database initialization
//!
//! Opens (or creates) the SQLite store with write-ahead journaling so worker
//! writes never block progress readers, then creates the pipeline tables.
//! Table creation is idempotent and safe to run on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Default busy timeout applied to every connection (ms)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query(&format!("PRAGMA busy_timeout = {}", DEFAULT_BUSY_TIMEOUT_MS))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows concurrent readers with one writer
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create all pipeline tables (idempotent)
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    create_chain_assessments_table(pool).await?;
    create_messages_table(pool).await?;
    create_phase_results_table(pool).await?;
    create_phase1_cache_table(pool).await?;
    create_quality_audit_table(pool).await?;

    info!("Database tables initialized");
    Ok(())
}

/// One row per scoring pass; a re-ingested chain with a different message set
/// gets a new row instead of mutating the earlier one
pub async fn create_chain_assessments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chain_assessments (
            chain_id TEXT NOT NULL,
            message_set_fingerprint TEXT NOT NULL,
            message_count INTEGER NOT NULL,
            duration_span_secs INTEGER NOT NULL,
            completeness_score REAL NOT NULL,
            chain_type TEXT NOT NULL,
            is_complete INTEGER NOT NULL,
            markers TEXT NOT NULL DEFAULT '[]',
            scored_at TEXT NOT NULL,
            PRIMARY KEY (chain_id, message_set_fingerprint)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_messages_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            message_id TEXT PRIMARY KEY,
            chain_id TEXT NOT NULL,
            content_fingerprint TEXT NOT NULL,
            assigned_phases TEXT NOT NULL DEFAULT '[]',
            current_phase INTEGER,
            status TEXT NOT NULL DEFAULT 'PENDING',
            attempts INTEGER NOT NULL DEFAULT 0,
            failure_reason TEXT,
            parked INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_status ON messages(status, parked)")
        .execute(pool)
        .await?;
    Ok(())
}

/// Exactly one final result per (message, phase)
pub async fn create_phase_results_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS phase_results (
            message_id TEXT NOT NULL,
            phase INTEGER NOT NULL,
            source TEXT NOT NULL,
            quality_score REAL,
            latency_ms INTEGER NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (message_id, phase)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_phase1_cache_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS phase1_cache (
            fingerprint TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_quality_audit_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS quality_audit (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id TEXT NOT NULL,
            phase INTEGER NOT NULL,
            total_score REAL NOT NULL,
            decision TEXT NOT NULL,
            deductions TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}
