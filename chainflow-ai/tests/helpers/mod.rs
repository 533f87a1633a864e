//! Shared fixtures for chainflow-ai integration tests
//!
//! - message/chain builders
//! - a scripted inference connector (no network)
//! - a temporary SQLite store

#![allow(dead_code)]

use async_trait::async_trait;
use chainflow_ai::config::ChainflowConfig;
use chainflow_ai::db::SqliteStore;
use chainflow_ai::error::InferenceError;
use chainflow_ai::services::{GenerationRequest, InferenceClient, InferenceConnector};
use chainflow_ai::types::{Chain, Message};
use chrono::{TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Model output that passes every quality check
pub const GOOD_JSON: &str = r#"{
    "classification": "bulk office chair purchase request",
    "category": "procurement",
    "entities": ["Acme Corp", "40 chairs"],
    "confidence": 0.82,
    "risk_assessment": "Requested delivery date is tight against supplier lead time",
    "action_items": ["Send a formal quote"],
    "rationale": "Explicit order request with quantity"
}"#;

/// Overconfident output with a boilerplate risk (scores 3.5)
pub const WEAK_JSON: &str = r#"{
    "classification": "bulk office chair purchase request",
    "category": "procurement",
    "entities": ["40 chairs"],
    "confidence": 0.99,
    "risk_assessment": "minor",
    "action_items": []
}"#;

/// Low-confidence output with a terse classification (scores 5.5)
pub const MIXED_JSON: &str = r#"{
    "classification": "lunch",
    "category": "scheduling",
    "entities": ["noon"],
    "confidence": 0.1,
    "risk_assessment": "Meeting time conflicts with the supplier call",
    "action_items": ["Confirm the lunch booking"],
    "rationale": "Informal meeting proposal"
}"#;

pub fn message(chain_id: &str, id: &str, minute: i64, content: &str, reply_to: Option<&str>) -> Message {
    Message {
        message_id: id.to_string(),
        chain_id: chain_id.to_string(),
        sender: "buyer@example.com".to_string(),
        subject: "Chairs".to_string(),
        content: content.to_string(),
        timestamp: Utc.timestamp_opt(1_700_000_000 + minute * 60, 0).unwrap(),
        in_reply_to: reply_to.map(str::to_string),
    }
}

/// Request answered by a confirmation: scores as complete
pub fn complete_chain(chain_id: &str) -> Chain {
    let first = format!("{}-m1", chain_id);
    Chain::new(
        chain_id,
        vec![
            message(chain_id, &first, 0, "We would like to place a new order for 40 chairs.", None),
            message(
                chain_id,
                &format!("{}-m2", chain_id),
                5,
                "Order confirmed, shipping next week.",
                Some(&first),
            ),
        ],
    )
}

/// Single message without progression markers: scores as incomplete
pub fn incomplete_chain(chain_id: &str) -> Chain {
    Chain::new(
        chain_id,
        vec![message(chain_id, &format!("{}-m1", chain_id), 0, "Lunch at noon?", None)],
    )
}

/// Config suitable for tests: no pacing, millisecond backoff, small pool
pub fn test_config() -> ChainflowConfig {
    let mut config = ChainflowConfig::default();
    config.pipeline.workers = 2;
    config.pipeline.rate.floor_ms = 0;
    config.pipeline.rate.min_spacing_ms = 0;
    config.pipeline.backoff.base_delay_ms = 1;
    config.pipeline.backoff.max_delay_ms = 5;
    config.pipeline.metrics_interval_secs = 1;
    config
}

/// Temporary database; keep the `TempDir` alive for the test's duration
pub async fn temp_store() -> (TempDir, Arc<SqliteStore>) {
    let temp_dir = TempDir::new().unwrap();
    let pool = chainflow_common::db::init_database(&temp_dir.path().join("test.db"))
        .await
        .unwrap();
    (temp_dir, Arc::new(SqliteStore::new(pool, 1000)))
}

type Reply = Result<String, InferenceError>;

struct Script {
    queued: Mutex<VecDeque<Reply>>,
    then: Reply,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

/// Connector whose clients share one reply script
///
/// Replies are consumed in call order across all workers; once the script is
/// exhausted every call gets `then`.
#[derive(Clone)]
pub struct ScriptedConnector {
    script: Arc<Script>,
    refuse_sessions: bool,
}

impl ScriptedConnector {
    pub fn always(reply: Reply) -> Self {
        Self::sequence(Vec::new(), reply)
    }

    pub fn sequence(replies: Vec<Reply>, then: Reply) -> Self {
        Self {
            script: Arc::new(Script {
                queued: Mutex::new(replies.into()),
                then,
                delay: None,
                calls: AtomicUsize::new(0),
            }),
            refuse_sessions: false,
        }
    }

    /// Every call takes `delay` before replying
    pub fn with_delay(self, delay: Duration) -> Self {
        let script = Arc::try_unwrap(self.script).ok().expect("configure before cloning");
        Self {
            script: Arc::new(Script {
                delay: Some(delay),
                ..script
            }),
            refuse_sessions: self.refuse_sessions,
        }
    }

    pub fn refusing_sessions() -> Self {
        Self {
            refuse_sessions: true,
            ..Self::always(Ok(GOOD_JSON.to_string()))
        }
    }

    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }
}

impl InferenceConnector for ScriptedConnector {
    fn connect(&self, _worker_id: usize) -> Result<Box<dyn InferenceClient>, InferenceError> {
        if self.refuse_sessions {
            return Err(InferenceError::Connection("connection refused".to_string()));
        }
        Ok(Box::new(ScriptedClient {
            script: Arc::clone(&self.script),
        }))
    }
}

struct ScriptedClient {
    script: Arc<Script>,
}

#[async_trait]
impl InferenceClient for ScriptedClient {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, InferenceError> {
        self.script.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .script
            .queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.script.then.clone());
        if let Some(delay) = self.script.delay {
            tokio::time::sleep(delay).await;
        }
        reply
    }
}
