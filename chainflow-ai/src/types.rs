//! Core types for the adaptive multi-phase pipeline
//!
//! Chains and messages come from ingestion; phase results, generated outputs
//! and quality assessments are produced while a worker processes a message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// Chains and Messages
// ============================================================================

/// One message record as supplied by ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    /// Correlation key shared by every message of the chain
    pub chain_id: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub subject: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Message id this one replies to, when known
    #[serde(default)]
    pub in_reply_to: Option<String>,
}

/// A set of time-ordered messages sharing a correlation key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    pub chain_id: String,
    pub messages: Vec<Message>,
}

impl Chain {
    /// Build a chain, ordering messages by timestamp (message id breaks ties)
    pub fn new(chain_id: impl Into<String>, mut messages: Vec<Message>) -> Self {
        messages.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });
        Self {
            chain_id: chain_id.into(),
            messages,
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Seconds between the first and last message
    pub fn duration_span_secs(&self) -> i64 {
        match (self.messages.first(), self.messages.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp).num_seconds().max(0),
            _ => 0,
        }
    }
}

/// Interaction type inferred from chain vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainType {
    Request,
    Negotiation,
    Support,
    General,
}

impl ChainType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainType::Request => "request",
            ChainType::Negotiation => "negotiation",
            ChainType::Support => "support",
            ChainType::General => "general",
        }
    }
}

/// Narrative progression marker classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressionMarker {
    /// New request or inquiry
    Opening,
    /// Status change, clarification, negotiation
    Progress,
    /// Confirmation, resolution, delivery
    Closing,
    /// Opening/progress activity after the last closing marker
    Dangling,
    /// A single message carried both opening and closing markers
    Ambiguous,
}

/// Completeness analysis output, computed once per chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainAssessment {
    pub chain_id: String,
    pub message_count: usize,
    pub duration_span_secs: i64,
    /// 0.0-1.0
    pub completeness_score: f64,
    pub chain_type: ChainType,
    pub markers: BTreeSet<ProgressionMarker>,
    /// `completeness_score >= threshold` (and enough messages)
    pub is_complete: bool,
    /// Fingerprint of the scored message set
    pub message_set_fingerprint: String,
}

// ============================================================================
// Phases and Status
// ============================================================================

/// Analysis stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    /// Deterministic rules (cheap, cached by fingerprint)
    One,
    /// Model-assisted enhancement
    Two,
    /// Deep chain-level model analysis (complete chains only)
    Three,
}

impl Phase {
    pub fn number(&self) -> u8 {
        match self {
            Phase::One => 1,
            Phase::Two => 2,
            Phase::Three => 3,
        }
    }

    pub fn from_number(n: i64) -> Option<Self> {
        match n {
            1 => Some(Phase::One),
            2 => Some(Phase::Two),
            3 => Some(Phase::Three),
            _ => None,
        }
    }

    /// Phases 2 and 3 call the language model
    pub fn is_generative(&self) -> bool {
        !matches!(self, Phase::One)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "phase{}", self.number())
    }
}

/// Message processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Pending,
    InPhase,
    Done,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "PENDING",
            MessageStatus::InPhase => "IN_PHASE",
            MessageStatus::Done => "DONE",
            MessageStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(MessageStatus::Pending),
            "IN_PHASE" => Some(MessageStatus::InPhase),
            "DONE" => Some(MessageStatus::Done),
            "FAILED" => Some(MessageStatus::Failed),
            _ => None,
        }
    }
}

/// Persisted per-message processing state
#[derive(Debug, Clone, PartialEq)]
pub struct MessageState {
    pub message_id: String,
    pub chain_id: String,
    pub content_fingerprint: String,
    pub assigned_phases: Vec<Phase>,
    /// Last phase that completed successfully
    pub current_phase: Option<Phase>,
    pub status: MessageStatus,
    pub attempts: u32,
    pub failure_reason: Option<String>,
    pub parked: bool,
}

// ============================================================================
// Phase Results
// ============================================================================

/// Where a final result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultSource {
    RuleBased,
    Generated,
    Hybrid,
}

impl ResultSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultSource::RuleBased => "RULE_BASED",
            ResultSource::Generated => "GENERATED",
            ResultSource::Hybrid => "HYBRID",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RULE_BASED" => Some(ResultSource::RuleBased),
            "GENERATED" => Some(ResultSource::Generated),
            "HYBRID" => Some(ResultSource::Hybrid),
            _ => None,
        }
    }
}

/// Structured business signals for one message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhasePayload {
    /// Primary classification (free text, e.g. "quote request for bulk order")
    pub classification: String,
    /// Category label (e.g. "procurement")
    pub category: String,
    pub entities: Vec<String>,
    /// 0.0-1.0
    pub confidence: f32,
    #[serde(default)]
    pub risk_assessment: Option<String>,
    #[serde(default)]
    pub action_items: Vec<String>,
    #[serde(default)]
    pub rationale: String,
    /// Set by Phase 1 rules; generated results inherit the fallback's flag
    #[serde(default)]
    pub high_priority: bool,
}

/// Output of one phase for one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: Phase,
    pub payload: PhasePayload,
    pub source: ResultSource,
    /// 0-10, only for GENERATED/HYBRID
    pub quality_score: Option<f32>,
    pub latency_ms: u64,
    /// Model-call retries spent producing this result
    #[serde(default)]
    pub retry_count: u32,
}

/// Model output after parsing: always well-typed for the assessor
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedOutput {
    Parsed(PhaseResult),
    ParseError { reason: String },
}

// ============================================================================
// Quality Assessment
// ============================================================================

/// Independent quality dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityDimension {
    StructuralValidity,
    EntityDelta,
    ConfidencePlausibility,
    RiskSpecificity,
    CategorySpecificity,
}

/// One deduction applied by the assessor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deduction {
    pub dimension: QualityDimension,
    pub points: f32,
    pub reason: String,
}

/// Which result becomes final
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    UseGenerated,
    UseHybrid,
    UseFallback,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::UseGenerated => "USE_GENERATED",
            Decision::UseHybrid => "USE_HYBRID",
            Decision::UseFallback => "USE_FALLBACK",
        }
    }
}

/// Ephemeral scoring record (audit-logged only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub deductions: Vec<Deduction>,
    /// 0.0-10.0
    pub total_score: f32,
    pub decision: Decision,
}

// ============================================================================
// Tasks
// ============================================================================

/// Unit of work pulled by a worker: process `message_id` starting at `phase`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTask {
    pub chain_id: String,
    pub message_id: String,
    pub phase: Phase,
    /// Scheduler-level attempt number (1-based)
    pub attempt: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg(id: &str, secs: i64) -> Message {
        Message {
            message_id: id.to_string(),
            chain_id: "c".to_string(),
            sender: String::new(),
            subject: String::new(),
            content: "hello".to_string(),
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            in_reply_to: None,
        }
    }

    #[test]
    fn test_chain_orders_messages_by_time() {
        let chain = Chain::new("c", vec![msg("b", 30), msg("a", 10), msg("c", 20)]);
        let ids: Vec<_> = chain.messages.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert_eq!(chain.duration_span_secs(), 20);
    }

    #[test]
    fn test_phase_numbers_round_trip() {
        for phase in [Phase::One, Phase::Two, Phase::Three] {
            assert_eq!(Phase::from_number(phase.number() as i64), Some(phase));
        }
        assert_eq!(Phase::from_number(4), None);
        assert!(!Phase::One.is_generative());
        assert!(Phase::Three.is_generative());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(MessageStatus::parse("IN_PHASE"), Some(MessageStatus::InPhase));
        assert_eq!(MessageStatus::Failed.as_str(), "FAILED");
        assert_eq!(MessageStatus::parse("bogus"), None);
    }
}
