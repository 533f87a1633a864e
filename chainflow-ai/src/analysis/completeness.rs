//! Chain Completeness Analyzer
//!
//! Scores how much of a chain's narrative arc (open → progress → close) is
//! present and classifies the chain type. Pure and deterministic: the same
//! message set always yields the same assessment.
//!
//! # Scoring
//! Weighted sum (defaults):
//! - Opening marker present: 0.25
//! - Progress marker present: 0.15
//! - Closing marker present: 0.25
//! - Thread-reference density (replies referencing a prior message): 0.25
//! - No dangling markers (nothing left open after the last close): 0.10
//!
//! # Ambiguity
//! A message carrying both opening and closing markers is scored under both
//! readings (as an opening only, as a closing only) and the lower chain score
//! is kept.

use crate::cache::message_set_fingerprint;
use crate::config::PipelineConfig;
use crate::types::{Chain, ChainAssessment, ChainType, Message, ProgressionMarker};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

const OPENING_PHRASES: &[&str] = &[
    "request",
    "requesting",
    "inquiry",
    "enquiry",
    "could you",
    "can you",
    "would like to",
    "looking for",
    "interested in",
    "new order",
    "please send",
    "please provide",
    "question about",
    "i need",
    "we need",
];

const PROGRESS_PHRASES: &[&str] = &[
    "following up",
    "follow up",
    "update",
    "status",
    "clarify",
    "clarification",
    "counter offer",
    "counteroffer",
    "revised",
    "in progress",
    "pending",
    "proposal",
    "we can offer",
    "working on",
    "looking into",
    "negotiate",
];

const CLOSING_PHRASES: &[&str] = &[
    "confirm",
    "confirmed",
    "confirmation",
    "resolved",
    "delivered",
    "shipped",
    "completed",
    "closed",
    "agreed",
    "accepted",
    "fixed",
    "order placed",
    "thanks for confirming",
];

const NEGOTIATION_TERMS: &[&str] = &[
    "price", "pricing", "discount", "offer", "counter offer", "quote", "terms", "contract",
    "rate", "budget",
];

const SUPPORT_TERMS: &[&str] = &[
    "issue", "problem", "error", "broken", "bug", "not working", "ticket", "outage", "refund",
    "complaint",
];

const REQUEST_TERMS: &[&str] = &[
    "request", "need", "order", "please send", "inquiry", "purchase", "require", "looking for",
];

/// Per-dimension weights of the completeness score
#[derive(Debug, Clone, PartialEq)]
pub struct CompletenessWeights {
    pub opening: f64,
    pub progress: f64,
    pub closing: f64,
    pub thread_density: f64,
    pub no_dangling: f64,
}

impl Default for CompletenessWeights {
    fn default() -> Self {
        Self {
            opening: 0.25,
            progress: 0.15,
            closing: 0.25,
            thread_density: 0.25,
            no_dangling: 0.10,
        }
    }
}

/// Marker classes detected in a single message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct MessageMarkers {
    opening: bool,
    progress: bool,
    closing: bool,
}

impl MessageMarkers {
    fn is_ambiguous(&self) -> bool {
        self.opening && self.closing
    }

    fn any(&self) -> bool {
        self.opening || self.progress || self.closing
    }
}

/// How ambiguous messages are read when scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reading {
    AsOpening,
    AsClosing,
}

/// Completeness analyzer
pub struct CompletenessAnalyzer {
    threshold: f64,
    min_messages: usize,
    weights: CompletenessWeights,
}

impl CompletenessAnalyzer {
    pub fn new(threshold: f64, min_messages: usize) -> Self {
        Self {
            threshold,
            min_messages,
            weights: CompletenessWeights::default(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.completeness_threshold, config.min_messages_for_complete)
    }

    pub fn with_weights(mut self, weights: CompletenessWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score a chain: completeness, type and markers
    pub fn score(&self, chain: &Chain) -> ChainAssessment {
        let per_message: Vec<MessageMarkers> = chain.messages.iter().map(detect_markers).collect();
        let any_ambiguous = per_message.iter().any(MessageMarkers::is_ambiguous);

        let density = thread_reference_density(&chain.messages);

        let (score, markers) = if any_ambiguous {
            let as_opening = self.score_reading(&per_message, density, Reading::AsOpening);
            let as_closing = self.score_reading(&per_message, density, Reading::AsClosing);
            // Conservative: keep the lower interpretation
            let (score, mut markers) = if as_closing.0 < as_opening.0 {
                as_closing
            } else {
                as_opening
            };
            markers.insert(ProgressionMarker::Ambiguous);
            (score, markers)
        } else {
            self.score_reading(&per_message, density, Reading::AsOpening)
        };

        let score = score.clamp(0.0, 1.0);
        let is_complete = chain.message_count() >= self.min_messages && score >= self.threshold;
        let chain_type = classify_chain_type(&chain.messages);

        debug!(
            chain_id = %chain.chain_id,
            messages = chain.message_count(),
            score,
            density,
            is_complete,
            chain_type = chain_type.as_str(),
            "Chain completeness scored"
        );

        ChainAssessment {
            chain_id: chain.chain_id.clone(),
            message_count: chain.message_count(),
            duration_span_secs: chain.duration_span_secs(),
            completeness_score: score,
            chain_type,
            markers,
            is_complete,
            message_set_fingerprint: message_set_fingerprint(chain),
        }
    }

    fn score_reading(
        &self,
        per_message: &[MessageMarkers],
        density: f64,
        reading: Reading,
    ) -> (f64, BTreeSet<ProgressionMarker>) {
        let resolved: Vec<MessageMarkers> = per_message
            .iter()
            .map(|m| {
                if m.is_ambiguous() {
                    match reading {
                        Reading::AsOpening => MessageMarkers { closing: false, ..*m },
                        Reading::AsClosing => MessageMarkers { opening: false, ..*m },
                    }
                } else {
                    *m
                }
            })
            .collect();

        let has_opening = resolved.iter().any(|m| m.opening);
        let has_progress = resolved.iter().any(|m| m.progress);
        let has_closing = resolved.iter().any(|m| m.closing);
        let has_any = resolved.iter().any(MessageMarkers::any);

        let last_closing = resolved.iter().rposition(|m| m.closing);
        let dangling = resolved.iter().enumerate().any(|(i, m)| {
            (m.opening || m.progress) && last_closing.map_or(true, |close_idx| i > close_idx)
        });

        let mut markers = BTreeSet::new();
        if has_opening {
            markers.insert(ProgressionMarker::Opening);
        }
        if has_progress {
            markers.insert(ProgressionMarker::Progress);
        }
        if has_closing {
            markers.insert(ProgressionMarker::Closing);
        }
        if dangling {
            markers.insert(ProgressionMarker::Dangling);
        }

        let w = &self.weights;
        let mut score = 0.0;
        if has_opening {
            score += w.opening;
        }
        if has_progress {
            score += w.progress;
        }
        if has_closing {
            score += w.closing;
        }
        score += w.thread_density * density;
        if has_any && !dangling {
            score += w.no_dangling;
        }

        (score, markers)
    }
}

/// Phrase matching on word boundaries over subject + content
fn detect_markers(message: &Message) -> MessageMarkers {
    let text = word_padded(&format!("{} {}", message.subject, message.content));
    MessageMarkers {
        opening: contains_any(&text, OPENING_PHRASES),
        progress: contains_any(&text, PROGRESS_PHRASES),
        closing: contains_any(&text, CLOSING_PHRASES),
    }
}

/// Share of non-first messages that reference an earlier message of the chain
fn thread_reference_density(messages: &[Message]) -> f64 {
    if messages.len() < 2 {
        return 0.0;
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut references = 0usize;

    for (i, message) in messages.iter().enumerate() {
        if i > 0 {
            let replies_to_prior = message
                .in_reply_to
                .as_deref()
                .map_or(false, |parent| seen.contains(parent));
            let reply_subject = {
                let subject = message.subject.trim_start().to_lowercase();
                subject.starts_with("re:") || subject.starts_with("fw:") || subject.starts_with("fwd:")
            };
            if replies_to_prior || reply_subject {
                references += 1;
            }
        }
        seen.insert(message.message_id.as_str());
    }

    references as f64 / (messages.len() - 1) as f64
}

/// Most frequent vocabulary wins; ties resolve Negotiation > Support > Request
fn classify_chain_type(messages: &[Message]) -> ChainType {
    let mut counts = [
        (ChainType::Negotiation, 0usize),
        (ChainType::Support, 0usize),
        (ChainType::Request, 0usize),
    ];

    for message in messages {
        let text = word_padded(&format!("{} {}", message.subject, message.content));
        counts[0].1 += count_matches(&text, NEGOTIATION_TERMS);
        counts[1].1 += count_matches(&text, SUPPORT_TERMS);
        counts[2].1 += count_matches(&text, REQUEST_TERMS);
    }

    let mut best = (ChainType::General, 0usize);
    for (chain_type, count) in counts {
        if count > best.1 {
            best = (chain_type, count);
        }
    }
    best.0
}

/// Lowercase words joined by single spaces, padded so phrases match on word boundaries
pub(crate) fn word_padded(text: &str) -> String {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();
    format!(" {} ", words.join(" "))
}

pub(crate) fn contains_any(padded: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| padded.contains(&format!(" {} ", p)))
}

fn count_matches(padded: &str, phrases: &[&str]) -> usize {
    phrases
        .iter()
        .map(|p| padded.matches(&format!(" {} ", p)).count())
        .sum()
}
