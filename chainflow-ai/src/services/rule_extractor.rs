//! Rule Extractor (Phase 1)
//!
//! Deterministic, sub-second extraction of business signals from one message.
//! The result doubles as the fallback for the generative phases, so every
//! field it populates must be usable on its own.
//!
//! Extraction reads only the whitespace-normalized subject and content, the
//! same input [`fingerprint_message`] hashes, so a cached result is always
//! the result of a direct extraction.
//!
//! [`fingerprint_message`]: crate::cache::fingerprint_message

use crate::analysis::completeness::{contains_any, word_padded};
use crate::cache::normalize_content;
use crate::types::{Message, PhasePayload};
use regex::Regex;
use std::sync::OnceLock;

const URGENCY_TERMS: &[&str] = &[
    "urgent", "asap", "immediately", "critical", "escalate", "escalation", "deadline", "overdue",
    "legal", "cancel",
];

const CATEGORY_TERMS: &[(&str, &[&str])] = &[
    ("procurement", &["order", "purchase", "quote", "units", "supplier", "po"]),
    ("billing", &["invoice", "payment", "refund", "charge", "billing", "credit"]),
    ("support", &["issue", "error", "broken", "bug", "ticket", "outage", "not working"]),
    ("logistics", &["shipping", "shipment", "delivery", "delivered", "tracking", "warehouse"]),
    ("commercial", &["price", "pricing", "discount", "contract", "terms", "offer"]),
];

const ACTION_CUES: &[&str] = &["please", "could you", "can you", "need to", "must", "kindly"];

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid regex"))
}

fn money_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:[$€£]\s?\d[\d,]*(?:\.\d{1,2})?|\b\d[\d,]*(?:\.\d{1,2})?\s?(?:USD|EUR|GBP)\b)")
            .expect("valid regex")
    })
}

fn reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:\b(?:PO|ORD|INV|TKT|CASE)-?\d{3,}|#\d{3,})").expect("valid regex")
    })
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").expect("valid regex"))
}

/// Phase 1 rule engine
#[derive(Debug, Clone, Default)]
pub struct RuleExtractor;

impl RuleExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, message: &Message) -> PhasePayload {
        let content = normalize_content(&message.content);
        let text = format!("{}\n{}", normalize_content(&message.subject), content);
        let padded = word_padded(&text);

        let (category, category_hits) = categorize(&padded);
        let intent = intent(&padded);
        let entities = extract_entities(&text);
        let high_priority = contains_any(&padded, URGENCY_TERMS);
        let action_items = extract_action_items(&content);

        let risk_assessment = if high_priority {
            let matched: Vec<&str> = URGENCY_TERMS
                .iter()
                .copied()
                .filter(|t| padded.contains(&format!(" {} ", t)))
                .collect();
            Some(format!(
                "Elevated priority: urgency language present ({})",
                matched.join(", ")
            ))
        } else {
            None
        };

        let signals = category_hits.min(2) + entities.len().min(2);
        let confidence = (0.45 + 0.075 * signals as f32).min(0.75);

        PhasePayload {
            classification: format!("{} {}", category, intent),
            category: category.to_string(),
            entities,
            confidence,
            risk_assessment,
            action_items,
            rationale: format!(
                "rule-based: {} category term(s), intent '{}'",
                category_hits, intent
            ),
            high_priority,
        }
    }
}

/// Category with the most term hits; table order breaks ties
fn categorize(padded: &str) -> (&'static str, usize) {
    let mut best = ("general", 0usize);
    for (category, terms) in CATEGORY_TERMS {
        let hits = terms
            .iter()
            .filter(|t| padded.contains(&format!(" {} ", t)))
            .count();
        if hits > best.1 {
            best = (category, hits);
        }
    }
    best
}

fn intent(padded: &str) -> &'static str {
    if contains_any(padded, &["confirmed", "confirm", "resolved", "delivered", "completed", "agreed"]) {
        "confirmation"
    } else if contains_any(padded, &["update", "status", "following up", "follow up", "revised"]) {
        "status update"
    } else if contains_any(padded, &["request", "could you", "can you", "please", "need", "inquiry"]) {
        "request"
    } else {
        "correspondence"
    }
}

/// Emails, money amounts, order/ticket references and ISO dates in order of appearance
fn extract_entities(text: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();
    for re in [email_re(), money_re(), reference_re(), date_re()] {
        for m in re.find_iter(text) {
            found.push((m.start(), m.as_str().trim().to_string()));
        }
    }
    found.sort_by_key(|(pos, _)| *pos);

    let mut entities: Vec<String> = Vec::new();
    for (_, entity) in found {
        if !entities.contains(&entity) {
            entities.push(entity);
        }
    }
    entities
}

/// Sentences that ask someone to do something
fn extract_action_items(content: &str) -> Vec<String> {
    content
        .replace(". ", ".\n")
        .split(|c| matches!(c, '!' | '?' | '\n'))
        .map(|s| s.trim().trim_end_matches('.'))
        .filter(|s| !s.is_empty())
        .filter(|s| contains_any(&word_padded(s), ACTION_CUES))
        .map(|s| s.to_string())
        .take(5)
        .collect()
}
