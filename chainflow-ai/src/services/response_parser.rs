//! Model response parsing
//!
//! Model text is turned into a tagged `GeneratedOutput`: either a well-typed
//! `PhaseResult` or a parse error with a reason. Malformed text, prose around
//! the JSON and truncated JSON are all tolerated and never raise.

use crate::types::{GeneratedOutput, Phase, PhasePayload, PhaseResult, ResultSource};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RawPayload {
    #[serde(default)]
    classification: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    entities: Vec<serde_json::Value>,
    #[serde(default)]
    confidence: Option<serde_json::Value>,
    #[serde(default)]
    risk_assessment: Option<serde_json::Value>,
    #[serde(default)]
    action_items: Vec<serde_json::Value>,
    #[serde(default)]
    rationale: Option<String>,
}

/// Call metadata carried into the parsed result
#[derive(Debug, Clone, Copy)]
pub struct CallMeta {
    pub phase: Phase,
    pub latency_ms: u64,
    pub retry_count: u32,
    /// Generated results inherit the rule-based priority flag
    pub high_priority: bool,
}

pub fn parse_generated(text: &str, meta: CallMeta) -> GeneratedOutput {
    let Some(object) = first_json_object(text) else {
        return GeneratedOutput::ParseError {
            reason: if text.trim().is_empty() {
                "empty response".to_string()
            } else {
                "no complete JSON object in response".to_string()
            },
        };
    };

    let raw: RawPayload = match serde_json::from_str(object) {
        Ok(raw) => raw,
        Err(e) => {
            return GeneratedOutput::ParseError {
                reason: format!("invalid JSON object: {}", e),
            }
        }
    };

    let confidence = match raw.confidence.as_ref().and_then(number_of) {
        Some(c) => c,
        None => {
            return GeneratedOutput::ParseError {
                reason: "missing or non-numeric confidence".to_string(),
            }
        }
    };

    let payload = PhasePayload {
        classification: raw.classification.unwrap_or_default().trim().to_string(),
        category: raw.category.unwrap_or_default().trim().to_string(),
        entities: strings_of(&raw.entities),
        confidence: normalize_confidence(confidence),
        risk_assessment: raw.risk_assessment.as_ref().and_then(text_of),
        action_items: strings_of(&raw.action_items),
        rationale: raw.rationale.unwrap_or_default(),
        high_priority: meta.high_priority,
    };

    GeneratedOutput::Parsed(PhaseResult {
        phase: meta.phase,
        payload,
        source: ResultSource::Generated,
        quality_score: None,
        latency_ms: meta.latency_ms,
        retry_count: meta.retry_count,
    })
}

/// First balanced `{...}` in `text`, honoring string literals and escapes
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn number_of(value: &serde_json::Value) -> Option<f32> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().map(|v| v as f32),
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}

/// Percentages (1 < c <= 100) are rescaled to 0-1
fn normalize_confidence(raw: f32) -> f32 {
    if raw > 1.0 && raw <= 100.0 {
        raw / 100.0
    } else {
        raw
    }
}

fn text_of(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn strings_of(values: &[serde_json::Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(text_of)
        .filter(|s| !s.is_empty())
        .collect()
}
