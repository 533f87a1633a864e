//! Quality Assessor
//!
//! Decides whether a generated phase result is trustworthy enough to replace
//! the rule-based fallback, must be blended with it, or must be discarded.
//!
//! # Scoring
//! Start from 10 and subtract independent, additive deductions:
//! 1. **Structural validity**: classification empty, a generic failure
//!    phrase, or shorter than `min_classification_len`
//! 2. **Entity delta**: no new entities and no overlap with a non-empty
//!    baseline; or more than `max_entities`
//! 3. **Confidence plausibility**: outside `[min_confidence, max_confidence]`
//! 4. **Risk specificity**: boilerplate or too-short risk text; for messages
//!    Phase 1 flagged high-priority, missing risk or action items cost more
//! 5. **Category specificity**: error sentinel in the category field
//!
//! # Decision
//! - total ≥ `accept_threshold` (6.0) → `USE_GENERATED`
//! - total ≥ `hybrid_threshold` (4.0) → `USE_HYBRID`
//! - otherwise → `USE_FALLBACK`
//!
//! A parse error scores 0 and always falls back.
//!
//! `assess` is pure: no I/O, no clock, no randomness.

use crate::config::QualityConfig;
use crate::types::{
    Decision, Deduction, GeneratedOutput, PhasePayload, PhaseResult, QualityAssessment,
    QualityDimension,
};
use std::collections::HashSet;

pub const MAX_SCORE: f32 = 10.0;

const GENERIC_CLASSIFICATIONS: &[&str] = &[
    "unknown",
    "n/a",
    "na",
    "none",
    "error",
    "other",
    "unclassified",
    "not available",
    "unable to classify",
    "unable to determine",
    "cannot determine",
    "could not classify",
    "no classification",
];

const CATEGORY_SENTINELS: &[&str] = &[
    "error",
    "unknown",
    "n/a",
    "none",
    "null",
    "undefined",
    "parse_error",
    "parse error",
    "failed",
    "failure",
];

const BOILERPLATE_RISK: &[&str] = &[
    "none",
    "n/a",
    "no risk",
    "low",
    "medium",
    "high",
    "unknown",
    "no significant risk",
    "standard business risk",
    "risk exists",
    "there may be some risk",
    "further analysis required",
];

pub struct QualityAssessor {
    config: QualityConfig,
}

impl QualityAssessor {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Score `generated` against its rule-based `fallback`
    pub fn assess(&self, generated: &GeneratedOutput, fallback: &PhaseResult) -> QualityAssessment {
        let result = match generated {
            GeneratedOutput::Parsed(result) => result,
            GeneratedOutput::ParseError { reason } => {
                return QualityAssessment {
                    deductions: vec![Deduction {
                        dimension: QualityDimension::StructuralValidity,
                        points: MAX_SCORE,
                        reason: format!("unparseable model output: {}", reason),
                    }],
                    total_score: 0.0,
                    decision: Decision::UseFallback,
                };
            }
        };

        let generated = &result.payload;
        let baseline = &fallback.payload;
        let w = &self.config.weights;
        let mut deductions = Vec::new();

        // 1. Structural validity of the primary classification
        if !is_valid_classification(&generated.classification) {
            deductions.push(Deduction {
                dimension: QualityDimension::StructuralValidity,
                points: w.invalid_classification,
                reason: format!("generic or empty classification {:?}", generated.classification),
            });
        } else if generated.classification.chars().count() < self.config.min_classification_len {
            deductions.push(Deduction {
                dimension: QualityDimension::StructuralValidity,
                points: w.short_classification,
                reason: format!(
                    "classification shorter than {} characters",
                    self.config.min_classification_len
                ),
            });
        }

        // 2. Entity delta vs. the rule baseline
        let delta = EntityDelta::between(&generated.entities, &baseline.entities);
        if !baseline.entities.is_empty() && delta.new == 0 && delta.overlap == 0 {
            deductions.push(Deduction {
                dimension: QualityDimension::EntityDelta,
                points: w.suspicious_entities,
                reason: "no new entities and no overlap with rule-based entities".to_string(),
            });
        }
        if generated.entities.len() > self.config.max_entities {
            deductions.push(Deduction {
                dimension: QualityDimension::EntityDelta,
                points: w.excessive_entities,
                reason: format!(
                    "{} entities exceeds plausible maximum {}",
                    generated.entities.len(),
                    self.config.max_entities
                ),
            });
        }

        // 3. Confidence plausibility
        if !self.is_plausible_confidence(generated.confidence) {
            deductions.push(Deduction {
                dimension: QualityDimension::ConfidencePlausibility,
                points: w.implausible_confidence,
                reason: format!(
                    "confidence {} outside {:.2}-{:.2}",
                    generated.confidence, self.config.min_confidence, self.config.max_confidence
                ),
            });
        }

        // 4. Risk / priority specificity
        let risk = generated.risk_assessment.as_deref().map(str::trim).unwrap_or("");
        if !risk.is_empty() && !self.is_specific_risk(risk) {
            deductions.push(Deduction {
                dimension: QualityDimension::RiskSpecificity,
                points: w.unspecific_risk,
                reason: format!("generic or too-short risk assessment {:?}", risk),
            });
        }
        if baseline.high_priority && (risk.is_empty() || generated.action_items.is_empty()) {
            deductions.push(Deduction {
                dimension: QualityDimension::RiskSpecificity,
                points: w.missing_priority_fields,
                reason: "high-priority message without risk assessment or action items".to_string(),
            });
        }

        // 5. Category specificity
        if is_category_sentinel(&generated.category) {
            deductions.push(Deduction {
                dimension: QualityDimension::CategorySpecificity,
                points: w.category_sentinel,
                reason: format!("error sentinel in category {:?}", generated.category),
            });
        }

        let deducted: f32 = deductions.iter().map(|d| d.points).sum();
        let total_score = (MAX_SCORE - deducted).clamp(0.0, MAX_SCORE);

        QualityAssessment {
            deductions,
            total_score,
            decision: self.decide(total_score),
        }
    }

    pub fn decide(&self, total_score: f32) -> Decision {
        if total_score >= self.config.accept_threshold {
            Decision::UseGenerated
        } else if total_score >= self.config.hybrid_threshold {
            Decision::UseHybrid
        } else {
            Decision::UseFallback
        }
    }

    pub(crate) fn is_plausible_confidence(&self, confidence: f32) -> bool {
        confidence.is_finite()
            && confidence >= self.config.min_confidence
            && confidence <= self.config.max_confidence
    }

    pub(crate) fn is_specific_risk(&self, risk: &str) -> bool {
        let risk = risk.trim();
        risk.chars().count() >= self.config.min_risk_len
            && !BOILERPLATE_RISK.contains(&normalized(risk).as_str())
    }

    pub(crate) fn is_usable_classification(&self, payload: &PhasePayload) -> bool {
        is_valid_classification(&payload.classification)
            && payload.classification.chars().count() >= self.config.min_classification_len
    }
}

/// Counts of generated entities that are new / already in the baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntityDelta {
    pub new: usize,
    pub overlap: usize,
}

impl EntityDelta {
    pub(crate) fn between(generated: &[String], baseline: &[String]) -> Self {
        let known: HashSet<String> = baseline.iter().map(|e| normalized(e)).collect();
        let mut seen = HashSet::new();
        let mut delta = EntityDelta { new: 0, overlap: 0 };
        for entity in generated {
            let key = normalized(entity);
            if key.is_empty() || !seen.insert(key.clone()) {
                continue;
            }
            if known.contains(&key) {
                delta.overlap += 1;
            } else {
                delta.new += 1;
            }
        }
        delta
    }
}

pub(crate) fn normalized(text: &str) -> String {
    text.trim().trim_end_matches('.').to_lowercase()
}

fn is_valid_classification(classification: &str) -> bool {
    let c = normalized(classification);
    !c.is_empty() && !GENERIC_CLASSIFICATIONS.contains(&c.as_str())
}

pub(crate) fn is_category_sentinel(category: &str) -> bool {
    let c = normalized(category);
    c.is_empty() || CATEGORY_SENTINELS.contains(&c.as_str())
}
