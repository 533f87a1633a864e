//! Hybrid Merger
//!
//! Combines a generated result with its rule-based fallback when the
//! assessor decided `USE_HYBRID`. Starts from the fallback and overlays each
//! generated field only if that field is individually plausible, so every
//! field the fallback populated stays populated.

use crate::types::{PhasePayload, PhaseResult, ResultSource};
use crate::validators::quality_assessor::{is_category_sentinel, normalized, EntityDelta, QualityAssessor};
use std::collections::HashSet;

pub struct HybridMerger<'a> {
    assessor: &'a QualityAssessor,
}

impl<'a> HybridMerger<'a> {
    /// Field plausibility reuses the assessor's checks
    pub fn new(assessor: &'a QualityAssessor) -> Self {
        Self { assessor }
    }

    pub fn merge(&self, generated: &PhaseResult, fallback: &PhaseResult, quality_score: f32) -> PhaseResult {
        let gen = &generated.payload;
        let base = &fallback.payload;
        let mut merged: PhasePayload = base.clone();

        if self.assessor.is_usable_classification(gen) {
            merged.classification = gen.classification.clone();
        }

        if !is_category_sentinel(&gen.category) {
            merged.category = gen.category.clone();
        }

        // Generated entities only when they overlap with or extend the baseline
        let delta = EntityDelta::between(&gen.entities, &base.entities);
        if delta.overlap > 0 || delta.new > 0 {
            let limit = self.assessor.config().max_entities.max(base.entities.len());
            merged.entities = union(&base.entities, &gen.entities, limit);
        }

        if gen.confidence.is_finite() {
            merged.confidence = ((gen.confidence + base.confidence) / 2.0).clamp(0.0, 1.0);
        }

        if let Some(risk) = gen.risk_assessment.as_deref() {
            if self.assessor.is_specific_risk(risk) {
                merged.risk_assessment = Some(risk.trim().to_string());
            }
        }

        merged.action_items = union(&base.action_items, &gen.action_items, usize::MAX);

        if !gen.rationale.trim().is_empty() {
            merged.rationale = if base.rationale.is_empty() {
                gen.rationale.clone()
            } else {
                format!("{}; {}", base.rationale, gen.rationale.trim())
            };
        }

        merged.high_priority = base.high_priority;

        PhaseResult {
            phase: generated.phase,
            payload: merged,
            source: ResultSource::Hybrid,
            quality_score: Some(quality_score),
            latency_ms: generated.latency_ms,
            retry_count: generated.retry_count,
        }
    }
}

/// Baseline items first, then new generated items, case-insensitively deduplicated
fn union(base: &[String], extra: &[String], limit: usize) -> Vec<String> {
    let mut seen: HashSet<String> = base.iter().map(|s| normalized(s)).collect();
    let mut out = base.to_vec();
    for item in extra {
        if out.len() >= limit {
            break;
        }
        let key = normalized(item);
        if !key.is_empty() && seen.insert(key) {
            out.push(item.trim().to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityConfig;
    use crate::types::Phase;

    fn result(phase: Phase, source: ResultSource, payload: PhasePayload) -> PhaseResult {
        PhaseResult {
            phase,
            payload,
            source,
            quality_score: None,
            latency_ms: 700,
            retry_count: 1,
        }
    }

    fn fallback() -> PhaseResult {
        result(
            Phase::One,
            ResultSource::RuleBased,
            PhasePayload {
                classification: "billing request".into(),
                category: "billing".into(),
                entities: vec!["INV-2001".into(), "$300".into()],
                confidence: 0.6,
                risk_assessment: Some("Elevated priority: urgency language present (urgent)".into()),
                action_items: vec!["Please reissue the invoice".into()],
                rationale: "rule-based".into(),
                high_priority: true,
            },
        )
    }

    #[test]
    fn test_merge_overlays_plausible_fields() {
        let assessor = QualityAssessor::new(QualityConfig::default());
        let generated = result(
            Phase::Two,
            ResultSource::Generated,
            PhasePayload {
                classification: "disputed invoice reissue request".into(),
                category: "billing".into(),
                entities: vec!["inv-2001".into(), "ACME Corp".into()],
                confidence: 0.9,
                risk_assessment: Some("short".into()),
                action_items: vec!["Verify the disputed line items".into()],
                rationale: "customer disputes amount".into(),
                high_priority: true,
            },
        );

        let merged = HybridMerger::new(&assessor).merge(&generated, &fallback(), 5.0);
        assert_eq!(merged.source, ResultSource::Hybrid);
        assert_eq!(merged.phase, Phase::Two);
        assert_eq!(merged.quality_score, Some(5.0));
        assert_eq!(merged.payload.classification, "disputed invoice reissue request");
        assert_eq!(merged.payload.entities, vec!["INV-2001", "$300", "ACME Corp"]);
        assert!((merged.payload.confidence - 0.75).abs() < 1e-6);
        // Generated risk too short: fallback's kept
        assert_eq!(merged.payload.risk_assessment, fallback().payload.risk_assessment);
        assert_eq!(merged.payload.action_items.len(), 2);
    }

    #[test]
    fn test_merge_never_drops_fallback_fields() {
        let assessor = QualityAssessor::new(QualityConfig::default());
        let empty = result(Phase::Three, ResultSource::Generated, PhasePayload::default());

        let merged = HybridMerger::new(&assessor).merge(&empty, &fallback(), 4.2);
        let base = fallback().payload;
        assert_eq!(merged.payload.classification, base.classification);
        assert_eq!(merged.payload.category, base.category);
        assert_eq!(merged.payload.entities, base.entities);
        assert_eq!(merged.payload.risk_assessment, base.risk_assessment);
        assert_eq!(merged.payload.action_items, base.action_items);
        assert!(!merged.payload.rationale.is_empty());
        assert!(merged.payload.high_priority);
    }

    #[test]
    fn test_merge_is_deterministic() {
        let assessor = QualityAssessor::new(QualityConfig::default());
        let generated = result(
            Phase::Two,
            ResultSource::Generated,
            PhasePayload {
                classification: "invoice correction".into(),
                entities: vec!["$300".into()],
                confidence: 0.5,
                ..Default::default()
            },
        );
        let merger = HybridMerger::new(&assessor);
        assert_eq!(
            merger.merge(&generated, &fallback(), 4.5),
            merger.merge(&generated, &fallback(), 4.5)
        );
    }
}
