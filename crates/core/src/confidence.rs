//! Compositional, time-decaying confidence.
//!
//! Pure-calculation style: no I/O, no clock reads. Age and recency are
//! passed in as plain `f64` day counts so this stays trivially
//! unit-testable with literal numbers.

use crate::types::Source;

const W_S: f64 = 0.30;
const W_E: f64 = 0.35;
const W_R: f64 = 0.20;
const W_T: f64 = 0.15;

const MODEL_GENERATED_CEILING: f64 = 0.60;

/// Half-life in days, per memory type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryHalfLife {
    Episodic,
    Semantic,
    Procedural,
}

impl MemoryHalfLife {
    pub fn days(self) -> f64 {
        match self {
            MemoryHalfLife::Episodic => 7.0,
            MemoryHalfLife::Semantic => 30.0,
            MemoryHalfLife::Procedural => 90.0,
        }
    }
}

/// The inputs the formula needs, factored out of any particular entity so
/// the Recall/Decay call sites can build one from whichever row they hold.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceInputs {
    pub source: Source,
    pub support: f64,
    pub contradict: f64,
    pub age_days: f64,
    pub half_life_days: f64,
    pub retrieval_count: u64,
    pub days_since_retrieval: f64,
}

/// `E` term: evidence agreement. `1.0` if both counters are zero.
pub fn evidence_agreement(support: f64, contradict: f64) -> f64 {
    let total = support + contradict;
    if total <= 0.0 {
        1.0
    } else {
        support / total
    }
}

/// `R` term: Ebbinghaus-style recency decay.
pub fn recency_decay(age_days: f64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return if age_days <= 0.0 { 1.0 } else { 0.0 };
    }
    (-std::f64::consts::LN_2 * age_days / half_life_days).exp()
}

/// `T` term: retrieval reinforcement.
pub fn retrieval_term(retrieval_count: u64, days_since_retrieval: f64) -> f64 {
    if retrieval_count == 0 {
        return 0.0;
    }
    let boost = 0.3 * (1.0 + retrieval_count as f64).ln();
    let decay = (-std::f64::consts::LN_2 * days_since_retrieval / 14.0).exp();
    (boost * decay).min(1.0)
}

/// The full compositional formula: `C = clamp01(w_s*S + w_e*E + w_r*R + w_t*T)`,
/// capped at [`MODEL_GENERATED_CEILING`] when the nominal source is
/// `model-generated`.
pub fn confidence(inputs: ConfidenceInputs) -> f64 {
    let s = inputs.source.reliability();
    let e = evidence_agreement(inputs.support, inputs.contradict);
    let r = recency_decay(inputs.age_days, inputs.half_life_days);
    let t = retrieval_term(inputs.retrieval_count, inputs.days_since_retrieval);

    let raw = W_S * s + W_E * e + W_R * r + W_T * t;
    let clamped = raw.clamp(0.0, 1.0);

    if matches!(inputs.source, Source::ModelGenerated) {
        clamped.min(MODEL_GENERATED_CEILING)
    } else {
        clamped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(source: Source, support: f64, contradict: f64, age_days: f64, half_life: f64) -> ConfidenceInputs {
        ConfidenceInputs {
            source,
            support,
            contradict,
            age_days,
            half_life_days: half_life,
            retrieval_count: 0,
            days_since_retrieval: 0.0,
        }
    }

    #[test]
    fn evidence_agreement_zero_zero_is_one() {
        assert_eq!(evidence_agreement(0.0, 0.0), 1.0);
    }

    #[test]
    fn recency_decay_at_half_life_is_one_half() {
        let v = recency_decay(30.0, 30.0);
        assert!((v - 0.5).abs() < 0.01, "got {v}");
    }

    #[test]
    fn recency_decay_at_zero_age_is_one() {
        assert_eq!(recency_decay(0.0, 30.0), 1.0);
    }

    #[test]
    fn retrieval_term_zero_count_is_zero() {
        assert_eq!(retrieval_term(0, 0.0), 0.0);
    }

    #[test]
    fn confidence_always_in_unit_interval() {
        for support in [0.0, 1.0, 5.0, 50.0] {
            for contradict in [0.0, 1.0, 5.0] {
                for age in [0.0, 7.0, 30.0, 365.0] {
                    let c = confidence(inputs(Source::DirectObservation, support, contradict, age, 30.0));
                    assert!((0.0..=1.0).contains(&c), "c={c} out of range");
                }
            }
        }
    }

    #[test]
    fn model_generated_is_capped_at_point_six() {
        let c = confidence(inputs(Source::ModelGenerated, 100.0, 0.0, 0.0, 30.0));
        assert!(c <= 0.60 + 1e-9, "got {c}");
    }

    #[test]
    fn unknown_source_is_not_representable() {
        // `Source::parse` is the boundary that rejects unknown names before
        // a `ConfidenceInputs` can even be constructed.
        assert!(Source::parse("made-up-source").is_none());
    }

    #[test]
    fn higher_support_yields_higher_confidence() {
        let low = confidence(inputs(Source::DirectObservation, 1.0, 9.0, 7.0, 30.0));
        let high = confidence(inputs(Source::DirectObservation, 9.0, 1.0, 7.0, 30.0));
        assert!(high > low);
    }
}
