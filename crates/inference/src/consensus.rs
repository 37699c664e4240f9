use crate::types::{ConsensusResult, Decision, InferenceResult, Label};

/// Majority vote over per-model labels.
///
/// Failed models cast no vote but stay in the score denominator with their
/// neutral 0.5 confidences.
pub fn aggregate(results: &[InferenceResult]) -> ConsensusResult {
    if results.is_empty() {
        return ConsensusResult {
            decision: Decision::Pending,
            score: 0.0,
            explanation: vec!["No analysis has been performed yet".to_string()],
        };
    }

    let fake = count(results, Label::Fake);
    let real = count(results, Label::Real);
    let errors = count(results, Label::Error);
    let total = results.len() as f64;

    let (mut decision, mut score) = if fake > real {
        let sum: f64 = results.iter().map(|r| r.confidence_fake).sum();
        (Decision::Fake, sum / total)
    } else if real > fake {
        let sum: f64 = results.iter().map(|r| r.confidence_real).sum();
        (Decision::Real, sum / total)
    } else {
        (Decision::Uncertain, 0.5)
    };

    if !score.is_finite() {
        tracing::warn!(decision = %decision, "Consensus score is not finite, reporting uncertain");
        decision = Decision::Uncertain;
        score = 0.5;
    }

    let mut explanation = vec![
        format!("{} model(s) analyzed", results.len()),
        format!("Votes: {} fake, {} real", fake, real),
        majority_statement(decision),
    ];
    if errors > 0 {
        explanation.push(format!("{} model(s) failed and did not vote", errors));
    }

    ConsensusResult {
        decision,
        score,
        explanation,
    }
}

fn count(results: &[InferenceResult], label: Label) -> usize {
    results.iter().filter(|r| r.label == label).count()
}

fn majority_statement(decision: Decision) -> String {
    match decision {
        Decision::Uncertain => "No majority: votes are tied".to_string(),
        other => format!("Majority vote: {}", other.as_str().to_lowercase()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(label: Label, confidence: f64) -> InferenceResult {
        let mut r = InferenceResult::sentinel("m", "1.0");
        r.label = label;
        match label {
            Label::Fake => {
                r.confidence_fake = confidence;
                r.confidence_real = 1.0 - confidence;
            }
            Label::Real => {
                r.confidence_real = confidence;
                r.confidence_fake = 1.0 - confidence;
            }
            Label::Error => {}
        }
        r
    }

    #[test]
    fn test_empty_is_pending() {
        let c = aggregate(&[]);
        assert_eq!(c.decision, Decision::Pending);
        assert_eq!(c.score, 0.0);
        assert_eq!(c.explanation.len(), 1);
    }

    #[test]
    fn test_single_fake() {
        let c = aggregate(&[result(Label::Fake, 0.8)]);
        assert_eq!(c.decision, Decision::Fake);
        assert!((c.score - 0.8).abs() < 1e-9);
        assert_eq!(c.explanation[0], "1 model(s) analyzed");
        assert_eq!(c.explanation[2], "Majority vote: fake");
    }

    #[test]
    fn test_tie_with_error_is_uncertain() {
        let results = vec![
            result(Label::Fake, 0.9),
            result(Label::Fake, 0.8),
            result(Label::Real, 0.7),
            result(Label::Real, 0.6),
            result(Label::Error, 0.5),
        ];
        let c = aggregate(&results);
        assert_eq!(c.decision, Decision::Uncertain);
        assert_eq!(c.score, 0.5);
        assert_eq!(c.explanation[0], "5 model(s) analyzed");
        assert_eq!(c.explanation[1], "Votes: 2 fake, 2 real");
        assert!(c.explanation.iter().any(|l| l.contains("1 model(s) failed")));

        // Aggregation does not drop the failed entry
        assert_eq!(results[4].label, Label::Error);
        assert_eq!(results[4].confidence_fake, 0.5);
    }

    #[test]
    fn test_errors_stay_in_denominator() {
        let c = aggregate(&[
            result(Label::Real, 0.9),
            result(Label::Real, 0.7),
            result(Label::Error, 0.5),
            result(Label::Fake, 0.6),
        ]);
        assert_eq!(c.decision, Decision::Real);
        // (0.9 + 0.7 + 0.5 + 0.4) / 4
        assert!((c.score - 0.625).abs() < 1e-9);
    }

    #[test]
    fn test_all_errors_is_uncertain() {
        let c = aggregate(&[result(Label::Error, 0.5), result(Label::Error, 0.5)]);
        assert_eq!(c.decision, Decision::Uncertain);
        assert_eq!(c.score, 0.5);
        assert_eq!(c.explanation[1], "Votes: 0 fake, 0 real");
    }

    #[test]
    fn test_non_finite_score_degrades_to_uncertain() {
        let mut bad = result(Label::Fake, 0.9);
        bad.confidence_fake = f64::NAN;
        let c = aggregate(&[bad]);
        assert_eq!(c.decision, Decision::Uncertain);
        assert_eq!(c.score, 0.5);
    }

    #[test]
    fn test_score_stays_in_unit_range() {
        let c = aggregate(&[
            result(Label::Fake, 1.0),
            result(Label::Fake, 0.51),
            result(Label::Real, 0.99),
        ]);
        assert_eq!(c.decision, Decision::Fake);
        assert!((0.0..=1.0).contains(&c.score));
    }
}
