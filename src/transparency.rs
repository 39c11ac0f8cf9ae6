//! Threat transparency.
//!
//! The external scorer attaches `{score, level, flags, signals}` to an
//! emitter. Before rows leave the server, each assessment is reduced to
//! human-readable reasons and evidence. A flagged emitter without any
//! reason is a data-contract violation and is marked, never papered over.

use serde_json::{Value, json};
use tracing::warn;

use crate::model::{NetworkRow, ThreatAssessment, ThreatEvidence, ThreatValidation};

/// Threshold each scorer rule compares its observed value against.
fn threshold_for(rule: &str) -> Option<Value> {
    match rule {
        "EXCESSIVE_MOVEMENT" => Some(json!(0.2)),
        "SPEED_PATTERN" => Some(json!(20)),
        "TEMPORAL_PATTERN" => Some(json!(2)),
        "HIGH_OBSERVATION_COUNT" => Some(json!(20)),
        "HOME_AND_AWAY" => Some(json!("home & away")),
        _ => None,
    }
}

/// An evidence object with a single field stands for that field's value.
fn unwrap_evidence(evidence: &Value) -> Value {
    match evidence {
        Value::Object(map) if map.len() == 1 => {
            map.values().next().cloned().unwrap_or(Value::Null)
        }
        other => other.clone(),
    }
}

/// Reasons, evidence and contract status for one assessment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreatExplanation {
    pub reasons: Vec<String>,
    pub evidence: Vec<ThreatEvidence>,
    pub transparency_error: bool,
}

pub fn explain(assessment: &ThreatAssessment) -> ThreatExplanation {
    let reasons: Vec<String> = if assessment.flags.is_empty() {
        assessment
            .signals
            .iter()
            .filter_map(|signal| signal.name())
            .map(str::to_string)
            .collect()
    } else {
        assessment.flags.clone()
    };

    let evidence = assessment
        .signals
        .iter()
        .filter_map(|signal| {
            let rule = signal.name()?;
            Some(ThreatEvidence {
                rule: rule.to_string(),
                observed_value: signal.evidence.as_ref().map(unwrap_evidence),
                threshold: threshold_for(rule),
            })
        })
        .collect();

    ThreatExplanation {
        transparency_error: assessment.is_flagged() && reasons.is_empty(),
        reasons,
        evidence,
    }
}

/// Fill the threat transparency fields of every row and summarize the page.
pub fn enrich(rows: &mut [NetworkRow]) -> ThreatValidation {
    let mut validation = ThreatValidation::default();

    for row in rows.iter_mut() {
        let Some(assessment) = &row.assessment else {
            continue;
        };
        let explanation = explain(assessment);
        if assessment.is_flagged() {
            validation.total_threats += 1;
        }
        if explanation.transparency_error {
            validation.threats_without_reasons += 1;
        }
        row.threat_reasons = explanation.reasons;
        row.threat_evidence = explanation.evidence;
        row.threat_transparency_error = explanation.transparency_error;
    }

    if validation.threats_without_reasons > 0 {
        warn!(
            threats_without_reasons = validation.threats_without_reasons,
            total_threats = validation.total_threats,
            "Threat rows without reasons in response"
        );
    }

    validation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ThreatSignal;

    fn assessment(level: &str, flags: &[&str], signals: Vec<ThreatSignal>) -> ThreatAssessment {
        ThreatAssessment {
            score: 55.0,
            level: level.to_string(),
            flags: flags.iter().map(|f| f.to_string()).collect(),
            signals,
        }
    }

    fn signal(code: &str, evidence: Value) -> ThreatSignal {
        ThreatSignal {
            code: Some(code.to_string()),
            rule: None,
            evidence: Some(evidence),
        }
    }

    #[test]
    fn test_flags_take_precedence_over_signals() {
        let explained = explain(&assessment(
            "HIGH",
            &["FOLLOWS_YOU"],
            vec![signal("SPEED_PATTERN", json!({"speed": 42}))],
        ));
        assert_eq!(explained.reasons, vec!["FOLLOWS_YOU".to_string()]);
        assert!(!explained.transparency_error);
    }

    #[test]
    fn test_signal_codes_become_reasons_with_evidence() {
        let explained = explain(&assessment(
            "MED",
            &[],
            vec![
                signal("SPEED_PATTERN", json!({"speed": 42})),
                signal("HOME_AND_AWAY", json!({"home": true, "away": true})),
            ],
        ));
        assert_eq!(explained.reasons, vec!["SPEED_PATTERN", "HOME_AND_AWAY"]);
        assert_eq!(
            explained.evidence[0],
            ThreatEvidence {
                rule: "SPEED_PATTERN".into(),
                observed_value: Some(json!(42)),
                threshold: Some(json!(20)),
            }
        );
        assert_eq!(
            explained.evidence[1].observed_value,
            Some(json!({"home": true, "away": true}))
        );
        assert_eq!(explained.evidence[1].threshold, Some(json!("home & away")));
    }

    #[test]
    fn test_flagged_without_reasons_is_an_error() {
        let explained = explain(&assessment("CRITICAL", &[], vec![]));
        assert!(explained.reasons.is_empty());
        assert!(explained.transparency_error);

        let quiet = explain(&assessment("NONE", &[], vec![]));
        assert!(!quiet.transparency_error);
    }
}
