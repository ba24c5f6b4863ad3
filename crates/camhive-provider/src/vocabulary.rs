//! Per-model label vocabularies.
//!
//! Upstream models answer in different words. Each vocabulary owns exactly
//! one mapping function onto [`ClassificationState`]; anything unrecognised
//! becomes uncertain.

use camhive_schema::ClassificationState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LabelVocabulary {
    /// normal / alert / uncertain
    #[default]
    Standard,
    /// normal / abnormal / unsure
    Anomaly,
    /// expected / unexpected / alarming
    Expectation,
}

impl LabelVocabulary {
    pub fn map(&self, label: &str) -> ClassificationState {
        match self {
            LabelVocabulary::Standard => map_standard_label(label),
            LabelVocabulary::Anomaly => map_anomaly_label(label),
            LabelVocabulary::Expectation => map_expectation_label(label),
        }
    }
}

fn normalize(label: &str) -> String {
    label.trim().to_lowercase()
}

pub fn map_standard_label(label: &str) -> ClassificationState {
    match normalize(label).as_str() {
        "normal" | "ok" | "clear" => ClassificationState::Normal,
        "alert" | "alarm" => ClassificationState::Alert,
        _ => ClassificationState::Uncertain,
    }
}

pub fn map_anomaly_label(label: &str) -> ClassificationState {
    match normalize(label).as_str() {
        "normal" => ClassificationState::Normal,
        "abnormal" | "anomaly" | "anomalous" | "alert" => ClassificationState::Alert,
        _ => ClassificationState::Uncertain,
    }
}

pub fn map_expectation_label(label: &str) -> ClassificationState {
    match normalize(label).as_str() {
        "expected" | "normal" => ClassificationState::Normal,
        "alarming" | "alert" => ClassificationState::Alert,
        // "unexpected" only says the scene differs from the description.
        _ => ClassificationState::Uncertain,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_vocabulary() {
        assert_eq!(map_standard_label(" Normal "), ClassificationState::Normal);
        assert_eq!(map_standard_label("ALERT"), ClassificationState::Alert);
        assert_eq!(map_standard_label("uncertain"), ClassificationState::Uncertain);
        assert_eq!(map_standard_label(""), ClassificationState::Uncertain);
    }

    #[test]
    fn anomaly_vocabulary() {
        assert_eq!(map_anomaly_label("abnormal"), ClassificationState::Alert);
        assert_eq!(map_anomaly_label("normal"), ClassificationState::Normal);
        assert_eq!(map_anomaly_label("unsure"), ClassificationState::Uncertain);
    }

    #[test]
    fn expectation_vocabulary() {
        assert_eq!(map_expectation_label("expected"), ClassificationState::Normal);
        assert_eq!(map_expectation_label("Unexpected"), ClassificationState::Uncertain);
        assert_eq!(map_expectation_label("alarming"), ClassificationState::Alert);
    }

    #[test]
    fn vocabulary_deserializes_lowercase() {
        let vocab: LabelVocabulary = serde_json::from_str("\"anomaly\"").unwrap();
        assert_eq!(vocab, LabelVocabulary::Anomaly);
        assert_eq!(vocab.map("abnormal"), ClassificationState::Alert);
    }
}
