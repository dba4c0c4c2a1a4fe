//! Versioned schema for evaluator output.
//!
//! Vendor responses arrive in several nestings; everything past the storage
//! boundary only sees [`EvaluationResult`].

use crate::errors::CodetraceError;
use crate::session::{Event, EventKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const EVALUATION_SCHEMA_VERSION: u32 = 1;

const DEFAULT_SUMMARY: &str = "No summary provided";
const DEFAULT_APPROACH: &str = "Approach not analyzed";

/// Pointers tried in order when locating the assessment record.
const RECORD_POINTERS: [&str; 3] = ["/data/data/performance/0", "/p/0", ""];

/// A record must carry at least one of these to count as an assessment.
const ASSESSMENT_KEYS: [&str; 11] = [
    "summary",
    "approach",
    "strengths",
    "strength",
    "Areas for Improvement",
    "weaknesses",
    "scores",
    "logic",
    "debugging",
    "efficiency",
    "creativity",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scores {
    pub logic: u8,
    pub debugging: u8,
    pub efficiency: u8,
    pub creativity: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub summary: String,
    pub approach: String,
    pub strengths: Vec<String>,
    pub improvement_areas: Vec<String>,
    pub scores: Scores,
}

/// Normalized result plus the untouched vendor body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvaluation {
    pub schema_version: u32,
    pub result: EvaluationResult,
    pub vendor_response: Value,
}

impl StoredEvaluation {
    pub fn new(result: EvaluationResult, vendor_response: Value) -> Self {
        Self {
            schema_version: EVALUATION_SCHEMA_VERSION,
            result,
            vendor_response,
        }
    }
}

impl EvaluationResult {
    pub fn from_vendor_response(response: &Value) -> Result<Self, CodetraceError> {
        let record = RECORD_POINTERS
            .iter()
            .filter_map(|pointer| response.pointer(pointer))
            .find(|value| is_assessment(value))
            .ok_or_else(|| {
                CodetraceError::Evaluator("response carries no assessment object".to_string())
            })?;

        let scores_source = record
            .get("scores")
            .filter(|value| value.is_object())
            .unwrap_or(record);

        Ok(Self {
            summary: text_field(record, "summary").unwrap_or_else(|| DEFAULT_SUMMARY.to_string()),
            approach: text_field(record, "approach")
                .unwrap_or_else(|| DEFAULT_APPROACH.to_string()),
            strengths: list_field(record, &["strengths", "strength"]),
            improvement_areas: list_field(record, &["Areas for Improvement", "weaknesses"]),
            scores: Scores {
                logic: score_field(scores_source, "logic"),
                debugging: score_field(scores_source, "debugging"),
                efficiency: score_field(scores_source, "efficiency"),
                creativity: score_field(scores_source, "creativity"),
            },
        })
    }
}

fn is_assessment(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|record| ASSESSMENT_KEYS.iter().any(|key| record.contains_key(*key)))
}

/// Activity-based scoring used when the vendor content cannot be read.
/// Logic grows by a tenth of a point per keystroke, rounded half away from zero.
pub fn heuristic_evaluation(events: &[Event]) -> EvaluationResult {
    let count = |kind: EventKind| events.iter().filter(|e| e.kind == kind).count() as u64;
    let keystrokes = count(EventKind::Keystroke);
    let runs = count(EventKind::Run);
    let pastes = count(EventKind::Paste);
    let efficiency = if events.len() < 50 { 80 } else { 65 };
    let logic = (60.0 + keystrokes as f64 / 10.0).min(90.0).round() as u8;

    EvaluationResult {
        summary: "Analysis completed successfully".to_string(),
        approach: "Systematic problem-solving approach".to_string(),
        strengths: vec![
            "Clear code structure".to_string(),
            "Good problem understanding".to_string(),
            "Efficient solution".to_string(),
        ],
        improvement_areas: vec![
            "Could explore more alternatives".to_string(),
            "Limited optimization".to_string(),
            "Minimal testing".to_string(),
        ],
        scores: Scores {
            logic,
            debugging: (50 + runs.saturating_mul(10)).min(85) as u8,
            efficiency,
            creativity: (60 + pastes.saturating_mul(5)).min(75) as u8,
        },
    }
}

fn text_field(record: &Value, key: &str) -> Option<String> {
    record
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn list_field(record: &Value, keys: &[&str]) -> Vec<String> {
    for key in keys {
        match record.get(*key) {
            Some(Value::String(text)) => return split_lines(text),
            Some(Value::Array(items)) => {
                return items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            _ => {}
        }
    }
    Vec::new()
}

fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn score_field(source: &Value, key: &str) -> u8 {
    let raw = match source.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(value) if value.is_finite() => value.round().clamp(0.0, 100.0) as u8,
        _ => 0,
    }
}
