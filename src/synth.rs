// Jaskier Shared Pattern -- report synthesis
//! Deterministic report synthesizer (spec §4.7 step 8, §1 "abstracted as a
//! deterministic function"). Takes the fetched analytics rows (if any), the
//! retrieved citations, and the confidence label, and produces the final
//! `Report`. No model call, no randomness — same inputs always produce the
//! same answer text and charts.

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::models::{Citation, ConfidenceLabel, Report};

/// Caller-supplied fetched rows (absent on the cache-hit fast path).
pub struct FetchedData {
    pub rows: Vec<Value>,
    pub dimension_headers: Vec<String>,
    pub metric_headers: Vec<String>,
}

pub fn synthesize(
    tenant_id: Uuid,
    query: &str,
    fetched: Option<&FetchedData>,
    citations: &[Citation],
    confidence_label: ConfidenceLabel,
) -> Report {
    let metric_cards = fetched.map(summarize_metrics).unwrap_or_default();
    let charts = fetched.map(build_charts).unwrap_or_default();
    let answer_text = render_answer(query, fetched, citations, confidence_label);
    let confidence = confidence_score(confidence_label);

    Report {
        answer_text,
        charts,
        metric_cards,
        citations: citations.to_vec(),
        confidence,
        tenant_id,
        query: query.to_string(),
        timestamp: Utc::now(),
    }
}

fn confidence_score(label: ConfidenceLabel) -> f64 {
    match label {
        ConfidenceLabel::HighConfidence => 0.95,
        ConfidenceLabel::MediumConfidence => 0.75,
        ConfidenceLabel::LowConfidence => 0.55,
        ConfidenceLabel::NoRelevantContext => 0.0,
    }
}

/// One metric card per metric column, summed across fetched rows.
fn summarize_metrics(data: &FetchedData) -> Vec<Value> {
    data.metric_headers
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            let total: f64 = data
                .rows
                .iter()
                .filter_map(|row| row.get(idx).and_then(value_as_f64))
                .sum();
            serde_json::json!({ "metric": header, "total": total })
        })
        .collect()
}

/// One chart per dimension, each point labelled by the dimension value and
/// valued by the first metric column.
fn build_charts(data: &FetchedData) -> Vec<Value> {
    if data.metric_headers.is_empty() {
        return Vec::new();
    }
    data.dimension_headers
        .iter()
        .enumerate()
        .map(|(dim_idx, header)| {
            let points: Vec<Value> = data
                .rows
                .iter()
                .map(|row| {
                    let label = row
                        .get(dim_idx)
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    let value = row
                        .get(data.dimension_headers.len())
                        .and_then(value_as_f64)
                        .unwrap_or(0.0);
                    serde_json::json!({ "label": label, "value": value })
                })
                .collect();
            serde_json::json!({ "dimension": header, "points": points })
        })
        .collect()
}

fn value_as_f64(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn render_answer(
    query: &str,
    fetched: Option<&FetchedData>,
    citations: &[Citation],
    confidence_label: ConfidenceLabel,
) -> String {
    match confidence_label {
        ConfidenceLabel::NoRelevantContext => format!(
            "No relevant historical context was found for \"{query}\". \
             The answer below relies only on freshly fetched data, if any."
        ),
        _ => {
            let row_count = fetched.map(|d| d.rows.len()).unwrap_or(0);
            format!(
                "Answering \"{query}\" using {} fetched row(s) and {} supporting citation(s) \
                 ({confidence_label:?} confidence).",
                row_count,
                citations.len()
            )
        }
    }
}
