//! The presentation-ready answer shape and the pure formatting logic behind
//! the Format state: default-shape inference, strict validation of
//! reasoner-rendered answers, and the degraded narrative fallback.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

const FALLBACK_EVIDENCE_CHARS: usize = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerFormat {
    Table,
    Text,
    Chart,
}

impl AnswerFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Text => "text",
            Self::Chart => "chart",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub name: String,
    pub data: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnswerMetadata {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "chartType", default, skip_serializing_if = "Option::is_none")]
    pub chart_type: Option<String>,
    #[serde(rename = "chartLabels", default, skip_serializing_if = "Option::is_none")]
    pub chart_labels: Option<Vec<String>>,
    #[serde(rename = "chartSeries", default, skip_serializing_if = "Option::is_none")]
    pub chart_series: Option<Vec<ChartSeries>>,
}

impl AnswerMetadata {
    pub fn titled(title: impl Into<String>, description: Option<String>) -> Self {
        Self {
            title: title.into(),
            description,
            chart_type: None,
            chart_labels: None,
            chart_series: None,
        }
    }
}

/// The only value `run_query` ever hands back to a caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormattedAnswer {
    pub format: AnswerFormat,
    pub data: Value,
    pub metadata: AnswerMetadata,
}

impl FormattedAnswer {
    pub fn narrative(
        text: impl Into<String>,
        title: impl Into<String>,
        description: Option<String>,
    ) -> Self {
        Self {
            format: AnswerFormat::Text,
            data: json!({ "text": text.into() }),
            metadata: AnswerMetadata::titled(title, description),
        }
    }

    pub fn no_results() -> Self {
        Self::narrative(
            "No se obtuvieron resultados de la consulta.",
            "Sin resultados",
            Some("La consulta no devolvió datos".to_string()),
        )
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AnswerShapeError {
    #[error("reply is not a formatted answer: {0}")]
    NotAnAnswer(String),
    #[error("metadata.title must be present and non-empty")]
    MissingTitle,
    #[error("data does not match format `{format}`: {reason}")]
    DataMismatch { format: &'static str, reason: &'static str },
}

/// Default presentation shape inferred from the accumulated evidence, used
/// as the suggestion passed to the reasoner when rendering the final answer.
pub fn suggest_format(evidence: &[Value]) -> AnswerFormat {
    if evidence.len() == 1 {
        match &evidence[0] {
            Value::String(_) | Value::Number(_) | Value::Bool(_) => return AnswerFormat::Text,
            Value::Object(map) if map.len() == 1 && map.contains_key("text") => {
                return AnswerFormat::Text;
            }
            Value::Array(items) => {
                if items.first().is_some_and(looks_like_chart_record) {
                    return AnswerFormat::Chart;
                }
            }
            _ => {}
        }
    }
    AnswerFormat::Table
}

fn looks_like_chart_record(value: &Value) -> bool {
    value.as_object().is_some_and(|map| {
        map.keys().any(|key| {
            let key = key.to_ascii_lowercase();
            key.contains("chart") || key.contains("series") || key.contains("labels")
        })
    })
}

/// Strict validation of a reasoner-rendered answer. Guarantees the three-tag
/// format invariant, a structurally matching payload, and a non-empty title.
/// A bare-string narrative payload is normalized to `{"text": ...}`.
pub fn validate_reply(reply: Value) -> Result<FormattedAnswer, AnswerShapeError> {
    let mut answer: FormattedAnswer = serde_json::from_value(reply)
        .map_err(|error| AnswerShapeError::NotAnAnswer(error.to_string()))?;

    if answer.metadata.title.trim().is_empty() {
        return Err(AnswerShapeError::MissingTitle);
    }

    match answer.format {
        AnswerFormat::Table => {
            let rows = answer.data.as_array().ok_or(AnswerShapeError::DataMismatch {
                format: "table",
                reason: "expected an array of row objects",
            })?;
            if rows.iter().any(|row| !row.is_object()) {
                return Err(AnswerShapeError::DataMismatch {
                    format: "table",
                    reason: "every row must be an object",
                });
            }
        }
        AnswerFormat::Text => {
            let normalized = match &answer.data {
                Value::String(text) => Some(json!({ "text": text })),
                Value::Object(map) if map.get("text").is_some_and(Value::is_string) => None,
                _ => {
                    return Err(AnswerShapeError::DataMismatch {
                        format: "text",
                        reason: "expected a narrative string",
                    });
                }
            };
            if let Some(normalized) = normalized {
                answer.data = normalized;
            }
        }
        AnswerFormat::Chart => {
            let ok = answer.data.as_object().is_some_and(|map| {
                map.get("labels").is_some_and(Value::is_array)
                    && map.get("series").is_some_and(Value::is_array)
            });
            if !ok {
                return Err(AnswerShapeError::DataMismatch {
                    format: "chart",
                    reason: "expected an object with `labels` and `series` arrays",
                });
            }
        }
    }

    Ok(answer)
}

/// Safe terminal answer when rendering fails: a narrative embedding the raw
/// (truncated) evidence and the failure note. Never fails.
pub fn narrative_fallback(query: &str, evidence: &[Value], note: &str) -> FormattedAnswer {
    let rendered = serde_json::to_string(evidence).unwrap_or_else(|_| "[]".to_string());
    let rendered = truncate_chars(&rendered, FALLBACK_EVIDENCE_CHARS);
    FormattedAnswer::narrative(
        format!("{note}. Datos obtenidos para \"{query}\": {rendered}"),
        "Error",
        Some("No se pudo formatear el resultado".to_string()),
    )
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max).collect();
    truncated.push_str("… (truncado)");
    truncated
}
