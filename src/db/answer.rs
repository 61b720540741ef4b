//! Query answer normalization
//!
//! TypeDB answers a query with concept rows, concept documents, or a bare
//! acknowledgement depending on the query form. Everything collapses into
//! one row-oriented shape here so callers never branch on the answer kind.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Wire shape of a transaction query response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub answer_type: String,
    #[serde(default)]
    pub answers: Vec<Value>,
}

#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("unrecognized answer type '{0}'")]
    UnknownType(String),

    #[error("malformed row answer: {0}")]
    MalformedRow(String),
}

/// The three mutually exclusive shapes an answer can take.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryAnswer {
    /// Tabular answers: one ordered column-to-concept map per row.
    ConceptRows(Vec<Map<String, Value>>),
    /// Document answers: one JSON document per match.
    ConceptDocuments(Vec<Value>),
    /// Acknowledgement with no payload.
    Ok,
}

impl TryFrom<QueryResponse> for QueryAnswer {
    type Error = AnswerError;

    fn try_from(response: QueryResponse) -> Result<Self, AnswerError> {
        match response.answer_type.as_str() {
            "conceptRows" => {
                let mut rows = Vec::with_capacity(response.answers.len());
                for answer in response.answers {
                    rows.push(row_columns(answer)?);
                }
                Ok(QueryAnswer::ConceptRows(rows))
            }
            "conceptDocuments" => Ok(QueryAnswer::ConceptDocuments(response.answers)),
            "ok" => Ok(QueryAnswer::Ok),
            other => Err(AnswerError::UnknownType(other.to_string())),
        }
    }
}

/// Pull the column map out of a single row answer. The HTTP API wraps row
/// data in a `data` field; a bare object is accepted too.
fn row_columns(answer: Value) -> Result<Map<String, Value>, AnswerError> {
    let mut object = match answer {
        Value::Object(object) => object,
        other => return Err(AnswerError::MalformedRow(format!("expected an object, got {}", other))),
    };
    match object.remove("data") {
        Some(Value::Object(data)) => Ok(data),
        Some(other) => Err(AnswerError::MalformedRow(format!(
            "'data' is not an object: {}",
            other
        ))),
        None => Ok(object),
    }
}

/// One normalized result row: column name to string-rendered value, in the
/// engine's column order.
pub type QueryRow = IndexMap<String, String>;

/// Collapse an answer into uniform rows, preserving engine row order.
///
/// Rows render each concept as a string per column. Documents become one
/// row each under a single `document` column. An acknowledgement becomes
/// exactly one `status: OK` row so callers can tell it apart from an empty
/// result.
pub fn normalize(answer: QueryAnswer) -> Vec<QueryRow> {
    match answer {
        QueryAnswer::ConceptRows(rows) => rows
            .into_iter()
            .map(|columns| {
                columns
                    .into_iter()
                    .map(|(name, concept)| (name, render_concept(&concept)))
                    .collect()
            })
            .collect(),
        QueryAnswer::ConceptDocuments(documents) => documents
            .into_iter()
            .map(|document| QueryRow::from([("document".to_string(), document.to_string())]))
            .collect(),
        QueryAnswer::Ok => {
            vec![QueryRow::from([("status".to_string(), "OK".to_string())])]
        }
    }
}

/// Human-readable rendering of a single concept.
///
/// Attributes and value expressions render their scalar value. Instances
/// render as `kind iid isa label`. Types render their label. Anything
/// unrecognized falls back to compact JSON.
pub fn render_concept(concept: &Value) -> String {
    match concept {
        Value::Object(fields) => {
            if let Some(value) = fields.get("value") {
                return render_scalar(value);
            }
            let label = label_of(fields);
            if let Some(iid) = fields.get("iid").and_then(Value::as_str) {
                let kind = fields.get("kind").and_then(Value::as_str).unwrap_or("thing");
                return match label {
                    Some(label) => format!("{} {} isa {}", kind, iid, label),
                    None => format!("{} {}", kind, iid),
                };
            }
            if let Some(label) = label {
                return label.to_string();
            }
            concept.to_string()
        }
        other => render_scalar(other),
    }
}

/// Strings render bare; every other scalar renders as its JSON form.
fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Type label, either inline or nested under `type`.
fn label_of(fields: &Map<String, Value>) -> Option<&str> {
    if let Some(label) = fields.get("label").and_then(Value::as_str) {
        return Some(label);
    }
    fields
        .get("type")
        .and_then(Value::as_object)
        .and_then(|type_info| type_info.get("label"))
        .and_then(Value::as_str)
}
