use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

#[derive(Debug, Clone, Deserialize)]
pub struct AuditRequest {
    /// Newline-delimited item links.
    pub text: String,
}

/// Raw input handed over by the chat layer.
#[derive(Debug, Clone)]
pub enum Submission {
    Text(String),
    File(Vec<u8>),
}

impl Submission {
    pub fn source(&self) -> &'static str {
        match self {
            Submission::Text(_) => "text",
            Submission::File(_) => "file",
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Submission::Text(text) => text,
            Submission::File(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Clone)]
pub struct AuditResponse {
    pub report_id: String,
    pub report_path: String,
    pub generated_at: DateTime<Utc>,
    pub summary: AuditSummary,
    pub report: String,
    pub notice: Option<String>,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct AuditSummary {
    pub submitted: usize,
    pub unique: usize,
    pub duplicates: usize,
    pub chunks: usize,
    pub failed_chunks: usize,
    pub sold: usize,
    pub unsold: usize,
    pub deleted: usize,
    pub malformed: usize,
    pub unpriced: usize,
    pub total_sold: f64,
    pub total_sold_after_fee: i64,
    pub total_unsold: f64,
    pub total_unsold_after_fee: i64,
}

#[derive(Debug, Serialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
