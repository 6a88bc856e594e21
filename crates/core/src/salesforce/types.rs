use serde::Deserialize;
use serde_json::{Map, Value};

pub type RawRecord = Map<String, Value>;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    #[serde(default)]
    pub total_size: u64,
    #[serde(default = "default_done")]
    pub done: bool,
    #[serde(default)]
    pub next_records_url: Option<String>,
    #[serde(default)]
    pub records: Vec<RawRecord>,
}

fn default_done() -> bool {
    true
}

impl QueryPage {
    /// Continuation cursor, if the service reported more pages.
    pub fn cursor(&self) -> Option<&str> {
        self.next_records_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Error body shape of the REST API: `[{"message": ..., "errorCode": ...}]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorItem {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error_code: String,
}

pub fn describe_api_errors(body: &str) -> String {
    match serde_json::from_str::<Vec<ApiErrorItem>>(body) {
        Ok(items) if !items.is_empty() => items
            .iter()
            .map(|e| format!("{}: {}", e.error_code, e.message))
            .collect::<Vec<_>>()
            .join("; "),
        _ => body.trim().to_string(),
    }
}
