//! Adapter response returned alongside query results.

use serde::{Deserialize, Serialize};

/// Summary of a statement execution, as reported back to dbt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterResponse {
    /// Status message.
    #[serde(rename = "_message")]
    pub message: String,

    /// Engine status code, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Rows affected, when the engine reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<i64>,

    /// Execution duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

impl AdapterResponse {
    /// Flight SQL exposes no status message, so every response reads "OK".
    pub fn ok() -> Self {
        Self {
            message: "OK".to_string(),
            code: None,
            rows_affected: None,
            elapsed_ms: None,
        }
    }

    /// Set the number of affected rows.
    pub fn with_rows_affected(mut self, rows: Option<i64>) -> Self {
        self.rows_affected = rows;
        self
    }

    /// Set the execution duration.
    pub fn with_elapsed(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = Some(elapsed_ms);
        self
    }
}

impl Default for AdapterResponse {
    fn default() -> Self {
        Self::ok()
    }
}

impl std::fmt::Display for AdapterResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_ok() {
        let response = AdapterResponse::ok();
        assert_eq!(response.to_string(), "OK");
        assert!(response.rows_affected.is_none());
    }

    #[test]
    fn test_response_builder() {
        let response = AdapterResponse::ok()
            .with_rows_affected(Some(2))
            .with_elapsed(15);
        assert_eq!(response.rows_affected, Some(2));
        assert_eq!(response.elapsed_ms, Some(15));
    }

    #[test]
    fn test_response_serialization() {
        let json = serde_json::to_string(&AdapterResponse::ok()).unwrap();
        assert_eq!(json, r#"{"_message":"OK"}"#);
    }
}
