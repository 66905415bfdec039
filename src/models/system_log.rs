use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Operation tag of a full-refresh chunk that failed after dispatch; the retry
/// sweeper only picks up rows carrying it
pub const CHUNK_FAILURE_OPERATION: &str = "full_refresh_chunk_failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemLog {
    pub id: Uuid,
    pub severity: Severity,
    pub operation: String,
    pub error_message: String,
    pub context: serde_json::Value,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

impl SystemLog {
    /// Replay instructions, when the row carries usable ones
    pub fn retry_context(&self) -> Option<RetryContext> {
        serde_json::from_value::<RetryContext>(self.context.clone())
            .ok()
            .filter(|ctx| !ctx.function.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSystemLog {
    pub severity: Severity,
    pub operation: String,
    pub error_message: String,
    pub context: serde_json::Value,
}

/// What a failed invocation records so it can be replayed verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryContext {
    /// Worker endpoint name, e.g. `full-refresh-titles`
    pub function: String,
    /// Original request body
    pub params: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log(context: serde_json::Value) -> SystemLog {
        SystemLog {
            id: Uuid::new_v4(),
            severity: Severity::Error,
            operation: CHUNK_FAILURE_OPERATION.to_string(),
            error_message: "boom".to_string(),
            context,
            resolved: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_retry_context_parsed() {
        let entry = log(json!({
            "function": "full-refresh-titles",
            "params": { "chunk": { "languageCode": "en", "year": 2020, "genreId": 28 } }
        }));
        let ctx = entry.retry_context().unwrap();
        assert_eq!(ctx.function, "full-refresh-titles");
        assert_eq!(ctx.params["chunk"]["year"], 2020);
        assert_eq!(ctx.request_id, None);
    }

    #[test]
    fn test_retry_context_rejects_missing_function() {
        assert!(log(json!({ "params": {} })).retry_context().is_none());
        assert!(log(json!({ "function": " ", "params": {} })).retry_context().is_none());
        assert!(log(json!("free text")).retry_context().is_none());
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!("warn".parse::<Severity>().unwrap(), Severity::Warning);
        assert_eq!(Severity::Error.as_str(), "error");
    }
}
