//! Line-delimited JSON job protocol spoken between the dispatcher and worker
//! processes: one request line in, one response line out, strictly in order.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobAction {
    Compile,
    Migrate,
}

/// One job submitted to a worker. The payload shape depends on the action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub action: JobAction,
    pub payload: Value,
}

impl JobRequest {
    pub fn compile(payload: Value) -> Self {
        Self {
            action: JobAction::Compile,
            payload,
        }
    }

    pub fn migrate(style: &str, from: &str, to: &str) -> Self {
        Self {
            action: JobAction::Migrate,
            payload: json!({ "style": style, "from": from, "to": to }),
        }
    }
}

/// Payload for [`JobAction::Migrate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigratePayload {
    pub style: String,
    pub from: String,
    pub to: String,
}

/// One worker reply. Exactly one of `error`/`result` is expected; a reply
/// carrying neither means the worker produced no usable output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl JobResponse {
    pub fn success(result: Value) -> Self {
        Self {
            error: None,
            result: Some(result),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            result: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_serialize_lowercase() {
        let request = JobRequest::migrate("#t {}", "2.0.0", "2.1.0");
        let line = serde_json::to_string(&request).expect("serialize");
        assert!(line.contains("\"action\":\"migrate\""), "{line}");
    }

    #[test]
    fn success_response_omits_error_field() {
        let line = serde_json::to_string(&JobResponse::success(json!("xml"))).expect("serialize");
        assert!(!line.contains("error"), "{line}");
        assert!(line.contains("\"result\":\"xml\""), "{line}");
    }

    #[test]
    fn empty_object_decodes_as_neither() {
        let response: JobResponse = serde_json::from_str("{}").expect("decode");
        assert!(response.error.is_none());
        assert!(response.result.is_none());
    }
}
