//! Custom-resource callback
//!
//! When the collector runs on behalf of an orchestrator, the only way a failure
//! becomes visible is a single PUT of a fixed JSON envelope to a pre-signed
//! response URL. Delivery is fire-and-forget.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use blake2::{Blake2b512, Digest};

/// Maximum length of the free-text reason
const MAX_REASON_LENGTH: usize = 256;

/// Outcome reported to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseStatus {
    Success,
    Failed,
}

/// The invoking orchestrator's request, as far as the callback needs it
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceEvent {
    #[serde(default)]
    pub request_type: String,
    #[serde(rename = "ResponseURL")]
    pub response_url: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    #[serde(default)]
    pub service_token: String,
    #[serde(default)]
    pub resource_properties: Value,
}

/// Body PUT to the response URL
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallbackEnvelope {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    pub data: Value,
}

impl CallbackEnvelope {
    fn for_event(event: &CustomResourceEvent, status: ResponseStatus) -> Self {
        Self {
            status,
            reason: None,
            physical_resource_id: physical_resource_id(
                &event.service_token,
                &event.logical_resource_id,
            ),
            stack_id: event.stack_id.clone(),
            request_id: event.request_id.clone(),
            logical_resource_id: event.logical_resource_id.clone(),
            data: Value::Object(Default::default()),
        }
    }

    pub fn success(event: &CustomResourceEvent, data: Value) -> Self {
        Self {
            reason: Some("OK".to_string()),
            data,
            ..Self::for_event(event, ResponseStatus::Success)
        }
    }

    pub fn failure(event: &CustomResourceEvent, error: &(dyn std::error::Error + 'static)) -> Self {
        Self {
            reason: Some(summarize_error(error)),
            ..Self::for_event(event, ResponseStatus::Failed)
        }
    }
}

/// PUT the envelope to the event's response URL.
///
/// Returns whether the orchestrator acknowledged it; failures are only logged.
pub async fn send_response(
    client: &reqwest::Client,
    event: &CustomResourceEvent,
    envelope: &CallbackEnvelope,
) -> bool {
    let body = match serde_json::to_vec(envelope) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!("Failed to encode callback envelope: {}", e);
            return false;
        }
    };

    // Pre-signed URLs are signed with an empty content type
    let result = client
        .put(&event.response_url)
        .header(reqwest::header::CONTENT_TYPE, "")
        .body(body)
        .send()
        .await;

    match result {
        Ok(response) => {
            tracing::debug!("Callback response status: {}", response.status());
            response.status().is_success()
        }
        Err(e) => {
            tracing::error!("Failed to deliver callback: {}", e);
            false
        }
    }
}

/// Collapse an error and its sources into one printable line
pub fn summarize_error(error: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !parts.iter().any(|p| p.contains(&text)) {
            parts.push(text);
        }
        source = cause.source();
    }

    let joined = parts.join(": ");
    let sanitized: String = joined
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .take(MAX_REASON_LENGTH)
        .collect();

    if sanitized.chars().count() < joined.chars().count() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}

/// Stable short identifier: the first part followed by the last 17 hex digits
/// of a Blake2b-512 digest over the JSON-quoted parts
pub fn mk_id(parts: &[&str]) -> String {
    let mut digest = Blake2b512::new();
    for part in parts {
        digest.update(ascii_json_string(part).as_bytes());
    }
    let hex: String = digest
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();

    format!(
        "{}{}",
        parts.first().copied().unwrap_or_default(),
        &hex[hex.len() - 17..]
    )
}

/// JSON string literal with every non-ASCII character written as `\uXXXX`
fn ascii_json_string(text: &str) -> String {
    let quoted = serde_json::to_string(text).unwrap_or_default();
    let mut out = String::with_capacity(quoted.len());
    for c in quoted.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

/// Physical id reported for a custom resource; stable across updates
pub fn physical_resource_id(service_token: &str, logical_resource_id: &str) -> String {
    mk_id(&["customResource", service_token, logical_resource_id])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, CollectError};
    use serde_json::json;

    fn event() -> CustomResourceEvent {
        serde_json::from_value(json!({
            "RequestType": "Create",
            "ResponseURL": "https://callback.example.com/put",
            "StackId": "stack-1",
            "RequestId": "req-1",
            "LogicalResourceId": "ShareSync",
            "ServiceToken": "arn:function"
        }))
        .unwrap()
    }

    #[test]
    fn test_mk_id_is_stable_and_prefixed() {
        let a = mk_id(&["rsShare", "us-east-1", "dev"]);
        let b = mk_id(&["rsShare", "us-east-1", "dev"]);
        assert_eq!(a, b);
        assert!(a.starts_with("rsShare"));
        assert_eq!(a.len(), "rsShare".len() + 17);
        assert_ne!(a, mk_id(&["rsShare", "us-west-2", "dev"]));
    }

    #[test]
    fn test_mk_id_matches_deployed_ids() {
        assert_eq!(mk_id(&["rsShare", "us-east-1", "dev"]), "rsShare09e3750db589dcc28");
        assert_eq!(
            physical_resource_id("arn:function", "ShareSync"),
            "customResource029c78919f8c3bbb8"
        );
    }

    #[test]
    fn test_non_ascii_parts_are_escaped() {
        assert_eq!(ascii_json_string("zone-\u{e9}"), "\"zone-\\u00e9\"");
        assert_eq!(ascii_json_string("\u{1f600}"), "\"\\ud83d\\ude00\"");
    }

    #[test]
    fn test_failure_envelope_carries_chain() {
        let err = CollectError::RegionUnsupported {
            kind: "vpcs".to_string(),
            region: "sa-east-1".to_string(),
            source: ApiError::Service("endpoint missing".to_string()),
        };
        let envelope = CallbackEnvelope::failure(&event(), &err);
        assert_eq!(envelope.status, ResponseStatus::Failed);
        let reason = envelope.reason.unwrap();
        assert!(reason.contains("vpcs unavailable in sa-east-1"));
        assert!(reason.contains("endpoint missing"));
    }

    #[test]
    fn test_envelope_serializes_pascal_case() {
        let envelope = CallbackEnvelope::success(&event(), json!({"Shares": 2}));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["Status"], "SUCCESS");
        assert_eq!(value["RequestId"], "req-1");
        assert_eq!(value["Data"]["Shares"], 2);
        assert!(value["PhysicalResourceId"]
            .as_str()
            .unwrap()
            .starts_with("customResource"));
    }

    #[test]
    fn test_summarize_truncates() {
        let err = ApiError::Service("e".repeat(1000));
        let summary = summarize_error(&err);
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), MAX_REASON_LENGTH + 3);
    }
}
