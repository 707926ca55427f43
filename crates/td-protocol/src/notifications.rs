//! Cross-cutting notifications: cancellation and progress

use crate::jsonrpc::RequestId;
use serde::{Deserialize, Serialize};

/// Explicit cancellation of an in-flight request.
///
/// Transport disconnection is never interpreted as cancellation; this frame
/// is the only way a peer aborts a running handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelledNotification {
    #[serde(rename = "requestId")]
    pub request_id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Progress report for a long-running request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressNotification {
    /// Token correlating the report with the original request; a string or
    /// integer scalar.
    #[serde(rename = "progressToken")]
    pub progress_token: serde_json::Value,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cancelled_notification_roundtrip() {
        let n: CancelledNotification =
            serde_json::from_value(json!({"requestId": 2, "reason": "user abort"})).unwrap();
        assert_eq!(n.request_id, json!(2));
        assert_eq!(n.reason.as_deref(), Some("user abort"));

        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["requestId"], 2);
    }

    #[test]
    fn test_progress_total_optional() {
        let n = ProgressNotification {
            progress_token: json!("tok"),
            progress: 0.5,
            total: None,
        };
        let v = serde_json::to_value(&n).unwrap();
        assert!(v.get("total").is_none());
        assert_eq!(v["progressToken"], "tok");
    }
}
