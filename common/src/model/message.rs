use serde::{Deserialize, Serialize};

/// Broadcast to every connected node when a task becomes claimable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAnnouncement {
    pub trace_id: String,
    pub free_tier: bool,
    pub estimated_gp: i64,
    /// Informational: pending queue depth at announcement time.
    pub queue_len: i64,
}

/// Sent by a node racing to claim an announced task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchTask {
    pub trace_id: String,
    pub node_id: String,
}

/// Reply to a winning fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub trace_id: String,
    pub gallery_id: String,
    pub gallery_key: String,
}

/// Reply to a losing fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskGone {
    pub trace_id: String,
}

/// Submitted by a node after processing an assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub trace_id: String,
    pub node_id: String,
    pub success: bool,
    pub actual_gp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Top-level WebSocket frame: `{"type": ..., "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum WireMessage {
    #[serde(rename = "TASK_ANNOUNCEMENT")]
    TaskAnnouncement(TaskAnnouncement),
    #[serde(rename = "FETCH_TASK")]
    FetchTask(FetchTask),
    #[serde(rename = "TASK_ASSIGNED")]
    TaskAssigned(TaskAssignment),
    #[serde(rename = "TASK_GONE")]
    TaskGone(TaskGone),
    #[serde(rename = "TASK_RESULT")]
    TaskResult(TaskResult),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn announcement_envelope_matches_the_wire_format() {
        let msg = WireMessage::TaskAnnouncement(TaskAnnouncement {
            trace_id: "t-1".into(),
            free_tier: true,
            estimated_gp: 500,
            queue_len: 3,
        });

        let encoded = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            encoded,
            json!({
                "type": "TASK_ANNOUNCEMENT",
                "payload": {
                    "trace_id": "t-1",
                    "free_tier": true,
                    "estimated_gp": 500,
                    "queue_len": 3,
                }
            })
        );
    }

    #[test]
    fn fetch_task_decodes_from_a_raw_envelope() {
        let raw = r#"{"type":"FETCH_TASK","payload":{"trace_id":"t-9","node_id":"n-1"}}"#;
        let msg: WireMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            msg,
            WireMessage::FetchTask(FetchTask {
                trace_id: "t-9".into(),
                node_id: "n-1".into(),
            })
        );
    }

    #[test]
    fn failed_result_omits_the_archive_url() {
        let msg = WireMessage::TaskResult(TaskResult {
            trace_id: "t-2".into(),
            node_id: "n-1".into(),
            success: false,
            actual_gp: 0,
            archive_url: None,
            error: Some("cookie expired".into()),
        });

        let encoded = serde_json::to_string(&msg).unwrap();
        assert!(!encoded.contains("archive_url"));
        assert!(encoded.contains("cookie expired"));
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let raw = r#"{"type":"NOT_A_THING","payload":{}}"#;
        assert!(serde_json::from_str::<WireMessage>(raw).is_err());
    }
}
