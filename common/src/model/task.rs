use serde::{Deserialize, Serialize};

/// Lifecycle of a dispatched task.
///
/// `Pending -> Processing -> Completed`, with the watchdog allowed to reset
/// `Processing -> Pending` when a lease goes stale. Transitions happen only
/// inside the Lua scripts so no partial state is ever observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "PROCESSING")]
    Processing,
    #[serde(rename = "COMPLETED")]
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(raw: &str) -> Option<TaskStatus> {
        match raw {
            "PENDING" => Some(TaskStatus::Pending),
            "PROCESSING" => Some(TaskStatus::Processing),
            "COMPLETED" => Some(TaskStatus::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Redis list holding pending trace ids. Walked by the lease watchdog,
/// never consumed by workers directly.
pub const PENDING_QUEUE_KEY: &str = "queue:pending";

/// Task state hash: `task:{trace_id}`.
pub fn task_key(trace_id: &str) -> String {
    format!("task:{trace_id}")
}

/// Per-user result cache: `cache:{user_id}:{gallery_id}`.
pub fn cache_key(user_id: &str, gallery_id: &str) -> String {
    format!("cache:{user_id}:{gallery_id}")
}

/// Request-collapsing sentinel: `inflight:{user_id}:{gallery_id}`,
/// value is the owning trace id.
pub fn collapse_key(user_id: &str, gallery_id: &str) -> String {
    format!("inflight:{user_id}:{gallery_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_builders_use_the_fixed_keyspace() {
        assert_eq!(task_key("t-1"), "task:t-1");
        assert_eq!(cache_key("u1", "42"), "cache:u1:42");
        assert_eq!(collapse_key("u1", "42"), "inflight:u1:42");
        assert_eq!(PENDING_QUEUE_KEY, "queue:pending");
    }

    #[test]
    fn status_round_trips_through_its_wire_form() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Completed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("RUNNING"), None);
    }
}
