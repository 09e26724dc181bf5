use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::Variant;

use super::state::{Message, WorkflowSnapshot, WorkflowStatus};

/// Exportable summary of one workflow session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub thread_id: Option<String>,
    pub status: WorkflowStatus,
    pub error: Option<String>,
    pub messages: Vec<Message>,
    pub variants: Vec<Variant>,
    pub test_results: BTreeMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl SessionRecord {
    /// Capture `snapshot` as the final state of a session begun at `started_at`.
    pub fn from_snapshot(snapshot: &WorkflowSnapshot, started_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            thread_id: snapshot.thread_id.clone(),
            status: snapshot.status,
            error: snapshot.error.clone(),
            messages: snapshot.messages.clone(),
            variants: snapshot.variants.clone(),
            test_results: snapshot.test_results.clone(),
            started_at,
            finished_at: now,
            duration_ms: (now - started_at).num_milliseconds(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn record_from_completed_snapshot() {
        let mut snapshot = WorkflowSnapshot::default();
        snapshot.thread_id = Some("t1".into());
        snapshot.status = WorkflowStatus::Completed;
        snapshot.messages = vec![Message::user("idea"), Message::assistant("ok")];
        snapshot.test_results.insert("v0".into(), "out".into());

        let started = Utc::now() - Duration::seconds(2);
        let record = SessionRecord::from_snapshot(&snapshot, started);

        assert_eq!(record.thread_id.as_deref(), Some("t1"));
        assert_eq!(record.status, WorkflowStatus::Completed);
        assert_eq!(record.messages.len(), 2);
        assert_eq!(record.test_results["v0"], "out");
        assert!(record.duration_ms >= 2000);
        assert!(record.finished_at >= record.started_at);
    }

    #[test]
    fn json_uses_lowercase_status() {
        let mut snapshot = WorkflowSnapshot::default();
        snapshot.status = WorkflowStatus::Error;
        snapshot.error = Some("Connection lost".into());

        let json = SessionRecord::from_snapshot(&snapshot, Utc::now())
            .to_json()
            .unwrap();

        assert!(json.contains(r#""status": "error""#));
        assert!(json.contains("Connection lost"));
    }
}
