use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key/value data attached to an event.
pub type Payload = Map<String, Value>;

/// One occurrence of a condition, as recorded by the severity counter.
///
/// Records are immutable once created. Field names on disk follow the
/// event log format (`event_type`, `data`, `timer_name`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "event_type")]
    pub condition: String,
    pub severity: u32,
    #[serde(rename = "data", default)]
    pub payload: Payload,
    #[serde(default = "default_source")]
    pub source: String,
    /// Timer the occurrence belongs to; `None` for global conditions.
    #[serde(rename = "timer_name", default)]
    pub scope: Option<String>,
}

fn default_source() -> String {
    "app".into()
}

impl EventRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        condition: impl Into<String>,
        severity: u32,
        scope: Option<String>,
        payload: Payload,
    ) -> Self {
        Self {
            timestamp,
            condition: condition.into(),
            severity,
            payload,
            source: default_source(),
            scope,
        }
    }

    /// Short display label, e.g. `drink_reminder:drink_reminder (#3)`.
    pub fn label(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{}:{} (#{})", scope, self.condition, self.severity),
            None => format!("{} (#{})", self.condition, self.severity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn reads_legacy_log_entries() {
        let json = r#"{
            "timestamp": "2024-05-01T08:30:00+00:00",
            "event_type": "bad_orientation",
            "severity": 2,
            "data": {},
            "source": "app",
            "timer_name": "bad_orientation"
        }"#;
        let record: EventRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.condition, "bad_orientation");
        assert_eq!(record.scope.as_deref(), Some("bad_orientation"));
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap()
        );
    }

    #[test]
    fn entries_without_timer_name_are_global() {
        let json = r#"{"timestamp": "2024-05-01T08:30:00Z", "event_type": "drink", "severity": 1}"#;
        let record: EventRecord = serde_json::from_str(json).unwrap();
        assert!(record.scope.is_none());
        assert!(record.payload.is_empty());
        assert_eq!(record.source, "app");
        assert_eq!(record.label(), "drink (#1)");
    }
}
