use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::time;

/// Default look-back window when no checkpoint has been persisted yet.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 10;

/// A tracker project watched by one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Project short name; every issue id of the project starts with it.
    pub name: String,
    /// Tracker base URL, used for issue links.
    pub base_url: String,
    /// Chat (or channel) that receives the notifications.
    pub notification_target: String,
    /// Key under which the checkpoint is persisted.
    pub checkpoint_key: String,
}

impl Project {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        notification_target: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            checkpoint_key: name.clone(),
            name,
            base_url: base_url.into(),
            notification_target: notification_target.into(),
        }
    }

    pub fn with_checkpoint_key(mut self, key: impl Into<String>) -> Self {
        self.checkpoint_key = key.into();
        self
    }

    /// Whether an issue id belongs to this project.
    pub fn owns(&self, issue_id: &str) -> bool {
        issue_id.starts_with(&self.name)
    }

    /// Browser link to an issue.
    pub fn issue_url(&self, issue_id: &str) -> String {
        format!("{}/issue/{}", self.base_url.trim_end_matches('/'), issue_id)
    }
}

/// Old/new pair of a single field in one historical edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    #[serde(rename = "oldValue")]
    pub old_value: Value,
    #[serde(rename = "newValue")]
    pub new_value: Value,
}

/// A file attached to an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub label: String,
    pub url: String,
}

/// One historical edit event on an issue.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChangeRecord {
    /// Epoch milliseconds of the edit.
    pub updated: i64,
    pub updater: Option<String>,
    /// Field names touched by this edit, in payload order.
    pub changed_fields: Vec<String>,
    pub changes: BTreeMap<String, FieldChange>,
}

/// An issue rebuilt from the tracker on every cycle. Never persisted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Issue {
    pub id: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub updater: Option<String>,
    /// Epoch milliseconds of creation.
    pub created: Option<i64>,
    pub attachments: Vec<Attachment>,
    /// Edits at or after the checkpoint, oldest first.
    pub changes: Vec<ChangeRecord>,
}

impl Issue {
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Fill attributes the history response did not carry from another view
    /// of the same issue.
    pub fn fill_missing_from(&mut self, other: &Issue) {
        if self.summary.is_none() {
            self.summary.clone_from(&other.summary);
        }
        if self.description.is_none() {
            self.description.clone_from(&other.description);
        }
        if self.updater.is_none() {
            self.updater.clone_from(&other.updater);
        }
        if self.created.is_none() {
            self.created = other.created;
        }
        if self.attachments.is_empty() {
            self.attachments.clone_from(&other.attachments);
        }
    }
}

/// Persisted "changed after" watermark of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(rename = "ts", with = "epoch_ms_string")]
    pub timestamp_ms: i64,
    #[serde(rename = "s", default)]
    pub human_formatted: String,
}

impl Checkpoint {
    pub fn at(timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            human_formatted: time::format_epoch_ms(timestamp_ms, &time::local_offset()),
        }
    }

    /// Wall-clock time now.
    pub fn now() -> Self {
        Self::at(time::now_ms())
    }

    /// Watermark used on first run or when the persisted one is unreadable.
    pub fn first_run() -> Self {
        let lookback = chrono::Duration::days(DEFAULT_LOOKBACK_DAYS).num_milliseconds();
        Self::at(time::now_ms() - lookback)
    }

    /// Wall-clock time now, but never earlier than `previous`.
    pub fn advanced_from(previous: &Checkpoint) -> Self {
        let now = time::now_ms();
        if now < previous.timestamp_ms {
            tracing::warn!(
                previous = previous.timestamp_ms,
                now,
                "Wall clock is behind the previous checkpoint, keeping the previous watermark"
            );
            return previous.clone();
        }
        Self::at(now)
    }
}

/// Kind of notification rendered for an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Created,
    Updated,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Created => write!(f, "created"),
            Operation::Updated => write!(f, "updated"),
        }
    }
}

/// A rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub issue_id: String,
    pub operation: Operation,
    /// HTML-subset text.
    pub text: String,
}

mod epoch_ms_string {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(ms: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ms.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let value = Value::deserialize(deserializer)?;
        crate::time::parse_epoch_ms(&value)
            .ok_or_else(|| D::Error::custom("ts must be epoch milliseconds"))
    }
}
