//! Issue fetcher.
//!
//! Lists the issues of a project changed since a checkpoint, then pulls each
//! issue's change feed. History fetches are independent of each other and run
//! with bounded concurrency; a failure on one issue excludes only that issue.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use trackwatch_common::error::{AppError, AppResult};
use trackwatch_common::time::parse_epoch_ms;
use trackwatch_common::types::{Attachment, ChangeRecord, Checkpoint, Issue, Project};

use crate::client::{IssueQuery, RawChange, TrackerClient};
use crate::normalizer::{RawField, normalize, scalar_text};

/// Default number of concurrent history fetches.
pub const DEFAULT_CONCURRENCY: usize = 4;

pub struct IssueFetcher<C> {
    client: Arc<C>,
    concurrency: usize,
}

impl<C> Clone for IssueFetcher<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            concurrency: self.concurrency,
        }
    }
}

impl<C: TrackerClient> IssueFetcher<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Issues of `project` changed since `checkpoint`, at most `max`, in
    /// tracker order. Ids without the project prefix are dropped.
    pub async fn list_changed_issues(
        &self,
        project: &Project,
        checkpoint: &Checkpoint,
        max: u32,
    ) -> AppResult<Vec<Issue>> {
        let query = IssueQuery::new(checkpoint.timestamp_ms, max);
        let raw = self.client.list_issues(&project.name, &query).await?;

        let mut stubs = Vec::new();
        for issue in raw {
            if stubs.len() >= max as usize {
                break;
            }
            if !project.owns(&issue.id) {
                tracing::debug!(
                    project = %project.name,
                    issue_id = %issue.id,
                    "Ignoring issue from another project"
                );
                continue;
            }
            match issue_from_fields(&issue.id, &issue.field) {
                Ok(stub) => stubs.push(stub),
                Err(e) => tracing::warn!(
                    issue_id = %issue.id,
                    error = %e,
                    "Skipping issue with malformed fields"
                ),
            }
        }

        Ok(stubs)
    }

    /// The issue with its change records at or after `checkpoint`.
    /// A missing change feed yields an issue without changes.
    pub async fn fetch_history(&self, issue_id: &str, checkpoint: &Checkpoint) -> AppResult<Issue> {
        let history = match self.client.issue_history(issue_id).await {
            Ok(history) => history,
            Err(e) if e.is_not_found() => {
                tracing::debug!(issue_id, "No change feed for issue");
                return Ok(Issue::empty(issue_id));
            }
            Err(e) => return Err(e),
        };

        let mut issue = match &history.issue {
            Some(raw) => issue_from_fields(issue_id, &raw.field)?,
            None => Issue::empty(issue_id),
        };

        for change in &history.change {
            let record = change_from_fields(change)?;
            if record.updated >= checkpoint.timestamp_ms {
                issue.changes.push(record);
            }
        }

        Ok(issue)
    }

    /// List changed issues and fetch their histories. Issues whose history
    /// could not be fetched are left out.
    pub async fn fetch_issues_with_changes(
        &self,
        project: &Project,
        checkpoint: &Checkpoint,
        max: u32,
    ) -> AppResult<Vec<Issue>> {
        let stubs = self.list_changed_issues(project, checkpoint, max).await?;
        let total = stubs.len();

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (index, stub) in stubs.into_iter().enumerate() {
            let fetcher = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let checkpoint = checkpoint.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = fetcher.fetch_history(&stub.id, &checkpoint).await;
                (index, stub, result)
            });
        }

        let mut fetched = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, stub, Ok(mut issue))) => {
                    issue.fill_missing_from(&stub);
                    fetched.push((index, issue));
                }
                Ok((_, stub, Err(e))) => {
                    tracing::warn!(
                        project = %project.name,
                        issue_id = %stub.id,
                        error = %e,
                        "Failed to fetch issue history, excluding issue from this cycle"
                    );
                }
                Err(e) => {
                    tracing::warn!(project = %project.name, error = %e, "History fetch task failed");
                }
            }
        }

        fetched.sort_by_key(|(index, _)| *index);

        tracing::info!(
            project = %project.name,
            listed = total,
            fetched = fetched.len(),
            "Fetched issues with changes"
        );

        Ok(fetched.into_iter().map(|(_, issue)| issue).collect())
    }
}

fn issue_from_fields(id: &str, fields: &[RawField]) -> AppResult<Issue> {
    let normalized = normalize(fields)?;

    Ok(Issue {
        id: id.to_string(),
        summary: normalized.text("summary"),
        description: normalized.text("description"),
        updater: normalized.text("updaterName"),
        created: normalized.scalar("created").and_then(parse_epoch_ms),
        attachments: attachments_from_fields(fields),
        changes: Vec::new(),
    })
}

fn change_from_fields(change: &RawChange) -> AppResult<ChangeRecord> {
    let normalized = normalize(&change.field)?;

    let updated = normalized
        .scalar("updated")
        .and_then(parse_epoch_ms)
        .ok_or_else(|| AppError::MalformedPayload("change without updated timestamp".to_string()))?;

    let changes = normalized
        .changed_fields
        .iter()
        .filter_map(|name| {
            normalized
                .change(name)
                .map(|change| (name.clone(), change.clone()))
        })
        .collect();

    Ok(ChangeRecord {
        updated,
        updater: normalized.text("updaterName"),
        changed_fields: normalized.changed_fields.clone(),
        changes,
    })
}

/// The raw `attachments` list, kept whole so every file can be linked.
fn attachments_from_fields(fields: &[RawField]) -> Vec<Attachment> {
    let Some(Value::Array(items)) = fields
        .iter()
        .find(|f| f.name == "attachments")
        .and_then(|f| f.value.as_ref())
    else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let label = item.get("value").and_then(scalar_text)?;
            let url = item.get("url").and_then(scalar_text).unwrap_or_default();
            Some(Attachment { label, url })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_fields(value: Value) -> Vec<RawField> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_issue_attributes() {
        let issue = issue_from_fields(
            "CORE-1",
            &raw_fields(json!([
                {"name": "summary", "value": "Crash on start"},
                {"name": "updaterName", "value": "alice"},
                {"name": "created", "value": "1700000000000"},
                {"name": "attachments", "value": [
                    {"value": "log.txt", "url": "https://t/a/1"},
                    {"value": "shot.png", "url": "https://t/a/2"}
                ]}
            ])),
        )
        .unwrap();

        assert_eq!(issue.summary.as_deref(), Some("Crash on start"));
        assert_eq!(issue.updater.as_deref(), Some("alice"));
        assert_eq!(issue.created, Some(1_700_000_000_000));
        assert_eq!(issue.description, None);
        assert_eq!(issue.attachments.len(), 2);
        assert_eq!(issue.attachments[1].label, "shot.png");
    }

    #[test]
    fn test_change_record() {
        let change = RawChange {
            field: raw_fields(json!([
                {"name": "updated", "value": "1700000000500"},
                {"name": "updaterName", "value": "bob"},
                {"name": "State", "oldValue": ["Open"], "newValue": ["Fixed"]},
                {"name": "Sprint", "oldValue": [{"id": "S1"}], "newValue": [{"id": "S2"}]}
            ])),
        };
        let record = change_from_fields(&change).unwrap();

        assert_eq!(record.updated, 1_700_000_000_500);
        assert_eq!(record.updater.as_deref(), Some("bob"));
        assert_eq!(record.changed_fields, vec!["State", "Sprint"]);
        assert_eq!(record.changes["Sprint"].new_value, json!("S2"));
    }

    #[test]
    fn test_change_without_timestamp_is_malformed() {
        let change = RawChange {
            field: raw_fields(json!([
                {"name": "State", "oldValue": ["Open"], "newValue": ["Fixed"]}
            ])),
        };
        assert!(matches!(
            change_from_fields(&change),
            Err(AppError::MalformedPayload(_))
        ));
    }
}
