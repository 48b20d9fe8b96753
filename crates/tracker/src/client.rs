use std::future::Future;

use serde::Deserialize;

use trackwatch_common::error::AppResult;

use crate::normalizer::RawField;

/// Fields requested when listing changed issues.
pub const DEFAULT_LIST_FIELDS: &[&str] = &[
    "summary",
    "description",
    "updaterName",
    "created",
    "updated",
];

/// Parameters of a changed-issues listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueQuery {
    /// Epoch milliseconds lower bound.
    pub updated_after: i64,
    pub max: u32,
    pub fields: Vec<String>,
}

impl IssueQuery {
    pub fn new(updated_after: i64, max: u32) -> Self {
        Self {
            updated_after,
            max,
            fields: DEFAULT_LIST_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// An issue as listed by the tracker.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawIssue {
    pub id: String,
    #[serde(default)]
    pub field: Vec<RawField>,
}

/// One entry of an issue's change feed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawChange {
    #[serde(default)]
    pub field: Vec<RawField>,
}

/// An issue's change feed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawHistory {
    #[serde(default)]
    pub issue: Option<RawIssue>,
    #[serde(default)]
    pub change: Vec<RawChange>,
}

/// Read access to the issue tracker. Authentication is the implementor's
/// concern.
pub trait TrackerClient: Send + Sync + 'static {
    /// Issues of `project` updated after `query.updated_after`.
    fn list_issues(
        &self,
        project: &str,
        query: &IssueQuery,
    ) -> impl Future<Output = AppResult<Vec<RawIssue>>> + Send;

    /// Full change feed of one issue. A missing issue is reported as
    /// [`AppError::NotFound`](trackwatch_common::error::AppError::NotFound).
    fn issue_history(&self, issue_id: &str) -> impl Future<Output = AppResult<RawHistory>> + Send;
}
