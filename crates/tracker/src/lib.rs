//! Tracker side of the pipeline: the field normalizer, the tracker client
//! seam with its YouTrack REST implementation, and the issue fetcher.

pub mod client;
pub mod fetcher;
pub mod normalizer;
pub mod youtrack;

pub use client::{IssueQuery, RawChange, RawHistory, RawIssue, TrackerClient};
pub use fetcher::IssueFetcher;
pub use normalizer::{FieldValue, NormalizedFields, RawField, normalize};
pub use youtrack::YouTrackClient;
