//! One notification cycle for one project:
//! load checkpoint → fetch changed issues → render → dispatch → advance.

use std::sync::Arc;

use trackwatch_common::error::AppResult;
use trackwatch_common::types::{Checkpoint, Project};
use trackwatch_notifier::Messenger;
use trackwatch_tracker::{IssueFetcher, TrackerClient};

use crate::checkpoint::{self, CheckpointStore};
use crate::coordinator::{DeliveryCoordinator, DeliveryReport};
use crate::renderer::Renderer;

/// Default cap on issues listed per cycle.
pub const DEFAULT_MAX_ISSUES: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub project: String,
    pub issues: usize,
    pub messages: usize,
    pub report: DeliveryReport,
    /// Watermark the cycle started from.
    pub previous: Checkpoint,
    /// Watermark written once the cycle settled.
    pub checkpoint: Checkpoint,
}

/// Everything one project needs for a cycle. Holds no state between runs
/// other than what the checkpoint store persists.
pub struct ProjectCycle<C, M, S> {
    project: Project,
    fetcher: IssueFetcher<C>,
    renderer: Renderer,
    coordinator: DeliveryCoordinator<M, S>,
    store: Arc<S>,
    max_issues: u32,
}

impl<C, M, S> ProjectCycle<C, M, S>
where
    C: TrackerClient,
    M: Messenger,
    S: CheckpointStore,
{
    pub fn new(project: Project, fetcher: IssueFetcher<C>, messenger: Arc<M>, store: Arc<S>) -> Self {
        Self {
            project,
            fetcher,
            renderer: Renderer::new(),
            coordinator: DeliveryCoordinator::new(messenger, Arc::clone(&store)),
            store,
            max_issues: DEFAULT_MAX_ISSUES,
        }
    }

    pub fn with_renderer(mut self, renderer: Renderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_max_issues(mut self, max_issues: u32) -> Self {
        self.max_issues = max_issues;
        self
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Run one cycle. Fails when the issue listing or the checkpoint write
    /// fails; the stored checkpoint is then left untouched.
    pub async fn run(&self) -> AppResult<CycleSummary> {
        let previous = checkpoint::load(&*self.store, &self.project).await;

        tracing::info!(
            project = %self.project.name,
            since = %previous.human_formatted,
            max = self.max_issues,
            "Cycle started"
        );

        let issues = self
            .fetcher
            .fetch_issues_with_changes(&self.project, &previous, self.max_issues)
            .await?;
        let messages = self.renderer.render_all(&self.project, &issues);
        let message_count = messages.len();

        let outcome = self
            .coordinator
            .dispatch(&self.project, &previous, messages)
            .await?;

        Ok(CycleSummary {
            project: self.project.name.clone(),
            issues: issues.len(),
            messages: message_count,
            report: outcome.report,
            previous,
            checkpoint: outcome.checkpoint,
        })
    }
}
