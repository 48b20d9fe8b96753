//! Delivery coordinator.
//!
//! Issues every send of a cycle at once and waits until all of them have
//! settled. Failed sends are logged and counted, never retried. Once nothing
//! is outstanding the checkpoint is advanced, whatever the individual
//! outcomes were.

use std::sync::Arc;

use tokio::task::JoinSet;

use trackwatch_common::error::AppResult;
use trackwatch_common::types::{Checkpoint, Notification, Project};
use trackwatch_notifier::{MessageFormat, Messenger};

use crate::checkpoint::{self, CheckpointStore};

/// Per-cycle delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: usize,
}

impl DeliveryReport {
    pub fn total(&self) -> usize {
        self.sent + self.failed
    }
}

/// Result of a settled dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub report: DeliveryReport,
    /// The watermark written after the batch settled.
    pub checkpoint: Checkpoint,
}

pub struct DeliveryCoordinator<M, S> {
    messenger: Arc<M>,
    store: Arc<S>,
    format: MessageFormat,
}

impl<M: Messenger, S: CheckpointStore> DeliveryCoordinator<M, S> {
    pub fn new(messenger: Arc<M>, store: Arc<S>) -> Self {
        Self {
            messenger,
            store,
            format: MessageFormat::HtmlSubset,
        }
    }

    /// Send all `messages` to the project's target, wait for quiescence, then
    /// advance the checkpoint from `previous`.
    ///
    /// Only a failed checkpoint write is an error; the old watermark then
    /// stays in place and the next cycle re-scans the same window.
    pub async fn dispatch(
        &self,
        project: &Project,
        previous: &Checkpoint,
        messages: Vec<Notification>,
    ) -> AppResult<DeliveryOutcome> {
        let report = self.send_all(project, messages).await;

        tracing::info!(
            project = %project.name,
            sent = report.sent,
            failed = report.failed,
            "Dispatch settled"
        );

        let checkpoint = checkpoint::save(&*self.store, project, previous).await?;
        Ok(DeliveryOutcome { report, checkpoint })
    }

    async fn send_all(&self, project: &Project, messages: Vec<Notification>) -> DeliveryReport {
        let mut outstanding = messages.len();
        let mut tasks = JoinSet::new();

        for message in messages {
            let messenger = Arc::clone(&self.messenger);
            let target = project.notification_target.clone();
            let format = self.format;
            tasks.spawn(async move {
                let result = messenger.send(&target, &message.text, format).await;
                (message, result)
            });
        }

        let mut report = DeliveryReport::default();
        while let Some(joined) = tasks.join_next().await {
            outstanding -= 1;
            match joined {
                Ok((_, Ok(()))) => report.sent += 1,
                Ok((message, Err(e))) => {
                    report.failed += 1;
                    tracing::warn!(
                        project = %project.name,
                        issue_id = %message.issue_id,
                        operation = %message.operation,
                        outstanding,
                        error = %e,
                        "Failed to deliver notification"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        project = %project.name,
                        outstanding,
                        error = %e,
                        "Delivery task failed"
                    );
                }
            }
        }

        debug_assert_eq!(outstanding, 0);
        report
    }
}
