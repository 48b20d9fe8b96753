use std::sync::Arc;

use trackwatch_common::config::{AppConfig, CheckpointBackend};
use trackwatch_common::redis_pool;
use trackwatch_engine::{
    AnyCheckpointStore, FileCheckpointStore, ProjectCycle, RedisCheckpointStore,
};
use trackwatch_notifier::TelegramMessenger;
use trackwatch_tracker::{IssueFetcher, YouTrackClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "trackwatch_runner=info,trackwatch_engine=info,trackwatch_tracker=info,trackwatch_notifier=info".into()
            }),
        )
        .json()
        .init();

    tracing::info!("Trackwatch starting...");

    // Load configuration
    let config = AppConfig::from_env()?;
    let projects = config.load_projects()?;

    let store = Arc::new(match config.checkpoint_backend {
        CheckpointBackend::File => {
            AnyCheckpointStore::File(FileCheckpointStore::new(config.checkpoint_dir.clone()))
        }
        CheckpointBackend::Redis => {
            let redis = redis_pool::create_redis_pool(&config.redis_url).await?;
            AnyCheckpointStore::Redis(RedisCheckpointStore::new(redis))
        }
    });

    // One tracker client for all projects so the access token is fetched once
    let tracker = Arc::new(YouTrackClient::new(
        config.youtrack_base_url.clone(),
        config.youtrack_oauth.clone(),
    ));

    let run_all = async {
        let mut failed = 0usize;
        for settings in projects {
            let messenger = Arc::new(TelegramMessenger::with_api_url(
                config.telegram_api_url.clone(),
                settings.bot_token,
            ));
            let fetcher = IssueFetcher::new(Arc::clone(&tracker))
                .with_concurrency(config.history_concurrency);
            let cycle = ProjectCycle::new(settings.project, fetcher, messenger, Arc::clone(&store))
                .with_max_issues(config.max_issues);

            match cycle.run().await {
                Ok(summary) => tracing::info!(
                    project = %summary.project,
                    issues = summary.issues,
                    sent = summary.report.sent,
                    failed = summary.report.failed,
                    checkpoint = %summary.checkpoint.human_formatted,
                    "Project done"
                ),
                Err(e) => {
                    failed += 1;
                    tracing::error!(
                        project = %cycle.project().name,
                        error = %e,
                        "Cycle failed, checkpoint not advanced"
                    );
                }
            }
        }
        failed
    };

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        failed = run_all => {
            if failed > 0 {
                tracing::warn!(failed, "Some projects failed this run");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("Trackwatch stopped.");
    Ok(())
}
