//! Checkpoint store.
//!
//! A keyed store of per-project watermarks. [`load`] falls back to the
//! first-run default when nothing usable is stored; [`save`] persists the
//! wall-clock time of the write, so a change landing between the fetch and
//! the write may be missed by the next cycle.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;

use trackwatch_common::error::{AppError, AppResult};
use trackwatch_common::types::{Checkpoint, Project};

/// Keyed persistence of checkpoints.
pub trait CheckpointStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> impl Future<Output = AppResult<Option<Checkpoint>>> + Send;

    fn set(&self, key: &str, checkpoint: &Checkpoint) -> impl Future<Output = AppResult<()>> + Send;
}

/// The project's checkpoint, or the first-run default when it is absent or
/// unreadable.
pub async fn load<S: CheckpointStore>(store: &S, project: &Project) -> Checkpoint {
    match store.get(&project.checkpoint_key).await {
        Ok(Some(checkpoint)) => {
            tracing::debug!(
                project = %project.name,
                ts = checkpoint.timestamp_ms,
                at = %checkpoint.human_formatted,
                "Loaded checkpoint"
            );
            checkpoint
        }
        Ok(None) => {
            let checkpoint = Checkpoint::first_run();
            tracing::info!(
                project = %project.name,
                at = %checkpoint.human_formatted,
                "No checkpoint stored, starting from default look-back"
            );
            checkpoint
        }
        Err(e) => {
            let checkpoint = Checkpoint::first_run();
            tracing::warn!(
                project = %project.name,
                error = %e,
                at = %checkpoint.human_formatted,
                "Checkpoint unreadable, falling back to default look-back"
            );
            checkpoint
        }
    }
}

/// Persist the current wall-clock time (never earlier than `previous`) as the
/// project's new checkpoint.
pub async fn save<S: CheckpointStore>(
    store: &S,
    project: &Project,
    previous: &Checkpoint,
) -> AppResult<Checkpoint> {
    let checkpoint = Checkpoint::advanced_from(previous);
    store.set(&project.checkpoint_key, &checkpoint).await?;

    tracing::info!(
        project = %project.name,
        ts = checkpoint.timestamp_ms,
        at = %checkpoint.human_formatted,
        "Checkpoint advanced"
    );
    Ok(checkpoint)
}

/// One JSON file per key: `<dir>/<key>_last_request.json`.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}_last_request.json"))
    }
}

fn persistence_error(path: &Path, e: impl std::fmt::Display) -> AppError {
    AppError::Persistence(format!("{}: {e}", path.display()))
}

impl CheckpointStore for FileCheckpointStore {
    async fn get(&self, key: &str) -> AppResult<Option<Checkpoint>> {
        let path = self.path_for(key);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(persistence_error(&path, e)),
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| persistence_error(&path, e))
    }

    async fn set(&self, key: &str, checkpoint: &Checkpoint) -> AppResult<()> {
        let path = self.path_for(key);
        let json = serde_json::to_string(checkpoint)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| persistence_error(&self.dir, e))?;

        // Readers never observe a partially written file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| persistence_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| persistence_error(&path, e))?;

        Ok(())
    }
}

/// Checkpoints stored as JSON strings under `trackwatch:checkpoint:<key>`.
#[derive(Clone)]
pub struct RedisCheckpointStore {
    redis: ConnectionManager,
}

impl RedisCheckpointStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    pub fn redis_key(key: &str) -> String {
        format!("trackwatch:checkpoint:{}", key)
    }
}

impl CheckpointStore for RedisCheckpointStore {
    async fn get(&self, key: &str) -> AppResult<Option<Checkpoint>> {
        let mut redis = self.redis.clone();
        let raw: Option<String> = redis.get(Self::redis_key(key)).await?;

        match raw {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| AppError::Persistence(format!("checkpoint {key}: {e}"))),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, checkpoint: &Checkpoint) -> AppResult<()> {
        let mut redis = self.redis.clone();
        let json = serde_json::to_string(checkpoint)?;
        redis
            .set::<_, _, ()>(Self::redis_key(key), json)
            .await
            .map_err(|e| AppError::Persistence(format!("checkpoint {key}: {e}")))
    }
}

/// In-process store, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, key: impl Into<String>, checkpoint: Checkpoint) {
        self.entries.lock().await.insert(key.into(), checkpoint);
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, key: &str) -> AppResult<Option<Checkpoint>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, checkpoint: &Checkpoint) -> AppResult<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), checkpoint.clone());
        Ok(())
    }
}

/// Backend chosen at startup.
pub enum AnyCheckpointStore {
    File(FileCheckpointStore),
    Redis(RedisCheckpointStore),
}

impl CheckpointStore for AnyCheckpointStore {
    async fn get(&self, key: &str) -> AppResult<Option<Checkpoint>> {
        match self {
            AnyCheckpointStore::File(store) => store.get(key).await,
            AnyCheckpointStore::Redis(store) => store.get(key).await,
        }
    }

    async fn set(&self, key: &str, checkpoint: &Checkpoint) -> AppResult<()> {
        match self {
            AnyCheckpointStore::File(store) => store.set(key, checkpoint).await,
            AnyCheckpointStore::Redis(store) => store.set(key, checkpoint).await,
        }
    }
}
