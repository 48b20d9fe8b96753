use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::types::Project;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Tracker base URL (REST API root and issue links)
    pub youtrack_base_url: String,

    /// Optional OAuth2 client-credentials settings for the tracker
    pub youtrack_oauth: Option<OAuthConfig>,

    /// Default Telegram bot token, used by projects without their own
    pub telegram_bot_token: Option<String>,

    /// Telegram Bot API base URL
    pub telegram_api_url: String,

    /// Path of the JSON project list
    pub projects_file: PathBuf,

    /// Maximum number of changed issues requested per cycle (default: 100)
    pub max_issues: u32,

    /// Parallel per-issue history fetches (default: 4)
    pub history_concurrency: usize,

    /// Where checkpoints live
    pub checkpoint_backend: CheckpointBackend,

    /// Directory of the file checkpoint backend (default: "last")
    pub checkpoint_dir: PathBuf,

    /// Redis connection string for the Redis checkpoint backend
    pub redis_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointBackend {
    File,
    Redis,
}

impl std::str::FromStr for CheckpointBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(CheckpointBackend::File),
            "redis" => Ok(CheckpointBackend::Redis),
            other => Err(AppError::Config(format!(
                "CHECKPOINT_BACKEND must be 'file' or 'redis', got '{other}'"
            ))),
        }
    }
}

/// One entry of the project list file.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectEntry {
    pub name: String,
    pub chat_id: String,
    /// Overrides the default bot token.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub checkpoint_key: Option<String>,
}

/// A project together with the bot token that delivers its notifications.
#[derive(Debug, Clone)]
pub struct ProjectSettings {
    pub project: Project,
    pub bot_token: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let youtrack_oauth = match std::env::var("YOUTRACK_OAUTH_URL").ok() {
            Some(token_url) => Some(OAuthConfig {
                token_url,
                client_id: std::env::var("YOUTRACK_CLIENT_ID").map_err(|_| {
                    anyhow::anyhow!("YOUTRACK_CLIENT_ID is required when YOUTRACK_OAUTH_URL is set")
                })?,
                client_secret: std::env::var("YOUTRACK_CLIENT_SECRET").map_err(|_| {
                    anyhow::anyhow!(
                        "YOUTRACK_CLIENT_SECRET is required when YOUTRACK_OAUTH_URL is set"
                    )
                })?,
                scope: std::env::var("YOUTRACK_OAUTH_SCOPE").ok(),
            }),
            None => None,
        };

        Ok(Self {
            youtrack_base_url: std::env::var("YOUTRACK_BASE_URL").map_err(|_| {
                anyhow::anyhow!("YOUTRACK_BASE_URL environment variable is required")
            })?,
            youtrack_oauth,
            telegram_bot_token: std::env::var("TELEGRAM_BOT_TOKEN").ok(),
            telegram_api_url: std::env::var("TELEGRAM_API_URL")
                .unwrap_or_else(|_| "https://api.telegram.org".to_string()),
            projects_file: std::env::var("PROJECTS_FILE")
                .unwrap_or_else(|_| "projects.json".to_string())
                .into(),
            max_issues: std::env::var("MAX_ISSUES")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("MAX_ISSUES must be a valid u32"))?,
            history_concurrency: std::env::var("HISTORY_CONCURRENCY")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("HISTORY_CONCURRENCY must be a valid usize"))?,
            checkpoint_backend: std::env::var("CHECKPOINT_BACKEND")
                .unwrap_or_else(|_| "file".to_string())
                .parse()?,
            checkpoint_dir: std::env::var("CHECKPOINT_DIR")
                .unwrap_or_else(|_| "last".to_string())
                .into(),
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        })
    }

    /// Read the project list file and resolve every entry.
    pub fn load_projects(&self) -> AppResult<Vec<ProjectSettings>> {
        let raw = read_projects_file(&self.projects_file)?;
        self.resolve_projects(&raw)
    }

    /// Parse a JSON project list and resolve tokens and checkpoint keys.
    pub fn resolve_projects(&self, json: &str) -> AppResult<Vec<ProjectSettings>> {
        let entries: Vec<ProjectEntry> = serde_json::from_str(json)
            .map_err(|e| AppError::Config(format!("invalid project list: {e}")))?;

        entries
            .into_iter()
            .map(|entry| {
                let bot_token = entry
                    .token
                    .or_else(|| self.telegram_bot_token.clone())
                    .ok_or_else(|| {
                        AppError::Config(format!(
                            "project {} has no bot token and TELEGRAM_BOT_TOKEN is not set",
                            entry.name
                        ))
                    })?;

                let mut project =
                    Project::new(entry.name, self.youtrack_base_url.clone(), entry.chat_id);
                if let Some(key) = entry.checkpoint_key {
                    project = project.with_checkpoint_key(key);
                }

                Ok(ProjectSettings { project, bot_token })
            })
            .collect()
    }
}

fn read_projects_file(path: &Path) -> AppResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(default_token: Option<&str>) -> AppConfig {
        AppConfig {
            youtrack_base_url: "https://tracker.example.com".to_string(),
            youtrack_oauth: None,
            telegram_bot_token: default_token.map(str::to_string),
            telegram_api_url: "https://api.telegram.org".to_string(),
            projects_file: "projects.json".into(),
            max_issues: 100,
            history_concurrency: 4,
            checkpoint_backend: CheckpointBackend::File,
            checkpoint_dir: "last".into(),
            redis_url: "redis://localhost:6379".to_string(),
        }
    }

    #[test]
    fn test_resolve_projects_uses_default_token() {
        let projects = config(Some("default"))
            .resolve_projects(
                r#"[
                    {"name": "CORE", "chat_id": "-100"},
                    {"name": "WEB", "chat_id": "-200", "token": "own", "checkpoint_key": "web-main"}
                ]"#,
            )
            .unwrap();

        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0].bot_token, "default");
        assert_eq!(projects[0].project.checkpoint_key, "CORE");
        assert_eq!(projects[0].project.base_url, "https://tracker.example.com");
        assert_eq!(projects[1].bot_token, "own");
        assert_eq!(projects[1].project.checkpoint_key, "web-main");
        assert_eq!(projects[1].project.notification_target, "-200");
    }

    #[test]
    fn test_resolve_projects_without_any_token_fails() {
        let err = config(None)
            .resolve_projects(r#"[{"name": "CORE", "chat_id": "-100"}]"#)
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_resolve_projects_rejects_invalid_json() {
        assert!(config(Some("t")).resolve_projects("{not json").is_err());
    }

    #[test]
    fn test_load_projects_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.json");
        std::fs::write(&path, r#"[{"name": "CORE", "chat_id": "-100"}]"#).unwrap();

        let mut cfg = config(Some("t"));
        cfg.projects_file = path;
        let projects = cfg.load_projects().unwrap();
        assert_eq!(projects[0].project.name, "CORE");
    }

    #[test]
    fn test_checkpoint_backend_parsing() {
        assert_eq!("file".parse::<CheckpointBackend>().unwrap(), CheckpointBackend::File);
        assert_eq!("Redis".parse::<CheckpointBackend>().unwrap(), CheckpointBackend::Redis);
        assert!("sqlite".parse::<CheckpointBackend>().is_err());
    }
}
