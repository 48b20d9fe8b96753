//! YouTrack REST client.
//!
//! Uses the legacy `/rest/issue` endpoints. When OAuth2 settings are present
//! an access token is obtained once with the client-credentials grant and
//! reused for every later request of the process.

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;

use trackwatch_common::config::OAuthConfig;
use trackwatch_common::error::{AppError, AppResult};

use crate::client::{IssueQuery, RawHistory, RawIssue, TrackerClient};

#[derive(Debug, Clone, Deserialize)]
struct AccessToken {
    token_type: String,
    access_token: String,
}

pub struct YouTrackClient {
    http: reqwest::Client,
    base_url: String,
    oauth: Option<OAuthConfig>,
    token: OnceCell<AccessToken>,
}

impl YouTrackClient {
    pub fn new(base_url: impl Into<String>, oauth: Option<OAuthConfig>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            oauth,
            token: OnceCell::new(),
        }
    }

    async fn request_token(&self, oauth: &OAuthConfig) -> AppResult<AccessToken> {
        let mut form = vec![("grant_type", "client_credentials")];
        if let Some(scope) = &oauth.scope {
            form.push(("scope", scope.as_str()));
        }

        let token: AccessToken = self
            .http
            .post(&oauth.token_url)
            .header(ACCEPT, "application/json")
            .basic_auth(&oauth.client_id, Some(&oauth.client_secret))
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        tracing::info!(token_type = %token.token_type, "Obtained tracker access token");
        Ok(token)
    }

    async fn authorization(&self) -> AppResult<Option<String>> {
        let Some(oauth) = &self.oauth else {
            return Ok(None);
        };
        let token = self
            .token
            .get_or_try_init(|| self.request_token(oauth))
            .await?;
        Ok(Some(format!("{} {}", token.token_type, token.access_token)))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> AppResult<T> {
        let mut request = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .query(query);
        if let Some(auth) = self.authorization().await? {
            request = request.header(AUTHORIZATION, auth);
        }

        let response = request.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(url.to_string()));
        }
        let response = response.error_for_status()?;

        Ok(response.json().await?)
    }
}

impl TrackerClient for YouTrackClient {
    async fn list_issues(&self, project: &str, query: &IssueQuery) -> AppResult<Vec<RawIssue>> {
        let url = format!("{}/rest/issue/byproject/{}", self.base_url, project);
        let mut params = vec![
            ("updatedAfter", query.updated_after.to_string()),
            ("max", query.max.to_string()),
        ];
        params.extend(query.fields.iter().map(|f| ("with", f.clone())));

        let issues: Vec<RawIssue> = self.get_json(&url, &params).await?;
        tracing::debug!(project, count = issues.len(), "Listed changed issues");
        Ok(issues)
    }

    async fn issue_history(&self, issue_id: &str) -> AppResult<RawHistory> {
        let url = format!("{}/rest/issue/{}/changes", self.base_url, issue_id);
        self.get_json(&url, &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_removed() {
        let client = YouTrackClient::new("https://tracker.example.com/", None);
        assert_eq!(client.base_url, "https://tracker.example.com");
    }

    #[tokio::test]
    async fn test_no_authorization_without_oauth() {
        let client = YouTrackClient::new("https://tracker.example.com", None);
        assert_eq!(client.authorization().await.unwrap(), None);
    }

    #[test]
    fn test_history_payload_decodes() {
        let history: RawHistory = serde_json::from_value(serde_json::json!({
            "issue": {"id": "CORE-1", "field": [{"name": "summary", "value": "Crash"}]},
            "change": [{"field": [{"name": "updated", "value": "1700000000000"}]}]
        }))
        .unwrap();
        assert_eq!(history.issue.unwrap().id, "CORE-1");
        assert_eq!(history.change.len(), 1);
    }

    #[test]
    fn test_history_without_changes_decodes() {
        let history: RawHistory = serde_json::from_str("{}").unwrap();
        assert!(history.issue.is_none());
        assert!(history.change.is_empty());
    }
}
