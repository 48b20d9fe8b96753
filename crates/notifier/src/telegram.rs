use serde::{Deserialize, Serialize};

use trackwatch_common::error::{AppError, AppResult};

use crate::{MessageFormat, Messenger};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Telegram Bot API `sendMessage` client for one bot token.
pub struct TelegramMessenger {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramMessenger {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_api_url(DEFAULT_API_URL, token)
    }

    pub fn with_api_url(api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_url, self.token)
    }
}

fn parse_mode(format: MessageFormat) -> &'static str {
    match format {
        MessageFormat::HtmlSubset => "HTML",
    }
}

impl Messenger for TelegramMessenger {
    async fn send(&self, target: &str, text: &str, format: MessageFormat) -> AppResult<()> {
        let body = SendMessage {
            chat_id: target,
            text,
            parse_mode: parse_mode(format),
            disable_web_page_preview: true,
        };

        let response = self.http.post(self.endpoint()).json(&body).send().await?;
        let status = response.status();
        let reply: ApiResponse = response.json().await.map_err(|e| {
            AppError::Transport(format!("telegram returned {status} with unreadable body: {e}"))
        })?;

        if !status.is_success() || !reply.ok {
            return Err(AppError::Transport(format!(
                "telegram returned {status}: {}",
                reply.description.unwrap_or_default()
            )));
        }

        tracing::debug!(chat_id = target, "Message delivered");
        Ok(())
    }
}
