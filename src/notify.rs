//! Telegram notification channel.
//!
//! Outcome reports are fire-and-forget: a delivery failure is logged and
//! never retried or escalated. When the bot credentials are not configured
//! the notifier degrades to local-log-only, which keeps the command-free
//! parts of the agent fully usable.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;

/// Bounded timeout for a single sendMessage call
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone)]
struct Credentials {
    bot_token: String,
    chat_id: String,
}

pub struct Notifier {
    client: reqwest::Client,
    credentials: Option<Credentials>,
    timezone: Tz,
    api_base: String,
}

impl Notifier {
    pub fn new(config: &Config) -> Self {
        let credentials = match (&config.telegram_bot_token, &config.telegram_chat_id) {
            (Some(bot_token), Some(chat_id)) => Some(Credentials {
                bot_token: bot_token.clone(),
                chat_id: chat_id.clone(),
            }),
            _ => {
                warn!("Telegram credentials missing - notifications will only be logged locally");
                None
            }
        };

        Self {
            client: reqwest::Client::new(),
            credentials,
            timezone: config.timezone,
            api_base: TELEGRAM_API_BASE.to_string(),
        }
    }

    /// Point the notifier at a different API host (integration tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Send a success- or failure-tagged message. Best-effort: errors are
    /// logged locally and swallowed.
    pub async fn send(&self, body: &str, success: bool) {
        let text = format_message(body, success, Utc::now().with_timezone(&self.timezone));

        let Some(credentials) = &self.credentials else {
            info!("[notification] {}", text);
            return;
        };

        let url = format!("{}/bot{}/sendMessage", self.api_base, credentials.bot_token);
        let payload = json!({
            "chat_id": credentials.chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });

        let response = self
            .client
            .post(&url)
            .timeout(SEND_TIMEOUT)
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(response) => match response.json::<TelegramResponse>().await {
                Ok(api) if api.ok => {}
                Ok(api) => error!(
                    "Telegram API rejected notification: {}",
                    api.description.unwrap_or_else(|| "no description".to_string())
                ),
                Err(e) => error!("Unreadable Telegram API response: {}", e),
            },
            Err(e) => {
                error!("Failed to deliver notification: {}", e);
                // Log the original message so it is not lost
                error!("Undelivered notification: {}", text);
            }
        }
    }
}

/// Render the outgoing message: outcome emoji, bot tag, local-date stamp,
/// then the body on its own line.
pub fn format_message(body: &str, success: bool, now: DateTime<Tz>) -> String {
    let emoji = if success { "\u{2705}" } else { "\u{274c}" };
    let stamp = now.format("%b %-d, %Y");
    format!("{} Attendance Bot - {}\n{}", emoji, stamp, body)
}
