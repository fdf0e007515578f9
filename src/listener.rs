//! Telegram command listener.
//!
//! Long-polls the bot's getUpdates endpoint and feeds every inbound text
//! message through the command dispatcher while the scheduler sleeps or
//! idles. The loop never exits on its own: transport failures back off and
//! retry, and only the shutdown token ends it. An optional operating-hours
//! window pauses polling overnight to cut request volume.

use chrono::Timelike;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands;
use crate::config::Config;
use crate::notify::Notifier;
use crate::state::AttendanceState;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Long-poll window requested from the Telegram API
const POLL_TIMEOUT_SECS: u64 = 30;
/// Client-side budget for one poll; must exceed the long-poll window
const POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(40);
/// Backoff after a failed poll
const POLL_BACKOFF: Duration = Duration::from_secs(5);
/// Re-check cadence while outside the operating-hours window
const OFF_HOURS_PAUSE: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    #[serde(default)]
    result: Vec<UpdateEnvelope>,
}

#[derive(Debug, Deserialize)]
struct UpdateEnvelope {
    update_id: i64,
    #[serde(default)]
    message: Option<InboundMessage>,
}

#[derive(Debug, Deserialize)]
struct InboundMessage {
    #[serde(default)]
    text: Option<String>,
}

/// Whether the listener should poll at this local hour. An overnight
/// window (start > end) wraps past midnight; no configured window means
/// always-on.
pub fn is_polling_hour(hour: u32, start: Option<u32>, end: Option<u32>) -> bool {
    match (start, end) {
        (Some(start), Some(end)) if start < end => hour >= start && hour < end,
        (Some(start), Some(end)) => hour >= start || hour < end,
        _ => true,
    }
}

/// The listener task body. Returns only when `cancel` fires.
pub async fn run_listener(
    state: Arc<Mutex<AttendanceState>>,
    notifier: Arc<Notifier>,
    config: Arc<Config>,
    cancel: CancellationToken,
) {
    let Some(bot_token) = config.telegram_bot_token.clone() else {
        // Nothing to poll without a bot; stay alive so the supervisor does
        // not spin on restarts
        info!("Telegram credentials missing - command listener disabled");
        cancel.cancelled().await;
        return;
    };

    let client = reqwest::Client::new();
    let url = format!("{}/bot{}/getUpdates", TELEGRAM_API_BASE, bot_token);
    let mut offset: Option<i64> = None;

    info!("Command listener started");

    loop {
        let local_hour = Utc::now().with_timezone(&config.timezone).hour();
        if !is_polling_hour(local_hour, config.listener_start_hour, config.listener_end_hour) {
            debug!("Outside listener operating hours, pausing");
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Command listener shutting down");
                    return;
                }
                _ = sleep(OFF_HOURS_PAUSE) => continue,
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Command listener shutting down");
                return;
            }
            polled = poll_once(&client, &url, offset) => match polled {
                Ok(updates) => {
                    for update in updates {
                        // Advance the cursor past everything we consume,
                        // even updates with no usable text
                        offset = Some(update.update_id + 1);

                        let Some(text) = update.message.and_then(|m| m.text) else {
                            continue;
                        };
                        let today = Utc::now().with_timezone(&config.timezone).date_naive();
                        if let Some(reply) = commands::handle_command(&text, &state, today).await {
                            notifier.send(&reply.text, reply.success).await;
                        }
                    }
                }
                Err(e) => {
                    warn!("Listener poll failed: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            info!("Command listener shutting down");
                            return;
                        }
                        _ = sleep(POLL_BACKOFF) => {}
                    }
                }
            }
        }
    }
}

async fn poll_once(
    client: &reqwest::Client,
    url: &str,
    offset: Option<i64>,
) -> Result<Vec<UpdateEnvelope>, reqwest::Error> {
    let mut params = vec![("timeout", POLL_TIMEOUT_SECS.to_string())];
    if let Some(offset) = offset {
        params.push(("offset", offset.to_string()));
    }

    let response = client
        .get(url)
        .timeout(POLL_REQUEST_TIMEOUT)
        .query(&params)
        .send()
        .await?
        .error_for_status()?;

    Ok(response.json::<UpdatesResponse>().await?.result)
}

/// Supervise the listener for the life of the process: if the task ever
/// terminates without being asked to, restart it with capped backoff.
pub async fn run_supervised(
    state: Arc<Mutex<AttendanceState>>,
    notifier: Arc<Notifier>,
    config: Arc<Config>,
    cancel: CancellationToken,
) {
    let initial_backoff = Duration::from_secs(5);
    let max_backoff = Duration::from_secs(60);
    let mut backoff = initial_backoff;

    loop {
        let handle = tokio::spawn(run_listener(
            state.clone(),
            notifier.clone(),
            config.clone(),
            cancel.clone(),
        ));

        match handle.await {
            Ok(()) if cancel.is_cancelled() => return,
            Ok(()) => warn!("Command listener exited unexpectedly"),
            Err(e) => warn!("Command listener task failed: {}", e),
        }

        if cancel.is_cancelled() {
            return;
        }

        warn!("Restarting command listener in {:?}", backoff);
        sleep(backoff).await;
        backoff = std::cmp::min(backoff * 2, max_backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_window_always_polls() {
        for hour in 0..24 {
            assert!(is_polling_hour(hour, None, None));
        }
    }

    #[test]
    fn test_daytime_window() {
        assert!(is_polling_hour(7, Some(7), Some(22)));
        assert!(is_polling_hour(12, Some(7), Some(22)));
        assert!(is_polling_hour(21, Some(7), Some(22)));
        assert!(!is_polling_hour(22, Some(7), Some(22)));
        assert!(!is_polling_hour(3, Some(7), Some(22)));
    }

    #[test]
    fn test_overnight_window_wraps() {
        assert!(is_polling_hour(23, Some(22), Some(6)));
        assert!(is_polling_hour(2, Some(22), Some(6)));
        assert!(!is_polling_hour(6, Some(22), Some(6)));
        assert!(!is_polling_hour(12, Some(22), Some(6)));
    }

    #[test]
    fn test_half_configured_window_always_polls() {
        // validate() rejects this, but the gate itself stays permissive
        assert!(is_polling_hour(3, Some(7), None));
        assert!(is_polling_hour(3, None, Some(22)));
    }

    #[test]
    fn test_updates_response_shape() {
        let json = r#"{
            "ok": true,
            "result": [
                {"update_id": 10, "message": {"text": "/status"}},
                {"update_id": 11, "message": {"photo": "..."}},
                {"update_id": 12}
            ]
        }"#;
        let parsed: UpdatesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.result.len(), 3);
        assert_eq!(parsed.result[0].update_id, 10);
        assert_eq!(
            parsed.result[0].message.as_ref().and_then(|m| m.text.as_deref()),
            Some("/status")
        );
        assert!(parsed.result[1].message.as_ref().unwrap().text.is_none());
        assert!(parsed.result[2].message.is_none());
    }

    #[test]
    fn test_empty_updates_response() {
        let parsed: UpdatesResponse = serde_json::from_str(r#"{"ok":true}"#).unwrap();
        assert!(parsed.result.is_empty());
    }
}
