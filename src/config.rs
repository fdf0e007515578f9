use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::env;
use std::net::IpAddr;

/// Default calendar reference for the attendance portal
pub const DEFAULT_TIMEZONE: &str = "Asia/Kathmandu";

#[derive(Debug, Clone)]
pub struct Config {
    // Attendance portal endpoints and credentials
    pub login_url: String,
    pub punch_in_url: String,
    pub username: String,
    pub password: String,

    // Network identifier sent with the punch-in request
    pub user_ip: String,

    // Telegram notifications; missing credentials degrade to log-only
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,

    // Local calendar reference for "today", weekday checks and the window
    pub timezone: Tz,

    // Durable state file
    pub state_file: String,

    // Optional listener operating hours (local time); outside the window
    // the command listener sleeps instead of polling
    pub listener_start_hour: Option<u32>,
    pub listener_end_hour: Option<u32>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env if present, ignore if missing
        Self::from_getter(|key| env::var(key).ok())
    }

    /// Parse config from a custom getter function (for testing)
    pub fn from_getter<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let timezone = get("TIMEZONE").unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let timezone: Tz = timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("TIMEZONE '{}' is not a known IANA zone: {}", timezone, e))?;

        Ok(Config {
            login_url: get("LOGIN_URL").context("LOGIN_URL not set")?,
            punch_in_url: get("PUNCH_IN_URL").context("PUNCH_IN_URL not set")?,
            username: get("PORTAL_USERNAME").context("PORTAL_USERNAME not set")?,
            password: get("PORTAL_PASSWORD").context("PORTAL_PASSWORD not set")?,

            user_ip: get("USER_IP").context("USER_IP not set")?,

            telegram_bot_token: get("TELEGRAM_BOT_TOKEN").filter(|s| !s.is_empty()),
            telegram_chat_id: get("TELEGRAM_CHAT_ID").filter(|s| !s.is_empty()),

            timezone,

            state_file: get("STATE_FILE").unwrap_or_else(|| "attendance_state.json".to_string()),

            listener_start_hour: get("LISTENER_START_HOUR").and_then(|s| s.parse().ok()),
            listener_end_hour: get("LISTENER_END_HOUR").and_then(|s| s.parse().ok()),
        })
    }

    /// Create config from a HashMap (convenience for testing)
    #[cfg(test)]
    pub fn from_map(map: &HashMap<&str, &str>) -> Result<Self> {
        Self::from_getter(|key| map.get(key).map(|v| v.to_string()))
    }

    /// Whether Telegram notifications can actually be delivered.
    pub fn telegram_enabled(&self) -> bool {
        self.telegram_bot_token.is_some() && self.telegram_chat_id.is_some()
    }

    /// Validate configuration values at startup.
    /// Returns Ok(()) if all validations pass, or Err with details of what failed.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        for (name, url) in [("LOGIN_URL", &self.login_url), ("PUNCH_IN_URL", &self.punch_in_url)] {
            if reqwest::Url::parse(url).is_err() {
                errors.push(format!("{} '{}' is not a valid URL.", name, url));
            }
        }

        if self.user_ip.parse::<IpAddr>().is_err() {
            errors.push(format!("USER_IP '{}' is not a valid IP address.", self.user_ip));
        }

        if self.username.trim().is_empty() {
            errors.push("PORTAL_USERNAME cannot be empty.".to_string());
        }

        // Partial Telegram credentials are almost certainly a mistake;
        // fail loudly rather than silently dropping notifications
        if self.telegram_bot_token.is_some() != self.telegram_chat_id.is_some() {
            errors.push(
                "TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID must be set together (or both unset)."
                    .to_string(),
            );
        }

        match (self.listener_start_hour, self.listener_end_hour) {
            (Some(start), Some(end)) => {
                if start >= 24 || end >= 24 {
                    errors.push(format!(
                        "Listener hours {}-{} out of range (0-23).",
                        start, end
                    ));
                } else if start == end {
                    errors.push("LISTENER_START_HOUR and LISTENER_END_HOUR must differ.".to_string());
                }
            }
            (None, None) => {}
            _ => errors.push(
                "LISTENER_START_HOUR and LISTENER_END_HOUR must be set together (or both unset)."
                    .to_string(),
            ),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )
        }
    }
}
