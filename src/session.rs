//! Attendance portal session client.
//!
//! Owns the two portal calls: credential login (with cached-token reuse
//! and bounded retry) and the punch-in request. The scheduler branches on
//! the typed results, so classification happens here at the response
//! boundary and nowhere else.

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::Config;
use crate::notify::Notifier;
use crate::state::AttendanceState;

/// Login attempts before a transient failure becomes the day's failure
pub const LOGIN_MAX_ATTEMPTS: u32 = 3;
/// Fixed delay between login attempts
pub const LOGIN_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Bounded timeout for portal calls
const PORTAL_TIMEOUT: Duration = Duration::from_secs(30);

/// TTL assumed when the login response does not declare one
const DEFAULT_TOKEN_TTL: &str = "2h";

#[derive(Debug, Error)]
pub enum LoginError {
    /// Credential rejection; the cached token has been cleared.
    #[error("login rejected by portal (status {status}): {detail}")]
    AuthRejected { status: u16, detail: String },

    /// The portal answered but the body was unusable. Not retried, and the
    /// cached token is left alone - it may still be valid.
    #[error("malformed login response: {0}")]
    Malformed(String),

    /// Connection-level failure; retried with a fixed delay.
    #[error("login transport failure: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Punch-in result, decided once at the response boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PunchOutcome {
    Success,
    AlreadyDone,
    LogicalFailure(String),
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: Option<String>,
    expires_in: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PunchResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct SessionClient {
    client: reqwest::Client,
    config: Arc<Config>,
    notifier: Arc<Notifier>,
}

impl SessionClient {
    pub fn new(config: Arc<Config>, notifier: Arc<Notifier>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            notifier,
        }
    }

    /// Obtain a bearer token, reusing the cached one when still valid.
    ///
    /// Transient transport failures are retried up to [`LOGIN_MAX_ATTEMPTS`]
    /// times with a fixed delay. An auth rejection clears the token store
    /// and aborts immediately; a malformed response aborts without
    /// touching the store.
    pub async fn login(&self, state: &Mutex<AttendanceState>) -> Result<String, LoginError> {
        {
            let state = state.lock().await;
            if state.token_store.is_valid() {
                let token = state.token_store.value().unwrap_or_default().to_string();
                drop(state);
                info!("Reusing cached portal token");
                self.notifier.send("Using cached token", true).await;
                return Ok(token);
            }
        }

        let mut last_transport: Option<LoginError> = None;

        for attempt in 1..=LOGIN_MAX_ATTEMPTS {
            if attempt > 1 {
                warn!(
                    "Login attempt {}/{} failed, retrying in {:?}",
                    attempt - 1,
                    LOGIN_MAX_ATTEMPTS,
                    LOGIN_RETRY_DELAY
                );
                sleep(LOGIN_RETRY_DELAY).await;
            }

            match self.try_login().await {
                Ok((token, ttl_spec)) => {
                    {
                        let mut state = state.lock().await;
                        state.token_store.set_token(token.as_str(), &ttl_spec);
                        if let Err(e) = state.save() {
                            warn!("Failed to persist token after login: {:#}", e);
                        }
                    }
                    info!("Portal login successful");
                    self.notifier.send("Login successful", true).await;
                    return Ok(token);
                }
                Err(e @ LoginError::AuthRejected { .. }) => {
                    {
                        let mut state = state.lock().await;
                        state.token_store.clear();
                        if let Err(e) = state.save() {
                            warn!("Failed to persist cleared token: {:#}", e);
                        }
                    }
                    warn!("Portal rejected credentials: {}", e);
                    self.notifier
                        .send("Login rejected by the portal - cached token discarded. Check credentials.", false)
                        .await;
                    return Err(e);
                }
                Err(e @ LoginError::Malformed(_)) => {
                    warn!("Login response unusable: {}", e);
                    self.notifier.send(&format!("Login failed: {}", e), false).await;
                    return Err(e);
                }
                Err(e @ LoginError::Transport(_)) => {
                    last_transport = Some(e);
                }
            }
        }

        // Retries exhausted
        let err = last_transport.unwrap_or_else(|| {
            LoginError::Malformed("login retry loop ended without an error".to_string())
        });
        warn!("Login failed after {} attempts: {}", LOGIN_MAX_ATTEMPTS, err);
        self.notifier
            .send(&format!("Login failed after {} attempts: {}", LOGIN_MAX_ATTEMPTS, err), false)
            .await;
        Err(err)
    }

    async fn try_login(&self) -> Result<(String, String), LoginError> {
        let response = self
            .client
            .post(&self.config.login_url)
            .timeout(PORTAL_TIMEOUT)
            .json(&json!({
                "email": self.config.username,
                "password": self.config.password,
            }))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            let detail = response.text().await.unwrap_or_default();
            return Err(LoginError::AuthRejected {
                status: status.as_u16(),
                detail,
            });
        }

        // Any other error status counts as transient and goes through the
        // retry loop
        let response = response.error_for_status()?;

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| LoginError::Malformed(e.to_string()))?;

        let token = body
            .access_token
            .ok_or_else(|| LoginError::Malformed("no access token in response".to_string()))?;
        let ttl_spec = body
            .expires_in
            .unwrap_or_else(|| DEFAULT_TOKEN_TTL.to_string());

        Ok((token, ttl_spec))
    }

    /// Submit the punch-in request. The outcome is classified here once;
    /// transport failures propagate and there is no retry - a failed punch
    /// is that day's failed run.
    pub async fn mark_attendance(&self, token: &str) -> Result<PunchOutcome, reqwest::Error> {
        let response = self
            .client
            .post(&self.config.punch_in_url)
            .timeout(PORTAL_TIMEOUT)
            .json(&json!({
                "token": token,
                "ip": self.config.user_ip,
            }))
            .send()
            .await?
            .error_for_status()?;

        let body: PunchResponse = response.json().await?;
        Ok(classify_punch(&body))
    }
}

/// "Already punched in!" is how the portal reports an idempotent repeat;
/// both it and an explicit success status count as a successful day.
fn classify_punch(body: &PunchResponse) -> PunchOutcome {
    if body.status.as_deref() == Some("success") {
        return PunchOutcome::Success;
    }
    if body.message.as_deref() == Some("Already punched in!") {
        return PunchOutcome::AlreadyDone;
    }
    PunchOutcome::LogicalFailure(
        body.message
            .clone()
            .unwrap_or_else(|| "Unknown error".to_string()),
    )
}
