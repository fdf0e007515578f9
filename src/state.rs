//! Durable attendance state.
//!
//! A single JSON record holds everything that must survive restarts: the
//! last successful punch-in date, the holiday and leave-day calendars, and
//! the cached portal token. The whole record is rewritten after every
//! mutation; there is no batching or write-behind.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::token::TokenStore;

/// On-disk shape of the state record.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateRecord {
    last_success_date: Option<String>,
    #[serde(default)]
    holidays: Vec<String>,
    #[serde(default)]
    leave_days: Vec<String>,
    token: Option<String>,
    token_expiry: Option<String>,
}

#[derive(Debug)]
pub struct AttendanceState {
    pub last_success_date: Option<String>,
    pub holidays: BTreeSet<String>,
    pub leave_days: BTreeSet<String>,
    pub token_store: TokenStore,
    path: PathBuf,
}

impl AttendanceState {
    /// Load state from `path`, seeding the fixed holidays for `year`.
    ///
    /// A missing or malformed file is not an error condition: startup must
    /// always succeed, so the agent falls back to empty defaults.
    pub fn load(path: impl Into<PathBuf>, year: i32) -> Self {
        Self::load_at(path, year, Utc::now())
    }

    /// Testable version: load with an explicit "now" for the token
    /// restore decision.
    pub fn load_at(path: impl Into<PathBuf>, year: i32, now: DateTime<Utc>) -> Self {
        let path = path.into();

        let record = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<StateRecord>(&text) {
                Ok(record) => record,
                Err(e) => {
                    warn!("State file {} is malformed ({}), starting fresh", path.display(), e);
                    StateRecord::default()
                }
            },
            // First run, or the file was removed; both are fine.
            Err(_) => StateRecord::default(),
        };

        // A persisted token is honored only while its expiry is still in
        // the future; anything else starts the store empty.
        let mut token_store = TokenStore::new();
        if let (Some(token), Some(expiry)) = (record.token, record.token_expiry) {
            match DateTime::parse_from_rfc3339(&expiry) {
                Ok(expiry) => {
                    let expiry = expiry.with_timezone(&Utc);
                    if expiry > now {
                        debug!("Restored cached token, valid until {}", expiry);
                        token_store = TokenStore::restore(token, expiry);
                    } else {
                        debug!("Persisted token expired at {}, ignoring it", expiry);
                    }
                }
                Err(e) => warn!("Unreadable token expiry {:?} ({}), ignoring token", expiry, e),
            }
        }

        let mut state = Self {
            last_success_date: record.last_success_date,
            holidays: record.holidays.into_iter().collect(),
            leave_days: record.leave_days.into_iter().collect(),
            token_store,
            path,
        };
        state.seed_holidays(year);
        state
    }

    /// Fixed company holidays for the given year.
    fn seed_holidays(&mut self, year: i32) {
        self.holidays.insert(format!("{year}-01-01")); // New Year's Day
        self.holidays.insert(format!("{year}-05-01")); // Labor Day
        self.holidays.insert(format!("{year}-12-25")); // Christmas Day
    }

    /// Persist the whole record.
    ///
    /// Writes to a sibling temp file and renames it over the target, so a
    /// crash mid-write leaves the previous valid copy in place.
    pub fn save(&self) -> Result<()> {
        let record = StateRecord {
            last_success_date: self.last_success_date.clone(),
            holidays: self.holidays.iter().cloned().collect(),
            leave_days: self.leave_days.iter().cloned().collect(),
            // An already-expired token is not worth carrying across runs
            token: if self.token_store.is_valid() {
                self.token_store.value().map(str::to_string)
            } else {
                None
            },
            token_expiry: if self.token_store.is_valid() {
                self.token_store.expires_at().map(|t| t.to_rfc3339())
            } else {
                None
            },
        };

        let json = serde_json::to_string_pretty(&record)
            .context("Failed to serialize attendance state")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("Failed to write state file {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to finalize state file {}", self.path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
