//! Chat command parsing and dispatch.
//!
//! The command surface is deliberately small: status inspection and leave
//! calendar edits. Parsing is pure; `handle_command` applies the effect to
//! shared state and returns the single reply the listener should send.
//! Text that is not a recognized `/command` is ignored entirely.

use chrono::NaiveDate;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::state::AttendanceState;

const HELP_TEXT: &str = "Commands:\n\
    /status - Bot status\n\
    /holidays - List holidays\n\
    /leavedays - List leave days\n\
    /addleave YYYY-MM-DD - Add a leave day\n\
    /removeleave YYYY-MM-DD - Remove a leave day";

/// A recognized inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    Holidays,
    LeaveDays,
    AddLeave(String),
    RemoveLeave(String),
}

/// The single reply produced by a dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub text: String,
    pub success: bool,
}

impl CommandReply {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: true,
        }
    }

    fn rejected(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: false,
        }
    }
}

/// Parse a message into a command. Returns None both for plain chatter
/// (no leading `/`) and for unrecognized command keywords.
pub fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim();
    if !text.starts_with('/') {
        return None;
    }

    let mut parts = text.split_whitespace();
    let keyword = parts.next()?.to_lowercase();
    let arg = parts.next().unwrap_or("").to_string();

    match keyword.as_str() {
        "/help" => Some(Command::Help),
        "/status" => Some(Command::Status),
        "/holidays" => Some(Command::Holidays),
        "/leavedays" => Some(Command::LeaveDays),
        "/addleave" => Some(Command::AddLeave(arg)),
        "/removeleave" => Some(Command::RemoveLeave(arg)),
        _ => None,
    }
}

/// Validate a calendar-edit argument: well-formed `YYYY-MM-DD`, not in the
/// past relative to the configured calendar's `today`.
pub fn validate_leave_date(arg: &str, today: NaiveDate) -> Result<NaiveDate, String> {
    let arg = arg.trim();
    let date = NaiveDate::parse_from_str(arg, "%Y-%m-%d")
        .map_err(|_| format!("Invalid date {:?}. Use YYYY-MM-DD.", arg))?;
    if date < today {
        return Err(format!("Cannot use {}: the date is in the past.", date));
    }
    Ok(date)
}

/// Dispatch one inbound message. Returns None when the text is not a
/// recognized command; otherwise exactly one reply.
pub async fn handle_command(
    text: &str,
    state: &Mutex<AttendanceState>,
    today: NaiveDate,
) -> Option<CommandReply> {
    let command = parse_command(text)?;
    info!("Handling command {:?}", command);

    let reply = match command {
        Command::Help => CommandReply::ok(HELP_TEXT),

        Command::Status => {
            let state = state.lock().await;
            CommandReply::ok(format!(
                "Last success: {}\nHolidays: {}\nLeave days: {}",
                state.last_success_date.as_deref().unwrap_or("Never"),
                state.holidays.len(),
                state.leave_days.len(),
            ))
        }

        Command::Holidays => {
            let state = state.lock().await;
            CommandReply::ok(format!("Holidays:\n{}", render_dates(&state.holidays)))
        }

        Command::LeaveDays => {
            let state = state.lock().await;
            CommandReply::ok(format!("Leave days:\n{}", render_dates(&state.leave_days)))
        }

        Command::AddLeave(arg) => match validate_leave_date(&arg, today) {
            Ok(date) => {
                let mut state = state.lock().await;
                state.leave_days.insert(date.format("%Y-%m-%d").to_string());
                persist(&state);
                CommandReply::ok(format!("Added leave: {}", date.format("%b %-d, %Y")))
            }
            Err(reason) => CommandReply::rejected(reason),
        },

        Command::RemoveLeave(arg) => match validate_leave_date(&arg, today) {
            Ok(date) => {
                let date_str = date.format("%Y-%m-%d").to_string();
                let mut state = state.lock().await;
                if state.leave_days.remove(&date_str) {
                    persist(&state);
                    CommandReply::ok(format!("Removed leave: {}", date.format("%b %-d, %Y")))
                } else {
                    CommandReply::rejected(format!(
                        "No leave scheduled on {}.",
                        date.format("%b %-d, %Y")
                    ))
                }
            }
            Err(reason) => CommandReply::rejected(reason),
        },
    };

    Some(reply)
}

fn persist(state: &AttendanceState) {
    if let Err(e) = state.save() {
        warn!("Failed to persist calendar edit: {:#}", e);
    }
}

fn render_dates(dates: &std::collections::BTreeSet<String>) -> String {
    if dates.is_empty() {
        return "None scheduled".to_string();
    }
    dates
        .iter()
        .map(|d| {
            NaiveDate::parse_from_str(d, "%Y-%m-%d")
                .map(|date| date.format("%b %-d, %Y").to_string())
                .unwrap_or_else(|_| d.clone())
        })
        .collect::<Vec<_>>()
        .join("\n")
}
