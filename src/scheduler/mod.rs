//! Daily punch-in scheduler.
//!
//! Evaluated once per process run: either today is already covered (or not
//! a working day at all), or a target instant is drawn uniformly from the
//! morning window and the task sleeps until then, punches in, records the
//! result and parks in an idle heartbeat loop. A fresh process run is what
//! re-arms the next day; the idle loop only exists to keep the runtime
//! alive while the command listener works.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::notify::Notifier;
use crate::session::{PunchOutcome, SessionClient};
use crate::state::AttendanceState;
use crate::workday::is_working_day;

#[cfg(test)]
mod model;

/// Punch-in window bounds (local wall clock)
pub const WINDOW_START_HOUR: u32 = 8;
pub const WINDOW_START_MIN: u32 = 45;
pub const WINDOW_END_HOUR: u32 = 9;
pub const WINDOW_END_MIN: u32 = 10;

/// Idle heartbeat once the day is decided
pub const IDLE_HEARTBEAT: std::time::Duration = std::time::Duration::from_secs(30);

/// Outcome of the once-per-run day evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayDecision {
    /// `last_success_date` already covers today.
    AlreadyDone,
    /// Weekend, holiday or leave day.
    NotWorkingDay,
    /// Sleep until `target`, then run the punch-in action.
    Arm { target: DateTime<Tz> },
}

/// Decide what this process run should do. Pure in `(state, now, rng)`.
pub fn evaluate_day<R: Rng>(state: &AttendanceState, now: DateTime<Tz>, rng: &mut R) -> DayDecision {
    let today = now.date_naive();
    let today_str = today.format("%Y-%m-%d").to_string();

    if state.last_success_date.as_deref() == Some(today_str.as_str()) {
        return DayDecision::AlreadyDone;
    }

    if !is_working_day(state, today) {
        return DayDecision::NotWorkingDay;
    }

    DayDecision::Arm {
        target: pick_target(state, now, rng),
    }
}

/// Uniformly draw a second-granularity instant inside the window, shifting
/// the window a day when it already passed, then advancing whole days
/// (time-of-day preserved) while the landing date is not a working day.
fn pick_target<R: Rng>(state: &AttendanceState, now: DateTime<Tz>, rng: &mut R) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut window_day = now.date_naive();

    let end = localize(&tz, window_day, wall_time(WINDOW_END_HOUR, WINDOW_END_MIN));
    if now > end {
        window_day = window_day + Duration::days(1);
    }

    let start = localize(&tz, window_day, wall_time(WINDOW_START_HOUR, WINDOW_START_MIN));
    let end = localize(&tz, window_day, wall_time(WINDOW_END_HOUR, WINDOW_END_MIN));

    let span = (end - start).num_seconds().max(0);
    let offset = rng.gen_range(0..=span);
    let mut target = start + Duration::seconds(offset);

    // The calendar is only consulted here, at window-build time; an edit
    // landing while the task already sleeps is picked up next evaluation
    while !is_working_day(state, target.date_naive()) {
        target = advance_one_day(target);
    }

    target
}

fn advance_one_day(target: DateTime<Tz>) -> DateTime<Tz> {
    let tz = target.timezone();
    localize(&tz, target.date_naive() + Duration::days(1), target.time())
}

fn wall_time(hour: u32, min: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, min, 0).unwrap_or(NaiveTime::MIN)
}

/// Resolve a local wall-clock time in `tz`. On a DST gap the nearest
/// well-defined reading is good enough for a fuzzy morning window.
fn localize(tz: &Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&date.and_time(time)) {
        chrono::LocalResult::Single(t) => t,
        chrono::LocalResult::Ambiguous(earliest, _) => earliest,
        chrono::LocalResult::None => tz.from_utc_datetime(&date.and_time(time)),
    }
}

/// Run one login + punch-in attempt and record success against
/// `evaluation_day`. Failures are notified here (login notifies its own).
pub async fn run_action(
    state: &Mutex<AttendanceState>,
    session: &SessionClient,
    notifier: &Notifier,
    evaluation_day: NaiveDate,
) {
    let token = match session.login(state).await {
        Ok(token) => token,
        // login already sent its distinguished notification
        Err(e) => {
            warn!("Login failed, giving up on today's run: {}", e);
            return;
        }
    };

    match session.mark_attendance(&token).await {
        Ok(PunchOutcome::Success) => {
            record_success(state, evaluation_day).await;
            notifier.send("Attendance marked successfully.", true).await;
        }
        Ok(PunchOutcome::AlreadyDone) => {
            record_success(state, evaluation_day).await;
            notifier.send("Attendance already marked today.", true).await;
        }
        Ok(PunchOutcome::LogicalFailure(reason)) => {
            warn!("Portal refused the punch-in: {}", reason);
            notifier.send(&format!("Attendance failed: {}", reason), false).await;
        }
        Err(e) => {
            warn!("Punch-in request failed: {}", e);
            notifier.send(&format!("Error marking attendance: {}", e), false).await;
        }
    }
}

async fn record_success(state: &Mutex<AttendanceState>, evaluation_day: NaiveDate) {
    let mut state = state.lock().await;
    state.last_success_date = Some(evaluation_day.format("%Y-%m-%d").to_string());
    if let Err(e) = state.save() {
        warn!("Failed to persist attendance success: {:#}", e);
    }
}

/// The scheduler task. Never returns; after the single day evaluation it
/// parks in the idle heartbeat so the command listener keeps running.
pub async fn run_scheduler(
    state: Arc<Mutex<AttendanceState>>,
    session: Arc<SessionClient>,
    notifier: Arc<Notifier>,
    tz: Tz,
) {
    let now = Utc::now().with_timezone(&tz);
    let evaluation_day = now.date_naive();

    let decision = {
        let state = state.lock().await;
        evaluate_day(&state, now, &mut rand::thread_rng())
    };

    match decision {
        DayDecision::AlreadyDone => {
            info!("Attendance already marked for {}", evaluation_day);
            notifier
                .send("Attendance already marked today. Listening for commands only.", true)
                .await;
        }
        DayDecision::NotWorkingDay => {
            info!("{} is not a working day", evaluation_day);
            notifier
                .send("Today is not a working day. Listening for commands only.", false)
                .await;
        }
        DayDecision::Arm { target } => {
            info!("Punch-in scheduled for {}", target);
            notifier
                .send(
                    &format!(
                        "Next attendance will be marked at {}",
                        target.format("%I:%M %p, %b %-d, %Y")
                    ),
                    true,
                )
                .await;

            let wait = (target - Utc::now().with_timezone(&tz))
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            sleep(wait).await;

            run_action(&state, &session, &notifier, evaluation_day).await;
        }
    }

    info!("Scheduler idle; next evaluation requires a process restart");
    loop {
        sleep(IDLE_HEARTBEAT).await;
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use chrono_tz::Asia::Kathmandu;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    proptest! {
        /// Whatever the clock reads, an armed target keeps its time-of-day
        /// inside the window and lands on a working day
        #[test]
        fn armed_targets_stay_in_window(
            day in 1u32..=28,
            hour in 0u32..24,
            minute in 0u32..60,
            seed in 0u64..u64::MAX,
        ) {
            let state = tests::empty_state();
            let now = Kathmandu.with_ymd_and_hms(2025, 6, day, hour, minute, 0).unwrap();
            let mut rng = StdRng::seed_from_u64(seed);

            if let DayDecision::Arm { target } = evaluate_day(&state, now, &mut rng) {
                let t = target.time();
                prop_assert!(t >= wall_time(WINDOW_START_HOUR, WINDOW_START_MIN));
                prop_assert!(t <= wall_time(WINDOW_END_HOUR, WINDOW_END_MIN));
                prop_assert!(crate::workday::is_working_day(&state, target.date_naive()));
                prop_assert!(target.date_naive() >= now.date_naive());
            }
        }

        /// The armed target never drifts more than the skip-forward requires:
        /// with an empty calendar it lands at most one weekend away
        #[test]
        fn armed_targets_near_now(day in 1u32..=28, seed in 0u64..u64::MAX) {
            let state = tests::empty_state();
            let now = Kathmandu.with_ymd_and_hms(2025, 6, day, 7, 0, 0).unwrap();
            let mut rng = StdRng::seed_from_u64(seed);

            if let DayDecision::Arm { target } = evaluate_day(&state, now, &mut rng) {
                let drift = target.date_naive() - now.date_naive();
                prop_assert!(drift.num_days() <= 3, "target {} too far from {}", target, now);
            }
        }
    }
}
