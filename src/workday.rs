//! Working-day policy.
//!
//! A date is a working day unless it falls on the weekend or its ISO
//! string is a member of the holiday or leave-day calendars. Pure function
//! of the calendars and the date; the caller supplies the date in the
//! configured local timezone.

use chrono::{Datelike, NaiveDate, Weekday};

use crate::state::AttendanceState;

pub fn is_working_day(state: &AttendanceState, date: NaiveDate) -> bool {
    if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }

    let date_str = date.format("%Y-%m-%d").to_string();
    !state.holidays.contains(&date_str) && !state.leave_days.contains(&date_str)
}
