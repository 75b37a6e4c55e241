//! Weekly release of course content.
//!
//! A section releases one session per week, counted from its start date.
//! Nothing here touches the store; callers pass in `now`.

use crate::session::Session;
use crate::time::{StartDate, Timestamp};

const WEEK_SECS: f64 = (7 * 24 * 60 * 60) as f64;

/// How many of `total` sessions are visible at `now` for a section starting on `start`.
///
/// Elapsed weeks are rounded to the nearest week, so a session appears half a
/// week before its nominal release.
pub fn released_count(start: StartDate, now: Timestamp, total: usize) -> usize {
    let elapsed = now.secs() - start.timestamp().secs();
    let weeks = (elapsed as f64 / WEEK_SECS).round();

    if weeks <= 0.0 {
        0
    } else {
        (weeks as usize).min(total)
    }
}

/// The leading sessions, by week number, released as of `now`.
pub fn released(start: StartDate, now: Timestamp, mut sessions: Vec<Session>) -> Vec<Session> {
    sessions.sort_by_key(|s| s.session_number);

    let count = released_count(start, now, sessions.len());
    sessions.truncate(count);
    sessions
}
