//! Check-in/check-out state resolution.
//!
//! Pure decision logic over one identity's recorded sessions for one
//! calendar date. A session is open while its check-out is unset; state is
//! recomputed on every arrival, so a day may hold any number of closed
//! check-in/check-out pairs (lunch-break re-entry).

use chrono::{Duration, NaiveDateTime};

/// Default minimum gap between consecutive accepted events, in seconds.
pub const DEFAULT_MIN_GAP_SECS: u64 = 300;

/// One attendance session row for an identity on one date.
///
/// The check-in side creates the row; the check-out side closes it in
/// place. An open session has `check_out == None`.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub check_in: NaiveDateTime,
    pub check_out: Option<NaiveDateTime>,
    pub location: String,
}

impl SessionRecord {
    pub fn is_open(&self) -> bool {
        self.check_out.is_none()
    }
}

/// Outcome of resolving one arrival against the day's sessions.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Start a new session.
    CheckIn,
    /// Close the open session, recording elapsed hours.
    CheckOut { session_id: String, hours: f64 },
    /// Arrived inside the minimum gap window; nothing is recorded.
    DebounceRejected { wait_secs: i64 },
    /// An open session exists at another location; an operator must resolve.
    LocationConflict { open_location: String },
}

/// Classify one arrival for a matched identity.
///
/// `sessions` must be the identity's sessions for the arrival's calendar
/// date. The debounce window is measured against both the latest check-in
/// and the latest check-out of the day; an arrival exactly at the gap
/// boundary is classified normally.
pub fn resolve(
    sessions: &[SessionRecord],
    at: NaiveDateTime,
    location: &str,
    min_gap: Duration,
) -> Resolution {
    if sessions.is_empty() {
        return Resolution::CheckIn;
    }

    let last_in = sessions.iter().map(|s| s.check_in).max();
    let last_out = sessions.iter().filter_map(|s| s.check_out).max();
    for last in [last_in, last_out].into_iter().flatten() {
        let elapsed = at - last;
        if elapsed < min_gap {
            let wait_secs = (min_gap - elapsed).num_seconds().max(0);
            return Resolution::DebounceRejected { wait_secs };
        }
    }

    let open = sessions
        .iter()
        .filter(|s| s.is_open())
        .max_by_key(|s| s.check_in);
    match open {
        Some(session) if session.location != location => Resolution::LocationConflict {
            open_location: session.location.clone(),
        },
        Some(session) => {
            let hours = ((at - session.check_in).num_seconds() as f64 / 3600.0).max(0.0);
            Resolution::CheckOut {
                session_id: session.id.clone(),
                hours,
            }
        }
        None => Resolution::CheckIn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const LOC: &str = "front-desk";

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 2)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn open_session(id: &str, check_in: NaiveDateTime, location: &str) -> SessionRecord {
        SessionRecord {
            id: id.into(),
            check_in,
            check_out: None,
            location: location.into(),
        }
    }

    fn closed_session(
        id: &str,
        check_in: NaiveDateTime,
        check_out: NaiveDateTime,
        location: &str,
    ) -> SessionRecord {
        SessionRecord {
            id: id.into(),
            check_in,
            check_out: Some(check_out),
            location: location.into(),
        }
    }

    fn gap() -> Duration {
        Duration::seconds(DEFAULT_MIN_GAP_SECS as i64)
    }

    #[test]
    fn test_first_event_of_day_checks_in() {
        assert_eq!(resolve(&[], at(9, 0, 0), LOC, gap()), Resolution::CheckIn);
    }

    #[test]
    fn test_open_session_checks_out_with_hours() {
        let sessions = [open_session("s1", at(9, 0, 0), LOC)];
        match resolve(&sessions, at(13, 0, 0), LOC, gap()) {
            Resolution::CheckOut { session_id, hours } => {
                assert_eq!(session_id, "s1");
                assert!((hours - 4.0).abs() < 1e-9);
            }
            other => panic!("expected check-out, got {other:?}"),
        }
    }

    #[test]
    fn test_arrival_inside_gap_is_debounced() {
        // Check-in at 09:00, arrival at 09:02 with a 5-minute gap.
        let sessions = [open_session("s1", at(9, 0, 0), LOC)];
        match resolve(&sessions, at(9, 2, 0), LOC, gap()) {
            Resolution::DebounceRejected { wait_secs } => assert_eq!(wait_secs, 180),
            other => panic!("expected debounce, got {other:?}"),
        }
    }

    #[test]
    fn test_arrival_exactly_at_gap_is_classified() {
        let sessions = [open_session("s1", at(9, 0, 0), LOC)];
        match resolve(&sessions, at(9, 5, 0), LOC, gap()) {
            Resolution::CheckOut { .. } => {}
            other => panic!("expected check-out, got {other:?}"),
        }
    }

    #[test]
    fn test_debounce_measured_against_check_out_too() {
        let sessions = [closed_session("s1", at(9, 0, 0), at(12, 0, 0), LOC)];
        match resolve(&sessions, at(12, 3, 0), LOC, gap()) {
            Resolution::DebounceRejected { wait_secs } => assert_eq!(wait_secs, 120),
            other => panic!("expected debounce, got {other:?}"),
        }
    }

    #[test]
    fn test_all_sessions_closed_starts_new_check_in() {
        // Return from lunch: the closed morning session does not block a
        // fresh check-in.
        let sessions = [closed_session("s1", at(9, 0, 0), at(13, 0, 0), LOC)];
        assert_eq!(resolve(&sessions, at(14, 0, 0), LOC, gap()), Resolution::CheckIn);
    }

    #[test]
    fn test_alternation_over_a_day() {
        // in -> out -> in again, each beyond the gap.
        let mut sessions: Vec<SessionRecord> = Vec::new();
        assert_eq!(resolve(&sessions, at(9, 0, 0), LOC, gap()), Resolution::CheckIn);
        sessions.push(open_session("s1", at(9, 0, 0), LOC));

        match resolve(&sessions, at(13, 0, 0), LOC, gap()) {
            Resolution::CheckOut { session_id, hours } => {
                assert_eq!(session_id, "s1");
                assert!((hours - 4.0).abs() < 1e-9);
            }
            other => panic!("expected check-out, got {other:?}"),
        }
        sessions[0].check_out = Some(at(13, 0, 0));

        assert_eq!(resolve(&sessions, at(14, 0, 0), LOC, gap()), Resolution::CheckIn);
        sessions.push(open_session("s2", at(14, 0, 0), LOC));

        match resolve(&sessions, at(18, 0, 0), LOC, gap()) {
            Resolution::CheckOut { session_id, hours } => {
                assert_eq!(session_id, "s2");
                assert!((hours - 4.0).abs() < 1e-9);
            }
            other => panic!("expected check-out, got {other:?}"),
        }
    }

    #[test]
    fn test_open_session_elsewhere_is_a_conflict() {
        let sessions = [open_session("s1", at(9, 0, 0), "warehouse")];
        match resolve(&sessions, at(13, 0, 0), LOC, gap()) {
            Resolution::LocationConflict { open_location } => {
                assert_eq!(open_location, "warehouse");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_conflict_not_reported_inside_gap() {
        // Debounce wins over the conflict; the arrival is dropped either way.
        let sessions = [open_session("s1", at(9, 0, 0), "warehouse")];
        assert!(matches!(
            resolve(&sessions, at(9, 1, 0), LOC, gap()),
            Resolution::DebounceRejected { .. }
        ));
    }

    #[test]
    fn test_hours_never_negative() {
        // A skewed clock cannot produce negative hours: an arrival before
        // the open check-in falls inside the gap window and is debounced.
        let sessions = [open_session("s1", at(9, 0, 0), LOC)];
        assert!(matches!(
            resolve(&sessions, at(8, 59, 0), LOC, gap()),
            Resolution::DebounceRejected { .. }
        ));

        // With a zero gap the check-out is clamped at zero hours.
        match resolve(&sessions, at(8, 59, 0), LOC, Duration::zero()) {
            Resolution::CheckOut { hours, .. } => assert_eq!(hours, 0.0),
            other => panic!("expected check-out, got {other:?}"),
        }
    }

    #[test]
    fn test_latest_open_session_is_the_one_closed() {
        let sessions = [
            closed_session("s1", at(9, 0, 0), at(12, 0, 0), LOC),
            open_session("s2", at(13, 0, 0), LOC),
        ];
        match resolve(&sessions, at(18, 0, 0), LOC, gap()) {
            Resolution::CheckOut { session_id, hours } => {
                assert_eq!(session_id, "s2");
                assert!((hours - 5.0).abs() < 1e-9);
            }
            other => panic!("expected check-out, got {other:?}"),
        }
    }
}
