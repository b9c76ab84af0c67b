//! Daily access windows.
//!
//! Content may only be opened during configured hour ranges. Windows are
//! anchored to the calendar date of the instant being checked, in that
//! instant's own time zone: a window never spans midnight, and a window
//! whose end precedes its start is a configuration error rather than an
//! overnight range.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StillpointError};

/// Last valid hour for a window boundary.
pub const MAX_HOUR: u32 = 23;

/// A daily hour range during which content may be accessed.
///
/// The range is half-open: `start_hour:00 <= t < end_hour:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessWindow {
    /// Hour (0-23) at which the window opens.
    pub start_hour: u32,
    /// Hour (0-23) at which the window closes.
    pub end_hour: u32,
}

impl AccessWindow {
    /// Create a new window. Call [`AccessWindow::validate`] before use.
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }

    /// Check that both hours are in range and the window does not run
    /// backwards.
    pub fn validate(&self) -> Result<()> {
        if self.start_hour > MAX_HOUR || self.end_hour > MAX_HOUR {
            return Err(StillpointError::config(format!(
                "access window {}-{} has an hour outside 0-{}",
                self.start_hour, self.end_hour, MAX_HOUR
            )));
        }
        if self.end_hour < self.start_hour {
            return Err(StillpointError::config(format!(
                "access window {}-{} ends before it starts (overnight windows are not supported)",
                self.start_hour, self.end_hour
            )));
        }
        Ok(())
    }

    /// Opening instant of this window on the given date.
    fn start_on(&self, date: NaiveDate) -> Option<NaiveDateTime> {
        date.and_hms_opt(self.start_hour, 0, 0)
    }

    /// Closing instant of this window on the given date.
    fn end_on(&self, date: NaiveDate) -> Option<NaiveDateTime> {
        date.and_hms_opt(self.end_hour, 0, 0)
    }

    /// Whether a local wall-clock time falls inside this window on its own date.
    pub fn contains(&self, local: NaiveDateTime) -> bool {
        match (self.start_on(local.date()), self.end_on(local.date())) {
            (Some(start), Some(end)) => local >= start && local < end,
            _ => false,
        }
    }
}

/// Whether `now` falls inside any of the windows.
///
/// An empty window list contains no instant, so this returns `false`;
/// [`AccessPolicy`] is where "no windows configured" means unrestricted.
pub fn is_within_window<Tz: TimeZone>(now: &DateTime<Tz>, windows: &[AccessWindow]) -> bool {
    let local = now.naive_local();
    windows.iter().any(|w| w.contains(local))
}

/// The next window opening later today, if `now` is outside every window.
///
/// Returns `None` while a window is open, and when no window opens during
/// the rest of `now`'s calendar day.
pub fn next_window_start<Tz: TimeZone>(
    now: &DateTime<Tz>,
    windows: &[AccessWindow],
) -> Option<DateTime<Tz>> {
    if is_within_window(now, windows) {
        return None;
    }

    let local = now.naive_local();
    let next = windows
        .iter()
        .filter_map(|w| w.start_on(local.date()))
        .filter(|start| *start > local)
        .min()?;

    now.timezone().from_local_datetime(&next).earliest()
}

/// Countdown until the next window opens today.
pub fn time_until_next_window<Tz: TimeZone>(
    now: &DateTime<Tz>,
    windows: &[AccessWindow],
) -> Option<Duration> {
    next_window_start(now, windows).map(|next| next.signed_duration_since(now.clone()))
}

/// Validated set of access windows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    windows: Vec<AccessWindow>,
}

impl AccessPolicy {
    /// Build a policy, rejecting malformed windows.
    pub fn new(windows: Vec<AccessWindow>) -> Result<Self> {
        for window in &windows {
            window.validate()?;
        }
        Ok(Self { windows })
    }

    /// A policy without windows permits access at any time.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// The configured windows.
    pub fn windows(&self) -> &[AccessWindow] {
        &self.windows
    }

    /// Whether content may be accessed at `now`.
    pub fn is_access_permitted<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        self.windows.is_empty() || is_within_window(now, &self.windows)
    }

    /// Next opening today, when access is currently denied.
    pub fn next_opening<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        if self.windows.is_empty() {
            return None;
        }
        next_window_start(now, &self.windows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, hour, minute, 0).unwrap()
    }

    fn morning_and_evening() -> Vec<AccessWindow> {
        vec![AccessWindow::new(6, 9), AccessWindow::new(18, 21)]
    }

    #[test]
    fn test_validate_accepts_ordered_window() {
        assert!(AccessWindow::new(6, 9).validate().is_ok());
        assert!(AccessWindow::new(0, 23).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_reversed_window() {
        let err = AccessWindow::new(22, 5).validate().unwrap_err();
        assert!(matches!(err, StillpointError::Config { .. }));
        assert!(err.to_string().contains("ends before it starts"));
    }

    #[test]
    fn test_validate_rejects_out_of_range_hour() {
        assert!(AccessWindow::new(6, 24).validate().is_err());
        assert!(AccessWindow::new(25, 26).validate().is_err());
    }

    #[test]
    fn test_inside_window() {
        assert!(is_within_window(&at(7, 30), &morning_and_evening()));
        assert!(is_within_window(&at(18, 0), &morning_and_evening()));
    }

    #[test]
    fn test_end_hour_is_exclusive() {
        assert!(!is_within_window(&at(9, 0), &morning_and_evening()));
        assert!(is_within_window(&at(8, 59), &morning_and_evening()));
    }

    #[test]
    fn test_outside_all_windows() {
        assert!(!is_within_window(&at(12, 0), &morning_and_evening()));
        assert!(!is_within_window(&at(3, 0), &morning_and_evening()));
    }

    #[test]
    fn test_empty_window_list_contains_nothing() {
        assert!(!is_within_window(&at(12, 0), &[]));
    }

    #[test]
    fn test_next_window_start_later_today() {
        let next = next_window_start(&at(12, 0), &morning_and_evening()).unwrap();
        assert_eq!(next, at(18, 0));
    }

    #[test]
    fn test_next_window_start_picks_earliest() {
        let next = next_window_start(&at(2, 0), &morning_and_evening()).unwrap();
        assert_eq!(next, at(6, 0));
    }

    #[test]
    fn test_next_window_start_none_when_inside() {
        assert!(next_window_start(&at(7, 0), &morning_and_evening()).is_none());
    }

    #[test]
    fn test_next_window_start_none_after_last_window() {
        // Only the current calendar day is considered.
        assert!(next_window_start(&at(22, 0), &morning_and_evening()).is_none());
    }

    #[test]
    fn test_time_until_next_window() {
        let wait = time_until_next_window(&at(16, 30), &morning_and_evening()).unwrap();
        assert_eq!(wait, Duration::minutes(90));
    }

    #[test]
    fn test_windows_use_local_time_of_offset() {
        // 05:30 UTC is 07:30 at UTC+2, inside the morning window.
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = at(5, 30).with_timezone(&offset);
        assert!(is_within_window(&now, &morning_and_evening()));
        assert!(!is_within_window(&at(5, 30), &morning_and_evening()));
    }

    #[test]
    fn test_policy_rejects_malformed_window() {
        let result = AccessPolicy::new(vec![AccessWindow::new(6, 9), AccessWindow::new(20, 4)]);
        assert!(matches!(result, Err(StillpointError::Config { .. })));
    }

    #[test]
    fn test_unrestricted_policy_always_permits() {
        let policy = AccessPolicy::unrestricted();
        assert!(policy.is_access_permitted(&at(3, 0)));
        assert!(policy.next_opening(&at(3, 0)).is_none());
    }

    #[test]
    fn test_policy_permits_only_inside_windows() {
        let policy = AccessPolicy::new(morning_and_evening()).unwrap();
        assert!(policy.is_access_permitted(&at(19, 0)));
        assert!(!policy.is_access_permitted(&at(10, 0)));
        assert_eq!(policy.next_opening(&at(10, 0)), Some(at(18, 0)));
    }
}
