//! Attendance reporting: window resolution, dashboard aggregation,
//! CSV/PDF exports and PNG charts.

pub mod aggregate;
pub mod chart;
pub mod export;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use visitlog_shared::domain::DateFilter;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("invalid time '{0}', expected HH:MM")]
    InvalidTime(String),

    #[error("start of the window is after its end")]
    EmptyWindow,

    /// Client supplied chart data that is not valid JSON.
    #[error("Invalid JSON data: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Chart data parsed but has the wrong shape.
    #[error("{0}")]
    InvalidData(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("pdf error: {0}")]
    Pdf(String),

    #[error("chart error: {0}")]
    Chart(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReportError {
    /// True when the caller's input is at fault rather than the renderer.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ReportError::InvalidDate(_)
                | ReportError::InvalidTime(_)
                | ReportError::EmptyWindow
                | ReportError::InvalidJson(_)
                | ReportError::InvalidData(_)
        )
    }
}

/// Inclusive reporting window in local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWindow {
    pub filter: DateFilter,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Raw window parameters as they arrive on the query string.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowParams<'a> {
    pub filter: Option<&'a str>,
    pub start_date: Option<&'a str>,
    pub end_date: Option<&'a str>,
    pub start_time: Option<&'a str>,
    pub end_time: Option<&'a str>,
}

/// Turns a filter name plus optional dates into a concrete window ending at `now`.
///
/// weekly/monthly/yearly look back 1/4/52 weeks. `custom` runs from
/// `start_date 00:00` to `end_date 23:59:59`; a missing start falls back to one
/// week before `now` and a missing end to `now`. `start_time`/`end_time`
/// narrow the custom bounds to the given minute.
pub fn resolve_window(
    params: WindowParams<'_>,
    now: NaiveDateTime,
) -> Result<ReportWindow, ReportError> {
    let filter: DateFilter = params
        .filter
        .unwrap_or_default()
        .parse()
        .unwrap_or_default();
    let (start, end) = match filter {
        DateFilter::Weekly => (now - Duration::weeks(1), now),
        DateFilter::Monthly => (now - Duration::weeks(4), now),
        DateFilter::Yearly => (now - Duration::weeks(52), now),
        DateFilter::Custom => {
            let mut start = match non_blank(params.start_date) {
                Some(s) => parse_date(s)?.and_time(NaiveTime::MIN),
                None => now - Duration::weeks(1),
            };
            let mut end = match non_blank(params.end_date) {
                Some(s) => parse_date(s)?.and_time(end_of_day()),
                None => now,
            };
            if let Some(t) = non_blank(params.start_time) {
                start = start.date().and_time(parse_time(t)?);
            }
            if let Some(t) = non_blank(params.end_time) {
                end = end.date().and_time(parse_time(t)?);
            }
            (start, end)
        }
    };
    if start > end {
        return Err(ReportError::EmptyWindow);
    }
    Ok(ReportWindow { filter, start, end })
}

fn non_blank(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

fn parse_date(s: &str) -> Result<NaiveDate, ReportError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| ReportError::InvalidDate(s.to_string()))
}

fn parse_time(s: &str) -> Result<NaiveTime, ReportError> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| ReportError::InvalidTime(s.to_string()))
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
}

/// Timestamp format shared by every export.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 15)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap()
    }

    #[test]
    fn preset_filters_look_back_from_now() {
        let w = resolve_window(
            WindowParams {
                filter: Some("monthly"),
                ..Default::default()
            },
            now(),
        )
        .unwrap();
        assert_eq!(w.filter, DateFilter::Monthly);
        assert_eq!(w.start, now() - Duration::weeks(4));
        assert_eq!(w.end, now());

        let unknown = resolve_window(
            WindowParams {
                filter: Some("fortnightly"),
                ..Default::default()
            },
            now(),
        )
        .unwrap();
        assert_eq!(unknown.filter, DateFilter::Weekly);
        assert_eq!(unknown.start, now() - Duration::weeks(1));
    }

    #[test]
    fn custom_window_spans_whole_days_and_honours_times() {
        let w = resolve_window(
            WindowParams {
                filter: Some("custom"),
                start_date: Some("2024-05-01"),
                end_date: Some("2024-05-03"),
                ..Default::default()
            },
            now(),
        )
        .unwrap();
        assert_eq!(w.start.to_string(), "2024-05-01 00:00:00");
        assert_eq!(w.end.to_string(), "2024-05-03 23:59:59");

        let narrowed = resolve_window(
            WindowParams {
                filter: Some("custom"),
                start_date: Some("2024-05-01"),
                end_date: Some("2024-05-01"),
                start_time: Some("08:00"),
                end_time: Some("12:15"),
                ..Default::default()
            },
            now(),
        )
        .unwrap();
        assert_eq!(narrowed.start.to_string(), "2024-05-01 08:00:00");
        assert_eq!(narrowed.end.to_string(), "2024-05-01 12:15:00");
    }

    #[test]
    fn bad_dates_and_inverted_windows_are_errors() {
        let bad = resolve_window(
            WindowParams {
                filter: Some("custom"),
                start_date: Some("05/01/2024"),
                ..Default::default()
            },
            now(),
        );
        assert!(matches!(bad, Err(ReportError::InvalidDate(_))));

        let inverted = resolve_window(
            WindowParams {
                filter: Some("custom"),
                start_date: Some("2024-05-10"),
                end_date: Some("2024-05-01"),
                ..Default::default()
            },
            now(),
        );
        assert!(matches!(inverted, Err(ReportError::EmptyWindow)));
        assert!(ReportError::EmptyWindow.is_client_error());
    }
}
