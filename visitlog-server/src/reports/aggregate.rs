use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Datelike, Duration, NaiveDateTime};
use tracing::debug;
use visitlog_shared::api::{AgeGroupDto, DashboardDto, PlaceVisitsDto, RecentLoginDto};
use visitlog_shared::domain::AgeBracket;

use super::{ReportWindow, TIMESTAMP_FORMAT};
use crate::storage::models::{Course, VisitRow};
use crate::storage::{StorageError, Store};

/// Counts per course and day of week (0 = Sunday).
///
/// Every course in `courses` gets a zero-filled row; rows for students
/// without a course are skipped.
pub fn weekly_course_visits(rows: &[VisitRow], courses: &[Course]) -> BTreeMap<String, [i64; 7]> {
    let mut out: BTreeMap<String, [i64; 7]> = courses
        .iter()
        .map(|c| (c.course_name.clone(), [0; 7]))
        .collect();
    for row in rows {
        let Some(name) = row.course_name.as_ref() else {
            continue;
        };
        let slot = row.check_in_time.weekday().num_days_from_sunday() as usize;
        out.entry(name.clone()).or_insert([0; 7])[slot] += 1;
    }
    out
}

/// Counts per course and calendar month (0 = January).
pub fn monthly_course_visits(
    rows: &[VisitRow],
    courses: &[Course],
) -> BTreeMap<String, [i64; 12]> {
    let mut out: BTreeMap<String, [i64; 12]> = courses
        .iter()
        .map(|c| (c.course_name.clone(), [0; 12]))
        .collect();
    for row in rows {
        let Some(name) = row.course_name.as_ref() else {
            continue;
        };
        let slot = row.check_in_time.month0() as usize;
        out.entry(name.clone()).or_insert([0; 12])[slot] += 1;
    }
    out
}

/// Visits per municipality, busiest first (ties by name).
pub fn place_visits(rows: &[VisitRow]) -> Vec<PlaceVisitsDto> {
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for row in rows {
        if let Some(m) = row.municipality.as_deref() {
            *counts.entry(m).or_default() += 1;
        }
    }
    let mut out: Vec<PlaceVisitsDto> = counts
        .into_iter()
        .map(|(municipality, visits)| PlaceVisitsDto {
            municipality: municipality.to_string(),
            visits,
        })
        .collect();
    out.sort_by(|a, b| {
        b.visits
            .cmp(&a.visits)
            .then_with(|| a.municipality.cmp(&b.municipality))
    });
    out
}

/// Number of distinct students among `rows`.
pub fn total_visitors(rows: &[VisitRow]) -> i64 {
    rows.iter()
        .map(|r| r.student_id.as_str())
        .collect::<HashSet<_>>()
        .len() as i64
}

/// Visits per age bracket, in bracket order, zero-filled.
pub fn age_groups(rows: &[VisitRow]) -> Vec<AgeGroupDto> {
    let mut counts: HashMap<AgeBracket, i64> = HashMap::new();
    for row in rows {
        *counts.entry(AgeBracket::for_age(row.age)).or_default() += 1;
    }
    AgeBracket::ALL
        .iter()
        .map(|b| AgeGroupDto {
            bracket: b.label().to_string(),
            visits: counts.get(b).copied().unwrap_or(0),
        })
        .collect()
}

/// Relative change from `previous` to `current` in percent; 100 when there
/// is nothing to compare against.
pub fn percentage_change(current: i64, previous: i64) -> f64 {
    if previous > 0 {
        (current - previous) as f64 / previous as f64 * 100.0
    } else {
        100.0
    }
}

/// Builds the full dashboard payload for `window`, with trailing figures
/// measured back from `now`.
pub async fn dashboard(
    store: &Store,
    window: &ReportWindow,
    course_id: Option<i32>,
    now: NaiveDateTime,
) -> Result<DashboardDto, StorageError> {
    let all_courses = store.list_courses().await?;
    let courses: Vec<Course> = match course_id {
        Some(id) => all_courses.iter().filter(|c| c.id == id).cloned().collect(),
        None => all_courses.clone(),
    };

    let rows = store.visits_between(window.start, window.end, course_id).await?;
    let month_start = now - Duration::weeks(4);
    let month_rows = store.visits_between(month_start, now, course_id).await?;

    let total_logins_month = store.count_checkins(month_start, now).await?;
    let total_logins_prev_month = store
        .count_checkins(month_start - Duration::weeks(4), month_start)
        .await?;

    let logged_in_users = store
        .recent_logins(now - Duration::hours(24))
        .await?
        .iter()
        .map(|(rec, at)| RecentLoginDto {
            student: rec.into(),
            login_time: at.format(TIMESTAMP_FORMAT).to_string(),
        })
        .collect();

    let place = place_visits(&rows);
    let top_weekly_places = place.iter().take(2).cloned().collect();
    debug!(
        filter = %window.filter,
        start = %window.start,
        end = %window.end,
        rows = rows.len(),
        "dashboard aggregated"
    );

    Ok(DashboardDto {
        filter: window.filter.to_string(),
        start: window.start.format(TIMESTAMP_FORMAT).to_string(),
        end: window.end.format(TIMESTAMP_FORMAT).to_string(),
        weekly_place_visits: place.clone(),
        place_visits: place,
        total_visitors: total_visitors(&rows),
        logged_in_users,
        monthly_course_visits: monthly_course_visits(&rows, &courses),
        weekly_course_visits: weekly_course_visits(&rows, &courses),
        monthly_place_visits: place_visits(&month_rows),
        top_weekly_places,
        total_logins_month,
        login_percentage_increase: percentage_change(total_logins_month, total_logins_prev_month),
        age_groups: age_groups(&rows),
        course_mapping: all_courses
            .into_iter()
            .map(|c| (c.id, c.course_name))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn course(id: i32, name: &str) -> Course {
        Course {
            id,
            course_name: name.to_string(),
        }
    }

    fn visit(student: &str, course: Option<&str>, town: Option<&str>, y: i32, m: u32, d: u32) -> VisitRow {
        VisitRow {
            attendance_id: 0,
            check_in_time: NaiveDate::from_ymd_opt(y, m, d)
                .and_then(|d| d.and_hms_opt(9, 0, 0))
                .unwrap(),
            student_id: student.to_string(),
            first_name: "F".into(),
            last_name: "L".into(),
            age: Some(20),
            course_id: None,
            course_name: course.map(str::to_string),
            municipality: town.map(str::to_string),
        }
    }

    #[test]
    fn weekly_buckets_follow_day_of_week() {
        // 2024-05-06 is a Monday, 2024-05-08 a Wednesday
        let rows = vec![
            visit("S1", Some("Information Technology"), None, 2024, 5, 6),
            visit("S1", Some("Information Technology"), None, 2024, 5, 8),
        ];
        let courses = vec![course(1, "Information Technology"), course(2, "Marine Biology")];
        let weekly = weekly_course_visits(&rows, &courses);
        assert_eq!(weekly["Information Technology"], [0, 1, 0, 1, 0, 0, 0]);
        assert_eq!(weekly["Marine Biology"], [0; 7]);
    }

    #[test]
    fn monthly_buckets_and_courseless_rows() {
        let rows = vec![
            visit("S1", Some("Marine Biology"), None, 2024, 1, 10),
            visit("S2", Some("Marine Biology"), None, 2024, 12, 10),
            visit("S3", None, None, 2024, 12, 11),
        ];
        let monthly = monthly_course_visits(&rows, &[course(2, "Marine Biology")]);
        let mb = monthly["Marine Biology"];
        assert_eq!(mb[0], 1);
        assert_eq!(mb[11], 1);
        assert_eq!(mb.iter().sum::<i64>(), 2);
        assert_eq!(monthly.len(), 1);
    }

    #[test]
    fn unknown_course_names_are_kept() {
        let rows = vec![visit("S1", Some("Astronomy"), None, 2024, 5, 6)];
        let weekly = weekly_course_visits(&rows, &[]);
        assert_eq!(weekly["Astronomy"][1], 1);
    }

    #[test]
    fn places_sorted_and_visitors_distinct() {
        let rows = vec![
            visit("S1", None, Some("Hagonoy"), 2024, 5, 6),
            visit("S1", None, Some("Malolos"), 2024, 5, 7),
            visit("S2", None, Some("Malolos"), 2024, 5, 7),
            visit("S3", None, None, 2024, 5, 7),
        ];
        let places = place_visits(&rows);
        assert_eq!(places[0].municipality, "Malolos");
        assert_eq!(places[0].visits, 2);
        assert_eq!(places.len(), 2);
        assert_eq!(total_visitors(&rows), 3);
    }

    #[test]
    fn age_groups_cover_every_bracket() {
        let mut young = visit("S1", None, None, 2024, 5, 6);
        young.age = Some(15);
        let mut unknown = visit("S2", None, None, 2024, 5, 6);
        unknown.age = None;
        let groups = age_groups(&[young, unknown]);
        assert_eq!(groups.len(), AgeBracket::ALL.len());
        assert_eq!(groups[0].bracket, "Under 18");
        assert_eq!(groups[0].visits, 1);
        assert_eq!(groups.last().map(|g| g.visits), Some(1));
    }

    #[test]
    fn percentage_change_handles_empty_previous_period() {
        assert_eq!(percentage_change(5, 0), 100.0);
        assert_eq!(percentage_change(15, 10), 50.0);
        assert_eq!(percentage_change(5, 10), -50.0);
    }
}
