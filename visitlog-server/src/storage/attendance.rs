use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime};
use diesel::dsl::max;
use diesel::prelude::*;
use tracing::trace;

use super::models::{NewAttendance, Student, StudentRecord, VisitRow};
use super::{Store, StorageError, load_student_record, load_student_records, schema};

/// Result of a check-in attempt.
#[derive(Debug, Clone)]
pub enum CheckInOutcome {
    /// A new attendance row was written at `at`.
    Recorded { record: StudentRecord, at: NaiveDateTime },
    /// The student already has a row on the same calendar day.
    AlreadyCheckedIn { record: StudentRecord, at: NaiveDateTime },
    UnknownStudent,
}

impl Store {
    /// Records a visit for `student_id` at local time `now`.
    ///
    /// The lookup, same-day check and insert run in one IMMEDIATE transaction
    /// so two concurrent submissions for the same ID cannot both pass the check.
    pub async fn check_in(
        &self,
        student_id: &str,
        now: NaiveDateTime,
        one_per_day: bool,
    ) -> Result<CheckInOutcome, StorageError> {
        use schema::{attendance, students};
        let sid = student_id.trim().to_string();
        if sid.is_empty() {
            return Err(StorageError::InvalidInput("Student ID is required".into()));
        }
        trace!(student_id = %sid, %now, "check_in starting");
        self.run(move |conn| {
            conn.immediate_transaction(|conn| -> Result<CheckInOutcome, StorageError> {
                let known: i64 = students::table
                    .filter(students::id.eq(&sid))
                    .count()
                    .get_result(conn)?;
                if known == 0 {
                    return Ok(CheckInOutcome::UnknownStudent);
                }
                if one_per_day {
                    let day_start = now.date().and_time(chrono::NaiveTime::MIN);
                    let day_end = day_start + Duration::days(1);
                    let existing: Option<NaiveDateTime> = attendance::table
                        .filter(attendance::student_id.eq(&sid))
                        .filter(attendance::check_in_time.ge(day_start))
                        .filter(attendance::check_in_time.lt(day_end))
                        .select(attendance::check_in_time)
                        .order(attendance::check_in_time.asc())
                        .first(conn)
                        .optional()?;
                    if let Some(at) = existing {
                        let record = load_student_record(conn, &sid)?;
                        return Ok(CheckInOutcome::AlreadyCheckedIn { record, at });
                    }
                }
                diesel::insert_into(attendance::table)
                    .values(&NewAttendance {
                        student_id: &sid,
                        check_in_time: now,
                    })
                    .execute(conn)?;
                let record = load_student_record(conn, &sid)?;
                Ok(CheckInOutcome::Recorded { record, at: now })
            })
        })
        .await
    }

    /// Appends an attendance row without the same-day rule (imports and fixtures).
    pub async fn record_attendance(
        &self,
        student_id: &str,
        at: NaiveDateTime,
    ) -> Result<(), StorageError> {
        use schema::attendance;
        let sid = student_id.to_string();
        self.run(move |conn| {
            diesel::insert_into(attendance::table)
                .values(&NewAttendance {
                    student_id: &sid,
                    check_in_time: at,
                })
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    pub async fn attendance_count_for(&self, student_id: &str) -> Result<i64, StorageError> {
        use schema::attendance::dsl as a;
        let sid = student_id.to_string();
        self.run(move |conn| {
            Ok(a::attendance
                .filter(a::student_id.eq(&sid))
                .count()
                .get_result(conn)?)
        })
        .await
    }

    /// Attendance rows with `start <= check_in_time <= end`, oldest first,
    /// optionally restricted to students enrolled in `course_id`.
    pub async fn visits_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        course_id: Option<i32>,
    ) -> Result<Vec<VisitRow>, StorageError> {
        use schema::{attendance, courses, locations, students};
        if end < start {
            return Ok(Vec::new());
        }
        self.run(move |conn| {
            let mut q = attendance::table
                .inner_join(students::table.on(students::id.eq(attendance::student_id)))
                .left_join(courses::table.on(students::course_id.eq(courses::id.nullable())))
                .left_join(
                    locations::table.on(students::location_id.eq(locations::id.nullable())),
                )
                .filter(attendance::check_in_time.ge(start))
                .filter(attendance::check_in_time.le(end))
                .select((
                    attendance::id,
                    attendance::check_in_time,
                    students::id,
                    students::first_name,
                    students::last_name,
                    students::age,
                    students::course_id,
                    courses::course_name.nullable(),
                    locations::municipality.nullable(),
                ))
                .into_boxed();
            if let Some(cid) = course_id {
                q = q.filter(students::course_id.eq(cid));
            }
            Ok(q
                .order((attendance::check_in_time.asc(), attendance::id.asc()))
                .load::<VisitRow>(conn)?)
        })
        .await
    }

    /// Number of check-ins with `start <= check_in_time < end`.
    pub async fn count_checkins(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<i64, StorageError> {
        use schema::attendance::dsl as a;
        self.run(move |conn| {
            Ok(a::attendance
                .filter(a::check_in_time.ge(start))
                .filter(a::check_in_time.lt(end))
                .count()
                .get_result(conn)?)
        })
        .await
    }

    /// Students with at least one check-in since `since`, newest first,
    /// each paired with their latest check-in time.
    pub async fn recent_logins(
        &self,
        since: NaiveDateTime,
    ) -> Result<Vec<(StudentRecord, NaiveDateTime)>, StorageError> {
        use schema::{attendance, students};
        self.run(move |conn| {
            let latest: Vec<(String, Option<NaiveDateTime>)> = attendance::table
                .filter(attendance::check_in_time.ge(since))
                .group_by(attendance::student_id)
                .select((attendance::student_id, max(attendance::check_in_time)))
                .load(conn)?;
            let by_id: HashMap<String, NaiveDateTime> = latest
                .into_iter()
                .filter_map(|(sid, at)| at.map(|at| (sid, at)))
                .collect();
            let ids: Vec<String> = by_id.keys().cloned().collect();
            let rows = students::table
                .filter(students::id.eq_any(ids))
                .select(Student::as_select())
                .load(conn)?;
            let mut out: Vec<(StudentRecord, NaiveDateTime)> = load_student_records(conn, rows)?
                .into_iter()
                .filter_map(|rec| by_id.get(&rec.student.id).map(|at| (rec, *at)))
                .collect();
            out.sort_by(|a, b| b.1.cmp(&a.1));
            Ok(out)
        })
        .await
    }
}
