pub mod accounts;
pub mod attendance;
pub mod models;
pub mod schema;

use std::collections::HashMap;

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::DatabaseErrorKind;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use models::{
    Attendance, Course, Location, NewCourse, NewLocation, NewStudent, Student,
    StudentProfileChanges, StudentRecord,
};
use tracing::{debug, trace};
use visitlog_shared::api::{LocationQuery, LocationReq, StudentReq, StudentUpdateReq};
use visitlog_shared::domain::DEFAULT_STUDENT_IMAGE;

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, unexpected constraint failure, etc.)
    #[error("database error: {0}")]
    Database(diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// The caller supplied invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The addressed row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The write would break a uniqueness or reference rule.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<diesel::result::Error> for StorageError {
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::Error;
        match err {
            Error::NotFound => StorageError::NotFound("record not found".to_string()),
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                StorageError::Conflict(info.message().to_string())
            }
            Error::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
                StorageError::Conflict(info.message().to_string())
            }
            other => StorageError::Database(other),
        }
    }
}

#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        if let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::InvalidInput(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let manager = ConnectionManager::<SqliteConnection>::new(path.to_string());
        let pool = Pool::builder().max_size(8).build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        {
            let pool_clone = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
                const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
                let mut conn = pool_clone.get()?;
                configure_sqlite_conn(&mut conn)?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                Ok(())
            })
            .await??;
        }

        debug!(path, "sqlite store ready");
        Ok(Store { pool })
    }

    /// Runs `f` on a pooled connection inside `spawn_blocking`.
    async fn run<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T, StorageError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<T, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            f(&mut *conn)
        })
        .await?
    }

    // Courses

    pub async fn list_courses(&self) -> Result<Vec<Course>, StorageError> {
        use schema::courses::dsl::*;
        self.run(|conn| {
            Ok(courses
                .order(course_name.asc())
                .select(Course::as_select())
                .load(conn)?)
        })
        .await
    }

    pub async fn get_course(&self, course_id: i32) -> Result<Option<Course>, StorageError> {
        use schema::courses::dsl::*;
        self.run(move |conn| {
            Ok(courses
                .find(course_id)
                .select(Course::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    pub async fn create_course(&self, name: &str) -> Result<Course, StorageError> {
        use schema::courses;
        let name = required(name, "Course name")?;
        self.run(move |conn| {
            let taken: i64 = courses::table
                .filter(courses::course_name.eq(&name))
                .count()
                .get_result(conn)?;
            if taken > 0 {
                return Err(StorageError::Conflict(format!(
                    "Course '{name}' already exists"
                )));
            }
            Ok(diesel::insert_into(courses::table)
                .values(&NewCourse { course_name: &name })
                .returning(Course::as_returning())
                .get_result(conn)?)
        })
        .await
    }

    pub async fn update_course(&self, course_id: i32, name: &str) -> Result<Course, StorageError> {
        use schema::courses;
        let name = required(name, "Course name")?;
        self.run(move |conn| {
            let taken: i64 = courses::table
                .filter(courses::course_name.eq(&name))
                .filter(courses::id.ne(course_id))
                .count()
                .get_result(conn)?;
            if taken > 0 {
                return Err(StorageError::Conflict(format!(
                    "Course '{name}' already exists"
                )));
            }
            diesel::update(courses::table.find(course_id))
                .set(courses::course_name.eq(&name))
                .returning(Course::as_returning())
                .get_result(conn)
                .optional()?
                .ok_or_else(|| StorageError::NotFound(format!("course {course_id}")))
        })
        .await
    }

    pub async fn count_students_in_course(&self, course_id: i32) -> Result<i64, StorageError> {
        use schema::students::dsl as s;
        self.run(move |conn| {
            Ok(s::students
                .filter(s::course_id.eq(course_id))
                .count()
                .get_result(conn)?)
        })
        .await
    }

    /// Deletes a course that no student references.
    pub async fn delete_course(&self, course_id: i32) -> Result<Course, StorageError> {
        use schema::{courses, students};
        self.run(move |conn| {
            conn.immediate_transaction(|conn| -> Result<Course, StorageError> {
                let enrolled: i64 = students::table
                    .filter(students::course_id.eq(course_id))
                    .count()
                    .get_result(conn)?;
                if enrolled > 0 {
                    return Err(StorageError::Conflict(format!(
                        "Cannot delete course with {enrolled} enrolled student(s)"
                    )));
                }
                diesel::delete(courses::table.find(course_id))
                    .returning(Course::as_returning())
                    .get_result(conn)
                    .optional()?
                    .ok_or_else(|| StorageError::NotFound(format!("course {course_id}")))
            })
        })
        .await
    }

    // Locations

    pub async fn list_locations(&self, query: LocationQuery) -> Result<Vec<Location>, StorageError> {
        use schema::locations::dsl as l;
        self.run(move |conn| {
            let mut q = l::locations.select(Location::as_select()).into_boxed();
            if let Some(p) = query.province.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
                q = q.filter(l::province.eq(p.to_string()));
            }
            if let Some(m) = query
                .municipality
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
            {
                q = q.filter(l::municipality.eq(m.to_string()));
            }
            Ok(q
                .order((l::province.asc(), l::municipality.asc(), l::barangay.asc()))
                .load(conn)?)
        })
        .await
    }

    pub async fn get_location(&self, location_id: i32) -> Result<Option<Location>, StorageError> {
        use schema::locations::dsl::*;
        self.run(move |conn| {
            Ok(locations
                .find(location_id)
                .select(Location::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    pub async fn create_location(&self, req: LocationReq) -> Result<Location, StorageError> {
        let req = normalize_location(req)?;
        self.run(move |conn| insert_location(conn, &req)).await
    }

    pub async fn update_location(
        &self,
        location_id: i32,
        req: LocationReq,
    ) -> Result<Location, StorageError> {
        use schema::locations;
        let req = normalize_location(req)?;
        self.run(move |conn| {
            diesel::update(locations::table.find(location_id))
                .set(&NewLocation {
                    barangay: &req.barangay,
                    municipality: &req.municipality,
                    province: &req.province,
                })
                .returning(Location::as_returning())
                .get_result(conn)
                .optional()?
                .ok_or_else(|| StorageError::NotFound(format!("location {location_id}")))
        })
        .await
    }

    /// Number of students and admins pointing at a location.
    pub async fn location_reference_count(&self, location_id: i32) -> Result<i64, StorageError> {
        self.run(move |conn| location_refs(conn, location_id)).await
    }

    /// Deletes a location no student or admin points at.
    pub async fn delete_location(&self, location_id: i32) -> Result<Location, StorageError> {
        use schema::locations;
        self.run(move |conn| {
            conn.immediate_transaction(|conn| -> Result<Location, StorageError> {
                let refs = location_refs(conn, location_id)?;
                if refs > 0 {
                    return Err(StorageError::Conflict(format!(
                        "Location is still referenced by {refs} record(s)"
                    )));
                }
                diesel::delete(locations::table.find(location_id))
                    .returning(Location::as_returning())
                    .get_result(conn)
                    .optional()?
                    .ok_or_else(|| StorageError::NotFound(format!("location {location_id}")))
            })
        })
        .await
    }

    // Students

    pub async fn list_students(&self) -> Result<Vec<StudentRecord>, StorageError> {
        use schema::students::dsl as s;
        self.run(|conn| {
            let rows = s::students
                .order((s::last_name.asc(), s::first_name.asc()))
                .select(Student::as_select())
                .load(conn)?;
            load_student_records(conn, rows)
        })
        .await
    }

    pub async fn get_student(&self, student_id: &str) -> Result<Option<StudentRecord>, StorageError> {
        let sid = student_id.trim().to_string();
        self.run(move |conn| match load_student_record(conn, &sid) {
            Ok(rec) => Ok(Some(rec)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    pub async fn create_student(&self, req: StudentReq) -> Result<StudentRecord, StorageError> {
        use schema::students;
        let sid = required(&req.id, "Student ID")?;
        let first = required(&req.first_name, "First name")?;
        let last = required(&req.last_name, "Last name")?;
        let location = req.location.clone().map(normalize_location).transpose()?;
        trace!(student_id = %sid, "create_student starting");
        self.run(move |conn| {
            conn.immediate_transaction(|conn| -> Result<StudentRecord, StorageError> {
                let taken: i64 = students::table
                    .filter(students::id.eq(&sid))
                    .count()
                    .get_result(conn)?;
                if taken > 0 {
                    return Err(StorageError::Conflict(format!(
                        "Student ID {sid} already exists"
                    )));
                }
                if let Some(cid) = req.course_id {
                    ensure_course(conn, cid)?;
                }
                let location_id = match (&location, req.location_id) {
                    (Some(loc), _) => Some(insert_location(conn, loc)?.id),
                    (None, Some(lid)) => {
                        ensure_location(conn, lid)?;
                        Some(lid)
                    }
                    (None, None) => None,
                };
                let image = non_empty(req.image.as_deref()).unwrap_or(DEFAULT_STUDENT_IMAGE);
                diesel::insert_into(students::table)
                    .values(&NewStudent {
                        id: &sid,
                        first_name: &first,
                        middle_name: non_empty(req.middle_name.as_deref()),
                        last_name: &last,
                        age: req.age,
                        course_id: req.course_id,
                        location_id,
                        image: Some(image),
                    })
                    .execute(conn)?;
                load_student_record(conn, &sid)
            })
        })
        .await
    }

    pub async fn update_student(
        &self,
        student_id: &str,
        req: StudentUpdateReq,
    ) -> Result<StudentRecord, StorageError> {
        use schema::{locations, students};
        let sid = student_id.trim().to_string();
        let first = required(&req.first_name, "First name")?;
        let last = required(&req.last_name, "Last name")?;
        let location = req.location.clone().map(normalize_location).transpose()?;
        self.run(move |conn| {
            conn.immediate_transaction(|conn| -> Result<StudentRecord, StorageError> {
                let current = students::table
                    .find(sid.as_str())
                    .select(Student::as_select())
                    .first(conn)
                    .optional()?
                    .ok_or_else(|| StorageError::NotFound(format!("student {sid}")))?;
                if let Some(cid) = req.course_id {
                    ensure_course(conn, cid)?;
                }
                diesel::update(students::table.find(sid.as_str()))
                    .set(&StudentProfileChanges {
                        first_name: &first,
                        middle_name: non_empty(req.middle_name.as_deref()),
                        last_name: &last,
                        age: req.age,
                        course_id: req.course_id,
                    })
                    .execute(conn)?;
                if let Some(img) = non_empty(req.image.as_deref()) {
                    diesel::update(students::table.find(sid.as_str()))
                        .set(students::image.eq(img))
                        .execute(conn)?;
                }
                if let Some(loc) = &location {
                    let changes = NewLocation {
                        barangay: &loc.barangay,
                        municipality: &loc.municipality,
                        province: &loc.province,
                    };
                    // A shared row is left alone; this student gets its own copy.
                    match current.location_id {
                        Some(lid) if location_refs(conn, lid)? <= 1 => {
                            diesel::update(locations::table.find(lid))
                                .set(&changes)
                                .execute(conn)?;
                        }
                        _ => {
                            let created = insert_location(conn, loc)?;
                            diesel::update(students::table.find(sid.as_str()))
                                .set(students::location_id.eq(created.id))
                                .execute(conn)?;
                        }
                    }
                }
                load_student_record(conn, &sid)
            })
        })
        .await
    }

    /// The student row together with its attendance history, for backups.
    pub async fn student_with_attendance(
        &self,
        student_id: &str,
    ) -> Result<Option<(Student, Vec<Attendance>)>, StorageError> {
        use schema::{attendance, students};
        let sid = student_id.trim().to_string();
        self.run(move |conn| {
            let Some(student) = students::table
                .find(sid.as_str())
                .select(Student::as_select())
                .first(conn)
                .optional()?
            else {
                return Ok(None);
            };
            let history = Attendance::belonging_to(&student)
                .order(attendance::check_in_time.asc())
                .select(Attendance::as_select())
                .load(conn)?;
            Ok(Some((student, history)))
        })
        .await
    }

    /// Removes a student and its attendance rows in one transaction.
    /// Returns the number of attendance rows removed.
    pub async fn delete_student(&self, student_id: &str) -> Result<usize, StorageError> {
        use schema::{attendance, students};
        let sid = student_id.trim().to_string();
        self.run(move |conn| {
            conn.immediate_transaction(|conn| -> Result<usize, StorageError> {
                let removed_visits =
                    diesel::delete(attendance::table.filter(attendance::student_id.eq(&sid)))
                        .execute(conn)?;
                let removed = diesel::delete(students::table.find(sid.as_str())).execute(conn)?;
                if removed == 0 {
                    return Err(StorageError::NotFound(format!("student {sid}")));
                }
                Ok(removed_visits)
            })
        })
        .await
    }
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // WAL plus a busy timeout for concurrent readers; FK enforcement is per connection
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    diesel::sql_query("PRAGMA foreign_keys=ON;").execute(conn)?;
    Ok(())
}

fn required(value: &str, field: &str) -> Result<String, StorageError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(StorageError::InvalidInput(format!("{field} is required")));
    }
    Ok(v.to_string())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn normalize_location(req: LocationReq) -> Result<LocationReq, StorageError> {
    Ok(LocationReq {
        barangay: required(&req.barangay, "Barangay")?,
        municipality: required(&req.municipality, "Municipality")?,
        province: required(&req.province, "Province")?,
    })
}

/// Students and admins pointing at a location row.
fn location_refs(conn: &mut SqliteConnection, location_id: i32) -> Result<i64, StorageError> {
    use schema::{students, users};
    let student_refs: i64 = students::table
        .filter(students::location_id.eq(location_id))
        .count()
        .get_result(conn)?;
    let user_refs: i64 = users::table
        .filter(users::location_id.eq(location_id))
        .count()
        .get_result(conn)?;
    Ok(student_refs + user_refs)
}

fn insert_location(conn: &mut SqliteConnection, req: &LocationReq) -> Result<Location, StorageError> {
    use schema::locations;
    Ok(diesel::insert_into(locations::table)
        .values(&NewLocation {
            barangay: &req.barangay,
            municipality: &req.municipality,
            province: &req.province,
        })
        .returning(Location::as_returning())
        .get_result(conn)?)
}

fn ensure_course(conn: &mut SqliteConnection, course_id: i32) -> Result<(), StorageError> {
    use schema::courses;
    let found: i64 = courses::table
        .filter(courses::id.eq(course_id))
        .count()
        .get_result(conn)?;
    if found == 0 {
        return Err(StorageError::InvalidInput(format!(
            "course {course_id} does not exist"
        )));
    }
    Ok(())
}

fn ensure_location(conn: &mut SqliteConnection, location_id: i32) -> Result<(), StorageError> {
    use schema::locations;
    let found: i64 = locations::table
        .filter(locations::id.eq(location_id))
        .count()
        .get_result(conn)?;
    if found == 0 {
        return Err(StorageError::InvalidInput(format!(
            "location {location_id} does not exist"
        )));
    }
    Ok(())
}

fn load_student_record(
    conn: &mut SqliteConnection,
    student_id: &str,
) -> Result<StudentRecord, StorageError> {
    use schema::students;
    let student = students::table
        .find(student_id)
        .select(Student::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| StorageError::NotFound(format!("student {student_id}")))?;
    let mut records = load_student_records(conn, vec![student])?;
    records
        .pop()
        .ok_or_else(|| StorageError::NotFound(format!("student {student_id}")))
}

/// Attaches course and location rows to each student with two batched lookups.
fn load_student_records(
    conn: &mut SqliteConnection,
    rows: Vec<Student>,
) -> Result<Vec<StudentRecord>, StorageError> {
    use schema::{courses, locations};
    let course_ids: Vec<i32> = rows.iter().filter_map(|s| s.course_id).collect();
    let location_ids: Vec<i32> = rows.iter().filter_map(|s| s.location_id).collect();
    let course_map: HashMap<i32, Course> = courses::table
        .filter(courses::id.eq_any(course_ids))
        .select(Course::as_select())
        .load(conn)?
        .into_iter()
        .map(|c| (c.id, c))
        .collect();
    let location_map: HashMap<i32, Location> = locations::table
        .filter(locations::id.eq_any(location_ids))
        .select(Location::as_select())
        .load(conn)?
        .into_iter()
        .map(|l| (l.id, l))
        .collect();
    Ok(rows
        .into_iter()
        .map(|student| StudentRecord {
            course: student.course_id.and_then(|id| course_map.get(&id).cloned()),
            location: student
                .location_id
                .and_then(|id| location_map.get(&id).cloned()),
            student,
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Store;

    /// Fresh store in a temp dir; keep the dir alive for the test's duration.
    pub async fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("visitlog.db");
        let store = Store::connect_sqlite(path.to_str().expect("utf8 path"))
            .await
            .expect("connect");
        (dir, store)
    }
}
