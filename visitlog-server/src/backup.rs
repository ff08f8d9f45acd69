//! Snapshots of records removed through the admin API.
//!
//! Each deletion writes `<Model>_deleted_<YYYYmmdd_HHMMSS>.csv` and a
//! matching `.db` SQLite file holding the same rows.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sql_types::{Nullable, Text};
use tracing::info;

use crate::storage::models::{Attendance, Course, Location, Student, User};

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("sqlite error: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("sqlite error: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A row type that can be written to a backup.
pub trait BackupRecord {
    /// Model name used in file names and as the snapshot table name.
    const MODEL: &'static str;
    fn columns() -> &'static [&'static str];
    fn values(&self) -> Vec<Option<String>>;
}

impl BackupRecord for Student {
    const MODEL: &'static str = "Student";
    fn columns() -> &'static [&'static str] {
        &[
            "id",
            "first_name",
            "middle_name",
            "last_name",
            "age",
            "course_id",
            "location_id",
            "image",
        ]
    }
    fn values(&self) -> Vec<Option<String>> {
        vec![
            Some(self.id.clone()),
            Some(self.first_name.clone()),
            self.middle_name.clone(),
            Some(self.last_name.clone()),
            self.age.map(|v| v.to_string()),
            self.course_id.map(|v| v.to_string()),
            self.location_id.map(|v| v.to_string()),
            self.image.clone(),
        ]
    }
}

impl BackupRecord for Attendance {
    const MODEL: &'static str = "Attendance";
    fn columns() -> &'static [&'static str] {
        &["id", "student_id", "check_in_time"]
    }
    fn values(&self) -> Vec<Option<String>> {
        vec![
            Some(self.id.to_string()),
            Some(self.student_id.clone()),
            Some(
                self.check_in_time
                    .format(crate::reports::TIMESTAMP_FORMAT)
                    .to_string(),
            ),
        ]
    }
}

impl BackupRecord for Course {
    const MODEL: &'static str = "Course";
    fn columns() -> &'static [&'static str] {
        &["id", "course_name"]
    }
    fn values(&self) -> Vec<Option<String>> {
        vec![Some(self.id.to_string()), Some(self.course_name.clone())]
    }
}

impl BackupRecord for Location {
    const MODEL: &'static str = "Location";
    fn columns() -> &'static [&'static str] {
        &["id", "barangay", "municipality", "province"]
    }
    fn values(&self) -> Vec<Option<String>> {
        vec![
            Some(self.id.to_string()),
            Some(self.barangay.clone()),
            Some(self.municipality.clone()),
            Some(self.province.clone()),
        ]
    }
}

// Password hashes are left out of admin backups.
impl BackupRecord for User {
    const MODEL: &'static str = "User";
    fn columns() -> &'static [&'static str] {
        &[
            "id",
            "username",
            "email",
            "first_name",
            "last_name",
            "phone",
            "role",
            "location_id",
            "image",
        ]
    }
    fn values(&self) -> Vec<Option<String>> {
        vec![
            Some(self.id.to_string()),
            Some(self.username.clone()),
            Some(self.email.clone()),
            Some(self.first_name.clone()),
            Some(self.last_name.clone()),
            self.phone.clone(),
            Some(self.role.clone()),
            self.location_id.map(|v| v.to_string()),
            self.image.clone(),
        ]
    }
}

#[derive(Clone)]
pub struct BackupWriter {
    dir: PathBuf,
}

impl BackupWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Writes `rows` to the CSV and SQLite snapshot pair for `T::MODEL`
    /// and returns the two paths.
    pub async fn snapshot<T>(
        &self,
        rows: Vec<T>,
        at: NaiveDateTime,
    ) -> Result<(PathBuf, PathBuf), BackupError>
    where
        T: BackupRecord + Send + 'static,
    {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || write_snapshot(&dir, &rows, at)).await?
    }
}

fn write_snapshot<T: BackupRecord>(
    dir: &Path,
    rows: &[T],
    at: NaiveDateTime,
) -> Result<(PathBuf, PathBuf), BackupError> {
    std::fs::create_dir_all(dir)?;
    let stem = format!("{}_deleted_{}", T::MODEL, at.format("%Y%m%d_%H%M%S"));
    let csv_path = unique_path(dir, &stem, "csv");
    let db_path = csv_path.with_extension("db");

    let mut wtr = csv::Writer::from_path(&csv_path)?;
    wtr.write_record(T::columns())?;
    for row in rows {
        wtr.write_record(row.values().iter().map(|v| v.as_deref().unwrap_or("")))?;
    }
    wtr.flush()?;

    write_sqlite(&db_path, rows)?;
    info!(
        model = T::MODEL,
        rows = rows.len(),
        csv = %csv_path.display(),
        db = %db_path.display(),
        "backup written"
    );
    Ok((csv_path, db_path))
}

/// Appends `_N` when a same-second snapshot of the model already exists.
fn unique_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let mut candidate = dir.join(format!("{stem}.{ext}"));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{stem}_{n}.{ext}"));
        n += 1;
    }
    candidate
}

fn write_sqlite<T: BackupRecord>(path: &Path, rows: &[T]) -> Result<(), BackupError> {
    let url = path.to_string_lossy().to_string();
    let mut conn = SqliteConnection::establish(&url)?;
    let columns = T::columns();
    let ddl = format!(
        "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
        T::MODEL,
        columns
            .iter()
            .map(|c| format!("\"{c}\" TEXT"))
            .collect::<Vec<_>>()
            .join(", ")
    );
    diesel::sql_query(ddl).execute(&mut conn)?;
    let insert = format!(
        "INSERT INTO \"{}\" ({}) VALUES ({})",
        T::MODEL,
        columns
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(", "),
        vec!["?"; columns.len()].join(", ")
    );
    conn.transaction(|conn| -> Result<(), diesel::result::Error> {
        for row in rows {
            let mut q = diesel::sql_query(insert.as_str()).into_boxed();
            for value in row.values() {
                q = q.bind::<Nullable<Text>, _>(value);
            }
            q.execute(conn)?;
        }
        Ok(())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[tokio::test]
    async fn snapshot_writes_csv_and_sqlite_pair() {
        let dir = tempfile::tempdir().unwrap();
        let writer = BackupWriter::new(dir.path());
        let at = NaiveDate::from_ymd_opt(2024, 5, 6)
            .and_then(|d| d.and_hms_opt(14, 3, 9))
            .unwrap();
        let rows = vec![
            Course {
                id: 1,
                course_name: "Marine Biology".into(),
            },
            Course {
                id: 2,
                course_name: "Home Economics, Industrial Arts".into(),
            },
        ];
        let (csv_path, db_path) = writer.snapshot(rows, at).await.unwrap();
        assert_eq!(
            csv_path.file_name().and_then(|n| n.to_str()),
            Some("Course_deleted_20240506_140309.csv")
        );
        let text = std::fs::read_to_string(&csv_path).unwrap();
        assert!(text.starts_with("id,course_name\n1,Marine Biology\n"));
        assert!(text.contains("\"Home Economics, Industrial Arts\""));

        #[derive(QueryableByName)]
        struct Count {
            #[diesel(sql_type = diesel::sql_types::BigInt)]
            n: i64,
        }
        let mut conn = SqliteConnection::establish(db_path.to_str().unwrap()).unwrap();
        let count: Count = diesel::sql_query("SELECT COUNT(*) AS n FROM \"Course\"")
            .get_result(&mut conn)
            .unwrap();
        assert_eq!(count.n, 2);

        let (second_csv, _) = writer.snapshot(Vec::<Course>::new(), at).await.unwrap();
        assert_ne!(second_csv, csv_path);
    }
}
