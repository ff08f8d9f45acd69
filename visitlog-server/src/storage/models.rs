use crate::storage::schema::{
    attendance, courses, locations, password_reset_codes, sessions, students, users,
};
use chrono::NaiveDateTime;
use diesel::prelude::*;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = courses)]
pub struct Course {
    pub id: i32,
    pub course_name: String,
}

#[derive(Insertable)]
#[diesel(table_name = courses)]
pub struct NewCourse<'a> {
    pub course_name: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = locations)]
pub struct Location {
    pub id: i32,
    pub barangay: String,
    pub municipality: String,
    pub province: String,
}

#[derive(Insertable, AsChangeset)]
#[diesel(table_name = locations)]
pub struct NewLocation<'a> {
    pub barangay: &'a str,
    pub municipality: &'a str,
    pub province: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = students)]
pub struct Student {
    pub id: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub age: Option<i32>,
    pub course_id: Option<i32>,
    pub location_id: Option<i32>,
    pub image: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = students)]
pub struct NewStudent<'a> {
    pub id: &'a str,
    pub first_name: &'a str,
    pub middle_name: Option<&'a str>,
    pub last_name: &'a str,
    pub age: Option<i32>,
    pub course_id: Option<i32>,
    pub location_id: Option<i32>,
    pub image: Option<&'a str>,
}

/// Profile fields rewritten on every student update. `None` clears the column.
#[derive(AsChangeset)]
#[diesel(table_name = students)]
#[diesel(treat_none_as_null = true)]
pub struct StudentProfileChanges<'a> {
    pub first_name: &'a str,
    pub middle_name: Option<&'a str>,
    pub last_name: &'a str,
    pub age: Option<i32>,
    pub course_id: Option<i32>,
}

/// A student joined with its course and location rows.
#[derive(Debug, Clone)]
pub struct StudentRecord {
    pub student: Student,
    pub course: Option<Course>,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub location_id: Option<i32>,
    pub image: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub phone: Option<&'a str>,
    pub password_hash: &'a str,
    pub role: &'a str,
    pub location_id: Option<i32>,
    pub image: Option<&'a str>,
}

/// Owned account fields handed to the store for create and update.
/// On update a `None` password hash keeps the stored one.
#[derive(Debug, Clone)]
pub struct UserInput {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub password_hash: Option<String>,
    pub role: String,
    pub location_id: Option<i32>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = attendance)]
#[diesel(belongs_to(Student, foreign_key = student_id))]
pub struct Attendance {
    pub id: i32,
    pub student_id: String,
    pub check_in_time: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = attendance)]
pub struct NewAttendance<'a> {
    pub student_id: &'a str,
    pub check_in_time: NaiveDateTime,
}

/// One attendance row flattened with the student columns reports need.
/// Course and location are `None` when the student has no such link.
#[derive(Debug, Clone, Queryable)]
pub struct VisitRow {
    pub attendance_id: i32,
    pub check_in_time: NaiveDateTime,
    pub student_id: String,
    pub first_name: String,
    pub last_name: String,
    pub age: Option<i32>,
    pub course_id: Option<i32>,
    pub course_name: Option<String>,
    pub municipality: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession<'a> {
    pub jti: &'a str,
    pub user_id: i32,
    pub issued_at: NaiveDateTime,
    pub last_used_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = password_reset_codes)]
#[diesel(primary_key(email))]
pub struct ResetCode {
    pub email: String,
    pub code: String,
    pub created_at: NaiveDateTime,
    pub attempts: i32,
    pub verified_at: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = password_reset_codes)]
pub struct NewResetCode<'a> {
    pub email: &'a str,
    pub code: &'a str,
    pub created_at: NaiveDateTime,
    pub attempts: i32,
    pub verified_at: Option<NaiveDateTime>,
}

impl From<&Course> for visitlog_shared::api::CourseDto {
    fn from(c: &Course) -> Self {
        Self {
            id: c.id,
            course_name: c.course_name.clone(),
        }
    }
}

impl From<&Location> for visitlog_shared::api::LocationDto {
    fn from(l: &Location) -> Self {
        Self {
            id: l.id,
            barangay: l.barangay.clone(),
            municipality: l.municipality.clone(),
            province: l.province.clone(),
        }
    }
}

impl From<&StudentRecord> for visitlog_shared::api::StudentDto {
    fn from(rec: &StudentRecord) -> Self {
        let s = &rec.student;
        Self {
            id: s.id.clone(),
            first_name: s.first_name.clone(),
            middle_name: s.middle_name.clone(),
            last_name: s.last_name.clone(),
            age: s.age,
            image: s.image.clone(),
            course: rec.course.as_ref().map(Into::into),
            location: rec.location.as_ref().map(Into::into),
        }
    }
}
