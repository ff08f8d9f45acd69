use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::auth::Role;

pub mod endpoints;

pub const API_V1_PREFIX: &str = "/api/v1";

/// Name of the cookie that carries the admin session token.
pub const SESSION_COOKIE: &str = "visitlog_session";

// Generic mutation result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResp {
    pub success: bool,
    pub message: String,
}

impl MessageResp {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Mutation result carrying the stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedResp<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
}

impl<T> SavedResp<T> {
    pub fn new(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }
}

// Auth
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthReq {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResp {
    pub success: bool,
    pub message: String,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ForgotPasswordReq {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyCodeReq {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetPasswordReq {
    pub email: String,
    pub code: String,
    pub password: String,
    pub confirm_password: String,
}

// Check-in
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckInReq {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckInResp {
    pub success: bool,
    pub message: Option<String>,
    pub student: Option<StudentDto>,
    /// Check-in time of the recorded (or already existing) row, local wall clock.
    pub login_time: Option<String>,
}

// Courses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseDto {
    pub id: i32,
    pub course_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CourseReq {
    pub course_name: String,
}

// Locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationDto {
    pub id: i32,
    pub barangay: String,
    pub municipality: String,
    pub province: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationReq {
    pub barangay: String,
    pub municipality: String,
    pub province: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LocationQuery {
    pub province: Option<String>,
    pub municipality: Option<String>,
}

// Students
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentDto {
    pub id: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub age: Option<i32>,
    pub image: Option<String>,
    pub course: Option<CourseDto>,
    pub location: Option<LocationDto>,
}

/// Create payload. Either `location_id` references an existing row or
/// `location` describes a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentReq {
    pub id: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub age: Option<i32>,
    pub course_id: Option<i32>,
    pub image: Option<String>,
    pub location_id: Option<i32>,
    pub location: Option<LocationReq>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentUpdateReq {
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub age: Option<i32>,
    pub course_id: Option<i32>,
    /// `None` keeps the current image.
    pub image: Option<String>,
    /// Rewrites the student's location row in place when present.
    pub location: Option<LocationReq>,
}

// Admin users
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminDto {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub location_id: Option<i32>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminReq {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    /// Required on create; on update `None` keeps the current password.
    pub password: Option<String>,
    pub confirm_password: Option<String>,
    pub location_id: Option<i32>,
    pub image: Option<String>,
    pub role: Option<Role>,
}

// Dashboard
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DashboardQuery {
    pub filter: Option<String>,
    #[serde(alias = "startDate")]
    pub start_date: Option<String>,
    #[serde(alias = "endDate")]
    pub end_date: Option<String>,
    pub course_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceVisitsDto {
    pub municipality: String,
    pub visits: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentLoginDto {
    pub student: StudentDto,
    pub login_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeGroupDto {
    pub bracket: String,
    pub visits: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardDto {
    pub filter: String,
    pub start: String,
    pub end: String,
    pub place_visits: Vec<PlaceVisitsDto>,
    pub total_visitors: i64,
    pub logged_in_users: Vec<RecentLoginDto>,
    pub monthly_course_visits: BTreeMap<String, [i64; 12]>,
    pub weekly_course_visits: BTreeMap<String, [i64; 7]>,
    pub weekly_place_visits: Vec<PlaceVisitsDto>,
    pub monthly_place_visits: Vec<PlaceVisitsDto>,
    pub top_weekly_places: Vec<PlaceVisitsDto>,
    pub total_logins_month: i64,
    pub login_percentage_increase: f64,
    pub age_groups: Vec<AgeGroupDto>,
    pub course_mapping: BTreeMap<i32, String>,
}

// Exports
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ExportQuery {
    pub filter: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub course_id: Option<i32>,
    pub unique_per_day: Option<bool>,
}

// Charts
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ChartQuery {
    pub weekly_course_visits: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub monthly_data: Option<String>,
    pub top_places: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

// Uploads
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResp {
    pub success: bool,
    pub message: String,
    pub filename: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionDto {
    pub version: String,
}
