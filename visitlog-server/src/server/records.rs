//! Admin CRUD for students, courses and locations.

use axum::Json;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use tracing::info;
use visitlog_shared::api::{
    CourseDto, CourseReq, LocationDto, LocationQuery, LocationReq, MessageResp, SavedResp,
    StudentDto, StudentReq, StudentUpdateReq,
};

use super::auth::AuthCtx;
use super::{ApiJson, ApiPath, ApiQuery, AppError, AppState};

// Students

pub async fn list_students(
    State(state): State<AppState>,
) -> Result<Json<Vec<StudentDto>>, AppError> {
    let rows = state.store.list_students().await?;
    Ok(Json(rows.iter().map(Into::into).collect()))
}

pub async fn get_student(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<StudentDto>, AppError> {
    let rec = state
        .store
        .get_student(&id)
        .await?
        .ok_or_else(|| AppError::not_found("Student not found"))?;
    Ok(Json((&rec).into()))
}

pub async fn create_student(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiJson(body): ApiJson<StudentReq>,
) -> Result<(StatusCode, Json<SavedResp<StudentDto>>), AppError> {
    let rec = state.store.create_student(body).await?;
    info!(by=%auth.username, student_id=%rec.student.id, "student created");
    Ok((
        StatusCode::CREATED,
        Json(SavedResp::new("Student added successfully!", (&rec).into())),
    ))
}

pub async fn update_student(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiPath(id): ApiPath<String>,
    ApiJson(body): ApiJson<StudentUpdateReq>,
) -> Result<Json<SavedResp<StudentDto>>, AppError> {
    if state.store.get_student(&id).await?.is_none() {
        return Err(AppError::not_found("Student not found"));
    }
    let rec = state.store.update_student(&id, body).await?;
    info!(by=%auth.username, student_id=%rec.student.id, "student updated");
    Ok(Json(SavedResp::new(
        "Student updated successfully!",
        (&rec).into(),
    )))
}

/// Snapshots the student and its attendance history, then removes both.
pub async fn delete_student(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<MessageResp>, AppError> {
    let (student, history) = state
        .store
        .student_with_attendance(&id)
        .await?
        .ok_or_else(|| AppError::not_found("Student not found"))?;
    let student_id = student.id.clone();
    let now = state.local_now();
    if !history.is_empty() {
        state.backups.snapshot(history, now).await?;
    }
    state.backups.snapshot(vec![student], now).await?;
    let visits = state.store.delete_student(&student_id).await?;
    info!(by=%auth.username, student_id=%student_id, visits, "student deleted");
    Ok(Json(MessageResp::ok(format!(
        "Student {student_id} deleted successfully"
    ))))
}

// Courses

pub async fn list_courses(
    State(state): State<AppState>,
) -> Result<Json<Vec<CourseDto>>, AppError> {
    let rows = state.store.list_courses().await?;
    Ok(Json(rows.iter().map(Into::into).collect()))
}

pub async fn get_course(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i32>,
) -> Result<Json<CourseDto>, AppError> {
    let course = state
        .store
        .get_course(id)
        .await?
        .ok_or_else(|| AppError::not_found("Course not found"))?;
    Ok(Json((&course).into()))
}

pub async fn create_course(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CourseReq>,
) -> Result<(StatusCode, Json<SavedResp<CourseDto>>), AppError> {
    let course = state.store.create_course(&body.course_name).await?;
    info!(course=%course.course_name, "course created");
    Ok((
        StatusCode::CREATED,
        Json(SavedResp::new("Course added successfully!", (&course).into())),
    ))
}

pub async fn update_course(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i32>,
    ApiJson(body): ApiJson<CourseReq>,
) -> Result<Json<SavedResp<CourseDto>>, AppError> {
    if state.store.get_course(id).await?.is_none() {
        return Err(AppError::not_found("Course not found"));
    }
    let course = state.store.update_course(id, &body.course_name).await?;
    Ok(Json(SavedResp::new(
        "Course updated successfully!",
        (&course).into(),
    )))
}

pub async fn delete_course(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiPath(id): ApiPath<i32>,
) -> Result<Json<MessageResp>, AppError> {
    let course = state
        .store
        .get_course(id)
        .await?
        .ok_or_else(|| AppError::not_found("Course not found"))?;
    let enrolled = state.store.count_students_in_course(id).await?;
    if enrolled > 0 {
        return Err(AppError::conflict(format!(
            "Cannot delete course with {enrolled} enrolled student(s)"
        )));
    }
    let name = course.course_name.clone();
    state.backups.snapshot(vec![course], state.local_now()).await?;
    state.store.delete_course(id).await?;
    info!(by=%auth.username, course=%name, "course deleted");
    Ok(Json(MessageResp::ok(format!(
        "Course '{name}' deleted successfully"
    ))))
}

// Locations

pub async fn list_locations(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<LocationQuery>,
) -> Result<Json<Vec<LocationDto>>, AppError> {
    let rows = state.store.list_locations(q).await?;
    Ok(Json(rows.iter().map(Into::into).collect()))
}

pub async fn get_location(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i32>,
) -> Result<Json<LocationDto>, AppError> {
    let loc = state
        .store
        .get_location(id)
        .await?
        .ok_or_else(|| AppError::not_found("Location not found"))?;
    Ok(Json((&loc).into()))
}

pub async fn create_location(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<LocationReq>,
) -> Result<(StatusCode, Json<SavedResp<LocationDto>>), AppError> {
    let loc = state.store.create_location(body).await?;
    Ok((
        StatusCode::CREATED,
        Json(SavedResp::new("Location added successfully!", (&loc).into())),
    ))
}

pub async fn update_location(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i32>,
    ApiJson(body): ApiJson<LocationReq>,
) -> Result<Json<SavedResp<LocationDto>>, AppError> {
    if state.store.get_location(id).await?.is_none() {
        return Err(AppError::not_found("Location not found"));
    }
    let loc = state.store.update_location(id, body).await?;
    Ok(Json(SavedResp::new(
        "Location updated successfully!",
        (&loc).into(),
    )))
}

pub async fn delete_location(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiPath(id): ApiPath<i32>,
) -> Result<Json<MessageResp>, AppError> {
    let loc = state
        .store
        .get_location(id)
        .await?
        .ok_or_else(|| AppError::not_found("Location not found"))?;
    let refs = state.store.location_reference_count(id).await?;
    if refs > 0 {
        return Err(AppError::conflict(format!(
            "Location is still referenced by {refs} record(s)"
        )));
    }
    state.backups.snapshot(vec![loc], state.local_now()).await?;
    state.store.delete_location(id).await?;
    info!(by=%auth.username, location_id = id, "location deleted");
    Ok(Json(MessageResp::ok("Location deleted successfully")))
}
